#![allow(dead_code)]

use ns_update::{
	render::ModelsData,
	transport::ModelRequest,
	update::{Config, Runtime},
	Promise, Registry, Renderer, Scheduler, Transport, View,
};
use serde_json::Value;
use std::{
	cell::RefCell,
	collections::{HashMap, HashSet, VecDeque},
	rc::Rc,
};

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().with_max_level(tracing::Level::TRACE).try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
	/// [`None`] is the mount point.
	pub parent: Option<NodeId>,
	pub slot: String,
	pub position: usize,
}

#[derive(Debug, Clone)]
pub struct Element {
	pub key: String,
	pub content: Value,
	pub placement: Option<Placement>,
}

#[derive(Debug, Default)]
struct DomState {
	next: u32,
	elements: HashMap<NodeId, Element>,
	renders: HashMap<String, u32>,
	refusing: HashSet<String>,
	in_place: bool,
}

/// A stand-in for a document. Clones share state, so a test can keep one while the runtime owns another.
#[derive(Debug, Clone, Default)]
pub struct Dom(Rc<RefCell<DomState>>);

impl Dom {
	/// Makes views named `name` fail to render.
	pub fn refuse(&self, name: &str) {
		self.0.borrow_mut().refusing.insert(name.to_owned());
	}

	pub fn accept(&self, name: &str) {
		self.0.borrow_mut().refusing.remove(name);
	}

	/// Redraws update the previous node instead of replacing it.
	pub fn set_in_place(&self, in_place: bool) {
		self.0.borrow_mut().in_place = in_place;
	}

	pub fn renders(&self, key: &str) -> u32 {
		self.0.borrow().renders.get(key).copied().unwrap_or(0)
	}

	pub fn element(&self, node: NodeId) -> Option<Element> {
		self.0.borrow().elements.get(&node).cloned()
	}

	/// Keys of attached elements, sorted.
	pub fn attached(&self) -> Vec<String> {
		let mut keys: Vec<_> = self.0.borrow().elements.values().filter(|element| element.placement.is_some()).map(|element| element.key.clone()).collect();
		keys.sort();
		keys
	}

	/// How many attached elements carry `key`.
	pub fn count(&self, key: &str) -> usize {
		self.0.borrow().elements.values().filter(|element| element.key == key && element.placement.is_some()).count()
	}

	/// Keys attached directly below `parent`, by slot and position.
	pub fn children(&self, parent: NodeId) -> Vec<String> {
		let state = self.0.borrow();
		let mut children: Vec<_> = state
			.elements
			.values()
			.filter_map(|element| match &element.placement {
				Some(placement) if placement.parent == Some(parent) => Some((placement.slot.clone(), placement.position, element.key.clone())),
				_ => None,
			})
			.collect();
		children.sort();
		children.into_iter().map(|(_, _, key)| key).collect()
	}

	pub fn parent(&self, node: NodeId) -> Option<NodeId> {
		self.0.borrow().elements.get(&node)?.placement.as_ref()?.parent
	}
}

impl Renderer for Dom {
	type Node = NodeId;
	type Error = String;

	fn render(&mut self, view: &View, models: &ModelsData, previous: Option<&NodeId>) -> Result<NodeId, String> {
		let mut state = self.0.borrow_mut();
		if state.refusing.contains(view.name()) {
			return Err(format!("{} refuses to render", view.key()));
		}
		*state.renders.entry(view.key().to_owned()).or_default() += 1;

		if state.in_place {
			if let Some(previous) = previous {
				if let Some(element) = state.elements.get_mut(previous) {
					element.content = models.to_value();
					return Ok(*previous);
				}
			}
		}

		state.next += 1;
		let node = NodeId(state.next);
		state.elements.insert(
			node,
			Element {
				key: view.key().to_owned(),
				content: models.to_value(),
				placement: None,
			},
		);
		Ok(node)
	}

	fn attach(&mut self, node: &NodeId, parent: Option<&NodeId>, slot: &str, position: usize) {
		if let Some(element) = self.0.borrow_mut().elements.get_mut(node) {
			element.placement = Some(Placement {
				parent: parent.copied(),
				slot: slot.to_owned(),
				position,
			});
		}
	}

	fn detach(&mut self, node: &NodeId) {
		if let Some(element) = self.0.borrow_mut().elements.get_mut(node) {
			element.placement = None;
		}
	}

	fn is_attached(&self, node: &NodeId) -> bool {
		self.0.borrow().elements.get(node).map_or(false, |element| element.placement.is_some())
	}
}

struct Batch {
	keys: Vec<String>,
	requests: Vec<ModelRequest>,
	promise: Promise<Vec<Value>>,
}

#[derive(Default)]
struct ManualState {
	issued: Vec<Vec<String>>,
	pending: VecDeque<Batch>,
}

/// A transport whose batches stay open until the test answers them.
#[derive(Clone, Default)]
pub struct Manual(Rc<RefCell<ManualState>>);

impl Transport for Manual {
	fn fetch(&mut self, requests: &[ModelRequest], scheduler: &Scheduler) -> Promise<Vec<Value>> {
		let promise = Promise::pending(scheduler);
		let keys: Vec<_> = requests.iter().map(|request| request.key.clone()).collect();
		let mut state = self.0.borrow_mut();
		state.issued.push(keys.clone());
		state.pending.push_back(Batch {
			keys,
			requests: requests.to_vec(),
			promise: promise.clone(),
		});
		promise
	}
}

impl Manual {
	/// Keys of every batch so far, answered or not.
	pub fn issued(&self) -> Vec<Vec<String>> {
		self.0.borrow().issued.clone()
	}

	pub fn pending(&self) -> Vec<Vec<String>> {
		self.0.borrow().pending.iter().map(|batch| batch.keys.clone()).collect()
	}

	/// Answers the oldest open batch, one response per request. Returns `false` if there was none.
	pub fn respond(&self, f: impl Fn(&ModelRequest) -> Value) -> bool {
		let batch = self.0.borrow_mut().pending.pop_front();
		match batch {
			Some(batch) => {
				batch.promise.resolve(batch.requests.iter().map(f).collect());
				true
			}
			None => false,
		}
	}

	/// Like [`respond`](`Manual::respond`), but answers the newest open batch instead.
	pub fn respond_newest(&self, f: impl Fn(&ModelRequest) -> Value) -> bool {
		let batch = self.0.borrow_mut().pending.pop_back();
		match batch {
			Some(batch) => {
				batch.promise.resolve(batch.requests.iter().map(f).collect());
				true
			}
			None => false,
		}
	}

	pub fn fail(&self, reason: &str) -> bool {
		let batch = self.0.borrow_mut().pending.pop_front();
		match batch {
			Some(batch) => {
				batch.promise.fail(ns_update::Error::ModelFetch {
					key: batch.keys.join(","),
					reason: reason.to_owned(),
				});
				true
			}
			None => false,
		}
	}
}

pub type TestRuntime = Runtime<Manual, Dom>;

pub fn runtime(registry: &Registry) -> (TestRuntime, Manual, Dom) {
	init_tracing();
	let transport = Manual::default();
	let dom = Dom::default();
	(Runtime::new(Config::default(), registry.clone(), transport.clone(), dom.clone()), transport, dom)
}

/// Answers open batches (and whatever they cause) with `f` until nothing is left to do.
pub fn settle(runtime: &TestRuntime, transport: &Manual, f: impl Fn(&ModelRequest) -> Value) {
	loop {
		runtime.scheduler().run_until_idle();
		if !transport.respond(&f) {
			break;
		}
	}
	runtime.scheduler().run_until_idle();
}
