//! Bringing a view tree in line with a layout and request parameters.
//!
//! An update runs in three phases:
//!
//! 1. Planning resolves every view key the layout asks for. This is the only fallible part, and it changes nothing.
//! 2. Reconciliation walks the live tree against the plan: views whose key is still wanted are kept,
//!    others are retired, boxes hide what is no longer selected and new instances are created.
//! 3. Each *region* (the synchronous part of the tree, and every asynchronous branch on its own)
//!    fetches what its views are missing in one batch, then renders and attaches its views top-down.
//!
//! Regions run on the runtime's [`Scheduler`]: nothing visible happens before it is drained.

use crate::{
	error::{Error, Result},
	layout::{Layout, LayoutNode, LayoutView},
	model::ModelStore,
	params::Params,
	promise::{Promise, Scheduler},
	registry::{Registry, ViewDescriptor, ViewEvent},
	render::Renderer,
	transport::{ModelRequest, Response, Transport},
	view::{ModelBinding, Slot, View, ViewBox, ViewId},
};
use core::{
	cell::{Cell, RefCell},
	fmt::{self, Debug, Formatter},
};
use hashbrown::{HashMap, HashSet};
use serde_json::Value;
use std::{collections::VecDeque, rc::Rc};
use tracing::{error, info, trace, trace_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
	/// How deep a layout may nest below its root before the update is refused.
	pub depth_limit: usize,
}

impl Default for Config {
	fn default() -> Self {
		Self { depth_limit: 64 }
	}
}

struct Shared<T: Transport, R: Renderer> {
	config: Config,
	registry: Registry,
	store: ModelStore,
	scheduler: Scheduler,
	transport: RefCell<T>,
	renderer: RefCell<R>,
	nodes: RefCell<HashMap<ViewId, R::Node>>,
	updates: Cell<u64>,
}

/// Everything an update needs, bundled. Clones refer to the same runtime.
pub struct Runtime<T: Transport, R: Renderer>(Rc<Shared<T, R>>);

impl<T: Transport, R: Renderer> Clone for Runtime<T, R> {
	fn clone(&self) -> Self {
		Self(self.0.clone())
	}
}

impl<T: Transport, R: Renderer> Debug for Runtime<T, R> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Runtime")
			.field("config", &self.0.config)
			.field("store", &self.0.store)
			.field("scheduler", &self.0.scheduler)
			.field("nodes", &self.0.nodes.borrow().len())
			.field("updates", &self.0.updates.get())
			.finish()
	}
}

impl<T: 'static + Transport, R: 'static + Renderer> Runtime<T, R> {
	#[must_use]
	pub fn new(config: Config, registry: Registry, transport: T, renderer: R) -> Self {
		Self(Rc::new(Shared {
			config,
			store: ModelStore::new(registry.clone()),
			registry,
			scheduler: Scheduler::new(),
			transport: RefCell::new(transport),
			renderer: RefCell::new(renderer),
			nodes: RefCell::new(HashMap::new()),
			updates: Cell::new(0),
		}))
	}

	#[must_use]
	pub fn config(&self) -> Config {
		self.0.config
	}

	#[must_use]
	pub fn registry(&self) -> &Registry {
		&self.0.registry
	}

	#[must_use]
	pub fn store(&self) -> &ModelStore {
		&self.0.store
	}

	#[must_use]
	pub fn scheduler(&self) -> &Scheduler {
		&self.0.scheduler
	}

	/// Creates a (root) view instance backed by this runtime's store.
	///
	/// # Errors
	///
	/// See [`View::create`].
	pub fn create_view(&self, name: &str, params: Params) -> Result<View> {
		View::create(&self.0.store, name, params)
	}

	/// The node `view` was last rendered to, if it has one.
	#[must_use]
	pub fn node(&self, view: &View) -> Option<R::Node> {
		self.0.nodes.borrow().get(&view.id()).cloned()
	}

	pub fn with_renderer<U>(&self, f: impl FnOnce(&mut R) -> U) -> U {
		f(&mut self.0.renderer.borrow_mut())
	}

	pub fn with_transport<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
		f(&mut self.0.transport.borrow_mut())
	}

	/// Prepares an update of the tree below `root`. Nothing happens before [`Update::start`].
	#[must_use]
	pub fn update(&self, root: &View, layout: &Layout, params: Params) -> Update<T, R> {
		Update {
			runtime: self.clone(),
			root: root.clone(),
			layout: layout.clone(),
			params,
			force: false,
		}
	}

	/// Destroys `view` and its whole subtree, children first, detaching their nodes.
	pub fn destroy(&self, view: &View) {
		for (_, slot) in view.take_children() {
			for child in slot.views() {
				self.destroy(&child);
			}
		}
		let node = self.0.nodes.borrow_mut().remove(&view.id());
		if let Some(node) = node {
			self.0.renderer.borrow_mut().detach(&node);
		}
		if !view.is_destroyed() {
			trace!(key = %view.key(), "Destroying.");
			view.fire(ViewEvent::Destroy);
			view.mark_destroyed();
		}
	}

	fn hide(&self, view: &View) {
		if !view.is_visible() {
			return;
		}
		trace!(key = %view.key(), "Hiding.");
		if let Some(node) = self.node(view) {
			self.0.renderer.borrow_mut().detach(&node);
		}
		conceal(view);
	}

	/// Requests every model of `bindings` that isn't valid and isn't already on its way, in one batch.
	///
	/// The returned promise resolves once each of them has been answered, one way or the other.
	fn fetch(&self, bindings: Vec<ModelBinding>) -> Promise<()> {
		let shared = &self.0;
		let mut seen = HashSet::new();
		let mut requests = Vec::new();
		let mut waits = Vec::new();
		for binding in bindings {
			if !seen.insert(binding.key.clone()) {
				continue;
			}
			if let Some(inflight) = shared.store.inflight(&binding.key) {
				trace!(key = %binding.key, "Already requested.");
				waits.push(inflight);
				continue;
			}
			let model = shared.store.instance(&binding.name, &binding.key, || binding.params.clone());
			if model.is_valid() {
				continue;
			}
			model.mark_loading();
			requests.push(ModelRequest {
				name: binding.name,
				key: binding.key,
				params: binding.params,
			});
		}

		if !requests.is_empty() {
			let applied = Promise::pending(&shared.scheduler);
			for request in &requests {
				shared.store.set_inflight(&request.key, applied.clone());
			}
			let batch = shared.transport.borrow_mut().fetch(&requests, &shared.scheduler);
			let store = shared.store.clone();
			let done = applied.clone();
			batch.then(move |outcome| {
				apply(&store, &requests, outcome);
				done.resolve(());
			});
			waits.push(applied);
		}
		Promise::wait(&shared.scheduler, waits)
	}

	fn render_region(&self, region: &Step, update: u64, force: bool) -> Result<()> {
		let view = &region.view;
		let span = trace_span!("Rendering region", key = %view.key(), update);
		let _enter = span.enter();

		self.retire(region, update);
		if view.is_destroyed() || view.selected_by() > update {
			trace!("Superseded.");
			return Ok(());
		}
		let parent_node = match &region.parent {
			Some(parent) => match self.node(parent) {
				Some(node) => Some(node),
				None => {
					error!("Parent {:?} has no node.", parent.key());
					return Err(Error::Orphaned {
						key: view.key().to_owned(),
						parent: parent.key().to_owned(),
					});
				}
			},
			None => None,
		};

		let mut visit = Visit {
			force,
			path: Vec::new(),
			rendered: 0,
			failure: None,
		};
		self.visit(region, parent_node.as_ref(), &mut visit);
		info!("Region {:?}: rendered {} view(s).", view.key(), visit.rendered);
		visit.failure.map_or(Ok(()), Err)
	}

	/// Destroys retired and hides deselected instances of the region, deepest first.
	///
	/// This also happens for superseded regions, since retired views are no longer reachable from the tree.
	/// Views a later update selected again stay visible.
	fn retire(&self, step: &Step, update: u64) {
		for child in step.children.iter().filter(|child| !child.asynchronous) {
			self.retire(child, update);
		}
		for view in &step.retired {
			self.destroy(view);
		}
		for view in step.hidden.iter().filter(|view| view.selected_by() <= update) {
			self.hide(view);
		}
	}

	fn visit(&self, step: &Step, parent: Option<&R::Node>, visit: &mut Visit) {
		let view = &step.view;
		let span = trace_span!("Visiting", key = %view.key(), fresh = step.fresh);
		let _enter = span.enter();
		if cfg!(feature = "log-paths") {
			visit.path.push(view.key().to_owned());
		}

		if view.bind_models() > 0 {
			trace!("Bound models.");
		}
		view.refresh_state();

		let previous = self.node(view);
		let must_render = visit.force || view.needs_render();
		let (node, repainted) = match previous.clone() {
			Some(node) if !must_render => (node, false),
			previous => {
				let data = view.models_data();
				let rendered = self.0.renderer.borrow_mut().render(view, &data, previous.as_ref());
				match rendered {
					Ok(node) => {
						if let Some(previous) = previous.filter(|previous| *previous != node) {
							self.0.renderer.borrow_mut().detach(&previous);
						}
						self.0.nodes.borrow_mut().insert(view.id(), node.clone());
						view.mark_rendered();
						visit.rendered += 1;
						(node, true)
					}
					Err(error) => {
						let reason = if cfg!(feature = "log-paths") {
							format!("{} (at {})", error, visit.path.join(" > "))
						} else {
							error.to_string()
						};
						error!("Rendering failed, skipping the subtree: {}", reason);
						visit.failure.get_or_insert(Error::Render {
							key: view.key().to_owned(),
							reason,
						});
						if cfg!(feature = "log-paths") {
							visit.path.pop();
						}
						return;
					}
				}
			}
		};

		// A kept node that went missing from the document counts as hidden, too.
		let shown = {
			let mut renderer = self.0.renderer.borrow_mut();
			let shown = !view.is_visible() || (!repainted && !renderer.is_attached(&node));
			renderer.attach(&node, parent, &step.slot, step.position);
			shown
		};
		view.set_visible(true);
		if repainted {
			view.fire(ViewEvent::Repaint);
		}
		if shown {
			view.fire(ViewEvent::Show);
		}

		for child in step.children.iter().filter(|child| !child.asynchronous) {
			self.visit(child, Some(&node), visit);
		}
		if cfg!(feature = "log-paths") {
			visit.path.pop();
		}
	}
}

/// Marks `view` and its visible descendants as hidden.
///
/// Descendant nodes stay attached to their parent's node, so only the outermost one is detached.
fn conceal(view: &View) {
	view.set_visible(false);
	view.fire(ViewEvent::Hide);
	for (_, slot) in view.children() {
		for child in slot.views().iter().filter(|child| child.is_visible()) {
			conceal(child);
		}
	}
}

/// Puts each response (or the batch's failure) into whatever model instance owns its key by now.
fn apply(store: &ModelStore, requests: &[ModelRequest], outcome: Result<Vec<Value>>) {
	match outcome {
		Ok(responses) => {
			if responses.len() != requests.len() {
				warn!("Expected {} response(s) but got {}.", requests.len(), responses.len());
			}
			for (i, request) in requests.iter().enumerate() {
				store.clear_inflight(&request.key);
				let model = store.instance(&request.name, &request.key, || request.params.clone());
				match responses.get(i).cloned().map(Response::from) {
					Some(Response::Data(data)) => model.set_data(data),
					Some(Response::Error(error)) => model.set_error(error),
					None => model.set_error(format!("no response for `{}`", request.key)),
				}
			}
		}
		Err(error) => {
			warn!("Batch of {} request(s) failed: {}", requests.len(), error);
			for request in requests {
				store.clear_inflight(&request.key);
				let model = store.instance(&request.name, &request.key, || request.params.clone());
				model.set_error(error.to_string());
			}
		}
	}
}

struct Visit {
	force: bool,
	path: Vec<String>,
	rendered: usize,
	failure: Option<Error>,
}

/// One reconciled view with what has to happen around it once its region renders.
struct Step {
	view: View,
	fresh: bool,
	asynchronous: bool,
	parent: Option<View>,
	slot: String,
	position: usize,
	/// Former children to destroy.
	retired: Vec<View>,
	/// Box members to hide.
	hidden: Vec<View>,
	children: Vec<Rc<Step>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SlotKind {
	View,
	Box,
}

struct Planned {
	slot: String,
	kind: SlotKind,
	entries: Vec<PlannedView>,
}

struct PlannedView {
	descriptor: Rc<ViewDescriptor>,
	key: String,
	asynchronous: bool,
	children: Vec<Planned>,
}

fn plan(registry: &Registry, nodes: &[LayoutNode], params: &Params, parent: &str, depth_limit: usize) -> Result<Vec<Planned>> {
	if depth_limit == 0 && !nodes.is_empty() {
		error!("Depth limit reached below {:?}.", parent);
		return Err(Error::DepthLimit { key: parent.to_owned() });
	}

	let mut slots = HashSet::new();
	let mut planned = Vec::with_capacity(nodes.len());
	for node in nodes {
		if !slots.insert(node.slot()) {
			return Err(Error::layout(format!("`{}` has more than one slot named `{}`", parent, node.slot())));
		}
		match node {
			LayoutNode::View(view) => {
				if let Some(entry) = plan_view(registry, view, params, depth_limit)? {
					planned.push(Planned {
						slot: view.slot.clone(),
						kind: SlotKind::View,
						entries: vec![entry],
					});
				}
			}
			LayoutNode::Box(view_box) => planned.push(Planned {
				slot: view_box.name.clone(),
				kind: SlotKind::Box,
				entries: view_box
					.views
					.iter()
					.filter_map(|view| plan_view(registry, view, params, depth_limit).transpose())
					.collect::<Result<_>>()?,
			}),
		}
	}
	Ok(planned)
}

fn plan_view(registry: &Registry, view: &LayoutView, params: &Params, depth_limit: usize) -> Result<Option<PlannedView>> {
	let name = match view.binding.resolve(params) {
		Some(name) => name,
		None => return Ok(None),
	};
	let descriptor = registry.view(&name)?;
	// Instantiation must not fail halfway through reconciliation.
	for (model, _) in &descriptor.models {
		registry.model(model)?;
	}
	let key = registry.view_key_of(&descriptor, params)?;
	let children = plan(registry, &view.children, params, &key, depth_limit - 1)?;
	Ok(Some(PlannedView {
		descriptor,
		key,
		asynchronous: view.asynchronous,
		children,
	}))
}

/// A prepared update. See the [module documentation](self).
#[must_use = "An update does nothing before it is started."]
pub struct Update<T: Transport, R: Renderer> {
	runtime: Runtime<T, R>,
	root: View,
	layout: Layout,
	params: Params,
	force: bool,
}

/// The promises of a started update.
#[derive(Debug, Clone)]
pub struct Completion {
	pub id: u64,
	/// Settles once the synchronous part of the tree is rendered, failing if any of it failed to render.
	pub sync: Promise<()>,
	/// One entry per asynchronous branch, outermost first.
	pub branches: Vec<Branch>,
}

#[derive(Debug, Clone)]
pub struct Branch {
	/// Key of the asynchronous view the branch starts at.
	pub key: String,
	pub promise: Promise<()>,
}

impl Completion {
	/// Settles once every asynchronous branch has.
	#[must_use]
	pub fn asynchronous(&self) -> Promise<()> {
		Promise::wait(self.sync.scheduler(), self.branches.iter().map(|branch| branch.promise.clone()))
	}

	#[must_use]
	pub fn branch(&self, key: &str) -> Option<&Promise<()>> {
		self.branches.iter().find(|branch| branch.key == key).map(|branch| &branch.promise)
	}
}

impl<T: 'static + Transport, R: 'static + Renderer> Update<T, R> {
	/// Renders every visited view, whether or not it changed.
	pub fn forced(mut self, force: bool) -> Self {
		self.force = force;
		self
	}

	/// Plans, reconciles and schedules the update.
	///
	/// # Errors
	///
	/// Planning errors ([`Error::Layout`], [`Error::DepthLimit`], [`Error::Undefined`] and [`Error::KeyResolution`]).
	/// The view tree is left untouched in that case.
	pub fn start(self) -> Result<Completion> {
		let shared = &self.runtime.0;
		let id = shared.updates.get() + 1;
		shared.updates.set(id);
		let span = trace_span!("Update", id, root = %self.root.key());
		let _enter = span.enter();

		if self.root.name() != self.layout.root {
			return Err(Error::layout(format!("the layout is for `{}`, not for `{}`", self.layout.root, self.root.name())));
		}
		if self.root.is_destroyed() {
			return Err(Error::layout(format!("`{}` was destroyed", self.root.key())));
		}
		let planned = plan(&shared.registry, &self.layout.children, &self.params, self.root.key(), shared.config.depth_limit)?;

		let root = self.reconcile(self.root.clone(), false, false, None, String::new(), 0, planned, id)?;

		let (sync, nested) = self.spawn(&root, None, id);
		let mut queue: VecDeque<_> = nested.into_iter().map(|step| (step, sync.clone())).collect();
		let mut branches = Vec::new();
		while let Some((step, after)) = queue.pop_front() {
			let (promise, nested) = self.spawn(&step, Some(after), id);
			queue.extend(nested.into_iter().map(|step| (step, promise.clone())));
			branches.push(Branch {
				key: step.view.key().to_owned(),
				promise,
			});
		}

		info!("Update {} scheduled with {} asynchronous branch(es).", id, branches.len());
		Ok(Completion { id, sync, branches })
	}

	#[allow(clippy::too_many_arguments)]
	fn reconcile(&self, view: View, fresh: bool, asynchronous: bool, parent: Option<View>, slot: String, position: usize, planned: Vec<Planned>, id: u64) -> Result<Rc<Step>> {
		view.select(id);
		let mut live = view.take_children();
		let mut next = Vec::with_capacity(planned.len());
		let mut retired = Vec::new();
		let mut hidden = Vec::new();
		let mut children = Vec::new();

		for Planned { slot: name, kind, entries } in planned {
			let existing = live.iter().position(|(current, _)| *current == name).map(|i| live.remove(i).1);
			match kind {
				SlotKind::View => {
					let entry = match entries.into_iter().next() {
						Some(entry) => entry,
						None => continue,
					};
					let (child, fresh) = match existing {
						Some(Slot::View(current)) if current.key() == entry.key => (current, false),
						other => {
							retired.extend(other.iter().flat_map(Slot::views));
							(self.create(&entry)?, true)
						}
					};
					children.push(self.reconcile(child.clone(), fresh, entry.asynchronous, Some(view.clone()), name.clone(), 0, entry.children, id)?);
					next.push((name, Slot::View(child)));
				}
				SlotKind::Box => {
					let mut view_box = match existing {
						Some(Slot::Box(view_box)) => view_box,
						other => {
							retired.extend(other.iter().flat_map(Slot::views));
							ViewBox::default()
						}
					};
					let mut active: Vec<String> = Vec::new();
					for entry in entries {
						if active.contains(&entry.key) {
							warn!("Box {:?} selects {:?} twice. Ignoring the repetition.", name, entry.key);
							continue;
						}
						let kept = view_box.get(&entry.key).cloned();
						let (child, fresh) = match kept {
							Some(child) => (child, false),
							None => {
								let child = self.create(&entry)?;
								view_box.views.push(child.clone());
								(child, true)
							}
						};
						let position = active.len();
						active.push(entry.key.clone());
						children.push(self.reconcile(child, fresh, entry.asynchronous, Some(view.clone()), name.clone(), position, entry.children, id)?);
					}
					hidden.extend(view_box.views.iter().filter(|view| view.is_visible() && !active.iter().any(|key| key == view.key())).cloned());
					view_box.active = active;
					next.push((name, Slot::Box(view_box)));
				}
			}
		}
		for (_, slot) in live {
			retired.extend(slot.views());
		}
		view.set_children(next);

		Ok(Rc::new(Step {
			view,
			fresh,
			asynchronous,
			parent,
			slot,
			position,
			retired,
			hidden,
			children,
		}))
	}

	fn create(&self, entry: &PlannedView) -> Result<View> {
		View::instantiate(&self.runtime.0.store, entry.descriptor.clone(), entry.key.clone(), self.params.clone())
	}

	/// Schedules the region starting at `root`, after `after` if given. Returns the region's promise and its nested branches.
	fn spawn(&self, root: &Rc<Step>, after: Option<Promise<()>>, id: u64) -> (Promise<()>, Vec<Rc<Step>>) {
		let mut bindings = Vec::new();
		let mut nested = Vec::new();
		collect(root, &mut bindings, &mut nested);
		trace!(key = %root.view.key(), bindings = bindings.len(), branches = nested.len(), "Spawning region.");

		let scheduler = &self.runtime.0.scheduler;
		let fetched = self.runtime.fetch(bindings);
		let gate = match after {
			Some(after) => Promise::wait(scheduler, vec![fetched, after]),
			None => fetched,
		};

		let done = Promise::pending(scheduler);
		let runtime = self.runtime.clone();
		let region = root.clone();
		let settle = done.clone();
		let force = self.force;
		gate.then(move |_| {
			settle.settle(runtime.render_region(&region, id, force));
		});
		(done, nested)
	}
}

/// Gathers the model bindings of a region and the roots of the branches nested in it.
fn collect(step: &Rc<Step>, bindings: &mut Vec<ModelBinding>, nested: &mut Vec<Rc<Step>>) {
	bindings.extend(step.view.bindings().iter().cloned());
	for child in &step.children {
		if child.asynchronous {
			nested.push(child.clone());
		} else {
			collect(child, bindings, nested);
		}
	}
}
