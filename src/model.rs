//! The model store: one live instance per model key.

use crate::{
	error::Result,
	key,
	promise::Promise,
	ref_count::{CountError, RefCounts},
	registry::Registry,
	view::{View, ViewId, ViewInner},
};
use core::{
	cell::{Cell, RefCell},
	fmt::{self, Debug, Formatter},
};
use hashbrown::HashMap;
use serde_json::Value;
use std::rc::{Rc, Weak};
use tracing::{error, instrument, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
	Empty,
	Loading,
	Ok,
	Error,
}

struct ModelInner {
	name: String,
	key: String,
	params: Vec<(String, Value)>,
	status: ModelStatus,
	stale: bool,
	data: Option<Value>,
	error: Option<Value>,
	generation: u64,
	generations: Rc<Cell<u64>>,
	subscribers: HashMap<ViewId, Weak<ViewInner>>,
	destroyed: bool,
}

/// Shared handle to a model instance. Equality is identity.
#[derive(Clone)]
pub struct Model(Rc<RefCell<ModelInner>>);

impl PartialEq for Model {
	fn eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.0, &other.0)
	}
}
impl Eq for Model {}

impl Debug for Model {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let inner = self.0.borrow();
		f.debug_struct("Model")
			.field("key", &inner.key)
			.field("status", &inner.status)
			.field("stale", &inner.stale)
			.field("generation", &inner.generation)
			.field("subscribers", &inner.subscribers.len())
			.finish()
	}
}

impl Model {
	fn new(name: String, key: String, params: Vec<(String, Value)>, generations: Rc<Cell<u64>>) -> Self {
		Self(Rc::new(RefCell::new(ModelInner {
			name,
			key,
			params,
			status: ModelStatus::Empty,
			stale: false,
			data: None,
			error: None,
			generation: 0,
			generations,
			subscribers: HashMap::new(),
			destroyed: false,
		})))
	}

	#[must_use]
	pub fn name(&self) -> String {
		self.0.borrow().name.clone()
	}

	#[must_use]
	pub fn key(&self) -> String {
		self.0.borrow().key.clone()
	}

	/// The identifying parameters, defaults included.
	#[must_use]
	pub fn params(&self) -> Vec<(String, Value)> {
		self.0.borrow().params.clone()
	}

	#[must_use]
	pub fn status(&self) -> ModelStatus {
		self.0.borrow().status
	}

	#[must_use]
	pub fn is_ok(&self) -> bool {
		self.status() == ModelStatus::Ok
	}

	/// OK and not invalidated since the data was set.
	#[must_use]
	pub fn is_valid(&self) -> bool {
		let inner = self.0.borrow();
		inner.status == ModelStatus::Ok && !inner.stale
	}

	#[must_use]
	pub fn is_stale(&self) -> bool {
		self.0.borrow().stale
	}

	#[must_use]
	pub fn is_destroyed(&self) -> bool {
		self.0.borrow().destroyed
	}

	/// Store-wide unique per change, so a recreated model never repeats an earlier generation.
	#[must_use]
	pub fn generation(&self) -> u64 {
		self.0.borrow().generation
	}

	/// The last known payload. Kept through invalidation and failed refetches.
	#[must_use]
	pub fn data(&self) -> Option<Value> {
		self.0.borrow().data.clone()
	}

	#[must_use]
	pub fn error(&self) -> Option<Value> {
		self.0.borrow().error.clone()
	}

	pub fn set_data(&self, data: impl Into<Value>) {
		let data = data.into();
		self.change(|inner| {
			if cfg!(feature = "dangerous-logging") {
				trace!(key = %inner.key, data = %data, "Setting data.");
			} else {
				trace!(key = %inner.key, "Setting data.");
			}
			inner.status = ModelStatus::Ok;
			inner.stale = false;
			inner.data = Some(data);
			inner.error = None;
		});
	}

	pub fn set_error(&self, error: impl Into<Value>) {
		let error = error.into();
		self.change(|inner| {
			if cfg!(feature = "dangerous-logging") {
				trace!(key = %inner.key, error = %error, "Setting error.");
			} else {
				trace!(key = %inner.key, "Setting error.");
			}
			inner.status = ModelStatus::Error;
			inner.stale = false;
			inner.error = Some(error);
		});
	}

	/// Marks the data stale without discarding it.
	pub fn invalidate(&self) {
		self.change(|inner| {
			trace!(key = %inner.key, "Invalidating.");
			inner.stale = true;
		});
	}

	pub(crate) fn mark_loading(&self) {
		self.0.borrow_mut().status = ModelStatus::Loading;
	}

	/// Bumps the generation and then notifies every subscriber exactly once, after the borrow is released.
	fn change(&self, f: impl FnOnce(&mut ModelInner)) {
		let subscribers: Vec<_> = {
			let mut inner = self.0.borrow_mut();
			f(&mut inner);
			let generation = inner.generations.get() + 1;
			inner.generations.set(generation);
			inner.generation = generation;
			inner.subscribers.retain(|_, view| view.strong_count() > 0);
			inner.subscribers.values().filter_map(Weak::upgrade).collect()
		};
		for view in subscribers {
			View::from_inner(view).invalidate();
		}
	}

	/// Subscribes `view` to changes. Returns `false` if it already was subscribed.
	pub fn subscribe(&self, view: &View) -> bool {
		let mut inner = self.0.borrow_mut();
		if inner.subscribers.contains_key(&view.id()) {
			return false;
		}
		inner.subscribers.insert(view.id(), view.downgrade());
		true
	}

	pub fn unsubscribe(&self, view: ViewId) -> bool {
		self.0.borrow_mut().subscribers.remove(&view).is_some()
	}

	#[must_use]
	pub fn is_subscribed(&self, view: ViewId) -> bool {
		self.0.borrow().subscribers.contains_key(&view)
	}

	#[must_use]
	pub fn subscriber_count(&self) -> usize {
		self.0.borrow().subscribers.len()
	}
}

struct StoreInner {
	registry: Registry,
	models: HashMap<String, Model>,
	generations: Rc<Cell<u64>>,
	inflight: HashMap<String, Promise<()>>,
	references: RefCounts<String>,
}

/// Shared handle to the model instances, indexed by key. Clones refer to the same store.
#[derive(Clone)]
pub struct ModelStore(Rc<RefCell<StoreInner>>);

impl Debug for ModelStore {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let inner = self.0.borrow();
		f.debug_struct("ModelStore")
			.field("models", &inner.models.keys().collect::<Vec<_>>())
			.field("inflight", &inner.inflight.keys().collect::<Vec<_>>())
			.finish()
	}
}

impl ModelStore {
	#[must_use]
	pub fn new(registry: Registry) -> Self {
		Self(Rc::new(RefCell::new(StoreInner {
			registry,
			models: HashMap::new(),
			generations: Rc::new(Cell::new(0)),
			inflight: HashMap::new(),
			references: RefCounts::new(),
		})))
	}

	#[must_use]
	pub fn registry(&self) -> Registry {
		self.0.borrow().registry.clone()
	}

	/// Returns the instance for `name` and `params`, creating it (EMPTY) if needed.
	///
	/// # Errors
	///
	/// [`Error::Undefined`](`crate::Error::Undefined`) if the model isn't defined.
	pub fn get(&self, name: &str, params: &crate::params::Params) -> Result<Model> {
		let info = self.registry().model(name)?;
		Ok(self.instance(name, &key::model_key(&info, params), || key::model_params(&info, params)))
	}

	pub(crate) fn instance(&self, name: &str, key: &str, params: impl FnOnce() -> Vec<(String, Value)>) -> Model {
		let mut inner = self.0.borrow_mut();
		if let Some(model) = inner.models.get(key) {
			return model.clone();
		}
		trace!(key, "Creating model instance.");
		let model = Model::new(name.to_owned(), key.to_owned(), params(), inner.generations.clone());
		inner.models.insert(key.to_owned(), model.clone());
		model
	}

	#[must_use]
	pub fn lookup(&self, key: &str) -> Option<Model> {
		self.0.borrow().models.get(key).cloned()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.0.borrow().models.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.borrow().models.is_empty()
	}

	/// Removes `model` from the index. The next [`get`](`ModelStore::get`) for its key creates a fresh EMPTY instance.
	///
	/// Views that depend on it are not touched. They notice the new instance on their next update.
	#[instrument(skip(self))]
	pub fn destroy(&self, model: &Model) -> bool {
		let key = model.key();
		let removed = {
			let mut inner = self.0.borrow_mut();
			let current = inner.models.get(&key).map_or(false, |current| current == model);
			current && inner.models.remove(&key).is_some()
		};
		if !removed {
			warn!("Tried to destroy a model that isn't in the store.");
		}
		let mut inner = model.0.borrow_mut();
		inner.destroyed = true;
		inner.subscribers.clear();
		removed
	}

	/// Drops every instance and pending request bookkeeping. Definitions are unaffected.
	pub fn clear(&self) {
		let mut inner = self.0.borrow_mut();
		inner.models.clear();
		inner.inflight.clear();
		inner.references = RefCounts::new();
	}

	#[must_use]
	pub fn inflight(&self, key: &str) -> Option<Promise<()>> {
		self.0.borrow().inflight.get(key).cloned()
	}

	pub(crate) fn set_inflight(&self, key: &str, done: Promise<()>) {
		self.0.borrow_mut().inflight.insert(key.to_owned(), done);
	}

	pub(crate) fn clear_inflight(&self, key: &str) {
		self.0.borrow_mut().inflight.remove(key);
	}

	pub(crate) fn retain(&self, key: &str) {
		if let Err(error) = self.0.borrow_mut().references.retain(key.to_owned()) {
			error!("Could not retain {:?}: {:?}", key, error);
		}
	}

	pub(crate) fn release(&self, key: &str) {
		match self.0.borrow_mut().references.release(key) {
			Ok(_) => (),
			Err(CountError::Unknown) => warn!("Released {:?}, which was never retained.", key),
			Err(error) => error!("Could not release {:?}: {:?}", key, error),
		}
	}

	/// How many live views currently reference `key`.
	#[must_use]
	pub fn references(&self, key: &str) -> u32 {
		self.0.borrow().references.count(key).copied().unwrap_or(0)
	}

	/// Destroys every model that was referenced by views at some point but no longer is.
	///
	/// Models that were never referenced by a view, for example ones filled in ahead of time, are kept.
	#[instrument(skip(self))]
	pub fn sweep(&self) -> usize {
		let keys: Vec<String> = self.0.borrow_mut().references.drain_unreferenced().collect();
		let mut count = 0;
		for key in keys {
			if let Some(model) = self.lookup(&key) {
				if self.destroy(&model) {
					count += 1;
				}
			}
		}
		trace!("Swept {} model(s).", count);
		count
	}
}
