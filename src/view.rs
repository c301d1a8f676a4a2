//! Live view instances and the slots that hold their children.

use crate::{
	error::{Error, Result},
	key,
	model::{Model, ModelStatus, ModelStore},
	params::Params,
	registry::{Dependency, ViewDescriptor, ViewEvent},
	render::{ModelData, ModelsData},
};
use core::{
	cell::{Cell, RefCell},
	fmt::{self, Debug, Formatter},
	sync::atomic::{AtomicU64, Ordering},
};
use serde_json::Value;
use std::rc::{Rc, Weak};
use tracing::{instrument, trace, trace_span};

/// Process-unique identity of a view instance, independent of its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(u64);

impl ViewId {
	fn next() -> Self {
		static NEXT: AtomicU64 = AtomicU64::new(1);
		Self(NEXT.fetch_add(1, Ordering::Relaxed))
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
	Initialized,
	/// Some required model isn't OK yet, and none failed.
	Loading,
	Ok,
	/// Some required model is in ERROR.
	Error,
}

/// One declared model of a view, resolved against the view's parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelBinding {
	pub name: String,
	pub key: String,
	pub params: Vec<(String, Value)>,
	pub dependency: Dependency,
}

pub(crate) struct ViewInner {
	id: ViewId,
	key: String,
	descriptor: Rc<ViewDescriptor>,
	params: Params,
	bindings: Vec<ModelBinding>,
	store: ModelStore,
	state: Cell<ViewState>,
	visible: Cell<bool>,
	destroyed: Cell<bool>,
	stale: Cell<bool>,
	invalidations: Cell<u32>,
	renders: Cell<u32>,
	/// Id of the latest update that selected this view.
	selected: Cell<u64>,
	/// Model generations at the last render, [`None`] before the first one.
	rendered: RefCell<Option<Vec<u64>>>,
	children: RefCell<Vec<(String, Slot)>>,
}

/// Shared handle to a view instance. Equality is identity.
#[derive(Clone)]
pub struct View(Rc<ViewInner>);

impl PartialEq for View {
	fn eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.0, &other.0)
	}
}
impl Eq for View {}

impl Debug for View {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("View")
			.field("id", &self.0.id)
			.field("key", &self.0.key)
			.field("state", &self.0.state.get())
			.field("visible", &self.0.visible.get())
			.field("stale", &self.0.stale.get())
			.field("children", &self.0.children.borrow())
			.finish()
	}
}

/// A named child position of a view.
#[derive(Debug, Clone)]
pub enum Slot {
	View(View),
	/// Keeps every instance it has shown, showing only the currently selected ones.
	Box(ViewBox),
}

impl Slot {
	/// Every instance held, visible or not.
	#[must_use]
	pub fn views(&self) -> Vec<View> {
		match self {
			Self::View(view) => vec![view.clone()],
			Self::Box(view_box) => view_box.views.clone(),
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct ViewBox {
	pub(crate) views: Vec<View>,
	pub(crate) active: Vec<String>,
}

impl ViewBox {
	#[must_use]
	pub fn views(&self) -> &[View] {
		&self.views
	}

	/// Keys selected by the latest update, in layout order.
	#[must_use]
	pub fn active(&self) -> &[String] {
		&self.active
	}

	#[must_use]
	pub fn get(&self, key: &str) -> Option<&View> {
		self.views.iter().find(|view| view.key() == key)
	}
}

impl View {
	/// Creates an instance of the view `name` and fires its [`ViewEvent::Init`] handlers.
	///
	/// `params` is kept in full even if the key only uses part of it.
	///
	/// # Errors
	///
	/// [`Error::Undefined`] for unknown views or models, [`Error::KeyResolution`] if no parameter rule matches.
	pub fn create(store: &ModelStore, name: &str, params: Params) -> Result<Self> {
		let registry = store.registry();
		let descriptor = registry.view(name)?;
		let key = registry.view_key_of(&descriptor, &params)?;
		Self::instantiate(store, descriptor, key, params)
	}

	#[instrument(skip(store, descriptor, params))]
	pub(crate) fn instantiate(store: &ModelStore, descriptor: Rc<ViewDescriptor>, key: String, params: Params) -> Result<Self> {
		let registry = store.registry();
		let bindings = descriptor
			.models
			.iter()
			.map(|(name, dependency)| {
				let info = registry.model(name)?;
				Ok(ModelBinding {
					name: name.clone(),
					key: key::model_key(&info, &params),
					params: key::model_params(&info, &params),
					dependency: *dependency,
				})
			})
			.collect::<Result<Vec<_>>>()?;

		for binding in &bindings {
			store.retain(&binding.key);
		}

		let view = Self(Rc::new(ViewInner {
			id: ViewId::next(),
			key,
			descriptor,
			params,
			bindings,
			store: store.clone(),
			state: Cell::new(ViewState::Initialized),
			visible: Cell::new(false),
			destroyed: Cell::new(false),
			stale: Cell::new(false),
			invalidations: Cell::new(0),
			renders: Cell::new(0),
			selected: Cell::new(0),
			rendered: RefCell::new(None),
			children: RefCell::new(Vec::new()),
		}));
		trace!(id = ?view.id(), "Created view.");
		view.fire(ViewEvent::Init);
		Ok(view)
	}

	pub(crate) fn from_inner(inner: Rc<ViewInner>) -> Self {
		Self(inner)
	}

	pub(crate) fn downgrade(&self) -> Weak<ViewInner> {
		Rc::downgrade(&self.0)
	}

	#[must_use]
	pub fn id(&self) -> ViewId {
		self.0.id
	}

	#[must_use]
	pub fn key(&self) -> &str {
		&self.0.key
	}

	#[must_use]
	pub fn name(&self) -> &str {
		&self.0.descriptor.name
	}

	#[must_use]
	pub fn descriptor(&self) -> &Rc<ViewDescriptor> {
		&self.0.descriptor
	}

	/// The full parameters the view was created with.
	#[must_use]
	pub fn params(&self) -> &Params {
		&self.0.params
	}

	#[must_use]
	pub fn bindings(&self) -> &[ModelBinding] {
		&self.0.bindings
	}

	#[must_use]
	pub fn state(&self) -> ViewState {
		self.0.state.get()
	}

	#[must_use]
	pub fn is_visible(&self) -> bool {
		self.0.visible.get()
	}

	#[must_use]
	pub fn is_destroyed(&self) -> bool {
		self.0.destroyed.get()
	}

	/// Whether a model change arrived since the last render.
	#[must_use]
	pub fn is_stale(&self) -> bool {
		self.0.stale.get()
	}

	/// How often a subscribed model notified this view.
	#[must_use]
	pub fn invalidations(&self) -> u32 {
		self.0.invalidations.get()
	}

	#[must_use]
	pub fn renders(&self) -> u32 {
		self.0.renders.get()
	}

	/// The store's current instance of the model `name`, as seen through this view's parameters.
	#[must_use]
	pub fn model(&self, name: &str) -> Option<Model> {
		let binding = self.0.bindings.iter().find(|binding| binding.name == name)?;
		Some(self.instance(binding))
	}

	#[must_use]
	pub fn model_data(&self, name: &str) -> Option<Value> {
		self.model(name).and_then(|model| model.data())
	}

	/// State, data and error of every declared model, in declaration order.
	#[must_use]
	pub fn models_data(&self) -> ModelsData {
		self.0
			.bindings
			.iter()
			.map(|binding| {
				let model = self.0.store.lookup(&binding.key);
				(
					binding.name.clone(),
					ModelData {
						status: model.as_ref().map_or(ModelStatus::Empty, Model::status),
						data: model.as_ref().and_then(Model::data),
						error: model.as_ref().and_then(Model::error),
						dependency: binding.dependency,
					},
				)
			})
			.collect()
	}

	/// Whether every *required* model is OK. Optional models never count.
	#[must_use]
	pub fn is_models_valid(&self) -> bool {
		self.required().all(|binding| self.status_of(binding) == ModelStatus::Ok)
	}

	/// Rendered, not invalidated since, and backed by valid required models.
	#[must_use]
	pub fn is_valid(&self) -> bool {
		self.is_models_valid()
			&& !self.needs_render()
			&& self.required().all(|binding| self.0.store.lookup(&binding.key).map_or(false, |model| model.is_valid()))
	}

	/// Whether the view was never rendered, was invalidated, or any of its models changed generation since.
	#[must_use]
	pub fn needs_render(&self) -> bool {
		match &*self.0.rendered.borrow() {
			None => true,
			Some(generations) => self.0.stale.get() || *generations != self.generations(),
		}
	}

	/// Marks the view for redraw. Called by subscribed models on every change, also while hidden.
	pub fn invalidate(&self) {
		if self.is_destroyed() {
			return;
		}
		trace!(key = %self.0.key, "Invalidated.");
		self.0.stale.set(true);
		self.0.invalidations.set(self.0.invalidations.get() + 1);
	}

	/// Snapshot of the child slots.
	#[must_use]
	pub fn children(&self) -> Vec<(String, Slot)> {
		self.0.children.borrow().clone()
	}

	#[must_use]
	pub fn child(&self, slot: &str) -> Option<Slot> {
		self.0.children.borrow().iter().find(|(name, _)| name == slot).map(|(_, slot)| slot.clone())
	}

	/// Searches the subtree, hidden instances included, for a view with `key`.
	#[must_use]
	pub fn find(&self, key: &str) -> Option<View> {
		if self.key() == key {
			return Some(self.clone());
		}
		self.children().iter().flat_map(|(_, slot)| slot.views()).find_map(|view| view.find(key))
	}

	/// Calls a method from the view's flattened method table.
	///
	/// # Errors
	///
	/// [`Error::UnknownMethod`].
	pub fn call(&self, method: &str) -> Result<()> {
		let f = self.0.descriptor.method(method).cloned().ok_or_else(|| Error::UnknownMethod {
			key: self.0.key.clone(),
			method: method.to_owned(),
		})?;
		f(self);
		Ok(())
	}

	pub(crate) fn fire(&self, event: ViewEvent) {
		let handlers = self.0.descriptor.handlers(event);
		if handlers.is_empty() {
			return;
		}
		let span = trace_span!("Firing", ?event, key = %self.0.key, handlers = handlers.len());
		let _enter = span.enter();
		for handler in handlers {
			handler(self);
		}
	}

	/// Recomputes the view state from the store as it is right now.
	pub(crate) fn refresh_state(&self) -> ViewState {
		let mut state = ViewState::Ok;
		for binding in self.required() {
			match self.status_of(binding) {
				ModelStatus::Ok => (),
				ModelStatus::Error => {
					state = ViewState::Error;
					break;
				}
				ModelStatus::Empty | ModelStatus::Loading => state = ViewState::Loading,
			}
		}
		self.0.state.set(state);
		state
	}

	/// Subscribes to the current instance of every model. Already subscribed pairs are left alone.
	pub(crate) fn bind_models(&self) -> usize {
		self.0.bindings.iter().filter(|binding| self.instance(binding).subscribe(self)).count()
	}

	pub(crate) fn unbind_models(&self) {
		for binding in &self.0.bindings {
			if let Some(model) = self.0.store.lookup(&binding.key) {
				model.unsubscribe(self.id());
			}
		}
	}

	pub(crate) fn mark_rendered(&self) {
		*self.0.rendered.borrow_mut() = Some(self.generations());
		self.0.stale.set(false);
		self.0.renders.set(self.0.renders.get() + 1);
	}

	pub(crate) fn select(&self, update: u64) {
		self.0.selected.set(self.0.selected.get().max(update));
	}

	pub(crate) fn selected_by(&self) -> u64 {
		self.0.selected.get()
	}

	pub(crate) fn set_visible(&self, visible: bool) {
		self.0.visible.set(visible);
	}

	pub(crate) fn take_children(&self) -> Vec<(String, Slot)> {
		core::mem::take(&mut *self.0.children.borrow_mut())
	}

	pub(crate) fn set_children(&self, children: Vec<(String, Slot)>) {
		*self.0.children.borrow_mut() = children;
	}

	/// Unsubscribes and releases model references. Children have to be destroyed first.
	pub(crate) fn mark_destroyed(&self) {
		if self.0.destroyed.replace(true) {
			return;
		}
		self.unbind_models();
		for binding in &self.0.bindings {
			self.0.store.release(&binding.key);
		}
		self.0.visible.set(false);
	}

	fn instance(&self, binding: &ModelBinding) -> Model {
		self.0.store.instance(&binding.name, &binding.key, || binding.params.clone())
	}

	fn status_of(&self, binding: &ModelBinding) -> ModelStatus {
		self.0.store.lookup(&binding.key).map_or(ModelStatus::Empty, |model| model.status())
	}

	fn required(&self) -> impl Iterator<Item = &ModelBinding> {
		self.0.bindings.iter().filter(|binding| binding.dependency == Dependency::Required)
	}

	fn generations(&self) -> Vec<u64> {
		self.0.bindings.iter().map(|binding| self.0.store.lookup(&binding.key).map_or(0, |model| model.generation())).collect()
	}
}
