//! Named model and view definitions.
//!
//! View definitions are flattened when they are registered: the inheritance chain, string method references in
//! event bindings and parameter rules are all resolved once into an immutable [`ViewDescriptor`].

use crate::{
	error::{Error, Result},
	key::{self, KeyModifiers, ObjectRule, ParamRule},
	params::Params,
	view::View,
};
use core::{
	cell::RefCell,
	fmt::{self, Debug, Formatter},
};
use hashbrown::{hash_map::Entry, HashMap};
use serde_json::Value;
use std::rc::Rc;
use tracing::{instrument, trace};

/// A method or event handler, called with the view instance it is bound to.
pub type Method = Rc<dyn Fn(&View)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewEvent {
	/// Fired once, right after construction.
	Init,
	/// Fired each time the view goes from detached to attached.
	Show,
	Hide,
	/// Fired after each render of the view.
	Repaint,
	Destroy,
}

/// Whether a failing model makes the view invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
	Required,
	Optional,
}

#[derive(Clone)]
pub enum Handler {
	/// Resolved against the (inherited) method table when the view is defined.
	Method(String),
	Function(Method),
}

impl Debug for Handler {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Self::Method(name) => f.debug_tuple("Method").field(name).finish(),
			Self::Function(_) => f.write_str("Function(..)"),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelDefinition {
	pub name: String,
	/// Declared parameters in key order, each with an optional default.
	pub params: Vec<(String, Option<Value>)>,
}

impl ModelDefinition {
	#[must_use]
	pub fn new(name: impl Into<String>) -> Self {
		Self { name: name.into(), params: Vec::new() }
	}

	#[must_use]
	pub fn param(mut self, name: impl Into<String>) -> Self {
		self.params.push((name.into(), None));
		self
	}

	#[must_use]
	pub fn param_default(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
		let default = default.into();
		self.params.push((name.into(), if default.is_null() { None } else { Some(default) }));
		self
	}
}

/// Registered form of a [`ModelDefinition`].
pub type ModelInfo = ModelDefinition;

#[derive(Debug, Clone)]
pub enum Parent {
	Name(String),
	Descriptor(Rc<ViewDescriptor>),
}

#[derive(Clone)]
pub struct ViewDefinition {
	name: String,
	parent: Option<Parent>,
	models: Vec<(String, Dependency)>,
	params: Option<ParamRule>,
	params_plus: Option<Vec<(String, Value)>>,
	params_minus: Option<Vec<String>>,
	events: Vec<(ViewEvent, Handler)>,
	methods: Vec<(String, Method)>,
}

impl Debug for ViewDefinition {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("ViewDefinition")
			.field("name", &self.name)
			.field("parent", &self.parent)
			.field("models", &self.models)
			.field("params", &self.params)
			.field("params_plus", &self.params_plus)
			.field("params_minus", &self.params_minus)
			.field("events", &self.events)
			.field("methods", &self.methods.iter().map(|(name, _)| name).collect::<Vec<_>>())
			.finish()
	}
}

impl Debug for ViewDescriptor {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("ViewDescriptor")
			.field("name", &self.name)
			.field("parent", &self.parent)
			.field("models", &self.models)
			.field("params", &self.params)
			.field("modifiers", &self.modifiers)
			.field("events", &self.events.iter().map(|(event, handlers)| (event, handlers.len())).collect::<Vec<_>>())
			.field("methods", &self.methods.keys().collect::<Vec<_>>())
			.finish()
	}
}

impl ViewDefinition {
	#[must_use]
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			parent: None,
			models: Vec::new(),
			params: None,
			params_plus: None,
			params_minus: None,
			events: Vec::new(),
			methods: Vec::new(),
		}
	}

	#[must_use]
	pub fn extends(mut self, parent: impl Into<String>) -> Self {
		self.parent = Some(Parent::Name(parent.into()));
		self
	}

	#[must_use]
	pub fn extends_descriptor(mut self, parent: &Rc<ViewDescriptor>) -> Self {
		self.parent = Some(Parent::Descriptor(parent.clone()));
		self
	}

	/// Adds a required model.
	#[must_use]
	pub fn model(self, name: impl Into<String>) -> Self {
		self.dependency(name, Dependency::Required)
	}

	#[must_use]
	pub fn optional_model(self, name: impl Into<String>) -> Self {
		self.dependency(name, Dependency::Optional)
	}

	#[must_use]
	pub fn dependency(mut self, name: impl Into<String>, dependency: Dependency) -> Self {
		self.models.push((name.into(), dependency));
		self
	}

	/// Adds required models.
	#[must_use]
	pub fn models<I: IntoIterator>(self, names: I) -> Self
	where
		I::Item: Into<String>,
	{
		names.into_iter().fold(self, Self::model)
	}

	#[must_use]
	pub fn params(mut self, rule: ParamRule) -> Self {
		self.params = Some(rule);
		self
	}

	#[must_use]
	pub fn params_object(self, rule: ObjectRule) -> Self {
		self.params(ParamRule::Object(rule))
	}

	#[must_use]
	pub fn params_variants(self, rules: impl IntoIterator<Item = ObjectRule>) -> Self {
		self.params(ParamRule::Variants(rules.into_iter().collect()))
	}

	/// `params+`: fixed pairs appended to the model-derived key.
	#[must_use]
	pub fn params_plus<K: Into<String>, V: Into<Value>>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self {
		self.params_plus = Some(pairs.into_iter().map(|(name, value)| (name.into(), value.into())).collect());
		self
	}

	/// `params-`: names removed from the model-derived key.
	#[must_use]
	pub fn params_minus<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
		self.params_minus = Some(names.into_iter().map(Into::into).collect());
		self
	}

	#[must_use]
	pub fn on(mut self, event: ViewEvent, handler: Handler) -> Self {
		self.events.push((event, handler));
		self
	}

	#[must_use]
	pub fn on_method(self, event: ViewEvent, method: impl Into<String>) -> Self {
		self.on(event, Handler::Method(method.into()))
	}

	#[must_use]
	pub fn on_fn(self, event: ViewEvent, f: impl 'static + Fn(&View)) -> Self {
		self.on(event, Handler::Function(Rc::new(f)))
	}

	#[must_use]
	pub fn method(mut self, name: impl Into<String>, f: impl 'static + Fn(&View)) -> Self {
		let method: Method = Rc::new(f);
		self.methods.push((name.into(), method));
		self
	}
}

/// A flattened, immutable view definition.
pub struct ViewDescriptor {
	pub name: String,
	/// Name of the direct parent, kept for introspection only.
	pub parent: Option<String>,
	pub models: Vec<(String, Dependency)>,
	pub params: ParamRule,
	pub modifiers: KeyModifiers,
	pub events: HashMap<ViewEvent, Vec<Method>>,
	pub methods: HashMap<String, Method>,
}

impl ViewDescriptor {
	#[must_use]
	pub fn method(&self, name: &str) -> Option<&Method> {
		self.methods.get(name)
	}

	#[must_use]
	pub fn handlers(&self, event: ViewEvent) -> &[Method] {
		self.events.get(&event).map_or(&[][..], Vec::as_slice)
	}

	#[must_use]
	pub fn dependency(&self, model: &str) -> Option<Dependency> {
		self.models.iter().find(|(name, _)| name == model).map(|&(_, dependency)| dependency)
	}

	#[instrument(skip(definition, parent), fields(view = %definition.name))]
	fn flatten(definition: ViewDefinition, parent: Option<Rc<ViewDescriptor>>) -> Result<Self> {
		let ViewDefinition {
			name,
			parent: _,
			models,
			params,
			params_plus,
			params_minus,
			events,
			methods,
		} = definition;

		let own_modifiers = KeyModifiers {
			append: params_plus,
			remove: params_minus,
		};
		if params.is_some() && !own_modifiers.is_empty() {
			return Err(Error::invalid_definition(&name, "`params` can't be combined with `params+` or `params-`"));
		}
		if params.is_none() && !own_modifiers.is_empty() {
			if let Some(parent) = parent.as_ref().filter(|parent| !matches!(parent.params, ParamRule::Models)) {
				return Err(Error::invalid_definition(&name, format!("`params+` and `params-` can't adjust the `params` rule inherited from `{}`", parent.name)));
			}
		}

		let (mut merged_models, mut merged_methods, mut merged_events, inherited_params, inherited_modifiers) = match &parent {
			Some(parent) => (parent.models.clone(), parent.methods.clone(), parent.events.clone(), parent.params.clone(), parent.modifiers.clone()),
			None => Default::default(),
		};

		for (model, dependency) in models {
			match merged_models.iter_mut().find(|(name, _)| *name == model) {
				Some(existing) => existing.1 = dependency,
				None => merged_models.push((model, dependency)),
			}
		}

		merged_methods.extend(methods);

		let mut own_events: HashMap<ViewEvent, Vec<Method>> = HashMap::new();
		for (event, handler) in events {
			let method = match handler {
				Handler::Function(f) => f,
				Handler::Method(method) => merged_methods
					.get(&method)
					.cloned()
					.ok_or_else(|| Error::invalid_definition(&name, format!("event handler refers to unknown method `{}`", method)))?,
			};
			own_events.entry(event).or_default().push(method);
		}
		merged_events.extend(own_events);

		let (params, modifiers) = if params.is_none() && own_modifiers.is_empty() {
			(inherited_params, inherited_modifiers)
		} else {
			(params.unwrap_or_default(), own_modifiers)
		};

		trace!("Flattened {} model(s), {} method(s).", merged_models.len(), merged_methods.len());
		Ok(Self {
			name,
			parent: parent.map(|parent| parent.name.clone()),
			models: merged_models,
			params,
			modifiers,
			events: merged_events,
			methods: merged_methods,
		})
	}
}

#[derive(Default)]
struct Definitions {
	views: HashMap<String, Rc<ViewDescriptor>>,
	models: HashMap<String, Rc<ModelInfo>>,
}

/// Shared handle to the named view and model definitions.
///
/// Clones refer to the same definitions. [`clear`](`Registry::clear`) resets everything, which is required between
/// independent test runs or reconfigurations.
#[derive(Clone, Default)]
pub struct Registry(Rc<RefCell<Definitions>>);

impl Debug for Registry {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let definitions = self.0.borrow();
		f.debug_struct("Registry")
			.field("views", &definitions.views.keys().collect::<Vec<_>>())
			.field("models", &definitions.models.keys().collect::<Vec<_>>())
			.finish()
	}
}

impl Registry {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// # Errors
	///
	/// [`Error::InvalidDefinition`] if a model with the same name is already defined.
	#[instrument(skip(self, definition), fields(model = %definition.name))]
	pub fn define_model(&self, definition: ModelDefinition) -> Result<Rc<ModelInfo>> {
		match self.0.borrow_mut().models.entry(definition.name.clone()) {
			Entry::Occupied(_) => Err(Error::invalid_definition(&definition.name, "model is already defined")),
			Entry::Vacant(vacant) => Ok(vacant.insert(Rc::new(definition)).clone()),
		}
	}

	/// Flattens and registers a view definition.
	///
	/// # Errors
	///
	/// [`Error::InvalidDefinition`] if the name is taken, the parent is unknown, an event names an unknown method,
	/// or `params` is combined with `params+`/`params-`. A failed definition leaves the registry unchanged.
	#[instrument(skip(self, definition), fields(view = %definition.name))]
	pub fn define_view(&self, definition: ViewDefinition) -> Result<Rc<ViewDescriptor>> {
		if self.0.borrow().views.contains_key(&definition.name) {
			return Err(Error::invalid_definition(&definition.name, "view is already defined"));
		}

		let parent = match &definition.parent {
			None => None,
			Some(Parent::Descriptor(parent)) => Some(parent.clone()),
			Some(Parent::Name(parent)) => Some(
				self.0
					.borrow()
					.views
					.get(parent)
					.cloned()
					.ok_or_else(|| Error::invalid_definition(&definition.name, format!("parent view `{}` is not defined", parent)))?,
			),
		};

		let descriptor = Rc::new(ViewDescriptor::flatten(definition, parent)?);
		self.0.borrow_mut().views.insert(descriptor.name.clone(), descriptor.clone());
		Ok(descriptor)
	}

	/// # Errors
	///
	/// [`Error::Undefined`].
	pub fn view(&self, name: &str) -> Result<Rc<ViewDescriptor>> {
		self.0.borrow().views.get(name).cloned().ok_or_else(|| Error::undefined_view(name))
	}

	/// # Errors
	///
	/// [`Error::Undefined`].
	pub fn model(&self, name: &str) -> Result<Rc<ModelInfo>> {
		self.0.borrow().models.get(name).cloned().ok_or_else(|| Error::undefined_model(name))
	}

	pub fn undefine_view(&self, name: &str) -> Option<Rc<ViewDescriptor>> {
		self.0.borrow_mut().views.remove(name)
	}

	pub fn undefine_model(&self, name: &str) -> Option<Rc<ModelInfo>> {
		self.0.borrow_mut().models.remove(name)
	}

	pub fn clear(&self) {
		let mut definitions = self.0.borrow_mut();
		definitions.views.clear();
		definitions.models.clear();
	}

	/// # Errors
	///
	/// [`Error::Undefined`] for unknown views or models, [`Error::KeyResolution`] if no parameter rule matches.
	pub fn view_key(&self, name: &str, params: &Params) -> Result<String> {
		let descriptor = self.view(name)?;
		self.view_key_of(&descriptor, params)
	}

	/// # Errors
	///
	/// See [`view_key`](`Registry::view_key`).
	pub fn view_key_of(&self, descriptor: &ViewDescriptor, params: &Params) -> Result<String> {
		key::view_key(descriptor, params, |model| self.model(model))
	}

	/// # Errors
	///
	/// [`Error::Undefined`].
	pub fn model_key(&self, name: &str, params: &Params) -> Result<String> {
		self.model(name).map(|info| key::model_key(&info, params))
	}
}
