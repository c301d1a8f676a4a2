//! Canonical identity keys for views and models.
//!
//! A key is a query-string-like rendering of a name and the parameters that identify an instance,
//! for example `view=photo&login=a&id=4`. Identical names and parameter values always produce the same key,
//! regardless of the order of the candidate mapping, which is what makes instances reusable across updates.

use crate::{
	error::{Error, Result},
	params::{self, Params},
	registry::{ModelInfo, ViewDescriptor},
};
use core::fmt::{self, Debug, Formatter};
use hashbrown::HashSet;
use serde_json::Value;
use std::rc::Rc;
use tracing::{instrument, trace, warn};

/// Computes the exact list of key parameters from the full request parameters.
pub type ParamFn = Rc<dyn Fn(&Params) -> core::result::Result<Vec<(String, Value)>, String>>;

/// How a view selects the request parameters that make up its key.
#[derive(Clone)]
pub enum ParamRule {
	/// The union of the declared parameters of the view's models, with model defaults filled in.
	Models,
	Object(ObjectRule),
	/// The first rule that resolves completely wins.
	Variants(Vec<ObjectRule>),
	Function(ParamFn),
}

impl Default for ParamRule {
	fn default() -> Self {
		Self::Models
	}
}

impl Debug for ParamRule {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Self::Models => f.write_str("Models"),
			Self::Object(rule) => f.debug_tuple("Object").field(rule).finish(),
			Self::Variants(rules) => f.debug_tuple("Variants").field(rules).finish(),
			Self::Function(_) => f.write_str("Function(..)"),
		}
	}
}

impl ParamRule {
	pub fn function(f: impl 'static + Fn(&Params) -> core::result::Result<Vec<(String, Value)>, String>) -> Self {
		Self::Function(Rc::new(f))
	}
}

/// A flat list of required parameters, each either accepting any present value or filtering on an exact one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectRule(Vec<(String, Option<Value>)>);

impl ObjectRule {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Requires `name` to be present with any value.
	#[must_use]
	pub fn any(mut self, name: impl Into<String>) -> Self {
		self.0.push((name.into(), None));
		self
	}

	/// Requires `name` to be present with exactly `value`. A `null` filter is the same as [`any`](`ObjectRule::any`).
	#[must_use]
	pub fn equal(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
		let value = value.into();
		self.0.push((name.into(), if value.is_null() { None } else { Some(value) }));
		self
	}

	pub fn entries(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
		self.0.iter().map(|(name, filter)| (name.as_str(), filter.as_ref()))
	}

	/// Returns the key parameters in declaration order, or [`None`] if any entry is missing or filtered out.
	#[must_use]
	pub fn resolve(&self, params: &Params) -> Option<Vec<(String, Value)>> {
		self.0
			.iter()
			.map(|(name, filter)| {
				let value = params.present(name)?;
				match filter {
					Some(expected) if expected != value => None,
					_ => Some((name.clone(), value.clone())),
				}
			})
			.collect()
	}
}

/// `params+` and `params-`: adjustments applied to the model-derived key only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyModifiers {
	pub append: Option<Vec<(String, Value)>>,
	pub remove: Option<Vec<String>>,
}

impl KeyModifiers {
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.append.is_none() && self.remove.is_none()
	}

	fn apply(&self, mut pairs: Vec<(String, Value)>) -> Vec<(String, Value)> {
		if let Some(remove) = &self.remove {
			pairs.retain(|(name, _)| !remove.contains(name));
		}
		if let Some(append) = &self.append {
			pairs.extend(append.iter().cloned());
		}
		pairs
	}
}

/// The identifying parameters of a model instance.
///
/// Every declared parameter is taken from `params` if present there, or else from its declared default.
/// Parameters with neither are left out.
#[must_use]
pub fn model_params(info: &ModelInfo, params: &Params) -> Vec<(String, Value)> {
	info.params
		.iter()
		.filter_map(|(name, default)| params.present(name).or_else(|| default.as_ref()).map(|value| (name.clone(), value.clone())))
		.collect()
}

#[must_use]
pub fn model_key(info: &ModelInfo, params: &Params) -> String {
	params::encode("model", &info.name, &model_params(info, params))
}

/// The key parameters of a view, in the order its rule emits them.
///
/// # Errors
///
/// [`Error::KeyResolution`] if the rule can't be satisfied, [`Error::Undefined`] for undefined models.
#[instrument(skip(descriptor, params, model), fields(view = %descriptor.name))]
pub fn view_params(descriptor: &ViewDescriptor, params: &Params, model: impl Fn(&str) -> Result<Rc<ModelInfo>>) -> Result<Vec<(String, Value)>> {
	let unresolved = || Error::KeyResolution { name: descriptor.name.clone() };
	let pairs = match &descriptor.params {
		ParamRule::Models => {
			let mut seen = HashSet::new();
			let mut pairs = Vec::new();
			for (name, _) in &descriptor.models {
				let info = model(name)?;
				for (param, default) in &info.params {
					if !seen.insert(param.clone()) {
						continue;
					}
					if let Some(value) = params.present(param).or_else(|| default.as_ref()) {
						pairs.push((param.clone(), value.clone()));
					}
				}
			}
			descriptor.modifiers.apply(pairs)
		}
		ParamRule::Object(rule) => rule.resolve(params).ok_or_else(unresolved)?,
		ParamRule::Variants(rules) => rules
			.iter()
			.enumerate()
			.find_map(|(i, rule)| {
				let resolved = rule.resolve(params);
				if resolved.is_some() {
					trace!("Parameter variant {} matched.", i);
				}
				resolved
			})
			.ok_or_else(unresolved)?,
		ParamRule::Function(f) => f(params).map_err(|reason| {
			warn!("Parameter function of {:?} failed: {}", descriptor.name, reason);
			unresolved()
		})?,
	};
	Ok(pairs)
}

/// # Errors
///
/// See [`view_params`].
pub fn view_key(descriptor: &ViewDescriptor, params: &Params, model: impl Fn(&str) -> Result<Rc<ModelInfo>>) -> Result<String> {
	view_params(descriptor, params, model).map(|pairs| params::encode("view", &descriptor.name, &pairs))
}
