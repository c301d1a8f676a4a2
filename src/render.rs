//! The boundary to whatever turns views into nodes.

use crate::{model::ModelStatus, registry::Dependency, view::View};
use core::{fmt::Display, iter::FromIterator};
use serde_json::Value;

/// What a renderer gets to see of one model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelData {
	pub status: ModelStatus,
	pub data: Option<Value>,
	pub error: Option<Value>,
	pub dependency: Dependency,
}

/// Model data of one view, in declaration order.
///
/// Errors of optional models are included, so the view's own logic can choose how to display them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelsData(Vec<(String, ModelData)>);

impl ModelsData {
	#[must_use]
	pub fn get(&self, name: &str) -> Option<&ModelData> {
		self.0.iter().find(|(model, _)| model == name).map(|(_, data)| data)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &ModelData)> {
		self.0.iter().map(|(name, data)| (name.as_str(), data))
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.0.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// `{ name: { "data": ... } | { "error": ... } }`, leaving out models without either.
	#[must_use]
	pub fn to_value(&self) -> Value {
		let mut object = serde_json::Map::new();
		for (name, data) in &self.0 {
			let entry = match (data.status, &data.error, &data.data) {
				(ModelStatus::Error, Some(error), _) => serde_json::json!({ "error": error }),
				(_, _, Some(data)) => serde_json::json!({ "data": data }),
				(_, Some(error), None) => serde_json::json!({ "error": error }),
				(_, None, None) => continue,
			};
			object.insert(name.clone(), entry);
		}
		Value::Object(object)
	}
}

impl FromIterator<(String, ModelData)> for ModelsData {
	fn from_iter<I: IntoIterator<Item = (String, ModelData)>>(iter: I) -> Self {
		Self(iter.into_iter().collect())
	}
}

/// Produces and places nodes for views.
///
/// The update engine only ever calls these four operations. It never inspects nodes beyond equality.
pub trait Renderer {
	type Node: 'static + Clone + PartialEq + core::fmt::Debug;
	type Error: Display;

	/// Renders `view`. With `previous`, this is a redraw and the renderer may either update that node in place
	/// (returning it again) or produce a replacement.
	///
	/// `view.state()` tells whether the required models are OK, so the view can choose an error display instead.
	///
	/// # Errors
	///
	/// Fails the update region `view` belongs to, and nothing else.
	fn render(&mut self, view: &View, models: &ModelsData, previous: Option<&Self::Node>) -> Result<Self::Node, Self::Error>;

	/// Places `node` at `position` within `slot` of `parent`, or at the mount point without a parent.
	///
	/// Must be idempotent: attaching a node where it already is changes nothing. Attaching it elsewhere moves it.
	fn attach(&mut self, node: &Self::Node, parent: Option<&Self::Node>, slot: &str, position: usize);

	/// Removes `node` from wherever it is attached. Detaching a detached node changes nothing.
	fn detach(&mut self, node: &Self::Node);

	fn is_attached(&self, node: &Self::Node) -> bool;
}
