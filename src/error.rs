use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Everything that can go wrong while defining views and models or while updating a view tree.
///
/// Definition and key errors are programmer errors and are returned immediately.
/// [`Error::ModelFetch`] only ever appears as a model's error payload or as the failure of a fetch promise,
/// and [`Error::Render`] fails the promise of the region it happened in and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
	#[error("no parameter rule of `{name}` can be satisfied by the given parameters")]
	KeyResolution { name: String },

	#[error("invalid definition of `{name}`: {reason}")]
	InvalidDefinition { name: String, reason: String },

	#[error("{kind} `{name}` is not defined")]
	Undefined { kind: &'static str, name: String },

	#[error("view `{key}` has no method `{method}`")]
	UnknownMethod { key: String, method: String },

	#[error("invalid layout: {reason}")]
	Layout { reason: String },

	#[error("depth limit reached below `{key}`")]
	DepthLimit { key: String },

	#[error("fetching `{key}` failed: {reason}")]
	ModelFetch { key: String, reason: String },

	#[error("rendering `{key}` failed: {reason}")]
	Render { key: String, reason: String },

	#[error("`{key}` can't be attached because its parent `{parent}` has no node")]
	Orphaned { key: String, parent: String },
}

impl Error {
	pub(crate) fn invalid_definition(name: &str, reason: impl Into<String>) -> Self {
		Self::InvalidDefinition {
			name: name.to_owned(),
			reason: reason.into(),
		}
	}

	pub(crate) fn undefined_view(name: &str) -> Self {
		Self::Undefined { kind: "view", name: name.to_owned() }
	}

	pub(crate) fn undefined_model(name: &str) -> Self {
		Self::Undefined { kind: "model", name: name.to_owned() }
	}

	pub(crate) fn layout(reason: impl Into<String>) -> Self {
		Self::Layout { reason: reason.into() }
	}
}
