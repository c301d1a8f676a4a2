//! The boundary to whatever fetches model payloads.

use crate::{
	error::Error,
	params::Params,
	promise::{Promise, Scheduler},
};
use serde_json::Value;
use tracing::{instrument, trace};

/// One model to fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
	pub name: String,
	pub key: String,
	/// The model's identifying parameters, defaults included.
	pub params: Vec<(String, Value)>,
}

impl ModelRequest {
	#[must_use]
	pub fn params(&self) -> Params {
		self.params.iter().cloned().collect()
	}

	/// `{ "name": ..., "params": { ... } }`
	#[must_use]
	pub fn to_value(&self) -> Value {
		let params: serde_json::Map<_, _> = self.params.iter().cloned().collect();
		serde_json::json!({ "name": self.name, "params": params })
	}
}

/// The outcome for one requested model.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
	Data(Value),
	Error(Value),
}

impl From<Value> for Response {
	/// An object with a non-null `error` field is an error. An object with a `data` field carries that data.
	/// Anything else is data as a whole.
	fn from(value: Value) -> Self {
		if let Value::Object(object) = &value {
			if let Some(error) = object.get("error").filter(|error| !error.is_null()) {
				return Self::Error(error.clone());
			}
			if let Some(data) = object.get("data") {
				return Self::Data(data.clone());
			}
		}
		Self::Data(value)
	}
}

/// Fetches batches of models.
///
/// The returned promise resolves to one entry per request, in request order. Retries, if any, happen in here.
/// A failed promise puts every model of the batch into ERROR.
pub trait Transport {
	fn fetch(&mut self, requests: &[ModelRequest], scheduler: &Scheduler) -> Promise<Vec<Value>>;
}

/// A transport that answers each batch at once with the given closure.
///
/// The answer is still delivered through the task queue, like any other.
pub struct Responder<F>(pub F);

impl<F> Transport for Responder<F>
where
	F: FnMut(&[ModelRequest]) -> Result<Vec<Value>, String>,
{
	#[instrument(skip(self, requests, scheduler), fields(requests = requests.len()))]
	fn fetch(&mut self, requests: &[ModelRequest], scheduler: &Scheduler) -> Promise<Vec<Value>> {
		trace!("Requesting {}.", requests.iter().map(|request| request.key.as_str()).collect::<Vec<_>>().join(", "));
		match (self.0)(requests) {
			Ok(responses) => Promise::resolved(scheduler, responses),
			Err(reason) => Promise::failed(
				scheduler,
				Error::ModelFetch {
					key: requests.iter().map(|request| request.key.as_str()).collect::<Vec<_>>().join(","),
					reason,
				},
			),
		}
	}
}

impl<T: Transport + ?Sized> Transport for Box<T> {
	fn fetch(&mut self, requests: &[ModelRequest], scheduler: &Scheduler) -> Promise<Vec<Value>> {
		(**self).fetch(requests, scheduler)
	}
}
