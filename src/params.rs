//! Request parameters and their key encoding.

use core::iter::FromIterator;
use hashbrown::HashMap;
use serde_json::Value;
use std::borrow::Cow;

/// The parameter mapping of a request, as handed to an [`Update`](`crate::update::Update`).
///
/// Order is irrelevant here. Keys are always emitted in the order of whichever rule selects them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(HashMap<String, Value>);

/// Shorthand for building [`Params`] from literals.
///
/// ```
/// let params = ns_update::params! { "login" => "a", "id" => 4 };
/// assert_eq!(params.present("id"), Some(&4.into()));
/// ```
#[macro_export]
macro_rules! params {
	() => ($crate::params::Params::new());
	($($name:expr => $value:expr),+ $(,)?) => {
		$crate::params::Params::new()$(.with($name, $value))+
	};
}

impl Params {
	#[must_use]
	pub fn new() -> Self {
		Self(HashMap::new())
	}

	#[must_use]
	pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
		self.insert(name, value);
		self
	}

	pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
		self.0.insert(name.into(), value.into())
	}

	pub fn remove(&mut self, name: &str) -> Option<Value> {
		self.0.remove(name)
	}

	#[must_use]
	pub fn get(&self, name: &str) -> Option<&Value> {
		self.0.get(name)
	}

	/// Like [`get`](`Params::get`), but treats `null` as absent.
	#[must_use]
	pub fn present(&self, name: &str) -> Option<&Value> {
		self.0.get(name).filter(|value| !value.is_null())
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.0.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
		self.0.iter().map(|(name, value)| (name.as_str(), value))
	}

	/// Reads a JSON object. Anything else is rejected.
	#[must_use]
	pub fn from_value(value: &Value) -> Option<Self> {
		value.as_object().map(|object| object.iter().map(|(name, value)| (name.clone(), value.clone())).collect())
	}
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		Self(iter.into_iter().map(|(name, value)| (name.into(), value.into())).collect())
	}
}

impl<K: Into<String>, V: Into<Value>> Extend<(K, V)> for Params {
	fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
		self.0.extend(iter.into_iter().map(|(name, value)| (name.into(), value.into())));
	}
}

/// Formats a parameter value the way it appears in a key.
///
/// Strings are written raw, `null` as nothing, everything else as JSON.
#[must_use]
pub fn format_value(value: &Value) -> Cow<'_, str> {
	match value {
		Value::String(string) => Cow::Borrowed(string),
		Value::Null => Cow::Borrowed(""),
		other => Cow::Owned(other.to_string()),
	}
}

/// `<kind>=<name>&<k1>=<v1>&...`
pub(crate) fn encode(kind: &str, name: &str, pairs: &[(String, Value)]) -> String {
	let mut key = format!("{}={}", kind, name);
	for (param, value) in pairs {
		key.push('&');
		key.push_str(param);
		key.push('=');
		key.push_str(&format_value(value));
	}
	key
}
