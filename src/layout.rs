//! The desired shape of a view tree for one update.

use crate::{
	error::{Error, Result},
	params::Params,
};
use core::fmt::{self, Debug, Formatter};
use serde_json::Value;
use std::rc::Rc;

/// Chooses the view for a slot. [`None`] leaves the slot empty.
#[derive(Clone)]
pub enum Binding {
	Fixed(String),
	Computed(Rc<dyn Fn(&Params) -> Option<String>>),
}

impl Debug for Binding {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Self::Fixed(name) => f.debug_tuple("Fixed").field(name).finish(),
			Self::Computed(_) => f.write_str("Computed(..)"),
		}
	}
}

impl Binding {
	#[must_use]
	pub fn resolve(&self, params: &Params) -> Option<String> {
		match self {
			Self::Fixed(name) => Some(name.clone()),
			Self::Computed(f) => f(params),
		}
	}
}

#[derive(Debug, Clone)]
pub enum LayoutNode {
	View(LayoutView),
	Box(LayoutBox),
}

impl LayoutNode {
	#[must_use]
	pub fn slot(&self) -> &str {
		match self {
			Self::View(view) => &view.slot,
			Self::Box(view_box) => &view_box.name,
		}
	}
}

impl From<LayoutView> for LayoutNode {
	fn from(view: LayoutView) -> Self {
		Self::View(view)
	}
}

impl From<LayoutBox> for LayoutNode {
	fn from(view_box: LayoutBox) -> Self {
		Self::Box(view_box)
	}
}

/// A single view in its own slot.
#[derive(Debug, Clone)]
pub struct LayoutView {
	pub slot: String,
	pub binding: Binding,
	/// Asynchronous views fetch and render on their own, without holding up their ancestors.
	pub asynchronous: bool,
	pub children: Vec<LayoutNode>,
}

impl LayoutView {
	/// A fixed view, in the slot of the same name.
	#[must_use]
	pub fn new(name: impl Into<String>) -> Self {
		let name = name.into();
		Self {
			slot: name.clone(),
			binding: Binding::Fixed(name),
			asynchronous: false,
			children: Vec::new(),
		}
	}

	/// A view chosen from the request parameters.
	#[must_use]
	pub fn computed(slot: impl Into<String>, f: impl 'static + Fn(&Params) -> Option<String>) -> Self {
		Self {
			slot: slot.into(),
			binding: Binding::Computed(Rc::new(f)),
			asynchronous: false,
			children: Vec::new(),
		}
	}

	#[must_use]
	pub fn asynchronous(mut self) -> Self {
		self.asynchronous = true;
		self
	}

	#[must_use]
	pub fn child(mut self, child: impl Into<LayoutNode>) -> Self {
		self.children.push(child.into());
		self
	}
}

/// A slot showing any number of views side by side, while keeping deselected ones around hidden.
#[derive(Debug, Clone)]
pub struct LayoutBox {
	pub name: String,
	pub views: Vec<LayoutView>,
}

impl LayoutBox {
	#[must_use]
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			views: Vec::new(),
		}
	}

	#[must_use]
	pub fn view(mut self, view: LayoutView) -> Self {
		self.views.push(view);
		self
	}
}

/// The layout below an already existing root view.
#[derive(Debug, Clone)]
pub struct Layout {
	pub root: String,
	pub children: Vec<LayoutNode>,
}

impl Layout {
	#[must_use]
	pub fn new(root: impl Into<String>) -> Self {
		Self {
			root: root.into(),
			children: Vec::new(),
		}
	}

	#[must_use]
	pub fn child(mut self, child: impl Into<LayoutNode>) -> Self {
		self.children.push(child.into());
		self
	}

	/// Reads the page layout notation:
	///
	/// ```json
	/// { "app": { "box@": "view", "async-view&": { "async-view-child": true } } }
	/// ```
	///
	/// Keys ending in `@` are boxes, holding a view name, a list of names or an object of views.
	/// Keys ending in `&` are asynchronous views. A view's value is `true`, `{}` or an object of its children.
	///
	/// # Errors
	///
	/// [`Error::Layout`] for anything else.
	pub fn from_value(value: &Value) -> Result<Self> {
		let object = value.as_object().ok_or_else(|| Error::layout("a layout must be an object"))?;
		let mut entries = object.iter();
		let (root, children) = match (entries.next(), entries.next()) {
			(Some(root), None) => root,
			_ => return Err(Error::layout("a layout must have exactly one root view")),
		};
		if root.ends_with('@') || root.ends_with('&') {
			return Err(Error::layout(format!("the root `{}` must be a plain view", root)));
		}
		Ok(Self {
			root: root.clone(),
			children: parse_children(root, children)?,
		})
	}
}

fn parse_children(parent: &str, value: &Value) -> Result<Vec<LayoutNode>> {
	match value {
		Value::Null | Value::Bool(true) => Ok(Vec::new()),
		Value::Object(object) => object
			.iter()
			.map(|(key, value)| match key.strip_suffix('@') {
				Some(name) => parse_box(name, value).map(LayoutNode::from),
				None => parse_view(key, value).map(LayoutNode::from),
			})
			.collect(),
		other => Err(Error::layout(format!("unexpected children of `{}`: {}", parent, other))),
	}
}

fn parse_view(key: &str, value: &Value) -> Result<LayoutView> {
	let (name, asynchronous) = match key.strip_suffix('&') {
		Some(name) => (name, true),
		None => (key, false),
	};
	let mut view = LayoutView::new(name);
	view.asynchronous = asynchronous;
	view.children = parse_children(name, value)?;
	Ok(view)
}

fn parse_box(name: &str, value: &Value) -> Result<LayoutBox> {
	let views = match value {
		Value::String(view) => vec![parse_view(view, &Value::Null)?],
		Value::Array(views) => views
			.iter()
			.map(|view| match view {
				Value::String(view) => parse_view(view, &Value::Null),
				other => Err(Error::layout(format!("unexpected entry in box `{}`: {}", name, other))),
			})
			.collect::<Result<_>>()?,
		Value::Object(views) => views
			.iter()
			.map(|(key, value)| {
				if key.ends_with('@') {
					Err(Error::layout(format!("box `{}` can't contain box `{}`", name, key)))
				} else {
					parse_view(key, value)
				}
			})
			.collect::<Result<_>>()?,
		other => return Err(Error::layout(format!("unexpected content of box `{}`: {}", name, other))),
	};
	Ok(LayoutBox { name: name.to_owned(), views })
}
