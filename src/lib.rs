#![doc(html_root_url = "https://docs.rs/ns-update/0.0.3")]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

#[cfg(doctest)]
pub mod readme {
	doc_comment::doctest!("../README.md");
}

pub mod error;
pub mod key;
pub mod layout;
pub mod model;
pub mod params;
pub mod promise;
pub mod ref_count;
pub mod registry;
pub mod render;
pub mod transport;
pub mod update;
pub mod view;

pub use error::{Error, Result};
pub use layout::{Layout, LayoutBox, LayoutView};
pub use model::{Model, ModelStatus, ModelStore};
pub use params::Params;
pub use promise::{Promise, Scheduler};
pub use registry::{ModelDefinition, Registry, ViewDefinition, ViewEvent};
pub use render::Renderer;
pub use transport::{Responder, Transport};
pub use update::{Completion, Config, Runtime, Update};
pub use view::{View, ViewState};
