//! Model catalog.
//!
//! Model kinds declare their unique field sets here before any entity of that
//! kind can be stored.

#[allow(clippy::module_inception)]
mod catalog;
mod model;

pub use catalog::Catalog;
pub use model::{ModelMeta, UniqueSet};
