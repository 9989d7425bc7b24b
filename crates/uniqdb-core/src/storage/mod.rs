//! Storage layer.
//!
//! This module provides the sled-backed entity store and the types it reads
//! and writes.

mod config;
mod document;
mod model;
mod record;
mod store;

pub mod key;

pub use config::{StoreConfig, DEFAULT_MAX_FIX_ATTEMPTS};
pub use document::Document;
pub use key::EntityKey;
pub use model::Model;
pub use record::Record;
pub use store::{RebuildReport, Store, UniqueConflict};
