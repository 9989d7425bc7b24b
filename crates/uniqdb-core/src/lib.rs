//! uniqdb core: an embedded entity store with emulated unique constraints.
//!
//! Models declare unique field sets in their [`ModelMeta`]. Every
//! [`Store::put`] claims a marker per changed set before the entity is
//! written, and [`Store::delete`] releases them, so no two stored entities of
//! a kind can share the values of a declared set.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod catalog;
pub mod constraint;
pub mod error;
pub mod storage;

pub use catalog::{Catalog, ModelMeta, UniqueSet};
pub use constraint::{Claim, FieldValues, Fixer, SuffixFixer, UniqueEnforcer, UniqueMarkers};
pub use error::{ConstraintError, Error};
pub use storage::{
    Document, EntityKey, Model, RebuildReport, Record, Store, StoreConfig, UniqueConflict,
    DEFAULT_MAX_FIX_ATTEMPTS,
};
