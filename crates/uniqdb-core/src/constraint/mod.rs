//! Unique constraint enforcement.
//!
//! Uniqueness is emulated with marker entries:
//! - every declared unique set of a stored entity owns one marker, keyed by
//!   the fingerprint of its values
//! - a save claims the markers for its new values inside sled transactions
//! - a delete or an update releases the markers of values no longer held

mod enforcer;
mod fingerprint;
mod fixer;
mod marker;

pub use enforcer::{PutPlan, UniqueEnforcer};
pub(crate) use enforcer::set_fingerprint;
pub use fingerprint::FieldValues;
pub use fixer::{Fixer, FixerRegistry, SuffixFixer};
pub use marker::{Claim, UniqueMarkers, MARKER_TREE};
