//! Value fingerprints for unique sets.
//!
//! A fingerprint is the BLAKE3 hash of the canonical JSON encoding of the
//! `[[field, value], ...]` pairs of one unique set, in declaration order.

use std::fmt;

use serde_json::{Map, Value};

use crate::catalog::UniqueSet;
use crate::error::Error;

/// The values a document holds for one unique set.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValues {
    pairs: Vec<(String, Value)>,
}

impl FieldValues {
    /// Extract the values of `set` from a field map. Missing fields read as null.
    pub fn extract(set: &UniqueSet, fields: &Map<String, Value>) -> Self {
        let pairs = set
            .fields
            .iter()
            .map(|name| {
                let value = fields.get(name).cloned().unwrap_or(Value::Null);
                (name.clone(), value)
            })
            .collect();
        Self { pairs }
    }

    /// The `(field, value)` pairs.
    pub fn pairs(&self) -> &[(String, Value)] {
        &self.pairs
    }

    /// Value of a single field, if it belongs to the set.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.pairs
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// Whether any value in the set is null.
    pub fn has_null(&self) -> bool {
        self.pairs.iter().any(|(_, value)| value.is_null())
    }

    /// Compute the hex fingerprint of these values.
    pub fn fingerprint(&self) -> Result<String, Error> {
        let canonical = serde_json::to_vec(&self.pairs)?;
        Ok(hex::encode(blake3::hash(&canonical).as_bytes()))
    }
}

impl fmt::Display for FieldValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.pairs.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        Ok(())
    }
}
