//! Model metadata: the declared unique field sets of a kind.

use std::collections::HashSet;
use std::fmt;

use crate::error::Error;

/// An ordered set of fields whose combined values must be unique per kind.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct UniqueSet {
    /// Field names, in declaration order.
    pub fields: Vec<String>,

    /// When set, a combination containing a null value is not constrained.
    #[serde(default)]
    pub nulls_distinct: bool,
}

impl UniqueSet {
    /// Create a unique set over the given fields.
    pub fn new(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            nulls_distinct: false,
        }
    }

    /// Treat null values as distinct from each other.
    pub fn nulls_distinct(mut self, distinct: bool) -> Self {
        self.nulls_distinct = distinct;
        self
    }

    /// Whether this set covers exactly the given fields, in any order.
    pub fn covers(&self, fields: &[&str]) -> bool {
        self.fields.len() == fields.len()
            && fields.iter().all(|f| self.fields.iter().any(|own| own == f))
    }

    fn validate(&self) -> Result<(), Error> {
        if self.fields.is_empty() {
            return Err(Error::InvalidModel("unique set has no fields".to_string()));
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.is_empty() {
                return Err(Error::InvalidModel("empty field name in unique set".to_string()));
            }
            if !seen.insert(field.as_str()) {
                return Err(Error::InvalidModel(format!(
                    "field '{}' repeated in unique set ({})",
                    field, self
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for UniqueSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fields.join(", "))
    }
}

/// Metadata for one model kind.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct ModelMeta {
    /// Kind name, used as the storage namespace.
    pub kind: String,

    /// Declared unique sets, checked in order on every put.
    #[serde(default)]
    pub unique: Vec<UniqueSet>,
}

impl ModelMeta {
    /// Create metadata for a kind with no unique sets.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            unique: Vec::new(),
        }
    }

    /// Declare a unique set over the given fields.
    pub fn unique(self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.with_unique_set(UniqueSet::new(fields))
    }

    /// Declare a fully configured unique set.
    pub fn with_unique_set(mut self, set: UniqueSet) -> Self {
        self.unique.push(set);
        self
    }

    /// Find the declared set covering exactly these fields.
    pub fn find_set(&self, fields: &[&str]) -> Option<&UniqueSet> {
        self.unique.iter().find(|set| set.covers(fields))
    }

    /// Check the metadata is well formed.
    pub fn validate(&self) -> Result<(), Error> {
        if self.kind.is_empty() {
            return Err(Error::InvalidModel("kind must not be empty".to_string()));
        }
        if self.kind.as_bytes().contains(&0) {
            return Err(Error::InvalidModel(format!(
                "kind '{}' contains a NUL byte",
                self.kind.escape_debug()
            )));
        }

        for (i, set) in self.unique.iter().enumerate() {
            set.validate()?;
            let names: Vec<&str> = set.fields.iter().map(String::as_str).collect();
            let duplicate = self.unique[..i].iter().any(|earlier| earlier.covers(&names));
            if duplicate {
                return Err(Error::InvalidModel(format!(
                    "unique set ({}) declared twice on {}",
                    set, self.kind
                )));
            }
        }

        Ok(())
    }

    /// Serialize to bytes using rkyv.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from bytes using rkyv.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}
