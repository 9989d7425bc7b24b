//! Fixers rewrite a colliding document so the save can be retried.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};

use super::FieldValues;

/// Rewrites a document whose unique set collided with a stored entity.
///
/// `attempt` counts from zero. `original` holds the set's values as they were
/// before the first attempt. Returning `false` gives up and the save fails
/// with a unique violation.
pub trait Fixer: Send + Sync {
    /// Mutate `fields` for the next attempt.
    fn fix(&self, attempt: usize, original: &FieldValues, fields: &mut Map<String, Value>) -> bool;
}

impl<F> Fixer for F
where
    F: Fn(usize, &FieldValues, &mut Map<String, Value>) -> bool + Send + Sync,
{
    fn fix(&self, attempt: usize, original: &FieldValues, fields: &mut Map<String, Value>) -> bool {
        self(attempt, original, fields)
    }
}

/// Appends a counter to a string field: `slug`, `slug-2`, `slug-3`, ...
#[derive(Debug, Clone)]
pub struct SuffixFixer {
    field: String,
    separator: String,
}

impl SuffixFixer {
    /// Create a fixer for `field` using `-` as separator.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            separator: "-".to_string(),
        }
    }

    /// Set the separator placed before the counter.
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }
}

impl Fixer for SuffixFixer {
    fn fix(&self, attempt: usize, original: &FieldValues, fields: &mut Map<String, Value>) -> bool {
        let Some(Value::String(base)) = original.get(&self.field) else {
            return false;
        };
        let candidate = format!("{}{}{}", base, self.separator, attempt + 2);
        fields.insert(self.field.clone(), Value::String(candidate));
        true
    }
}

/// Fixers registered per `(kind, fields)` unique set.
#[derive(Default)]
pub struct FixerRegistry {
    fixers: RwLock<HashMap<(String, Vec<String>), Arc<dyn Fixer>>>,
}

impl FixerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fixer, replacing any previous one for the same set.
    pub fn register(&self, kind: &str, fields: Vec<String>, fixer: Arc<dyn Fixer>) {
        self.fixers.write().insert((kind.to_string(), fields), fixer);
    }

    /// Look up the fixer for a set.
    pub fn get(&self, kind: &str, fields: &[String]) -> Option<Arc<dyn Fixer>> {
        self.fixers
            .read()
            .get(&(kind.to_string(), fields.to_vec()))
            .cloned()
    }
}
