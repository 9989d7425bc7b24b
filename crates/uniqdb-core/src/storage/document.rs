//! Documents: the unit a store reads and writes.

use serde_json::{Map, Value};

use super::{EntityKey, Model};
use crate::error::Error;

/// An entity's fields together with its key and load-time snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    kind: String,
    id: Option<u64>,
    fields: Map<String, Value>,
    /// Field values as of the last load or save.
    original: Option<Map<String, Value>>,
}

impl Document {
    /// Create an empty, unsaved document.
    pub fn new(kind: impl Into<String>) -> Self {
        Self::from_fields(kind, Map::new())
    }

    /// Create an unsaved document with the given fields.
    pub fn from_fields(kind: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
            fields,
            original: None,
        }
    }

    /// Create an unsaved document from a JSON object.
    pub fn from_json(kind: impl Into<String>, value: Value) -> Result<Self, Error> {
        match value {
            Value::Object(fields) => Ok(Self::from_fields(kind, fields)),
            other => Err(Error::Deserialization(format!(
                "document must be a JSON object, got {}",
                other
            ))),
        }
    }

    /// Create an unsaved document from a typed model.
    pub fn from_model<M: Model>(model: &M) -> Result<Self, Error> {
        Self::from_json(M::KIND, serde_json::to_value(model)?)
    }

    pub(crate) fn loaded(key: EntityKey, fields: Map<String, Value>) -> Self {
        Self {
            kind: key.kind,
            id: Some(key.id),
            original: Some(fields.clone()),
            fields,
        }
    }

    /// Target a specific id. A put then updates that entity if it exists.
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Model kind.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Entity id, once assigned.
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    /// Entity key, once an id is assigned.
    pub fn key(&self) -> Option<EntityKey> {
        self.id.map(|id| EntityKey::new(self.kind.clone(), id))
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Set a field value.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Remove a field.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// All fields.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub(crate) fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.fields
    }

    /// Value of a field as of the last load or save.
    pub fn original(&self, field: &str) -> Option<&Value> {
        self.original.as_ref().and_then(|o| o.get(field))
    }

    /// Whether any of `fields` differs from the last load or save.
    ///
    /// A document that was never loaded or saved counts as changed.
    pub fn is_changed(&self, fields: &[&str]) -> bool {
        match &self.original {
            None => true,
            Some(original) => fields
                .iter()
                .any(|f| original.get(*f) != self.fields.get(*f)),
        }
    }

    /// Convert into a typed model.
    pub fn to_model<M: Model>(&self) -> Result<M, Error> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }

    /// Record a successful save under `id`.
    pub(crate) fn mark_saved(&mut self, id: u64) {
        self.id = Some(id);
        self.original = Some(self.fields.clone());
    }
}
