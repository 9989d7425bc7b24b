//! Catalog of registered model metadata.

use std::collections::HashMap;

use parking_lot::RwLock;
use sled::{Db, Tree};
use tracing::info;

use super::ModelMeta;
use crate::error::Error;

/// Tree name for model metadata.
const MODELS_TREE: &str = "catalog:models";

/// The catalog of model kinds and their unique sets.
pub struct Catalog {
    /// Persisted metadata, keyed by kind.
    tree: Tree,
    /// Cached metadata.
    models: RwLock<HashMap<String, ModelMeta>>,
}

impl Catalog {
    /// Open or create a catalog using the given sled database.
    pub fn open(db: &Db) -> Result<Self, Error> {
        let tree = db.open_tree(MODELS_TREE)?;

        let mut models = HashMap::new();
        for result in tree.iter() {
            let (_, bytes) = result?;
            let meta = ModelMeta::from_bytes(&bytes)?;
            models.insert(meta.kind.clone(), meta);
        }

        Ok(Self {
            tree,
            models: RwLock::new(models),
        })
    }

    /// Register metadata for a kind, replacing any previous registration.
    pub fn register(&self, meta: ModelMeta) -> Result<(), Error> {
        meta.validate()?;

        self.tree.insert(meta.kind.as_bytes(), meta.to_bytes()?)?;
        info!(kind = %meta.kind, unique_sets = meta.unique.len(), "registered model");
        self.models.write().insert(meta.kind.clone(), meta);

        Ok(())
    }

    /// Get the metadata for a kind.
    pub fn get(&self, kind: &str) -> Option<ModelMeta> {
        self.models.read().get(kind).cloned()
    }

    /// Get the metadata for a kind, failing if it was never registered.
    pub fn require(&self, kind: &str) -> Result<ModelMeta, Error> {
        self.get(kind)
            .ok_or_else(|| Error::UnknownModel(kind.to_string()))
    }

    /// List registered kinds in name order.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.models.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.tree.flush()?;
        Ok(())
    }
}
