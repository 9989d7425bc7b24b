//! Entity store with unique constraint hooks.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use sled::{Db, IVec, Tree};
use tracing::{debug, error, info, instrument};

use super::{Document, EntityKey, Model, Record, StoreConfig};
use crate::catalog::{Catalog, ModelMeta};
use crate::constraint::{
    set_fingerprint, FieldValues, Fixer, FixerRegistry, UniqueEnforcer, UniqueMarkers,
};
use crate::error::Error;

/// Tree name for entity data.
const DATA_TREE: &str = "data";

/// Two stored entities found holding the same unique values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueConflict {
    /// Fields of the shared set.
    pub fields: Vec<String>,
    /// Rendered shared values.
    pub values: String,
    /// Entity left holding the marker.
    pub kept: u64,
    /// Entity whose values duplicate it.
    pub duplicate: u64,
}

/// Outcome of [`Store::rebuild_markers`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    /// Entities scanned.
    pub scanned: usize,
    /// Markers created for values that had none.
    pub restored: usize,
    /// Markers dropped because no entity holds their values.
    pub removed: usize,
    /// Duplicate values found among stored entities.
    pub conflicts: Vec<UniqueConflict>,
}

impl RebuildReport {
    /// Whether the markers already matched the stored entities.
    pub fn is_clean(&self) -> bool {
        self.restored == 0 && self.removed == 0 && self.conflicts.is_empty()
    }
}

/// An embedded entity store that enforces declared unique sets on every put.
pub struct Store {
    db: Db,
    /// Tree for entity data (`kind\0id` -> record).
    data_tree: Tree,
    catalog: Catalog,
    markers: UniqueMarkers,
    fixers: FixerRegistry,
    config: StoreConfig,
}

impl Store {
    /// Open or create a store with the given configuration.
    pub fn open(config: StoreConfig) -> Result<Self, Error> {
        let db = config.to_sled_config().open()?;
        let data_tree = db.open_tree(DATA_TREE)?;
        let catalog = Catalog::open(&db)?;
        let markers = UniqueMarkers::open(&db)?;

        info!(
            path = %config.path.display(),
            temporary = config.temporary,
            recovered = db.was_recovered(),
            "opened store"
        );

        Ok(Self {
            db,
            data_tree,
            catalog,
            markers,
            fixers: FixerRegistry::new(),
            config,
        })
    }

    /// The model catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The unique markers.
    pub fn markers(&self) -> &UniqueMarkers {
        &self.markers
    }

    /// The configuration the store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Register metadata for a kind.
    ///
    /// Adding a unique set to a kind that already holds entities does not
    /// claim markers for them; run [`Store::rebuild_markers`] afterwards.
    pub fn register(&self, meta: ModelMeta) -> Result<(), Error> {
        self.catalog.register(meta)
    }

    /// Register a typed model's metadata.
    pub fn register_model<M: Model>(&self) -> Result<(), Error> {
        self.register(M::meta())
    }

    /// Register a fixer for the unique set of `kind` covering `fields`.
    pub fn register_fixer<F>(
        &self,
        kind: &str,
        fields: impl IntoIterator<Item = impl Into<String>>,
        fixer: F,
    ) -> Result<(), Error>
    where
        F: Fixer + 'static,
    {
        let meta = self.catalog.require(kind)?;
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        let names: Vec<&str> = fields.iter().map(String::as_str).collect();

        let set = meta.find_set(&names).ok_or_else(|| Error::UnknownUniqueSet {
            kind: kind.to_string(),
            fields: fields.clone(),
        })?;

        self.fixers.register(kind, set.fields.clone(), Arc::new(fixer));
        debug!(kind, set = %set, "registered fixer");
        Ok(())
    }

    fn enforcer(&self) -> UniqueEnforcer<'_> {
        UniqueEnforcer::new(&self.markers, &self.fixers, self.config.max_fix_attempts)
    }

    fn load_record(&self, key: &EntityKey) -> Result<Option<Record>, Error> {
        Ok(self.load_stored(key)?.map(|(_, record)| record))
    }

    /// Load a record along with the exact bytes it was read from.
    fn load_stored(&self, key: &EntityKey) -> Result<Option<(IVec, Record)>, Error> {
        match self.data_tree.get(key.encode())? {
            Some(bytes) => {
                let record = Record::from_bytes(&bytes)?;
                Ok(Some((bytes, record)))
            }
            None => Ok(None),
        }
    }

    /// Allocate an id no stored entity of `kind` uses. Ids pinned with
    /// [`Document::with_id`] may run ahead of the generator.
    fn fresh_id(&self, kind: &str) -> Result<u64, Error> {
        loop {
            let id = self.db.generate_id()?;
            if !self.data_tree.contains_key(EntityKey::new(kind, id).encode())? {
                return Ok(id);
            }
            debug!(kind, id, "generated id already in use, skipping");
        }
    }

    /// Replace the record under `key` only if it still holds `expected`.
    fn swap_record(
        &self,
        key: &EntityKey,
        expected: Option<IVec>,
        new: Option<Vec<u8>>,
    ) -> Result<(), Error> {
        self.data_tree
            .compare_and_swap(key.encode(), expected, new)?
            .map_err(|_| Error::WriteConflict(key.to_string()))
    }

    /// Save a document.
    ///
    /// A document without an id is created under a fresh id. A document with
    /// an id updates the stored entity, or creates it under that id if none is
    /// stored. Every declared unique set whose values changed is checked; a
    /// collision fails with a unique violation unless a registered fixer
    /// resolves it, in which case the document carries the fixed values. If a
    /// unique check fails the document keeps the values it was passed with.
    ///
    /// The write fails with [`Error::WriteConflict`] if the stored entity
    /// changed since it was read for this put.
    #[instrument(skip(self, doc), fields(kind = %doc.kind()))]
    pub fn put(&self, doc: &mut Document) -> Result<EntityKey, Error> {
        let meta = self.catalog.require(doc.kind())?;

        let (id, stored) = match doc.id() {
            Some(id) => (id, self.load_stored(&EntityKey::new(doc.kind(), id))?),
            None => (self.fresh_id(&meta.kind)?, None),
        };
        let key = EntityKey::new(meta.kind.clone(), id);
        let (expected, previous) = stored.unzip();
        let previous_fields = previous.as_ref().map(Record::fields).transpose()?;

        let enforcer = self.enforcer();
        let plan = enforcer.before_put(&meta, id, doc.fields_mut(), previous_fields.as_ref())?;

        let record = match &previous {
            Some(previous) => previous.updated(doc.fields()),
            None => Record::new(doc.fields()),
        };
        let written = record
            .and_then(|record| record.to_bytes())
            .and_then(|bytes| self.swap_record(&key, expected, Some(bytes)));
        if let Err(e) = written {
            enforcer.abort_put(plan)?;
            return Err(e);
        }

        enforcer.after_put(plan)?;
        doc.mark_saved(id);
        debug!(%key, created = previous.is_none(), "put entity");
        Ok(key)
    }

    /// Save several documents. Each is checked and written on its own, so a
    /// failure leaves earlier documents saved.
    pub fn put_multi(&self, docs: &mut [Document]) -> Vec<Result<EntityKey, Error>> {
        docs.iter_mut().map(|doc| self.put(doc)).collect()
    }

    /// Create a typed model as a new entity.
    pub fn insert<M: Model>(&self, model: &M) -> Result<Document, Error> {
        let mut doc = Document::from_model(model)?;
        self.put(&mut doc)?;
        Ok(doc)
    }

    /// Load a document.
    pub fn get(&self, key: &EntityKey) -> Result<Option<Document>, Error> {
        match self.load_record(key)? {
            Some(record) => Ok(Some(Document::loaded(key.clone(), record.fields()?))),
            None => Ok(None),
        }
    }

    /// Load a typed model by id.
    pub fn get_model<M: Model>(&self, id: u64) -> Result<Option<M>, Error> {
        match self.get(&EntityKey::new(M::KIND, id))? {
            Some(doc) => Ok(Some(doc.to_model()?)),
            None => Ok(None),
        }
    }

    /// Delete an entity and free its unique values.
    ///
    /// Returns `false` if no entity is stored under the key.
    #[instrument(skip(self))]
    pub fn delete(&self, key: &EntityKey) -> Result<bool, Error> {
        let meta = self.catalog.require(&key.kind)?;

        let Some((bytes, record)) = self.load_stored(key)? else {
            error!(%key, "delete: instance not found");
            return Ok(false);
        };
        let fields = record.fields()?;

        self.swap_record(key, Some(bytes), None)?;
        let released = self.enforcer().release_all(&meta, key.id, &fields)?;

        debug!(%key, released, "deleted entity");
        Ok(true)
    }

    /// Delete several entities.
    pub fn delete_multi(&self, keys: &[EntityKey]) -> Vec<Result<bool, Error>> {
        keys.iter().map(|key| self.delete(key)).collect()
    }

    /// Find the entity holding the given values of a declared unique set.
    ///
    /// `values` must name exactly the fields of one declared set, in any order.
    pub fn find_by_unique(
        &self,
        kind: &str,
        values: &[(&str, serde_json::Value)],
    ) -> Result<Option<Document>, Error> {
        let meta = self.catalog.require(kind)?;
        let names: Vec<&str> = values.iter().map(|(name, _)| *name).collect();
        let set = meta.find_set(&names).ok_or_else(|| Error::UnknownUniqueSet {
            kind: kind.to_string(),
            fields: names.iter().map(|n| n.to_string()).collect(),
        })?;

        let fields: serde_json::Map<String, serde_json::Value> = values
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        let values = FieldValues::extract(set, &fields);
        let Some(hash) = set_fingerprint(set, &values)? else {
            return Ok(None);
        };

        match self.markers.owner(kind, &hash)? {
            Some(owner) => self.get(&EntityKey::new(kind, owner)),
            None => Ok(None),
        }
    }

    /// Iterate over every stored entity of a kind, in id order.
    pub fn scan(&self, kind: &str) -> impl Iterator<Item = Result<Document, Error>> + '_ {
        self.data_tree
            .scan_prefix(EntityKey::kind_prefix(kind))
            .map(|result| -> Result<Document, Error> {
                let (key_bytes, value_bytes) = result?;
                let key = EntityKey::decode(&key_bytes)?;
                let record = Record::from_bytes(&value_bytes)?;
                Ok(Document::loaded(key, record.fields()?))
            })
    }

    /// Count the stored entities of a kind.
    pub fn count(&self, kind: &str) -> usize {
        self.data_tree
            .scan_prefix(EntityKey::kind_prefix(kind))
            .count()
    }

    /// Bring a kind's markers back in line with its stored entities.
    ///
    /// Drops markers no entity holds, and claims the missing ones. When two
    /// entities hold the same values the one with the lower id keeps the
    /// marker and the pair is reported as a conflict.
    #[instrument(skip(self))]
    pub fn rebuild_markers(&self, kind: &str) -> Result<RebuildReport, Error> {
        let meta = self.catalog.require(kind)?;
        let mut report = RebuildReport::default();
        let mut expected: HashMap<String, u64> = HashMap::new();

        for doc in self.scan(kind) {
            let doc = doc?;
            let id = doc.id().ok_or(Error::InvalidKey)?;
            report.scanned += 1;

            for set in &meta.unique {
                let values = FieldValues::extract(set, doc.fields());
                let Some(hash) = set_fingerprint(set, &values)? else {
                    continue;
                };
                match expected.entry(hash) {
                    Entry::Vacant(slot) => {
                        slot.insert(id);
                    }
                    Entry::Occupied(slot) => report.conflicts.push(UniqueConflict {
                        fields: set.fields.clone(),
                        values: values.to_string(),
                        kept: *slot.get(),
                        duplicate: id,
                    }),
                }
            }
        }

        let existing: Vec<(String, u64)> = self.markers.entries(kind).collect::<Result<_, _>>()?;
        for (hash, owner) in existing {
            if expected.get(&hash) != Some(&owner) {
                self.markers.remove(kind, &hash)?;
                report.removed += 1;
            }
        }

        for (hash, owner) in &expected {
            if self.markers.owner(kind, hash)?.is_none() {
                self.markers.claim(kind, hash, *owner)?;
                report.restored += 1;
            }
        }

        info!(
            kind,
            scanned = report.scanned,
            restored = report.restored,
            removed = report.removed,
            conflicts = report.conflicts.len(),
            "rebuilt unique markers"
        );
        Ok(report)
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }
}
