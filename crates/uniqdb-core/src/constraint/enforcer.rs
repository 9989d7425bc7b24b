//! Save and delete hooks that keep unique markers in step with stored entities.
//!
//! A put runs in three phases:
//! - [`UniqueEnforcer::before_put`] claims markers for every changed set,
//!   consulting fixers on collisions and releasing its own claims on failure
//! - the caller writes the record
//! - [`UniqueEnforcer::after_put`] releases the markers of the values the
//!   entity no longer holds, or [`UniqueEnforcer::abort_put`] if the write failed
//!
//! Old markers are only released once the new record is durable, so a failed
//! update never leaves the stored values unprotected.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{Claim, FieldValues, FixerRegistry, UniqueMarkers};
use crate::catalog::{ModelMeta, UniqueSet};
use crate::error::{ConstraintError, Error};

/// Markers touched by one put.
#[derive(Debug)]
#[must_use = "a put plan must be finished with after_put or abort_put"]
pub struct PutPlan {
    kind: String,
    owner: u64,
    /// Markers created by this put, released again if it fails.
    claimed: Vec<String>,
    /// Markers the owner already held for the new values.
    held: Vec<String>,
    /// Markers of replaced values, released after the write.
    stale: Vec<String>,
}

impl PutPlan {
    fn new(kind: &str, owner: u64) -> Self {
        Self {
            kind: kind.to_string(),
            owner,
            claimed: Vec::new(),
            held: Vec::new(),
            stale: Vec::new(),
        }
    }

    fn record(&mut self, hash: String, claim: Claim) {
        match claim {
            Claim::Created => self.claimed.push(hash),
            Claim::AlreadyOwned => self.held.push(hash),
            Claim::Taken(_) => {}
        }
    }

    /// Fingerprints newly claimed for the new values.
    pub fn claimed(&self) -> &[String] {
        &self.claimed
    }

    /// Fingerprints of new values the owner already held.
    pub fn held(&self) -> &[String] {
        &self.held
    }

    /// Fingerprints to release once the write lands.
    pub fn stale(&self) -> &[String] {
        &self.stale
    }
}

/// Unique constraint enforcement for one store.
pub struct UniqueEnforcer<'a> {
    markers: &'a UniqueMarkers,
    fixers: &'a FixerRegistry,
    max_fix_attempts: usize,
}

impl<'a> UniqueEnforcer<'a> {
    /// Create an enforcer over the given markers and fixers.
    pub fn new(
        markers: &'a UniqueMarkers,
        fixers: &'a FixerRegistry,
        max_fix_attempts: usize,
    ) -> Self {
        Self {
            markers,
            fixers,
            max_fix_attempts,
        }
    }

    /// Claim markers for the sets whose values differ from `previous`.
    ///
    /// `previous` is the stored version of the entity, or `None` on creation.
    /// Fixers may rewrite `fields`. On error `fields` is restored, no marker
    /// held before the call is released and every marker created by it is.
    pub fn before_put(
        &self,
        meta: &ModelMeta,
        owner: u64,
        fields: &mut Map<String, Value>,
        previous: Option<&Map<String, Value>>,
    ) -> Result<PutPlan, Error> {
        let kind = meta.kind.as_str();
        let mut plan = PutPlan::new(kind, owner);
        let mut changed = Vec::new();

        for set in &meta.unique {
            if let Some(previous) = previous {
                let old = FieldValues::extract(set, previous);
                if old == FieldValues::extract(set, fields) {
                    continue;
                }
                if let Some(hash) = set_fingerprint(set, &old)? {
                    plan.stale.push(hash);
                }
            }
            changed.push(set);
        }

        let fixable = changed
            .iter()
            .any(|set| self.fixers.get(kind, &set.fields).is_some());

        let result = if fixable {
            let snapshot = fields.clone();
            let result = self.claim_each(kind, owner, &changed, fields, &mut plan);
            if result.is_err() {
                *fields = snapshot;
            }
            result
        } else {
            self.claim_batch(kind, owner, &changed, fields, &mut plan)
        };

        match result {
            Ok(()) => {
                // A fixer may land on a value the owner already holds.
                plan.stale
                    .retain(|hash| !plan.held.contains(hash) && !plan.claimed.contains(hash));
                debug!(
                    kind,
                    owner,
                    claimed = plan.claimed.len(),
                    held = plan.held.len(),
                    stale = plan.stale.len(),
                    "unique sets checked"
                );
                Ok(plan)
            }
            Err(e) => {
                plan.stale.clear();
                self.abort_put(plan)?;
                Err(e)
            }
        }
    }

    /// Release the markers of replaced values after a successful write.
    pub fn after_put(&self, plan: PutPlan) -> Result<(), Error> {
        for hash in &plan.stale {
            self.markers.release(&plan.kind, hash, plan.owner)?;
        }
        Ok(())
    }

    /// Release the markers created by a put whose write failed.
    ///
    /// Markers the owner held before the put are kept.
    pub fn abort_put(&self, plan: PutPlan) -> Result<(), Error> {
        if !plan.claimed.is_empty() {
            warn!(
                kind = %plan.kind,
                owner = plan.owner,
                claimed = plan.claimed.len(),
                "rolling back unique markers"
            );
        }
        for hash in &plan.claimed {
            self.markers.release(&plan.kind, hash, plan.owner)?;
        }
        Ok(())
    }

    /// Release every marker the given field values hold for `owner`.
    ///
    /// Returns how many markers were removed.
    pub fn release_all(
        &self,
        meta: &ModelMeta,
        owner: u64,
        fields: &Map<String, Value>,
    ) -> Result<usize, Error> {
        let mut released = 0;
        for set in &meta.unique {
            let values = FieldValues::extract(set, fields);
            if let Some(hash) = set_fingerprint(set, &values)? {
                if self.markers.release(&meta.kind, &hash, owner)? {
                    released += 1;
                }
            }
        }
        Ok(released)
    }

    /// Claim all changed sets at once. Nothing is left claimed on failure.
    fn claim_batch(
        &self,
        kind: &str,
        owner: u64,
        sets: &[&UniqueSet],
        fields: &Map<String, Value>,
        plan: &mut PutPlan,
    ) -> Result<(), Error> {
        let mut wanted = Vec::with_capacity(sets.len());
        for set in sets {
            let values = FieldValues::extract(set, fields);
            if let Some(hash) = set_fingerprint(set, &values)? {
                wanted.push((*set, values, hash));
            }
        }

        let hashes: Vec<String> = wanted.iter().map(|(_, _, hash)| hash.clone()).collect();
        let claims = self.markers.claim_all(kind, &hashes, owner)?;

        if let Some((set, values, hash)) = wanted
            .iter()
            .zip(&claims)
            .find(|(_, claim)| !claim.is_held())
            .map(|(wanted, _)| wanted)
        {
            return Err(violation(kind, set, values, hash.clone()));
        }

        for (hash, claim) in hashes.into_iter().zip(claims) {
            plan.record(hash, claim);
        }
        Ok(())
    }

    /// Claim changed sets one at a time, running fixers on collisions.
    fn claim_each(
        &self,
        kind: &str,
        owner: u64,
        sets: &[&UniqueSet],
        fields: &mut Map<String, Value>,
        plan: &mut PutPlan,
    ) -> Result<(), Error> {
        for set in sets {
            if let Some((hash, claim)) = self.claim_set(kind, owner, set, fields)? {
                plan.record(hash, claim);
            }
        }
        Ok(())
    }

    fn claim_set(
        &self,
        kind: &str,
        owner: u64,
        set: &UniqueSet,
        fields: &mut Map<String, Value>,
    ) -> Result<Option<(String, Claim)>, Error> {
        let fixer = self.fixers.get(kind, &set.fields);
        let original = FieldValues::extract(set, fields);
        let mut attempt = 0;

        loop {
            let values = FieldValues::extract(set, fields);
            let Some(hash) = set_fingerprint(set, &values)? else {
                return Ok(None);
            };

            let holder = match self.markers.claim(kind, &hash, owner)? {
                Claim::Taken(holder) => holder,
                claim => return Ok(Some((hash, claim))),
            };

            let Some(fixer) = &fixer else {
                return Err(violation(kind, set, &values, hash));
            };
            if attempt >= self.max_fix_attempts {
                return Err(ConstraintError::FixAttemptsExhausted {
                    kind: kind.to_string(),
                    fields: set.fields.clone(),
                    attempts: attempt,
                }
                .into());
            }
            if !fixer.fix(attempt, &original, fields) {
                return Err(violation(kind, set, &values, hash));
            }

            warn!(kind, owner, holder, attempt, set = %set, "unique collision, retrying after fix");
            attempt += 1;
        }
    }
}

/// Fingerprint of a set's values, or `None` when the set does not constrain them.
pub(crate) fn set_fingerprint(
    set: &UniqueSet,
    values: &FieldValues,
) -> Result<Option<String>, Error> {
    if set.nulls_distinct && values.has_null() {
        return Ok(None);
    }
    values.fingerprint().map(Some)
}

fn violation(kind: &str, set: &UniqueSet, values: &FieldValues, hash: String) -> Error {
    ConstraintError::UniqueViolation {
        kind: kind.to_string(),
        fields: set.fields.clone(),
        values: values.to_string(),
        hash,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::constraint::SuffixFixer;
    use serde_json::json;

    struct Env {
        markers: UniqueMarkers,
        fixers: FixerRegistry,
    }

    impl Env {
        fn new() -> Self {
            let db = sled::Config::new().temporary(true).open().unwrap();
            Self {
                markers: UniqueMarkers::open(&db).unwrap(),
                fixers: FixerRegistry::new(),
            }
        }

        fn enforcer(&self, attempts: usize) -> UniqueEnforcer<'_> {
            UniqueEnforcer::new(&self.markers, &self.fixers, attempts)
        }
    }

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn user_meta() -> ModelMeta {
        ModelMeta::new("User")
            .unique(["email"])
            .unique(["first_name", "last_name"])
    }

    #[test]
    fn test_creation_claims_every_set() {
        let env = Env::new();
        let enforcer = env.enforcer(10);
        let mut doc = fields(json!({"email": "a@x", "first_name": "A", "last_name": "B"}));

        let plan = enforcer.before_put(&user_meta(), 1, &mut doc, None).unwrap();
        assert_eq!(plan.claimed().len(), 2);
        assert!(plan.stale().is_empty());
        enforcer.after_put(plan).unwrap();

        assert_eq!(env.markers.count("User"), 2);
    }

    #[test]
    fn test_collision_rolls_back_other_sets() {
        let env = Env::new();
        let enforcer = env.enforcer(10);
        let meta = user_meta();

        let mut first = fields(json!({"email": "a@x", "first_name": "A", "last_name": "B"}));
        let plan = enforcer.before_put(&meta, 1, &mut first, None).unwrap();
        enforcer.after_put(plan).unwrap();

        // New email, same name: the email marker must not survive the failure.
        let mut second = fields(json!({"email": "b@x", "first_name": "A", "last_name": "B"}));
        let err = enforcer.before_put(&meta, 2, &mut second, None).unwrap_err();

        match err {
            Error::ConstraintViolation(ConstraintError::UniqueViolation { fields, values, .. }) => {
                assert_eq!(fields, vec!["first_name".to_string(), "last_name".to_string()]);
                assert_eq!(values, r#"first_name="A", last_name="B""#);
            }
            other => panic!("expected UniqueViolation, got {other:?}"),
        }
        assert_eq!(env.markers.count("User"), 2);
    }

    #[test]
    fn test_update_skips_unchanged_sets() {
        let env = Env::new();
        let enforcer = env.enforcer(10);
        let meta = user_meta();
        let stored = fields(json!({"email": "a@x", "first_name": "A", "last_name": "B", "age": 1}));

        let mut updated = stored.clone();
        updated.insert("age".to_string(), json!(2));
        let plan = enforcer.before_put(&meta, 1, &mut updated, Some(&stored)).unwrap();

        assert!(plan.claimed().is_empty());
        assert!(plan.stale().is_empty());
        enforcer.after_put(plan).unwrap();
    }

    #[test]
    fn test_update_releases_old_value_after_write() {
        let env = Env::new();
        let enforcer = env.enforcer(10);
        let meta = ModelMeta::new("User").unique(["email"]);

        let mut stored = fields(json!({"email": "old@x"}));
        let plan = enforcer.before_put(&meta, 1, &mut stored, None).unwrap();
        let old_hash = plan.claimed()[0].clone();
        enforcer.after_put(plan).unwrap();

        let mut updated = fields(json!({"email": "new@x"}));
        let plan = enforcer.before_put(&meta, 1, &mut updated, Some(&stored)).unwrap();
        assert_eq!(plan.stale(), &[old_hash.clone()]);
        // Both held until the write lands.
        assert_eq!(env.markers.count("User"), 2);

        enforcer.after_put(plan).unwrap();
        assert_eq!(env.markers.count("User"), 1);
        assert_eq!(env.markers.owner("User", &old_hash).unwrap(), None);
    }

    #[test]
    fn test_abort_put_releases_claims() {
        let env = Env::new();
        let enforcer = env.enforcer(10);
        let mut doc = fields(json!({"email": "a@x", "first_name": "A", "last_name": "B"}));

        let plan = enforcer.before_put(&user_meta(), 1, &mut doc, None).unwrap();
        enforcer.abort_put(plan).unwrap();

        assert!(env.markers.is_empty());
    }

    #[test]
    fn test_nulls_distinct_skips_set() {
        let env = Env::new();
        let enforcer = env.enforcer(10);
        let meta = ModelMeta::new("User")
            .with_unique_set(UniqueSet::new(["phone"]).nulls_distinct(true));

        for owner in 1..=3 {
            let mut doc = fields(json!({"name": "no phone"}));
            let plan = enforcer.before_put(&meta, owner, &mut doc, None).unwrap();
            enforcer.after_put(plan).unwrap();
        }
        assert!(env.markers.is_empty());
    }

    #[test]
    fn test_nulls_equal_by_default() {
        let env = Env::new();
        let enforcer = env.enforcer(10);
        let meta = ModelMeta::new("User").unique(["phone"]);

        let mut first = fields(json!({}));
        let plan = enforcer.before_put(&meta, 1, &mut first, None).unwrap();
        enforcer.after_put(plan).unwrap();

        let mut second = fields(json!({"phone": null}));
        let err = enforcer.before_put(&meta, 2, &mut second, None).unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn test_fixer_resolves_collision() {
        let env = Env::new();
        env.fixers.register(
            "Post",
            vec!["slug".to_string()],
            Arc::new(SuffixFixer::new("slug")),
        );
        let enforcer = env.enforcer(10);
        let meta = ModelMeta::new("Post").unique(["slug"]);

        for owner in 1..=3 {
            let mut doc = fields(json!({"slug": "hello"}));
            let plan = enforcer.before_put(&meta, owner, &mut doc, None).unwrap();
            enforcer.after_put(plan).unwrap();

            let expected = match owner {
                1 => "hello",
                2 => "hello-2",
                _ => "hello-3",
            };
            assert_eq!(doc["slug"], json!(expected));
        }
    }

    #[test]
    fn test_fixer_attempts_exhausted() {
        let env = Env::new();
        // A fixer that never changes anything.
        let stubborn = |_: usize, _: &FieldValues, _: &mut Map<String, Value>| true;
        env.fixers
            .register("Post", vec!["slug".to_string()], Arc::new(stubborn));
        let enforcer = env.enforcer(3);
        let meta = ModelMeta::new("Post").unique(["slug"]);

        let mut first = fields(json!({"slug": "x"}));
        let plan = enforcer.before_put(&meta, 1, &mut first, None).unwrap();
        enforcer.after_put(plan).unwrap();

        let mut second = fields(json!({"slug": "x"}));
        let err = enforcer.before_put(&meta, 2, &mut second, None).unwrap_err();
        assert!(matches!(
            err,
            Error::ConstraintViolation(ConstraintError::FixAttemptsExhausted { attempts: 3, .. })
        ));
    }

    #[test]
    fn test_fixer_landing_on_held_value_keeps_marker() {
        let env = Env::new();
        env.fixers.register(
            "Post",
            vec!["slug".to_string()],
            Arc::new(SuffixFixer::new("slug")),
        );
        let enforcer = env.enforcer(10);
        let meta = ModelMeta::new("Post").unique(["slug"]);

        let mut first = fields(json!({"slug": "hello"}));
        let plan = enforcer.before_put(&meta, 1, &mut first, None).unwrap();
        enforcer.after_put(plan).unwrap();

        let mut stored = fields(json!({"slug": "hello"}));
        let plan = enforcer.before_put(&meta, 2, &mut stored, None).unwrap();
        enforcer.after_put(plan).unwrap();
        assert_eq!(stored["slug"], json!("hello-2"));

        // Asking for "hello" again is fixed back to the value entity 2 holds.
        for finish_with_write in [false, true] {
            let mut updated = fields(json!({"slug": "hello"}));
            let plan = enforcer
                .before_put(&meta, 2, &mut updated, Some(&stored))
                .unwrap();
            assert_eq!(updated["slug"], json!("hello-2"));
            assert!(plan.claimed().is_empty());
            assert!(plan.stale().is_empty());
            let held = plan.held()[0].clone();

            if finish_with_write {
                enforcer.after_put(plan).unwrap();
            } else {
                enforcer.abort_put(plan).unwrap();
            }
            assert_eq!(env.markers.owner("Post", &held).unwrap(), Some(2));
            assert_eq!(env.markers.count("Post"), 2);
        }
    }

    #[test]
    fn test_failed_fix_restores_fields() {
        let env = Env::new();
        env.fixers.register(
            "Post",
            vec!["slug".to_string()],
            Arc::new(SuffixFixer::new("slug")),
        );
        let enforcer = env.enforcer(1);
        let meta = ModelMeta::new("Post").unique(["slug"]);

        for (owner, slug) in [(1, "x"), (2, "x-2")] {
            let mut doc = fields(json!({"slug": slug}));
            let plan = enforcer.before_put(&meta, owner, &mut doc, None).unwrap();
            enforcer.after_put(plan).unwrap();
        }

        let mut doc = fields(json!({"slug": "x", "title": "t"}));
        let err = enforcer.before_put(&meta, 3, &mut doc, None).unwrap_err();
        assert!(matches!(
            err,
            Error::ConstraintViolation(ConstraintError::FixAttemptsExhausted { .. })
        ));
        assert_eq!(doc, fields(json!({"slug": "x", "title": "t"})));
        assert_eq!(env.markers.count("Post"), 2);
    }

    #[test]
    fn test_release_all_only_own_markers() {
        let env = Env::new();
        let enforcer = env.enforcer(10);
        let meta = ModelMeta::new("User").unique(["email"]);

        let mut doc = fields(json!({"email": "a@x"}));
        let plan = enforcer.before_put(&meta, 1, &mut doc, None).unwrap();
        enforcer.after_put(plan).unwrap();

        assert_eq!(enforcer.release_all(&meta, 2, &doc).unwrap(), 0);
        assert_eq!(enforcer.release_all(&meta, 1, &doc).unwrap(), 1);
        assert!(env.markers.is_empty());
    }
}
