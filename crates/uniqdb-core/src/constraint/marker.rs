//! Marker entries that reserve unique value combinations.
//!
//! Each marker maps a fingerprint of a unique set's values to the id of the
//! entity holding them. A combination is taken exactly when its marker exists.

use sled::transaction::{ConflictableTransactionResult, TransactionError};
use sled::{IVec, Tree};
use tracing::{debug, warn};

use crate::error::Error;

/// Tree name for unique markers.
pub const MARKER_TREE: &str = "index:unique";

/// Outcome of claiming a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The marker did not exist and now belongs to the claimant.
    Created,
    /// The claimant already held the marker.
    AlreadyOwned,
    /// Another entity holds the marker.
    Taken(u64),
}

impl Claim {
    /// Whether the claimant holds the marker after the claim.
    pub fn is_held(self) -> bool {
        !matches!(self, Claim::Taken(_))
    }
}

/// Store of unique markers.
///
/// Key format: `kind\0fingerprint` -> `owner_id (8 bytes, big-endian)`
pub struct UniqueMarkers {
    tree: Tree,
}

impl UniqueMarkers {
    /// Create a marker store backed by the given tree.
    pub fn new(tree: Tree) -> Self {
        Self { tree }
    }

    /// Open or create the marker store from a sled database.
    pub fn open(db: &sled::Db) -> Result<Self, Error> {
        let tree = db.open_tree(MARKER_TREE)?;
        Ok(Self { tree })
    }

    fn build_key(kind: &str, hash: &str) -> Vec<u8> {
        let mut key = Self::kind_prefix(kind);
        key.extend_from_slice(hash.as_bytes());
        key
    }

    fn kind_prefix(kind: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(kind.len() + 1);
        prefix.extend_from_slice(kind.as_bytes());
        prefix.push(0);
        prefix
    }

    fn decode_owner(bytes: &[u8]) -> Result<u64, Error> {
        let buf: [u8; 8] = bytes.try_into().map_err(|_| Error::InvalidKey)?;
        Ok(u64::from_be_bytes(buf))
    }

    /// Claim the marker for `hash` on behalf of `owner`.
    ///
    /// The read and the insert run in one transaction, so of several concurrent
    /// claimants exactly one sees `Created`.
    pub fn claim(&self, kind: &str, hash: &str, owner: u64) -> Result<Claim, Error> {
        let key = Self::build_key(kind, hash);
        let owner_bytes = owner.to_be_bytes();

        let existing = self
            .tree
            .transaction(|tx| -> ConflictableTransactionResult<Option<IVec>> {
                let existing = tx.get(&key)?;
                if existing.is_none() {
                    tx.insert(key.as_slice(), &owner_bytes[..])?;
                }
                Ok(existing)
            })
            .map_err(transaction_error)?;

        let claim = match existing {
            None => Claim::Created,
            Some(bytes) => {
                let holder = Self::decode_owner(&bytes)?;
                if holder == owner {
                    Claim::AlreadyOwned
                } else {
                    Claim::Taken(holder)
                }
            }
        };
        debug!(kind, hash, owner, ?claim, "claimed unique marker");
        Ok(claim)
    }

    /// Claim several markers for one owner.
    ///
    /// Each marker is claimed in its own transaction and the outcome of each
    /// is returned in order. If any is taken, every marker created by this
    /// call is released again.
    pub fn claim_all(
        &self,
        kind: &str,
        hashes: &[String],
        owner: u64,
    ) -> Result<Vec<Claim>, Error> {
        let mut claims = Vec::with_capacity(hashes.len());

        for hash in hashes {
            match self.claim(kind, hash, owner) {
                Ok(claim) => claims.push(claim),
                Err(e) => {
                    self.rollback(kind, hashes, &claims, owner)?;
                    return Err(e);
                }
            }
        }

        if claims.iter().any(|claim| !claim.is_held()) {
            warn!(kind, owner, "rolling back partial marker claim");
            self.rollback(kind, hashes, &claims, owner)?;
        }

        Ok(claims)
    }

    /// Release the marker for `hash` if `owner` holds it.
    ///
    /// Returns whether a marker was removed.
    pub fn release(&self, kind: &str, hash: &str, owner: u64) -> Result<bool, Error> {
        let key = Self::build_key(kind, hash);
        let owner_bytes = owner.to_be_bytes();

        let released = self
            .tree
            .compare_and_swap(&key, Some(&owner_bytes[..]), None::<IVec>)?
            .is_ok();
        debug!(kind, hash, owner, released, "released unique marker");
        Ok(released)
    }

    /// Release the markers a partial `claim_all` created.
    fn rollback(
        &self,
        kind: &str,
        hashes: &[String],
        claims: &[Claim],
        owner: u64,
    ) -> Result<(), Error> {
        for (hash, claim) in hashes.iter().zip(claims) {
            if *claim == Claim::Created {
                self.release(kind, hash, owner)?;
            }
        }
        Ok(())
    }

    /// Remove a marker regardless of owner.
    pub fn remove(&self, kind: &str, hash: &str) -> Result<(), Error> {
        self.tree.remove(Self::build_key(kind, hash))?;
        Ok(())
    }

    /// Look up the owner of a marker.
    pub fn owner(&self, kind: &str, hash: &str) -> Result<Option<u64>, Error> {
        match self.tree.get(Self::build_key(kind, hash))? {
            Some(bytes) => Ok(Some(Self::decode_owner(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Iterate over `(fingerprint, owner)` for every marker of a kind.
    pub fn entries(
        &self,
        kind: &str,
    ) -> impl Iterator<Item = Result<(String, u64), Error>> + '_ {
        let prefix = Self::kind_prefix(kind);
        let prefix_len = prefix.len();

        self.tree.scan_prefix(prefix).map(move |result| {
            let (key, value) = result?;
            let hash = std::str::from_utf8(&key[prefix_len..])
                .map_err(|_| Error::InvalidKey)?
                .to_string();
            Ok((hash, Self::decode_owner(&value)?))
        })
    }

    /// Count the markers of a kind.
    pub fn count(&self, kind: &str) -> usize {
        self.tree.scan_prefix(Self::kind_prefix(kind)).count()
    }

    /// Flush the markers to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.tree.flush()?;
        Ok(())
    }

    /// Get the number of markers across all kinds.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Check if there are no markers.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

fn transaction_error(e: TransactionError<()>) -> Error {
    match e {
        TransactionError::Storage(e) => Error::Storage(e),
        TransactionError::Abort(()) => Error::Transaction("marker claim aborted".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_markers() -> UniqueMarkers {
        let db = sled::Config::new().temporary(true).open().unwrap();
        UniqueMarkers::open(&db).unwrap()
    }

    #[test]
    fn test_claim_and_owner() {
        let markers = test_markers();

        assert_eq!(markers.claim("User", "abc", 1).unwrap(), Claim::Created);
        assert_eq!(markers.owner("User", "abc").unwrap(), Some(1));
        assert_eq!(markers.owner("User", "def").unwrap(), None);
    }

    #[test]
    fn test_claim_taken_and_reclaim() {
        let markers = test_markers();

        markers.claim("User", "abc", 1).unwrap();
        assert_eq!(markers.claim("User", "abc", 2).unwrap(), Claim::Taken(1));
        assert_eq!(markers.claim("User", "abc", 1).unwrap(), Claim::AlreadyOwned);
        assert!(!Claim::Taken(1).is_held());
        assert!(Claim::AlreadyOwned.is_held());
    }

    #[test]
    fn test_kinds_are_separate() {
        let markers = test_markers();

        markers.claim("User", "abc", 1).unwrap();
        assert_eq!(markers.claim("Post", "abc", 2).unwrap(), Claim::Created);
        assert_eq!(markers.count("User"), 1);
        assert_eq!(markers.count("Post"), 1);
        assert_eq!(markers.len(), 2);
    }

    #[test]
    fn test_release_requires_owner() {
        let markers = test_markers();

        markers.claim("User", "abc", 1).unwrap();
        assert!(!markers.release("User", "abc", 2).unwrap());
        assert_eq!(markers.owner("User", "abc").unwrap(), Some(1));

        assert!(markers.release("User", "abc", 1).unwrap());
        assert_eq!(markers.owner("User", "abc").unwrap(), None);
        assert!(!markers.release("User", "abc", 1).unwrap());
    }

    #[test]
    fn test_claim_all_success() {
        let markers = test_markers();
        let hashes = vec!["a".to_string(), "b".to_string()];

        let claims = markers.claim_all("User", &hashes, 7).unwrap();
        assert_eq!(claims, vec![Claim::Created, Claim::Created]);
        assert_eq!(markers.count("User"), 2);
    }

    #[test]
    fn test_claim_all_rolls_back() {
        let markers = test_markers();
        markers.claim("User", "b", 1).unwrap();

        let hashes = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let claims = markers.claim_all("User", &hashes, 2).unwrap();

        assert_eq!(claims, vec![Claim::Created, Claim::Taken(1), Claim::Created]);
        assert_eq!(markers.owner("User", "a").unwrap(), None);
        assert_eq!(markers.owner("User", "c").unwrap(), None);
        assert_eq!(markers.owner("User", "b").unwrap(), Some(1));
    }

    #[test]
    fn test_claim_all_keeps_previously_owned() {
        let markers = test_markers();
        markers.claim("User", "a", 2).unwrap();
        markers.claim("User", "b", 1).unwrap();

        let hashes = vec!["a".to_string(), "b".to_string()];
        let claims = markers.claim_all("User", &hashes, 2).unwrap();

        assert_eq!(claims, vec![Claim::AlreadyOwned, Claim::Taken(1)]);
        // "a" was held before the call, so the rollback leaves it alone.
        assert_eq!(markers.owner("User", "a").unwrap(), Some(2));
    }

    #[test]
    fn test_entries() {
        let markers = test_markers();
        markers.claim("User", "a", 1).unwrap();
        markers.claim("User", "b", 2).unwrap();
        markers.claim("Userx", "c", 3).unwrap();

        let entries: Vec<_> = markers.entries("User").collect::<Result<_, _>>().unwrap();
        assert_eq!(entries, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }
}
