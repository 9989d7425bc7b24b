//! Entity key encoding.

use std::fmt;

use crate::error::Error;

/// Size of the entity id in bytes.
pub const ID_SIZE: usize = 8;

/// Key of a stored entity: its kind and numeric id.
///
/// Key format: `[kind bytes][0x00][id (8 bytes, big-endian)]`
///
/// Big-endian ids keep a prefix scan over one kind in id order.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    /// Model kind.
    pub kind: String,

    /// Entity id within the kind.
    pub id: u64,
}

impl EntityKey {
    /// Create a new entity key.
    pub fn new(kind: impl Into<String>, id: u64) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }

    /// Encode the key to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Self::kind_prefix(&self.kind);
        buf.extend_from_slice(&self.id.to_be_bytes());
        buf
    }

    /// Decode a key from bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < ID_SIZE + 2 {
            return Err(Error::InvalidKey);
        }
        let (head, id_bytes) = bytes.split_at(bytes.len() - ID_SIZE);
        let (kind, sep) = head.split_at(head.len() - 1);
        if sep[0] != 0 {
            return Err(Error::InvalidKey);
        }

        let kind = std::str::from_utf8(kind).map_err(|_| Error::InvalidKey)?;
        let mut buf = [0u8; ID_SIZE];
        buf.copy_from_slice(id_bytes);

        Ok(Self::new(kind, u64::from_be_bytes(buf)))
    }

    /// Get the prefix for scanning all entities of a kind.
    pub fn kind_prefix(kind: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(kind.len() + 1 + ID_SIZE);
        prefix.extend_from_slice(kind.as_bytes());
        prefix.push(0);
        prefix
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl fmt::Debug for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityKey({})", self)
    }
}

/// Get current timestamp in microseconds since Unix epoch.
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
