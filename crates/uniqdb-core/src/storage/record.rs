//! Record type for stored entities.

use rkyv::{Archive, Deserialize, Serialize};
use serde_json::{Map, Value};

use super::key::current_timestamp;
use crate::error::Error;

/// A stored entity with metadata.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct Record {
    /// JSON-encoded field map.
    pub data: Vec<u8>,

    /// Creation timestamp in microseconds since Unix epoch.
    pub created_at: u64,

    /// Last write timestamp in microseconds since Unix epoch.
    pub updated_at: u64,
}

impl Record {
    /// Create a new record from a field map, stamped with the current time.
    pub fn new(fields: &Map<String, Value>) -> Result<Self, Error> {
        let now = current_timestamp();
        Ok(Self {
            data: serde_json::to_vec(fields)?,
            created_at: now,
            updated_at: now,
        })
    }

    /// Build the next version of this record, keeping its creation time.
    pub fn updated(&self, fields: &Map<String, Value>) -> Result<Self, Error> {
        Ok(Self {
            data: serde_json::to_vec(fields)?,
            created_at: self.created_at,
            updated_at: current_timestamp(),
        })
    }

    /// Decode the field map.
    pub fn fields(&self) -> Result<Map<String, Value>, Error> {
        Ok(serde_json::from_slice(&self.data)?)
    }

    /// Serialize the record to bytes using rkyv.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a record from bytes using rkyv.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}
