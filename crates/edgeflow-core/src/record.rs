//! The record type flowing through the pipeline

use crate::Value;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// IndexMap with FxBuildHasher: insertion-ordered with fast string hashing.
pub type FxIndexMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// Ordered record metadata. Classifiers append derived fields; the insertion
/// order is preserved on the wire.
pub type Metadata = FxIndexMap<String, Value>;

/// A unit of data moving through stages, the publisher and the dispatcher.
///
/// The topic doubles as the stream name for dispatched records. The payload
/// is opaque binary data shared by reference: cloning a record bumps a
/// refcount instead of copying the bytes, so a stage that must mutate payload
/// bytes has to copy them out first (`Bytes::to_vec`).
///
/// The payload is excluded from the serde representation; on the wire it
/// travels as its own raw message part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Topic (publish partition key) or stream name (dispatch key).
    pub topic: Arc<str>,
    /// Ingest timestamp, defaulting to server time.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Mutable, insertion-ordered metadata.
    pub metadata: Metadata,
    /// Opaque payload, shared by reference.
    #[serde(skip, default)]
    pub payload: Bytes,
}

impl Record {
    pub fn new(topic: impl Into<Arc<str>>) -> Self {
        Self {
            topic: topic.into(),
            timestamp: Utc::now(),
            metadata: IndexMap::with_hasher(FxBuildHasher),
            payload: Bytes::new(),
        }
    }

    /// Creates a record from a pre-built metadata map (e.g. decoded input).
    pub fn from_metadata(topic: impl Into<Arc<str>>, metadata: Metadata) -> Self {
        Self {
            topic: topic.into(),
            timestamp: Utc::now(),
            metadata,
            payload: Bytes::new(),
        }
    }

    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = ts;
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Inserts or replaces a metadata field in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.metadata.get(key).and_then(|v| v.as_int())
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(|v| v.as_float())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.metadata.get(key).and_then(|v| v.as_bool())
    }
}
