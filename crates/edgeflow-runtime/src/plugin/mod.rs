//! Pluggable per-record processing units
//!
//! A plugin is a named unit of filter or classification logic resolved
//! through the [`PluginRegistry`]. The worker-pool mechanics (queue take,
//! cancellation, draining) live in the stage; a plugin is a pure per-record
//! function, which keeps the contract narrow and the concurrency code in one
//! place.

pub mod builtin;
pub mod registry;

pub use registry::PluginRegistry;

use edgeflow_core::{FxIndexMap, Record, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Configuration mapping handed to a plugin factory.
pub type PluginConfig = FxIndexMap<String, Value>;

/// A filter decides per record whether to forward it.
///
/// `Ok(None)` drops the record; `Ok(Some(_))` forwards it, unchanged or
/// modified. Errors are recovered by the owning stage: the record is dropped
/// and the worker continues.
pub trait Filter: Send + Sync {
    fn process(&self, record: Record) -> Result<Option<Record>, PluginError>;
}

/// A classifier annotates every record with derived metadata and forwards it.
pub trait Classifier: Send + Sync {
    fn classify(&self, record: Record) -> Result<Record, PluginError>;
}

/// The two plugin capabilities a stage can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Filter,
    Classifier,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginKind::Filter => write!(f, "filter"),
            PluginKind::Classifier => write!(f, "classifier"),
        }
    }
}

/// A constructed plugin instance, ready to run inside a stage.
#[derive(Clone)]
pub enum PluginUnit {
    Filter(Arc<dyn Filter>),
    Classifier(Arc<dyn Classifier>),
}

impl PluginUnit {
    pub fn kind(&self) -> PluginKind {
        match self {
            PluginUnit::Filter(_) => PluginKind::Filter,
            PluginUnit::Classifier(_) => PluginKind::Classifier,
        }
    }

    /// Applies the plugin to one record under the shared drop/forward
    /// contract: filters may return `None`, classifiers always forward.
    pub fn apply(&self, record: Record) -> Result<Option<Record>, PluginError> {
        match self {
            PluginUnit::Filter(f) => f.process(record),
            PluginUnit::Classifier(c) => c.classify(record).map(Some),
        }
    }
}

impl fmt::Debug for PluginUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PluginUnit").field(&self.kind()).finish()
    }
}

/// Plugin resolution, construction and processing errors.
///
/// The first three variants are configuration errors: fatal at stage
/// startup, impossible once processing has started. `Process` is the only
/// variant a running worker ever sees, and it is recovered per record.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// No implementation is registered under the requested name.
    #[error("no plugin registered under name '{0}'")]
    NotFound(String),

    /// The name resolves to a plugin of the other capability.
    #[error("plugin '{name}' is registered as a {actual}, not a {expected}")]
    KindMismatch {
        name: String,
        expected: PluginKind,
        actual: PluginKind,
    },

    /// The supplied configuration lacks a key the plugin declared required.
    #[error("plugin '{plugin}' configuration is missing required key '{key}'")]
    MissingConfigKey { plugin: String, key: String },

    /// The factory rejected the configuration.
    #[error("plugin '{plugin}' construction failed: {reason}")]
    Construction { plugin: String, reason: String },

    /// Per-record processing failure, recovered by the stage.
    #[error("record processing failed: {0}")]
    Process(String),
}

impl PluginError {
    /// Shorthand for per-record failures inside plugin implementations.
    pub fn process(reason: impl Into<String>) -> Self {
        PluginError::Process(reason.into())
    }
}
