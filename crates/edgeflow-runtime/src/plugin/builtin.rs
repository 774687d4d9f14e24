//! Stock plugins registered by `PluginRegistry::with_builtins`
//!
//! These are the units a fresh deployment starts from: a key-frame filter
//! that forwards only flagged frames, a pass-through filter, and a
//! detection-count classifier summarizing defect annotations.

use super::{Classifier, Filter, PluginConfig, PluginError, PluginRegistry};
use edgeflow_core::{Record, Value};
use std::sync::Arc;

const DEFAULT_FLAG_KEY: &str = "key_frame";

/// Forwards only records whose flag field is truthy.
///
/// Declares `max_workers` as required so existing deployment configurations
/// written against the historical filter contract keep validating.
pub struct KeyFrameFilter {
    flag_key: String,
}

impl KeyFrameFilter {
    pub fn from_config(config: &PluginConfig) -> Self {
        let flag_key = config
            .get("flag_key")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_FLAG_KEY)
            .to_string();
        Self { flag_key }
    }
}

impl Filter for KeyFrameFilter {
    fn process(&self, record: Record) -> Result<Option<Record>, PluginError> {
        let keep = record
            .get(&self.flag_key)
            .map(Value::is_truthy)
            .unwrap_or(false);
        Ok(keep.then_some(record))
    }
}

/// Forwards every record unchanged.
pub struct NoOpFilter;

impl Filter for NoOpFilter {
    fn process(&self, record: Record) -> Result<Option<Record>, PluginError> {
        Ok(Some(record))
    }
}

/// Counts entries in the `defects` metadata array and records the total
/// under `detection_count`.
pub struct DetectionCountClassifier;

impl Classifier for DetectionCountClassifier {
    fn classify(&self, mut record: Record) -> Result<Record, PluginError> {
        let count = record
            .get("defects")
            .and_then(Value::as_array)
            .map(<[Value]>::len)
            .unwrap_or(0);
        record.set("detection_count", count);
        Ok(record)
    }
}

/// Registers the stock plugins.
pub fn register(registry: &mut PluginRegistry) {
    registry.register_filter("key_frame", &["max_workers"], |config| {
        Ok(Arc::new(KeyFrameFilter::from_config(config)) as Arc<dyn Filter>)
    });
    registry.register_filter("no_op", &[], |_| Ok(Arc::new(NoOpFilter) as Arc<dyn Filter>));
    registry.register_classifier("detection_count", &["max_workers"], |_| {
        Ok(Arc::new(DetectionCountClassifier) as Arc<dyn Classifier>)
    });
}
