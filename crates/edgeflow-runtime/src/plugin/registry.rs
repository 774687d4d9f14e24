//! Explicit name-to-factory plugin registry
//!
//! Plugins are registered at process initialization; loading is a mapping
//! lookup plus a required-key validation pass. No runtime introspection.

use super::{builtin, Classifier, Filter, PluginConfig, PluginError, PluginKind, PluginUnit};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::debug;

type FilterFactory = Box<dyn Fn(&PluginConfig) -> Result<Arc<dyn Filter>, PluginError> + Send + Sync>;
type ClassifierFactory =
    Box<dyn Fn(&PluginConfig) -> Result<Arc<dyn Classifier>, PluginError> + Send + Sync>;

struct Entry<F> {
    required_keys: Vec<String>,
    factory: F,
}

/// Registry of available filters and classifiers.
pub struct PluginRegistry {
    filters: IndexMap<String, Entry<FilterFactory>>,
    classifiers: IndexMap<String, Entry<ClassifierFactory>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            filters: IndexMap::new(),
            classifiers: IndexMap::new(),
        }
    }

    /// A registry pre-populated with the stock plugins from
    /// [`builtin`](super::builtin).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register(&mut registry);
        registry
    }

    pub fn register_filter<F>(&mut self, name: &str, required_keys: &[&str], factory: F)
    where
        F: Fn(&PluginConfig) -> Result<Arc<dyn Filter>, PluginError> + Send + Sync + 'static,
    {
        debug!(plugin = name, kind = %PluginKind::Filter, "plugin registered");
        self.filters.insert(
            name.to_string(),
            Entry {
                required_keys: required_keys.iter().map(|k| k.to_string()).collect(),
                factory: Box::new(factory),
            },
        );
    }

    pub fn register_classifier<F>(&mut self, name: &str, required_keys: &[&str], factory: F)
    where
        F: Fn(&PluginConfig) -> Result<Arc<dyn Classifier>, PluginError> + Send + Sync + 'static,
    {
        debug!(plugin = name, kind = %PluginKind::Classifier, "plugin registered");
        self.classifiers.insert(
            name.to_string(),
            Entry {
                required_keys: required_keys.iter().map(|k| k.to_string()).collect(),
                factory: Box::new(factory),
            },
        );
    }

    pub fn contains(&self, kind: PluginKind, name: &str) -> bool {
        match kind {
            PluginKind::Filter => self.filters.contains_key(name),
            PluginKind::Classifier => self.classifiers.contains_key(name),
        }
    }

    /// Registered names for one capability, in registration order.
    pub fn names(&self, kind: PluginKind) -> Vec<&str> {
        match kind {
            PluginKind::Filter => self.filters.keys().map(String::as_str).collect(),
            PluginKind::Classifier => self.classifiers.keys().map(String::as_str).collect(),
        }
    }

    /// Resolves `name` to a constructed plugin instance.
    ///
    /// Fails with [`PluginError::NotFound`] for an unknown name,
    /// [`PluginError::KindMismatch`] when the name is registered under the
    /// other capability, and [`PluginError::MissingConfigKey`] naming the
    /// first declared key absent from `config`.
    pub fn load(
        &self,
        kind: PluginKind,
        name: &str,
        config: &PluginConfig,
    ) -> Result<PluginUnit, PluginError> {
        match kind {
            PluginKind::Filter => {
                let entry = self.filters.get(name).ok_or_else(|| {
                    if self.classifiers.contains_key(name) {
                        PluginError::KindMismatch {
                            name: name.to_string(),
                            expected: PluginKind::Filter,
                            actual: PluginKind::Classifier,
                        }
                    } else {
                        PluginError::NotFound(name.to_string())
                    }
                })?;
                validate_keys(name, &entry.required_keys, config)?;
                (entry.factory)(config).map(PluginUnit::Filter)
            }
            PluginKind::Classifier => {
                let entry = self.classifiers.get(name).ok_or_else(|| {
                    if self.filters.contains_key(name) {
                        PluginError::KindMismatch {
                            name: name.to_string(),
                            expected: PluginKind::Classifier,
                            actual: PluginKind::Filter,
                        }
                    } else {
                        PluginError::NotFound(name.to_string())
                    }
                })?;
                validate_keys(name, &entry.required_keys, config)?;
                (entry.factory)(config).map(PluginUnit::Classifier)
            }
        }
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn validate_keys(
    plugin: &str,
    required: &[String],
    config: &PluginConfig,
) -> Result<(), PluginError> {
    for key in required {
        if !config.contains_key(key) {
            return Err(PluginError::MissingConfigKey {
                plugin: plugin.to_string(),
                key: key.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgeflow_core::{Record, Value};

    fn config(entries: &[(&str, Value)]) -> PluginConfig {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn unknown_name_is_not_found() {
        let registry = PluginRegistry::with_builtins();
        let err = registry
            .load(PluginKind::Filter, "does_not_exist", &PluginConfig::default())
            .unwrap_err();
        assert!(matches!(err, PluginError::NotFound(name) if name == "does_not_exist"));
    }

    #[test]
    fn wrong_capability_is_kind_mismatch() {
        let registry = PluginRegistry::with_builtins();
        let err = registry
            .load(
                PluginKind::Classifier,
                "key_frame",
                &config(&[("max_workers", Value::Int(4))]),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            PluginError::KindMismatch {
                expected: PluginKind::Classifier,
                actual: PluginKind::Filter,
                ..
            }
        ));
    }

    #[test]
    fn missing_required_key_names_the_key() {
        let registry = PluginRegistry::with_builtins();
        let err = registry
            .load(PluginKind::Filter, "key_frame", &PluginConfig::default())
            .unwrap_err();
        match err {
            PluginError::MissingConfigKey { plugin, key } => {
                assert_eq!(plugin, "key_frame");
                assert_eq!(key, "max_workers");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn loaded_filter_applies_its_logic() {
        let registry = PluginRegistry::with_builtins();
        let unit = registry
            .load(
                PluginKind::Filter,
                "key_frame",
                &config(&[("max_workers", Value::Int(4))]),
            )
            .unwrap();

        let key = Record::new("camera1").with_field("key_frame", true);
        let skip = Record::new("camera1").with_field("key_frame", false);
        assert!(unit.apply(key).unwrap().is_some());
        assert!(unit.apply(skip).unwrap().is_none());
    }

    #[test]
    fn custom_registration_shadows_nothing() {
        let mut registry = PluginRegistry::new();
        registry.register_filter("pass", &[], |_| {
            Ok(Arc::new(builtin::NoOpFilter) as Arc<dyn Filter>)
        });
        assert!(registry.contains(PluginKind::Filter, "pass"));
        assert_eq!(registry.names(PluginKind::Filter), vec!["pass"]);
        assert!(!registry.contains(PluginKind::Classifier, "pass"));
    }
}
