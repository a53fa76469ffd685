//! Capability registry.

use adaptune_core::{CapabilityDescriptor, CapabilityKind, RegistryError};
use std::collections::HashMap;
use std::sync::Arc;

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Registry for capability descriptors.
///
/// Built once at process initialization and treated as read-only by every
/// other component; share it behind an `Arc` rather than a global.
pub struct CapabilityRegistry {
    descriptors: HashMap<(CapabilityKind, String), Arc<CapabilityDescriptor>>,
    by_kind: HashMap<CapabilityKind, Vec<String>>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            descriptors: HashMap::new(),
            by_kind: HashMap::new(),
        }
    }

    /// Register a descriptor under its `(kind, name)`.
    ///
    /// Fails with `Duplicate` if the pair exists and with `InvalidDefaults`
    /// if the descriptor's options fail validation; neither failure mutates
    /// the stored table.
    pub fn register(&mut self, descriptor: CapabilityDescriptor) -> Result<Arc<CapabilityDescriptor>> {
        let kind = descriptor.kind;
        let name = descriptor.name.clone();

        if self.descriptors.contains_key(&(kind, name.clone())) {
            return Err(RegistryError::Duplicate { kind, name });
        }
        if descriptor.defaults.kind() != kind {
            return Err(RegistryError::InvalidDefaults {
                kind,
                name,
                reason: format!(
                    "defaults are for kind {}, descriptor is {}",
                    descriptor.defaults.kind(),
                    kind
                ),
            });
        }
        if let Err(reason) = descriptor.defaults.validate() {
            return Err(RegistryError::InvalidDefaults { kind, name, reason });
        }

        tracing::debug!("Registered capability {}/{}", kind, name);

        let descriptor = Arc::new(descriptor);
        self.descriptors
            .insert((kind, name.clone()), Arc::clone(&descriptor));
        self.by_kind.entry(kind).or_default().push(name);
        Ok(descriptor)
    }

    /// Look up a descriptor by kind and name.
    pub fn lookup(&self, kind: CapabilityKind, name: &str) -> Result<Arc<CapabilityDescriptor>> {
        self.descriptors
            .get(&(kind, name.to_string()))
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                kind,
                name: name.to_string(),
            })
    }

    /// All descriptors of a kind, ordered by name.
    pub fn list(&self, kind: CapabilityKind) -> Vec<Arc<CapabilityDescriptor>> {
        let mut names = self.by_kind.get(&kind).cloned().unwrap_or_default();
        names.sort();
        names
            .iter()
            .filter_map(|name| self.descriptors.get(&(kind, name.clone())).cloned())
            .collect()
    }

    /// Names registered under a kind, ordered.
    pub fn names(&self, kind: CapabilityKind) -> Vec<String> {
        let mut names = self.by_kind.get(&kind).cloned().unwrap_or_default();
        names.sort();
        names
    }

    /// Total number of registered descriptors.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adaptune_core::{EvaluatorDefaults, Plugin, PluginCall, PluginDefaults};
    use async_trait::async_trait;

    struct NullPlugin;

    #[async_trait]
    impl Plugin for NullPlugin {
        async fn call(&self, _call: PluginCall) -> std::result::Result<serde_json::Value, anyhow::Error> {
            Ok(serde_json::Value::Null)
        }
    }

    fn descriptor(kind: CapabilityKind, name: &str) -> CapabilityDescriptor {
        CapabilityDescriptor::new(kind, name, "test plugin", Arc::new(NullPlugin))
    }

    #[test]
    fn duplicate_registration_leaves_original_untouched() {
        let mut registry = CapabilityRegistry::new();
        let original = descriptor(CapabilityKind::Strategy, "inline");
        registry.register(original).unwrap();

        let replacement = descriptor(CapabilityKind::Strategy, "inline")
            .with_defaults(PluginDefaults::Strategy(adaptune_core::StrategyDefaults {
                max_candidates: 9,
                explain: false,
            }));
        let err = registry.register(replacement).unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate { .. }));

        // the stored descriptor still carries the original defaults
        let stored = registry.lookup(CapabilityKind::Strategy, "inline").unwrap();
        match &stored.defaults {
            PluginDefaults::Strategy(d) => assert_eq!(d.max_candidates, 1),
            other => panic!("unexpected defaults: {other:?}"),
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn same_name_different_kind_is_allowed() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(descriptor(CapabilityKind::Strategy, "baseline"))
            .unwrap();
        registry
            .register(descriptor(CapabilityKind::Evaluator, "baseline"))
            .unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn lookup_missing_reports_kind_and_name() {
        let registry = CapabilityRegistry::new();
        let err = registry
            .lookup(CapabilityKind::Evaluator, "nonexistent")
            .unwrap_err();
        assert_eq!(err.to_string(), "capability not found: evaluator/nonexistent");
    }

    #[test]
    fn list_filters_by_kind_and_sorts() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(descriptor(CapabilityKind::Strategy, "zeta"))
            .unwrap();
        registry
            .register(descriptor(CapabilityKind::Strategy, "alpha"))
            .unwrap();
        registry
            .register(descriptor(CapabilityKind::Evaluator, "judge"))
            .unwrap();

        let strategies = registry.list(CapabilityKind::Strategy);
        let names: Vec<_> = strategies.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert!(registry.list(CapabilityKind::Tracker).is_empty());
    }

    #[test]
    fn mismatched_defaults_are_rejected() {
        let mut registry = CapabilityRegistry::new();
        let bad = descriptor(CapabilityKind::Strategy, "inline").with_defaults(
            PluginDefaults::Evaluator(EvaluatorDefaults::default()),
        );
        let err = registry.register(bad).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidDefaults { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn invalid_option_values_are_rejected() {
        let mut registry = CapabilityRegistry::new();
        let bad = descriptor(CapabilityKind::Evaluator, "judge").with_defaults(
            PluginDefaults::Evaluator(EvaluatorDefaults {
                adoption_threshold: 2.0,
                max_risks: 8,
            }),
        );
        assert!(registry.register(bad).is_err());
        assert!(registry.is_empty());
    }
}
