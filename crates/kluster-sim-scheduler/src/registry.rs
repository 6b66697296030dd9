//! Named plugin factories.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::framework::{FrameworkHandle, Plugin};
use crate::{Result, SchedulerError};

/// Builds a plugin from its configured arguments.
pub type PluginFactory = Arc<
    dyn Fn(Option<&serde_json::Value>, &FrameworkHandle) -> Result<Arc<dyn Plugin>> + Send + Sync,
>;

/// Plugin factories keyed by plugin name.
#[derive(Clone, Default)]
pub struct Registry {
    factories: BTreeMap<String, PluginFactory>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::DuplicatePlugin` if the name is taken.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn(Option<&serde_json::Value>, &FrameworkHandle) -> Result<Arc<dyn Plugin>>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(SchedulerError::DuplicatePlugin(name));
        }
        self.factories.insert(name, Arc::new(factory));
        Ok(())
    }

    /// Add every factory of `other`.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::DuplicatePlugin` on the first name both
    /// registries contain. Factories merged before the conflict stay registered.
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        for (name, factory) in &other.factories {
            if self.factories.contains_key(name) {
                return Err(SchedulerError::DuplicatePlugin(name.clone()));
            }
            self.factories.insert(name.clone(), Arc::clone(factory));
        }
        Ok(())
    }

    /// Whether a name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Build a plugin by name.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::PluginNotFound` if the name is not registered,
    /// or the factory's error.
    pub fn instantiate(
        &self,
        name: &str,
        args: Option<&serde_json::Value>,
        handle: &FrameworkHandle,
    ) -> Result<Arc<dyn Plugin>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| SchedulerError::PluginNotFound(name.to_string()))?;
        factory(args, handle)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Plugin for Noop {
        fn name(&self) -> &str {
            "Noop"
        }
    }

    fn noop_factory(
        _: Option<&serde_json::Value>,
        _: &FrameworkHandle,
    ) -> Result<Arc<dyn Plugin>> {
        Ok(Arc::new(Noop))
    }

    #[test]
    fn register_rejects_duplicates() {
        let mut registry = Registry::new();
        registry.register("Noop", noop_factory).unwrap();
        assert!(matches!(
            registry.register("Noop", noop_factory),
            Err(SchedulerError::DuplicatePlugin(name)) if name == "Noop"
        ));
    }

    #[test]
    fn merge_combines_and_detects_conflicts() {
        let mut a = Registry::new();
        a.register("A", noop_factory).unwrap();
        let mut b = Registry::new();
        b.register("B", noop_factory).unwrap();

        a.merge(&b).unwrap();
        assert_eq!(a.names().collect::<Vec<_>>(), vec!["A", "B"]);
        assert!(a.merge(&b).is_err());
    }
}
