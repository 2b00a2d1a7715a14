//! Factories for extensions known to the host at compile time.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::extension::system::{DynExtension, Result};

/// Builds an extension instance from its manifest `config`.
///
/// Factories must not block; expensive setup belongs in `initialize`.
pub type ExtensionFactory = Arc<dyn Fn(&Value) -> Result<DynExtension> + Send + Sync>;

/// Named extension factories.
#[derive(Clone, Default)]
pub struct ExtensionCatalog {
    factories: HashMap<String, ExtensionFactory>,
}

impl ExtensionCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory, replacing any previous one with the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Value) -> Result<DynExtension> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Value) -> Result<DynExtension> + Send + Sync + 'static,
    {
        self.register(name, factory);
        self
    }

    /// Merge another catalog into this one.
    pub fn extend(&mut self, other: ExtensionCatalog) {
        self.factories.extend(other.factories);
    }

    pub fn get(&self, name: &str) -> Option<ExtensionFactory> {
        self.factories.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Factory names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}
