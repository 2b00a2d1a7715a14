//! Capability registry for loaded extensions.
//!
//! The registry maps names to immutable [`ExtensionRecord`] values behind an
//! `Arc`. A state change publishes a new record rather than mutating the
//! old one, so a caller holding a record keeps a consistent view of it for as
//! long as it needs.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::system::{
    describe_methods, DynExtension, ExtensionError, ExtensionState, MethodDescriptor, Result,
};

/// What to do when a name is registered twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationPolicy {
    /// Replace the existing record.
    #[default]
    Overwrite,
    /// Fail with `AlreadyRegistered`.
    Strict,
}

/// A registered extension.
#[derive(Clone)]
pub struct ExtensionRecord {
    pub name: String,
    pub instance: DynExtension,
    /// Where the extension came from (manifest path, or a label for
    /// programmatic registrations).
    pub source: String,
    pub version: Option<semver::Version>,
    pub state: ExtensionState,
    pub loaded_at: DateTime<Utc>,
}

impl ExtensionRecord {
    /// Create a record in the `loaded` state.
    pub fn new(name: impl Into<String>, instance: DynExtension, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance,
            source: source.into(),
            version: None,
            state: ExtensionState::Loaded,
            loaded_at: Utc::now(),
        }
    }

    pub fn with_version(mut self, version: Option<semver::Version>) -> Self {
        self.version = version;
        self
    }

    /// Copy of this record in another state.
    pub fn with_state(&self, state: ExtensionState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.state.is_loaded()
    }

    /// Introspection view of this record.
    pub fn listing(&self) -> ExtensionListing {
        ExtensionListing {
            name: self.name.clone(),
            loaded: self.is_loaded(),
            state: self.state,
            source: self.source.clone(),
            version: self.version.as_ref().map(ToString::to_string),
            methods: describe_methods(self.instance.as_ref()),
            loaded_at: self.loaded_at,
        }
    }
}

impl std::fmt::Debug for ExtensionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRecord")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("version", &self.version)
            .field("state", &self.state)
            .field("loaded_at", &self.loaded_at)
            .finish_non_exhaustive()
    }
}

/// Introspection entry returned by [`ExtensionRegistry::list_all`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionListing {
    pub name: String,
    pub loaded: bool,
    pub state: ExtensionState,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub methods: Vec<MethodDescriptor>,
    pub loaded_at: DateTime<Utc>,
}

/// Registry of extension records keyed by name.
pub struct ExtensionRegistry {
    records: RwLock<HashMap<String, Arc<ExtensionRecord>>>,
    policy: RegistrationPolicy,
}

impl ExtensionRegistry {
    /// Create a new registry that overwrites on re-registration.
    pub fn new() -> Self {
        Self::with_policy(RegistrationPolicy::Overwrite)
    }

    pub fn with_policy(policy: RegistrationPolicy) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> RegistrationPolicy {
        self.policy
    }

    /// Register an extension instance under `name`.
    pub async fn register(
        &self,
        name: &str,
        instance: DynExtension,
        source: impl Into<String>,
    ) -> Result<Arc<ExtensionRecord>> {
        self.insert(ExtensionRecord::new(name, instance, source)).await
    }

    /// Insert a prepared record, applying the registration policy.
    pub async fn insert(&self, record: ExtensionRecord) -> Result<Arc<ExtensionRecord>> {
        let record = Arc::new(record);
        let mut records = self.records.write().await;
        if self.policy == RegistrationPolicy::Strict && records.contains_key(&record.name) {
            return Err(ExtensionError::AlreadyRegistered(record.name.clone()));
        }
        records.insert(record.name.clone(), record.clone());
        Ok(record)
    }

    /// Publish a new state for `name`. Returns the updated record.
    pub(crate) async fn set_state(
        &self,
        name: &str,
        state: ExtensionState,
    ) -> Option<Arc<ExtensionRecord>> {
        let mut records = self.records.write().await;
        let current = records.get(name)?;
        let updated = Arc::new(current.with_state(state));
        records.insert(name.to_string(), updated.clone());
        Some(updated)
    }

    /// Replace a record unconditionally, bypassing the registration policy.
    pub(crate) async fn replace(&self, record: ExtensionRecord) -> Arc<ExtensionRecord> {
        let record = Arc::new(record);
        self.records
            .write()
            .await
            .insert(record.name.clone(), record.clone());
        record
    }

    /// Get a record snapshot by name.
    pub async fn get(&self, name: &str) -> Option<Arc<ExtensionRecord>> {
        self.records.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.records.read().await.contains_key(name)
    }

    /// All records sorted by name.
    pub async fn records(&self) -> Vec<Arc<ExtensionRecord>> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    /// Records in the `loaded` state, sorted by name.
    pub async fn loaded(&self) -> Vec<Arc<ExtensionRecord>> {
        let mut records = self.records().await;
        records.retain(|r| r.is_loaded());
        records
    }

    /// Introspection listing of every record, sorted by name.
    pub async fn list_all(&self) -> Vec<ExtensionListing> {
        self.records().await.iter().map(|r| r.listing()).collect()
    }

    /// Remove a record. Returns it if it was present.
    pub async fn remove(&self, name: &str) -> Option<Arc<ExtensionRecord>> {
        self.records.write().await.remove(name)
    }

    /// Remove every record, returning them sorted by name.
    pub async fn clear(&self) -> Vec<Arc<ExtensionRecord>> {
        let mut drained: Vec<_> = self.records.write().await.drain().map(|(_, r)| r).collect();
        drained.sort_by(|a, b| a.name.cmp(&b.name));
        drained
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
