//! Extension loader.
//!
//! Discovers manifests in the extension directory, instantiates each through
//! the [`ExtensionCatalog`], drives the lifecycle and publishes the result in
//! the registry and hook bus. A failure in one extension is recorded in the
//! [`LoadReport`] and never stops the others.

mod catalog;
mod manifest;

pub use catalog::{ExtensionCatalog, ExtensionFactory};
pub use manifest::{extension_name, is_manifest, ExtensionManifest, MANIFEST_EXTENSION, RESERVED_MANIFEST};

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use super::hooks::HookBus;
use super::registry::{ExtensionRecord, ExtensionRegistry, RegistrationPolicy};
use super::safety::{contain, panic_message};
use super::system::{DynExtension, ExtensionError, ExtensionState, Result};

/// A source that failed to load.
#[derive(Debug, Clone, Serialize)]
pub struct LoadFailure {
    pub name: String,
    pub source: PathBuf,
    pub error: String,
    pub kind: crate::error::ErrorKind,
}

/// Outcome of [`ExtensionLoader::load_all`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    /// Names that loaded, in load order.
    pub loaded: Vec<String>,
    pub failed: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Loads, reloads and unloads extensions.
pub struct ExtensionLoader {
    directory: PathBuf,
    catalog: ExtensionCatalog,
    registry: Arc<ExtensionRegistry>,
    hooks: Arc<HookBus>,
    /// Serializes lifecycle changes per extension name.
    locks: parking_lot::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ExtensionLoader {
    /// Create a loader for `directory`.
    pub fn new(
        directory: impl Into<PathBuf>,
        catalog: ExtensionCatalog,
        registry: Arc<ExtensionRegistry>,
        hooks: Arc<HookBus>,
    ) -> Self {
        Self {
            directory: directory.into(),
            catalog,
            registry,
            hooks,
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn catalog(&self) -> &ExtensionCatalog {
        &self.catalog
    }

    fn lock_for(&self, name: &str) -> Arc<AsyncMutex<()>> {
        self.locks.lock().entry(name.to_string()).or_default().clone()
    }

    /// Path of the manifest for extension `name`.
    ///
    /// Only names that discovery could produce are accepted, so the path
    /// always stays inside the extension directory.
    pub fn manifest_path(&self, name: &str) -> Result<PathBuf> {
        let invalid = || ExtensionError::InvalidArguments(format!("invalid extension name '{name}'"));
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(invalid());
        }
        let path = self.directory.join(format!("{name}.{MANIFEST_EXTENSION}"));
        let round_trips = extension_name(&path).as_deref() == Some(name)
            && path.parent() == Some(self.directory.as_path())
            && is_manifest(&path);
        if !round_trips {
            return Err(invalid());
        }
        Ok(path)
    }

    /// List manifest files in the extension directory, sorted by name.
    ///
    /// A missing directory is created and yields no sources.
    pub async fn discover(&self) -> Result<Vec<PathBuf>> {
        if !tokio::fs::try_exists(&self.directory).await? {
            tokio::fs::create_dir_all(&self.directory).await?;
            info!(directory = %self.directory.display(), "Created extension directory");
            return Ok(Vec::new());
        }

        let mut sources = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.directory).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_manifest(&path) && entry.file_type().await?.is_file() {
                sources.push(path);
            }
        }
        sources.sort();
        Ok(sources)
    }

    /// Load every discovered extension.
    pub async fn load_all(&self) -> LoadReport {
        let mut report = LoadReport::default();
        let sources = match self.discover().await {
            Ok(sources) => sources,
            Err(e) => {
                error!(directory = %self.directory.display(), error = %e, "Extension discovery failed");
                return report;
            }
        };
        debug!(count = sources.len(), "Discovered extension manifests");

        for path in sources {
            let Some(name) = extension_name(&path) else {
                continue;
            };
            match self.load_source(&name, &path).await {
                Ok(_) => report.loaded.push(name),
                Err(e) => {
                    warn!(extension = %name, source = %path.display(), error = %e, "Failed to load extension");
                    report.failed.push(LoadFailure {
                        name,
                        source: path,
                        kind: e.kind(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "Extension loading complete"
        );
        report
    }

    /// Load a single extension from its manifest.
    pub async fn load(&self, name: &str) -> Result<Arc<ExtensionRecord>> {
        let path = self.manifest_path(name)?;
        self.load_source(name, &path).await
    }

    async fn load_source(&self, name: &str, path: &Path) -> Result<Arc<ExtensionRecord>> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        if self.registry.policy() == RegistrationPolicy::Strict && self.registry.contains(name).await {
            return Err(ExtensionError::AlreadyRegistered(name.to_string()));
        }

        let (instance, manifest) = self.instantiate(name, path).await?;
        let record = ExtensionRecord::new(name, instance, path.display().to_string())
            .with_version(manifest.version);
        let previous = self.registry.get(name).await;
        let record = self.registry.insert(record).await?;

        // Overwritten by a fresh load: retire the old instance and its hooks.
        if let Some(old) = previous {
            self.retire(&old).await;
        }

        self.activate(&record).await;
        Ok(record)
    }

    /// Reload extension `name` from its manifest.
    ///
    /// The current instance (if any) is unloaded and its hook subscriptions
    /// removed before a fresh instance is built from the manifest on disk.
    /// Calls already in flight keep using the old instance; new calls see the
    /// extension as not loaded until the reload finishes.
    pub async fn reload(&self, name: &str) -> Result<Arc<ExtensionRecord>> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let path = self.manifest_path(name)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(ExtensionError::NotFound(name.to_string()));
        }

        if let Some(old) = self.registry.set_state(name, ExtensionState::Reloading).await {
            info!(extension = %name, "Reloading extension");
            self.retire(&old).await;
        }

        match self.instantiate(name, &path).await {
            Ok((instance, manifest)) => {
                let record = ExtensionRecord::new(name, instance, path.display().to_string())
                    .with_version(manifest.version);
                let record = self.registry.replace(record).await;
                self.activate(&record).await;
                info!(extension = %name, "Extension reloaded");
                Ok(record)
            }
            Err(e) => {
                self.registry.remove(name).await;
                warn!(extension = %name, error = %e, "Reload failed, extension removed");
                Err(e)
            }
        }
    }

    /// Unload a single extension.
    pub async fn unload(&self, name: &str) -> Result<()> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let record = self
            .registry
            .remove(name)
            .await
            .ok_or_else(|| ExtensionError::NotFound(name.to_string()))?;
        self.retire(&record).await;
        info!(extension = %name, "Extension unloaded");
        Ok(())
    }

    /// Unload every extension, then clear the hook bus.
    ///
    /// Each record is removed under its own lifecycle lock. Extensions
    /// published by a concurrent load are picked up by the next pass, so
    /// every instance that leaves the registry is retired.
    pub async fn unload_all(&self) {
        loop {
            let records = self.registry.records().await;
            if records.is_empty() {
                break;
            }
            for record in records {
                let lock = self.lock_for(&record.name);
                let _guard = lock.lock().await;
                if let Some(record) = self.registry.remove(&record.name).await {
                    self.retire(&record).await;
                }
            }
        }
        self.hooks.clear();
        info!("All extensions unloaded");
    }

    /// Build and initialize an instance. Nothing is published here.
    async fn instantiate(&self, name: &str, path: &Path) -> Result<(DynExtension, ExtensionManifest)> {
        let manifest = ExtensionManifest::read(path).await?;
        let factory_name = manifest.factory_name(name).to_string();
        let factory = self
            .catalog
            .get(&factory_name)
            .ok_or_else(|| ExtensionError::UnknownFactory(factory_name.clone()))?;

        debug!(extension = %name, factory = %factory_name, state = %ExtensionState::Initializing, "Instantiating extension");
        let instance = std::panic::catch_unwind(AssertUnwindSafe(|| factory(&manifest.config)))
            .map_err(|p| ExtensionError::InitializationFailed(panic_message(p.as_ref())))?
            .map_err(|e| ExtensionError::InitializationFailed(e.to_string()))?;

        if let Some(init) = instance.as_initialize() {
            contain(name, init.initialize())
                .await
                .map_err(|e| ExtensionError::InitializationFailed(e.to_string()))?;
        }
        Ok((instance, manifest))
    }

    /// Post-publish steps: load notification and hook registration.
    async fn activate(&self, record: &ExtensionRecord) {
        let name = record.name.as_str();
        if let Some(load) = record.instance.as_load() {
            if let Err(e) = contain(name, load.load()).await {
                warn!(extension = %name, error = %e, "Extension load notification failed");
            }
        }

        if let Some(subscriber) = record.instance.as_hook_subscriber() {
            let registrar = self.hooks.registrar(name);
            let registered =
                std::panic::catch_unwind(AssertUnwindSafe(|| subscriber.register_hooks(&registrar)));
            if let Err(p) = registered {
                let removed = self.hooks.purge_owner(name);
                warn!(extension = %name, panic = %panic_message(p.as_ref()), removed, "Hook registration panicked");
            }
        }
        info!(extension = %name, source = %record.source, "Extension loaded");
    }

    /// Best-effort teardown of an instance that is leaving the registry.
    async fn retire(&self, record: &ExtensionRecord) {
        let name = record.name.as_str();
        let purged = self.hooks.purge_owner(name);
        if purged > 0 {
            debug!(extension = %name, purged, "Removed hook subscriptions");
        }
        if let Some(unload) = record.instance.as_unload() {
            if let Err(e) = contain(name, unload.unload()).await {
                warn!(extension = %name, error = %e, "Extension unload failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::system::{Extension, Initialize, Unload};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTED_UNLOADS: AtomicUsize = AtomicUsize::new(0);

    struct Counted;

    #[async_trait]
    impl Extension for Counted {
        fn methods(&self) -> Vec<String> {
            Vec::new()
        }

        async fn call(&self, _method: &str, _params: Value) -> Result<Value> {
            Ok(Value::Null)
        }

        fn as_unload(&self) -> Option<&dyn Unload> {
            Some(self)
        }
    }

    #[async_trait]
    impl Unload for Counted {
        async fn unload(&self) -> Result<()> {
            COUNTED_UNLOADS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Flaky {
        fail: bool,
    }

    #[async_trait]
    impl Extension for Flaky {
        fn methods(&self) -> Vec<String> {
            vec!["ping".to_string()]
        }

        async fn call(&self, _method: &str, _params: Value) -> Result<Value> {
            Ok(Value::from("pong"))
        }

        fn as_initialize(&self) -> Option<&dyn Initialize> {
            Some(self)
        }
    }

    #[async_trait]
    impl Initialize for Flaky {
        async fn initialize(&self) -> Result<()> {
            if self.fail {
                return Err(ExtensionError::ExecutionFailed("cannot start".to_string()));
            }
            Ok(())
        }
    }

    fn catalog() -> ExtensionCatalog {
        ExtensionCatalog::new()
            .with("flaky", |config: &Value| {
                let fail = config.get("fail").and_then(Value::as_bool).unwrap_or(false);
                Ok(Arc::new(Flaky { fail }) as DynExtension)
            })
            .with("counted", |_: &Value| Ok(Arc::new(Counted) as DynExtension))
    }

    fn loader(dir: &Path) -> ExtensionLoader {
        ExtensionLoader::new(
            dir,
            catalog(),
            Arc::new(ExtensionRegistry::new()),
            Arc::new(HookBus::new()),
        )
    }

    #[tokio::test]
    async fn test_missing_directory_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("plugins");
        let loader = loader(&dir);

        let report = loader.load_all().await;
        assert!(report.loaded.is_empty());
        assert!(report.is_clean());
        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn test_discover_skips_reserved_and_other_files() {
        let tmp = tempfile::tempdir().unwrap();
        for file in ["b.json", "a.json", "index.json", "notes.txt"] {
            std::fs::write(tmp.path().join(file), r#"{"factory": "flaky"}"#).unwrap();
        }
        std::fs::create_dir(tmp.path().join("dir.json")).unwrap();

        let sources = loader(tmp.path()).discover().await.unwrap();
        let names: Vec<_> = sources.iter().filter_map(|p| extension_name(p)).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_failures_are_reported() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("good.json"), r#"{"factory": "flaky"}"#).unwrap();
        std::fs::write(tmp.path().join("bad.json"), r#"{"factory": "flaky", "config": {"fail": true}}"#).unwrap();
        std::fs::write(tmp.path().join("broken.json"), "{").unwrap();
        std::fs::write(tmp.path().join("unknown.json"), r#"{"factory": "nope"}"#).unwrap();

        let loader = loader(tmp.path());
        let report = loader.load_all().await;

        assert_eq!(report.loaded, vec!["good".to_string()]);
        let failed: Vec<_> = report.failed.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(failed, vec!["bad", "broken", "unknown"]);
        assert!(report
            .failed
            .iter()
            .all(|f| f.kind == crate::error::ErrorKind::ExtensionInitFailed));
        assert_eq!(loader.registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_reload_without_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let err = loader(tmp.path()).reload("ghost").await.unwrap_err();
        assert!(matches!(err, ExtensionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_names_outside_directory_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("plugins");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(tmp.path().join("outside.json"), r#"{"factory": "flaky"}"#).unwrap();
        let loader = loader(&dir);

        for name in ["../outside", "", "..", "a/b", "a\\b", "index"] {
            let err = loader.reload(name).await.unwrap_err();
            assert!(matches!(err, ExtensionError::InvalidArguments(_)), "{name}: {err:?}");
            let err = loader.load(name).await.unwrap_err();
            assert!(matches!(err, ExtensionError::InvalidArguments(_)), "{name}: {err:?}");
        }
        assert!(loader.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_unload_all_retires_late_arrivals() {
        let tmp = tempfile::tempdir().unwrap();
        for file in ["a.json", "b.json", "c.json"] {
            std::fs::write(tmp.path().join(file), r#"{"factory": "counted"}"#).unwrap();
        }
        let loader = Arc::new(loader(tmp.path()));
        loader.load_all().await;
        std::fs::write(tmp.path().join("d.json"), r#"{"factory": "counted"}"#).unwrap();

        // Hold one lifecycle lock so unload_all stalls after its first snapshot.
        let lock = loader.lock_for("b");
        let guard = lock.lock().await;
        let unloading = tokio::spawn({
            let loader = loader.clone();
            async move { loader.unload_all().await }
        });
        tokio::task::yield_now().await;
        loader.load("d").await.unwrap();
        drop(guard);

        unloading.await.unwrap();
        assert!(loader.registry.is_empty().await);
        assert_eq!(COUNTED_UNLOADS.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_unload_single() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("one.json"), r#"{"factory": "flaky"}"#).unwrap();
        let loader = loader(tmp.path());
        loader.load_all().await;

        loader.unload("one").await.unwrap();
        assert!(loader.registry.is_empty().await);
        assert!(matches!(loader.unload("one").await, Err(ExtensionError::NotFound(_))));
    }
}
