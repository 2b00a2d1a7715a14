//! Lifecycle tests for the extension core: loading, dispatch, hooks, reload
//! and unload, driven through the `Gateway` entry points.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use operarius_core::extension::{
    DescribeMethods, DynExtension, Extension, ExtensionCatalog, ExtensionError, HookRegistrar,
    Initialize, MethodDescriptor, ParameterSpec, RegisterHooks, Result, Unload, PRE_PROCESSING,
};
use operarius_core::{ErrorKind, Gateway, GatewayConfig};
use serde_json::{json, Value};
use tokio::sync::Notify;

// ============================================================================
// Test extension
// ============================================================================

/// Counters shared between a factory and every instance it builds.
#[derive(Default)]
struct Tracker {
    generations: AtomicUsize,
    unloads: AtomicUsize,
    entered: Notify,
    release: Notify,
}

struct Versioned {
    tracker: Arc<Tracker>,
    version: AtomicUsize,
    fail_init: bool,
    fail_ping: bool,
}

#[async_trait]
impl Extension for Versioned {
    fn methods(&self) -> Vec<String> {
        ["ping", "version", "hold"].iter().map(|m| m.to_string()).collect()
    }

    async fn call(&self, method: &str, _params: Value) -> Result<Value> {
        match method {
            "ping" if self.fail_ping => Err(ExtensionError::ExecutionFailed("ping rejected".into())),
            "ping" => Ok(json!("pong")),
            "version" => Ok(json!(self.version.load(Ordering::SeqCst))),
            "hold" => {
                self.tracker.entered.notify_one();
                self.tracker.release.notified().await;
                Ok(json!(self.version.load(Ordering::SeqCst)))
            }
            other => Err(ExtensionError::ExecutionFailed(format!("unexpected {other}"))),
        }
    }

    fn as_initialize(&self) -> Option<&dyn Initialize> {
        Some(self)
    }

    fn as_unload(&self) -> Option<&dyn Unload> {
        Some(self)
    }

    fn as_hook_subscriber(&self) -> Option<&dyn RegisterHooks> {
        Some(self)
    }

    fn as_method_catalog(&self) -> Option<&dyn DescribeMethods> {
        Some(self)
    }
}

#[async_trait]
impl Initialize for Versioned {
    async fn initialize(&self) -> Result<()> {
        if self.fail_init {
            return Err(ExtensionError::ExecutionFailed("refusing to start".into()));
        }
        let generation = self.tracker.generations.fetch_add(1, Ordering::SeqCst) + 1;
        self.version.store(generation, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Unload for Versioned {
    async fn unload(&self) -> Result<()> {
        self.tracker.unloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl RegisterHooks for Versioned {
    fn register_hooks(&self, hooks: &HookRegistrar<'_>) {
        let owner = hooks.owner().to_string();
        hooks.subscribe(PRE_PROCESSING, move |mut payload: Value| {
            let owner = owner.clone();
            async move {
                let mut seen = payload["seen_by"].as_array().cloned().unwrap_or_default();
                seen.push(json!(owner));
                payload["seen_by"] = Value::Array(seen);
                Ok(payload)
            }
        });
    }
}

impl DescribeMethods for Versioned {
    fn available_methods(&self) -> Vec<MethodDescriptor> {
        vec![
            MethodDescriptor::named("ping").with_description("Liveness check"),
            MethodDescriptor::named("version")
                .with_description("Instance generation")
                .with_param("verbose", ParameterSpec::optional("boolean", "Unused")),
        ]
    }
}

fn catalog(tracker: Arc<Tracker>) -> ExtensionCatalog {
    ExtensionCatalog::new().with("versioned", move |config: &Value| {
        Ok(Arc::new(Versioned {
            tracker: tracker.clone(),
            version: AtomicUsize::new(0),
            fail_init: config["failInit"].as_bool().unwrap_or(false),
            fail_ping: config["failPing"].as_bool().unwrap_or(false),
        }) as DynExtension)
    })
}

fn write_manifest(dir: &Path, name: &str, config: Value) {
    let manifest = json!({ "factory": "versioned", "version": "1.0.0", "config": config });
    std::fs::write(dir.join(format!("{name}.json")), manifest.to_string()).unwrap();
}

fn gateway(dir: &Path, tracker: Arc<Tracker>) -> Gateway {
    let mut config = GatewayConfig::default();
    config.extensions.directory = dir.to_path_buf();
    Gateway::builder(config)
        .with_catalog(catalog(tracker))
        .build()
        .unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_one_failing_initialize_does_not_stop_others() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(tmp.path(), "alpha", json!({}));
    write_manifest(tmp.path(), "beta", json!({"failInit": true}));
    write_manifest(tmp.path(), "gamma", json!({}));
    write_manifest(tmp.path(), "delta", json!({}));

    let gw = gateway(tmp.path(), Arc::default());
    let report = gw.start().await;

    assert_eq!(report.loaded, vec!["alpha", "delta", "gamma"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].name, "beta");
    assert_eq!(report.failed[0].kind, ErrorKind::ExtensionInitFailed);
    assert_eq!(gw.registry().len().await, 3);
    assert!(gw.registry().get("beta").await.is_none());
}

#[tokio::test]
async fn test_unknown_method_returns_method_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(tmp.path(), "alpha", json!({}));
    let gw = gateway(tmp.path(), Arc::default());
    gw.start().await;

    let env = gw.invoke_extension_method("alpha", "teleport", json!({})).await;
    assert!(!env.success);
    assert_eq!(env.error_kind, Some(ErrorKind::MethodNotFound));
    assert_eq!(env.extension, "alpha");
    assert_eq!(env.method, "teleport");

    let err = gw.require_extension_method("alpha", "teleport").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MethodNotFound);
    let err = gw.require_extension_method("nobody", "ping").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TargetNotFound);
}

#[tokio::test]
async fn test_invoke_all_isolates_failures_in_order() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(tmp.path(), "a", json!({}));
    write_manifest(tmp.path(), "b", json!({"failPing": true}));
    write_manifest(tmp.path(), "c", json!({}));
    let gw = gateway(tmp.path(), Arc::default());
    gw.start().await;

    let envelopes = gw.invoke_all("ping", json!({})).await;
    let order: Vec<_> = envelopes.iter().map(|e| e.extension.as_str()).collect();
    let outcomes: Vec<_> = envelopes.iter().map(|e| e.success).collect();

    assert_eq!(order, vec!["a", "b", "c"]);
    assert_eq!(outcomes, vec![true, false, true]);
    assert_eq!(envelopes[1].error_kind, Some(ErrorKind::ExecutionFailed));
}

#[tokio::test]
async fn test_list_extensions_reports_catalog_verbatim() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(tmp.path(), "a", json!({}));
    write_manifest(tmp.path(), "b", json!({}));
    let gw = gateway(tmp.path(), Arc::default());
    gw.start().await;

    let listing = gw.list_extensions().await;
    assert_eq!(listing.len(), 2);
    let reference = catalog(Arc::default())
        .get("versioned")
        .unwrap()(&json!({}))
        .unwrap();
    let expected = reference.as_method_catalog().unwrap().available_methods();
    for entry in &listing {
        assert!(entry.loaded);
        assert_eq!(entry.methods, expected);
        assert_eq!(entry.version.as_deref(), Some("1.0.0"));
        assert!(entry.source.ends_with(&format!("{}.json", entry.name)));
    }
}

#[tokio::test]
async fn test_reload_builds_new_instance_and_unloads_old_once() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(tmp.path(), "alpha", json!({}));
    let tracker = Arc::new(Tracker::default());
    let gw = gateway(tmp.path(), tracker.clone());
    gw.start().await;

    let env = gw.invoke_extension_method("alpha", "version", json!({})).await;
    assert_eq!(env.result, Some(json!(1)));

    gw.reload_extension("alpha").await.unwrap();

    let env = gw.invoke_extension_method("alpha", "version", json!({})).await;
    assert_eq!(env.result, Some(json!(2)));
    assert_eq!(tracker.unloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reload_rereads_manifest_from_disk() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(tmp.path(), "alpha", json!({}));
    let gw = gateway(tmp.path(), Arc::default());
    gw.start().await;
    assert!(gw.invoke_extension_method("alpha", "ping", json!({})).await.success);

    write_manifest(tmp.path(), "alpha", json!({"failPing": true}));
    gw.reload_extension("alpha").await.unwrap();
    assert!(!gw.invoke_extension_method("alpha", "ping", json!({})).await.success);

    write_manifest(tmp.path(), "alpha", json!({"failInit": true}));
    let err = gw.reload_extension("alpha").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExtensionInitFailed);
    let env = gw.invoke_extension_method("alpha", "ping", json!({})).await;
    assert_eq!(env.error_kind, Some(ErrorKind::TargetNotFound));
}

#[tokio::test]
async fn test_in_flight_call_keeps_old_instance_across_reload() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(tmp.path(), "alpha", json!({}));
    let tracker = Arc::new(Tracker::default());
    let gw = Arc::new(gateway(tmp.path(), tracker.clone()));
    gw.start().await;

    let in_flight = {
        let gw = gw.clone();
        tokio::spawn(async move { gw.invoke_extension_method("alpha", "hold", json!({})).await })
    };
    tracker.entered.notified().await;

    gw.reload_extension("alpha").await.unwrap();
    tracker.release.notify_one();

    let old = in_flight.await.unwrap();
    assert_eq!(old.result, Some(json!(1)));
    let new = gw.invoke_extension_method("alpha", "version", json!({})).await;
    assert_eq!(new.result, Some(json!(2)));
}

#[tokio::test]
async fn test_hooks_run_in_load_order_and_are_purged_on_reload() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(tmp.path(), "a", json!({}));
    write_manifest(tmp.path(), "b", json!({}));
    let gw = gateway(tmp.path(), Arc::default());
    gw.start().await;

    let out = gw.run_hook(PRE_PROCESSING, json!({"message": "hi"})).await;
    assert_eq!(out["seen_by"], json!(["a", "b"]));
    assert_eq!(out["message"], "hi");

    gw.reload_extension("a").await.unwrap();
    assert_eq!(gw.hooks().subscriber_count(PRE_PROCESSING), 2);
    let out = gw.run_hook(PRE_PROCESSING, json!({})).await;
    assert_eq!(out["seen_by"], json!(["b", "a"]));
}

#[tokio::test]
async fn test_process_request_runs_pre_processing_hooks() {
    let tmp = tempfile::tempdir().unwrap();
    let gw = gateway(tmp.path(), Arc::default());
    gw.start().await;
    gw.registry()
        .register(
            "echo",
            Arc::new(EchoParams) as DynExtension,
            "inline",
        )
        .await
        .unwrap();
    gw.hooks().subscribe(PRE_PROCESSING, |mut request: Value| async move {
        request["params"]["tagged"] = json!(true);
        Ok(request)
    });

    let env = gw.process_request("echo", "echo", json!({"text": "x"})).await;
    assert!(env.success);
    assert_eq!(env.result, Some(json!({"text": "x", "tagged": true})));
}

#[tokio::test]
async fn test_shutdown_unloads_everything() {
    let tmp = tempfile::tempdir().unwrap();
    write_manifest(tmp.path(), "a", json!({}));
    write_manifest(tmp.path(), "b", json!({}));
    let tracker = Arc::new(Tracker::default());
    let gw = gateway(tmp.path(), tracker.clone());
    gw.start().await;

    gw.shutdown().await;

    assert_eq!(tracker.unloads.load(Ordering::SeqCst), 2);
    assert!(gw.list_extensions().await.is_empty());
    assert!(gw.hooks().hook_names().is_empty());
    let env = gw.invoke_extension_method("a", "ping", json!({})).await;
    assert_eq!(env.error_kind, Some(ErrorKind::TargetNotFound));
}

struct EchoParams;

#[async_trait]
impl Extension for EchoParams {
    fn methods(&self) -> Vec<String> {
        vec!["echo".to_string()]
    }

    async fn call(&self, _method: &str, params: Value) -> Result<Value> {
        Ok(params)
    }
}
