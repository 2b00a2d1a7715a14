//! Bundled extensions loaded from manifests and driven through the gateway.

use std::path::Path;

use operarius_core::extension::PRE_PROCESSING;
use operarius_core::{ErrorKind, Gateway, GatewayConfig};
use operarius_extensions::builtin_catalog;
use serde_json::json;

fn setup(root: &Path) -> Gateway {
    let plugins = root.join("plugins");
    std::fs::create_dir_all(&plugins).unwrap();
    std::fs::write(
        plugins.join("filesystem.json"),
        json!({
            "version": "1.0.0",
            "config": { "allowedDirectories": ["./data"], "maxSizeMB": 1, "baseDir": root },
        })
        .to_string(),
    )
    .unwrap();
    std::fs::write(plugins.join("demo.json"), json!({ "factory": "example" }).to_string()).unwrap();

    let mut config = GatewayConfig::default();
    config.extensions.directory = plugins;
    Gateway::builder(config)
        .with_catalog(builtin_catalog())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_bundled_extensions_load_and_list() {
    let tmp = tempfile::tempdir().unwrap();
    let gw = setup(tmp.path());
    let report = gw.start().await;
    assert!(report.is_clean());
    assert_eq!(report.loaded, vec!["demo", "filesystem"]);

    // initialize created the allowed directory
    assert!(tmp.path().join("data").is_dir());

    let listing = gw.list_extensions().await;
    assert_eq!(listing.len(), 2);
    let fs = listing.iter().find(|l| l.name == "filesystem").unwrap();
    let names: Vec<_> = fs.methods.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["readFile", "writeFile", "listFiles"]);
    assert_eq!(fs.version.as_deref(), Some("1.0.0"));
}

#[tokio::test]
async fn test_filesystem_methods_through_dispatcher() {
    let tmp = tempfile::tempdir().unwrap();
    let gw = setup(tmp.path());
    gw.start().await;

    let env = gw
        .invoke_extension_method(
            "filesystem",
            "writeFile",
            json!({"filePath": "data/todo.txt", "content": "ship it"}),
        )
        .await;
    assert!(env.success, "{:?}", env.error);

    let env = gw
        .invoke_extension_method("filesystem", "readFile", json!({"filePath": "data/todo.txt"}))
        .await;
    assert_eq!(env.result.unwrap()["content"], "ship it");

    let env = gw
        .invoke_extension_method("filesystem", "readFile", json!({"filePath": "../../etc/passwd"}))
        .await;
    assert!(!env.success);
    assert_eq!(env.error_kind, Some(ErrorKind::AccessDenied));
}

#[tokio::test]
async fn test_example_command() {
    let tmp = tempfile::tempdir().unwrap();
    let gw = setup(tmp.path());
    gw.start().await;

    let env = gw
        .invoke_extension_method("demo", "exampleCommand", json!({"input": "ping"}))
        .await;
    assert!(env.success);
    assert_eq!(env.extension, "demo");
    assert_eq!(env.result.unwrap()["message"], "Example plugin processed: ping");
}

#[tokio::test]
async fn test_filesystem_hook_purged_on_unload() {
    let tmp = tempfile::tempdir().unwrap();
    let gw = setup(tmp.path());
    gw.start().await;

    let payload = gw
        .run_hook(PRE_PROCESSING, json!({"message": "write a file for me"}))
        .await;
    assert_eq!(payload["fileContext"]["extension"], "filesystem");

    gw.unload_extension("filesystem").await.unwrap();
    assert_eq!(gw.hooks().subscriber_count(PRE_PROCESSING), 0);

    let payload = gw
        .run_hook(PRE_PROCESSING, json!({"message": "write a file for me"}))
        .await;
    assert!(payload.get("fileContext").is_none());
}
