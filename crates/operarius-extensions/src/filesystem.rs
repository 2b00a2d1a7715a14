//! `filesystem` extension: file access confined to allowed directories.
//!
//! Manifest config:
//!
//! ```json
//! { "allowedDirectories": ["./data", "./uploads"], "maxSizeMB": 10 }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use operarius_core::config::defaults;
use operarius_core::extension::{
    DescribeMethods, DynExtension, Extension, ExtensionError, HookRegistrar, Initialize, Load,
    MethodDescriptor, ParameterSpec, RegisterHooks, Result, Unload, PRE_PROCESSING,
};
use operarius_tools::{FsPolicy, ListFilesTool, PathGuard, ReadFileTool, Tool, WriteFileTool};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Factory name used in manifests.
pub const FACTORY: &str = "filesystem";

/// Words that mark a message as file related.
const FILE_KEYWORDS: [&str; 3] = ["file", "read", "write"];

/// Manifest configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileSystemConfig {
    pub allowed_directories: Vec<PathBuf>,
    #[serde(rename = "maxSizeMB")]
    pub max_size_mb: u64,
    /// Directory relative paths resolve against; the working directory when unset.
    pub base_dir: Option<PathBuf>,
}

impl Default for FileSystemConfig {
    fn default() -> Self {
        Self {
            allowed_directories: defaults::ALLOWED_DIRS.iter().map(PathBuf::from).collect(),
            max_size_mb: defaults::MAX_FILE_SIZE_MB,
            base_dir: None,
        }
    }
}

/// File system extension.
pub struct FileSystemExtension {
    config: FileSystemConfig,
    guard: PathGuard,
    read: ReadFileTool,
    write: WriteFileTool,
    list: ListFilesTool,
}

impl FileSystemExtension {
    /// Create a new filesystem extension.
    pub fn new(config: FileSystemConfig) -> Self {
        let guard = match &config.base_dir {
            Some(base) => PathGuard::with_base(base, &config.allowed_directories),
            None => PathGuard::new(&config.allowed_directories),
        };
        let policy = FsPolicy::new(guard.clone(), config.max_size_mb * 1024 * 1024);
        Self {
            read: ReadFileTool::new(policy.clone()),
            write: WriteFileTool::new(policy.clone()),
            list: ListFilesTool::new(policy),
            guard,
            config,
        }
    }

    /// Build from a manifest `config` value; `null` means defaults.
    pub fn from_config(config: &Value) -> Result<Self> {
        let config = if config.is_null() {
            FileSystemConfig::default()
        } else {
            FileSystemConfig::deserialize(config)
                .map_err(|e| ExtensionError::InitializationFailed(format!("invalid filesystem config: {e}")))?
        };
        Ok(Self::new(config))
    }

    /// Catalog factory.
    pub fn factory(config: &Value) -> Result<DynExtension> {
        Ok(Arc::new(Self::from_config(config)?))
    }

    pub fn config(&self) -> &FileSystemConfig {
        &self.config
    }

    async fn read_file(&self, params: &Value) -> Result<Value> {
        let path = required(params, "filePath")?;
        let out = self.read.execute(json!({ "path": path })).await?;
        Ok(json!({
            "path": path,
            "content": out.data["content"],
            "size": out.data["size"],
        }))
    }

    async fn write_file(&self, params: &Value) -> Result<Value> {
        let path = required(params, "filePath")?;
        let content = required(params, "content")?;
        let out = self
            .write
            .execute(json!({ "path": path, "content": content }))
            .await?;
        Ok(json!({
            "path": path,
            "size": out.data["bytes_written"],
            "message": "File written successfully",
        }))
    }

    async fn list_files(&self, params: &Value) -> Result<Value> {
        let dir = params.get("dirPath").and_then(Value::as_str).unwrap_or(".");
        let hide_hidden = params.get("hideHidden").and_then(Value::as_bool).unwrap_or(false);
        let out = self.list.execute(json!({ "path": dir })).await?;

        let files: Vec<Value> = out.data["files"]
            .as_array()
            .map(|files| {
                files
                    .iter()
                    .filter(|f| !hide_hidden || !f["name"].as_str().is_some_and(|n| n.starts_with('.')))
                    .map(|f| {
                        json!({
                            "name": f["name"],
                            "type": f["type"],
                            "path": PathBuf::from(dir).join(f["name"].as_str().unwrap_or_default()),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({
            "directory": dir,
            "count": files.len(),
            "files": files,
        }))
    }
}

fn required<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ExtensionError::InvalidArguments(format!("'{key}' is required")))
}

fn mentions_files(message: &str) -> bool {
    let lower = message.to_lowercase();
    FILE_KEYWORDS.iter().any(|k| lower.contains(k))
}

#[async_trait]
impl Extension for FileSystemExtension {
    fn methods(&self) -> Vec<String> {
        vec!["readFile".into(), "writeFile".into(), "listFiles".into()]
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        match method {
            "readFile" => self.read_file(&params).await,
            "writeFile" => self.write_file(&params).await,
            "listFiles" => self.list_files(&params).await,
            _ => Err(ExtensionError::MethodNotFound {
                extension: FACTORY.to_string(),
                method: method.to_string(),
            }),
        }
    }

    fn as_initialize(&self) -> Option<&dyn Initialize> {
        Some(self)
    }

    fn as_load(&self) -> Option<&dyn Load> {
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
impl Initialize for FileSystemExtension {
    async fn initialize(&self) -> Result<()> {
        self.guard.ensure_roots().await.map_err(|e| {
            ExtensionError::InitializationFailed(format!("failed to create allowed directories: {e}"))
        })?;
        debug!(roots = ?self.guard.roots(), "Filesystem extension initialized");
        Ok(())
    }
}

#[async_trait]
impl Load for FileSystemExtension {
    async fn load(&self) -> Result<()> {
        info!(roots = self.guard.roots().len(), max_size_mb = self.config.max_size_mb, "Filesystem extension loaded");
        Ok(())
    }
}

#[async_trait]
impl Unload for FileSystemExtension {
    async fn unload(&self) -> Result<()> {
        info!("Filesystem extension unloading");
        Ok(())
    }
}

impl RegisterHooks for FileSystemExtension {
    fn register_hooks(&self, hooks: &HookRegistrar<'_>) {
        let roots: Vec<String> = self
            .guard
            .roots()
            .iter()
            .map(|r| r.display().to_string())
            .collect();
        hooks.subscribe(PRE_PROCESSING, move |mut payload: Value| {
            let roots = roots.clone();
            async move {
                let related = payload
                    .get("message")
                    .and_then(Value::as_str)
                    .is_some_and(mentions_files);
                if related {
                    debug!("File related message, attaching file context");
                    match payload.as_object_mut() {
                        Some(obj) => {
                            obj.insert(
                                "fileContext".to_string(),
                                json!({ "extension": FACTORY, "allowedDirectories": roots }),
                            );
                        }
                        None => warn!("Pre-processing payload is not an object"),
                    }
                }
                Ok(payload)
            }
        });
    }
}

impl DescribeMethods for FileSystemExtension {
    fn available_methods(&self) -> Vec<MethodDescriptor> {
        vec![
            MethodDescriptor::named("readFile")
                .with_description("Read a file from the file system")
                .with_param("filePath", ParameterSpec::required("string", "Path to the file to read")),
            MethodDescriptor::named("writeFile")
                .with_description("Write content to a file")
                .with_param("filePath", ParameterSpec::required("string", "Path to the file to write"))
                .with_param("content", ParameterSpec::required("string", "Content to write to the file")),
            MethodDescriptor::named("listFiles")
                .with_description("List files in a directory")
                .with_param(
                    "dirPath",
                    ParameterSpec::optional("string", "Directory path to list (default: current directory)"),
                )
                .with_param(
                    "hideHidden",
                    ParameterSpec::optional("boolean", "Whether to hide hidden files (default: false)"),
                ),
        ]
    }
}
