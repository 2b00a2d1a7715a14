//! Extension trait and capability types.
//!
//! An extension exposes a set of named methods through [`Extension::call`].
//! Lifecycle steps are optional capabilities: an extension opts into one by
//! implementing the matching trait and returning itself from the accessor
//! (`as_initialize`, `as_unload`, ...). The loader probes these accessors and
//! skips whatever is absent.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::hooks::HookRegistrar;
use crate::error::ErrorKind;

// ============================================================================
// Errors
// ============================================================================

/// Extension error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExtensionError {
    #[error("Extension not found: {0}")]
    NotFound(String),

    #[error("Extension not loaded: {0}")]
    NotLoaded(String),

    #[error("Method '{method}' not found on extension '{extension}'")]
    MethodNotFound { extension: String, method: String },

    #[error("Extension already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Extension initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Invalid manifest {path}: {message}")]
    InvalidManifest { path: String, message: String },

    #[error("Unknown extension factory: {0}")]
    UnknownFactory(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Extension panicked: {0}")]
    Panicked(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl ExtensionError {
    /// Envelope classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtensionError::NotFound(_) | ExtensionError::NotLoaded(_) => ErrorKind::TargetNotFound,
            ExtensionError::MethodNotFound { .. } => ErrorKind::MethodNotFound,
            ExtensionError::AlreadyRegistered(_) => ErrorKind::DuplicateNameConflict,
            ExtensionError::InitializationFailed(_)
            | ExtensionError::InvalidManifest { .. }
            | ExtensionError::UnknownFactory(_) => ErrorKind::ExtensionInitFailed,
            ExtensionError::InvalidArguments(_) => ErrorKind::InvalidArguments,
            ExtensionError::AccessDenied(_) => ErrorKind::AccessDenied,
            ExtensionError::Timeout(_) => ErrorKind::ExecutionTimeout,
            ExtensionError::ExecutionFailed(_)
            | ExtensionError::Panicked(_)
            | ExtensionError::Io(_) => ErrorKind::ExecutionFailed,
        }
    }
}

impl From<std::io::Error> for ExtensionError {
    fn from(err: std::io::Error) -> Self {
        ExtensionError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ExtensionError {
    fn from(err: serde_json::Error) -> Self {
        ExtensionError::InvalidArguments(err.to_string())
    }
}

/// Result type for extension operations.
pub type Result<T> = std::result::Result<T, ExtensionError>;

// ============================================================================
// Lifecycle State
// ============================================================================

/// Lifecycle state of a registered extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionState {
    Unloaded,
    Initializing,
    Loaded,
    Reloading,
}

impl ExtensionState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, ExtensionState::Loaded)
    }
}

impl std::fmt::Display for ExtensionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtensionState::Unloaded => write!(f, "unloaded"),
            ExtensionState::Initializing => write!(f, "initializing"),
            ExtensionState::Loaded => write!(f, "loaded"),
            ExtensionState::Reloading => write!(f, "reloading"),
        }
    }
}

// ============================================================================
// Method Descriptors
// ============================================================================

/// Schema entry for a single method parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

impl ParameterSpec {
    pub fn required(param_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            param_type: param_type.into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(param_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            param_type: param_type.into(),
            description: description.into(),
            required: false,
        }
    }
}

/// Self-reported description of an extension method.
///
/// Descriptors are advisory: the dispatcher uses them to warn about (or, in
/// strict mode, reject) missing required parameters, nothing more.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, ParameterSpec>,
}

impl MethodDescriptor {
    /// Descriptor carrying only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }

    /// Names of required parameters absent from `params`.
    pub fn missing_required(&self, params: &Value) -> Vec<String> {
        self.parameters
            .iter()
            .filter(|(name, spec)| spec.required && params.get(name.as_str()).is_none())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

// ============================================================================
// Extension Trait
// ============================================================================

/// A unit of capability loaded into the gateway.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Names of the domain methods this instance can be called with.
    fn methods(&self) -> Vec<String>;

    /// Call a domain method with a JSON parameter object.
    async fn call(&self, method: &str, params: Value) -> Result<Value>;

    /// Whether `method` is part of the callable surface.
    fn has_method(&self, method: &str) -> bool {
        self.methods().iter().any(|m| m == method)
    }

    fn as_initialize(&self) -> Option<&dyn Initialize> {
        None
    }

    fn as_load(&self) -> Option<&dyn Load> {
        None
    }

    fn as_unload(&self) -> Option<&dyn Unload> {
        None
    }

    fn as_hook_subscriber(&self) -> Option<&dyn RegisterHooks> {
        None
    }

    fn as_method_catalog(&self) -> Option<&dyn DescribeMethods> {
        None
    }
}

/// Shared extension instance.
pub type DynExtension = Arc<dyn Extension>;

/// Expensive one-time setup, run before the extension becomes visible.
#[async_trait]
pub trait Initialize: Send + Sync {
    async fn initialize(&self) -> Result<()>;
}

/// Notification that the extension has been published in the registry.
#[async_trait]
pub trait Load: Send + Sync {
    async fn load(&self) -> Result<()>;
}

/// Teardown, run on reload and unload.
#[async_trait]
pub trait Unload: Send + Sync {
    async fn unload(&self) -> Result<()>;
}

/// Hook subscription, run once after registration.
pub trait RegisterHooks: Send + Sync {
    fn register_hooks(&self, hooks: &HookRegistrar<'_>);
}

/// Self-reported method catalog.
pub trait DescribeMethods: Send + Sync {
    fn available_methods(&self) -> Vec<MethodDescriptor>;
}

/// Method catalog of an extension: its own descriptors when it reports them,
/// otherwise name-only descriptors for every callable method.
pub fn describe_methods(extension: &dyn Extension) -> Vec<MethodDescriptor> {
    match extension.as_method_catalog() {
        Some(catalog) => catalog.available_methods(),
        None => extension
            .methods()
            .into_iter()
            .map(MethodDescriptor::named)
            .collect(),
    }
}
