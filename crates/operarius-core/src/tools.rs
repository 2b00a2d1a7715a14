//! Built-in tool abstraction and registry.
//!
//! Tools are capabilities compiled into the gateway (as opposed to extensions
//! discovered at startup). They share the extension invocation contract: every
//! call through [`ToolRegistry::invoke`] yields an [`Envelope`].

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::envelope::Envelope;
use crate::error::ErrorKind;
use crate::extension::safety::panic_message;
use crate::extension::ExtensionError;

/// Method name recorded in tool envelopes.
pub const TOOL_METHOD: &str = "execute";

// ============================================================================
// Errors
// ============================================================================

/// Tool error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    /// Tool not found
    #[error("Tool not found: {0}")]
    NotFound(String),

    /// Invalid arguments
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Path outside the allowed directories
    #[error("Access denied: {0}")]
    PermissionDenied(String),

    /// Execution error
    #[error("Execution error: {0}")]
    Execution(String),

    /// Output exceeded the configured limit
    #[error("Output exceeded limit of {0} bytes")]
    OutputLimit(usize),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Timeout, in milliseconds
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),
}

impl ToolError {
    /// Envelope classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::NotFound(_) => ErrorKind::TargetNotFound,
            ToolError::InvalidArguments(_) => ErrorKind::InvalidArguments,
            ToolError::PermissionDenied(_) => ErrorKind::AccessDenied,
            ToolError::Timeout(_) => ErrorKind::ExecutionTimeout,
            ToolError::Execution(_) | ToolError::OutputLimit(_) | ToolError::Serialization(_) => {
                ErrorKind::ExecutionFailed
            }
        }
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        ToolError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::Execution(err.to_string())
    }
}

impl From<ToolError> for ExtensionError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::NotFound(s) => ExtensionError::NotFound(s),
            ToolError::InvalidArguments(s) => ExtensionError::InvalidArguments(s),
            ToolError::PermissionDenied(s) => ExtensionError::AccessDenied(s),
            ToolError::Timeout(ms) => ExtensionError::Timeout(ms),
            other => ExtensionError::ExecutionFailed(other.to_string()),
        }
    }
}

/// Result type for tool operations.
pub type ToolResult<T> = std::result::Result<T, ToolError>;

// ============================================================================
// Tool Trait
// ============================================================================

/// Output of a successful tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub data: Value,
}

impl ToolOutput {
    pub fn success(data: Value) -> Self {
        Self { data }
    }
}

/// Tool definition, as exposed for introspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A built-in capability.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value {
        object_schema(json!({}), Vec::new())
    }

    async fn execute(&self, args: Value) -> ToolResult<ToolOutput>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

pub type DynTool = Arc<dyn Tool>;

/// Object schema with the given properties.
pub fn object_schema(properties: Value, required: Vec<String>) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

pub fn string_property(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

pub fn number_property(description: &str) -> Value {
    json!({ "type": "number", "description": description })
}

pub fn boolean_property(description: &str) -> Value {
    json!({ "type": "boolean", "description": description })
}

pub fn array_property(item_type: &str, description: &str) -> Value {
    json!({ "type": "array", "items": { "type": item_type }, "description": description })
}

/// Tool backed by a closure.
pub struct FnTool {
    name: String,
    description: String,
    handler: Arc<dyn Fn(Value) -> BoxFuture<'static, ToolResult<Value>> + Send + Sync>,
}

impl FnTool {
    /// Create a tool from a handler. Without a description, `Tool: <name>` is used.
    pub fn new<F, Fut>(name: impl Into<String>, description: Option<&str>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult<Value>> + Send + 'static,
    {
        let name = name.into();
        let description = description
            .map(str::to_string)
            .unwrap_or_else(|| format!("Tool: {name}"));
        Self {
            name,
            description,
            handler: Arc::new(move |args| handler(args).boxed()),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn execute(&self, args: Value) -> ToolResult<ToolOutput> {
        (self.handler)(args).await.map(ToolOutput::success)
    }
}

// ============================================================================
// Tool Registry
// ============================================================================

/// Registry of built-in tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, DynTool>>,
}

impl ToolRegistry {
    /// Create a new tool registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&self, tool: DynTool) {
        let name = tool.name().to_string();
        debug!(tool = %name, "Tool registered");
        self.tools.write().insert(name, tool);
    }

    /// Register multiple tools.
    pub fn register_all(&self, tools: Vec<DynTool>) {
        for tool in tools {
            self.register(tool);
        }
    }

    /// Register a closure as a tool.
    pub fn register_fn<F, Fut>(&self, name: &str, description: Option<&str>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult<Value>> + Send + 'static,
    {
        self.register(Arc::new(FnTool::new(name, description, handler)));
    }

    /// Unregister a tool by name.
    pub fn unregister(&self, name: &str) -> bool {
        self.tools.write().remove(name).is_some()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<DynTool> {
        self.tools.read().get(name).cloned()
    }

    /// Check if a tool exists.
    pub fn has(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    /// Tool names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool name to description.
    pub fn descriptions(&self) -> BTreeMap<String, String> {
        self.tools
            .read()
            .values()
            .map(|t| (t.name().to_string(), t.description().to_string()))
            .collect()
    }

    /// Definitions of all tools, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.read().values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by name.
    pub async fn execute(&self, name: &str, args: Value) -> ToolResult<ToolOutput> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        match AssertUnwindSafe(tool.execute(args)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(ToolError::Execution(format!(
                "tool panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }

    /// Execute a tool and normalize the outcome into an envelope.
    pub async fn invoke(&self, name: &str, args: Value) -> Envelope {
        let started = Instant::now();
        let outcome = self.execute(name, args).await;
        let elapsed = started.elapsed();
        match outcome {
            Ok(output) => {
                debug!(tool = name, duration_ms = elapsed.as_millis() as u64, "Tool succeeded");
                Envelope::success(name, TOOL_METHOD, output.data, elapsed)
            }
            Err(e) => {
                warn!(tool = name, kind = %e.kind(), error = %e, "Tool failed");
                Envelope::failure(name, TOOL_METHOD, e.kind(), e.to_string(), elapsed)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}
