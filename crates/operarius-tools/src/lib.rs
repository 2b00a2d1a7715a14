//! Built-in tools for the Operarius gateway.
//!
//! ## Tools
//!
//! - **Filesystem**: `read_file`, `write_file`, `list_files`, `file_info`,
//!   confined to the configured allowed directories by [`PathGuard`]
//! - **System**: `shell_exec` (timeout and output cap), `datetime`
//! - **Network**: `web_fetch`, `ping`, `port_scan`
//! - **Math**: `calculator`, a grammar-based evaluator
//!
//! ## Example
//!
//! ```rust,no_run
//! use operarius_core::config::ToolsConfig;
//! use operarius_tools::default_registry;
//! use serde_json::json;
//!
//! # async fn run() {
//! let registry = default_registry(ToolsConfig::default());
//! let envelope = registry
//!     .invoke("calculator", json!({"expression": "(2 + 3) * 4"}))
//!     .await;
//! assert!(envelope.is_success());
//! # }
//! ```

pub mod builtin;
pub mod path_guard;
pub mod registry;

pub use builtin::calculator::{evaluate, CalcError};
pub use builtin::fs::FsPolicy;
pub use builtin::{
    CalculatorTool, DateTimeTool, FileInfoTool, ListFilesTool, PingTool, PortScanTool,
    ReadFileTool, ShellExecTool, WebFetchTool, WriteFileTool,
};
pub use path_guard::PathGuard;
pub use registry::{default_registry, ToolRegistryBuilder};

// Re-export the tool contract so callers need a single import.
pub use operarius_core::tools::{
    DynTool, Tool, ToolDefinition, ToolError, ToolOutput, ToolRegistry, ToolResult,
};
