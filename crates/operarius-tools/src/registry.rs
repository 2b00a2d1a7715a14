//! Tool registry assembly.

use std::sync::Arc;
use std::time::Duration;

use operarius_core::config::ToolsConfig;
use operarius_core::tools::{DynTool, ToolRegistry};

use crate::builtin::fs::FsPolicy;
use crate::builtin::{
    CalculatorTool, DateTimeTool, FileInfoTool, ListFilesTool, PingTool, PortScanTool,
    ReadFileTool, ShellExecTool, WebFetchTool, WriteFileTool,
};
use crate::path_guard::PathGuard;

/// Builder for creating a tool registry with the built-in tools.
///
/// ```rust,no_run
/// use operarius_core::config::ToolsConfig;
/// use operarius_tools::ToolRegistryBuilder;
///
/// let registry = ToolRegistryBuilder::new(ToolsConfig::default())
///     .with_file_tools()
///     .with_calculator_tool()
///     .build();
/// assert!(registry.has("calculator"));
/// ```
pub struct ToolRegistryBuilder {
    registry: ToolRegistry,
    config: ToolsConfig,
    guard: PathGuard,
}

impl ToolRegistryBuilder {
    /// Create a new builder; relative allowed directories resolve against the working directory.
    pub fn new(config: ToolsConfig) -> Self {
        let guard = PathGuard::new(&config.allowed_directories);
        Self::with_guard(config, guard)
    }

    /// Create a new builder with an explicit path guard.
    pub fn with_guard(config: ToolsConfig, guard: PathGuard) -> Self {
        Self {
            registry: ToolRegistry::new(),
            config,
            guard,
        }
    }

    /// Add a custom tool.
    pub fn with_tool(self, tool: DynTool) -> Self {
        self.registry.register(tool);
        self
    }

    // ========================================================================
    // Filesystem
    // ========================================================================

    /// Add `read_file`, `write_file`, `list_files` and `file_info`.
    pub fn with_file_tools(self) -> Self {
        let policy = FsPolicy::new(self.guard.clone(), self.config.max_file_size_bytes());
        self.with_tool(Arc::new(ReadFileTool::new(policy.clone())))
            .with_tool(Arc::new(WriteFileTool::new(policy.clone())))
            .with_tool(Arc::new(ListFilesTool::new(policy.clone())))
            .with_tool(Arc::new(FileInfoTool::new(policy)))
    }

    // ========================================================================
    // System
    // ========================================================================

    /// Add `shell_exec`; its `cwd` argument is checked against the allowed directories.
    pub fn with_shell_tool(self) -> Self {
        let tool = ShellExecTool::new(self.config.shell_timeout(), self.config.shell_max_output_bytes)
            .with_guard(self.guard.clone());
        self.with_tool(Arc::new(tool))
    }

    pub fn with_datetime_tool(self) -> Self {
        self.with_tool(Arc::new(DateTimeTool))
    }

    pub fn with_calculator_tool(self) -> Self {
        self.with_tool(Arc::new(CalculatorTool))
    }

    // ========================================================================
    // Network
    // ========================================================================

    /// Add `web_fetch`, `ping` and `port_scan`.
    pub fn with_network_tools(self) -> Self {
        let fetch = WebFetchTool::new(self.config.fetch_timeout(), self.config.fetch_max_bytes);
        let ping = PingTool::new(Duration::from_secs(self.config.ping_timeout_secs));
        let scan = PortScanTool::new(Duration::from_millis(self.config.port_scan_timeout_ms));
        self.with_tool(Arc::new(fetch))
            .with_tool(Arc::new(ping))
            .with_tool(Arc::new(scan))
    }

    /// Add every built-in tool.
    pub fn with_default_tools(self) -> Self {
        self.with_file_tools()
            .with_shell_tool()
            .with_network_tools()
            .with_datetime_tool()
            .with_calculator_tool()
    }

    /// Build the registry.
    pub fn build(self) -> ToolRegistry {
        self.registry
    }
}

/// Registry with every built-in tool.
pub fn default_registry(config: ToolsConfig) -> ToolRegistry {
    ToolRegistryBuilder::new(config).with_default_tools().build()
}
