//! Core of the Operarius gateway.
//!
//! This crate holds the extension execution core (registry, hook bus,
//! dispatcher, loader), the built-in tool abstraction, monitoring, and the
//! [`Gateway`] context object tying them together.

pub mod config;
pub mod envelope;
pub mod error;
pub mod extension;
pub mod gateway;
pub mod monitoring;
pub mod tools;

pub use config::GatewayConfig;
pub use envelope::Envelope;
pub use error::{Error, ErrorKind, Result};
pub use gateway::{Gateway, GatewayBuilder};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{defaults, env_vars, GatewayConfig};
    pub use crate::envelope::Envelope;
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::extension::{
        DescribeMethods, DynExtension, Extension, ExtensionCatalog, ExtensionError, HookError,
        HookRegistrar, Initialize, Load, MethodDescriptor, ParameterSpec, RegisterHooks, Unload,
        POST_PROCESSING, PRE_PROCESSING,
    };
    pub use crate::gateway::Gateway;
    pub use crate::tools::{DynTool, Tool, ToolDefinition, ToolError, ToolOutput, ToolRegistry};
}
