//! Extension execution core.
//!
//! - [`ExtensionRegistry`]: loaded extension records keyed by name
//! - [`HookBus`]: named interception points extensions can subscribe to
//! - [`Dispatcher`]: uniform method invocation with result envelopes
//! - [`ExtensionLoader`]: discovery and lifecycle (load, reload, unload)
//!
//! # Writing an extension
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use operarius_core::extension::{Extension, ExtensionError, Initialize, Result};
//! use serde_json::{json, Value};
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl Extension for Greeter {
//!     fn methods(&self) -> Vec<String> {
//!         vec!["greet".to_string()]
//!     }
//!
//!     async fn call(&self, method: &str, params: Value) -> Result<Value> {
//!         match method {
//!             "greet" => Ok(json!({ "message": format!("hello {}", params["who"]) })),
//!             _ => Err(ExtensionError::ExecutionFailed(method.to_string())),
//!         }
//!     }
//! }
//! ```

pub mod dispatcher;
pub mod hooks;
pub mod loader;
pub mod registry;
pub mod safety;
pub mod system;

pub use dispatcher::Dispatcher;
pub use hooks::{HookBus, HookCallback, HookError, HookRegistrar, POST_PROCESSING, PRE_PROCESSING};
pub use loader::{
    ExtensionCatalog, ExtensionFactory, ExtensionLoader, ExtensionManifest, LoadFailure, LoadReport,
};
pub use registry::{ExtensionListing, ExtensionRecord, ExtensionRegistry, RegistrationPolicy};
pub use system::{
    describe_methods, DescribeMethods, DynExtension, Extension, ExtensionError, ExtensionState,
    Initialize, Load, MethodDescriptor, ParameterSpec, RegisterHooks, Result, Unload,
};
