//! `example` extension: the smallest useful extension.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use operarius_core::extension::{
    DescribeMethods, DynExtension, Extension, ExtensionError, Initialize, Load, MethodDescriptor,
    ParameterSpec, Result, Unload,
};
use serde_json::{json, Value};
use tracing::info;

/// Factory name used in manifests.
pub const FACTORY: &str = "example";

/// Echoes its input back with a processing stamp.
pub struct ExampleExtension {
    config: Value,
}

impl ExampleExtension {
    pub fn new(config: Value) -> Self {
        Self { config }
    }

    /// Catalog factory.
    pub fn factory(config: &Value) -> Result<DynExtension> {
        Ok(Arc::new(Self::new(config.clone())))
    }

    fn example_command(&self, params: &Value) -> Value {
        let input = params.get("input").cloned().unwrap_or(Value::Null);
        let shown = match &input {
            Value::String(s) => s.clone(),
            Value::Null => "undefined".to_string(),
            other => other.to_string(),
        };
        json!({
            "success": true,
            "message": format!("Example plugin processed: {shown}"),
            "data": {
                "originalInput": input,
                "processed": true,
                "timestamp": Utc::now().to_rfc3339(),
            },
        })
    }
}

#[async_trait]
impl Extension for ExampleExtension {
    fn methods(&self) -> Vec<String> {
        vec!["exampleCommand".to_string()]
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        match method {
            "exampleCommand" => Ok(self.example_command(&params)),
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

    fn as_method_catalog(&self) -> Option<&dyn DescribeMethods> {
        Some(self)
    }
}

#[async_trait]
impl Initialize for ExampleExtension {
    async fn initialize(&self) -> Result<()> {
        info!(config = %self.config, "Example extension initializing");
        Ok(())
    }
}

#[async_trait]
impl Load for ExampleExtension {
    async fn load(&self) -> Result<()> {
        info!("Example extension loaded");
        Ok(())
    }
}

#[async_trait]
impl Unload for ExampleExtension {
    async fn unload(&self) -> Result<()> {
        info!("Example extension unloading");
        Ok(())
    }
}

impl DescribeMethods for ExampleExtension {
    fn available_methods(&self) -> Vec<MethodDescriptor> {
        vec![MethodDescriptor::named("exampleCommand")
            .with_description("Processes an example command")
            .with_param("input", ParameterSpec::required("string", "Input to process"))]
    }
}
