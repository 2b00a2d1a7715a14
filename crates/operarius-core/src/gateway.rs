//! Gateway context: the single owner of registry, hook bus, dispatcher,
//! loader, tools and monitoring, and the entry points an outer layer calls.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::GatewayConfig;
use crate::envelope::Envelope;
use crate::error::Result;
use crate::extension::{
    Dispatcher, ExtensionCatalog, ExtensionListing, ExtensionLoader,
    ExtensionRecord, ExtensionRegistry, HookBus, LoadReport, POST_PROCESSING, PRE_PROCESSING,
};
use crate::monitoring::{InvocationSource, MonitoringService};
use crate::tools::{ToolDefinition, ToolError, ToolRegistry};

/// Builder for [`Gateway`].
pub struct GatewayBuilder {
    config: GatewayConfig,
    catalog: ExtensionCatalog,
    tools: Option<Arc<ToolRegistry>>,
    monitoring: Option<Arc<MonitoringService>>,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            catalog: ExtensionCatalog::new(),
            tools: None,
            monitoring: None,
        }
    }

    /// Extension factories available to manifests.
    pub fn with_catalog(mut self, catalog: ExtensionCatalog) -> Self {
        self.catalog.extend(catalog);
        self
    }

    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_monitoring(mut self, monitoring: Arc<MonitoringService>) -> Self {
        self.monitoring = Some(monitoring);
        self
    }

    pub fn build(self) -> Result<Gateway> {
        let registry = Arc::new(ExtensionRegistry::with_policy(self.config.extensions.policy));
        let hooks = Arc::new(HookBus::new());
        let dispatcher = Dispatcher::new(registry.clone())
            .with_strict_arguments(self.config.extensions.strict_arguments)
            .with_call_timeout(self.config.extensions.call_timeout());
        let loader = ExtensionLoader::new(
            self.config.extensions.directory.clone(),
            self.catalog,
            registry.clone(),
            hooks.clone(),
        );
        let monitoring = match self.monitoring {
            Some(monitoring) => monitoring,
            None => Arc::new(MonitoringService::new(self.config.monitoring.clone())?),
        };

        Ok(Gateway {
            config: self.config,
            registry,
            hooks,
            dispatcher,
            loader,
            tools: self.tools.unwrap_or_default(),
            monitoring,
        })
    }
}

/// The gateway core.
pub struct Gateway {
    config: GatewayConfig,
    registry: Arc<ExtensionRegistry>,
    hooks: Arc<HookBus>,
    dispatcher: Dispatcher,
    loader: ExtensionLoader,
    tools: Arc<ToolRegistry>,
    monitoring: Arc<MonitoringService>,
}

impl Gateway {
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    /// Discover and load all extensions.
    pub async fn start(&self) -> LoadReport {
        let report = self.loader.load_all().await;
        for failure in &report.failed {
            self.monitoring
                .record_error(failure.kind, &failure.name, &failure.error);
        }
        self.sync_loaded_gauge().await;
        report
    }

    async fn sync_loaded_gauge(&self) {
        self.monitoring
            .set_extensions_loaded(self.registry.loaded().await.len());
    }

    // ========================================================================
    // Extensions
    // ========================================================================

    /// Introspection listing of every registered extension.
    pub async fn list_extensions(&self) -> Vec<ExtensionListing> {
        self.registry.list_all().await
    }

    /// Run one extension method.
    pub async fn invoke_extension_method(&self, name: &str, method: &str, params: Value) -> Envelope {
        let envelope = self.dispatcher.invoke(name, method, params).await;
        self.monitoring
            .record_invocation(InvocationSource::Extension, &envelope);
        envelope
    }

    /// Run `method` on every loaded extension exposing it.
    pub async fn invoke_all(&self, method: &str, params: Value) -> Vec<Envelope> {
        let envelopes = self.dispatcher.invoke_all(method, params).await;
        for envelope in &envelopes {
            self.monitoring
                .record_invocation(InvocationSource::Extension, envelope);
        }
        envelopes
    }

    /// Full request path: `pre-processing` hook, dispatch, `post-processing` hook.
    ///
    /// The pre-processing payload is `{extension, method, params}`; hooks may
    /// rewrite `params`. The post-processing payload is the serialized
    /// envelope; a rewrite that no longer parses as an envelope is ignored.
    pub async fn process_request(&self, name: &str, method: &str, params: Value) -> Envelope {
        let request = json!({ "extension": name, "method": method, "params": params });
        let request = self.hooks.run(PRE_PROCESSING, request).await;
        let params = request.get("params").cloned().unwrap_or(Value::Null);

        let envelope = self.invoke_extension_method(name, method, params).await;
        if self.hooks.subscriber_count(POST_PROCESSING) == 0 {
            return envelope;
        }

        let serialized = match serde_json::to_value(&envelope) {
            Ok(value) => value,
            Err(_) => return envelope,
        };
        let processed = self.hooks.run(POST_PROCESSING, serialized).await;
        match serde_json::from_value(processed) {
            Ok(rewritten) => rewritten,
            Err(e) => {
                debug!(extension = name, method, error = %e, "Post-processing result is not an envelope, ignoring");
                envelope
            }
        }
    }

    /// Resolve an extension method, surfacing not-found cases as errors.
    pub async fn require_extension_method(&self, name: &str, method: &str) -> Result<Arc<ExtensionRecord>> {
        Ok(self.dispatcher.resolve(name, method).await?)
    }

    /// Reload one extension from its manifest.
    pub async fn reload_extension(&self, name: &str) -> Result<ExtensionListing> {
        let outcome = self.loader.reload(name).await;
        self.sync_loaded_gauge().await;
        let record = outcome.map_err(|e| {
            self.monitoring.record_error(e.kind(), name, &e.to_string());
            e
        })?;
        Ok(record.listing())
    }

    /// Unload one extension.
    pub async fn unload_extension(&self, name: &str) -> Result<()> {
        self.loader.unload(name).await?;
        self.sync_loaded_gauge().await;
        Ok(())
    }

    /// Unload everything. Registry and hook bus end up empty.
    pub async fn shutdown(&self) {
        self.loader.unload_all().await;
        self.sync_loaded_gauge().await;
        info!("Gateway shut down");
    }

    // ========================================================================
    // Tools
    // ========================================================================

    /// Tool name to description.
    pub fn list_tools(&self) -> BTreeMap<String, String> {
        self.tools.descriptions()
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.definitions()
    }

    /// Run a built-in tool.
    pub async fn invoke_tool(&self, name: &str, params: Value) -> Envelope {
        let envelope = self.tools.invoke(name, params).await;
        self.monitoring
            .record_invocation(InvocationSource::Tool, &envelope);
        envelope
    }

    /// Check that a tool exists, surfacing a missing tool as an error.
    pub fn require_tool(&self, name: &str) -> Result<()> {
        if self.tools.has(name) {
            Ok(())
        } else {
            Err(ToolError::NotFound(name.to_string()).into())
        }
    }

    // ========================================================================
    // Hooks
    // ========================================================================

    /// Run a hook pipeline over `payload`.
    pub async fn run_hook(&self, hook: &str, payload: Value) -> Value {
        self.hooks.run(hook, payload).await
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.registry
    }

    pub fn hooks(&self) -> &Arc<HookBus> {
        &self.hooks
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn loader(&self) -> &ExtensionLoader {
        &self.loader
    }

    pub fn monitoring(&self) -> &Arc<MonitoringService> {
        &self.monitoring
    }
}

