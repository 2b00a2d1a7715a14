//! Invocation dispatcher for extension methods.
//!
//! Resolves `(extension, method)` against the registry, checks arguments,
//! runs the call with panic containment and turns every outcome into an
//! [`Envelope`]. Errors never escape `invoke`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::registry::{ExtensionRecord, ExtensionRegistry};
use super::safety::contain;
use super::system::{describe_methods, ExtensionError, Result};
use crate::envelope::Envelope;

// ============================================================================
// Dispatcher
// ============================================================================

/// Dispatches method calls to registered extensions.
pub struct Dispatcher {
    registry: Arc<ExtensionRegistry>,
    strict_arguments: bool,
    call_timeout: Option<Duration>,
}

impl Dispatcher {
    /// Create a dispatcher with advisory argument checks and no call timeout.
    pub fn new(registry: Arc<ExtensionRegistry>) -> Self {
        Self {
            registry,
            strict_arguments: false,
            call_timeout: None,
        }
    }

    /// Reject calls missing a required parameter instead of only warning.
    pub fn with_strict_arguments(mut self, strict: bool) -> Self {
        self.strict_arguments = strict;
        self
    }

    /// Bound every extension call by `timeout`.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.registry
    }

    /// Resolve a loaded extension exposing `method`.
    pub async fn resolve(&self, target: &str, method: &str) -> Result<Arc<ExtensionRecord>> {
        let record = self
            .registry
            .get(target)
            .await
            .ok_or_else(|| ExtensionError::NotFound(target.to_string()))?;
        if !record.is_loaded() {
            return Err(ExtensionError::NotLoaded(target.to_string()));
        }
        if !record.instance.has_method(method) {
            return Err(ExtensionError::MethodNotFound {
                extension: target.to_string(),
                method: method.to_string(),
            });
        }
        Ok(record)
    }

    /// Run `method` on extension `target`.
    pub async fn invoke(&self, target: &str, method: &str, params: Value) -> Envelope {
        let started = Instant::now();
        let outcome = match self.resolve(target, method).await {
            Ok(record) => self.call_record(&record, method, params).await,
            Err(e) => Err(e),
        };
        finish(target, method, outcome, started.elapsed())
    }

    /// Run `method` on every loaded extension exposing it, in name order.
    ///
    /// Calls run one after another; each failure is captured in its own
    /// envelope.
    pub async fn invoke_all(&self, method: &str, params: Value) -> Vec<Envelope> {
        let mut envelopes = Vec::new();
        for record in self.registry.loaded().await {
            if !record.instance.has_method(method) {
                continue;
            }
            let started = Instant::now();
            let outcome = self.call_record(&record, method, params.clone()).await;
            envelopes.push(finish(&record.name, method, outcome, started.elapsed()));
        }
        envelopes
    }

    async fn call_record(&self, record: &ExtensionRecord, method: &str, params: Value) -> Result<Value> {
        let params = normalize_params(params)?;
        self.check_arguments(record, method, &params)?;

        let call = contain(&record.name, record.instance.call(method, params));
        match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| ExtensionError::Timeout(limit.as_millis() as u64))?,
            None => call.await,
        }
    }

    fn check_arguments(&self, record: &ExtensionRecord, method: &str, params: &Value) -> Result<()> {
        let descriptors = describe_methods(record.instance.as_ref());
        let Some(descriptor) = descriptors.iter().find(|d| d.name == method) else {
            return Ok(());
        };
        let missing = descriptor.missing_required(params);
        if missing.is_empty() {
            return Ok(());
        }
        if self.strict_arguments {
            return Err(ExtensionError::InvalidArguments(format!(
                "missing required parameter(s): {}",
                missing.join(", ")
            )));
        }
        warn!(
            extension = %record.name,
            method,
            missing = ?missing,
            "Call is missing required parameters"
        );
        Ok(())
    }
}

/// Calls take a single parameter object; `null` stands for no parameters.
fn normalize_params(params: Value) -> Result<Value> {
    match params {
        Value::Null => Ok(Value::Object(Map::new())),
        Value::Object(_) => Ok(params),
        other => Err(ExtensionError::InvalidArguments(format!(
            "parameters must be a JSON object, got {}",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn finish(target: &str, method: &str, outcome: Result<Value>, elapsed: Duration) -> Envelope {
    match outcome {
        Ok(result) => {
            debug!(extension = target, method, duration_ms = elapsed.as_millis() as u64, "Invocation succeeded");
            Envelope::success(target, method, result, elapsed)
        }
        Err(e) => {
            warn!(extension = target, method, kind = %e.kind(), error = %e, "Invocation failed");
            Envelope::failure(target, method, e.kind(), e.to_string(), elapsed)
        }
    }
}
