//! Hook bus: named interception points over a JSON payload.
//!
//! Callbacks subscribed to a hook run one after another in subscription
//! order, each receiving the payload produced by the previous one. A callback
//! that fails or panics is skipped: the next callback sees the payload as it
//! was before the failing step.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use super::safety::panic_message;

/// Runs before a capability method executes.
pub const PRE_PROCESSING: &str = "pre-processing";
/// Runs after a capability method has produced its envelope.
pub const POST_PROCESSING: &str = "post-processing";

/// Error returned by a hook callback.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl From<String> for HookError {
    fn from(message: String) -> Self {
        HookError(message)
    }
}

impl From<&str> for HookError {
    fn from(message: &str) -> Self {
        HookError(message.to_string())
    }
}

impl From<super::ExtensionError> for HookError {
    fn from(err: super::ExtensionError) -> Self {
        HookError(err.to_string())
    }
}

pub type HookFuture = BoxFuture<'static, Result<Value, HookError>>;
pub type HookCallback = Arc<dyn Fn(Value) -> HookFuture + Send + Sync>;

#[derive(Clone)]
struct Subscription {
    owner: Option<String>,
    callback: HookCallback,
}

/// Named interception pipeline.
#[derive(Default)]
pub struct HookBus {
    hooks: RwLock<HashMap<String, Vec<Subscription>>>,
}

impl HookBus {
    /// Create an empty hook bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback to `hook`, creating the hook if needed.
    pub fn subscribe<F, Fut>(&self, hook: &str, callback: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HookError>> + Send + 'static,
    {
        self.push(hook, None, boxed(callback));
    }

    /// Registration handle that tags subscriptions with `owner`.
    pub fn registrar(&self, owner: impl Into<String>) -> HookRegistrar<'_> {
        HookRegistrar {
            bus: self,
            owner: owner.into(),
        }
    }

    fn push(&self, hook: &str, owner: Option<String>, callback: HookCallback) {
        debug!(hook, owner = ?owner, "Hook subscribed");
        self.hooks
            .write()
            .entry(hook.to_string())
            .or_default()
            .push(Subscription { owner, callback });
    }

    /// Fold `payload` through every callback subscribed to `hook`.
    pub async fn run(&self, hook: &str, payload: Value) -> Value {
        // Snapshot so subscriptions made during the run don't affect it.
        let subscribers = match self.hooks.read().get(hook) {
            Some(list) if !list.is_empty() => list.clone(),
            _ => return payload,
        };

        let mut current = payload;
        for (index, sub) in subscribers.iter().enumerate() {
            let owner = sub.owner.as_deref().unwrap_or("host");
            let started = std::panic::catch_unwind(AssertUnwindSafe(|| (sub.callback)(current.clone())));
            let outcome = match started {
                Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
                Err(panic) => Err(panic),
            };

            match outcome {
                Ok(Ok(next)) => current = next,
                Ok(Err(e)) => {
                    warn!(hook, owner, index, error = %e, "Hook callback failed, keeping previous payload");
                }
                Err(panic) => {
                    warn!(
                        hook,
                        owner,
                        index,
                        panic = %panic_message(panic.as_ref()),
                        "Hook callback panicked, keeping previous payload"
                    );
                }
            }
        }
        current
    }

    /// Remove every subscription owned by `owner`. Returns how many were removed.
    pub fn purge_owner(&self, owner: &str) -> usize {
        let mut hooks = self.hooks.write();
        let mut removed = 0;
        for list in hooks.values_mut() {
            let before = list.len();
            list.retain(|s| s.owner.as_deref() != Some(owner));
            removed += before - list.len();
        }
        hooks.retain(|_, list| !list.is_empty());
        removed
    }

    /// Drop all hooks.
    pub fn clear(&self) {
        self.hooks.write().clear();
    }

    /// Number of callbacks subscribed to `hook`.
    pub fn subscriber_count(&self, hook: &str) -> usize {
        self.hooks.read().get(hook).map_or(0, Vec::len)
    }

    /// Names of hooks with at least one subscriber, sorted.
    pub fn hook_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.hooks.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Hook bus handle given to an extension during registration.
pub struct HookRegistrar<'a> {
    bus: &'a HookBus,
    owner: String,
}

impl HookRegistrar<'_> {
    /// Subscribe on behalf of the owning extension.
    pub fn subscribe<F, Fut>(&self, hook: &str, callback: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HookError>> + Send + 'static,
    {
        self.bus.push(hook, Some(self.owner.clone()), boxed(callback));
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }
}

fn boxed<F, Fut>(callback: F) -> HookCallback
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HookError>> + Send + 'static,
{
    Arc::new(move |payload| callback(payload).boxed())
}
