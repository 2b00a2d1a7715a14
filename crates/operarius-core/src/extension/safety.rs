//! Panic containment for extension code.
//!
//! Extensions run in-process with host privilege, so a panic inside one must
//! be turned into an ordinary error at the call boundary.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::error;

use super::system::{ExtensionError, Result};

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Await `fut`, converting a panic into [`ExtensionError::Panicked`].
pub async fn contain<F, T>(extension: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(extension, panic = %message, "Extension panicked");
            Err(ExtensionError::Panicked(message))
        }
    }
}
