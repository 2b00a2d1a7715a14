//! Normalized invocation result.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorKind;

/// Result of one dispatched invocation, success or failure.
///
/// `extension` holds the target name: the extension name for extension
/// calls, the tool name for tool calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub extension: String,
    pub method: String,
    pub duration_ms: u64,
}

impl Envelope {
    pub fn success(target: &str, method: &str, result: Value, elapsed: Duration) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            error_kind: None,
            extension: target.to_string(),
            method: method.to_string(),
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn failure(
        target: &str,
        method: &str,
        kind: ErrorKind,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(message.into()),
            error_kind: Some(kind),
            extension: target.to_string(),
            method: method.to_string(),
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Kind of the failure, if this is a failure envelope.
    pub fn kind(&self) -> Option<ErrorKind> {
        self.error_kind
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_shape() {
        let env = Envelope::success("fs", "readFile", json!({"content": "x"}), Duration::from_millis(3));
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(
            value,
            json!({
                "success": true,
                "result": {"content": "x"},
                "extension": "fs",
                "method": "readFile",
                "duration_ms": 3
            })
        );
    }

    #[test]
    fn test_failure_shape() {
        let env = Envelope::failure("fs", "nope", ErrorKind::MethodNotFound, "no such method", Duration::ZERO);
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error_kind"], "MethodNotFound");
        assert!(value.get("result").is_none());
        assert_eq!(env.kind(), Some(ErrorKind::MethodNotFound));
    }
}
