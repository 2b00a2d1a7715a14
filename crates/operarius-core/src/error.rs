//! Error types shared across the gateway core.
//!
//! Every failure that can reach a caller is classified by an [`ErrorKind`],
//! which is what ends up in a failure envelope.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::extension::ExtensionError;
use crate::tools::ToolError;

/// Classification of a failure, carried in result envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The extension or tool does not exist or is not loaded.
    TargetNotFound,
    /// The target exists but does not expose the requested method.
    MethodNotFound,
    /// An extension failed during construction or `initialize`.
    ExtensionInitFailed,
    /// A path argument resolved outside the allowed directories.
    AccessDenied,
    /// A shell or network operation exceeded its time limit.
    ExecutionTimeout,
    /// Arguments were missing, malformed or rejected.
    InvalidArguments,
    /// A name was registered twice under the strict registration policy.
    DuplicateNameConflict,
    /// Any other error raised by the invoked code.
    ExecutionFailed,
}

impl ErrorKind {
    /// Stable string form, also used as a metrics label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TargetNotFound => "TargetNotFound",
            ErrorKind::MethodNotFound => "MethodNotFound",
            ErrorKind::ExtensionInitFailed => "ExtensionInitFailed",
            ErrorKind::AccessDenied => "AccessDenied",
            ErrorKind::ExecutionTimeout => "ExecutionTimeout",
            ErrorKind::InvalidArguments => "InvalidArguments",
            ErrorKind::DuplicateNameConflict => "DuplicateNameConflict",
            ErrorKind::ExecutionFailed => "ExecutionFailed",
        }
    }

    /// Whether the caller asked for something that does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ErrorKind::TargetNotFound | ErrorKind::MethodNotFound)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Crate-level error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Extension(#[from] ExtensionError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Monitoring error: {0}")]
    Monitoring(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Envelope classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Extension(e) => e.kind(),
            Error::Tool(e) => e.kind(),
            Error::Config(_) => ErrorKind::InvalidArguments,
            Error::Monitoring(_) | Error::Io(_) => ErrorKind::ExecutionFailed,
        }
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Monitoring(err.to_string())
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serializes_as_name() {
        let json = serde_json::to_string(&ErrorKind::AccessDenied).unwrap();
        assert_eq!(json, "\"AccessDenied\"");
        assert_eq!(ErrorKind::ExecutionTimeout.to_string(), "ExecutionTimeout");
    }

    #[test]
    fn test_error_kind_mapping() {
        let err: Error = ExtensionError::MethodNotFound {
            extension: "fs".to_string(),
            method: "nope".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::MethodNotFound);
        assert!(err.kind().is_not_found());

        let err: Error = ToolError::Timeout(30).into();
        assert_eq!(err.kind(), ErrorKind::ExecutionTimeout);
        assert!(!err.kind().is_not_found());
    }
}
