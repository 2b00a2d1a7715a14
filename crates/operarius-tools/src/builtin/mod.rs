//! Built-in tools.

pub mod calculator;
pub mod datetime;
pub mod fs;
pub mod net;
pub mod shell;

pub use calculator::CalculatorTool;
pub use datetime::DateTimeTool;
pub use fs::{FileInfoTool, ListFilesTool, ReadFileTool, WriteFileTool};
pub use net::{PingTool, PortScanTool, WebFetchTool};
pub use shell::ShellExecTool;

use operarius_core::tools::{ToolError, ToolResult};
use serde_json::Value;

pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> ToolResult<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing required string argument '{key}'")))
}

pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

/// Cut `value` to at most `limit` bytes on a char boundary.
pub(crate) fn truncate_bytes(value: &str, limit: usize) -> &str {
    if value.len() <= limit {
        return value;
    }
    let mut end = limit;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_required_str() {
        let args = json!({"path": "a", "n": 1});
        assert_eq!(required_str(&args, "path").unwrap(), "a");
        assert!(matches!(required_str(&args, "n"), Err(ToolError::InvalidArguments(_))));
        assert!(optional_str(&args, "missing").is_none());
    }

    #[test]
    fn test_truncate_bytes_keeps_char_boundaries() {
        assert_eq!(truncate_bytes("héllo", 2), "h");
        assert_eq!(truncate_bytes("abc", 10), "abc");
    }
}
