use std::fmt::Write;

use async_trait::async_trait;
use chrono::{Local, Utc};
use operarius_core::tools::{object_schema, string_property, Tool, ToolError, ToolOutput, ToolResult};
use serde_json::{json, Value};

use super::optional_str;

/// Current date and time.
pub struct DateTimeTool;

#[async_trait]
impl Tool for DateTimeTool {
    fn name(&self) -> &str {
        "datetime"
    }

    fn description(&self) -> &str {
        "Get the current date and time"
    }

    fn parameters(&self) -> Value {
        object_schema(
            json!({ "format": string_property("Optional strftime format for the local time") }),
            vec![],
        )
    }

    async fn execute(&self, args: Value) -> ToolResult<ToolOutput> {
        let utc = Utc::now();
        let local = utc.with_timezone(&Local);

        let mut data = json!({
            "iso": utc.to_rfc3339(),
            "local": local.to_rfc3339(),
            "unix": utc.timestamp(),
            "timezone": local.format("%:z").to_string(),
        });
        if let Some(format) = optional_str(&args, "format") {
            // `to_string` would panic on an unknown specifier.
            let mut formatted = String::new();
            if write!(formatted, "{}", local.format(format)).is_err() {
                return Err(ToolError::InvalidArguments(format!("invalid format '{format}'")));
            }
            data["formatted"] = Value::String(formatted);
        }
        Ok(ToolOutput::success(data))
    }
}
