//! Network tools: HTTP fetch, ping and TCP port scan.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use operarius_core::tools::{
    array_property, number_property, object_schema, string_property, Tool, ToolError, ToolOutput,
    ToolResult,
};
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use super::{required_str, truncate_bytes};

/// Host names and IP literals only; anything else never reaches a socket or shell.
static HOST_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9.\-:]+$").expect("host regex"));

/// Maximum number of ports accepted by one scan.
pub const MAX_SCAN_PORTS: usize = 1024;

/// Default upper bound on a whole port scan.
pub const DEFAULT_SCAN_DEADLINE: Duration = Duration::from_secs(30);

/// Maximum echo requests per ping.
pub const MAX_PING_COUNT: u64 = 10;

fn validate_host(host: &str) -> ToolResult<&str> {
    let host = host.trim();
    if host.is_empty() || host.starts_with('-') || !HOST_PATTERN.is_match(host) {
        return Err(ToolError::InvalidArguments(format!("invalid host '{host}'")));
    }
    Ok(host)
}

// ============================================================================
// web_fetch
// ============================================================================

/// Fetch a URL over HTTP(S).
pub struct WebFetchTool {
    client: Client,
    timeout: Duration,
    max_bytes: usize,
}

impl WebFetchTool {
    pub fn new(timeout: Duration, max_bytes: usize) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("operarius/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            timeout,
            max_bytes,
        }
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch the content of an http or https URL"
    }

    fn parameters(&self) -> Value {
        object_schema(
            json!({ "url": string_property("URL to fetch (http or https)") }),
            vec!["url".to_string()],
        )
    }

    async fn execute(&self, args: Value) -> ToolResult<ToolOutput> {
        let raw = required_str(&args, "url")?;
        let url = reqwest::Url::parse(raw)
            .map_err(|e| ToolError::InvalidArguments(format!("invalid url '{raw}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ToolError::InvalidArguments(format!(
                "unsupported scheme '{}', only http and https are allowed",
                url.scheme()
            )));
        }

        let timeout_ms = self.timeout.as_millis() as u64;
        let fetch = async {
            let mut response = self.client.get(url.clone()).send().await.map_err(|e| {
                if e.is_timeout() {
                    ToolError::Timeout(timeout_ms)
                } else {
                    ToolError::Execution(format!("request failed: {e}"))
                }
            })?;

            let status = response.status();
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let mut body = Vec::new();
            let mut truncated = false;
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| ToolError::Execution(format!("failed to read body: {e}")))?
            {
                body.extend_from_slice(&chunk);
                if body.len() > self.max_bytes {
                    truncated = true;
                    break;
                }
            }
            Ok::<_, ToolError>((status, content_type, body, truncated))
        };

        // The client timeout is not relied on; its builder may have fallen back.
        let (status, content_type, body, truncated) = timeout(self.timeout, fetch)
            .await
            .map_err(|_| ToolError::Timeout(timeout_ms))??;
        let text = String::from_utf8_lossy(&body);
        let content = truncate_bytes(&text, self.max_bytes);
        debug!(url = %url, status = status.as_u16(), bytes = content.len(), truncated, "Fetched URL");

        Ok(ToolOutput::success(json!({
            "url": url.as_str(),
            "status": status.as_u16(),
            "ok": status.is_success(),
            "content_type": content_type,
            "content": content,
            "truncated": truncated,
        })))
    }
}

// ============================================================================
// ping
// ============================================================================

/// ICMP reachability through the system `ping` binary.
pub struct PingTool {
    timeout: Duration,
}

impl PingTool {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Tool for PingTool {
    fn name(&self) -> &str {
        "ping"
    }

    fn description(&self) -> &str {
        "Ping a host and report whether it is reachable"
    }

    fn parameters(&self) -> Value {
        object_schema(
            json!({
                "host": string_property("Host name or IP address"),
                "count": number_property("Number of echo requests (1-10)"),
            }),
            vec!["host".to_string()],
        )
    }

    async fn execute(&self, args: Value) -> ToolResult<ToolOutput> {
        let host = validate_host(required_str(&args, "host")?)?;
        let count = args
            .get("count")
            .and_then(Value::as_u64)
            .unwrap_or(4)
            .clamp(1, MAX_PING_COUNT);

        let mut cmd = Command::new("ping");
        if cfg!(windows) {
            cmd.arg("-n");
        } else {
            cmd.arg("-c");
        }
        cmd.arg(count.to_string()).arg(host).kill_on_drop(true);

        let output = match timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                warn!(host, "Ping timed out");
                return Err(ToolError::Timeout(self.timeout.as_millis() as u64));
            }
            Ok(result) => result.map_err(|e| ToolError::Execution(format!("failed to run ping: {e}")))?,
        };

        Ok(ToolOutput::success(json!({
            "host": host,
            "count": count,
            "reachable": output.status.success(),
            "output": String::from_utf8_lossy(&output.stdout),
        })))
    }
}

// ============================================================================
// port_scan
// ============================================================================

/// TCP connect scan with a per-port timeout and an overall deadline.
pub struct PortScanTool {
    per_port_timeout: Duration,
    deadline: Duration,
}

impl PortScanTool {
    pub fn new(per_port_timeout: Duration) -> Self {
        Self {
            per_port_timeout,
            deadline: DEFAULT_SCAN_DEADLINE,
        }
    }

    /// Bound the total time of one scan.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    fn ports(args: &Value) -> ToolResult<Vec<u16>> {
        let raw = args
            .get("ports")
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::InvalidArguments("missing required array argument 'ports'".to_string()))?;
        if raw.is_empty() || raw.len() > MAX_SCAN_PORTS {
            return Err(ToolError::InvalidArguments(format!(
                "between 1 and {MAX_SCAN_PORTS} ports are required"
            )));
        }
        raw.iter()
            .map(|v| {
                v.as_u64()
                    .and_then(|p| u16::try_from(p).ok())
                    .filter(|p| *p != 0)
                    .ok_or_else(|| ToolError::InvalidArguments(format!("invalid port {v}")))
            })
            .collect()
    }
}

#[async_trait]
impl Tool for PortScanTool {
    fn name(&self) -> &str {
        "port_scan"
    }

    fn description(&self) -> &str {
        "Check which TCP ports on a host accept connections"
    }

    fn parameters(&self) -> Value {
        object_schema(
            json!({
                "host": string_property("Host name or IP address"),
                "ports": array_property("number", "Ports to probe"),
            }),
            vec!["host".to_string(), "ports".to_string()],
        )
    }

    async fn execute(&self, args: Value) -> ToolResult<ToolOutput> {
        let host = validate_host(required_str(&args, "host")?)?;
        let ports = Self::ports(&args)?;

        let deadline = Instant::now() + self.deadline;
        let mut open = Vec::new();
        let mut closed = Vec::new();
        for port in ports {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                let deadline_ms = self.deadline.as_millis() as u64;
                warn!(host, deadline_ms, scanned = open.len() + closed.len(), "Port scan exceeded its deadline");
                return Err(ToolError::Timeout(deadline_ms));
            }
            let addr = format!("{host}:{port}");
            match timeout(self.per_port_timeout.min(remaining), TcpStream::connect(&addr)).await {
                Ok(Ok(_)) => open.push(port),
                _ => closed.push(port),
            }
        }
        debug!(host, open = open.len(), closed = closed.len(), "Port scan finished");

        Ok(ToolOutput::success(json!({
            "host": host,
            "open": open,
            "closed": closed,
        })))
    }
}
