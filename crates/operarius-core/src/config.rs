//! Gateway configuration.
//!
//! Configuration is read from a TOML file when one exists, falls back to
//! built-in defaults otherwise, and is finally overridden by environment
//! variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::extension::RegistrationPolicy;

/// Default values.
pub mod defaults {
    pub const CONFIG_FILE: &str = "operarius.toml";
    pub const SERVER_PORT: u16 = 3000;
    pub const OLLAMA_HOST: &str = "http://localhost:11434";
    pub const DEFAULT_MODEL: &str = "llama3";
    pub const MAX_TOKENS: u32 = 2048;
    pub const LOG_LEVEL: &str = "info";

    pub const EXTENSION_DIR: &str = "./plugins";
    pub const ALLOWED_DIRS: &[&str] = &["./data", "./uploads", "./documents"];

    pub const SHELL_TIMEOUT_SECS: u64 = 30;
    pub const SHELL_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;
    pub const FETCH_TIMEOUT_SECS: u64 = 10;
    pub const FETCH_MAX_BYTES: usize = 2 * 1024 * 1024;
    pub const PING_TIMEOUT_SECS: u64 = 10;
    pub const PORT_SCAN_TIMEOUT_MS: u64 = 500;
    pub const MAX_FILE_SIZE_MB: u64 = 10;

    pub const RETENTION_HOURS: u64 = 24;
    pub const HEALTH_WINDOW_SECS: u64 = 300;
    pub const SLOW_THRESHOLD_MS: u64 = 5000;
}

/// Environment variable names.
pub mod env_vars {
    pub const CONFIG: &str = "OPERARIUS_CONFIG";
    pub const PORT: &str = "OPERARIUS_PORT";
    pub const EXTENSION_DIR: &str = "OPERARIUS_EXTENSION_DIR";
    /// Platform path-list syntax (`:` on Unix, `;` on Windows).
    pub const ALLOWED_DIRS: &str = "OPERARIUS_ALLOWED_DIRS";
    pub const SHELL_TIMEOUT_SECS: &str = "OPERARIUS_SHELL_TIMEOUT_SECS";
    pub const LOG_JSON: &str = "OPERARIUS_LOG_JSON";
    pub const OLLAMA_ENDPOINT: &str = "OLLAMA_ENDPOINT";
    pub const LLM_MODEL: &str = "LLM_MODEL";
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub extensions: ExtensionsConfig,
    pub tools: ToolsConfig,
    pub monitoring: MonitoringConfig,
}

/// Settings consumed by the HTTP layer and the model client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub ollama_host: String,
    pub default_model: String,
    pub max_tokens: u32,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: defaults::SERVER_PORT,
            ollama_host: defaults::OLLAMA_HOST.to_string(),
            default_model: defaults::DEFAULT_MODEL.to_string(),
            max_tokens: defaults::MAX_TOKENS,
            log_level: defaults::LOG_LEVEL.to_string(),
        }
    }
}

/// Extension loading and dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionsConfig {
    /// Directory scanned for extension manifests.
    pub directory: PathBuf,
    pub policy: RegistrationPolicy,
    /// Reject calls missing a parameter the method marks as required.
    pub strict_arguments: bool,
    /// Optional ceiling on extension method calls. Unset means no limit.
    pub call_timeout_secs: Option<u64>,
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(defaults::EXTENSION_DIR),
            policy: RegistrationPolicy::default(),
            strict_arguments: false,
            call_timeout_secs: None,
        }
    }
}

impl ExtensionsConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_secs.map(Duration::from_secs)
    }
}

/// Built-in tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Directories the filesystem tools may touch.
    pub allowed_directories: Vec<PathBuf>,
    pub shell_timeout_secs: u64,
    pub shell_max_output_bytes: usize,
    pub fetch_timeout_secs: u64,
    pub fetch_max_bytes: usize,
    pub ping_timeout_secs: u64,
    pub port_scan_timeout_ms: u64,
    pub max_file_size_mb: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            allowed_directories: defaults::ALLOWED_DIRS.iter().map(PathBuf::from).collect(),
            shell_timeout_secs: defaults::SHELL_TIMEOUT_SECS,
            shell_max_output_bytes: defaults::SHELL_MAX_OUTPUT_BYTES,
            fetch_timeout_secs: defaults::FETCH_TIMEOUT_SECS,
            fetch_max_bytes: defaults::FETCH_MAX_BYTES,
            ping_timeout_secs: defaults::PING_TIMEOUT_SECS,
            port_scan_timeout_ms: defaults::PORT_SCAN_TIMEOUT_MS,
            max_file_size_mb: defaults::MAX_FILE_SIZE_MB,
        }
    }
}

impl ToolsConfig {
    pub fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.shell_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

/// Monitoring settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
    /// How long recorded samples are kept.
    pub retention_hours: u64,
    /// Window used for health status and detailed metrics.
    pub health_window_secs: u64,
    /// Invocations slower than this are logged at warn level.
    pub slow_threshold_ms: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_hours: defaults::RETENTION_HOURS,
            health_window_secs: defaults::HEALTH_WINDOW_SECS,
            slow_threshold_ms: defaults::SLOW_THRESHOLD_MS,
        }
    }
}

impl MonitoringConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 3600)
    }

    pub fn health_window(&self) -> Duration {
        Duration::from_secs(self.health_window_secs)
    }
}

impl GatewayConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load configuration.
    ///
    /// An explicitly given path must exist. Without one, `OPERARIUS_CONFIG`
    /// and then `operarius.toml` in the working directory are tried, and
    /// defaults are used when neither exists. Environment overrides are
    /// applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::read_file(path)?,
            None => {
                let candidate = std::env::var(env_vars::CONFIG)
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(defaults::CONFIG_FILE));
                if candidate.is_file() {
                    Self::read_file(&candidate)?
                } else {
                    tracing::debug!(path = %candidate.display(), "No config file, using defaults");
                    Self::default()
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    /// Apply overrides from a variable lookup (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(env_vars::PORT) {
            self.server.port = parse_value(env_vars::PORT, &port)?;
        }
        if let Some(endpoint) = lookup(env_vars::OLLAMA_ENDPOINT) {
            self.server.ollama_host = endpoint;
        }
        if let Some(model) = lookup(env_vars::LLM_MODEL) {
            self.server.default_model = model;
        }
        if let Some(dir) = lookup(env_vars::EXTENSION_DIR) {
            self.extensions.directory = PathBuf::from(dir);
        }
        if let Some(dirs) = lookup(env_vars::ALLOWED_DIRS) {
            self.tools.allowed_directories = std::env::split_paths(&dirs)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }
        if let Some(secs) = lookup(env_vars::SHELL_TIMEOUT_SECS) {
            self.tools.shell_timeout_secs = parse_value(env_vars::SHELL_TIMEOUT_SECS, &secs)?;
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.default_model, "llama3");
        assert_eq!(config.extensions.directory, PathBuf::from("./plugins"));
        assert_eq!(config.tools.allowed_directories.len(), 3);
        assert_eq!(config.tools.shell_timeout(), Duration::from_secs(30));
        assert_eq!(config.tools.shell_max_output_bytes, 10 * 1024 * 1024);
        assert!(config.extensions.call_timeout().is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let text = r#"
            [extensions]
            directory = "/opt/ext"
            policy = "strict"

            [tools]
            allowed_directories = ["/srv/data"]
            shell_timeout_secs = 5
        "#;
        let config = GatewayConfig::from_toml_str(text, Path::new("test.toml")).unwrap();
        assert_eq!(config.extensions.directory, PathBuf::from("/opt/ext"));
        assert_eq!(config.extensions.policy, RegistrationPolicy::Strict);
        assert_eq!(config.tools.allowed_directories, vec![PathBuf::from("/srv/data")]);
        assert_eq!(config.tools.shell_timeout_secs, 5);
        assert_eq!(config.tools.max_file_size_mb, 10);
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_invalid_toml() {
        let err = GatewayConfig::from_toml_str("[tools\nbroken", Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (env_vars::PORT, "8080"),
            (env_vars::EXTENSION_DIR, "/tmp/ext"),
            (env_vars::LLM_MODEL, "mistral"),
        ]
        .into_iter()
        .collect();

        let mut config = GatewayConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.extensions.directory, PathBuf::from("/tmp/ext"));
        assert_eq!(config.server.default_model, "mistral");
    }

    #[test]
    fn test_invalid_override() {
        let mut config = GatewayConfig::default();
        let err = config
            .apply_overrides(|key| (key == env_vars::SHELL_TIMEOUT_SECS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_load_explicit_missing_file() {
        let err = GatewayConfig::load(Some(Path::new("/nonexistent/operarius.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
