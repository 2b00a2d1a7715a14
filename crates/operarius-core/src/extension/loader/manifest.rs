//! Extension manifest files.
//!
//! A manifest is a JSON file in the extension directory. Its file stem is the
//! extension name; its body selects a factory and carries that factory's
//! configuration:
//!
//! ```json
//! { "factory": "filesystem", "version": "1.0.0", "config": { "maxSizeMB": 5 } }
//! ```
//!
//! Every field is optional. Without `factory`, the extension name is used.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extension::system::{ExtensionError, Result};

/// File extension of manifests.
pub const MANIFEST_EXTENSION: &str = "json";
/// Reserved aggregator file name, never loaded as an extension.
pub const RESERVED_MANIFEST: &str = "index.json";

/// Parsed manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    #[serde(default)]
    pub factory: Option<String>,
    #[serde(default)]
    pub version: Option<semver::Version>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub config: Value,
}

impl ExtensionManifest {
    /// Factory to instantiate for extension `name`.
    pub fn factory_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.factory.as_deref().unwrap_or(name)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ExtensionError::InvalidManifest {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Read a manifest from disk. Always reads the current file contents.
    pub async fn read(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ExtensionError::InvalidManifest {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        Self::parse(&text, path)
    }
}

/// Whether `path` names a loadable manifest.
pub fn is_manifest(path: &Path) -> bool {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case(MANIFEST_EXTENSION));
    let reserved = path
        .file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| n.eq_ignore_ascii_case(RESERVED_MANIFEST));
    is_json && !reserved
}

/// Extension name for a manifest path (its file stem).
pub fn extension_name(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
