//! Path-scoped filesystem tools.
//!
//! Every path argument goes through [`PathGuard`] first; a path outside the
//! allowed directories fails with `PermissionDenied` before any I/O happens.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use operarius_core::tools::{
    boolean_property, object_schema, string_property, Tool, ToolError, ToolOutput, ToolResult,
};
use serde_json::{json, Value};

use super::required_str;
use crate::path_guard::PathGuard;

/// Shared policy for the filesystem tools.
#[derive(Debug, Clone)]
pub struct FsPolicy {
    pub guard: PathGuard,
    pub max_file_size: u64,
}

impl FsPolicy {
    pub fn new(guard: PathGuard, max_file_size: u64) -> Arc<Self> {
        Arc::new(Self {
            guard,
            max_file_size,
        })
    }
}

fn modified_rfc3339(metadata: &std::fs::Metadata) -> Option<String> {
    metadata
        .modified()
        .ok()
        .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
}

// ============================================================================
// read_file
// ============================================================================

/// Read a text file.
pub struct ReadFileTool {
    policy: Arc<FsPolicy>,
}

impl ReadFileTool {
    pub fn new(policy: Arc<FsPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file inside the allowed directories"
    }

    fn parameters(&self) -> Value {
        object_schema(
            json!({ "path": string_property("Path of the file to read") }),
            vec!["path".to_string()],
        )
    }

    async fn execute(&self, args: Value) -> ToolResult<ToolOutput> {
        let raw = required_str(&args, "path")?;
        let path = self.policy.guard.resolve(raw)?;

        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(ToolError::InvalidArguments(format!("'{raw}' is not a file")));
        }
        if metadata.len() > self.policy.max_file_size {
            return Err(ToolError::InvalidArguments(format!(
                "'{raw}' is {} bytes, limit is {}",
                metadata.len(),
                self.policy.max_file_size
            )));
        }

        let bytes = tokio::fs::read(&path).await?;
        Ok(ToolOutput::success(json!({
            "path": raw,
            "size": bytes.len(),
            "content": String::from_utf8_lossy(&bytes),
        })))
    }
}

// ============================================================================
// write_file
// ============================================================================

/// Write (or append to) a text file, creating parent directories.
pub struct WriteFileTool {
    policy: Arc<FsPolicy>,
}

impl WriteFileTool {
    pub fn new(policy: Arc<FsPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file inside the allowed directories"
    }

    fn parameters(&self) -> Value {
        object_schema(
            json!({
                "path": string_property("Path of the file to write"),
                "content": string_property("Text to write"),
                "append": boolean_property("Append instead of overwriting"),
            }),
            vec!["path".to_string(), "content".to_string()],
        )
    }

    async fn execute(&self, args: Value) -> ToolResult<ToolOutput> {
        let raw = required_str(&args, "path")?;
        let content = required_str(&args, "content")?;
        let append = args.get("append").and_then(Value::as_bool).unwrap_or(false);
        let path = self.policy.guard.resolve(raw)?;

        if content.len() as u64 > self.policy.max_file_size {
            return Err(ToolError::InvalidArguments(format!(
                "content is {} bytes, limit is {}",
                content.len(),
                self.policy.max_file_size
            )));
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if append {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(content.as_bytes()).await?;
            file.flush().await?;
        } else {
            tokio::fs::write(&path, content).await?;
        }

        Ok(ToolOutput::success(json!({
            "path": raw,
            "bytes_written": content.len(),
            "append": append,
        })))
    }
}

// ============================================================================
// list_files
// ============================================================================

/// List the entries of a directory.
pub struct ListFilesTool {
    policy: Arc<FsPolicy>,
}

impl ListFilesTool {
    pub fn new(policy: Arc<FsPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files in a directory inside the allowed directories"
    }

    fn parameters(&self) -> Value {
        object_schema(
            json!({ "path": string_property("Directory to list") }),
            vec!["path".to_string()],
        )
    }

    async fn execute(&self, args: Value) -> ToolResult<ToolOutput> {
        let raw = required_str(&args, "path")?;
        let path = self.policy.guard.resolve(raw)?;

        if !tokio::fs::metadata(&path).await?.is_dir() {
            return Err(ToolError::InvalidArguments(format!("'{raw}' is not a directory")));
        }

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            entries.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "type": if metadata.is_dir() { "directory" } else { "file" },
                "size": metadata.len(),
                "modified": modified_rfc3339(&metadata),
            }));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        Ok(ToolOutput::success(json!({
            "path": raw,
            "count": entries.len(),
            "files": entries,
        })))
    }
}

// ============================================================================
// file_info
// ============================================================================

/// Metadata of a file or directory.
pub struct FileInfoTool {
    policy: Arc<FsPolicy>,
}

impl FileInfoTool {
    pub fn new(policy: Arc<FsPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for FileInfoTool {
    fn name(&self) -> &str {
        "file_info"
    }

    fn description(&self) -> &str {
        "Get size, type and timestamps of a path inside the allowed directories"
    }

    fn parameters(&self) -> Value {
        object_schema(
            json!({ "path": string_property("Path to inspect") }),
            vec!["path".to_string()],
        )
    }

    async fn execute(&self, args: Value) -> ToolResult<ToolOutput> {
        let raw = required_str(&args, "path")?;
        let path = self.policy.guard.resolve(raw)?;
        let metadata = tokio::fs::metadata(&path).await?;

        Ok(ToolOutput::success(json!({
            "path": raw,
            "size": metadata.len(),
            "is_file": metadata.is_file(),
            "is_directory": metadata.is_dir(),
            "readonly": metadata.permissions().readonly(),
            "modified": modified_rfc3339(&metadata),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn policy(base: &std::path::Path) -> Arc<FsPolicy> {
        FsPolicy::new(PathGuard::with_base(base, &[PathBuf::from("./data")]), 64)
    }

    #[tokio::test]
    async fn test_write_then_read_and_list() {
        let tmp = tempfile::tempdir().unwrap();
        let p = policy(tmp.path());

        WriteFileTool::new(p.clone())
            .execute(json!({"path": "data/notes/a.txt", "content": "hello"}))
            .await
            .unwrap();
        WriteFileTool::new(p.clone())
            .execute(json!({"path": "data/notes/a.txt", "content": " world", "append": true}))
            .await
            .unwrap();

        let out = ReadFileTool::new(p.clone())
            .execute(json!({"path": "data/notes/a.txt"}))
            .await
            .unwrap();
        assert_eq!(out.data["content"], "hello world");

        let out = ListFilesTool::new(p.clone())
            .execute(json!({"path": "data/notes"}))
            .await
            .unwrap();
        assert_eq!(out.data["count"], 1);
        assert_eq!(out.data["files"][0]["name"], "a.txt");
        assert_eq!(out.data["files"][0]["type"], "file");

        let out = FileInfoTool::new(p)
            .execute(json!({"path": "data/notes"}))
            .await
            .unwrap();
        assert_eq!(out.data["is_directory"], true);
    }

    #[tokio::test]
    async fn test_traversal_denied_without_io() {
        let tmp = tempfile::tempdir().unwrap();
        let p = policy(tmp.path());

        let err = ReadFileTool::new(p.clone())
            .execute(json!({"path": "../../etc/passwd"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied(_)));

        let err = WriteFileTool::new(p)
            .execute(json!({"path": "../escape.txt", "content": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied(_)));
        assert!(!tmp.path().parent().unwrap().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_size_limits() {
        let tmp = tempfile::tempdir().unwrap();
        let p = policy(tmp.path());
        let big = "x".repeat(65);

        let err = WriteFileTool::new(p.clone())
            .execute(json!({"path": "data/big.txt", "content": big}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        std::fs::create_dir_all(tmp.path().join("data")).unwrap();
        std::fs::write(tmp.path().join("data/big.txt"), "y".repeat(100)).unwrap();
        let err = ReadFileTool::new(p)
            .execute(json!({"path": "data/big.txt"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_missing_path_argument() {
        let tmp = tempfile::tempdir().unwrap();
        let err = FileInfoTool::new(policy(tmp.path()))
            .execute(json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
