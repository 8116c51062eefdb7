// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Filesystem tools: directory listing and file read/write.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::tool::{Tool, ToolResult};

/// Maximum bytes returned from a single file read.
const MAX_READ_BYTES: usize = 256 * 1024;
/// Maximum entries returned from one listing.
const MAX_LIST_ENTRIES: usize = 500;

#[derive(Default)]
pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List directory contents. Directories are suffixed with '/'. \
         Set max_depth > 1 to recurse."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list"
                },
                "max_depth": {
                    "type": "integer",
                    "description": "Recursion depth (default 1)"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: &Value) -> ToolResult {
        let path = match args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolResult::fail("missing 'path'"),
        };
        let max_depth = args
            .get("max_depth")
            .and_then(|v| v.as_u64())
            .unwrap_or(1)
            .max(1) as usize;

        debug!(path = %path, max_depth, "list_dir tool");

        let result = tokio::task::spawn_blocking(move || {
            let mut entries: Vec<String> = Vec::new();
            for entry in WalkDir::new(&path)
                .min_depth(1)
                .max_depth(max_depth)
                .sort_by_file_name()
            {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => return Err(anyhow::anyhow!("{e}")),
                };
                let rel = entry
                    .path()
                    .strip_prefix(&path)
                    .unwrap_or(entry.path())
                    .display()
                    .to_string();
                if entry.file_type().is_dir() {
                    entries.push(format!("{rel}/"));
                } else {
                    entries.push(rel);
                }
                if entries.len() >= MAX_LIST_ENTRIES {
                    entries.push(format!("... truncated at {MAX_LIST_ENTRIES} entries"));
                    break;
                }
            }
            Ok(entries)
        })
        .await;

        match result {
            Ok(Ok(entries)) if entries.is_empty() => ToolResult::ok("(empty directory)"),
            Ok(Ok(entries)) => ToolResult::ok(entries.join("\n")),
            Ok(Err(e)) => ToolResult::fail(format!("list failed: {e}")),
            Err(e) => ToolResult::fail(format!("list task failed: {e}")),
        }
    }
}

#[derive(Default)]
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file. Output is capped at 256 KiB."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File to read"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: &Value) -> ToolResult {
        let path = match args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolResult::fail("missing 'path'"),
        };

        debug!(path = %path, "read_file tool");

        match tokio::fs::read_to_string(&path).await {
            Ok(mut text) => {
                if text.len() > MAX_READ_BYTES {
                    // Cut at a char boundary at or below the cap.
                    let mut cut = MAX_READ_BYTES;
                    while !text.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    text.truncate(cut);
                    text.push_str("\n... truncated");
                }
                ToolResult::ok(text)
            }
            Err(e) => ToolResult::fail(format!("read failed: {e}")),
        }
    }
}

#[derive(Default)]
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed. \
         Overwrites existing content."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File to write"
                },
                "content": {
                    "type": "string",
                    "description": "Full file content"
                }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    fn requires_permission(&self) -> bool {
        true
    }

    async fn execute(&self, args: &Value) -> ToolResult {
        let path = match args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolResult::fail("missing 'path'"),
        };
        let content = match args.get("content").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => return ToolResult::fail("missing 'content'"),
        };

        debug!(path = %path, bytes = content.len(), "write_file tool");

        if let Some(parent) = std::path::Path::new(&path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return ToolResult::fail(format!("creating {}: {e}", parent.display()));
                }
            }
        }
        match tokio::fs::write(&path, &content).await {
            Ok(()) => ToolResult::ok(format!("wrote {} bytes to {path}", content.len())),
            Err(e) => ToolResult::fail(format!("write failed: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
