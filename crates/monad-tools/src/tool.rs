// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Identifier assigned by the model, or synthesized when absent
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// The result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub success: bool,
    /// Output handed back to the model verbatim
    pub output: String,
    /// Set when `success` is false
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            output: String::new(),
            error: Some(error),
        }
    }
}

/// Trait that every built-in and workspace-defined tool executor implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters.  Recognized parameter types: string,
    /// integer, boolean, array of strings, object.
    fn parameters_schema(&self) -> Value;
    /// When true, concurrent calls to this tool are serialized per session.
    fn requires_permission(&self) -> bool {
        false
    }
    /// Execute the tool.  Failures are reported via [`ToolResult::fail`],
    /// never by panicking.
    async fn execute(&self, args: &Value) -> ToolResult;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
