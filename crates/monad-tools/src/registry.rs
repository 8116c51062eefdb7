// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use monad_store::{EmbeddingClient, Store};

use crate::builtin::delegate::DelegateTaskTool;
use crate::builtin::fs::{ListDirTool, ReadFileTool, WriteFileTool};
use crate::builtin::memory::{SaveMemoryTool, SearchMemoryTool};
use crate::builtin::web_search::WebSearchTool;
use crate::{Tool, ToolCall, ToolResult};

/// A tool schema – mirrors monad_model::ToolSchema but keeps the tools crate
/// independent from the model crate.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Central registry holding the built-in tool catalog.  Immutable after
/// startup; lookups clone the `Arc`.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// The full built-in catalog: filesystem ops, memory ops, web search,
    /// and delegation-to-agent.
    pub fn catalog(store: Arc<dyn Store>, embedder: Arc<dyn EmbeddingClient>) -> Self {
        let mut reg = Self::new();
        reg.register(ListDirTool::default());
        reg.register(ReadFileTool::default());
        reg.register(WriteFileTool::default());
        reg.register(SaveMemoryTool::new(Arc::clone(&store), Arc::clone(&embedder)));
        reg.register(SearchMemoryTool::new(Arc::clone(&store), embedder));
        reg.register(WebSearchTool::default());
        reg.register(DelegateTaskTool::new(store));
        reg
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Produce schemas for all registered tools, sorted by name for
    /// deterministic prompt assembly.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        match self.tools.get(&call.name) {
            Some(tool) => tool.execute(&call.args).await,
            None => ToolResult::fail(format!("unknown tool: {}", call.name)),
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
