// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Memory tools: persist and search long-term memories through the store
//! and the embedding collaborator.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use monad_store::{cosine_similarity, EmbeddingClient, Memory, Store};

use crate::tool::{Tool, ToolResult};

pub struct SaveMemoryTool {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingClient>,
}

impl SaveMemoryTool {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn EmbeddingClient>) -> Self {
        Self { store, embedder }
    }
}

#[async_trait]
impl Tool for SaveMemoryTool {
    fn name(&self) -> &str {
        "save_memory"
    }

    fn description(&self) -> &str {
        "Persist a long-term memory so later sessions can recall it. \
         Use a short descriptive title; tags improve recall."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {
                    "type": "string",
                    "description": "Short descriptive title"
                },
                "content": {
                    "type": "string",
                    "description": "The fact or observation to remember"
                },
                "tags": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Optional topic tags"
                }
            },
            "required": ["title", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: &Value) -> ToolResult {
        let title = match args.get("title").and_then(|v| v.as_str()) {
            Some(t) if !t.trim().is_empty() => t.trim().to_string(),
            _ => return ToolResult::fail("missing 'title'"),
        };
        let content = match args.get("content").and_then(|v| v.as_str()) {
            Some(c) if !c.trim().is_empty() => c.trim().to_string(),
            _ => return ToolResult::fail("missing 'content'"),
        };
        let tags: Vec<String> = args
            .get("tags")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|t| t.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        debug!(title = %title, tag_count = tags.len(), "save_memory tool");

        let mut memory = Memory::new(title, content);
        memory.tags = tags;
        // Embed title + content together so recall matches either.
        let text = format!("{}\n{}", memory.title, memory.content);
        match self.embedder.embed(&[text]).await {
            Ok(mut vectors) => memory.embedding = vectors.remove(0),
            // A memory without an embedding is still stored; it just won't
            // rank in similarity search.
            Err(e) => debug!(error = %e, "embedding failed; storing memory without vector"),
        }

        match self.store.save_memory(&memory).await {
            Ok(()) => ToolResult::ok(format!("saved memory {}", memory.id)),
            Err(e) => ToolResult::fail(format!("save failed: {e}")),
        }
    }
}

pub struct SearchMemoryTool {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingClient>,
}

impl SearchMemoryTool {
    pub fn new(store: Arc<dyn Store>, embedder: Arc<dyn EmbeddingClient>) -> Self {
        Self { store, embedder }
    }
}

#[async_trait]
impl Tool for SearchMemoryTool {
    fn name(&self) -> &str {
        "search_memory"
    }

    fn description(&self) -> &str {
        "Search long-term memories by semantic similarity. \
         Returns the best matches with their similarity scores."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look for"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum results (default 5)"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: &Value) -> ToolResult {
        let query = match args.get("query").and_then(|v| v.as_str()) {
            Some(q) if !q.trim().is_empty() => q.trim().to_string(),
            _ => return ToolResult::fail("missing 'query'"),
        };
        let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(5) as usize;

        debug!(query = %query, limit, "search_memory tool");

        let query_vec = match self.embedder.embed(&[query.clone()]).await {
            Ok(mut v) => v.remove(0),
            Err(e) => return ToolResult::fail(format!("embedding failed: {e}")),
        };

        let memories = match self.store.fetch_memories().await {
            Ok(m) => m,
            Err(e) => return ToolResult::fail(format!("fetch failed: {e}")),
        };

        let mut scored: Vec<(f32, &Memory)> = memories
            .iter()
            .filter(|m| !m.embedding.is_empty())
            .map(|m| (cosine_similarity(&query_vec, &m.embedding), m))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        if scored.is_empty() {
            return ToolResult::ok("(no memories match)");
        }
        let lines: Vec<String> = scored
            .iter()
            .map(|(score, m)| format!("[{score:.2}] {}: {}", m.title, m.content))
            .collect();
        ToolResult::ok(lines.join("\n"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use monad_store::{HashEmbedder, MemoryStore};

    use super::*;

    fn tools() -> (Arc<MemoryStore>, SaveMemoryTool, SearchMemoryTool) {
        let store = Arc::new(MemoryStore::new());
        let embedder = Arc::new(HashEmbedder::default());
        let save = SaveMemoryTool::new(store.clone(), embedder.clone());
        let search = SearchMemoryTool::new(store.clone(), embedder);
        (store, save, search)
    }

    #[tokio::test]
    async fn save_then_search_round_trip() {
        let (_store, save, search) = tools();
        let r = save
            .execute(&json!({
                "title": "rust ownership",
                "content": "ownership moves values unless the type is Copy",
                "tags": ["rust"]
            }))
            .await;
        assert!(r.success, "{:?}", r.error);

        let r = search
            .execute(&json!({ "query": "rust ownership rules" }))
            .await;
        assert!(r.success);
        assert!(r.output.contains("rust ownership"));
    }

    #[tokio::test]
    async fn save_stores_embedding_vector() {
        let (store, save, _search) = tools();
        save.execute(&json!({ "title": "t", "content": "c" }))
            .await;
        let all = store.fetch_memories().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(!all[0].embedding.is_empty());
    }

    #[tokio::test]
    async fn search_empty_store_reports_no_match() {
        let (_store, _save, search) = tools();
        let r = search.execute(&json!({ "query": "anything" })).await;
        assert!(r.success);
        assert!(r.output.contains("no memories"));
    }

    #[tokio::test]
    async fn save_rejects_blank_title() {
        let (_store, save, _search) = tools();
        let r = save.execute(&json!({ "title": " ", "content": "c" })).await;
        assert!(!r.success);
    }
}
