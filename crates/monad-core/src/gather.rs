// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Context gathering: select the memories and notes relevant to a query.
//!
//! Memories are ranked by cosine similarity between the query embedding and
//! each stored memory's embedding.  Notes come from two channels: notes
//! flagged `always_append`, and notes whose tags intersect the query's
//! auto-generated tags (tag extraction delegated to the LLM via a one-shot
//! utility call).
//!
//! Gathering never aborts a turn: every collaborator failure degrades to a
//! smaller, possibly empty, `ContextData`.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use monad_config::GatherConfig;
use monad_model::LlmClient;
use monad_store::{cosine_similarity, EmbeddingClient, Memory, Note, Store, StoredMessage};

/// What gathering produced for one turn.
#[derive(Debug, Clone, Default)]
pub struct ContextData {
    pub notes: Vec<Note>,
    pub memories: Vec<Memory>,
}

/// Progress events streamed while gathering runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherEvent {
    Embedding,
    RankingMemories,
    ExtractingTags,
    Done,
}

pub struct ContextGatherer {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingClient>,
    llm: Arc<dyn LlmClient>,
    config: GatherConfig,
}

impl ContextGatherer {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingClient>,
        llm: Arc<dyn LlmClient>,
        config: GatherConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            llm,
            config,
        }
    }

    pub async fn gather(
        &self,
        query: &str,
        history: &[StoredMessage],
        progress: Option<&mpsc::Sender<GatherEvent>>,
    ) -> ContextData {
        let memories = self.gather_memories(query, progress).await;
        let notes = self.gather_notes(query, history, progress).await;
        emit(progress, GatherEvent::Done).await;
        debug!(
            memory_count = memories.len(),
            note_count = notes.len(),
            "context gathered"
        );
        ContextData { notes, memories }
    }

    async fn gather_memories(
        &self,
        query: &str,
        progress: Option<&mpsc::Sender<GatherEvent>>,
    ) -> Vec<Memory> {
        if query.trim().is_empty() {
            return Vec::new();
        }

        emit(progress, GatherEvent::Embedding).await;
        let query_vec = match self.embedder.embed(&[query.to_string()]).await {
            Ok(mut v) if !v.is_empty() => v.remove(0),
            Ok(_) => return Vec::new(),
            Err(e) => {
                warn!(error = %e, "embedding unavailable; recalling no memories");
                return Vec::new();
            }
        };

        let stored = match self.store.fetch_memories().await {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "memory fetch failed; recalling no memories");
                return Vec::new();
            }
        };

        emit(progress, GatherEvent::RankingMemories).await;
        let mut scored: Vec<(f32, Memory)> = stored
            .into_iter()
            .filter(|m| !m.embedding.is_empty())
            .map(|m| (cosine_similarity(&query_vec, &m.embedding), m))
            .filter(|(score, _)| *score >= self.config.min_similarity)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.config.memory_limit);
        scored.into_iter().map(|(_, m)| m).collect()
    }

    async fn gather_notes(
        &self,
        query: &str,
        history: &[StoredMessage],
        progress: Option<&mpsc::Sender<GatherEvent>>,
    ) -> Vec<Note> {
        let all = match self.store.list_notes().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "note fetch failed; appending no notes");
                return Vec::new();
            }
        };
        if all.is_empty() {
            return Vec::new();
        }

        let mut out: Vec<Note> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for note in all.iter().filter(|n| n.always_append) {
            if seen.insert(note.id.clone()) {
                out.push(note.clone());
            }
        }

        if self.config.tag_extraction && !query.trim().is_empty() {
            emit(progress, GatherEvent::ExtractingTags).await;
            let tags = self.extract_tags(query, history).await;
            if !tags.is_empty() {
                for note in &all {
                    let matched = note
                        .tags
                        .iter()
                        .any(|t| tags.contains(&t.to_lowercase()));
                    if matched && seen.insert(note.id.clone()) {
                        out.push(note.clone());
                    }
                }
            }
        }
        out
    }

    /// Ask the utility model for topic tags.  Any failure (network, garbage
    /// output) degrades to an empty tag set.
    async fn extract_tags(&self, query: &str, history: &[StoredMessage]) -> HashSet<String> {
        let recent: Vec<&str> = history
            .iter()
            .rev()
            .filter(|m| m.role == monad_store::MessageRole::User)
            .take(3)
            .map(|m| m.content.as_str())
            .collect();

        let prompt = format!(
            "Extract 3 to 8 lowercase topic tags for the query below. \
             Reply with ONLY a JSON array of strings, nothing else.\n\n\
             Query: {query}\n\nRecent context:\n{}",
            recent.join("\n")
        );

        let reply = match self.llm.generate(&prompt).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "tag extraction failed; matching no tagged notes");
                return HashSet::new();
            }
        };
        parse_tags(&reply)
    }
}

async fn emit(progress: Option<&mpsc::Sender<GatherEvent>>, event: GatherEvent) {
    if let Some(tx) = progress {
        let _ = tx.send(event).await;
    }
}

/// Parse the model's tag reply: a JSON array of strings, possibly wrapped in
/// prose or a code fence.  Falls back to an empty set on anything else.
fn parse_tags(reply: &str) -> HashSet<String> {
    let start = match reply.find('[') {
        Some(i) => i,
        None => return HashSet::new(),
    };
    let end = match reply[start..].find(']') {
        Some(i) => start + i + 1,
        None => return HashSet::new(),
    };
    match serde_json::from_str::<Vec<String>>(&reply[start..end]) {
        Ok(tags) => tags.into_iter().map(|t| t.to_lowercase()).collect(),
        Err(_) => HashSet::new(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
