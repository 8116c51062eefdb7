// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::entities::{Job, Memory, Note, SessionRecord, StoredMessage};
use crate::store::Store;

/// Volatile in-process store.  The default test substitute and the backend
/// for `store.backend = memory`.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, SessionRecord>,
    /// Per-session message logs in append order.  Timestamps are
    /// non-decreasing by the caller's invariant, so append order is also
    /// `(timestamp, insertion order)`.
    messages: HashMap<String, Vec<StoredMessage>>,
    memories: HashMap<String, Memory>,
    notes: HashMap<String, Note>,
    jobs: HashMap<String, Job>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_session(&self, session: &SessionRecord) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        inner.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn fetch_session(&self, id: &str) -> anyhow::Result<Option<SessionRecord>> {
        Ok(self.inner.read().await.sessions.get(id).cloned())
    }

    async fn delete_session(&self, id: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        inner.sessions.remove(id);
        inner.messages.remove(id);
        Ok(())
    }

    async fn list_sessions(&self) -> anyhow::Result<Vec<SessionRecord>> {
        let inner = self.inner.read().await;
        let mut out: Vec<SessionRecord> = inner.sessions.values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn append_message(&self, message: &StoredMessage) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .messages
            .entry(message.session_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn messages_for_session(&self, session_id: &str) -> anyhow::Result<Vec<StoredMessage>> {
        Ok(self
            .inner
            .read()
            .await
            .messages
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_memory(&self, memory: &Memory) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        inner.memories.insert(memory.id.clone(), memory.clone());
        Ok(())
    }

    async fn fetch_memories(&self) -> anyhow::Result<Vec<Memory>> {
        let inner = self.inner.read().await;
        let mut out: Vec<Memory> = inner.memories.values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn save_note(&self, note: &Note) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        inner.notes.insert(note.id.clone(), note.clone());
        Ok(())
    }

    async fn list_notes(&self) -> anyhow::Result<Vec<Note>> {
        let inner = self.inner.read().await;
        let mut out: Vec<Note> = inner.notes.values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn save_job(&self, job: &Job) -> anyhow::Result<()> {
        let mut inner = self.inner.write().await;
        inner.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn fetch_job(&self, id: &str) -> anyhow::Result<Option<Job>> {
        Ok(self.inner.read().await.jobs.get(id).cloned())
    }

    async fn list_jobs(&self) -> anyhow::Result<Vec<Job>> {
        let inner = self.inner.read().await;
        let mut out: Vec<Job> = inner.jobs.values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
