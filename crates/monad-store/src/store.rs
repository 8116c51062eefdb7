// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use crate::entities::{Job, Memory, Note, SessionRecord, StoredMessage};

/// Narrow persistence facade consumed by the runtime core.
///
/// All operations are async; no transaction crossing the facade is required.
/// Message appends within a session must be returned in the caller's call
/// order (`messages_for_session` yields oldest → newest).
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_session(&self, session: &SessionRecord) -> anyhow::Result<()>;
    async fn fetch_session(&self, id: &str) -> anyhow::Result<Option<SessionRecord>>;
    async fn delete_session(&self, id: &str) -> anyhow::Result<()>;
    async fn list_sessions(&self) -> anyhow::Result<Vec<SessionRecord>>;

    async fn append_message(&self, message: &StoredMessage) -> anyhow::Result<()>;
    /// Messages of a session, oldest → newest.
    async fn messages_for_session(&self, session_id: &str) -> anyhow::Result<Vec<StoredMessage>>;

    async fn save_memory(&self, memory: &Memory) -> anyhow::Result<()>;
    async fn fetch_memories(&self) -> anyhow::Result<Vec<Memory>>;

    async fn save_note(&self, note: &Note) -> anyhow::Result<()>;
    async fn list_notes(&self) -> anyhow::Result<Vec<Note>>;

    async fn save_job(&self, job: &Job) -> anyhow::Result<()>;
    async fn fetch_job(&self, id: &str) -> anyhow::Result<Option<Job>>;
    async fn list_jobs(&self) -> anyhow::Result<Vec<Job>>;
}
