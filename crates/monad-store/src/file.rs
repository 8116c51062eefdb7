// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! JSON-document store under a data directory.
//!
//! One file per collection (`sessions.json`, `messages.json`, …), rewritten
//! atomically on every mutation via a write-to-temp-then-rename.  Suitable
//! for the local-first CLI; server deployments substitute a real database
//! behind the same [`Store`] facade.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::entities::{Job, Memory, Note, SessionRecord, StoredMessage};
use crate::store::Store;

pub struct FileStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles across collections.
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating data dir {}", dir.display()))?;
        debug!(dir = %dir.display(), "file store ready");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.json"))
    }

    async fn load<T: DeserializeOwned + Default>(&self, collection: &str) -> anyhow::Result<T> {
        let path = self.path(collection);
        if !path.exists() {
            return Ok(T::default());
        }
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    async fn save<T: Serialize>(&self, collection: &str, value: &T) -> anyhow::Result<()> {
        let path = self.path(collection);
        let tmp = self.dir.join(format!(".{collection}.json.tmp"));
        let text = serde_json::to_string_pretty(value)?;
        tokio::fs::write(&tmp, text)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl Store for FileStore {
    async fn save_session(&self, session: &SessionRecord) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut all: HashMap<String, SessionRecord> = self.load("sessions").await?;
        all.insert(session.id.clone(), session.clone());
        self.save("sessions", &all).await
    }

    async fn fetch_session(&self, id: &str) -> anyhow::Result<Option<SessionRecord>> {
        let all: HashMap<String, SessionRecord> = self.load("sessions").await?;
        Ok(all.get(id).cloned())
    }

    async fn delete_session(&self, id: &str) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut all: HashMap<String, SessionRecord> = self.load("sessions").await?;
        all.remove(id);
        self.save("sessions", &all).await?;
        let mut msgs: HashMap<String, Vec<StoredMessage>> = self.load("messages").await?;
        msgs.remove(id);
        self.save("messages", &msgs).await
    }

    async fn list_sessions(&self) -> anyhow::Result<Vec<SessionRecord>> {
        let all: HashMap<String, SessionRecord> = self.load("sessions").await?;
        let mut out: Vec<SessionRecord> = all.into_values().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn append_message(&self, message: &StoredMessage) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut all: HashMap<String, Vec<StoredMessage>> = self.load("messages").await?;
        all.entry(message.session_id.clone())
            .or_default()
            .push(message.clone());
        self.save("messages", &all).await
    }

    async fn messages_for_session(&self, session_id: &str) -> anyhow::Result<Vec<StoredMessage>> {
        let all: HashMap<String, Vec<StoredMessage>> = self.load("messages").await?;
        Ok(all.get(session_id).cloned().unwrap_or_default())
    }

    async fn save_memory(&self, memory: &Memory) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut all: HashMap<String, Memory> = self.load("memories").await?;
        all.insert(memory.id.clone(), memory.clone());
        self.save("memories", &all).await
    }

    async fn fetch_memories(&self) -> anyhow::Result<Vec<Memory>> {
        let all: HashMap<String, Memory> = self.load("memories").await?;
        let mut out: Vec<Memory> = all.into_values().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn save_note(&self, note: &Note) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut all: HashMap<String, Note> = self.load("notes").await?;
        all.insert(note.id.clone(), note.clone());
        self.save("notes", &all).await
    }

    async fn list_notes(&self) -> anyhow::Result<Vec<Note>> {
        let all: HashMap<String, Note> = self.load("notes").await?;
        let mut out: Vec<Note> = all.into_values().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn save_job(&self, job: &Job) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut all: HashMap<String, Job> = self.load("jobs").await?;
        all.insert(job.id.clone(), job.clone());
        self.save("jobs", &all).await
    }

    async fn fetch_job(&self, id: &str) -> anyhow::Result<Option<Job>> {
        let all: HashMap<String, Job> = self.load("jobs").await?;
        Ok(all.get(id).cloned())
    }

    async fn list_jobs(&self) -> anyhow::Result<Vec<Job>> {
        let all: HashMap<String, Job> = self.load("jobs").await?;
        let mut out: Vec<Job> = all.into_values().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let fs = FileStore::new(dir.path()).unwrap();
        (dir, fs)
    }

    #[tokio::test]
    async fn session_survives_store_reopen() {
        let (dir, fs) = store();
        let s = SessionRecord::new("persist me");
        fs.save_session(&s).await.unwrap();
        drop(fs);

        let reopened = FileStore::new(dir.path()).unwrap();
        let back = reopened.fetch_session(&s.id).await.unwrap().unwrap();
        assert_eq!(back.title, "persist me");
    }

    #[tokio::test]
    async fn messages_keep_order_across_reopen() {
        let (dir, fs) = store();
        for i in 0..3 {
            fs.append_message(&StoredMessage::user("s", format!("m{i}")))
                .await
                .unwrap();
        }
        drop(fs);
        let reopened = FileStore::new(dir.path()).unwrap();
        let msgs = reopened.messages_for_session("s").await.unwrap();
        let contents: Vec<&str> = msgs.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m2"]);
    }

    #[tokio::test]
    async fn missing_collection_reads_empty() {
        let (_dir, fs) = store();
        assert!(fs.list_jobs().await.unwrap().is_empty());
        assert!(fs.fetch_session("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_session_cleans_both_collections() {
        let (_dir, fs) = store();
        let s = SessionRecord::new("gone");
        fs.save_session(&s).await.unwrap();
        fs.append_message(&StoredMessage::user(&s.id, "hi"))
            .await
            .unwrap();
        fs.delete_session(&s.id).await.unwrap();
        assert!(fs.fetch_session(&s.id).await.unwrap().is_none());
        assert!(fs.messages_for_session(&s.id).await.unwrap().is_empty());
    }
}
