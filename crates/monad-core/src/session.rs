// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Session ownership: hydration with an in-memory cache, lifecycle
//! mutations, workspace binding, debug snapshots, and the per-session turn
//! lock that keeps `chat_stream` invocations from overlapping.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::Utc;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use monad_store::{SessionRecord, Store, StoredMessage, ToolReference, Workspace};

use crate::error::EngineError;

/// Sessions kept hot in the hydration cache.
const SESSION_CACHE_CAPACITY: usize = 64;

/// The structured context of the most recent turn, overwritten per turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugSnapshot {
    /// Section id → rendered text of the assembled prompt
    pub context: BTreeMap<String, String>,
    /// Tool calls of the turn, in dispatch order
    pub tool_calls: Vec<SnapshotToolCall>,
    pub model: String,
    pub turn_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
    /// Output for completed calls; `None` when execution was suspended to
    /// the client
    pub result: Option<String>,
}

pub struct SessionManager {
    store: Arc<dyn Store>,
    cache: std::sync::Mutex<LruCache<String, SessionRecord>>,
    snapshots: std::sync::Mutex<HashMap<String, DebugSnapshot>>,
    turn_locks: std::sync::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            cache: std::sync::Mutex::new(LruCache::new(
                NonZeroUsize::new(SESSION_CACHE_CAPACITY).unwrap(),
            )),
            snapshots: std::sync::Mutex::new(HashMap::new()),
            turn_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Load a session, serving repeated hydrations from the cache.
    pub async fn hydrate(&self, id: &str) -> Result<SessionRecord, EngineError> {
        if let Some(hit) = self.cache.lock().unwrap().get(id) {
            return Ok(hit.clone());
        }
        let session = self
            .store
            .fetch_session(id)
            .await
            .map_err(|e| EngineError::Stream(e.to_string()))?
            .ok_or_else(|| EngineError::not_found("session", id))?;
        self.cache
            .lock()
            .unwrap()
            .put(id.to_string(), session.clone());
        Ok(session)
    }

    pub async fn create_session(&self, title: &str) -> anyhow::Result<SessionRecord> {
        let session = SessionRecord::new(title);
        self.store.save_session(&session).await?;
        self.cache
            .lock()
            .unwrap()
            .put(session.id.clone(), session.clone());
        debug!(session_id = %session.id, "session created");
        Ok(session)
    }

    /// Archived sessions are excluded unless explicitly requested.
    pub async fn list_sessions(&self, include_archived: bool) -> anyhow::Result<Vec<SessionRecord>> {
        let all = self.store.list_sessions().await?;
        Ok(all
            .into_iter()
            .filter(|s| include_archived || !s.archived)
            .collect())
    }

    pub async fn delete_session(&self, id: &str) -> anyhow::Result<()> {
        self.store.delete_session(id).await?;
        self.cache.lock().unwrap().pop(id);
        self.snapshots.lock().unwrap().remove(id);
        self.turn_locks.lock().unwrap().remove(id);
        Ok(())
    }

    /// Apply a mutation, bump `updated_at`, and write through cache + store.
    pub async fn update<F>(&self, id: &str, mutate: F) -> Result<SessionRecord, EngineError>
    where
        F: FnOnce(&mut SessionRecord),
    {
        let mut session = self.hydrate(id).await?;
        mutate(&mut session);
        session.updated_at = Utc::now();
        self.store
            .save_session(&session)
            .await
            .map_err(|e| EngineError::Stream(e.to_string()))?;
        self.cache
            .lock()
            .unwrap()
            .put(session.id.clone(), session.clone());
        Ok(session)
    }

    pub async fn set_title(&self, id: &str, title: &str) -> Result<SessionRecord, EngineError> {
        self.update(id, |s| s.title = title.to_string()).await
    }

    pub async fn set_persona(
        &self,
        id: &str,
        persona_id: Option<String>,
    ) -> Result<SessionRecord, EngineError> {
        self.update(id, |s| s.persona_id = persona_id).await
    }

    pub async fn set_working_directory(
        &self,
        id: &str,
        dir: Option<String>,
    ) -> Result<SessionRecord, EngineError> {
        self.update(id, |s| s.working_directory = dir).await
    }

    pub async fn set_archived(&self, id: &str, archived: bool) -> Result<SessionRecord, EngineError> {
        self.update(id, |s| s.archived = archived).await
    }

    /// Attach a workspace; optionally promote it to primary.  The primary
    /// invariant (primary id ∈ workspace set) holds by construction.
    pub async fn attach_workspace(
        &self,
        id: &str,
        workspace: Workspace,
        make_primary: bool,
    ) -> Result<SessionRecord, EngineError> {
        self.update(id, |s| {
            let ws_id = workspace.id.clone();
            if !s.workspaces.iter().any(|w| w.id == ws_id) {
                s.workspaces.push(workspace);
            }
            if make_primary || s.primary_workspace.is_none() {
                s.primary_workspace = Some(ws_id);
            }
        })
        .await
    }

    /// Detach a workspace.  Detaching the primary clears the primary slot
    /// so the invariant never dangles.
    pub async fn detach_workspace(
        &self,
        id: &str,
        workspace_id: &str,
    ) -> Result<SessionRecord, EngineError> {
        self.update(id, |s| {
            s.workspaces.retain(|w| w.id != workspace_id);
            if s.primary_workspace.as_deref() == Some(workspace_id) {
                s.primary_workspace = None;
            }
        })
        .await
    }

    pub async fn history(&self, id: &str) -> anyhow::Result<Vec<StoredMessage>> {
        self.store.messages_for_session(id).await
    }

    /// All tool references across the session's workspaces, primary first,
    /// de-duplicated by tool identity.
    pub async fn aggregate_tools(&self, id: &str) -> Result<Vec<ToolReference>, EngineError> {
        let session = self.hydrate(id).await?;
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for ws in session.candidate_workspaces() {
            for tool in &ws.tools {
                if seen.insert(tool.tool_id().to_string()) {
                    out.push(tool.clone());
                }
            }
        }
        Ok(out)
    }

    pub fn set_snapshot(&self, session_id: &str, snapshot: DebugSnapshot) {
        self.snapshots
            .lock()
            .unwrap()
            .insert(session_id.to_string(), snapshot);
    }

    pub fn snapshot(&self, session_id: &str) -> Option<DebugSnapshot> {
        self.snapshots.lock().unwrap().get(session_id).cloned()
    }

    /// The per-session turn lock.  `chat_stream` holds it for the whole
    /// invocation, so a second call on the same session queues behind the
    /// first and message persistence never interleaves.
    pub fn turn_lock(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        self.turn_locks
            .lock()
            .unwrap()
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
