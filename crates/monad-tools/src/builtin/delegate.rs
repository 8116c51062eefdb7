// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Delegation tool: hand a task to an autonomous agent by enqueuing a job.
//!
//! The job scheduler picks the job up on its next poll.  When no target
//! session is given, a fresh session is created so the job's conversation
//! does not interleave with the delegating one.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use monad_store::{Job, SessionRecord, Store};

use crate::tool::{Tool, ToolResult};

pub struct DelegateTaskTool {
    store: Arc<dyn Store>,
}

impl DelegateTaskTool {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for DelegateTaskTool {
    fn name(&self) -> &str {
        "delegate_task"
    }

    fn description(&self) -> &str {
        "Delegate a task to an autonomous agent. The task runs in the \
         background; check job status later. Provide a clear, self-contained \
         description — the agent cannot ask follow-up questions."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent_id": {
                    "type": "string",
                    "description": "Id of the agent to run the task"
                },
                "title": {
                    "type": "string",
                    "description": "Short task title"
                },
                "description": {
                    "type": "string",
                    "description": "Self-contained task description"
                },
                "session_id": {
                    "type": "string",
                    "description": "Existing session to run in (default: a new session)"
                },
                "priority": {
                    "type": "integer",
                    "description": "Scheduling priority; higher runs first (default 0)"
                }
            },
            "required": ["agent_id", "title", "description"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: &Value) -> ToolResult {
        let agent_id = match args.get("agent_id").and_then(|v| v.as_str()) {
            Some(a) if !a.trim().is_empty() => a.trim().to_string(),
            _ => return ToolResult::fail("missing 'agent_id'"),
        };
        let title = match args.get("title").and_then(|v| v.as_str()) {
            Some(t) if !t.trim().is_empty() => t.trim().to_string(),
            _ => return ToolResult::fail("missing 'title'"),
        };
        let description = match args.get("description").and_then(|v| v.as_str()) {
            Some(d) if !d.trim().is_empty() => d.trim().to_string(),
            _ => return ToolResult::fail("missing 'description'"),
        };
        let priority = args.get("priority").and_then(|v| v.as_i64()).unwrap_or(0) as i32;

        let session_id = match args.get("session_id").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => {
                let session = SessionRecord::new(format!("job: {title}"));
                if let Err(e) = self.store.save_session(&session).await {
                    return ToolResult::fail(format!("creating job session: {e}"));
                }
                session.id
            }
        };

        let mut job = Job::new(session_id, agent_id, title, description);
        job.priority = priority;

        debug!(job_id = %job.id, agent = %job.agent_id, priority, "delegate_task tool");

        match self.store.save_job(&job).await {
            Ok(()) => ToolResult::ok(format!("queued job {} ({})", job.id, job.title)),
            Err(e) => ToolResult::fail(format!("enqueue failed: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use monad_store::{JobStatus, MemoryStore};

    use super::*;

    #[tokio::test]
    async fn delegate_creates_pending_job_and_session() {
        let store = Arc::new(MemoryStore::new());
        let tool = DelegateTaskTool::new(store.clone());
        let r = tool
            .execute(&json!({
                "agent_id": "researcher",
                "title": "summarize logs",
                "description": "read the logs and summarize"
            }))
            .await;
        assert!(r.success, "{:?}", r.error);

        let jobs = store.list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Pending);
        // A fresh session was created for the job.
        assert!(store
            .fetch_session(&jobs[0].session_id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn delegate_reuses_given_session() {
        let store = Arc::new(MemoryStore::new());
        let session = SessionRecord::new("mine");
        store.save_session(&session).await.unwrap();

        let tool = DelegateTaskTool::new(store.clone());
        tool.execute(&json!({
            "agent_id": "a",
            "title": "t",
            "description": "d",
            "session_id": session.id
        }))
        .await;

        let jobs = store.list_jobs().await.unwrap();
        assert_eq!(jobs[0].session_id, session.id);
    }

    #[tokio::test]
    async fn delegate_requires_description() {
        let store = Arc::new(MemoryStore::new());
        let tool = DelegateTaskTool::new(store);
        let r = tool
            .execute(&json!({ "agent_id": "a", "title": "t" }))
            .await;
        assert!(!r.success);
    }
}
