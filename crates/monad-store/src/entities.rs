// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The persisted data model: sessions, messages, workspaces, memories,
//! notes, and jobs.  Cross-entity references are identities only; they are
//! dereferenced through the session manager or the tool registry, never
//! embedded as back-pointers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub archived: bool,
    pub persona_id: Option<String>,
    pub working_directory: Option<String>,
    /// Id of the primary workspace.  When set, it always names a member of
    /// `workspaces`.
    pub primary_workspace: Option<String>,
    /// Workspaces in attach order; the primary is also listed here.
    #[serde(default)]
    pub workspaces: Vec<Workspace>,
}

impl SessionRecord {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            created_at: now,
            updated_at: now,
            archived: false,
            persona_id: None,
            working_directory: None,
            primary_workspace: None,
            workspaces: Vec::new(),
        }
    }

    /// Workspaces in tool-resolution order: primary first, then the rest in
    /// attach order.
    pub fn candidate_workspaces(&self) -> Vec<&Workspace> {
        let mut out: Vec<&Workspace> = Vec::with_capacity(self.workspaces.len());
        if let Some(primary) = &self.primary_workspace {
            if let Some(ws) = self.workspaces.iter().find(|w| &w.id == primary) {
                out.push(ws);
            }
        }
        for ws in &self.workspaces {
            if Some(&ws.id) != self.primary_workspace.as_ref() {
                out.push(ws);
            }
        }
        out
    }
}

/// Role of a persisted conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
    Summary,
}

/// One persisted message within a session.
///
/// Messages are appended in non-decreasing timestamp order; a `Tool` message
/// always cites the `tool_call_id` of an earlier assistant request in the
/// same session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Reasoning text captured alongside an assistant message
    pub reasoning: Option<String>,
    /// JSON-encoded list of tool calls the assistant requested
    pub tool_calls: Option<String>,
    /// Required when role = Tool
    pub tool_call_id: Option<String>,
    /// Parent message for branched conversations
    pub parent_id: Option<String>,
    /// Memories recalled while generating this message
    #[serde(default)]
    pub memory_ids: Vec<String>,
}

impl StoredMessage {
    fn base(session_id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            reasoning: None,
            tool_calls: None,
            tool_call_id: None,
            parent_id: None,
            memory_ids: Vec::new(),
        }
    }

    pub fn user(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::base(session_id, MessageRole::User, content)
    }

    pub fn assistant(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::base(session_id, MessageRole::Assistant, content)
    }

    pub fn system(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::base(session_id, MessageRole::System, content)
    }

    pub fn tool(
        session_id: impl Into<String>,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut m = Self::base(session_id, MessageRole::Tool, content);
        m.tool_call_id = Some(tool_call_id.into());
        m
    }
}

/// Reference to a tool a workspace permits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ToolReference {
    /// Pointer into the built-in tool catalog
    Known { id: String },
    /// A workspace-defined tool carrying its own schema
    Custom { def: WorkspaceToolDefinition },
}

impl ToolReference {
    pub fn known(id: impl Into<String>) -> Self {
        Self::Known { id: id.into() }
    }

    /// The identity tools are de-duplicated and matched by: the catalog id
    /// for known tools, the definition name for custom ones.
    pub fn tool_id(&self) -> &str {
        match self {
            Self::Known { id } => id,
            Self::Custom { def } => &def.name,
        }
    }
}

/// Schema of a tool defined by a workspace rather than the built-in catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-Schema-compatible parameter map
    pub parameters: serde_json::Value,
}

/// Where a workspace's tools execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkspaceHost {
    /// This process
    Server,
    /// This process, scoped to one session
    ServerSession,
    /// A remote client; execution suspends the turn until the client
    /// supplies the output
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    Full,
    ReadOnly,
    Untrusted,
}

/// A named environment owning a set of tools and a root path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub uri: String,
    pub host: WorkspaceHost,
    pub owner_id: Option<String>,
    pub root_path: String,
    pub trust: TrustLevel,
    pub created_at: DateTime<Utc>,
    /// Tool references this workspace permits
    #[serde(default)]
    pub tools: Vec<ToolReference>,
}

impl Workspace {
    pub fn new(uri: impl Into<String>, host: WorkspaceHost, root_path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            uri: uri.into(),
            host,
            owner_id: None,
            root_path: root_path.into(),
            trust: TrustLevel::Full,
            created_at: Utc::now(),
            tools: Vec::new(),
        }
    }

    /// True when this workspace declares a tool with the same identity.
    pub fn declares(&self, reference: &ToolReference) -> bool {
        self.tools.iter().any(|t| t.tool_id() == reference.tool_id())
    }
}

/// A long-term memory consumed read-only during context gathering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl Memory {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            content: content.into(),
            tags: Vec::new(),
            embedding: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// A note surfaced during context gathering: either always appended to the
/// prompt or matched against the query's tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub always_append: bool,
    pub created_at: DateTime<Utc>,
}

impl Note {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            content: content.into(),
            tags: Vec::new(),
            always_append: false,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// An autonomous unit of work executed by the reasoning engine.
///
/// Status transitions obey `pending → inProgress → {completed | failed |
/// pending}`; re-entry into `pending` happens only through retry, with a
/// strictly increasing `retry_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub session_id: String,
    pub agent_id: String,
    pub title: String,
    pub description: String,
    pub status: JobStatus,
    #[serde(default)]
    pub retry_count: u32,
    pub next_run_at: DateTime<Utc>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub log: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        session_id: impl Into<String>,
        agent_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            agent_id: agent_id.into(),
            title: title.into(),
            description: description.into(),
            status: JobStatus::Pending,
            retry_count: 0,
            next_run_at: now,
            priority: 0,
            log: Vec::new(),
            created_at: now,
        }
    }

    pub fn push_log(&mut self, line: impl Into<String>) {
        self.log.push(format!("{} {}", Utc::now().to_rfc3339(), line.into()));
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ws(uri: &str, host: WorkspaceHost, tool: &str) -> Workspace {
        let mut w = Workspace::new(uri, host, "/");
        w.tools.push(ToolReference::known(tool));
        w
    }

    #[test]
    fn new_session_has_unique_id() {
        let a = SessionRecord::new("a");
        let b = SessionRecord::new("b");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn candidate_workspaces_primary_first() {
        let mut s = SessionRecord::new("s");
        let a = ws("ws://a", WorkspaceHost::Server, "ls");
        let b = ws("ws://b", WorkspaceHost::Server, "ls");
        let b_id = b.id.clone();
        s.workspaces.push(a);
        s.workspaces.push(b);
        s.primary_workspace = Some(b_id.clone());

        let order: Vec<&str> = s.candidate_workspaces().iter().map(|w| w.id.as_str()).collect();
        assert_eq!(order[0], b_id);
        assert_eq!(order.len(), 2);
    }

    #[test]
    fn candidate_workspaces_without_primary_keeps_attach_order() {
        let mut s = SessionRecord::new("s");
        let a = ws("ws://a", WorkspaceHost::Server, "ls");
        let a_id = a.id.clone();
        let b = ws("ws://b", WorkspaceHost::Client, "ls");
        s.workspaces.push(a);
        s.workspaces.push(b);
        let order: Vec<&str> = s.candidate_workspaces().iter().map(|w| w.id.as_str()).collect();
        assert_eq!(order[0], a_id);
    }

    #[test]
    fn tool_message_carries_call_id() {
        let m = StoredMessage::tool("s1", "call-9", "output");
        assert_eq!(m.role, MessageRole::Tool);
        assert_eq!(m.tool_call_id.as_deref(), Some("call-9"));
    }

    #[test]
    fn tool_reference_identity_for_custom_is_name() {
        let r = ToolReference::Custom {
            def: WorkspaceToolDefinition {
                name: "frob".into(),
                description: "frobnicates".into(),
                parameters: serde_json::json!({"type": "object"}),
            },
        };
        assert_eq!(r.tool_id(), "frob");
    }

    #[test]
    fn workspace_declares_matches_by_identity() {
        let w = ws("ws://x", WorkspaceHost::Server, "ls");
        assert!(w.declares(&ToolReference::known("ls")));
        assert!(!w.declares(&ToolReference::known("rm")));
    }

    #[test]
    fn new_job_is_pending_and_runnable_now() {
        let j = Job::new("s1", "agent-1", "t", "d");
        assert_eq!(j.status, JobStatus::Pending);
        assert_eq!(j.retry_count, 0);
        assert!(j.next_run_at <= Utc::now());
    }

    #[test]
    fn job_log_lines_are_timestamped() {
        let mut j = Job::new("s1", "agent-1", "t", "d");
        j.push_log("retry scheduled");
        assert_eq!(j.log.len(), 1);
        assert!(j.log[0].contains("retry scheduled"));
    }

    #[test]
    fn session_record_round_trips_through_json() {
        let mut s = SessionRecord::new("persisted");
        s.workspaces.push(ws("ws://x", WorkspaceHost::Client, "deploy"));
        let json = serde_json::to_string(&s).unwrap();
        let back: SessionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.title, "persisted");
        assert_eq!(back.workspaces.len(), 1);
        assert_eq!(back.workspaces[0].host, WorkspaceHost::Client);
    }
}
