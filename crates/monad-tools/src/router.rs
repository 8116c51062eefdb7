// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Workspace-aware tool dispatch.
//!
//! A tool reference is resolved against the session's workspaces (primary
//! first, then attached in insertion order).  Server-hosted workspaces
//! execute locally; a client-hosted workspace suspends the turn with
//! [`Dispatch::ClientExecutionRequired`] — a control signal, not an error.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use monad_store::{Store, ToolReference, Workspace, WorkspaceHost, WorkspaceToolDefinition};

use crate::{ToolRegistry, ToolResult, ToolSchema};

/// Outcome of routing one tool call.
#[derive(Debug, Clone)]
pub enum Dispatch {
    /// The tool ran locally and produced a result (success or failure).
    Completed {
        /// Id of the workspace the call was routed to
        workspace_id: String,
        result: ToolResult,
    },
    /// The selected workspace is client-hosted; the turn must suspend until
    /// the client supplies the output.
    ClientExecutionRequired {
        workspace_id: String,
        owner: Option<String>,
    },
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("no workspace of the session declares tool '{0}'")]
    ToolNotFound(String),
}

/// Forwards a workspace-defined tool call to the workspace that hosts it.
///
/// Server deployments install an RPC-backed implementation; the default
/// reports the workspace as unreachable so a misconfigured custom tool
/// degrades into an ordinary tool failure.
#[async_trait]
pub trait WorkspaceForwarder: Send + Sync {
    async fn forward(
        &self,
        workspace: &Workspace,
        def: &WorkspaceToolDefinition,
        args: &Value,
    ) -> ToolResult;
}

#[derive(Default)]
pub struct UnreachableForwarder;

#[async_trait]
impl WorkspaceForwarder for UnreachableForwarder {
    async fn forward(
        &self,
        workspace: &Workspace,
        def: &WorkspaceToolDefinition,
        _args: &Value,
    ) -> ToolResult {
        ToolResult::fail(format!(
            "workspace {} is not reachable for tool '{}'",
            workspace.uri, def.name
        ))
    }
}

pub struct ToolRouter {
    registry: Arc<ToolRegistry>,
    store: Arc<dyn Store>,
    forwarder: Arc<dyn WorkspaceForwarder>,
    /// One lock per session, taken around tools that require permission so
    /// such calls never overlap within a session.
    permission_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ToolRouter {
    pub fn new(registry: Arc<ToolRegistry>, store: Arc<dyn Store>) -> Self {
        Self::with_forwarder(registry, store, Arc::new(UnreachableForwarder))
    }

    pub fn with_forwarder(
        registry: Arc<ToolRegistry>,
        store: Arc<dyn Store>,
        forwarder: Arc<dyn WorkspaceForwarder>,
    ) -> Self {
        Self {
            registry,
            store,
            forwarder,
            permission_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Model-facing schema for a reference: catalog schema for known tools,
    /// the embedded definition for custom ones.  `None` when a known id is
    /// absent from the catalog.
    pub fn schema_for(&self, reference: &ToolReference) -> Option<ToolSchema> {
        match reference {
            ToolReference::Known { id } => self.registry.get(id).map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            }),
            ToolReference::Custom { def } => Some(ToolSchema {
                name: def.name.clone(),
                description: def.description.clone(),
                parameters: def.parameters.clone(),
            }),
        }
    }

    /// Route and execute one tool call for a session.
    ///
    /// Resolution is deterministic: the primary workspace wins when it
    /// declares the tool, otherwise the earliest attached workspace that
    /// does.
    pub async fn dispatch(
        &self,
        reference: &ToolReference,
        args: &Value,
        session_id: &str,
    ) -> Result<Dispatch, RouteError> {
        let session = self
            .store
            .fetch_session(session_id)
            .await
            .ok()
            .flatten()
            .ok_or_else(|| RouteError::SessionNotFound(session_id.to_string()))?;

        let workspace = session
            .candidate_workspaces()
            .into_iter()
            .find(|w| w.declares(reference))
            .cloned()
            .ok_or_else(|| RouteError::ToolNotFound(reference.tool_id().to_string()))?;

        debug!(
            tool = reference.tool_id(),
            workspace = %workspace.uri,
            host = ?workspace.host,
            "dispatching tool call"
        );

        if workspace.host == WorkspaceHost::Client {
            return Ok(Dispatch::ClientExecutionRequired {
                workspace_id: workspace.id.clone(),
                owner: workspace.owner_id.clone(),
            });
        }

        let result = match reference {
            ToolReference::Known { id } => {
                let Some(tool) = self.registry.get(id) else {
                    return Err(RouteError::ToolNotFound(id.clone()));
                };
                if tool.requires_permission() {
                    let lock = self.session_lock(session_id).await;
                    let _guard = lock.lock().await;
                    tool.execute(args).await
                } else {
                    tool.execute(args).await
                }
            }
            ToolReference::Custom { def } => self.forwarder.forward(&workspace, def, args).await,
        };

        Ok(Dispatch::Completed {
            workspace_id: workspace.id.clone(),
            result,
        })
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.permission_locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use monad_store::{MemoryStore, SessionRecord};

    use super::*;
    use crate::Tool;

    struct StaticTool {
        name: &'static str,
        permission: bool,
    }

    #[async_trait]
    impl Tool for StaticTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "static"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn requires_permission(&self) -> bool {
            self.permission
        }
        async fn execute(&self, _args: &Value) -> ToolResult {
            ToolResult::ok(format!("ran:{}", self.name))
        }
    }

    fn workspace_with(host: WorkspaceHost, tool: &str) -> Workspace {
        let mut w = Workspace::new(format!("ws://{tool}"), host, "/");
        w.tools.push(ToolReference::known(tool));
        w
    }

    async fn router_with_session(
        workspaces: Vec<Workspace>,
        primary: Option<String>,
    ) -> (ToolRouter, String) {
        let store = Arc::new(MemoryStore::new());
        let mut session = SessionRecord::new("test");
        session.workspaces = workspaces;
        session.primary_workspace = primary;
        store.save_session(&session).await.unwrap();

        let mut reg = ToolRegistry::new();
        reg.register(StaticTool {
            name: "ls",
            permission: false,
        });
        reg.register(StaticTool {
            name: "deploy",
            permission: true,
        });
        let router = ToolRouter::new(Arc::new(reg), store);
        (router, session.id)
    }

    #[tokio::test]
    async fn dispatch_executes_local_server_tool() {
        let ws = workspace_with(WorkspaceHost::Server, "ls");
        let (router, sid) = router_with_session(vec![ws], None).await;
        let d = router
            .dispatch(&ToolReference::known("ls"), &json!({}), &sid)
            .await
            .unwrap();
        match d {
            Dispatch::Completed { result, .. } => assert_eq!(result.output, "ran:ls"),
            other => panic!("unexpected dispatch: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_client_host_suspends() {
        let mut ws = workspace_with(WorkspaceHost::Client, "ls");
        ws.owner_id = Some("owner-7".into());
        let (router, sid) = router_with_session(vec![ws], None).await;
        let d = router
            .dispatch(&ToolReference::known("ls"), &json!({}), &sid)
            .await
            .unwrap();
        match d {
            Dispatch::ClientExecutionRequired { owner, .. } => {
                assert_eq!(owner.as_deref(), Some("owner-7"));
            }
            other => panic!("unexpected dispatch: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_prefers_primary_workspace() {
        // Attached server workspace and a client primary that both declare
        // the tool: the primary must win even though it was attached later.
        let attached = workspace_with(WorkspaceHost::Server, "ls");
        let primary = workspace_with(WorkspaceHost::Client, "ls");
        let primary_id = primary.id.clone();
        let (router, sid) =
            router_with_session(vec![attached, primary], Some(primary_id.clone())).await;
        let d = router
            .dispatch(&ToolReference::known("ls"), &json!({}), &sid)
            .await
            .unwrap();
        match d {
            Dispatch::ClientExecutionRequired { workspace_id, .. } => {
                assert_eq!(workspace_id, primary_id);
            }
            other => panic!("primary should have been selected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_falls_back_to_earliest_attached() {
        // Primary does not declare the tool; the first attached workspace
        // that does must be selected.
        let primary = workspace_with(WorkspaceHost::Server, "other");
        let a = workspace_with(WorkspaceHost::Client, "ls");
        let b = workspace_with(WorkspaceHost::Server, "ls");
        let primary_id = primary.id.clone();
        let a_id = a.id.clone();
        let (router, sid) = router_with_session(vec![primary, a, b], Some(primary_id)).await;
        let d = router
            .dispatch(&ToolReference::known("ls"), &json!({}), &sid)
            .await
            .unwrap();
        match d {
            Dispatch::ClientExecutionRequired { workspace_id, .. } => {
                assert_eq!(workspace_id, a_id, "earliest attached declarer wins");
            }
            other => panic!("unexpected dispatch: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_is_route_error() {
        let ws = workspace_with(WorkspaceHost::Server, "ls");
        let (router, sid) = router_with_session(vec![ws], None).await;
        let err = router
            .dispatch(&ToolReference::known("rm"), &json!({}), &sid)
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn dispatch_missing_session_is_route_error() {
        let (router, _sid) = router_with_session(vec![], None).await;
        let err = router
            .dispatch(&ToolReference::known("ls"), &json!({}), "no-such-session")
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn custom_tool_uses_forwarder() {
        struct RecordingForwarder;
        #[async_trait]
        impl WorkspaceForwarder for RecordingForwarder {
            async fn forward(
                &self,
                _workspace: &Workspace,
                def: &WorkspaceToolDefinition,
                _args: &Value,
            ) -> ToolResult {
                ToolResult::ok(format!("forwarded:{}", def.name))
            }
        }

        let def = WorkspaceToolDefinition {
            name: "custom_op".into(),
            description: "workspace tool".into(),
            parameters: json!({ "type": "object" }),
        };
        let mut ws = Workspace::new("ws://custom", WorkspaceHost::Server, "/");
        ws.tools.push(ToolReference::Custom { def: def.clone() });

        let store = Arc::new(MemoryStore::new());
        let mut session = SessionRecord::new("t");
        session.workspaces = vec![ws];
        store.save_session(&session).await.unwrap();

        let router = ToolRouter::with_forwarder(
            Arc::new(ToolRegistry::new()),
            store,
            Arc::new(RecordingForwarder),
        );
        let d = router
            .dispatch(&ToolReference::Custom { def }, &json!({}), &session.id)
            .await
            .unwrap();
        match d {
            Dispatch::Completed { result, .. } => assert_eq!(result.output, "forwarded:custom_op"),
            other => panic!("unexpected dispatch: {other:?}"),
        }
    }

    #[tokio::test]
    async fn schema_for_custom_reference_uses_definition() {
        let store = Arc::new(MemoryStore::new());
        let router = ToolRouter::new(Arc::new(ToolRegistry::new()), store);
        let def = WorkspaceToolDefinition {
            name: "x".into(),
            description: "d".into(),
            parameters: json!({ "type": "object", "properties": {} }),
        };
        let schema = router
            .schema_for(&ToolReference::Custom { def })
            .unwrap();
        assert_eq!(schema.name, "x");
    }
}
