// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Cross-crate integration: chat engine, builtin tool catalog, file-backed
//! store, and the job scheduler working against one shared store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use monad_agents::{AgentDefinition, AgentRegistry, JobScheduler, ReasoningEngine};
use monad_config::{EngineConfig, GatherConfig};
use monad_core::{ChatDelta, ChatEngine, ChatRequest, ContextGatherer, SessionManager};
use monad_model::{LlmClient, ResponseEvent, ScriptedClient};
use monad_store::{
    FileStore, HashEmbedder, JobStatus, MemoryStore, SessionRecord, Store, ToolReference,
    Workspace, WorkspaceHost,
};
use monad_tools::{ToolRegistry, ToolRouter};

fn full_stack(store: Arc<dyn Store>, llm: Arc<dyn LlmClient>) -> (Arc<ChatEngine>, Arc<JobScheduler>) {
    let embedder = Arc::new(HashEmbedder::default());
    let registry = Arc::new(ToolRegistry::catalog(
        Arc::clone(&store),
        embedder.clone() as Arc<dyn monad_store::EmbeddingClient>,
    ));
    let router = Arc::new(ToolRouter::new(registry, Arc::clone(&store)));
    let gather_config = GatherConfig {
        tag_extraction: false,
        ..GatherConfig::default()
    };
    let gatherer = Arc::new(ContextGatherer::new(
        Arc::clone(&store),
        embedder,
        Arc::clone(&llm),
        gather_config,
    ));
    let sessions = Arc::new(SessionManager::new(Arc::clone(&store)));
    let engine = Arc::new(ChatEngine::new(
        sessions,
        Arc::clone(&llm),
        Arc::clone(&router),
        Arc::clone(&gatherer),
        EngineConfig::default(),
        128_000,
    ));

    let reasoning = Arc::new(ReasoningEngine::new(
        Arc::clone(&store),
        llm,
        router,
        gatherer,
        10,
        128_000,
        4_000,
    ));
    let mut agents = AgentRegistry::new();
    agents.register(AgentDefinition::new("general", "General", "You handle tasks."));
    let scheduler = Arc::new(JobScheduler::new(
        store,
        Arc::new(agents),
        reasoning,
        Duration::from_millis(10),
    ));
    (engine, scheduler)
}

async fn session_with_catalog(store: &Arc<dyn Store>) -> String {
    let mut session = SessionRecord::new("integration");
    let mut ws = Workspace::new("monad://local", WorkspaceHost::Server, "/");
    for tool in [
        "list_dir",
        "read_file",
        "write_file",
        "save_memory",
        "search_memory",
        "web_search",
        "delegate_task",
    ] {
        ws.tools.push(ToolReference::known(tool));
    }
    session.primary_workspace = Some(ws.id.clone());
    session.workspaces = vec![ws];
    store.save_session(&session).await.unwrap();
    session.id
}

async fn drain(engine: &ChatEngine, req: ChatRequest) -> Vec<ChatDelta> {
    let (tx, mut rx) = mpsc::channel(256);
    engine.chat_stream(req, tx).await.unwrap();
    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        events.push(ev);
    }
    events
}

#[tokio::test]
async fn chat_delegation_feeds_the_scheduler() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

    // Chat turn 1: the model delegates a task, then confirms.
    // Scheduler run: the job's agent replies "Job complete".
    let llm: Arc<dyn LlmClient> = Arc::new(ScriptedClient::new(vec![
        vec![
            ResponseEvent::ToolCall {
                index: 0,
                id: "tc-delegate".into(),
                name: "delegate_task".into(),
                arguments: r#"{"agent_id":"general","title":"homework","description":"sum the numbers"}"#
                    .into(),
            },
            ResponseEvent::Done,
        ],
        vec![
            ResponseEvent::TextDelta("Delegated.".into()),
            ResponseEvent::Done,
        ],
        vec![
            ResponseEvent::TextDelta("All summed. Job complete.".into()),
            ResponseEvent::Done,
        ],
    ]));
    let (engine, scheduler) = full_stack(Arc::clone(&store), llm);
    let session_id = session_with_catalog(&store).await;

    let events = drain(&engine, ChatRequest::message(&session_id, "please delegate this")).await;
    assert!(events
        .iter()
        .any(|e| matches!(e, ChatDelta::GenerationCompleted { .. })));

    // The delegate tool enqueued a pending job.
    let jobs = store.list_jobs().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Pending);
    assert_eq!(jobs[0].agent_id, "general");

    // The scheduler picks it up and drives it to completion.
    let ran = scheduler.run_once().await;
    assert_eq!(ran.as_deref(), Some(jobs[0].id.as_str()));
    let done = store.fetch_job(&jobs[0].id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
}

#[tokio::test]
async fn file_backed_history_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store: Arc<dyn Store> = Arc::new(FileStore::new(dir.path()).unwrap());
        let llm: Arc<dyn LlmClient> = Arc::new(ScriptedClient::always_text("first answer"));
        let (engine, _scheduler) = full_stack(Arc::clone(&store), llm);
        let session_id = session_with_catalog(&store).await;
        drain(&engine, ChatRequest::message(&session_id, "question one")).await;
    }

    // A new process over the same data directory sees the conversation.
    let store: Arc<dyn Store> = Arc::new(FileStore::new(dir.path()).unwrap());
    let sessions = store.list_sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    let msgs = store.messages_for_session(&sessions[0].id).await.unwrap();
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[0].content, "question one");
    assert_eq!(msgs[1].content, "first answer");
}
