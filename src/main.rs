// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, JobCommands};
use monad_agents::{AgentRegistry, JobScheduler, ReasoningEngine};
use monad_config::{Config, StoreBackend};
use monad_core::{
    ChatDelta, ChatEngine, ChatRequest, ContextGatherer, SessionManager, ToolExecutionStatus,
};
use monad_model::LlmClient;
use monad_store::{
    FileStore, HashEmbedder, Job, MemoryStore, SessionRecord, Store, ToolReference, Workspace,
    WorkspaceHost,
};
use monad_tools::{ToolRegistry, ToolRouter};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // reqwest is built against rustls; install the process-wide provider
    // once, before any TLS connection is attempted.
    let _ = rustls::crypto::ring::default_provider().install_default();

    if let Err(e) = run(cli).await {
        eprintln!("monad: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "monad=debug,info" } else { "warn" };
    let filter = EnvFilter::try_from_env("MONAD_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = monad_config::load(cli.config.as_deref())?;

    if let Some(Commands::ShowConfig) = &cli.command {
        println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
        return Ok(());
    }

    let runtime = Runtime::build(&config).context("startup failed")?;

    match cli.command {
        None | Some(Commands::Chat { session: None }) => runtime.chat(None).await,
        Some(Commands::Chat { session }) => runtime.chat(session).await,
        Some(Commands::Sessions { all }) => runtime.list_sessions(all).await,
        Some(Commands::Jobs { command }) => runtime.jobs(command).await,
        Some(Commands::ShowConfig) => unreachable!("handled above"),
    }
}

/// Everything the CLI wires together from configuration.
struct Runtime {
    store: Arc<dyn Store>,
    sessions: Arc<SessionManager>,
    engine: Arc<ChatEngine>,
    scheduler: Arc<JobScheduler>,
    registry: Arc<ToolRegistry>,
}

impl Runtime {
    fn build(config: &Config) -> anyhow::Result<Self> {
        let store: Arc<dyn Store> = match config.store.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::File => Arc::new(FileStore::new(config.store.resolved_data_dir())?),
        };
        let llm: Arc<dyn LlmClient> = Arc::from(monad_model::from_config(&config.llm)?);
        let embedder = Arc::new(HashEmbedder::default());

        let registry = Arc::new(ToolRegistry::catalog(
            Arc::clone(&store),
            embedder.clone() as Arc<dyn monad_store::EmbeddingClient>,
        ));
        let router = Arc::new(ToolRouter::new(Arc::clone(&registry), Arc::clone(&store)));
        let gatherer = Arc::new(ContextGatherer::new(
            Arc::clone(&store),
            embedder,
            Arc::clone(&llm),
            config.gather.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(Arc::clone(&store)));

        let engine = Arc::new(ChatEngine::new(
            Arc::clone(&sessions),
            Arc::clone(&llm),
            Arc::clone(&router),
            Arc::clone(&gatherer),
            config.engine.clone(),
            config.llm.context_window,
        ));
        let reasoning = Arc::new(ReasoningEngine::new(
            Arc::clone(&store),
            llm,
            router,
            gatherer,
            config.engine.max_reasoning_turns,
            config.llm.context_window,
            config.engine.history_reserve_tokens,
        ));
        let scheduler = Arc::new(JobScheduler::new(
            Arc::clone(&store),
            Arc::new(AgentRegistry::with_builtin()),
            reasoning,
            Duration::from_secs(config.scheduler.poll_interval_secs),
        ));

        Ok(Self {
            store,
            sessions,
            engine,
            scheduler,
            registry,
        })
    }

    /// Interactive line loop: each stdin line becomes one chat invocation,
    /// deltas print as they stream.
    async fn chat(&self, session: Option<String>) -> anyhow::Result<()> {
        let session_id = match session {
            Some(id) => {
                self.store
                    .fetch_session(&id)
                    .await?
                    .with_context(|| format!("session not found: {id}"))?;
                id
            }
            None => self.new_chat_session().await?,
        };
        eprintln!("session {session_id} — type a message, ctrl-d to exit");

        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            self.one_turn(&session_id, &line).await?;
        }
        Ok(())
    }

    /// A fresh session bound to a local workspace that declares the full
    /// built-in catalog.
    async fn new_chat_session(&self) -> anyhow::Result<String> {
        let session = self.sessions.create_session("cli chat").await?;
        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "/".into());
        let mut ws = Workspace::new("monad://local", WorkspaceHost::Server, cwd);
        ws.tools = self
            .registry
            .names()
            .into_iter()
            .map(ToolReference::known)
            .collect();
        self.sessions
            .attach_workspace(&session.id, ws, true)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(session.id)
    }

    async fn one_turn(&self, session_id: &str, message: &str) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel(256);
        let engine = Arc::clone(&self.engine);
        let req = ChatRequest::message(session_id, message);
        let task = tokio::spawn(async move { engine.chat_stream(req, tx).await });

        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            match event {
                ChatDelta::Thought { thought } => eprint!("{thought}"),
                ChatDelta::ThoughtCompleted => eprintln!(),
                ChatDelta::Delta { content } => {
                    print!("{content}");
                    let _ = stdout.flush();
                }
                ChatDelta::ToolExecution {
                    name,
                    status: ToolExecutionStatus::Attempting,
                    ..
                } => {
                    eprintln!("[tool {}]", name.unwrap_or_default());
                }
                ChatDelta::GenerationCompleted {
                    requires_client_execution: true,
                    ..
                } => {
                    eprintln!("[a client-hosted tool was requested; not supported from the CLI]");
                }
                ChatDelta::Error { error } => eprintln!("error: {error}"),
                _ => {}
            }
        }
        task.await??;
        println!();
        Ok(())
    }

    async fn list_sessions(&self, include_archived: bool) -> anyhow::Result<()> {
        let sessions = self.sessions.list_sessions(include_archived).await?;
        if sessions.is_empty() {
            println!("(no sessions)");
            return Ok(());
        }
        for s in sessions {
            println!(
                "{}  {}  {}{}",
                s.id,
                s.updated_at.format("%Y-%m-%d %H:%M"),
                s.title,
                if s.archived { "  [archived]" } else { "" }
            );
        }
        Ok(())
    }

    async fn jobs(&self, command: JobCommands) -> anyhow::Result<()> {
        match command {
            JobCommands::Add {
                agent,
                title,
                description,
                priority,
            } => {
                let session = SessionRecord::new(format!("job: {title}"));
                self.store.save_session(&session).await?;
                let mut job = Job::new(&session.id, agent, title, description);
                job.priority = priority;
                self.store.save_job(&job).await?;
                println!("queued job {}", job.id);
                Ok(())
            }
            JobCommands::List => {
                let jobs = self.store.list_jobs().await?;
                if jobs.is_empty() {
                    println!("(no jobs)");
                    return Ok(());
                }
                for j in jobs {
                    println!(
                        "{}  {:?}  retries={}  {}",
                        j.id, j.status, j.retry_count, j.title
                    );
                }
                Ok(())
            }
            JobCommands::Run => {
                let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
                let scheduler = Arc::clone(&self.scheduler);
                let handle = tokio::spawn(scheduler.run(shutdown_rx));
                tokio::signal::ctrl_c().await?;
                let _ = shutdown_tx.send(());
                handle.await?;
                Ok(())
            }
        }
    }
}
