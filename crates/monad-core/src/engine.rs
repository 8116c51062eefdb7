// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;
use uuid::Uuid;

use monad_config::EngineConfig;
use monad_model::{CompletionRequest, LlmClient, Message, ResponseEvent};
use monad_store::{Store, StoredMessage, ToolReference};
use monad_tools::{Dispatch, ToolCall, ToolRouter};

use crate::{
    error::EngineError,
    events::{ChatDelta, ContextMetadata, ResponseMetadata, ToolCallFragment, ToolExecutionStatus},
    gather::ContextGatherer,
    prompt::{ContextOverrides, PromptAssembler, PromptInputs},
    session::{DebugSnapshot, SessionManager, SnapshotToolCall},
    stream::{extract_tool_call_blocks, StreamParser},
};

/// One invocation of the turn loop.
///
/// Preconditions: `message` non-empty OR `prior_tool_outputs` non-empty,
/// and the session must exist.
#[derive(Default)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
    /// Extra tool references beyond the session's workspace tools
    pub tools: Vec<ToolReference>,
    /// Outputs of client-executed tool calls from a suspended turn
    pub prior_tool_outputs: Vec<ToolOutputSubmission>,
    /// Caller-supplied context sections (documents, database directory)
    pub overrides: ContextOverrides,
    /// Replaces the default system section when set
    pub system_instructions: Option<String>,
}

impl ChatRequest {
    pub fn message(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    /// The resume form of the contract: empty message, prior tool outputs
    /// keyed by the ids emitted before suspension.
    pub fn resume(session_id: impl Into<String>, outputs: Vec<ToolOutputSubmission>) -> Self {
        Self {
            session_id: session_id.into(),
            prior_tool_outputs: outputs,
            ..Default::default()
        }
    }
}

/// A client-supplied tool output used to resume a suspended turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutputSubmission {
    pub tool_call_id: String,
    pub output: String,
}

/// Wire form of one requested tool call as persisted on an assistant
/// message (`StoredMessage::tool_calls`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object
    pub arguments: String,
}

/// The streaming, tool-augmented turn loop.
///
/// Drives one user-initiated generation to completion: assembles a budgeted
/// prompt, consumes the model stream, dispatches tool calls through the
/// workspace router, feeds tool outputs into the next turn, and emits the
/// ordered event protocol to the caller's channel.
pub struct ChatEngine {
    sessions: Arc<SessionManager>,
    store: Arc<dyn Store>,
    llm: Arc<dyn LlmClient>,
    router: Arc<ToolRouter>,
    gatherer: Arc<ContextGatherer>,
    assembler: PromptAssembler,
    config: EngineConfig,
}

impl ChatEngine {
    pub fn new(
        sessions: Arc<SessionManager>,
        llm: Arc<dyn LlmClient>,
        router: Arc<ToolRouter>,
        gatherer: Arc<ContextGatherer>,
        config: EngineConfig,
        context_window: usize,
    ) -> Self {
        let store = Arc::clone(sessions.store());
        let assembler = PromptAssembler::new(context_window, config.history_reserve_tokens);
        Self {
            sessions,
            store,
            llm,
            router,
            gatherer,
            assembler,
            config,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Run one invocation, streaming events through `tx`.
    ///
    /// Every outcome — completion, cancellation, fatal error — is reported
    /// as exactly one terminal event followed by `streamCompleted`; the
    /// returned `Result` is only about channel plumbing.
    pub async fn chat_stream(
        &self,
        req: ChatRequest,
        tx: mpsc::Sender<ChatDelta>,
    ) -> anyhow::Result<()> {
        // The sender half stays alive for the whole call so the receiver
        // never reads a spurious cancellation.
        let (_keep_alive, cancel) = oneshot::channel();
        self.chat_stream_with_cancel(req, tx, cancel).await
    }

    /// Like [`chat_stream`] but cancellable.
    ///
    /// Sending `()` (or dropping the sender) cancels cooperatively: the
    /// loop observes the flag at every delta boundary, between tool calls,
    /// and between turns, emits `generationCancelled`, and persists nothing
    /// further.
    pub async fn chat_stream_with_cancel(
        &self,
        req: ChatRequest,
        tx: mpsc::Sender<ChatDelta>,
        mut cancel: oneshot::Receiver<()>,
    ) -> anyhow::Result<()> {
        match self.run_chat(req, &tx, &mut cancel).await {
            Ok(()) => {}
            Err(EngineError::Cancelled) => {
                let _ = tx.send(ChatDelta::GenerationCancelled).await;
            }
            Err(e) => {
                let _ = tx
                    .send(ChatDelta::Error {
                        error: e.to_string(),
                    })
                    .await;
            }
        }
        let _ = tx.send(ChatDelta::StreamCompleted).await;
        Ok(())
    }

    async fn run_chat(
        &self,
        req: ChatRequest,
        tx: &mpsc::Sender<ChatDelta>,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Result<(), EngineError> {
        if req.message.trim().is_empty() && req.prior_tool_outputs.is_empty() {
            return Err(EngineError::InvalidArgument(
                "message and prior tool outputs are both empty".into(),
            ));
        }
        let session_id = req.session_id.clone();
        self.sessions.hydrate(&session_id).await?;

        // Serialize turns per session: a second invocation queues here and
        // never interleaves persistence with the first.
        let turn_lock = self.sessions.turn_lock(&session_id);
        let _turn_guard = turn_lock.lock().await;
        check_cancel(cancel)?;

        let started = Instant::now();

        // 1. Persist prior tool outputs, then the user message.
        for output in &req.prior_tool_outputs {
            self.append(StoredMessage::tool(
                &session_id,
                &output.tool_call_id,
                &output.output,
            ))
            .await?;
        }
        let has_user_message = !req.message.trim().is_empty();
        if has_user_message {
            self.append(StoredMessage::user(&session_id, &req.message))
                .await?;
        }

        // 2. History + context gathering.
        let mut history = self
            .store
            .messages_for_session(&session_id)
            .await
            .map_err(|e| EngineError::Stream(e.to_string()))?;
        let query = if has_user_message {
            req.message.clone()
        } else {
            history
                .iter()
                .rev()
                .find(|m| m.role == monad_store::MessageRole::User)
                .map(|m| m.content.clone())
                .unwrap_or_default()
        };
        let context = self.gatherer.gather(&query, &history, None).await;

        let mut files: Vec<String> = context.notes.iter().map(|n| n.title.clone()).collect();
        files.extend(req.overrides.documents.iter().map(|d| d.name.clone()));
        send(
            tx,
            ChatDelta::GenerationContext {
                metadata: ContextMetadata {
                    memories: context.memories.iter().map(|m| m.id.clone()).collect(),
                    files,
                },
            },
        )
        .await;
        check_cancel(cancel)?;

        // 3. Resolve the tool set: session workspace tools plus extras.
        let mut refs = self.sessions.aggregate_tools(&session_id).await?;
        for r in &req.tools {
            if !refs.iter().any(|have| have.tool_id() == r.tool_id()) {
                refs.push(r.clone());
            }
        }
        let mut tool_schemas = Vec::new();
        for r in &refs {
            match self.router.schema_for(r) {
                Some(s) => tool_schemas.push(s),
                None => warn!(tool = r.tool_id(), "tool reference has no schema; skipping"),
            }
        }

        // 4. Seed the in-memory message list.  The freshly persisted user
        // message renders through the user_query section on the first turn,
        // so it is peeled off the history here.
        let mut user_query = None;
        if has_user_message {
            history.pop();
            user_query = Some(req.message.clone());
        }
        let mut current = messages_from_stored(&history);

        let memory_ids: Vec<String> = context.memories.iter().map(|m| m.id.clone()).collect();
        let mut snapshot_calls: Vec<SnapshotToolCall> = Vec::new();
        let mut last_context_map = std::collections::BTreeMap::new();
        let mut last_usage: Option<(u32, u32)> = None;

        for turn in 1..=self.config.max_turns {
            check_cancel(cancel)?;

            let prompt = self.assembler.build(PromptInputs {
                system_instructions: req.system_instructions.clone(),
                notes: context.notes.clone(),
                memories: context.memories.clone(),
                tools: tool_schemas.clone(),
                history: current.clone(),
                user_query: user_query.clone(),
                overrides: req.overrides.clone(),
            });
            let rendered = self.assembler.render(&prompt).await;
            last_context_map = rendered.context_map;

            let completion_req = CompletionRequest {
                messages: rendered.messages,
                tools: tool_schemas
                    .iter()
                    .map(|s| monad_model::ToolSchema {
                        name: s.name.clone(),
                        description: s.description.clone(),
                        parameters: s.parameters.clone(),
                    })
                    .collect(),
                stream: true,
            };

            let mut turn_output = self
                .stream_one_turn(completion_req, tx, cancel, &mut last_usage)
                .await?;

            let pending = std::mem::take(&mut turn_output.pending);
            let calls = self
                .finalize_tool_calls(pending, &turn_output.content, tx)
                .await?;

            if calls.is_empty() {
                // Tool-free turn: the generation is complete.
                let mut message = StoredMessage::assistant(&session_id, &turn_output.content);
                message.reasoning =
                    (!turn_output.thinking.is_empty()).then(|| turn_output.thinking.clone());
                message.memory_ids = memory_ids.clone();
                self.append(message.clone()).await?;

                let snapshot = self.write_snapshot(&session_id, last_context_map, snapshot_calls, turn);
                let metadata = self.metadata(&snapshot, last_usage, started, &turn_output);
                self.touch_session(&session_id).await;
                send(
                    tx,
                    ChatDelta::GenerationCompleted {
                        message: Some(message),
                        response_metadata: metadata,
                        requires_client_execution: false,
                    },
                )
                .await;
                return Ok(());
            }

            // Persist the assistant turn with its encoded tool calls.
            let encoded: Vec<EncodedToolCall> = calls
                .iter()
                .map(|c| EncodedToolCall {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    arguments: c.args.to_string(),
                })
                .collect();
            let mut assistant = StoredMessage::assistant(&session_id, &turn_output.content);
            assistant.reasoning =
                (!turn_output.thinking.is_empty()).then(|| turn_output.thinking.clone());
            assistant.tool_calls = serde_json::to_string(&encoded).ok();
            assistant.memory_ids = memory_ids.clone();
            self.append(assistant.clone()).await?;

            if let Some(q) = user_query.take() {
                current.push(Message::user(q));
            }
            if !turn_output.content.is_empty() {
                current.push(Message::assistant(&turn_output.content));
            }
            for c in &calls {
                current.push(Message::tool_call(&c.id, &c.name, c.args.to_string()));
            }

            // Dispatch calls in index order; a client-hosted tool suspends
            // the loop and hands control back to the consumer.
            for call in &calls {
                check_cancel(cancel)?;

                let Some(reference) = refs.iter().find(|r| r.tool_id() == call.name) else {
                    let error = format!("unknown tool '{}'", call.name);
                    send(tx, ChatDelta::ToolCallError { error: error.clone() }).await;
                    // Keep the attempting→failure pairing intact even for a
                    // call that never reaches the router.
                    for status in [ToolExecutionStatus::Attempting, ToolExecutionStatus::Failure] {
                        send(
                            tx,
                            ChatDelta::ToolExecution {
                                name: Some(call.name.clone()),
                                target: None,
                                status,
                                result: (status == ToolExecutionStatus::Failure)
                                    .then(|| error.clone()),
                                call_id: Some(call.id.clone()),
                            },
                        )
                        .await;
                    }
                    self.record_tool_message(
                        &session_id,
                        &mut current,
                        &mut snapshot_calls,
                        call,
                        format!("Error: {error}"),
                    )
                    .await?;
                    continue;
                };

                send(
                    tx,
                    ChatDelta::ToolExecution {
                        name: Some(call.name.clone()),
                        target: None,
                        status: ToolExecutionStatus::Attempting,
                        result: None,
                        call_id: Some(call.id.clone()),
                    },
                )
                .await;

                match self.router.dispatch(reference, &call.args, &session_id).await {
                    Ok(Dispatch::Completed {
                        workspace_id,
                        result,
                    }) => {
                        let (status, tool_content, reported) = if result.success {
                            (
                                ToolExecutionStatus::Success,
                                result.output.clone(),
                                result.output,
                            )
                        } else {
                            let error =
                                result.error.unwrap_or_else(|| "tool failed".to_string());
                            (
                                ToolExecutionStatus::Failure,
                                format!("Error: {error}"),
                                error,
                            )
                        };
                        send(
                            tx,
                            ChatDelta::ToolExecution {
                                name: Some(call.name.clone()),
                                target: Some(workspace_id),
                                status,
                                result: Some(reported),
                                call_id: Some(call.id.clone()),
                            },
                        )
                        .await;
                        self.record_tool_message(
                            &session_id,
                            &mut current,
                            &mut snapshot_calls,
                            call,
                            tool_content,
                        )
                        .await?;
                    }
                    Ok(Dispatch::ClientExecutionRequired { workspace_id, .. }) => {
                        // Control signal, not an error: surface the turn as
                        // completed-with-suspension and stop dispatching.
                        snapshot_calls.push(SnapshotToolCall {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            arguments: call.args.to_string(),
                            result: None,
                        });
                        let snapshot = self.write_snapshot(
                            &session_id,
                            last_context_map,
                            snapshot_calls,
                            turn,
                        );
                        let metadata = self.metadata(&snapshot, last_usage, started, &turn_output);
                        self.touch_session(&session_id).await;
                        tracing::debug!(
                            workspace_id = %workspace_id,
                            call_id = %call.id,
                            "turn suspended for client execution"
                        );
                        send(
                            tx,
                            ChatDelta::GenerationCompleted {
                                message: Some(assistant),
                                response_metadata: metadata,
                                requires_client_execution: true,
                            },
                        )
                        .await;
                        return Ok(());
                    }
                    Err(route_err) => {
                        let error = route_err.to_string();
                        send(
                            tx,
                            ChatDelta::ToolExecution {
                                name: Some(call.name.clone()),
                                target: None,
                                status: ToolExecutionStatus::Failure,
                                result: Some(error.clone()),
                                call_id: Some(call.id.clone()),
                            },
                        )
                        .await;
                        self.record_tool_message(
                            &session_id,
                            &mut current,
                            &mut snapshot_calls,
                            call,
                            format!("Error: {error}"),
                        )
                        .await?;
                    }
                }
            }
        }

        // Turn budget exhausted: finish the stream normally; the consumer
        // sees the last persisted state.
        let snapshot = self.write_snapshot(
            &session_id,
            last_context_map,
            snapshot_calls,
            self.config.max_turns,
        );
        let metadata = self.metadata(&snapshot, last_usage, started, &TurnOutput::default());
        self.touch_session(&session_id).await;
        send(
            tx,
            ChatDelta::GenerationCompleted {
                message: None,
                response_metadata: metadata,
                requires_client_execution: false,
            },
        )
        .await;
        Ok(())
    }

    /// Consume one model stream: split reasoning from content through the
    /// stream parser, emit thought/delta events, and accumulate tool-call
    /// fragments per index.
    async fn stream_one_turn(
        &self,
        req: CompletionRequest,
        tx: &mpsc::Sender<ChatDelta>,
        cancel: &mut oneshot::Receiver<()>,
        last_usage: &mut Option<(u32, u32)>,
    ) -> Result<TurnOutput, EngineError> {
        let mut stream = self
            .llm
            .complete(req)
            .await
            .map_err(|e| EngineError::Stream(e.to_string()))?;

        let mut parser = StreamParser::new();
        let mut out = TurnOutput::default();
        let mut in_thought = false;

        loop {
            let event = tokio::select! {
                biased;
                _ = &mut *cancel => return Err(EngineError::Cancelled),
                ev = stream.next() => ev,
            };
            let Some(event) = event else { break };
            let event = event.map_err(|e| EngineError::Stream(e.to_string()))?;
            match event {
                ResponseEvent::ThinkingDelta(delta) => {
                    in_thought = true;
                    out.thinking.push_str(&delta);
                    send(tx, ChatDelta::Thought { thought: delta }).await;
                }
                ResponseEvent::TextDelta(delta) if !delta.is_empty() => {
                    let frag = parser.feed(&delta);
                    if frag.reclassified {
                        // Content emitted so far belonged to a late-tagged
                        // reasoning block; restart the content accumulator.
                        out.content.clear();
                    }
                    if let Some(thinking) = frag.thinking {
                        in_thought = true;
                        out.thinking.push_str(&thinking);
                        send(tx, ChatDelta::Thought { thought: thinking }).await;
                    }
                    if let Some(content) = frag.content {
                        if in_thought {
                            send(tx, ChatDelta::ThoughtCompleted).await;
                            in_thought = false;
                        }
                        out.content.push_str(&content);
                        send(tx, ChatDelta::Delta { content }).await;
                    }
                }
                ResponseEvent::ToolCall {
                    index,
                    id,
                    name,
                    arguments,
                } => {
                    if in_thought {
                        send(tx, ChatDelta::ThoughtCompleted).await;
                        in_thought = false;
                    }
                    let pending = out.pending.entry(index).or_default();
                    if !id.is_empty() {
                        pending.id = id.clone();
                    }
                    if !name.is_empty() {
                        pending.name = name.clone();
                    }
                    pending.args.push_str(&arguments);
                    send(
                        tx,
                        ChatDelta::ToolCall {
                            tool_calls: vec![ToolCallFragment {
                                index,
                                id: (!id.is_empty()).then_some(id),
                                name: (!name.is_empty()).then_some(name),
                                arguments: (!arguments.is_empty()).then_some(arguments),
                            }],
                        },
                    )
                    .await;
                }
                ResponseEvent::Usage {
                    prompt_tokens,
                    completion_tokens,
                } => {
                    *last_usage = Some((prompt_tokens, completion_tokens));
                }
                ResponseEvent::Done => break,
                ResponseEvent::Error(e) => {
                    warn!("model stream warning: {e}");
                }
                _ => {}
            }
        }

        // Flush unbalanced parser state: a dangling tag prefix re-emerges
        // as content; a trailing reasoning run closes here.
        let frag = parser.finish();
        if let Some(content) = frag.content {
            if in_thought {
                send(tx, ChatDelta::ThoughtCompleted).await;
                in_thought = false;
            }
            out.content.push_str(&content);
            send(tx, ChatDelta::Delta { content }).await;
        }
        if in_thought {
            send(tx, ChatDelta::ThoughtCompleted).await;
        }

        Ok(out)
    }

    /// Turn accumulated fragments into dispatchable calls, falling back to
    /// inline XML extraction when the native channel stayed empty.
    async fn finalize_tool_calls(
        &self,
        pending: HashMap<u32, PendingNativeCall>,
        content: &str,
        tx: &mpsc::Sender<ChatDelta>,
    ) -> Result<Vec<ToolCall>, EngineError> {
        let mut calls: Vec<ToolCall> = Vec::new();

        let mut sorted: Vec<(u32, PendingNativeCall)> = pending.into_iter().collect();
        sorted.sort_by_key(|(index, _)| *index);
        for (_, p) in sorted {
            if p.name.is_empty() {
                warn!(call_id = %p.id, "dropping tool call with empty name; cannot dispatch");
                continue;
            }
            let id = if p.id.is_empty() {
                synthesize_call_id()
            } else {
                p.id
            };
            let args = if p.args.trim().is_empty() {
                serde_json::Value::Object(Default::default())
            } else {
                serde_json::from_str(&p.args).map_err(|e| {
                    EngineError::InvalidArgument(format!(
                        "malformed tool-call arguments for '{}': {e}",
                        p.name
                    ))
                })?
            };
            calls.push(ToolCall {
                id,
                name: p.name,
                args,
            });
        }

        // Native calls win; fallback parsing only when none arrived.
        if calls.is_empty() && !content.is_empty() {
            for (index, fallback) in extract_tool_call_blocks(content).into_iter().enumerate() {
                let id = synthesize_call_id();
                send(
                    tx,
                    ChatDelta::ToolCall {
                        tool_calls: vec![ToolCallFragment {
                            index: index as u32,
                            id: Some(id.clone()),
                            name: Some(fallback.name.clone()),
                            arguments: Some(fallback.arguments.to_string()),
                        }],
                    },
                )
                .await;
                calls.push(ToolCall {
                    id,
                    name: fallback.name,
                    args: fallback.arguments,
                });
            }
        }

        Ok(calls)
    }

    /// Persist a tool message, mirror it in the in-memory list, and record
    /// it in the snapshot.
    async fn record_tool_message(
        &self,
        session_id: &str,
        current: &mut Vec<Message>,
        snapshot_calls: &mut Vec<SnapshotToolCall>,
        call: &ToolCall,
        content: String,
    ) -> Result<(), EngineError> {
        self.append(StoredMessage::tool(session_id, &call.id, &content))
            .await?;
        current.push(Message::tool_result(&call.id, &content));
        snapshot_calls.push(SnapshotToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.args.to_string(),
            result: Some(content),
        });
        Ok(())
    }

    fn write_snapshot(
        &self,
        session_id: &str,
        context: std::collections::BTreeMap<String, String>,
        tool_calls: Vec<SnapshotToolCall>,
        turn_count: u32,
    ) -> DebugSnapshot {
        let snapshot = DebugSnapshot {
            context,
            tool_calls,
            model: self.llm.model_name().to_string(),
            turn_count,
        };
        self.sessions.set_snapshot(session_id, snapshot.clone());
        snapshot
    }

    fn metadata(
        &self,
        snapshot: &DebugSnapshot,
        usage: Option<(u32, u32)>,
        started: Instant,
        output: &TurnOutput,
    ) -> ResponseMetadata {
        let (prompt_tokens, completion_tokens) = match usage {
            Some((p, c)) => (Some(p), Some(c)),
            None => {
                // Estimator fallback over content + reasoning.
                let estimated = crate::estimator::estimate_batch([
                    output.content.as_str(),
                    output.thinking.as_str(),
                ]) as u32;
                (None, Some(estimated))
            }
        };
        let total_tokens = match (prompt_tokens, completion_tokens) {
            (Some(p), Some(c)) => Some(p + c),
            _ => None,
        };
        let duration = started.elapsed().as_secs_f64();
        let tokens_per_second = completion_tokens
            .filter(|_| duration > 0.0)
            .map(|c| c as f64 / duration);
        ResponseMetadata {
            model: self.llm.model_name().to_string(),
            prompt_tokens,
            completion_tokens,
            total_tokens,
            duration,
            tokens_per_second,
            debug_snapshot_data: serde_json::to_string(snapshot).ok(),
        }
    }

    async fn append(&self, message: StoredMessage) -> Result<(), EngineError> {
        self.store
            .append_message(&message)
            .await
            .map_err(|e| EngineError::Stream(e.to_string()))
    }

    /// Bump the session's updated_at after a completed turn.
    async fn touch_session(&self, session_id: &str) {
        if let Err(e) = self.sessions.update(session_id, |_| {}).await {
            warn!(error = %e, "failed to touch session after turn");
        }
    }
}

/// Accumulated output of one model stream.
#[derive(Default)]
struct TurnOutput {
    content: String,
    thinking: String,
    pending: HashMap<u32, PendingNativeCall>,
}

#[derive(Default)]
struct PendingNativeCall {
    id: String,
    name: String,
    args: String,
}

fn synthesize_call_id() -> String {
    format!("call_{}", Uuid::new_v4())
}

fn check_cancel(cancel: &mut oneshot::Receiver<()>) -> Result<(), EngineError> {
    // An explicit send AND a dropped sender both read as cancellation;
    // `chat_stream` keeps its own sender alive for exactly this reason.
    match cancel.try_recv() {
        Err(oneshot::error::TryRecvError::Empty) => Ok(()),
        _ => Err(EngineError::Cancelled),
    }
}

async fn send(tx: &mpsc::Sender<ChatDelta>, event: ChatDelta) {
    // A consumer that dropped its receiver simply stops observing events;
    // the turn still runs to completion so persistence stays consistent.
    let _ = tx.send(event).await;
}

/// Rebuild the model-facing message list from persisted history.
/// Assistant messages carrying encoded tool calls expand into the content
/// message followed by one tool-call message per requested call.
pub fn messages_from_stored(stored: &[StoredMessage]) -> Vec<Message> {
    use monad_store::MessageRole;

    let mut out = Vec::with_capacity(stored.len());
    for m in stored {
        match m.role {
            MessageRole::User => out.push(Message::user(&m.content)),
            MessageRole::System | MessageRole::Summary => out.push(Message::system(&m.content)),
            MessageRole::Tool => out.push(Message::tool_result(
                m.tool_call_id.clone().unwrap_or_default(),
                &m.content,
            )),
            MessageRole::Assistant => {
                if !m.content.is_empty() {
                    out.push(Message::assistant(&m.content));
                }
                if let Some(encoded) = &m.tool_calls {
                    match serde_json::from_str::<Vec<EncodedToolCall>>(encoded) {
                        Ok(calls) => {
                            for c in calls {
                                out.push(Message::tool_call(c.id, c.name, c.arguments));
                            }
                        }
                        Err(e) => warn!(error = %e, "undecodable tool calls on stored message"),
                    }
                }
            }
        }
    }
    out
}
