// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The autonomous reasoning loop: drive one job to an outcome without a
//! user in the loop.
//!
//! Each iteration mirrors one ChatEngine turn — gather context, assemble a
//! prompt under the agent's composed instructions, consume the model
//! response, execute tool calls — but nothing streams to a consumer and
//! completion is detected from the response text itself.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use monad_core::{
    extract_tool_call_blocks, messages_from_stored, ContextGatherer, EncodedToolCall,
    PromptAssembler, PromptInputs, StreamParser,
};
use monad_model::{CompletionRequest, LlmClient, ResponseEvent};
use monad_store::{Job, MessageRole, Store, StoredMessage, ToolReference};
use monad_tools::{Dispatch, ToolCall, ToolRouter};

use crate::agents::AgentDefinition;

/// Outcome of one job execution.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The agent declared the task done
    Complete(String),
    /// The agent needs input only the user can provide
    NeedInformation(String),
    /// The run failed; the scheduler decides about retry
    Error(String),
}

pub struct ReasoningEngine {
    store: Arc<dyn Store>,
    llm: Arc<dyn LlmClient>,
    router: Arc<ToolRouter>,
    gatherer: Arc<ContextGatherer>,
    assembler: PromptAssembler,
    max_turns: u32,
}

impl ReasoningEngine {
    pub fn new(
        store: Arc<dyn Store>,
        llm: Arc<dyn LlmClient>,
        router: Arc<ToolRouter>,
        gatherer: Arc<ContextGatherer>,
        max_turns: u32,
        context_window: usize,
        history_reserve: usize,
    ) -> Self {
        Self {
            store,
            llm,
            router,
            gatherer,
            assembler: PromptAssembler::new(context_window, history_reserve),
            max_turns,
        }
    }

    /// Run `job` under `agent` until it completes, asks for information,
    /// errors, or exhausts the turn budget.
    pub async fn run(
        &self,
        job: &Job,
        agent: &AgentDefinition,
        cancel: &mut oneshot::Receiver<()>,
    ) -> StepOutcome {
        match self.run_inner(job, agent, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => StepOutcome::Error(e.to_string()),
        }
    }

    async fn run_inner(
        &self,
        job: &Job,
        agent: &AgentDefinition,
        cancel: &mut oneshot::Receiver<()>,
    ) -> anyhow::Result<StepOutcome> {
        let session_id = &job.session_id;

        // Tools come from the agent's capability set; custom workspace
        // tools attached to the job's session remain routable too.
        let refs: Vec<ToolReference> = agent
            .tool_ids
            .iter()
            .map(|id| ToolReference::known(id))
            .collect();
        let mut schemas = Vec::new();
        for r in &refs {
            match self.router.schema_for(r) {
                Some(s) => schemas.push(s),
                None => warn!(tool = r.tool_id(), "agent references unknown tool; skipping"),
            }
        }

        for turn in 1..=self.max_turns {
            if cancelled(cancel) {
                return Ok(StepOutcome::Error("Cancelled".into()));
            }

            // 1. Latest history; seed the conversation with the job
            // description on the first run.
            let mut history = self.store.messages_for_session(session_id).await?;
            if !history.iter().any(|m| m.role == MessageRole::User) {
                let seed = StoredMessage::user(session_id, &job.description);
                self.store.append_message(&seed).await?;
                history.push(seed);
            }

            // 2. Context from the last user message, else the description.
            let query = history
                .iter()
                .rev()
                .find(|m| m.role == MessageRole::User)
                .map(|m| m.content.clone())
                .unwrap_or_else(|| job.description.clone());
            let context = self.gatherer.gather(&query, &history, None).await;

            // 3. Prompt under the agent's composed instructions.
            let prompt = self.assembler.build(PromptInputs {
                system_instructions: Some(agent.composed_instructions()),
                notes: context.notes,
                memories: context.memories,
                tools: schemas.clone(),
                history: messages_from_stored(&history),
                user_query: None,
                overrides: Default::default(),
            });
            let rendered = self.assembler.render(&prompt).await;

            // 4. Consume the full response; no consumer stream.
            let req = CompletionRequest {
                messages: rendered.messages,
                tools: schemas
                    .iter()
                    .map(|s| monad_model::ToolSchema {
                        name: s.name.clone(),
                        description: s.description.clone(),
                        parameters: s.parameters.clone(),
                    })
                    .collect(),
                stream: true,
            };
            let (content, thinking, calls) = match self.consume(req, cancel).await? {
                Some(out) => out,
                None => return Ok(StepOutcome::Error("Cancelled".into())),
            };

            debug!(
                job_id = %job.id,
                turn,
                tool_calls = calls.len(),
                "reasoning turn finished"
            );

            // 5. Persist the assistant message.
            let mut assistant = StoredMessage::assistant(session_id, &content);
            assistant.reasoning = (!thinking.is_empty()).then_some(thinking);
            if !calls.is_empty() {
                let encoded: Vec<EncodedToolCall> = calls
                    .iter()
                    .map(|c| EncodedToolCall {
                        id: c.id.clone(),
                        name: c.name.clone(),
                        arguments: c.args.to_string(),
                    })
                    .collect();
                assistant.tool_calls = serde_json::to_string(&encoded).ok();
            }
            self.store.append_message(&assistant).await?;

            // 6. No tool calls: detect completion from the content.
            if calls.is_empty() {
                let lower = content.to_lowercase();
                if lower.contains("job complete") {
                    return Ok(StepOutcome::Complete(content));
                }
                if lower.contains("i need more information") {
                    return Ok(StepOutcome::NeedInformation(content));
                }
                continue;
            }

            // 7. Execute sequentially; a single tool failure never crashes
            // the job — the error lands in the conversation instead.
            for call in &calls {
                if cancelled(cancel) {
                    return Ok(StepOutcome::Error("Cancelled".into()));
                }
                let content = match self.dispatch(call, &refs, session_id).await {
                    Ok(output) => output,
                    Err(e) => format!("Error: {e}"),
                };
                self.store
                    .append_message(&StoredMessage::tool(session_id, &call.id, &content))
                    .await?;
            }
        }

        Ok(StepOutcome::Error("Max turns reached".into()))
    }

    /// Drain one model stream into (content, thinking, tool calls).
    /// Returns `None` when cancelled mid-stream.
    #[allow(clippy::type_complexity)]
    async fn consume(
        &self,
        req: CompletionRequest,
        cancel: &mut oneshot::Receiver<()>,
    ) -> anyhow::Result<Option<(String, String, Vec<ToolCall>)>> {
        let mut stream = self.llm.complete(req).await?;

        let mut parser = StreamParser::new();
        let mut content = String::new();
        let mut thinking = String::new();
        let mut pending: HashMap<u32, (String, String, String)> = HashMap::new();

        loop {
            let event = tokio::select! {
                biased;
                _ = &mut *cancel => return Ok(None),
                ev = stream.next() => ev,
            };
            let Some(event) = event else { break };
            match event? {
                ResponseEvent::TextDelta(delta) if !delta.is_empty() => {
                    let frag = parser.feed(&delta);
                    if frag.reclassified {
                        content.clear();
                    }
                    if let Some(t) = frag.thinking {
                        thinking.push_str(&t);
                    }
                    if let Some(c) = frag.content {
                        content.push_str(&c);
                    }
                }
                ResponseEvent::ThinkingDelta(delta) => thinking.push_str(&delta),
                ResponseEvent::ToolCall {
                    index,
                    id,
                    name,
                    arguments,
                } => {
                    let slot = pending.entry(index).or_default();
                    if !id.is_empty() {
                        slot.0 = id;
                    }
                    if !name.is_empty() {
                        slot.1 = name;
                    }
                    slot.2.push_str(&arguments);
                }
                ResponseEvent::Done => break,
                ResponseEvent::Error(e) => warn!("model stream warning: {e}"),
                _ => {}
            }
        }
        if let Some(c) = parser.finish().content {
            content.push_str(&c);
        }

        let mut sorted: Vec<(u32, (String, String, String))> = pending.into_iter().collect();
        sorted.sort_by_key(|(index, _)| *index);
        let mut calls = Vec::new();
        for (_, (id, name, args)) in sorted {
            if name.is_empty() {
                continue;
            }
            let args = if args.trim().is_empty() {
                serde_json::Value::Object(Default::default())
            } else {
                match serde_json::from_str(&args) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(tool = %name, error = %e, "invalid tool arguments; substituting {{}}");
                        serde_json::Value::Object(Default::default())
                    }
                }
            };
            let id = if id.is_empty() {
                format!("call_{}", uuid::Uuid::new_v4())
            } else {
                id
            };
            calls.push(ToolCall { id, name, args });
        }

        // Native calls win; XML fallback only when none arrived.
        if calls.is_empty() {
            for fallback in extract_tool_call_blocks(&content) {
                calls.push(ToolCall {
                    id: format!("call_{}", uuid::Uuid::new_v4()),
                    name: fallback.name,
                    args: fallback.arguments,
                });
            }
        }

        Ok(Some((content, thinking, calls)))
    }

    async fn dispatch(
        &self,
        call: &ToolCall,
        refs: &[ToolReference],
        session_id: &str,
    ) -> anyhow::Result<String> {
        let Some(reference) = refs.iter().find(|r| r.tool_id() == call.name) else {
            anyhow::bail!("unknown tool '{}'", call.name);
        };
        match self.router.dispatch(reference, &call.args, session_id).await? {
            Dispatch::Completed { result, .. } => {
                if result.success {
                    Ok(result.output)
                } else {
                    Ok(format!(
                        "Error: {}",
                        result.error.unwrap_or_else(|| "tool failed".into())
                    ))
                }
            }
            // Autonomous jobs have no client to hand execution to; absorb
            // the suspension as an ordinary tool failure.
            Dispatch::ClientExecutionRequired { .. } => {
                Ok("Error: tool requires client execution".into())
            }
        }
    }
}

fn cancelled(cancel: &mut oneshot::Receiver<()>) -> bool {
    !matches!(
        cancel.try_recv(),
        Err(oneshot::error::TryRecvError::Empty)
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
