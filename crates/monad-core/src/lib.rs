// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod engine;
mod error;
mod estimator;
mod events;
mod gather;
mod prompt;
mod session;
mod stream;

pub use engine::{
    messages_from_stored, ChatEngine, ChatRequest, EncodedToolCall, ToolOutputSubmission,
};
pub use error::EngineError;
pub use estimator::{estimate_batch, estimate_tokens, word_count};
pub use events::{
    ChatDelta, ContextMetadata, ResponseMetadata, ToolCallFragment, ToolExecutionStatus,
};
pub use gather::{ContextData, ContextGatherer, GatherEvent};
pub use prompt::{
    default_system_prompt, optimize_history, CompressionStrategy, ContextOverrides,
    ContextSection, Document, Prompt, PromptAssembler, PromptInputs, RenderedPrompt, SectionKind,
};
pub use session::{DebugSnapshot, SessionManager, SnapshotToolCall};
pub use stream::{extract_tool_call_blocks, FallbackToolCall, StreamFragment, StreamParser};
