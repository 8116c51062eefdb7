// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Fatal conditions of one chat turn.
///
/// Each variant maps to exactly one terminal event on the consumer stream.
/// Client-required tool execution is deliberately NOT here: it is a control
/// signal (`Dispatch::ClientExecutionRequired`), and the turn finishes with
/// a completed event instead of an error.  Per-call tool failures are also
/// absorbed into the conversation as `Error: `-prefixed tool messages and
/// never abort the turn.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("LLM service not configured: {0}")]
    Configuration(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("model stream error: {0}")]
    Stream(String),
    #[error("generation cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_kind_and_id() {
        let e = EngineError::not_found("session", "abc");
        assert_eq!(e.to_string(), "session not found: abc");
    }

    #[test]
    fn cancelled_message_is_stable() {
        assert_eq!(EngineError::Cancelled.to_string(), "generation cancelled");
    }
}
