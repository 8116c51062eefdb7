// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The typed event stream published to consumers (interactive CLI,
//! autonomous executor, HTTP/SSE server).
//!
//! Ordering guarantees within one invocation:
//! - `generationContext` is emitted once, first.
//! - `thoughtCompleted` separates any contiguous reasoning run from the
//!   first following `delta` or `toolCall`.
//! - `toolExecution` with status `attempting` always precedes the matching
//!   `success`/`failure`.
//! - Exactly one terminal event (`generationCompleted`,
//!   `generationCancelled`, or `error`) per stream, always followed by the
//!   closing `streamCompleted` marker.

use serde::{Deserialize, Serialize};

use monad_store::StoredMessage;

/// One record on the consumer-facing event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChatDelta {
    GenerationContext {
        metadata: ContextMetadata,
    },
    Thought {
        thought: String,
    },
    ThoughtCompleted,
    Delta {
        content: String,
    },
    ToolCall {
        #[serde(rename = "toolCalls")]
        tool_calls: Vec<ToolCallFragment>,
    },
    ToolCallError {
        error: String,
    },
    ToolExecution {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        status: ToolExecutionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(rename = "callId", skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
    },
    GenerationCompleted {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<StoredMessage>,
        #[serde(rename = "responseMetadata")]
        response_metadata: ResponseMetadata,
        #[serde(rename = "requiresClientExecution", default)]
        requires_client_execution: bool,
    },
    GenerationCancelled,
    Error {
        error: String,
    },
    StreamCompleted,
}

impl ChatDelta {
    /// True for the three terminal outcomes (the `streamCompleted` marker
    /// that follows them is not itself an outcome).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::GenerationCompleted { .. } | Self::GenerationCancelled | Self::Error { .. }
        )
    }
}

/// Context recalled for this generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextMetadata {
    /// Ids of recalled memories
    pub memories: Vec<String>,
    /// Names of notes/documents pulled into the prompt
    pub files: Vec<String>,
}

/// A verbatim fragment of a streamed tool call.  Fragments sharing an
/// `index` belong to the same logical call; `arguments` accumulates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFragment {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolExecutionStatus {
    Attempting,
    Success,
    Failure,
}

/// Completion metadata attached to `generationCompleted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
    /// Wall-clock duration of the invocation, in seconds
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_per_second: Option<f64>,
    /// JSON-encoded debug snapshot of the turn
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_snapshot_data: Option<String>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_tag_with_camel_case_type() {
        let json = serde_json::to_string(&ChatDelta::ThoughtCompleted).unwrap();
        assert_eq!(json, r#"{"type":"thoughtCompleted"}"#);
    }

    #[test]
    fn delta_payload_shape() {
        let json = serde_json::to_string(&ChatDelta::Delta {
            content: "hi".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"delta","content":"hi"}"#);
    }

    #[test]
    fn tool_call_fragments_serialize_under_tool_calls_key() {
        let ev = ChatDelta::ToolCall {
            tool_calls: vec![ToolCallFragment {
                index: 0,
                id: Some("x".into()),
                name: None,
                arguments: Some("{".into()),
            }],
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(r#""toolCalls""#));
        assert!(!json.contains(r#""name""#), "unset fragment fields omitted");
    }

    #[test]
    fn tool_execution_status_is_lowercase() {
        let json = serde_json::to_string(&ToolExecutionStatus::Attempting).unwrap();
        assert_eq!(json, r#""attempting""#);
    }

    #[test]
    fn generation_completed_is_terminal() {
        let ev = ChatDelta::GenerationCompleted {
            message: None,
            response_metadata: ResponseMetadata {
                model: "m".into(),
                prompt_tokens: None,
                completion_tokens: Some(2),
                total_tokens: None,
                duration: 0.5,
                tokens_per_second: Some(4.0),
                debug_snapshot_data: None,
            },
            requires_client_execution: false,
        };
        assert!(ev.is_terminal());
        assert!(!ChatDelta::StreamCompleted.is_terminal());
        assert!(ChatDelta::GenerationCancelled.is_terminal());
    }

    #[test]
    fn response_metadata_uses_camel_case_keys() {
        let md = ResponseMetadata {
            model: "m".into(),
            prompt_tokens: Some(1),
            completion_tokens: Some(2),
            total_tokens: Some(3),
            duration: 1.0,
            tokens_per_second: None,
            debug_snapshot_data: None,
        };
        let json = serde_json::to_string(&md).unwrap();
        assert!(json.contains(r#""promptTokens":1"#));
        assert!(json.contains(r#""completionTokens":2"#));
        assert!(json.contains(r#""totalTokens":3"#));
    }

    #[test]
    fn event_round_trips_through_json() {
        let ev = ChatDelta::Error {
            error: "boom".into(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        let back: ChatDelta = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, ChatDelta::Error { error } if error == "boom"));
    }
}
