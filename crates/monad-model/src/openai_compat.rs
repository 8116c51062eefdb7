// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Driver for any endpoint speaking the OpenAI chat-completions wire format:
//! hosted gateways, llama.cpp's server, Ollama, LM Studio, vLLM.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    client::ResponseStream, CompletionRequest, FunctionCall, LlmClient, Message, MessageContent,
    ResponseEvent, Role,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiCompatClient {
    client: reqwest::Client,
    model: String,
    api_key: Option<String>,
    chat_url: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl OpenAiCompatClient {
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
        timeout_secs: u64,
    ) -> Self {
        let base = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.into());
        let chat_url = format!("{}/chat/completions", base.trim_end_matches('/'));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            model,
            api_key,
            chat_url,
            max_tokens,
            temperature,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        "openai-compat"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let messages = build_wire_messages(&req.messages);

        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": req.stream,
            "stream_options": { "include_usage": true },
        });
        if let Some(mt) = self.max_tokens {
            body["max_tokens"] = json!(mt);
        }
        if let Some(t) = self.temperature {
            body["temperature"] = json!(t);
        }
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        debug!(
            model = %self.model,
            tool_count = tools.len(),
            message_count = req.messages.len(),
            "sending completion request"
        );

        let mut http_req = self.client.post(&self.chat_url).json(&body);
        if let Some(key) = &self.api_key {
            http_req = http_req.bearer_auth(key);
        }

        let resp = http_req.send().await.context("completion request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("endpoint error {status}: {text}");
        }

        let byte_stream = resp.bytes_stream();
        // SSE events can be split across multiple TCP packets.  Maintain a
        // line buffer across chunks; emit events only for complete lines.
        let event_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let events: Vec<anyhow::Result<ResponseEvent>> = match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        drain_complete_sse_lines(buf)
                    }
                    Err(e) => vec![Err(anyhow::anyhow!(e))],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

/// Drain all complete `\n`-terminated SSE lines from `buf`.
///
/// Any trailing incomplete line (bytes not yet terminated by `\n`) is left
/// in `buf` so it can be extended by the next TCP chunk.
fn drain_complete_sse_lines(buf: &mut String) -> Vec<anyhow::Result<ResponseEvent>> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(ev) = parse_sse_data_line(&line) {
            events.push(ev);
        }
    }
    events
}

/// Parse a single complete SSE `data:` line into a [`ResponseEvent`].
///
/// Returns `None` for empty lines, comment lines, or unparseable data.
fn parse_sse_data_line(line: &str) -> Option<anyhow::Result<ResponseEvent>> {
    let data = line.strip_prefix("data: ")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(ResponseEvent::Done));
    }
    let v: Value = serde_json::from_str(data).ok()?;
    Some(Ok(parse_sse_chunk(&v)))
}

fn parse_sse_chunk(v: &Value) -> ResponseEvent {
    // Usage-only chunk (emitted when stream_options.include_usage = true)
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        return ResponseEvent::Usage {
            prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        };
    }

    let delta = &v["choices"][0]["delta"];

    // Tool call delta — parallel tool calls arrive with an "index" field that
    // routes fragment accumulation downstream.
    if let Some(tc) = delta.get("tool_calls").and_then(|t| t.get(0)) {
        return ResponseEvent::ToolCall {
            index: tc["index"].as_u64().unwrap_or(0) as u32,
            id: tc["id"].as_str().unwrap_or("").to_string(),
            name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
            arguments: tc["function"]["arguments"]
                .as_str()
                .unwrap_or("")
                .to_string(),
        };
    }

    // Thinking delta — two common field names for chain-of-thought reasoning:
    //   • `reasoning_content` — llama.cpp, Qwen3, DeepSeek-R1
    //   • `reasoning`         — OpenRouter and some other aggregators
    let thinking = delta
        .get("reasoning_content")
        .and_then(|c| c.as_str())
        .or_else(|| delta.get("reasoning").and_then(|c| c.as_str()));
    if let Some(t) = thinking {
        if !t.is_empty() {
            return ResponseEvent::ThinkingDelta(t.to_string());
        }
    }

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        return ResponseEvent::TextDelta(text.to_string());
    }

    ResponseEvent::TextDelta(String::new())
}

/// Convert messages into the OpenAI wire-format JSON array.
///
/// **Parallel tool call coalescing**: the wire format requires all tool calls
/// from one assistant turn inside a *single* assistant message as a
/// `tool_calls` array.  Monad stores each tool call as a separate
/// [`MessageContent::ToolCall`] entry internally, so consecutive `ToolCall`
/// messages are merged into one JSON object before sending.
fn build_wire_messages(messages: &[Message]) -> Vec<Value> {
    fn tool_call_json(tool_call_id: &str, function: &FunctionCall) -> Value {
        json!({
            "id": tool_call_id,
            "type": "function",
            "function": {
                "name": function.name,
                "arguments": function.arguments,
            }
        })
    }

    let mut out: Vec<Value> = Vec::with_capacity(messages.len());
    let mut pending_calls: Vec<Value> = Vec::new();

    for msg in messages {
        match &msg.content {
            MessageContent::ToolCall {
                tool_call_id,
                function,
            } => {
                pending_calls.push(tool_call_json(tool_call_id, function));
            }
            other => {
                if !pending_calls.is_empty() {
                    out.push(json!({
                        "role": "assistant",
                        "content": Value::Null,
                        "tool_calls": std::mem::take(&mut pending_calls),
                    }));
                }
                match other {
                    MessageContent::Text(t) => {
                        out.push(json!({ "role": role_str(&msg.role), "content": t }));
                    }
                    MessageContent::ToolResult {
                        tool_call_id,
                        content,
                    } => {
                        out.push(json!({
                            "role": "tool",
                            "tool_call_id": tool_call_id,
                            "content": content,
                        }));
                    }
                    MessageContent::ToolCall { .. } => unreachable!(),
                }
            }
        }
    }
    if !pending_calls.is_empty() {
        out.push(json!({
            "role": "assistant",
            "content": Value::Null,
            "tool_calls": pending_calls,
        }));
    }
    out
}

fn role_str(r: &Role) -> &'static str {
    match r {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── parse_sse_chunk ───────────────────────────────────────────────────────

    #[test]
    fn parse_sse_text_delta() {
        let v: Value =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":"hello"}}]}"#).unwrap();
        let ev = parse_sse_chunk(&v);
        assert!(matches!(ev, ResponseEvent::TextDelta(t) if t == "hello"));
    }

    #[test]
    fn parse_sse_thinking_delta_reasoning_content() {
        let v: Value =
            serde_json::from_str(r#"{"choices":[{"delta":{"reasoning_content":"hmm"}}]}"#)
                .unwrap();
        let ev = parse_sse_chunk(&v);
        assert!(matches!(ev, ResponseEvent::ThinkingDelta(t) if t == "hmm"));
    }

    #[test]
    fn parse_sse_thinking_delta_reasoning_fallback() {
        let v: Value =
            serde_json::from_str(r#"{"choices":[{"delta":{"reasoning":"hmm"}}]}"#).unwrap();
        let ev = parse_sse_chunk(&v);
        assert!(matches!(ev, ResponseEvent::ThinkingDelta(t) if t == "hmm"));
    }

    #[test]
    fn parse_sse_tool_call_start_with_id_and_name() {
        let v: Value = serde_json::from_str(
            r#"{"choices":[{"delta":{"tool_calls":[
                {"index":0,"id":"call_1","function":{"name":"ls","arguments":""}}
            ]}}]}"#,
        )
        .unwrap();
        let ev = parse_sse_chunk(&v);
        match ev {
            ResponseEvent::ToolCall {
                index, id, name, ..
            } => {
                assert_eq!(index, 0);
                assert_eq!(id, "call_1");
                assert_eq!(name, "ls");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parse_sse_tool_call_args_continuation() {
        let v: Value = serde_json::from_str(
            r#"{"choices":[{"delta":{"tool_calls":[
                {"index":1,"function":{"arguments":"{\"pa"}}
            ]}}]}"#,
        )
        .unwrap();
        let ev = parse_sse_chunk(&v);
        match ev {
            ResponseEvent::ToolCall {
                index,
                id,
                name,
                arguments,
            } => {
                assert_eq!(index, 1);
                assert!(id.is_empty());
                assert!(name.is_empty());
                assert_eq!(arguments, "{\"pa");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parse_sse_usage_event() {
        let v: Value =
            serde_json::from_str(r#"{"usage":{"prompt_tokens":12,"completion_tokens":7}}"#)
                .unwrap();
        let ev = parse_sse_chunk(&v);
        assert!(
            matches!(ev, ResponseEvent::Usage { prompt_tokens: 12, completion_tokens: 7 })
        );
    }

    #[test]
    fn parse_sse_null_usage_falls_through_to_delta() {
        let v: Value = serde_json::from_str(
            r#"{"usage":null,"choices":[{"delta":{"content":"x"}}]}"#,
        )
        .unwrap();
        let ev = parse_sse_chunk(&v);
        assert!(matches!(ev, ResponseEvent::TextDelta(t) if t == "x"));
    }

    // ── SSE line draining ─────────────────────────────────────────────────────

    #[test]
    fn drain_keeps_incomplete_trailing_line() {
        let mut buf = String::from(
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\ndata: {\"cho",
        );
        let events = drain_complete_sse_lines(&mut buf);
        assert_eq!(events.len(), 1);
        assert_eq!(buf, "data: {\"cho");
    }

    #[test]
    fn drain_parses_done_sentinel() {
        let mut buf = String::from("data: [DONE]\n");
        let events = drain_complete_sse_lines(&mut buf);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Ok(ResponseEvent::Done)));
    }

    #[test]
    fn drain_skips_comment_and_empty_lines() {
        let mut buf = String::from(": keepalive\n\n");
        let events = drain_complete_sse_lines(&mut buf);
        assert!(events.is_empty());
    }

    // ── Wire message construction ─────────────────────────────────────────────

    #[test]
    fn wire_messages_simple_text() {
        let msgs = vec![Message::system("sys"), Message::user("hi")];
        let wire = build_wire_messages(&msgs);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[1]["content"], "hi");
    }

    #[test]
    fn wire_messages_coalesce_parallel_tool_calls() {
        let msgs = vec![
            Message::tool_call("c1", "ls", "{}"),
            Message::tool_call("c2", "read_file", "{}"),
            Message::tool_result("c1", "ok"),
            Message::tool_result("c2", "ok"),
        ];
        let wire = build_wire_messages(&msgs);
        assert_eq!(wire.len(), 3, "two calls coalesce into one assistant message");
        assert_eq!(wire[0]["tool_calls"].as_array().unwrap().len(), 2);
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[2]["tool_call_id"], "c2");
    }

    #[test]
    fn wire_messages_flush_trailing_tool_calls() {
        let msgs = vec![Message::user("go"), Message::tool_call("c1", "ls", "{}")];
        let wire = build_wire_messages(&msgs);
        assert_eq!(wire.len(), 2);
        assert!(wire[1].get("tool_calls").is_some());
    }
}
