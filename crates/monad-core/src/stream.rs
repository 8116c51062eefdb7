// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Incremental splitting of model output into reasoning and content.
//!
//! Some serving stacks emit chain-of-thought as plain `<think>…</think>`
//! markup inside the text stream instead of a dedicated reasoning channel.
//! [`StreamParser`] is a character-level state machine that consumes
//! arbitrary deltas and routes text to the `thinking` or `content` channel.
//! Delimiters are case-insensitive, tolerate whitespace inside the angle
//! brackets, and may be split across deltas; lookahead is bounded by the
//! longest possible tag, so nothing buffers without limit.  Malformed
//! markup is always literal content.
//!
//! The module also hosts the fallback tool-call extractor for models that
//! write `<tool_call>{json}</tool_call>` blocks into the text instead of
//! using the native tool-call protocol.

use serde_json::Value;

/// Longest tag we are willing to buffer, including interior whitespace.
/// Anything longer cannot be a delimiter and is flushed as plain text.
const MAX_TAG_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Content,
    Thinking,
}

#[derive(Debug, PartialEq, Eq)]
enum TagMatch {
    No,
    Prefix,
    Complete,
}

/// The split produced by one `feed` (or the final `finish`).
///
/// Each channel preserves document order internally.  When `reclassified`
/// is set, content emitted earlier in the stream turned out to belong to a
/// reasoning block: it is re-delivered in `thinking`, and the caller must
/// discard its accumulated content.
#[derive(Debug, Default, Clone)]
pub struct StreamFragment {
    pub thinking: Option<String>,
    pub content: Option<String>,
    pub reclassified: bool,
}

pub struct StreamParser {
    state: State,
    /// Characters held back as a potential (partial) delimiter tag.
    pend: String,
    /// Content emitted so far, kept only to support reclassification.
    content_emitted: String,
    /// True once at least one reasoning block has closed; reclassification
    /// is only plausible before that.
    block_closed: bool,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    pub fn new() -> Self {
        Self {
            state: State::Content,
            pend: String::new(),
            content_emitted: String::new(),
            block_closed: false,
        }
    }

    /// Consume one delta and return the text routed to each channel.
    pub fn feed(&mut self, delta: &str) -> StreamFragment {
        let mut content = String::new();
        let mut thinking = String::new();
        let mut reclassified = false;

        for c in delta.chars() {
            match self.state {
                State::Content => {
                    if self.pend.is_empty() {
                        if c == '<' {
                            self.pend.push(c);
                        } else {
                            content.push(c);
                        }
                        continue;
                    }
                    self.pend.push(c);
                    match match_tag(&self.pend, false) {
                        TagMatch::Complete => {
                            self.pend.clear();
                            self.state = State::Thinking;
                            // Late tag arrival: content already emitted before
                            // the first opening tag belongs to this reasoning
                            // block.  Fold it into the thinking channel and
                            // tell the caller to drop its content buffer.
                            let emitted_before =
                                !self.content_emitted.trim().is_empty() || !content.trim().is_empty();
                            if !self.block_closed && emitted_before {
                                let mut folded = std::mem::take(&mut self.content_emitted);
                                folded.push_str(&content);
                                content.clear();
                                thinking.push_str(&folded);
                                reclassified = true;
                            }
                        }
                        TagMatch::Prefix if self.pend.chars().count() <= MAX_TAG_LEN => {}
                        _ => {
                            let flushed = std::mem::take(&mut self.pend);
                            // The char that broke the match may itself open a
                            // new candidate tag.
                            if let Some(stripped) = flushed.strip_suffix('<') {
                                content.push_str(stripped);
                                self.pend.push('<');
                            } else {
                                content.push_str(&flushed);
                            }
                        }
                    }
                }
                State::Thinking => {
                    if self.pend.is_empty() {
                        if c == '<' {
                            self.pend.push(c);
                        } else {
                            thinking.push(c);
                        }
                        continue;
                    }
                    self.pend.push(c);
                    match match_tag(&self.pend, true) {
                        TagMatch::Complete => {
                            self.pend.clear();
                            self.state = State::Content;
                            self.block_closed = true;
                        }
                        TagMatch::Prefix if self.pend.chars().count() <= MAX_TAG_LEN => {}
                        _ => {
                            let flushed = std::mem::take(&mut self.pend);
                            if let Some(stripped) = flushed.strip_suffix('<') {
                                thinking.push_str(stripped);
                                self.pend.push('<');
                            } else {
                                thinking.push_str(&flushed);
                            }
                        }
                    }
                }
            }
        }

        self.content_emitted.push_str(&content);
        StreamFragment {
            thinking: (!thinking.is_empty()).then_some(thinking),
            content: (!content.is_empty()).then_some(content),
            reclassified,
        }
    }

    /// Flush unbalanced state at stream end: a buffered in-progress tag
    /// prefix is re-emitted as content; an unclosed reasoning block has
    /// already been streamed on the thinking channel.
    pub fn finish(&mut self) -> StreamFragment {
        let pend = std::mem::take(&mut self.pend);
        StreamFragment {
            thinking: None,
            content: (!pend.is_empty()).then_some(pend),
            reclassified: false,
        }
    }
}

/// Match `s` against `<think>` (or `</think>` when `closing`), allowing
/// whitespace inside the brackets and any letter case.
fn match_tag(s: &str, closing: bool) -> TagMatch {
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;

    if i == chars.len() {
        return TagMatch::Prefix;
    }
    if chars[i] != '<' {
        return TagMatch::No;
    }
    i += 1;

    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    if closing {
        if i == chars.len() {
            return TagMatch::Prefix;
        }
        if chars[i] != '/' {
            return TagMatch::No;
        }
        i += 1;
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
    }
    for expected in ['t', 'h', 'i', 'n', 'k'] {
        if i == chars.len() {
            return TagMatch::Prefix;
        }
        if chars[i].to_ascii_lowercase() != expected {
            return TagMatch::No;
        }
        i += 1;
    }
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    if i == chars.len() {
        return TagMatch::Prefix;
    }
    if chars[i] == '>' && i + 1 == chars.len() {
        return TagMatch::Complete;
    }
    TagMatch::No
}

// ─── Fallback tool-call extraction ────────────────────────────────────────────

/// A tool call the model expressed as inline XML instead of the native
/// tool-call channel.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackToolCall {
    pub name: String,
    /// Decoded argument object
    pub arguments: Value,
}

const TOOL_CALL_OPEN: &str = "<tool_call>";
const TOOL_CALL_CLOSE: &str = "</tool_call>";

/// Scan `content` for `<tool_call>{json}</tool_call>` blocks and decode each
/// payload as `{ "name": str, "arguments": object }`.  Blocks are returned
/// in document order; payloads that do not decode are skipped.  Surrounding
/// Markdown code fences (with or without the `xml` tag) are irrelevant to
/// the scan and stripped from payloads.
pub fn extract_tool_call_blocks(content: &str) -> Vec<FallbackToolCall> {
    let mut out = Vec::new();
    let mut rest = content;
    while let Some(start) = rest.find(TOOL_CALL_OPEN) {
        let after = &rest[start + TOOL_CALL_OPEN.len()..];
        let Some(end) = after.find(TOOL_CALL_CLOSE) else {
            break;
        };
        let payload = strip_code_fences(after[..end].trim());
        if let Ok(v) = serde_json::from_str::<Value>(payload) {
            let name = v.get("name").and_then(|n| n.as_str());
            let args = v.get("arguments").filter(|a| a.is_object());
            if let (Some(name), Some(args)) = (name, args) {
                out.push(FallbackToolCall {
                    name: name.to_string(),
                    arguments: args.clone(),
                });
            }
        }
        rest = &after[end + TOOL_CALL_CLOSE.len()..];
    }
    out
}

/// Strip a wrapping ``` fence (optionally tagged, e.g. ```xml) from `s`.
fn strip_code_fences(s: &str) -> &str {
    let t = s.trim();
    let Some(no_open) = t.strip_prefix("```") else {
        return t;
    };
    // Drop the fence info string (e.g. "xml" or "json") up to the newline.
    let body = match no_open.find('\n') {
        Some(nl) => &no_open[nl + 1..],
        None => no_open,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
