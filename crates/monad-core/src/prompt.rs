// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Budget-aware prompt assembly from typed context sections.
//!
//! Sections are rendered in stable descending-priority order into (a) the
//! chat-completion message list, (b) a raw prompt text for logging, and
//! (c) a section-id → rendered-text map for the debug snapshot.  Rendering
//! is fully deterministic: identical inputs produce a byte-identical
//! message list.

use std::collections::BTreeMap;

use monad_model::{Message, MessageContent, Role};
use monad_store::{Memory, Note};
use monad_tools::ToolSchema;

use crate::estimator::{estimate_tokens, word_count};

/// Separator between sections in the raw prompt text.
const SECTION_SEPARATOR: &str = "\n\n---\n\n";
/// Reservation for non-history sections is never below this.
const MIN_HISTORY_RESERVE: usize = 4_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionStrategy {
    /// Never compressed (tail-truncated only under an explicit budget)
    Keep,
    /// Drop the tail when over budget
    TruncateTail,
    /// Drop the head when over budget (chat history)
    TruncateHead,
    /// Extractive summary: leading fragment of every item
    Summarize,
    /// Omit entirely when over budget
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Text,
    List,
}

#[derive(Debug, Clone)]
enum SectionBody {
    Text(String),
    List(Vec<String>),
    /// Chat history renders into real messages, not a text block.
    History(Vec<Message>),
}

/// One typed, budget-aware prompt section.
#[derive(Debug, Clone)]
pub struct ContextSection {
    pub id: &'static str,
    /// Higher priority renders earlier
    pub priority: i32,
    pub strategy: CompressionStrategy,
    pub kind: SectionKind,
    /// Token budget; a constrained section never renders past it
    pub budget: Option<usize>,
    body: SectionBody,
}

impl ContextSection {
    pub fn text(
        id: &'static str,
        priority: i32,
        strategy: CompressionStrategy,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id,
            priority,
            strategy,
            kind: SectionKind::Text,
            budget: None,
            body: SectionBody::Text(text.into()),
        }
    }

    pub fn list(
        id: &'static str,
        priority: i32,
        strategy: CompressionStrategy,
        items: Vec<String>,
    ) -> Self {
        Self {
            id,
            priority,
            strategy,
            kind: SectionKind::List,
            budget: None,
            body: SectionBody::List(items),
        }
    }

    pub fn history(messages: Vec<Message>) -> Self {
        Self {
            id: "chat_history",
            priority: 70,
            strategy: CompressionStrategy::TruncateHead,
            kind: SectionKind::List,
            budget: None,
            body: SectionBody::History(messages),
        }
    }

    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Estimated token count of the uncompressed section.
    pub fn estimated_tokens(&self) -> usize {
        match &self.body {
            SectionBody::Text(t) => estimate_tokens(t),
            SectionBody::List(items) => items.iter().map(|i| estimate_tokens(i)).sum(),
            SectionBody::History(msgs) => msgs.iter().map(message_tokens).sum(),
        }
    }

    /// Render the section, honouring its budget and compression strategy.
    ///
    /// Async so that a model-backed summarizer can slot in; the built-in
    /// strategies are deterministic so prompt assembly stays reproducible.
    pub async fn render(&self) -> String {
        let full = match &self.body {
            SectionBody::Text(t) => t.clone(),
            SectionBody::List(items) => items.join("\n"),
            SectionBody::History(msgs) => transcript(msgs),
        };
        let Some(budget) = self.budget else {
            return full;
        };
        if estimate_tokens(&full) <= budget {
            return full;
        }
        match self.strategy {
            CompressionStrategy::Keep | CompressionStrategy::TruncateTail => {
                truncate_to_tokens(&full, budget, true)
            }
            CompressionStrategy::TruncateHead => truncate_to_tokens(&full, budget, false),
            CompressionStrategy::Summarize => match &self.body {
                SectionBody::List(items) => summarize_items(items, budget),
                _ => truncate_to_tokens(&full, budget, true),
            },
            CompressionStrategy::Drop => String::new(),
        }
    }
}

/// An ordered collection of sections.
#[derive(Debug, Clone, Default)]
pub struct Prompt {
    pub sections: Vec<ContextSection>,
}

impl Prompt {
    /// Sections in render order: stable sort by descending priority, so
    /// equal-priority sections keep their insertion order.
    pub fn sorted(&self) -> Vec<&ContextSection> {
        let mut refs: Vec<&ContextSection> = self.sections.iter().collect();
        refs.sort_by(|a, b| b.priority.cmp(&a.priority));
        refs
    }
}

/// A document supplied by the consumer for the `documents` section.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub content: String,
}

/// Caller-supplied extra context (the optional context-manager argument of
/// `chat_stream`).  Absent overrides simply omit their sections.
#[derive(Debug, Clone, Default)]
pub struct ContextOverrides {
    pub documents: Vec<Document>,
    pub database_directory: Option<String>,
}

/// Everything the assembler folds into one prompt.
#[derive(Default)]
pub struct PromptInputs {
    pub system_instructions: Option<String>,
    pub notes: Vec<Note>,
    pub memories: Vec<Memory>,
    pub tools: Vec<ToolSchema>,
    pub history: Vec<Message>,
    pub user_query: Option<String>,
    pub overrides: ContextOverrides,
}

/// The rendered form consumed by the LLM client and the debug snapshot.
#[derive(Debug, Clone)]
pub struct RenderedPrompt {
    pub messages: Vec<Message>,
    pub raw_prompt_text: String,
    /// Section id → rendered text
    pub context_map: BTreeMap<String, String>,
}

pub struct PromptAssembler {
    context_window: usize,
    history_reserve: usize,
}

impl PromptAssembler {
    pub fn new(context_window: usize, history_reserve: usize) -> Self {
        Self {
            context_window,
            history_reserve,
        }
    }

    /// Tokens available to the chat-history section after reserving space
    /// for every other section.
    pub fn available_history_tokens(&self) -> usize {
        self.context_window
            .saturating_sub(self.history_reserve.max(MIN_HISTORY_RESERVE))
    }

    pub fn build(&self, inputs: PromptInputs) -> Prompt {
        let mut sections = Vec::new();

        let system_text = inputs
            .system_instructions
            .unwrap_or_else(|| default_system_prompt().to_string());
        sections.push(ContextSection::text(
            "system",
            100,
            CompressionStrategy::Keep,
            system_text,
        ));

        if let Some(dir) = inputs.overrides.database_directory {
            sections.push(ContextSection::text(
                "database_directory",
                98,
                CompressionStrategy::Keep,
                dir,
            ));
        }

        if !inputs.overrides.documents.is_empty() {
            let items = inputs
                .overrides
                .documents
                .iter()
                .map(|d| format!("## {}\n{}", d.name, d.content))
                .collect();
            sections.push(ContextSection::list(
                "documents",
                95,
                CompressionStrategy::TruncateTail,
                items,
            ));
        }

        if !inputs.notes.is_empty() {
            let items = inputs
                .notes
                .iter()
                .map(|n| format!("- {}: {}", n.title, n.content))
                .collect();
            sections.push(ContextSection::list(
                "context_notes",
                90,
                CompressionStrategy::Summarize,
                items,
            ));
        }

        if !inputs.memories.is_empty() {
            let items = inputs
                .memories
                .iter()
                .map(|m| format!("- {}: {}", m.title, m.content))
                .collect();
            sections.push(ContextSection::list(
                "memories",
                85,
                CompressionStrategy::Summarize,
                items,
            ));
        }

        if !inputs.tools.is_empty() {
            let items = inputs
                .tools
                .iter()
                .map(|t| format!("- {}: {}", t.name, t.description))
                .collect();
            sections.push(ContextSection::list(
                "tools",
                80,
                CompressionStrategy::Keep,
                items,
            ));
        }

        if !inputs.history.is_empty() {
            sections.push(ContextSection::history(inputs.history));
        }

        if let Some(query) = inputs.user_query {
            sections.push(ContextSection::text(
                "user_query",
                10,
                CompressionStrategy::Keep,
                query,
            ));
        }

        Prompt { sections }
    }

    /// Render a prompt into the message list, the raw prompt text, and the
    /// per-section context map.
    pub async fn render(&self, prompt: &Prompt) -> RenderedPrompt {
        let mut messages: Vec<Message> = Vec::new();
        let mut raw_parts: Vec<String> = Vec::new();
        let mut context_map: BTreeMap<String, String> = BTreeMap::new();

        for section in prompt.sorted() {
            match &section.body {
                SectionBody::History(history) => {
                    let optimized = optimize_history(history, self.available_history_tokens());
                    let text = transcript(&optimized);
                    messages.extend(optimized);
                    if !text.is_empty() {
                        context_map.insert(section.id.to_string(), text.clone());
                        raw_parts.push(text);
                    }
                }
                _ => {
                    let text = section.render().await;
                    if text.is_empty() {
                        continue;
                    }
                    let message = if section.id == "user_query" {
                        Message::user(text.clone())
                    } else {
                        Message::system(text.clone())
                    };
                    messages.push(message);
                    context_map.insert(section.id.to_string(), text.clone());
                    raw_parts.push(text);
                }
            }
        }

        RenderedPrompt {
            messages,
            raw_prompt_text: raw_parts.join(SECTION_SEPARATOR),
            context_map,
        }
    }
}

/// Keep the newest messages that fit `available_tokens`.  When older
/// messages are dropped, a synthetic system summary is inserted at the head
/// so the model knows the transcript is partial.
pub fn optimize_history(messages: &[Message], available_tokens: usize) -> Vec<Message> {
    let mut used = 0usize;
    let mut keep_from = messages.len();
    for (i, msg) in messages.iter().enumerate().rev() {
        let cost = message_tokens(msg);
        if used + cost > available_tokens {
            break;
        }
        used += cost;
        keep_from = i;
    }

    let dropped = keep_from;
    let mut out: Vec<Message> = Vec::with_capacity(messages.len() - keep_from + 1);
    if dropped > 0 {
        out.push(Message::system(format!(
            "[System: History truncated. {dropped} earlier messages hidden.]"
        )));
    }
    out.extend_from_slice(&messages[keep_from..]);
    out
}

fn message_tokens(m: &Message) -> usize {
    match &m.content {
        MessageContent::Text(t) => estimate_tokens(t),
        MessageContent::ToolCall { function, .. } => {
            estimate_tokens(&function.name) + estimate_tokens(&function.arguments)
        }
        MessageContent::ToolResult { content, .. } => estimate_tokens(content),
    }
}

/// Plain-text rendering of a message list for logs and the context map.
fn transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let text = match &m.content {
                MessageContent::Text(t) => t.clone(),
                MessageContent::ToolCall { function, .. } => {
                    format!("[tool call] {}({})", function.name, function.arguments)
                }
                MessageContent::ToolResult { content, .. } => format!("[tool result] {content}"),
            };
            format!("{role}: {text}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Word-preserving truncation to a token budget.  `keep_head` keeps the
/// leading words; otherwise the trailing words.
///
/// Accumulates WORD counts (not per-word token floors) so the estimate of
/// the joined result is guaranteed to stay within the budget.
fn truncate_to_tokens(text: &str, budget: usize, keep_head: bool) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut kept: Vec<&str> = Vec::new();
    let mut total_words = 0usize;

    let iter: Box<dyn Iterator<Item = &&str>> = if keep_head {
        Box::new(words.iter())
    } else {
        Box::new(words.iter().rev())
    };
    for w in iter {
        let wc = word_count(w).max(1);
        if ((total_words + wc) as f64 * crate::estimator::TOKENS_PER_WORD) as usize > budget {
            break;
        }
        total_words += wc;
        kept.push(w);
    }
    if !keep_head {
        kept.reverse();
    }
    kept.join(" ")
}

/// Extractive summary of list items: the first sentence (or line) of each
/// item, as many items as fit the budget.
fn summarize_items(items: &[String], budget: usize) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut total_words = 0usize;
    for item in items {
        let lead = first_fragment(item);
        let wc = word_count(&lead);
        if ((total_words + wc) as f64 * crate::estimator::TOKENS_PER_WORD) as usize > budget {
            break;
        }
        total_words += wc;
        out.push(lead);
    }
    out.join("\n")
}

fn first_fragment(item: &str) -> String {
    let line = item.lines().next().unwrap_or("");
    match line.find(". ") {
        Some(dot) => line[..dot + 1].to_string(),
        None => line.to_string(),
    }
}

/// The stock system instructions used when the consumer supplies none.
pub fn default_system_prompt() -> &'static str {
    "You are Monad, a local-first assistant. You can call tools to read and \
     write files, search the web, recall and store memories, and delegate \
     long-running tasks to background agents. Prefer calling a tool over \
     guessing. Keep answers concise and grounded in tool results."
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler() -> PromptAssembler {
        PromptAssembler::new(128_000, 4_000)
    }

    fn inputs_with_query(q: &str) -> PromptInputs {
        PromptInputs {
            user_query: Some(q.to_string()),
            ..Default::default()
        }
    }

    // ── Section ordering ──────────────────────────────────────────────────────

    #[test]
    fn sections_sorted_by_descending_priority() {
        let asm = assembler();
        let mut inputs = inputs_with_query("q");
        inputs.tools = vec![ToolSchema {
            name: "ls".into(),
            description: "list".into(),
            parameters: serde_json::json!({}),
        }];
        inputs.memories = vec![Memory::new("m", "memory body")];
        let prompt = asm.build(inputs);
        let priorities: Vec<i32> = prompt.sorted().iter().map(|s| s.priority).collect();
        let mut expected = priorities.clone();
        expected.sort_by(|a, b| b.cmp(a));
        assert_eq!(priorities, expected);
    }

    #[test]
    fn equal_priority_sections_keep_insertion_order() {
        let prompt = Prompt {
            sections: vec![
                ContextSection::text("a", 50, CompressionStrategy::Keep, "first"),
                ContextSection::text("b", 50, CompressionStrategy::Keep, "second"),
            ],
        };
        let ids: Vec<&str> = prompt.sorted().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn user_query_renders_last() {
        let asm = assembler();
        let prompt = asm.build(inputs_with_query("the question"));
        let sorted = prompt.sorted();
        assert_eq!(sorted.last().unwrap().id, "user_query");
    }

    // ── Determinism ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn render_is_deterministic() {
        let asm = assembler();
        let make = || {
            let mut inputs = inputs_with_query("q");
            inputs.notes = vec![Note::new("n", "note body")];
            inputs.memories = vec![Memory::new("m", "memory body")];
            inputs.history = vec![Message::user("earlier"), Message::assistant("reply")];
            asm.build(inputs)
        };
        let a = asm.render(&make()).await;
        let b = asm.render(&make()).await;
        assert_eq!(a.raw_prompt_text, b.raw_prompt_text);
        assert_eq!(
            serde_json::to_string(&a.messages).unwrap(),
            serde_json::to_string(&b.messages).unwrap()
        );
    }

    // ── Rendered shape ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn render_produces_system_history_and_user_messages() {
        let asm = assembler();
        let mut inputs = inputs_with_query("now");
        inputs.history = vec![Message::user("before"), Message::assistant("answer")];
        let rendered = asm.render(&asm.build(inputs)).await;

        assert_eq!(rendered.messages[0].role, Role::System);
        let last = rendered.messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert_eq!(last.as_text(), Some("now"));
        // History spliced in between with original roles preserved.
        assert!(rendered
            .messages
            .iter()
            .any(|m| m.role == Role::Assistant && m.as_text() == Some("answer")));
    }

    #[tokio::test]
    async fn raw_text_joins_sections_with_separator() {
        let asm = assembler();
        let rendered = asm.render(&asm.build(inputs_with_query("q"))).await;
        assert!(rendered.raw_prompt_text.contains("\n\n---\n\n"));
    }

    #[tokio::test]
    async fn context_map_records_rendered_sections() {
        let asm = assembler();
        let mut inputs = inputs_with_query("q");
        inputs.notes = vec![Note::new("style", "prefers short answers")];
        let rendered = asm.render(&asm.build(inputs)).await;
        assert!(rendered.context_map.contains_key("system"));
        assert!(rendered.context_map["context_notes"].contains("prefers short answers"));
        assert!(rendered.context_map.contains_key("user_query"));
    }

    #[tokio::test]
    async fn empty_sections_are_omitted() {
        let asm = assembler();
        let rendered = asm.render(&asm.build(inputs_with_query("q"))).await;
        assert!(!rendered.context_map.contains_key("memories"));
        assert!(!rendered.context_map.contains_key("documents"));
    }

    // ── Section budgets ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn constrained_section_never_exceeds_budget() {
        let long = vec!["word"; 400].join(" ");
        let section =
            ContextSection::text("documents", 95, CompressionStrategy::TruncateTail, long)
                .with_budget(50);
        let rendered = section.render().await;
        assert!(estimate_tokens(&rendered) <= 50);
        assert!(rendered.starts_with("word"));
    }

    #[tokio::test]
    async fn truncate_head_keeps_the_tail() {
        let text = (0..200).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let section = ContextSection::text("x", 1, CompressionStrategy::TruncateHead, text)
            .with_budget(20);
        let rendered = section.render().await;
        assert!(rendered.ends_with("w199"));
        assert!(!rendered.contains("w0 "));
    }

    #[tokio::test]
    async fn drop_strategy_renders_empty_when_over_budget() {
        let long = vec!["word"; 100].join(" ");
        let section =
            ContextSection::text("x", 1, CompressionStrategy::Drop, long).with_budget(10);
        assert_eq!(section.render().await, "");
    }

    #[tokio::test]
    async fn summarize_keeps_leading_fragment_of_items() {
        let items = vec![
            "- first: key fact. trailing detail that should vanish".to_string(),
            "- second: another fact. more detail".to_string(),
        ];
        let section = ContextSection::list("memories", 85, CompressionStrategy::Summarize, items)
            .with_budget(12);
        let rendered = section.render().await;
        assert!(rendered.contains("key fact."));
        assert!(!rendered.contains("should vanish"));
    }

    // ── History optimization ──────────────────────────────────────────────────

    #[test]
    fn history_within_budget_is_untouched() {
        let msgs = vec![Message::user("a"), Message::assistant("b")];
        let out = optimize_history(&msgs, 10_000);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn history_over_budget_drops_oldest_and_inserts_notice() {
        let msgs: Vec<Message> = (0..50)
            .map(|i| Message::user(format!("message number {i} with several words in it")))
            .collect();
        let out = optimize_history(&msgs, 60);
        assert!(out.len() < msgs.len());
        let head = out[0].as_text().unwrap();
        assert!(head.starts_with("[System: History truncated."), "got: {head}");
        assert!(head.contains("earlier messages hidden"));
        // Newest message always survives.
        assert!(out
            .last()
            .unwrap()
            .as_text()
            .unwrap()
            .contains("number 49"));
    }

    #[test]
    fn history_optimization_is_monotone() {
        let msgs: Vec<Message> = (0..30)
            .map(|i| Message::user(format!("entry {i} padded with some extra words")))
            .collect();
        let small = optimize_history(&msgs, 40);
        let large = optimize_history(&msgs, 120);

        // Strip synthetic notices before comparing suffixes.
        let tail = |v: &[Message]| -> Vec<String> {
            v.iter()
                .filter(|m| m.role != Role::System)
                .map(|m| m.as_text().unwrap().to_string())
                .collect()
        };
        let small_tail = tail(&small);
        let large_tail = tail(&large);
        assert!(large_tail.len() >= small_tail.len());
        assert_eq!(
            &large_tail[large_tail.len() - small_tail.len()..],
            &small_tail[..],
            "small-budget list must be a suffix of the large-budget list"
        );
    }

    #[test]
    fn available_history_tokens_enforces_minimum_reserve() {
        let asm = PromptAssembler::new(10_000, 100); // reserve below the floor
        assert_eq!(asm.available_history_tokens(), 6_000);
    }
}
