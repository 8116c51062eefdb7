// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;

use crate::{CompletionRequest, Message, ResponseEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Human-readable driver name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;

    /// One-shot utility completion: send a single user prompt, consume the
    /// stream, and return the accumulated text.  Used for auxiliary calls
    /// (tag extraction, section summarization) that never reach the user.
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        let req = CompletionRequest {
            messages: vec![Message::user(prompt)],
            tools: vec![],
            stream: true,
        };
        let mut stream = self.complete(req).await?;
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                ResponseEvent::TextDelta(delta) => text.push_str(&delta),
                ResponseEvent::Done => break,
                _ => {}
            }
        }
        Ok(text)
    }
}
