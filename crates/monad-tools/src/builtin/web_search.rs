// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolResult};

#[derive(Default)]
pub struct WebSearchTool {
    /// Optional API key override (falls back to env BRAVE_API_KEY)
    pub api_key: Option<String>,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Real-time web search. Requires BRAVE_API_KEY env var. count: 1-10 (default 5).\n\
         Include the current year in queries for recent info.\n\
         ALWAYS cite sources after answering:\n\
         Sources:\n\
         - [Title](URL)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                },
                "count": {
                    "type": "integer",
                    "description": "Number of results to return (default 5, max 10)"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: &Value) -> ToolResult {
        let query = match args.get("query").and_then(|v| v.as_str()) {
            Some(q) => q.to_string(),
            None => return ToolResult::fail("missing 'query'"),
        };
        let count = args
            .get("count")
            .and_then(|v| v.as_u64())
            .unwrap_or(5)
            .min(10) as usize;

        debug!(query = %query, count, "web_search tool");

        let api_key = self
            .api_key
            .clone()
            .or_else(|| std::env::var("BRAVE_API_KEY").ok());

        let Some(api_key) = api_key else {
            return ToolResult::fail(
                "No search API key configured. Set the BRAVE_API_KEY environment variable.",
            );
        };

        match brave_search(&query, count, &api_key).await {
            Ok(results) => ToolResult::ok(results),
            Err(e) => ToolResult::fail(format!("search error: {e}")),
        }
    }
}

async fn brave_search(query: &str, count: usize, api_key: &str) -> anyhow::Result<String> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(15))
        .user_agent("monad/0.9")
        .build()?;

    let url = format!(
        "https://api.search.brave.com/res/v1/web/search?q={}&count={}",
        urlencode(query),
        count
    );

    let resp = client
        .get(&url)
        .header("Accept", "application/json")
        .header("X-Subscription-Token", api_key)
        .send()
        .await?;

    if !resp.status().is_success() {
        anyhow::bail!("search API returned status {}", resp.status());
    }

    let body: Value = resp.json().await?;
    let mut lines: Vec<String> = Vec::new();
    if let Some(results) = body["web"]["results"].as_array() {
        for r in results.iter().take(count) {
            let title = r["title"].as_str().unwrap_or("(untitled)");
            let url = r["url"].as_str().unwrap_or("");
            let snippet = r["description"].as_str().unwrap_or("");
            lines.push(format!("- [{title}]({url})\n  {snippet}"));
        }
    }
    if lines.is_empty() {
        return Ok("(no results)".into());
    }
    Ok(lines.join("\n"))
}

/// Percent-encode a query string for a URL parameter.
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencode_passes_safe_chars() {
        assert_eq!(urlencode("abc-123_x.~"), "abc-123_x.~");
    }

    #[test]
    fn urlencode_spaces_and_specials() {
        assert_eq!(urlencode("a b&c"), "a+b%26c");
    }

    #[tokio::test]
    async fn missing_api_key_fails_cleanly() {
        // Guard against an ambient key leaking into the test environment.
        if std::env::var("BRAVE_API_KEY").is_ok() {
            return;
        }
        let r = WebSearchTool::default()
            .execute(&json!({ "query": "rust" }))
            .await;
        assert!(!r.success);
        assert!(r.error.unwrap().contains("BRAVE_API_KEY"));
    }

    #[tokio::test]
    async fn missing_query_fails() {
        let r = WebSearchTool::default().execute(&json!({})).await;
        assert!(!r.success);
    }
}
