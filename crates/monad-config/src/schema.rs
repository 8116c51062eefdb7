// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub gather: GatherConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Driver identifier: "openai-compat" (any OpenAI-wire endpoint,
    /// including llama.cpp and Ollama) or "mock" (offline echo driver).
    pub provider: String,
    /// Model name forwarded to the endpoint
    pub name: String,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files
    pub api_key: Option<String>,
    /// Base URL override.  Required for local endpoints
    /// (e.g. `http://localhost:11434/v1`).
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0)
    pub temperature: Option<f32>,
    /// Context window used for prompt budgeting when the endpoint does not
    /// report one.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai-compat".into(),
            name: "gpt-4o-mini".into(),
            api_key_env: Some("OPENAI_API_KEY".into()),
            api_key: None,
            base_url: None,
            max_tokens: None,
            temperature: None,
            context_window: default_context_window(),
            timeout_secs: default_request_timeout(),
        }
    }
}

fn default_context_window() -> usize {
    128_000
}

fn default_request_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum model ↔ tool round trips per chat invocation
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Maximum iterations of the autonomous reasoning loop
    #[serde(default = "default_max_reasoning_turns")]
    pub max_reasoning_turns: u32,
    /// Tokens reserved for non-history prompt sections when optimizing
    /// chat history.  Never effective below 4000.
    #[serde(default = "default_history_reserve")]
    pub history_reserve_tokens: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_reasoning_turns: default_max_reasoning_turns(),
            history_reserve_tokens: default_history_reserve(),
        }
    }
}

fn default_max_turns() -> u32 {
    5
}

fn default_max_reasoning_turns() -> u32 {
    10
}

fn default_history_reserve() -> usize {
    4_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatherConfig {
    /// Cosine-similarity floor below which a memory is not recalled
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    /// Maximum number of memories recalled per turn
    #[serde(default = "default_memory_limit")]
    pub memory_limit: usize,
    /// Whether to ask the model for query tags when matching notes.
    /// Disable for fully offline operation; always-append notes still apply.
    #[serde(default = "default_true")]
    pub tag_extraction: bool,
}

impl Default for GatherConfig {
    fn default() -> Self {
        Self {
            min_similarity: default_min_similarity(),
            memory_limit: default_memory_limit(),
            tag_extraction: true,
        }
    }
}

fn default_min_similarity() -> f32 {
    0.25
}

fn default_memory_limit() -> usize {
    5
}

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so a named function is required for enabled-by-default
/// fields.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between queue polls when no job is runnable
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
        }
    }
}

fn default_poll_interval() -> u64 {
    2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Volatile in-process store; sessions are lost on exit.
    Memory,
    /// JSON documents under `store.data_dir`.
    #[default]
    File,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Data directory.  Defaults to `<platform data dir>/monad`.
    pub data_dir: Option<PathBuf>,
}

impl StoreConfig {
    /// Resolve the effective data directory.
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("monad")
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_llm_config_is_openai_compat() {
        let cfg = Config::default();
        assert_eq!(cfg.llm.provider, "openai-compat");
        assert!(cfg.llm.context_window > 0);
    }

    #[test]
    fn default_engine_limits() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_turns, 5);
        assert_eq!(cfg.max_reasoning_turns, 10);
        assert!(cfg.history_reserve_tokens >= 4_000);
    }

    #[test]
    fn gather_defaults_enable_tag_extraction() {
        let cfg = GatherConfig::default();
        assert!(cfg.tag_extraction);
        assert_eq!(cfg.memory_limit, 5);
    }

    #[test]
    fn empty_yaml_deserializes_to_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.engine.max_turns, 5);
        assert_eq!(cfg.store.backend, StoreBackend::File);
    }

    #[test]
    fn partial_yaml_keeps_unset_defaults() {
        let cfg: Config = serde_yaml::from_str("llm:\n  provider: mock\n  name: m\n").unwrap();
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.llm.timeout_secs, 120);
    }

    #[test]
    fn store_backend_parses_lowercase() {
        let cfg: Config = serde_yaml::from_str("store:\n  backend: memory\n").unwrap();
        assert_eq!(cfg.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn resolved_data_dir_honours_override() {
        let sc = StoreConfig {
            backend: StoreBackend::File,
            data_dir: Some(PathBuf::from("/tmp/monad-test")),
        };
        assert_eq!(sc.resolved_data_dir(), PathBuf::from("/tmp/monad-test"));
    }
}
