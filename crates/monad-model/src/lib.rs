// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod client;
mod mock;
mod openai_compat;
mod types;

pub use client::{LlmClient, ResponseStream};
pub use mock::{MockClient, ScriptedClient};
pub use openai_compat::OpenAiCompatClient;
pub use types::*;

use anyhow::bail;
use monad_config::LlmConfig;

/// Construct a boxed [`LlmClient`] from configuration.
///
/// Selects the driver implementation based on `cfg.provider`.
pub fn from_config(cfg: &LlmConfig) -> anyhow::Result<Box<dyn LlmClient>> {
    match cfg.provider.as_str() {
        "openai-compat" => Ok(Box::new(OpenAiCompatClient::new(
            cfg.name.clone(),
            resolve_api_key(cfg),
            cfg.base_url.clone(),
            cfg.max_tokens,
            cfg.temperature,
            cfg.timeout_secs,
        ))),
        "mock" => Ok(Box::new(MockClient)),
        other => bail!("unknown LLM provider: {other}"),
    }
}

/// Resolve the API key from config: explicit `api_key` wins, then the
/// environment variable named by `api_key_env`.
fn resolve_api_key(cfg: &LlmConfig) -> Option<String> {
    if cfg.api_key.is_some() {
        return cfg.api_key.clone();
    }
    cfg.api_key_env
        .as_deref()
        .and_then(|var| std::env::var(var).ok())
        .filter(|k| !k.is_empty())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_builds_mock_driver() {
        let cfg = LlmConfig {
            provider: "mock".into(),
            ..LlmConfig::default()
        };
        let client = from_config(&cfg).unwrap();
        assert_eq!(client.name(), "mock");
    }

    #[test]
    fn from_config_rejects_unknown_provider() {
        let cfg = LlmConfig {
            provider: "frobnicator".into(),
            ..LlmConfig::default()
        };
        assert!(from_config(&cfg).is_err());
    }

    #[test]
    fn explicit_api_key_wins_over_env() {
        let cfg = LlmConfig {
            api_key: Some("sk-explicit".into()),
            api_key_env: Some("PATH".into()), // always set, must be ignored
            ..LlmConfig::default()
        };
        assert_eq!(resolve_api_key(&cfg).as_deref(), Some("sk-explicit"));
    }

    #[test]
    fn missing_env_var_yields_none() {
        let cfg = LlmConfig {
            api_key: None,
            api_key_env: Some("MONAD_DEFINITELY_UNSET_KEY_VAR".into()),
            ..LlmConfig::default()
        };
        assert!(resolve_api_key(&cfg).is_none());
    }
}
