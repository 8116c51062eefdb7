// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Agent definitions: the capability sets autonomous jobs run under.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A named agent: instructions plus the tool ids it may use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: String,
    pub name: String,
    pub instructions: String,
    /// Catalog ids of the tools this agent may call
    #[serde(default)]
    pub tool_ids: Vec<String>,
}

impl AgentDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            instructions: instructions.into(),
            tool_ids: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tool_ids: &[&str]) -> Self {
        self.tool_ids = tool_ids.iter().map(|s| s.to_string()).collect();
        self
    }

    /// The system instructions a job runs under: the agent's own
    /// instructions plus the completion protocol the reasoning loop
    /// detects.
    pub fn composed_instructions(&self) -> String {
        format!(
            "You are {}, an autonomous agent.\n\n{}\n\n\
             Work the task to completion using the available tools. \
             When the task is finished, state the result and include the \
             phrase \"Job complete\". If you cannot proceed without input \
             from the user, include the phrase \"I need more information\" \
             and explain what is missing.",
            self.name, self.instructions
        )
    }
}

/// Immutable-after-startup registry of agent definitions.
pub struct AgentRegistry {
    agents: HashMap<String, AgentDefinition>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    /// A registry holding the stock general-purpose agent.
    pub fn with_builtin() -> Self {
        let mut reg = Self::new();
        reg.register(
            AgentDefinition::new(
                "general",
                "General Assistant",
                "You handle delegated tasks of any kind: research, file \
                 management, and summarization.",
            )
            .with_tools(&[
                "list_dir",
                "read_file",
                "write_file",
                "search_memory",
                "save_memory",
                "web_search",
            ]),
        );
        reg
    }

    pub fn register(&mut self, agent: AgentDefinition) {
        self.agents.insert(agent.id.clone(), agent);
    }

    pub fn get(&self, id: &str) -> Option<&AgentDefinition> {
        self.agents.get(id)
    }

    pub fn list(&self) -> Vec<&AgentDefinition> {
        let mut all: Vec<&AgentDefinition> = self.agents.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composed_instructions_embed_completion_protocol() {
        let agent = AgentDefinition::new("a", "Researcher", "You research things.");
        let composed = agent.composed_instructions();
        assert!(composed.contains("Researcher"));
        assert!(composed.contains("You research things."));
        assert!(composed.contains("Job complete"));
        assert!(composed.contains("I need more information"));
    }

    #[test]
    fn registry_round_trip() {
        let mut reg = AgentRegistry::new();
        reg.register(AgentDefinition::new("x", "X", "i"));
        assert!(reg.get("x").is_some());
        assert!(reg.get("y").is_none());
    }

    #[test]
    fn builtin_registry_has_general_agent() {
        let reg = AgentRegistry::with_builtin();
        let general = reg.get("general").unwrap();
        assert!(general.tool_ids.contains(&"web_search".to_string()));
    }

    #[test]
    fn list_is_sorted_by_id() {
        let mut reg = AgentRegistry::new();
        reg.register(AgentDefinition::new("zeta", "Z", "i"));
        reg.register(AgentDefinition::new("alpha", "A", "i"));
        let ids: Vec<&str> = reg.list().iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }
}
