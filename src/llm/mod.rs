//! Agent gateway — how the arena talks to its players.
//!
//! Defines the `AgentGateway` trait and provides implementations for
//! OpenRouter (OpenAI-compatible, streaming), Anthropic Claude, and a
//! scripted gateway for dry runs and tests. The orchestrator depends
//! only on the trait.

pub mod anthropic;
pub mod openrouter;
pub mod scripted;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::{AgentConfig, AppConfig};
use crate::protocol::Prompt;
use crate::types::{AgentId, ArenaError};

/// Longest rationale kept from a reply.
const MAX_RATIONALE_CHARS: usize = 2000;

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// Structured result of one agent call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentReply {
    /// Text the decision is parsed from.
    pub decision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    /// Untouched provider output, when it differs from `decision`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl AgentReply {
    /// Build a reply from completion text: everything before the final
    /// non-empty line is treated as rationale.
    pub fn from_completion(text: &str) -> Self {
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        let rationale = if lines.len() > 1 {
            let body = lines[..lines.len() - 1].join("\n");
            Some(body.chars().take(MAX_RATIONALE_CHARS).collect())
        } else {
            None
        };
        Self {
            decision: text.to_string(),
            rationale,
            raw: None,
        }
    }
}

/// Message pushed by a streaming gateway: text chunks, then exactly one
/// final structured reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentMessage {
    Chunk(String),
    Final(AgentReply),
}

// ---------------------------------------------------------------------------
// Gateway trait
// ---------------------------------------------------------------------------

/// Capability interface for one agent backend.
#[async_trait]
pub trait AgentGateway: Send + Sync {
    /// Send a prompt and wait for the full reply.
    async fn ask(&self, prompt: &Prompt) -> Result<AgentReply>;

    /// Send a prompt, pushing text chunks as they arrive and finishing
    /// with `AgentMessage::Final`. Backends without streaming send the
    /// final reply only.
    async fn ask_stream(
        &self,
        prompt: &Prompt,
        sink: mpsc::UnboundedSender<AgentMessage>,
    ) -> Result<()> {
        let reply = self.ask(prompt).await?;
        // Receiver gone means nobody is listening; the caller decides.
        let _ = sink.send(AgentMessage::Final(reply));
        Ok(())
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    /// Backend/model label for logs.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Agent id → gateway lookup. Unknown ids are rejected before any
/// ledger mutation happens.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<AgentId, Arc<dyn AgentGateway>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<AgentId>, gateway: Arc<dyn AgentGateway>) {
        self.agents.insert(id.into(), gateway);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn AgentGateway>, ArenaError> {
        self.agents
            .get(id)
            .cloned()
            .ok_or_else(|| ArenaError::UnknownAgent(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.agents.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Build gateways for every configured agent.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let mut registry = Self::new();
        for agent in &cfg.agents {
            let gateway = build_gateway(agent)
                .with_context(|| format!("Failed to build gateway for agent {}", agent.id))?;
            info!(
                agent = %agent.id,
                provider = %agent.provider,
                backend = gateway.name(),
                streaming = gateway.supports_streaming(),
                "Agent registered"
            );
            registry.register(agent.id.clone(), gateway);
        }
        Ok(registry)
    }
}

fn build_gateway(agent: &AgentConfig) -> Result<Arc<dyn AgentGateway>> {
    match agent.provider.as_str() {
        "openrouter" => {
            let key = AppConfig::resolve_secret(agent.api_key_env.as_deref().unwrap_or_default())?;
            Ok(Arc::new(openrouter::OpenRouterGateway::new(
                key,
                agent.model.clone(),
                agent.max_tokens,
                agent.stream,
            )?))
        }
        "anthropic" => {
            let key = AppConfig::resolve_secret(agent.api_key_env.as_deref().unwrap_or_default())?;
            Ok(Arc::new(anthropic::AnthropicGateway::new(
                key,
                agent.model.clone(),
                agent.max_tokens,
            )?))
        }
        "scripted" => Ok(Arc::new(
            scripted::ScriptedGateway::new(agent.replies.clone())
                .cycling()
                .streaming(agent.stream),
        )),
        other => anyhow::bail!("Unknown agent provider: {other}"),
    }
}
