//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::time::Duration;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub arena: ArenaConfig,
    pub table: TableConfig,
    #[serde(default)]
    pub wagering: WageringConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArenaConfig {
    pub name: String,
    /// Fresh bankroll each agent (and participant) gets per day, in dollars.
    pub daily_allowance: Decimal,
    #[serde(default = "default_state_file")]
    pub state_file: String,
    #[serde(default = "default_settle_interval")]
    pub settle_interval_secs: u64,
}

/// Table limits and run pacing.
#[derive(Debug, Deserialize, Clone)]
pub struct TableConfig {
    pub min_wager: Decimal,
    pub max_wager: Decimal,
    #[serde(default = "default_rounds")]
    pub rounds_per_run: u32,
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_secs: u64,
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WageringConfig {
    /// Rounds each agent must play after a head-to-head wager before it settles.
    #[serde(default = "default_h2h_window")]
    pub head_to_head_rounds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    /// JSON-lines file to append facts to; facts are only logged when unset.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_audit_budget")]
    pub max_record_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub id: String,
    /// "openrouter" | "anthropic" | "scripted"
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    /// Canned replies for the scripted provider.
    #[serde(default)]
    pub replies: Vec<String>,
}

fn default_state_file() -> String {
    "arena_state.json".to_string()
}

fn default_settle_interval() -> u64 {
    60
}

fn default_rounds() -> u32 {
    5
}

fn default_agent_timeout() -> u64 {
    60
}

fn default_run_timeout() -> u64 {
    600
}

fn default_h2h_window() -> u64 {
    3
}

fn default_audit_budget() -> usize {
    8 * 1024
}

impl Default for WageringConfig {
    fn default() -> Self {
        Self {
            head_to_head_rounds: default_h2h_window(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_record_bytes: default_audit_budget(),
        }
    }
}

/// Convert a dollar amount to whole cents, rejecting negatives and
/// fractions of a cent.
pub fn dollars_to_cents(amount: Decimal) -> Result<u64> {
    let cents = amount
        .checked_mul(dec!(100))
        .with_context(|| format!("Amount {amount} is out of range"))?;
    if cents.fract() != Decimal::ZERO {
        anyhow::bail!("Amount {amount} has fractional cents");
    }
    cents
        .to_u64()
        .with_context(|| format!("Amount {amount} is not a valid non-negative value"))
}

impl TableConfig {
    pub fn min_wager_cents(&self) -> Result<u64> {
        dollars_to_cents(self.min_wager)
    }

    pub fn max_wager_cents(&self) -> Result<u64> {
        dollars_to_cents(self.max_wager)
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate configuration text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Check table limits and agent ids are coherent.
    pub fn validate(&self) -> Result<()> {
        let min = self.table.min_wager_cents().context("table.min_wager")?;
        let max = self.table.max_wager_cents().context("table.max_wager")?;
        let allowance = self.allowance_cents()?;

        if min == 0 {
            anyhow::bail!("table.min_wager must be positive");
        }
        if min > max {
            anyhow::bail!("table.min_wager ({min}) exceeds table.max_wager ({max})");
        }
        if allowance < min {
            anyhow::bail!("arena.daily_allowance is below table.min_wager");
        }
        if self.arena.settle_interval_secs == 0 {
            anyhow::bail!("arena.settle_interval_secs must be positive");
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.id.as_str()) {
                anyhow::bail!("Duplicate agent id: {}", agent.id);
            }
        }
        Ok(())
    }

    pub fn allowance_cents(&self) -> Result<u64> {
        dollars_to_cents(self.arena.daily_allowance).context("arena.daily_allowance")
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve an environment variable holding a secret.
    pub fn resolve_secret(env_name: &str) -> Result<SecretString> {
        Self::resolve_env(env_name).map(SecretString::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [arena]
        name = "ARENA-TEST"
        daily_allowance = 100000.00

        [table]
        min_wager = 10
        max_wager = 5000
        rounds_per_run = 3

        [[agents]]
        id = "alpha"
        provider = "scripted"
        replies = ["WAGER: 10", "DECISION: STAND"]

        [[agents]]
        id = "beta"
        provider = "openrouter"
        model = "openai/gpt-4o"
        api_key_env = "OPENROUTER_API_KEY"
        stream = true
    "#;

    #[test]
    fn test_parse_sample() {
        let cfg = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(cfg.arena.name, "ARENA-TEST");
        assert_eq!(cfg.allowance_cents().unwrap(), 10_000_000);
        assert_eq!(cfg.table.min_wager_cents().unwrap(), 1_000);
        assert_eq!(cfg.table.max_wager_cents().unwrap(), 500_000);
        assert_eq!(cfg.table.rounds_per_run, 3);
        assert_eq!(cfg.table.agent_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.wagering.head_to_head_rounds, 3);
        assert_eq!(cfg.agents.len(), 2);
        assert!(cfg.agents[1].stream);
        assert_eq!(cfg.server.port, 8080);
        assert!(cfg.audit.path.is_none());
    }

    #[test]
    fn test_rejects_min_above_max() {
        let bad = SAMPLE.replace("min_wager = 10", "min_wager = 6000");
        assert!(AppConfig::from_toml(&bad).is_err());
    }

    #[test]
    fn test_rejects_duplicate_agents() {
        let bad = SAMPLE.replace("id = \"beta\"", "id = \"alpha\"");
        assert!(AppConfig::from_toml(&bad).is_err());
    }

    #[test]
    fn test_rejects_zero_settle_interval() {
        let bad = SAMPLE.replace(
            "daily_allowance = 100000.00",
            "daily_allowance = 100000.00\n        settle_interval_secs = 0",
        );
        let err = AppConfig::from_toml(&bad).unwrap_err();
        assert!(err.to_string().contains("settle_interval_secs"));
    }

    #[test]
    fn test_dollars_to_cents() {
        assert_eq!(dollars_to_cents(dec!(1000.00)).unwrap(), 100_000);
        assert_eq!(dollars_to_cents(dec!(0.05)).unwrap(), 5);
        assert!(dollars_to_cents(dec!(0.001)).is_err());
        assert!(dollars_to_cents(dec!(-1)).is_err());
        assert!(dollars_to_cents(Decimal::MAX).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(AppConfig::load("/nonexistent/arena-config.toml").is_err());
    }
}
