//! Persistence layer.
//!
//! The ledger and wager book live in memory for the life of the process.
//! Their contents are saved to and restored from a JSON snapshot file so
//! a restart does not lose balances, round history, or open wagers.

pub mod ledger;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::market::book::WagerBookSnapshot;
use ledger::LedgerSnapshot;

pub use ledger::{Debit, Ledger};

/// Default state file path.
const DEFAULT_STATE_FILE: &str = "arena_state.json";

/// Everything persisted between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArenaSnapshot {
    pub ledger: LedgerSnapshot,
    pub wagers: WagerBookSnapshot,
}

/// Save arena state to a JSON file.
pub fn save_state(state: &ArenaSnapshot, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json = serde_json::to_string_pretty(state).context("Failed to serialise arena state")?;

    std::fs::write(path, &json).context(format!("Failed to write state to {path}"))?;

    debug!(path, rounds = state.ledger.rounds.len(), "State saved");
    Ok(())
}

/// Load arena state from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_state(path: Option<&str>) -> Result<Option<ArenaSnapshot>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved state found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path).context(format!("Failed to read state from {path}"))?;

    let state: ArenaSnapshot =
        serde_json::from_str(&json).context(format!("Failed to parse state from {path}"))?;

    info!(
        path,
        balances = state.ledger.balances.len(),
        rounds = state.ledger.rounds.len(),
        performance_wagers = state.wagers.performance.len(),
        head_to_head_wagers = state.wagers.head_to_head.len(),
        "State loaded from disk"
    );

    Ok(Some(state))
}

/// Delete the state file (for testing or reset).
pub fn delete_state(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path).context(format!("Failed to delete state file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
