//! ARENA — LLM agents at the blackjack table
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores the ledger and wager book from disk (or starts fresh), serves
//! the HTTP API, and runs the periodic settle-and-save loop with graceful
//! shutdown.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use arena::audit::{AuditPublisher, JsonlPublisher, LogPublisher};
use arena::config;
use arena::engine::{Orchestrator, TableLimits};
use arena::llm::AgentRegistry;
use arena::market::{Market, WagerBook};
use arena::server::{self, ArenaState};
use arena::storage::{self, ArenaSnapshot, Ledger};
use arena::types::format_cents;

const BANNER: &str = r#"
    _    ____  _____ _   _    _
   / \  |  _ \| ____| \ | |  / \
  / _ \ | |_) |  _| |  \| | / _ \
 / ___ \|  _ <| |___| |\  |/ ___ \
/_/   \_\_| \_\_____|_| \_/_/   \_\

  Agents at the table, a market on the rail
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    let allowance = cfg.allowance_cents()?;
    info!(
        name = %cfg.arena.name,
        agents = cfg.agents.len(),
        daily_allowance = %format_cents(allowance as i64),
        settle_interval_secs = cfg.arena.settle_interval_secs,
        "ARENA starting up"
    );

    // -- Restore or create state -----------------------------------------

    let state_file = cfg.arena.state_file.as_str();
    let (ledger, book) = match storage::load_state(Some(state_file))? {
        Some(snapshot) => {
            info!(
                rounds = snapshot.ledger.rounds.len(),
                pending_wagers = snapshot.wagers.performance.len() + snapshot.wagers.head_to_head.len(),
                "Resumed from saved state"
            );
            (
                Ledger::restore(allowance, snapshot.ledger),
                WagerBook::restore(snapshot.wagers),
            )
        }
        None => {
            info!("Fresh start");
            (Ledger::new(allowance), WagerBook::new())
        }
    };
    let ledger = Arc::new(ledger);

    // -- Initialise components -------------------------------------------

    let registry = Arc::new(AgentRegistry::from_config(&cfg)?);
    if registry.ids().is_empty() {
        warn!("No agents configured, runs will be rejected");
    }

    let audit: Arc<dyn AuditPublisher> = match &cfg.audit.path {
        Some(path) => {
            info!(path = %path, "Publishing audit facts to file");
            Arc::new(JsonlPublisher::new(path.clone(), cfg.audit.max_record_bytes))
        }
        None => Arc::new(LogPublisher::new(cfg.audit.max_record_bytes)),
    };

    let limits = TableLimits::from_config(&cfg.table)?;
    let orchestrator = Arc::new(
        Orchestrator::new(limits, Arc::clone(&ledger), Arc::clone(&registry))
            .with_audit(Arc::clone(&audit)),
    );
    let market = Arc::new(
        Market::new(
            Arc::clone(&ledger),
            registry.ids(),
            cfg.wagering.head_to_head_rounds,
        )
        .with_book(book)
        .with_audit(audit),
    );

    let server_handle = if cfg.server.enabled {
        let state = Arc::new(ArenaState::new(
            Arc::clone(&orchestrator),
            Arc::clone(&ledger),
            Arc::clone(&market),
            Arc::clone(&registry),
        ));
        Some(server::spawn_server(state, cfg.server.port).await?)
    } else {
        info!("HTTP server disabled");
        None
    };

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.arena.settle_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = cfg.arena.settle_interval_secs,
        "Entering settlement loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = market.settle(Utc::now().date_naive());
                if !report.is_empty() {
                    info!(
                        settled = report.settled.len(),
                        still_pending = report.still_pending,
                        paid = %format_cents(report.total_paid() as i64),
                        "Settlement pass complete"
                    );
                }
                if let Err(e) = storage::save_state(&snapshot(&ledger, &market), Some(state_file)) {
                    error!(error = %e, "Failed to save state");
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    if let Some(handle) = server_handle {
        handle.abort();
    }

    storage::save_state(&snapshot(&ledger, &market), Some(state_file))?;
    info!(
        rounds = ledger.round_count(),
        pending_wagers = market.book().pending_count(),
        "ARENA shut down cleanly."
    );

    Ok(())
}

fn snapshot(ledger: &Ledger, market: &Market) -> ArenaSnapshot {
    ArenaSnapshot {
        ledger: ledger.snapshot(),
        wagers: market.snapshot(),
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("arena=info,audit=info"));

    let json_logging = std::env::var("ARENA_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
