//! Append-only audit publication.
//!
//! Facts about settled rounds and wagers are published best-effort on a
//! detached task. Nothing on the critical path waits for them and a
//! publishing failure is only logged.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::types::{RoundRecord, WagerOutcome, WagerSide};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "fact", rename_all = "snake_case")]
pub enum AuditFact {
    RoundSettled {
        record: RoundRecord,
    },
    PerformanceWagerPlaced {
        id: Uuid,
        agent: String,
        period: chrono::NaiveDate,
        side: WagerSide,
        stake: u64,
    },
    HeadToHeadWagerPlaced {
        id: Uuid,
        agent_a: String,
        agent_b: String,
        backed: String,
        stake: u64,
    },
    WagerSettled {
        id: Uuid,
        outcome: WagerOutcome,
        payout: u64,
        settled_at: DateTime<Utc>,
    },
}

impl AuditFact {
    /// Serialize as one JSON line no larger than `max_bytes` when possible,
    /// dropping free-text rationale from round facts first.
    pub fn to_line(&self, max_bytes: usize) -> Result<String> {
        let line = serde_json::to_string(self).context("Failed to serialise audit fact")?;
        if line.len() <= max_bytes {
            return Ok(line);
        }
        match self {
            AuditFact::RoundSettled { record } => {
                let mut trimmed = record.clone();
                trimmed.wager_rationale = None;
                for step in &mut trimmed.decisions {
                    step.rationale = None;
                }
                serde_json::to_string(&AuditFact::RoundSettled { record: trimmed })
                    .context("Failed to serialise trimmed audit fact")
            }
            _ => Ok(line),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditPublisher: Send + Sync {
    async fn publish(&self, fact: &AuditFact) -> Result<()>;
}

/// Spawn a best-effort publish; the handle is only for callers that want
/// to observe completion (tests).
pub fn publish_detached(publisher: Arc<dyn AuditPublisher>, fact: AuditFact) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = publisher.publish(&fact).await {
            warn!(error = %e, "Audit publish failed");
        }
    })
}

/// Writes facts to the `audit` tracing target.
pub struct LogPublisher {
    max_bytes: usize,
}

impl LogPublisher {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }
}

#[async_trait]
impl AuditPublisher for LogPublisher {
    async fn publish(&self, fact: &AuditFact) -> Result<()> {
        let line = fact.to_line(self.max_bytes)?;
        info!(target: "audit", fact = %line);
        Ok(())
    }
}

/// Appends facts as JSON lines to a file.
pub struct JsonlPublisher {
    path: String,
    max_bytes: usize,
    // Serializes appends so lines never interleave.
    write_lock: Mutex<()>,
}

impl JsonlPublisher {
    pub fn new(path: impl Into<String>, max_bytes: usize) -> Self {
        Self {
            path: path.into(),
            max_bytes,
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl AuditPublisher for JsonlPublisher {
    async fn publish(&self, fact: &AuditFact) -> Result<()> {
        let mut line = fact.to_line(self.max_bytes)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open audit log {}", self.path))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to append to audit log {}", self.path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{Hand, Outcome};
    use crate::types::{DecisionStep, PlayDecision};
    use chrono::NaiveDate;

    fn record(rationale: &str) -> RoundRecord {
        RoundRecord {
            round: 1,
            agent: "alpha".into(),
            opponent: None,
            date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            wager: 1_000,
            wager_rationale: Some(rationale.to_string()),
            hand: Hand::new(),
            dealer: Hand::new(),
            decisions: vec![DecisionStep {
                decision: PlayDecision::Stand,
                hand_value: 16,
                rationale: Some(rationale.to_string()),
                fallback: false,
            }],
            outcome: Outcome::Loss,
            pnl: -1_000,
            balance_after: 9_000,
            settled_at: Utc::now(),
        }
    }

    #[test]
    fn test_small_fact_keeps_rationale() {
        let fact = AuditFact::RoundSettled { record: record("short") };
        let line = fact.to_line(10_000).unwrap();
        assert!(line.contains("short"));
        assert!(line.contains("\"fact\":\"round_settled\""));
    }

    #[test]
    fn test_oversized_fact_drops_rationale() {
        let long = "x".repeat(5_000);
        let fact = AuditFact::RoundSettled { record: record(&long) };
        let line = fact.to_line(1_000).unwrap();
        assert!(!line.contains(&long));
        assert!(line.len() < 1_000);
        assert!(line.contains("\"pnl\":-1000"));
    }

    #[tokio::test]
    async fn test_publish_detached_calls_publisher() {
        let mut mock = MockAuditPublisher::new();
        mock.expect_publish().times(1).returning(|_| Ok(()));
        let handle = publish_detached(Arc::new(mock), AuditFact::RoundSettled { record: record("r") });
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed() {
        let mut mock = MockAuditPublisher::new();
        mock.expect_publish()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("sink down")));
        let handle = publish_detached(Arc::new(mock), AuditFact::RoundSettled { record: record("r") });
        assert!(handle.await.is_ok());
    }

    #[tokio::test]
    async fn test_jsonl_publisher_appends_lines() {
        let mut path = std::env::temp_dir();
        path.push(format!("arena_audit_{}.jsonl", Uuid::new_v4()));
        let path = path.to_string_lossy().to_string();

        let publisher = JsonlPublisher::new(path.clone(), 10_000);
        publisher.publish(&AuditFact::RoundSettled { record: record("a") }).await.unwrap();
        publisher
            .publish(&AuditFact::WagerSettled {
                id: Uuid::new_v4(),
                outcome: WagerOutcome::Push,
                payout: 500,
                settled_at: Utc::now(),
            })
            .await
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.lines().nth(1).unwrap().contains("wager_settled"));
        std::fs::remove_file(&path).unwrap();
    }
}
