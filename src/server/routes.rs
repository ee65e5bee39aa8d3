//! API route handlers.
//!
//! All endpoints return JSON except `POST /api/runs`, which streams round
//! events as server-sent events. State is shared via `Arc<ArenaState>`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chrono::{NaiveDate, Utc};
use futures::Stream;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::dollars_to_cents;
use crate::engine::{Matchup, Orchestrator, RunRequest, Telemetry};
use crate::game::{RandomShoe, Shoe};
use crate::llm::AgentRegistry;
use crate::market::{
    HeadToHeadWagerRequest, Market, OddsPoint, PairOddsPoint, PerformanceWagerRequest, WagerView,
};
use crate::storage::Ledger;
use crate::types::{
    format_cents, AgentId, ArenaError, HeadToHeadWager, LeaderboardEntry, PerformanceWager,
    RoundRecord, WagerSide,
};

/// Most recent rounds returned by the history endpoint.
const MAX_ROUNDS_RETURNED: usize = 100;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Builds a fresh shoe for each run.
pub type ShoeFactory = Arc<dyn Fn() -> Box<dyn Shoe> + Send + Sync>;

/// Shared state accessible by all route handlers.
pub struct ArenaState {
    pub orchestrator: Arc<Orchestrator>,
    pub ledger: Arc<Ledger>,
    pub market: Arc<Market>,
    pub registry: Arc<AgentRegistry>,
    pub shoes: ShoeFactory,
}

impl ArenaState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        ledger: Arc<Ledger>,
        market: Arc<Market>,
        registry: Arc<AgentRegistry>,
    ) -> Self {
        Self {
            orchestrator,
            ledger,
            market,
            registry,
            shoes: Arc::new(|| Box::new(RandomShoe::new()) as Box<dyn Shoe>),
        }
    }

    /// Replace the shoe source (stacked decks in tests).
    pub fn with_shoes(mut self, shoes: ShoeFactory) -> Self {
        self.shoes = shoes;
        self
    }

    fn require_agent(&self, agent: &str) -> Result<(), ApiError> {
        if self.registry.contains(agent) {
            Ok(())
        } else {
            Err(ArenaError::UnknownAgent(agent.to_string()).into())
        }
    }
}

pub type AppState = Arc<ArenaState>;

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// JSON `{error}` response with a status derived from the domain error.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<ArenaError> for ApiError {
    fn from(err: ArenaError) -> Self {
        let status = match err {
            ArenaError::UnknownAgent(_) => StatusCode::NOT_FOUND,
            ArenaError::InsufficientFunds { .. } => StatusCode::CONFLICT,
            ArenaError::InvalidWager(_) | ArenaError::InvalidMatchup(_) => StatusCode::BAD_REQUEST,
            ArenaError::DeckExhausted => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request and response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RunBody {
    pub agents: Vec<AgentId>,
    #[serde(default)]
    pub rounds: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BankrollResponse {
    pub agent: AgentId,
    pub date: NaiveDate,
    pub balance: u64,
    pub display: String,
}

/// Leaderboard entry with its derived win rate.
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardRow {
    #[serde(flatten)]
    pub entry: LeaderboardEntry,
    pub win_rate: f64,
}

impl From<LeaderboardEntry> for LeaderboardRow {
    fn from(entry: LeaderboardEntry) -> Self {
        Self {
            win_rate: entry.win_rate(),
            entry,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct PerformanceWagerBody {
    pub participant: String,
    pub agent: AgentId,
    pub period: NaiveDate,
    pub side: WagerSide,
    /// Dollars.
    pub stake: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct HeadToHeadWagerBody {
    pub participant: String,
    pub agent_a: AgentId,
    pub agent_b: AgentId,
    pub backed: AgentId,
    /// Dollars.
    pub stake: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct OddsResponse {
    pub agent: AgentId,
    pub period: NaiveDate,
    pub current: OddsPoint,
    pub history: Vec<OddsPoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PairOddsResponse {
    pub agent_a: AgentId,
    pub agent_b: AgentId,
    pub history: Vec<PairOddsPoint>,
}

fn stake_cents(stake: Decimal) -> Result<u64, ApiError> {
    dollars_to_cents(stake).map_err(|e| ApiError::bad_request(format!("Invalid stake: {e}")))
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// POST /api/runs
///
/// The run is spawned on its own task: a client that disconnects stops
/// receiving events but never cancels the round in progress.
pub async fn start_run(
    State(state): State<AppState>,
    Json(body): Json<RunBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let matchup = Matchup::from_agents(body.agents)?;
    for agent in matchup.agents() {
        state.require_agent(agent)?;
    }

    let (telemetry, rx) = Telemetry::channel();
    let request = RunRequest {
        matchup,
        rounds: body.rounds,
        date: today(),
    };
    let orchestrator = Arc::clone(&state.orchestrator);
    let shoes = Arc::clone(&state.shoes);

    info!(agents = ?request.matchup.agents(), rounds = ?request.rounds, "Run requested");
    tokio::spawn(async move {
        let mut shoe = shoes();
        if let Err(e) = orchestrator.run(request, shoe.as_mut(), telemetry).await {
            warn!(error = %e, "Run ended with an error");
        }
    });

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let sse = Event::default()
            .json_data(&event)
            .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()));
        Some((Ok::<_, Infallible>(sse), rx))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// GET /api/bankroll/:agent
pub async fn get_bankroll(
    State(state): State<AppState>,
    Path(agent): Path<AgentId>,
) -> Result<Json<BankrollResponse>, ApiError> {
    state.require_agent(&agent)?;
    let date = today();
    let balance = state.ledger.get_or_init_balance(&agent, date);
    Ok(Json(BankrollResponse {
        display: format_cents(balance as i64),
        agent,
        date,
        balance,
    }))
}

/// GET /api/leaderboard
pub async fn get_leaderboard(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Json<Vec<LeaderboardRow>> {
    Json(
        state
            .ledger
            .leaderboard(query.date)
            .into_iter()
            .map(LeaderboardRow::from)
            .collect(),
    )
}

/// GET /api/rounds/:agent
pub async fn get_rounds(
    State(state): State<AppState>,
    Path(agent): Path<AgentId>,
) -> Result<Json<Vec<RoundRecord>>, ApiError> {
    state.require_agent(&agent)?;
    let rounds = state.ledger.rounds_for(&agent);
    let start = rounds.len().saturating_sub(MAX_ROUNDS_RETURNED);
    Ok(Json(rounds[start..].to_vec()))
}

/// POST /api/wagers/performance
pub async fn place_performance(
    State(state): State<AppState>,
    Json(body): Json<PerformanceWagerBody>,
) -> Result<(StatusCode, Json<PerformanceWager>), ApiError> {
    let wager = state.market.place_performance(
        PerformanceWagerRequest {
            participant: body.participant,
            agent: body.agent,
            period: body.period,
            side: body.side,
            stake: stake_cents(body.stake)?,
        },
        today(),
    )?;
    Ok((StatusCode::CREATED, Json(wager)))
}

/// POST /api/wagers/head-to-head
pub async fn place_head_to_head(
    State(state): State<AppState>,
    Json(body): Json<HeadToHeadWagerBody>,
) -> Result<(StatusCode, Json<HeadToHeadWager>), ApiError> {
    let wager = state.market.place_head_to_head(
        HeadToHeadWagerRequest {
            participant: body.participant,
            agent_a: body.agent_a,
            agent_b: body.agent_b,
            backed: body.backed,
            stake: stake_cents(body.stake)?,
        },
        today(),
    )?;
    Ok((StatusCode::CREATED, Json(wager)))
}

/// GET /api/wagers/:id
pub async fn get_wager(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WagerView>, ApiError> {
    state.market.book().find(id).map(Json).ok_or_else(|| ApiError {
        status: StatusCode::NOT_FOUND,
        message: format!("Unknown wager: {id}"),
    })
}

/// GET /api/odds/:agent/:period
pub async fn get_odds(
    State(state): State<AppState>,
    Path((agent, period)): Path<(AgentId, NaiveDate)>,
) -> Result<Json<OddsResponse>, ApiError> {
    let history = state.market.odds_history(&agent, period)?;
    let current = history
        .last()
        .cloned()
        .unwrap_or_else(|| OddsPoint::opening(Utc::now()));
    Ok(Json(OddsResponse {
        agent,
        period,
        current,
        history,
    }))
}

/// GET /api/head-to-head/odds/:a/:b
pub async fn get_pair_odds(
    State(state): State<AppState>,
    Path((agent_a, agent_b)): Path<(AgentId, AgentId)>,
) -> Result<Json<PairOddsResponse>, ApiError> {
    let history = state.market.head_to_head_odds(&agent_a, &agent_b)?;
    Ok(Json(PairOddsResponse {
        agent_a,
        agent_b,
        history,
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
