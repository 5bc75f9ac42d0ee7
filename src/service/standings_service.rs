//! Standings aggregation: a bounded single-consumer queue serializes all
//! standings mutations across concurrent referee reports.

use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::LeagueError;
use crate::models::{
    AgentType, League, LeagueStatus, RoundStatus, ScheduledMatchStatus,
};
use crate::protocol::messages::{self, MatchResultReportParams, StandingsUpdateParams};
use crate::service::communication::RpcClient;
use crate::service::registry_service::RegistryService;
use crate::storage::Repository;

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub queue_capacity: usize,
    pub drain_timeout: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            drain_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueAck {
    Queued,
    Duplicate,
}

/// Lifecycle signals the consumer raises for the league driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundEvent {
    MatchProcessed(String),
    RoundCompleted(u32),
    LeagueCompleted,
}

pub struct StandingsAggregator {
    tx: Mutex<Option<mpsc::Sender<MatchResultReportParams>>>,
    processed: Arc<RwLock<HashSet<String>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    drain_timeout: Duration,
}

struct WorkerCtx {
    repo: Arc<Repository>,
    league: Arc<RwLock<League>>,
    registry: Arc<RegistryService>,
    client: Arc<RpcClient>,
    processed: Arc<RwLock<HashSet<String>>>,
    events: mpsc::UnboundedSender<RoundEvent>,
}

impl StandingsAggregator {
    /// Spawn the consumer worker. The returned receiver yields round and
    /// league completion events for the league driver.
    pub fn spawn(
        config: AggregatorConfig,
        repo: Arc<Repository>,
        league: Arc<RwLock<League>>,
        registry: Arc<RegistryService>,
        client: Arc<RpcClient>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<RoundEvent>) {
        let (tx, mut rx) = mpsc::channel::<MatchResultReportParams>(config.queue_capacity);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let processed: Arc<RwLock<HashSet<String>>> = Arc::new(RwLock::new(HashSet::new()));

        let ctx = WorkerCtx {
            repo,
            league,
            registry,
            client,
            processed: processed.clone(),
            events: event_tx,
        };
        let worker = tokio::spawn(async move {
            while let Some(report) = rx.recv().await {
                if let Err(e) = apply_report(&ctx, report).await {
                    // The worker must outlive individual failures; the
                    // report stays unprocessed and the referee's resend
                    // loop will deliver it again.
                    error!(error_code = %e.code(), "failed to apply report: {e}");
                }
            }
            debug!("aggregator queue drained, worker exiting");
        });

        (
            Arc::new(Self {
                tx: Mutex::new(Some(tx)),
                processed,
                worker: Mutex::new(Some(worker)),
                drain_timeout: config.drain_timeout,
            }),
            event_rx,
        )
    }

    /// Non-blocking enqueue. Duplicates of already-processed matches are
    /// acknowledged without re-queuing; a full queue is `E014` so the
    /// referee retries.
    pub async fn enqueue(
        &self,
        report: MatchResultReportParams,
    ) -> Result<EnqueueAck, LeagueError> {
        if self.processed.read().await.contains(&report.match_id) {
            debug!(match_id = %report.match_id, "duplicate report acknowledged");
            return Ok(EnqueueAck::Duplicate);
        }
        let guard = self.tx.lock().await;
        let tx = guard
            .as_ref()
            .ok_or_else(|| LeagueError::Busy("aggregator is draining".into()))?;
        tx.try_send(report).map_err(|e| match e {
            mpsc::error::TrySendError::Full(r) => {
                LeagueError::RateLimited(format!("report queue full, retry {}", r.match_id))
            }
            mpsc::error::TrySendError::Closed(_) => {
                LeagueError::Busy("aggregator stopped".into())
            }
        })?;
        Ok(EnqueueAck::Queued)
    }

    pub async fn processed_count(&self) -> usize {
        self.processed.read().await.len()
    }

    /// Refuse new enqueues, then drain what is already queued within the
    /// configured timeout.
    pub async fn shutdown(&self) {
        let tx = self.tx.lock().await.take();
        drop(tx);
        if let Some(worker) = self.worker.lock().await.take() {
            match tokio::time::timeout(self.drain_timeout, worker).await {
                Ok(_) => info!("aggregator drained cleanly"),
                Err(_) => warn!(
                    "aggregator did not drain within {:?}, abandoning queue",
                    self.drain_timeout
                ),
            }
        }
    }
}

async fn apply_report(ctx: &WorkerCtx, report: MatchResultReportParams) -> Result<(), LeagueError> {
    // Re-check at drain time: an earlier duplicate in the FIFO may have
    // already been applied.
    if ctx.processed.read().await.contains(&report.match_id) {
        debug!(match_id = %report.match_id, "skipping already-processed report");
        return Ok(());
    }

    let mut standings = ctx.repo.load_standings(&report.league_id).await?;
    standings.apply(&report.outcome);
    ctx.repo.save_standings(&standings).await?;
    ctx.processed.write().await.insert(report.match_id.clone());
    info!(
        match_id = %report.match_id,
        winner = %report.outcome.winner_player_id,
        "standings updated"
    );
    let _ = ctx
        .events
        .send(RoundEvent::MatchProcessed(report.match_id.clone()));

    let mut current_round = report.round_id;
    if let Some(mut rounds) = ctx.repo.load_rounds(&report.league_id).await? {
        if let Some(slot) = rounds.find_match_mut(&report.match_id) {
            slot.status = ScheduledMatchStatus::Finished;
        }
        let processed = ctx.processed.read().await;
        for round in &mut rounds.rounds {
            if round.status != RoundStatus::Completed
                && round
                    .matches
                    .iter()
                    .all(|m| processed.contains(&m.match_id))
            {
                round.status = RoundStatus::Completed;
                info!(round_id = round.round_id, "round completed");
                let _ = ctx.events.send(RoundEvent::RoundCompleted(round.round_id));
            }
        }
        drop(processed);
        current_round = rounds
            .rounds
            .iter()
            .find(|r| r.status != RoundStatus::Completed)
            .map(|r| r.round_id)
            .unwrap_or_else(|| rounds.rounds.last().map(|r| r.round_id).unwrap_or(1));
        let league_done = rounds.rounds.iter().all(|r| r.status == RoundStatus::Completed);
        ctx.repo.save_rounds(&rounds).await?;
        if league_done {
            ctx.league.write().await.status = LeagueStatus::Completed;
            info!(league_id = %report.league_id, "league completed");
            let _ = ctx.events.send(RoundEvent::LeagueCompleted);
        }
    }

    broadcast_standings(ctx, &report.league_id, current_round, &standings).await;
    Ok(())
}

async fn broadcast_standings(
    ctx: &WorkerCtx,
    league_id: &str,
    current_round: u32,
    standings: &crate::models::Standings,
) {
    let players = ctx.registry.agents_of_type(AgentType::Player).await;
    if players.is_empty() {
        return;
    }
    let update = StandingsUpdateParams {
        league_id: league_id.to_string(),
        current_round,
        ranking: standings.ranked(current_round),
        rows: standings.rows.clone().into_iter().collect(),
    };
    let body = match serde_json::to_value(&update) {
        Ok(body) => body,
        Err(e) => {
            error!("standings update does not serialize: {e}");
            return;
        }
    };
    let conversation_id = Uuid::new_v4().to_string();
    let sends = players.iter().map(|p| {
        let body = body.clone();
        let conversation_id = conversation_id.clone();
        async move {
            // Best-effort; the per-endpoint breaker inside the client
            // keeps dead players from slowing the worker down.
            let _ = ctx
                .client
                .notify(
                    &p.contact_endpoint,
                    messages::LEAGUE_STANDINGS_UPDATE,
                    &conversation_id,
                    body,
                )
                .await;
        }
    });
    join_all(sends).await;
}
