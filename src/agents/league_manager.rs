//! League manager: registry, schedule, round lifecycle and the standings
//! aggregator, behind one RPC dispatch surface.

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::LeagueError;
use crate::models::{
    AgentIdentity, AgentType, League, LeagueStatus, RegisteredAgent, RoundsFile,
};
use crate::protocol::envelope::Envelope;
use crate::protocol::ingress::MessageDispatcher;
use crate::protocol::messages::{
    self, LeagueQueryParams, MatchResultReportParams, PlayerRef, RegisterPlayerParams,
    RegisterRefereeParams, RegistrationResult, RoundAnnouncementParams, StartMatchParams,
};
use crate::service::communication::RpcClient;
use crate::service::registry_service::{RegistryConfig, RegistryService};
use crate::service::scheduler_service::{build_schedule, ScheduleIndex};
use crate::service::standings_service::{
    AggregatorConfig, EnqueueAck, RoundEvent, StandingsAggregator,
};
use crate::storage::Repository;

#[derive(Debug, Clone)]
pub struct LeagueManagerConfig {
    pub league_id: String,
    pub game_type: String,
    pub min_players: usize,
    pub max_players: usize,
    pub registry: RegistryConfig,
    pub aggregator: AggregatorConfig,
    /// Fallback per-referee concurrency when registration does not name one.
    pub default_referee_capacity: usize,
}

impl Default for LeagueManagerConfig {
    fn default() -> Self {
        Self {
            league_id: "league-1".to_string(),
            game_type: "even_odd".to_string(),
            min_players: 2,
            max_players: 64,
            registry: RegistryConfig::default(),
            aggregator: AggregatorConfig::default(),
            default_referee_capacity: 50,
        }
    }
}

/// Live league machinery, created by `start_league`.
struct LeagueRuntime {
    schedule: Arc<ScheduleIndex>,
    aggregator: Arc<StandingsAggregator>,
}

pub struct LeagueManager {
    config: LeagueManagerConfig,
    league: Arc<RwLock<League>>,
    registry: Arc<RegistryService>,
    repo: Arc<Repository>,
    client: Arc<RpcClient>,
    runtime: RwLock<Option<LeagueRuntime>>,
    referee_capacities: RwLock<HashMap<String, usize>>,
    last_reports: RwLock<HashMap<String, MatchResultReportParams>>,
}

impl LeagueManager {
    pub fn new(config: LeagueManagerConfig, repo: Arc<Repository>, client: Arc<RpcClient>) -> Self {
        let mut league = League::new(&config.league_id, &config.game_type);
        league.min_players = config.min_players;
        league.max_players = config.max_players;
        Self {
            registry: Arc::new(RegistryService::new(config.registry.clone())),
            league: Arc::new(RwLock::new(league)),
            repo,
            client,
            runtime: RwLock::new(None),
            referee_capacities: RwLock::new(HashMap::new()),
            last_reports: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn registry(&self) -> Arc<RegistryService> {
        self.registry.clone()
    }

    pub async fn league_status(&self) -> LeagueStatus {
        self.league.read().await.status
    }

    /// Drain the aggregator before exit; new reports are refused while
    /// draining.
    pub async fn shutdown(&self) {
        if let Some(runtime) = self.runtime.read().await.as_ref() {
            runtime.aggregator.shutdown().await;
        }
    }

    async fn handle_register_player(
        &self,
        params: Value,
    ) -> Result<Value, LeagueError> {
        let request: RegisterPlayerParams = parse_params(params)?;
        let status = self.league.read().await.status;
        {
            let league = self.league.read().await;
            let is_new = request
                .player_id
                .as_ref()
                .map(|id| !league.registered_players.contains(id))
                .unwrap_or(true);
            if is_new && league.registered_players.len() >= league.max_players {
                return Err(LeagueError::LeagueState(format!(
                    "league is full ({} players)",
                    league.max_players
                )));
            }
        }
        let agent = self
            .registry
            .register(
                AgentType::Player,
                request.player_id,
                request.contact_endpoint,
                request.capabilities,
                status,
            )
            .await?;
        self.league
            .write()
            .await
            .registered_players
            .insert(agent.agent_id.clone());
        Ok(registration_result(&agent, &self.config.league_id))
    }

    async fn handle_register_referee(
        &self,
        params: Value,
    ) -> Result<Value, LeagueError> {
        let request: RegisterRefereeParams = parse_params(params)?;
        let status = self.league.read().await.status;
        let capacity = request
            .max_concurrent_matches
            .unwrap_or(self.config.default_referee_capacity);
        let agent = self
            .registry
            .register(
                AgentType::Referee,
                request.referee_id,
                request.contact_endpoint,
                request.capabilities,
                status,
            )
            .await?;
        self.referee_capacities
            .write()
            .await
            .insert(agent.agent_id.clone(), capacity.max(1));
        self.league
            .write()
            .await
            .assigned_referees
            .insert(agent.agent_id.clone());
        Ok(registration_result(&agent, &self.config.league_id))
    }

    async fn handle_match_result(
        &self,
        sender: &AgentIdentity,
        params: Value,
    ) -> Result<Value, LeagueError> {
        let report: MatchResultReportParams = parse_params(params)?;
        if report.league_id != self.config.league_id {
            return Err(LeagueError::LeagueNotFound(report.league_id));
        }
        let runtime = self.runtime.read().await;
        let runtime = runtime
            .as_ref()
            .ok_or_else(|| LeagueError::LeagueNotFound("league has not started".into()))?;
        let scheduled = runtime
            .schedule
            .lookup(&report.match_id)
            .ok_or_else(|| LeagueError::MatchNotFound(report.match_id.clone()))?;
        // Only the referee the schedule assigned may report this match.
        if scheduled.referee_id != sender.agent_id {
            return Err(LeagueError::Registration(format!(
                "match {} is assigned to {}, not {}",
                report.match_id, scheduled.referee_id, sender.agent_id
            )));
        }
        self.last_reports
            .write()
            .await
            .insert(report.match_id.clone(), report.clone());
        match runtime.aggregator.enqueue(report).await? {
            EnqueueAck::Queued => Ok(json!({ "status": "queued" })),
            EnqueueAck::Duplicate => Ok(json!({ "status": "ack", "duplicate": true })),
        }
    }

    async fn handle_league_query(&self, params: Value) -> Result<Value, LeagueError> {
        let query: LeagueQueryParams = parse_params(params)?;
        if let Some(league_id) = query.league_id {
            if league_id != self.config.league_id {
                return Err(LeagueError::LeagueNotFound(league_id));
            }
        }
        let league = self.league.read().await.clone();
        let standings = self.repo.load_standings(&league.league_id).await?;
        let current_round = self
            .repo
            .load_rounds(&league.league_id)
            .await?
            .map(|r| current_round_of(&r))
            .unwrap_or(1);
        Ok(json!({
            "league_id": league.league_id,
            "status": league.status,
            "current_round": current_round,
            "ranking": standings.ranked(current_round),
            "standings": standings.rows,
        }))
    }

    async fn handle_start_league(&self) -> Result<Value, LeagueError> {
        {
            let league = self.league.read().await;
            match league.status {
                LeagueStatus::Pending => {}
                LeagueStatus::Active => {
                    return Err(LeagueError::LeagueState("league already active".into()))
                }
                LeagueStatus::Completed => {
                    return Err(LeagueError::LeagueState("league already completed".into()))
                }
            }
            if league.registered_players.len() < league.min_players {
                return Err(LeagueError::LeagueNotFound(format!(
                    "need {} players, have {}",
                    league.min_players,
                    league.registered_players.len()
                )));
            }
        }

        let players: Vec<String> = {
            let league = self.league.read().await;
            league.registered_players.iter().cloned().collect()
        };
        let referees: Vec<String> = self
            .registry
            .agents_of_type(AgentType::Referee)
            .await
            .into_iter()
            .map(|r| r.agent_id)
            .collect();

        let rounds = build_schedule(&self.config.league_id, &players, &referees)?;
        self.repo.save_rounds(&rounds).await?;
        let schedule = Arc::new(ScheduleIndex::from_rounds(&rounds));

        self.league.write().await.status = LeagueStatus::Active;
        info!(
            league_id = %self.config.league_id,
            rounds = rounds.rounds.len(),
            matches = schedule.total_matches(),
            "league started"
        );

        let (aggregator, events) = StandingsAggregator::spawn(
            self.config.aggregator.clone(),
            self.repo.clone(),
            self.league.clone(),
            self.registry.clone(),
            self.client.clone(),
        );
        // The runtime must be visible to report handlers before the first
        // START_MATCH goes out.
        *self.runtime.write().await = Some(LeagueRuntime {
            schedule,
            aggregator,
        });
        tokio::spawn(run_league(
            DriverCtx {
                league_id: self.config.league_id.clone(),
                game_type: self.config.game_type.clone(),
                registry: self.registry.clone(),
                client: self.client.clone(),
                capacities: self.referee_capacities.read().await.clone(),
                default_capacity: self.config.default_referee_capacity,
                rounds: rounds.clone(),
            },
            events,
        ));

        Ok(json!({
            "status": "started",
            "league_id": self.config.league_id,
            "rounds": rounds.rounds.len(),
            "matches": rounds.total_matches(),
        }))
    }

    async fn handle_league_status(&self) -> Result<Value, LeagueError> {
        let league = self.league.read().await.clone();
        let rounds = self.repo.load_rounds(&league.league_id).await?;
        Ok(json!({
            "league_id": league.league_id,
            "status": league.status,
            "players": league.registered_players,
            "referees": league.assigned_referees,
            "rounds": rounds.map(|r| {
                r.rounds
                    .iter()
                    .map(|round| json!({
                        "round_id": round.round_id,
                        "status": round.status,
                        "matches": round.matches.len(),
                    }))
                    .collect::<Vec<_>>()
            }),
        }))
    }

    async fn handle_match_state(&self, params: Value) -> Result<Value, LeagueError> {
        let match_id = params
            .get("match_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LeagueError::Validation("match_id is required".into()))?;
        if let Some(report) = self.last_reports.read().await.get(match_id) {
            return Ok(json!({
                "match_id": match_id,
                "state": report.state,
                "outcome": report.outcome,
            }));
        }
        let runtime = self.runtime.read().await;
        let scheduled = runtime
            .as_ref()
            .and_then(|r| r.schedule.lookup(match_id).cloned())
            .ok_or_else(|| LeagueError::MatchNotFound(match_id.to_string()))?;
        Ok(json!({
            "match_id": match_id,
            "state": "SCHEDULED",
            "players": scheduled.players,
            "referee_id": scheduled.referee_id,
        }))
    }

    async fn handle_registration_status(&self) -> Result<Value, LeagueError> {
        let league = self.league.read().await.clone();
        Ok(json!({
            "league_id": league.league_id,
            "status": league.status,
            "player_count": league.registered_players.len(),
            "min_players": league.min_players,
            "max_players": league.max_players,
            "referee_count": league.assigned_referees.len(),
        }))
    }
}

#[async_trait]
impl MessageDispatcher for LeagueManager {
    async fn dispatch(
        &self,
        method: &'static str,
        envelope: &Envelope,
        params: Value,
    ) -> Result<Value, LeagueError> {
        let sender = envelope.validate()?;
        if !messages::is_auth_exempt(method) {
            self.registry
                .authenticate(&sender, envelope.auth_token.as_deref())
                .await?;
        }
        match method {
            messages::REGISTER_PLAYER => self.handle_register_player(params).await,
            messages::REGISTER_REFEREE => self.handle_register_referee(params).await,
            messages::MATCH_RESULT_REPORT => self.handle_match_result(&sender, params).await,
            messages::LEAGUE_QUERY => self.handle_league_query(params).await,
            messages::START_LEAGUE => self.handle_start_league().await,
            messages::GET_LEAGUE_STATUS => self.handle_league_status().await,
            messages::GET_MATCH_STATE => self.handle_match_state(params).await,
            messages::GET_REGISTRATION_STATUS => self.handle_registration_status().await,
            other => Err(LeagueError::UnknownMethod(format!(
                "{other} is not served by the league manager"
            ))),
        }
    }
}

struct DriverCtx {
    league_id: String,
    game_type: String,
    registry: Arc<RegistryService>,
    client: Arc<RpcClient>,
    capacities: HashMap<String, usize>,
    default_capacity: usize,
    rounds: RoundsFile,
}

/// Round lifecycle driver: announce, dispatch in capacity-bounded waves,
/// wait for the aggregator's completion events, move on.
async fn run_league(ctx: DriverCtx, mut events: mpsc::UnboundedReceiver<RoundEvent>) {
    let mut processed: HashSet<String> = HashSet::new();
    for round in &ctx.rounds.rounds {
        info!(round_id = round.round_id, "announcing round");
        broadcast_to_players(
            &ctx,
            messages::ROUND_ANNOUNCEMENT,
            serde_json::to_value(RoundAnnouncementParams {
                league_id: ctx.league_id.clone(),
                round_id: round.round_id,
                match_count: round.matches.len(),
            })
            .unwrap_or_else(|_| json!({})),
        )
        .await;

        for wave in capacity_waves(round, &ctx.capacities, ctx.default_capacity) {
            let mut awaited: HashSet<String> = HashSet::new();
            let dispatches = wave.iter().map(|m| dispatch_match(&ctx, round.round_id, m));
            for (m, result) in wave.iter().zip(join_all(dispatches).await) {
                match result {
                    Ok(()) => {
                        awaited.insert(m.match_id.clone());
                    }
                    Err(e) => error!(
                        match_id = %m.match_id,
                        referee_id = %m.referee_id,
                        error_code = %e.code(),
                        "failed to dispatch match: {e}"
                    ),
                }
            }
            // Wait for every dispatched match of this wave before opening
            // the next one, so referee concurrency stays bounded.
            while !awaited.is_subset(&processed) {
                match events.recv().await {
                    Some(RoundEvent::MatchProcessed(match_id)) => {
                        processed.insert(match_id);
                    }
                    Some(RoundEvent::RoundCompleted(round_id)) => {
                        announce_round_completed(&ctx, round_id).await;
                    }
                    Some(RoundEvent::LeagueCompleted) => {
                        finish_league(&ctx).await;
                        return;
                    }
                    None => return,
                }
            }
        }
    }
    // All waves dispatched; drain remaining lifecycle events.
    while let Some(event) = events.recv().await {
        match event {
            RoundEvent::MatchProcessed(_) => {}
            RoundEvent::RoundCompleted(round_id) => announce_round_completed(&ctx, round_id).await,
            RoundEvent::LeagueCompleted => {
                finish_league(&ctx).await;
                return;
            }
        }
    }
}

/// Split a round into dispatch waves so no referee exceeds its concurrent
/// match budget within a wave.
fn capacity_waves<'a>(
    round: &'a crate::models::Round,
    capacities: &HashMap<String, usize>,
    default_capacity: usize,
) -> Vec<Vec<&'a crate::models::ScheduledMatch>> {
    let mut waves: Vec<Vec<&crate::models::ScheduledMatch>> = Vec::new();
    let mut per_referee_seen: HashMap<&str, usize> = HashMap::new();
    for m in &round.matches {
        let capacity = capacities
            .get(&m.referee_id)
            .copied()
            .unwrap_or(default_capacity)
            .max(1);
        let seen = per_referee_seen.entry(m.referee_id.as_str()).or_insert(0);
        let wave_index = *seen / capacity;
        *seen += 1;
        if waves.len() <= wave_index {
            waves.resize_with(wave_index + 1, Vec::new);
        }
        waves[wave_index].push(m);
    }
    waves
}

async fn dispatch_match(
    ctx: &DriverCtx,
    round_id: u32,
    m: &crate::models::ScheduledMatch,
) -> Result<(), LeagueError> {
    let referee_endpoint = ctx
        .registry
        .endpoint_of(&m.referee_id)
        .await
        .ok_or_else(|| LeagueError::AgentUnavailable(format!("referee {}", m.referee_id)))?;
    let mut players = Vec::with_capacity(2);
    for player_id in &m.players {
        let endpoint = ctx
            .registry
            .endpoint_of(player_id)
            .await
            .ok_or_else(|| LeagueError::AgentUnavailable(format!("player {player_id}")))?;
        players.push(PlayerRef {
            player_id: player_id.clone(),
            endpoint,
        });
    }
    let assignment = StartMatchParams {
        match_id: m.match_id.clone(),
        round_id,
        league_id: ctx.league_id.clone(),
        game_type: ctx.game_type.clone(),
        players,
    };
    let conversation_id = Uuid::new_v4().to_string();
    ctx.client
        .call(
            &referee_endpoint,
            messages::START_MATCH,
            &conversation_id,
            serde_json::to_value(&assignment)?,
        )
        .await?;
    info!(match_id = %m.match_id, referee_id = %m.referee_id, "match dispatched");
    Ok(())
}

async fn announce_round_completed(ctx: &DriverCtx, round_id: u32) {
    broadcast_to_players(
        ctx,
        messages::ROUND_COMPLETED,
        json!({ "league_id": ctx.league_id, "round_id": round_id }),
    )
    .await;
}

async fn finish_league(ctx: &DriverCtx) {
    info!(league_id = %ctx.league_id, "broadcasting league completion");
    broadcast_to_players(
        ctx,
        messages::LEAGUE_COMPLETED,
        json!({ "league_id": ctx.league_id }),
    )
    .await;
}

async fn broadcast_to_players(ctx: &DriverCtx, method: &'static str, body: Value) {
    let players = ctx.registry.agents_of_type(AgentType::Player).await;
    let conversation_id = Uuid::new_v4().to_string();
    let sends = players.iter().map(|p| {
        let body = body.clone();
        let conversation_id = conversation_id.clone();
        async move {
            if let Err(e) = ctx
                .client
                .notify(&p.contact_endpoint, method, &conversation_id, body)
                .await
            {
                warn!(player = %p.agent_id, error_code = %e.code(), "broadcast skipped");
            }
        }
    });
    join_all(sends).await;
}

fn registration_result(agent: &RegisteredAgent, league_id: &str) -> Value {
    serde_json::to_value(RegistrationResult {
        agent_id: agent.agent_id.clone(),
        auth_token: agent.auth_token.clone(),
        league_id: league_id.to_string(),
        token_expires_at: agent
            .token_expires_at
            .format("%Y-%m-%dT%H:%M:%S%.3fZ")
            .to_string(),
    })
    .expect("registration result serializes")
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, LeagueError> {
    serde_json::from_value(params)
        .map_err(|e| LeagueError::Validation(format!("malformed params: {e}")))
}

fn current_round_of(rounds: &RoundsFile) -> u32 {
    rounds
        .rounds
        .iter()
        .find(|r| r.status != crate::models::RoundStatus::Completed)
        .map(|r| r.round_id)
        .unwrap_or_else(|| rounds.rounds.last().map(|r| r.round_id).unwrap_or(1))
}
