//! Player agent: answers invitations, produces parity choices through a
//! pluggable strategy and keeps its own match history.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::LeagueError;
use crate::models::{AgentIdentity, AgentType, Parity, PlayerHistoryEntry, PlayerStatus};
use crate::protocol::envelope::Envelope;
use crate::protocol::ingress::MessageDispatcher;
use crate::protocol::messages::{
    self, ChooseParityCallParams, ChooseParityResponse, GameInvitationParams, GameJoinAck,
    GameOverParams, RegisterPlayerParams, RegistrationResult,
};
use crate::service::communication::RpcClient;
use crate::storage::Repository;

/// Everything a strategy may look at when choosing.
#[derive(Debug, Clone)]
pub struct ChoiceContext {
    pub match_id: String,
    pub league_id: String,
    pub round_id: u32,
    pub opponent_id: String,
    pub role_in_match: String,
}

/// The single pluggable decision seam.
pub trait ParityStrategy: Send + Sync {
    fn choose(&self, ctx: &ChoiceContext) -> Parity;
}

pub struct RandomStrategy;

impl ParityStrategy for RandomStrategy {
    fn choose(&self, _ctx: &ChoiceContext) -> Parity {
        if rand::thread_rng().gen_bool(0.5) {
            Parity::Even
        } else {
            Parity::Odd
        }
    }
}

/// Always plays the same parity. Handy as a baseline and in tests.
pub struct FixedStrategy(pub Parity);

impl ParityStrategy for FixedStrategy {
    fn choose(&self, _ctx: &ChoiceContext) -> Parity {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub player_id: String,
    pub lm_endpoint: String,
    pub contact_endpoint: String,
}

/// Per-match state pinned at invitation time. Later messages of the match
/// must repeat the same conversation id and referee token.
struct ActiveMatch {
    conversation_id: String,
    referee_token: String,
    invitation: GameInvitationParams,
    choice: Option<Parity>,
}

pub struct Player {
    config: PlayerConfig,
    client: Arc<RpcClient>,
    repo: Arc<Repository>,
    strategy: Arc<dyn ParityStrategy>,
    matches: RwLock<HashMap<String, ActiveMatch>>,
}

impl Player {
    pub fn new(
        config: PlayerConfig,
        client: Arc<RpcClient>,
        repo: Arc<Repository>,
        strategy: Arc<dyn ParityStrategy>,
    ) -> Self {
        Self {
            config,
            client,
            repo,
            strategy,
            matches: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self) -> Result<RegistrationResult, LeagueError> {
        let params = RegisterPlayerParams {
            player_id: Some(self.config.player_id.clone()),
            contact_endpoint: self.config.contact_endpoint.clone(),
            capabilities: vec!["even_odd".to_string()],
        };
        let conversation_id = uuid::Uuid::new_v4().to_string();
        let result = self
            .client
            .call(
                &self.config.lm_endpoint,
                messages::REGISTER_PLAYER,
                &conversation_id,
                serde_json::to_value(&params)?,
            )
            .await?;
        let registration: RegistrationResult = serde_json::from_value(result)
            .map_err(|e| LeagueError::Validation(format!("malformed registration result: {e}")))?;
        self.client.set_auth_token(&registration.auth_token).await;
        info!(player_id = %registration.agent_id, "registered with league manager");
        Ok(registration)
    }

    async fn handle_invitation(
        &self,
        envelope: &Envelope,
        sender: &AgentIdentity,
        params: Value,
    ) -> Result<Value, LeagueError> {
        if sender.agent_type != AgentType::Referee {
            return Err(LeagueError::IdentityMismatch(format!(
                "invitations come from referees, not {sender}"
            )));
        }
        let token = envelope
            .auth_token
            .clone()
            .ok_or_else(|| LeagueError::Auth("invitation carries no auth_token".into()))?;
        let invitation: GameInvitationParams = serde_json::from_value(params)
            .map_err(|e| LeagueError::Validation(format!("malformed invitation: {e}")))?;

        let mut matches = self.matches.write().await;
        if let Some(existing) = matches.get(&invitation.match_id) {
            if existing.conversation_id == envelope.conversation_id {
                // Retried invitation; same ack, no state change.
                debug!(match_id = %invitation.match_id, "duplicate invitation acknowledged");
                return Ok(self.join_ack(&invitation.match_id));
            }
        }
        info!(
            match_id = %invitation.match_id,
            conversation_id = %envelope.conversation_id,
            opponent = %invitation.opponent_id,
            "joining match"
        );
        let match_id = invitation.match_id.clone();
        matches.insert(
            match_id.clone(),
            ActiveMatch {
                conversation_id: envelope.conversation_id.clone(),
                referee_token: token,
                invitation,
                choice: None,
            },
        );
        Ok(self.join_ack(&match_id))
    }

    fn join_ack(&self, match_id: &str) -> Value {
        serde_json::to_value(GameJoinAck {
            match_id: match_id.to_string(),
            player_id: self.config.player_id.clone(),
            status: "joined".to_string(),
        })
        .expect("join ack serializes")
    }

    async fn handle_choose_parity(
        &self,
        envelope: &Envelope,
        params: Value,
    ) -> Result<Value, LeagueError> {
        let call: ChooseParityCallParams = serde_json::from_value(params)
            .map_err(|e| LeagueError::Validation(format!("malformed parity call: {e}")))?;
        let mut matches = self.matches.write().await;
        let active = matches
            .get_mut(&call.match_id)
            .ok_or_else(|| LeagueError::MatchNotFound(call.match_id.clone()))?;
        if active.conversation_id != envelope.conversation_id {
            return Err(LeagueError::ConversationMismatch(format!(
                "match {} runs under a different conversation",
                call.match_id
            )));
        }
        if envelope.auth_token.as_deref() != Some(active.referee_token.as_str()) {
            return Err(LeagueError::Auth(
                "parity call token does not match the inviting referee".into(),
            ));
        }
        let parity = match active.choice {
            Some(parity) => {
                // Redelivery returns the recorded choice unchanged.
                debug!(match_id = %call.match_id, "duplicate parity call acknowledged");
                parity
            }
            None => {
                let ctx = ChoiceContext {
                    match_id: active.invitation.match_id.clone(),
                    league_id: active.invitation.league_id.clone(),
                    round_id: active.invitation.round_id,
                    opponent_id: active.invitation.opponent_id.clone(),
                    role_in_match: active.invitation.role_in_match.clone(),
                };
                let parity = self.strategy.choose(&ctx);
                active.choice = Some(parity);
                info!(match_id = %call.match_id, choice = %parity, "parity chosen");
                parity
            }
        };
        Ok(serde_json::to_value(ChooseParityResponse {
            match_id: call.match_id,
            player_id: self.config.player_id.clone(),
            parity_choice: parity.as_str().to_string(),
        })?)
    }

    async fn handle_game_over(
        &self,
        envelope: &Envelope,
        params: Value,
    ) -> Result<Value, LeagueError> {
        let over: GameOverParams = serde_json::from_value(params)
            .map_err(|e| LeagueError::Validation(format!("malformed game over: {e}")))?;
        let mut matches = self.matches.write().await;
        let active = matches.remove(&over.match_id);
        if let Some(active) = &active {
            if active.conversation_id != envelope.conversation_id {
                matches.insert(over.match_id.clone(), restore(active));
                return Err(LeagueError::ConversationMismatch(format!(
                    "game over for {} under a foreign conversation",
                    over.match_id
                )));
            }
        }
        drop(matches);

        let status = over
            .outcome
            .statuses
            .get(&self.config.player_id)
            .copied()
            .unwrap_or(PlayerStatus::Loss);
        let points = over
            .outcome
            .points_awarded
            .get(&self.config.player_id)
            .copied()
            .unwrap_or(0);
        let (opponent_id, round_id) = match &active {
            Some(a) => (a.invitation.opponent_id.clone(), a.invitation.round_id),
            None => (
                over.outcome
                    .statuses
                    .keys()
                    .find(|p| **p != self.config.player_id)
                    .cloned()
                    .unwrap_or_default(),
                0,
            ),
        };
        if let Some(consequence) = &over.consequence {
            info!(match_id = %over.match_id, "{consequence}");
        }
        self.repo
            .append_player_history(
                &self.config.player_id,
                PlayerHistoryEntry {
                    match_id: over.match_id.clone(),
                    league_id: over.league_id.clone(),
                    round_id,
                    opponent_id,
                    status,
                    points,
                    drawn_number: over.outcome.drawn_number,
                    finished_at: Utc::now(),
                },
            )
            .await?;
        info!(match_id = %over.match_id, status = ?status, points, "match result recorded");
        Ok(json!({ "status": "ack" }))
    }
}

fn restore(active: &ActiveMatch) -> ActiveMatch {
    ActiveMatch {
        conversation_id: active.conversation_id.clone(),
        referee_token: active.referee_token.clone(),
        invitation: active.invitation.clone(),
        choice: active.choice,
    }
}

#[async_trait]
impl MessageDispatcher for Player {
    async fn dispatch(
        &self,
        method: &'static str,
        envelope: &Envelope,
        params: Value,
    ) -> Result<Value, LeagueError> {
        let sender = envelope.validate()?;
        match method {
            messages::GAME_INVITATION => self.handle_invitation(envelope, &sender, params).await,
            messages::CHOOSE_PARITY_CALL => self.handle_choose_parity(envelope, params).await,
            messages::GAME_OVER => self.handle_game_over(envelope, params).await,
            messages::LEAGUE_STANDINGS_UPDATE
            | messages::ROUND_ANNOUNCEMENT
            | messages::ROUND_COMPLETED
            | messages::LEAGUE_COMPLETED => {
                debug!(message_type = method, "league notification received");
                Ok(json!({ "status": "ok" }))
            }
            other => Err(LeagueError::UnknownMethod(format!(
                "{other} is not served by a player"
            ))),
        }
    }
}
