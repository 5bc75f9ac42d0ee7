//! Referee agent: registers with the league manager, serves START_MATCH
//! and runs concurrent match conductions up to its capacity.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::error::LeagueError;
use crate::models::{AgentIdentity, AgentType, ScoringConfig};
use crate::protocol::envelope::Envelope;
use crate::protocol::ingress::MessageDispatcher;
use crate::protocol::messages::{
    self, RegisterRefereeParams, RegistrationResult, StartMatchParams,
};
use crate::service::communication::RpcClient;
use crate::service::game_service::{GameRules, NumberDraw};
use crate::service::match_service::{self, MatchConductor};
use crate::storage::Repository;

#[derive(Debug, Clone)]
pub struct RefereeConfig {
    pub referee_id: String,
    pub lm_endpoint: String,
    pub contact_endpoint: String,
    pub max_concurrent_matches: usize,
    pub outbox_interval: Duration,
    /// Matches found non-terminal on restart are failed after this long.
    pub stale_match_grace: Duration,
}

impl Default for RefereeConfig {
    fn default() -> Self {
        Self {
            referee_id: "REF01".to_string(),
            lm_endpoint: "http://127.0.0.1:9000".to_string(),
            contact_endpoint: "http://127.0.0.1:9201".to_string(),
            max_concurrent_matches: 50,
            outbox_interval: Duration::from_secs(5),
            stale_match_grace: Duration::from_secs(300),
        }
    }
}

pub struct Referee {
    config: RefereeConfig,
    client: Arc<RpcClient>,
    repo: Arc<Repository>,
    conductor: Arc<MatchConductor>,
    active: Arc<RwLock<HashSet<String>>>,
}

impl Referee {
    pub fn new(
        config: RefereeConfig,
        client: Arc<RpcClient>,
        repo: Arc<Repository>,
        rules: Arc<dyn GameRules>,
        draw: Arc<dyn NumberDraw>,
        scoring: ScoringConfig,
    ) -> Self {
        let conductor = Arc::new(MatchConductor::new(
            client.clone(),
            repo.clone(),
            rules,
            draw,
            scoring,
            config.referee_id.clone(),
            config.lm_endpoint.clone(),
        ));
        Self {
            config,
            client,
            repo,
            conductor,
            active: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Register with the league manager and install the issued token.
    pub async fn register(&self) -> Result<RegistrationResult, LeagueError> {
        let params = RegisterRefereeParams {
            referee_id: Some(self.config.referee_id.clone()),
            contact_endpoint: self.config.contact_endpoint.clone(),
            capabilities: vec!["even_odd".to_string()],
            max_concurrent_matches: Some(self.config.max_concurrent_matches),
        };
        let conversation_id = uuid::Uuid::new_v4().to_string();
        let result = self
            .client
            .call(
                &self.config.lm_endpoint,
                messages::REGISTER_REFEREE,
                &conversation_id,
                serde_json::to_value(&params)?,
            )
            .await?;
        let registration: RegistrationResult = serde_json::from_value(result)
            .map_err(|e| LeagueError::Validation(format!("malformed registration result: {e}")))?;
        self.client.set_auth_token(&registration.auth_token).await;
        info!(referee_id = %registration.agent_id, "registered with league manager");
        Ok(registration)
    }

    /// Restart recovery: fail matches abandoned by a previous process and
    /// queue their reports.
    pub async fn recover_stale_matches(
        &self,
        scoring: &ScoringConfig,
    ) -> Result<usize, LeagueError> {
        match_service::fail_stale_matches(&self.repo, scoring, self.config.stale_match_grace).await
    }

    /// Background resend loop for reports the league manager missed.
    pub fn spawn_outbox_loop(&self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(match_service::flush_outbox(
            self.client.clone(),
            self.repo.clone(),
            self.config.lm_endpoint.clone(),
            self.config.outbox_interval,
        ))
    }

    async fn handle_start_match(
        &self,
        envelope: &Envelope,
        sender: &AgentIdentity,
        params: Value,
    ) -> Result<Value, LeagueError> {
        if sender.agent_type != AgentType::LeagueManager {
            return Err(LeagueError::IdentityMismatch(format!(
                "START_MATCH must come from the league manager, not {sender}"
            )));
        }
        if envelope.auth_token.is_none() {
            return Err(LeagueError::Auth("missing auth_token".into()));
        }
        let assignment: StartMatchParams = serde_json::from_value(params)
            .map_err(|e| LeagueError::Validation(format!("malformed START_MATCH: {e}")))?;

        {
            let mut active = self.active.write().await;
            if active.contains(&assignment.match_id) {
                // Re-dispatch of a match already in flight is a no-op.
                info!(match_id = %assignment.match_id, "duplicate START_MATCH ignored");
                return Ok(json!({ "status": "accepted", "duplicate": true }));
            }
            if self
                .repo
                .load_match_record(&assignment.match_id)
                .await?
                .is_some()
            {
                info!(match_id = %assignment.match_id, "match already conducted");
                return Ok(json!({ "status": "accepted", "duplicate": true }));
            }
            if active.len() >= self.config.max_concurrent_matches {
                return Err(LeagueError::ResourceExhausted(format!(
                    "{} concurrent matches already running",
                    active.len()
                )));
            }
            active.insert(assignment.match_id.clone());
        }

        let conductor = self.conductor.clone();
        let active = self.active.clone();
        let match_id = assignment.match_id.clone();
        tokio::spawn(async move {
            if let Err(e) = conductor.conduct(assignment).await {
                error!(match_id = %match_id, error_code = %e.code(), "match conduction failed: {e}");
            }
            active.write().await.remove(&match_id);
        });
        Ok(json!({ "status": "accepted" }))
    }
}

#[async_trait]
impl MessageDispatcher for Referee {
    async fn dispatch(
        &self,
        method: &'static str,
        envelope: &Envelope,
        params: Value,
    ) -> Result<Value, LeagueError> {
        let sender = envelope.validate()?;
        match method {
            messages::START_MATCH => self.handle_start_match(envelope, &sender, params).await,
            other => Err(LeagueError::UnknownMethod(format!(
                "{other} is not served by a referee"
            ))),
        }
    }
}
