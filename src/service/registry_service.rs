//! In-memory agent registry and token issuance, owned by the league
//! manager. No file I/O on this path.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::LeagueError;
use crate::models::{AgentIdentity, AgentType, LeagueStatus, RegisteredAgent};

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub token_ttl: Duration,
    pub max_referees: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            token_ttl: Duration::hours(24),
            max_referees: 8,
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    agents: HashMap<String, RegisteredAgent>,
    /// contact endpoint -> agent_id, to catch two identities sharing one
    /// physical endpoint.
    endpoints: HashMap<String, String>,
}

pub struct RegistryService {
    config: RegistryConfig,
    inner: RwLock<RegistryInner>,
}

impl RegistryService {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Register (or re-register) an agent. Referees refresh their token on
    /// re-registration; players get the same token back while the league is
    /// still PENDING and are rejected once it is ACTIVE.
    pub async fn register(
        &self,
        agent_type: AgentType,
        requested_id: Option<String>,
        contact_endpoint: String,
        capabilities: Vec<String>,
        league_status: LeagueStatus,
    ) -> Result<RegisteredAgent, LeagueError> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;

        let agent_id = requested_id.unwrap_or_else(|| generated_id(agent_type));

        if let Some(owner) = inner.endpoints.get(&contact_endpoint) {
            if *owner != agent_id {
                return Err(LeagueError::DuplicateEndpoint(format!(
                    "{contact_endpoint} already belongs to {owner}"
                )));
            }
        }

        if let Some(existing) = inner.agents.get(&agent_id) {
            if existing.agent_type != agent_type {
                return Err(LeagueError::Registration(format!(
                    "{agent_id} is registered as a {}",
                    existing.agent_type
                )));
            }
            match agent_type {
                AgentType::Player => {
                    if league_status == LeagueStatus::Active {
                        return Err(LeagueError::LeagueState(
                            "league is active, registration is closed".into(),
                        ));
                    }
                    if existing.token_valid(now) {
                        return Ok(existing.clone());
                    }
                }
                AgentType::Referee | AgentType::LeagueManager => {}
            }
            // Expired player token or referee re-registration: issue a
            // fresh token on the existing identity.
            let mut refreshed = existing.clone();
            refreshed.auth_token = generate_token();
            refreshed.token_expires_at = now + self.config.token_ttl;
            refreshed.contact_endpoint = contact_endpoint.clone();
            inner.endpoints.insert(contact_endpoint, agent_id.clone());
            inner.agents.insert(agent_id.clone(), refreshed.clone());
            info!(agent_id = %agent_id, agent_type = %agent_type, "token refreshed");
            return Ok(refreshed);
        }

        if agent_type == AgentType::Player && league_status == LeagueStatus::Active {
            return Err(LeagueError::LeagueState(
                "league is active, registration is closed".into(),
            ));
        }
        if agent_type == AgentType::Referee {
            let referees = inner
                .agents
                .values()
                .filter(|a| a.agent_type == AgentType::Referee)
                .count();
            if referees >= self.config.max_referees {
                return Err(LeagueError::ResourceExhausted(format!(
                    "referee capacity of {} reached",
                    self.config.max_referees
                )));
            }
        }

        let agent = RegisteredAgent {
            agent_id: agent_id.clone(),
            agent_type,
            contact_endpoint: contact_endpoint.clone(),
            capabilities: capabilities.into_iter().collect(),
            auth_token: generate_token(),
            token_expires_at: now + self.config.token_ttl,
            registered_at: now,
        };
        inner.endpoints.insert(contact_endpoint, agent_id.clone());
        inner.agents.insert(agent_id.clone(), agent.clone());
        info!(agent_id = %agent_id, agent_type = %agent_type, "agent registered");
        Ok(agent)
    }

    /// Check a sender's token against the issued one. `E012` for unknown,
    /// mismatched or expired tokens; `E003` when the token belongs to a
    /// different agent type than the sender claims.
    pub async fn authenticate(
        &self,
        identity: &AgentIdentity,
        token: Option<&str>,
    ) -> Result<DateTime<Utc>, LeagueError> {
        let token = token.ok_or_else(|| LeagueError::Auth("missing auth_token".into()))?;
        let inner = self.inner.read().await;
        let agent = inner
            .agents
            .get(&identity.agent_id)
            .ok_or_else(|| LeagueError::Auth(format!("unknown agent {}", identity.agent_id)))?;
        if agent.agent_type != identity.agent_type {
            return Err(LeagueError::IdentityMismatch(format!(
                "{} is registered as a {}",
                identity.agent_id, agent.agent_type
            )));
        }
        if agent.auth_token != token {
            return Err(LeagueError::Auth("token mismatch".into()));
        }
        if !agent.token_valid(Utc::now()) {
            return Err(LeagueError::Auth("token expired".into()));
        }
        Ok(agent.token_expires_at)
    }

    pub async fn endpoint_of(&self, agent_id: &str) -> Option<String> {
        self.inner
            .read()
            .await
            .agents
            .get(agent_id)
            .map(|a| a.contact_endpoint.clone())
    }

    pub async fn agents_of_type(&self, agent_type: AgentType) -> Vec<RegisteredAgent> {
        let mut agents: Vec<RegisteredAgent> = self
            .inner
            .read()
            .await
            .agents
            .values()
            .filter(|a| a.agent_type == agent_type)
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    /// Drop agents whose tokens have expired. Returns how many were
    /// removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        let expired: Vec<String> = inner
            .agents
            .values()
            .filter(|a| !a.token_valid(now))
            .map(|a| a.agent_id.clone())
            .collect();
        for agent_id in &expired {
            if let Some(agent) = inner.agents.remove(agent_id) {
                inner.endpoints.remove(&agent.contact_endpoint);
                info!(agent_id = %agent_id, "registration expired");
            }
        }
        expired.len()
    }
}

fn generated_id(agent_type: AgentType) -> String {
    let prefix = match agent_type {
        AgentType::LeagueManager => "LM",
        AgentType::Referee => "REF",
        AgentType::Player => "P",
    };
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &suffix[..8])
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
