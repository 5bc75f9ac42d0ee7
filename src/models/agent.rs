use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::LeagueError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    LeagueManager,
    Referee,
    Player,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::LeagueManager => "league_manager",
            AgentType::Referee => "referee",
            AgentType::Player => "player",
        }
    }

    pub fn parse(s: &str) -> Option<AgentType> {
        match s {
            "league_manager" => Some(AgentType::LeagueManager),
            "referee" => Some(AgentType::Referee),
            "player" => Some(AgentType::Player),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity half of an envelope `sender` field, `{agent_type}:{agent_id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentIdentity {
    pub agent_type: AgentType,
    pub agent_id: String,
}

impl AgentIdentity {
    pub fn new(agent_type: AgentType, agent_id: impl Into<String>) -> Self {
        Self {
            agent_type,
            agent_id: agent_id.into(),
        }
    }

    /// Parse a `{agent_type}:{agent_id}` sender string.
    pub fn parse(sender: &str) -> Result<AgentIdentity, LeagueError> {
        let (kind, id) = sender
            .split_once(':')
            .ok_or_else(|| LeagueError::Validation(format!("malformed sender '{sender}'")))?;
        let agent_type = AgentType::parse(kind)
            .ok_or_else(|| LeagueError::Validation(format!("unknown agent type '{kind}'")))?;
        if id.is_empty() {
            return Err(LeagueError::Validation("empty agent_id in sender".into()));
        }
        Ok(AgentIdentity {
            agent_type,
            agent_id: id.to_string(),
        })
    }

    pub fn sender_string(&self) -> String {
        format!("{}:{}", self.agent_type, self.agent_id)
    }
}

impl std::fmt::Display for AgentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.agent_type, self.agent_id)
    }
}

/// A registered agent as held by the league manager registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredAgent {
    pub agent_id: String,
    pub agent_type: AgentType,
    pub contact_endpoint: String,
    pub capabilities: HashSet<String>,
    pub auth_token: String,
    pub token_expires_at: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl RegisteredAgent {
    pub fn token_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.token_expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_parse_round_trip() {
        let id = AgentIdentity::parse("referee:REF01").unwrap();
        assert_eq!(id.agent_type, AgentType::Referee);
        assert_eq!(id.agent_id, "REF01");
        assert_eq!(id.sender_string(), "referee:REF01");
    }

    #[test]
    fn sender_parse_rejects_garbage() {
        assert!(AgentIdentity::parse("no-colon").is_err());
        assert!(AgentIdentity::parse("janitor:X").is_err());
        assert!(AgentIdentity::parse("player:").is_err());
    }
}
