use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LeagueError;
use crate::models::AgentIdentity;

pub const PROTOCOL_VERSION: &str = "league.v2";

lazy_static! {
    /// The single ISO 8601 UTC shape the substrate accepts. Trailing `Z` is
    /// mandatory; fractional seconds are optional.
    static ref TIMESTAMP_RE: Regex =
        Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d{1,9})?Z$").unwrap();
}

/// Common fields every league.v2 `params` payload carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    pub protocol: String,
    pub message_type: String,
    pub sender: String,
    pub timestamp: String,
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

const ENVELOPE_FIELDS: &[&str] = &[
    "protocol",
    "message_type",
    "sender",
    "timestamp",
    "conversation_id",
    "auth_token",
];

impl Envelope {
    /// Build an outbound envelope stamped with the current time.
    pub fn outbound(
        message_type: impl Into<String>,
        sender: &AgentIdentity,
        conversation_id: impl Into<String>,
        auth_token: Option<String>,
    ) -> Self {
        Self {
            protocol: PROTOCOL_VERSION.to_string(),
            message_type: message_type.into(),
            sender: sender.sender_string(),
            timestamp: Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            conversation_id: conversation_id.into(),
            auth_token,
        }
    }

    /// Split a `params` object into its envelope and the message-specific
    /// remainder. Keeping the remainder free of envelope keys lets every
    /// payload struct reject unknown fields outright.
    pub fn split_params(params: Value) -> Result<(Envelope, Value), LeagueError> {
        let Value::Object(mut message) = params else {
            return Err(LeagueError::Validation("params must be an object".into()));
        };
        let mut header = serde_json::Map::new();
        for field in ENVELOPE_FIELDS {
            if let Some(value) = message.remove(*field) {
                header.insert(field.to_string(), value);
            }
        }
        let envelope: Envelope = serde_json::from_value(Value::Object(header))
            .map_err(|e| LeagueError::Validation(format!("malformed envelope: {e}")))?;
        Ok((envelope, Value::Object(message)))
    }

    /// Structural validation: protocol version, timestamp shape, sender
    /// syntax. Authentication is the receiving agent's concern.
    pub fn validate(&self) -> Result<AgentIdentity, LeagueError> {
        if self.protocol != PROTOCOL_VERSION {
            return Err(LeagueError::Protocol(format!(
                "unsupported protocol '{}'",
                self.protocol
            )));
        }
        if !TIMESTAMP_RE.is_match(&self.timestamp) {
            return Err(LeagueError::Validation(format!(
                "timestamp '{}' is not ISO 8601 UTC with trailing Z",
                self.timestamp
            )));
        }
        if self.conversation_id.is_empty() {
            return Err(LeagueError::Validation("empty conversation_id".into()));
        }
        AgentIdentity::parse(&self.sender)
    }

    /// Merge envelope fields into an outbound message body. Body keys win on
    /// collision so message-specific fields cannot be clobbered.
    pub fn merged_into(&self, body: Value) -> Value {
        let mut merged = serde_json::to_value(self).expect("envelope serializes");
        if let (Value::Object(target), Value::Object(extra)) = (&mut merged, body) {
            for (k, v) in extra {
                target.insert(k, v);
            }
        }
        merged
    }
}
