use serde::{Deserialize, Serialize};
use thiserror::Error;

/// League protocol error codes carried in the `data.error_code` field of
/// JSON-RPC error objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    E001,
    E002,
    E003,
    E004,
    E005,
    E006,
    E007,
    E008,
    E009,
    E010,
    E011,
    E012,
    E013,
    E014,
    E015,
    E016,
    E017,
    E018,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::E001 => "E001",
            ErrorCode::E002 => "E002",
            ErrorCode::E003 => "E003",
            ErrorCode::E004 => "E004",
            ErrorCode::E005 => "E005",
            ErrorCode::E006 => "E006",
            ErrorCode::E007 => "E007",
            ErrorCode::E008 => "E008",
            ErrorCode::E009 => "E009",
            ErrorCode::E010 => "E010",
            ErrorCode::E011 => "E011",
            ErrorCode::E012 => "E012",
            ErrorCode::E013 => "E013",
            ErrorCode::E014 => "E014",
            ErrorCode::E015 => "E015",
            ErrorCode::E016 => "E016",
            ErrorCode::E017 => "E017",
            ErrorCode::E018 => "E018",
        }
    }

    pub fn parse(s: &str) -> Option<ErrorCode> {
        match s {
            "E001" => Some(ErrorCode::E001),
            "E002" => Some(ErrorCode::E002),
            "E003" => Some(ErrorCode::E003),
            "E004" => Some(ErrorCode::E004),
            "E005" => Some(ErrorCode::E005),
            "E006" => Some(ErrorCode::E006),
            "E007" => Some(ErrorCode::E007),
            "E008" => Some(ErrorCode::E008),
            "E009" => Some(ErrorCode::E009),
            "E010" => Some(ErrorCode::E010),
            "E011" => Some(ErrorCode::E011),
            "E012" => Some(ErrorCode::E012),
            "E013" => Some(ErrorCode::E013),
            "E014" => Some(ErrorCode::E014),
            "E015" => Some(ErrorCode::E015),
            "E016" => Some(ErrorCode::E016),
            "E017" => Some(ErrorCode::E017),
            "E018" => Some(ErrorCode::E018),
            _ => None,
        }
    }

    /// Codes the RPC client is allowed to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::E001
                | ErrorCode::E005
                | ErrorCode::E006
                | ErrorCode::E009
                | ErrorCode::E014
                | ErrorCode::E015
                | ErrorCode::E016
        )
    }

    /// Numeric JSON-RPC error code for the wire.
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            ErrorCode::E012 | ErrorCode::E003 => -32001,
            ErrorCode::E002 => -32602,
            ErrorCode::E011 => -32600,
            ErrorCode::E018 => -32601,
            _ => -32000,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum LeagueError {
    #[error("deadline exceeded: {0}")]
    Timeout(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("sender identity mismatch: {0}")]
    IdentityMismatch(String),

    #[error("registration rejected: {0}")]
    Registration(String),

    #[error("league state does not permit this: {0}")]
    LeagueState(String),

    #[error("agent unavailable: {0}")]
    AgentUnavailable(String),

    #[error("match not found: {0}")]
    MatchNotFound(String),

    #[error("league not found or not startable: {0}")]
    LeagueNotFound(String),

    #[error("service busy: {0}")]
    Busy(String),

    #[error("invalid move: {0}")]
    InvalidMove(String),

    #[error("unsupported protocol: {0}")]
    Protocol(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("conversation mismatch: {0}")]
    ConversationMismatch(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("resources exhausted: {0}")]
    ResourceExhausted(String),

    #[error("circuit open for endpoint {0}")]
    CircuitOpen(String),

    #[error("endpoint already registered: {0}")]
    DuplicateEndpoint(String),

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LeagueError {
    pub fn code(&self) -> ErrorCode {
        match self {
            LeagueError::Timeout(_) => ErrorCode::E001,
            LeagueError::Validation(_) => ErrorCode::E002,
            LeagueError::IdentityMismatch(_) => ErrorCode::E003,
            LeagueError::Registration(_) => ErrorCode::E004,
            LeagueError::LeagueState(_) => ErrorCode::E005,
            LeagueError::AgentUnavailable(_) => ErrorCode::E006,
            LeagueError::MatchNotFound(_) => ErrorCode::E007,
            LeagueError::LeagueNotFound(_) => ErrorCode::E008,
            LeagueError::Busy(_) => ErrorCode::E009,
            LeagueError::InvalidMove(_) => ErrorCode::E010,
            LeagueError::Protocol(_) => ErrorCode::E011,
            LeagueError::Auth(_) => ErrorCode::E012,
            LeagueError::ConversationMismatch(_) => ErrorCode::E013,
            LeagueError::RateLimited(_) => ErrorCode::E014,
            LeagueError::ResourceExhausted(_) => ErrorCode::E015,
            LeagueError::CircuitOpen(_) => ErrorCode::E016,
            LeagueError::DuplicateEndpoint(_) => ErrorCode::E017,
            LeagueError::UnknownMethod(_) => ErrorCode::E018,
            LeagueError::Io(_) => ErrorCode::E015,
            LeagueError::Serialization(_) => ErrorCode::E002,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    /// Rebuild an error from a wire `(error_code, message)` pair, as decoded
    /// from a JSON-RPC error object.
    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            ErrorCode::E001 => LeagueError::Timeout(message),
            ErrorCode::E002 => LeagueError::Validation(message),
            ErrorCode::E003 => LeagueError::IdentityMismatch(message),
            ErrorCode::E004 => LeagueError::Registration(message),
            ErrorCode::E005 => LeagueError::LeagueState(message),
            ErrorCode::E006 => LeagueError::AgentUnavailable(message),
            ErrorCode::E007 => LeagueError::MatchNotFound(message),
            ErrorCode::E008 => LeagueError::LeagueNotFound(message),
            ErrorCode::E009 => LeagueError::Busy(message),
            ErrorCode::E010 => LeagueError::InvalidMove(message),
            ErrorCode::E011 => LeagueError::Protocol(message),
            ErrorCode::E012 => LeagueError::Auth(message),
            ErrorCode::E013 => LeagueError::ConversationMismatch(message),
            ErrorCode::E014 => LeagueError::RateLimited(message),
            ErrorCode::E015 => LeagueError::ResourceExhausted(message),
            ErrorCode::E016 => LeagueError::CircuitOpen(message),
            ErrorCode::E017 => LeagueError::DuplicateEndpoint(message),
            ErrorCode::E018 => LeagueError::UnknownMethod(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_set_matches_policy() {
        let retryable = [
            ErrorCode::E001,
            ErrorCode::E005,
            ErrorCode::E006,
            ErrorCode::E009,
            ErrorCode::E014,
            ErrorCode::E015,
            ErrorCode::E016,
        ];
        let terminal = [
            ErrorCode::E002,
            ErrorCode::E003,
            ErrorCode::E004,
            ErrorCode::E010,
            ErrorCode::E011,
            ErrorCode::E012,
            ErrorCode::E017,
            ErrorCode::E018,
        ];
        for code in retryable {
            assert!(code.is_retryable(), "{code} should be retryable");
        }
        for code in terminal {
            assert!(!code.is_retryable(), "{code} must never be retried");
        }
    }

    #[test]
    fn jsonrpc_mapping() {
        assert_eq!(ErrorCode::E001.jsonrpc_code(), -32000);
        assert_eq!(ErrorCode::E003.jsonrpc_code(), -32001);
        assert_eq!(ErrorCode::E012.jsonrpc_code(), -32001);
        assert_eq!(ErrorCode::E002.jsonrpc_code(), -32602);
        assert_eq!(ErrorCode::E011.jsonrpc_code(), -32600);
        assert_eq!(ErrorCode::E018.jsonrpc_code(), -32601);
        assert_eq!(ErrorCode::E007.jsonrpc_code(), -32000);
    }

    #[test]
    fn wire_round_trip() {
        let err = LeagueError::Auth("bad token".into());
        let rebuilt = LeagueError::from_code(err.code(), err.to_string());
        assert_eq!(rebuilt.code(), ErrorCode::E012);
    }
}
