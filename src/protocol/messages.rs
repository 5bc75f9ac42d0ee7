use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::models::{MatchOutcome, MatchState};

// Canonical message types.
pub const REGISTER_PLAYER: &str = "REGISTER_PLAYER";
pub const REGISTER_REFEREE: &str = "REGISTER_REFEREE";
pub const START_MATCH: &str = "START_MATCH";
pub const GAME_INVITATION: &str = "GAME_INVITATION";
pub const GAME_JOIN_ACK: &str = "GAME_JOIN_ACK";
pub const CHOOSE_PARITY_CALL: &str = "CHOOSE_PARITY_CALL";
pub const CHOOSE_PARITY_RESPONSE: &str = "CHOOSE_PARITY_RESPONSE";
pub const GAME_OVER: &str = "GAME_OVER";
pub const MATCH_RESULT_REPORT: &str = "MATCH_RESULT_REPORT";
pub const LEAGUE_QUERY: &str = "LEAGUE_QUERY";
pub const LEAGUE_STANDINGS_UPDATE: &str = "LEAGUE_STANDINGS_UPDATE";
pub const ROUND_ANNOUNCEMENT: &str = "ROUND_ANNOUNCEMENT";
pub const ROUND_COMPLETED: &str = "ROUND_COMPLETED";
pub const LEAGUE_COMPLETED: &str = "LEAGUE_COMPLETED";

// Operator surface, canonical in lowercase.
pub const START_LEAGUE: &str = "start_league";
pub const GET_LEAGUE_STATUS: &str = "get_league_status";
pub const GET_MATCH_STATE: &str = "get_match_state";
pub const GET_REGISTRATION_STATUS: &str = "get_registration_status";

const CANONICAL: &[&str] = &[
    REGISTER_PLAYER,
    REGISTER_REFEREE,
    START_MATCH,
    GAME_INVITATION,
    GAME_JOIN_ACK,
    CHOOSE_PARITY_CALL,
    CHOOSE_PARITY_RESPONSE,
    GAME_OVER,
    MATCH_RESULT_REPORT,
    LEAGUE_QUERY,
    LEAGUE_STANDINGS_UPDATE,
    ROUND_ANNOUNCEMENT,
    ROUND_COMPLETED,
    LEAGUE_COMPLETED,
    START_LEAGUE,
    GET_LEAGUE_STATUS,
    GET_MATCH_STATE,
    GET_REGISTRATION_STATUS,
];

/// Fixed alias map from tool-style names to canonical message types.
const ALIASES: &[(&str, &str)] = &[
    ("handle_game_invitation", GAME_INVITATION),
    ("choose_parity", CHOOSE_PARITY_CALL),
    ("notify_match_result", GAME_OVER),
    ("register_player", REGISTER_PLAYER),
    ("register_referee", REGISTER_REFEREE),
    ("report_match_result", MATCH_RESULT_REPORT),
    ("league_query", LEAGUE_QUERY),
    ("get_standings", LEAGUE_QUERY),
];

/// Resolve an inbound method name to its canonical message type.
pub fn canonicalize(method: &str) -> Option<&'static str> {
    if let Some(canonical) = CANONICAL.iter().copied().find(|m| *m == method) {
        return Some(canonical);
    }
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == method)
        .map(|(_, canonical)| *canonical)
}

/// Registration methods are the only calls accepted without an auth token
/// from agents; operator methods are accepted without one because the
/// operator CLI never registers.
pub fn is_auth_exempt(canonical_method: &str) -> bool {
    matches!(
        canonical_method,
        REGISTER_PLAYER
            | REGISTER_REFEREE
            | START_LEAGUE
            | GET_LEAGUE_STATUS
            | GET_MATCH_STATE
            | GET_REGISTRATION_STATUS
            | LEAGUE_QUERY
    )
}

/// Server-side completion budget per method class. Clients use the same
/// budget for their own timeouts.
pub fn method_deadline(canonical_method: &str) -> Duration {
    match canonical_method {
        REGISTER_PLAYER | REGISTER_REFEREE => Duration::from_secs(10),
        GAME_INVITATION | GAME_JOIN_ACK => Duration::from_secs(5),
        CHOOSE_PARITY_CALL => Duration::from_secs(30),
        GAME_OVER => Duration::from_secs(5),
        MATCH_RESULT_REPORT => Duration::from_secs(10),
        LEAGUE_QUERY => Duration::from_secs(10),
        _ => Duration::from_secs(10),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterPlayerParams {
    #[serde(default)]
    pub player_id: Option<String>,
    pub contact_endpoint: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRefereeParams {
    #[serde(default)]
    pub referee_id: Option<String>,
    pub contact_endpoint: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub max_concurrent_matches: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistrationResult {
    pub agent_id: String,
    pub auth_token: String,
    pub league_id: String,
    pub token_expires_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlayerRef {
    pub player_id: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartMatchParams {
    pub match_id: String,
    pub round_id: u32,
    pub league_id: String,
    pub game_type: String,
    pub players: Vec<PlayerRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GameInvitationParams {
    pub match_id: String,
    pub league_id: String,
    pub round_id: u32,
    pub game_type: String,
    pub role_in_match: String,
    pub opponent_id: String,
    pub opponent_endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GameJoinAck {
    pub match_id: String,
    pub player_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChooseParityCallParams {
    pub match_id: String,
    pub league_id: String,
    pub round_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChooseParityResponse {
    pub match_id: String,
    pub player_id: String,
    /// Left as a raw string; anything outside {"even","odd"} is an E010
    /// technical loss for the sender.
    pub parity_choice: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GameOverParams {
    pub match_id: String,
    pub league_id: String,
    pub outcome: MatchOutcome,
    /// Names the rule and error code behind a technical loss, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consequence: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchResultReportParams {
    pub match_id: String,
    pub round_id: u32,
    pub league_id: String,
    pub state: MatchState,
    pub outcome: MatchOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LeagueQueryParams {
    #[serde(default)]
    pub league_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StandingsUpdateParams {
    pub league_id: String,
    pub current_round: u32,
    pub ranking: Vec<String>,
    pub rows: HashMap<String, crate::models::StandingsRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoundAnnouncementParams {
    pub league_id: String,
    pub round_id: u32,
    pub match_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_to_canonical() {
        assert_eq!(canonicalize("handle_game_invitation"), Some(GAME_INVITATION));
        assert_eq!(canonicalize("choose_parity"), Some(CHOOSE_PARITY_CALL));
        assert_eq!(canonicalize("report_match_result"), Some(MATCH_RESULT_REPORT));
        assert_eq!(canonicalize("get_standings"), Some(LEAGUE_QUERY));
        assert_eq!(canonicalize(GAME_INVITATION), Some(GAME_INVITATION));
        assert_eq!(canonicalize("mystery_method"), None);
    }

    #[test]
    fn deadlines_follow_method_class() {
        assert_eq!(method_deadline(CHOOSE_PARITY_CALL), Duration::from_secs(30));
        assert_eq!(method_deadline(GAME_INVITATION), Duration::from_secs(5));
        assert_eq!(method_deadline(REGISTER_PLAYER), Duration::from_secs(10));
        assert_eq!(method_deadline(START_MATCH), Duration::from_secs(10));
    }

    #[test]
    fn payload_structs_reject_unknown_fields() {
        let err = serde_json::from_value::<ChooseParityResponse>(serde_json::json!({
            "match_id": "R1M1",
            "player_id": "P01",
            "parity_choice": "even",
            "padding": 1,
        }));
        assert!(err.is_err(), "extra fields must not deserialize");

        let err = serde_json::from_value::<RegisterPlayerParams>(serde_json::json!({
            "contact_endpoint": "http://p1:9101",
            "favourite_colour": "blue",
        }));
        assert!(err.is_err());

        // Absent optional fields are still fine.
        let ok = serde_json::from_value::<LeagueQueryParams>(serde_json::json!({}));
        assert!(ok.is_ok());
    }
}
