use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::league::ScoringConfig;

pub const OUTCOME_DRAW: &str = "DRAW";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    Even,
    Odd,
}

impl Parity {
    pub fn of(n: u8) -> Parity {
        if n % 2 == 0 {
            Parity::Even
        } else {
            Parity::Odd
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Parity::Even => "even",
            Parity::Odd => "odd",
        }
    }

    pub fn parse(s: &str) -> Option<Parity> {
        match s {
            "even" => Some(Parity::Even),
            "odd" => Some(Parity::Odd),
            _ => None,
        }
    }
}

impl std::fmt::Display for Parity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchState {
    Scheduled,
    Invited,
    Joined,
    Choosing,
    Decided,
    Reported,
    Finished,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerStatus {
    Win,
    Loss,
    Draw,
    TechnicalLoss,
}

/// Final result of one match, as reported to the league manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchOutcome {
    /// Winning player id, or `"DRAW"`.
    pub winner_player_id: String,
    pub statuses: HashMap<String, PlayerStatus>,
    pub drawn_number: Option<u8>,
    pub number_parity: Option<Parity>,
    pub points_awarded: HashMap<String, u32>,
}

impl MatchOutcome {
    /// Fill `points_awarded` from the per-player statuses.
    pub fn award_points(&mut self, scoring: &ScoringConfig) {
        self.points_awarded = self
            .statuses
            .iter()
            .map(|(player, status)| {
                let points = match status {
                    PlayerStatus::Win => scoring.win,
                    PlayerStatus::Draw => scoring.draw,
                    PlayerStatus::Loss => scoring.loss,
                    PlayerStatus::TechnicalLoss => scoring.technical_loss,
                };
                (player.clone(), points)
            })
            .collect();
    }
}

/// One entry in a match transcript, recording a message exchanged during
/// conduction. Auth tokens are never written here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub timestamp: DateTime<Utc>,
    pub direction: String,
    pub message_type: String,
    pub peer: String,
    pub detail: Option<String>,
}

/// Full record of one match execution, owned by the conducting referee and
/// persisted to `data/matches/<match_id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: String,
    pub round_id: u32,
    pub league_id: String,
    pub game_type: String,
    pub player_a_id: String,
    pub player_b_id: String,
    pub referee_id: String,
    pub conversation_id: String,
    pub state: MatchState,
    pub choices: HashMap<String, Parity>,
    pub outcome: Option<MatchOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub transcript: Vec<TranscriptEntry>,
}

impl MatchRecord {
    pub fn new(
        match_id: impl Into<String>,
        round_id: u32,
        league_id: impl Into<String>,
        game_type: impl Into<String>,
        player_a_id: impl Into<String>,
        player_b_id: impl Into<String>,
        referee_id: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self {
            match_id: match_id.into(),
            round_id,
            league_id: league_id.into(),
            game_type: game_type.into(),
            player_a_id: player_a_id.into(),
            player_b_id: player_b_id.into(),
            referee_id: referee_id.into(),
            conversation_id: conversation_id.into(),
            state: MatchState::Scheduled,
            choices: HashMap::new(),
            outcome: None,
            started_at: Utc::now(),
            finished_at: None,
            transcript: Vec::new(),
        }
    }

    pub fn log(&mut self, direction: &str, message_type: &str, peer: &str, detail: Option<String>) {
        self.transcript.push(TranscriptEntry {
            timestamp: Utc::now(),
            direction: direction.to_string(),
            message_type: message_type.to_string(),
            peer: peer.to_string(),
            detail,
        });
    }
}

/// One match as remembered by the player who played it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerHistoryEntry {
    pub match_id: String,
    pub league_id: String,
    pub round_id: u32,
    pub opponent_id: String,
    pub status: PlayerStatus,
    pub points: u32,
    pub drawn_number: Option<u8>,
    pub finished_at: DateTime<Utc>,
}

/// Per-player match references and aggregate stats,
/// `data/players/<player_id>/history.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerHistory {
    pub player_id: String,
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
    pub technical_losses: u32,
    pub matches: Vec<PlayerHistoryEntry>,
}

impl PlayerHistory {
    pub fn empty(player_id: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            wins: 0,
            draws: 0,
            losses: 0,
            technical_losses: 0,
            matches: Vec::new(),
        }
    }

    pub fn append(&mut self, entry: PlayerHistoryEntry) {
        match entry.status {
            PlayerStatus::Win => self.wins += 1,
            PlayerStatus::Draw => self.draws += 1,
            PlayerStatus::Loss => self.losses += 1,
            PlayerStatus::TechnicalLoss => {
                self.losses += 1;
                self.technical_losses += 1;
            }
        }
        self.matches.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parity_of_number() {
        assert_eq!(Parity::of(4), Parity::Even);
        assert_eq!(Parity::of(7), Parity::Odd);
    }

    #[test]
    fn points_follow_scoring_config() {
        let mut outcome = MatchOutcome {
            winner_player_id: "P01".into(),
            statuses: HashMap::from([
                ("P01".to_string(), PlayerStatus::Win),
                ("P02".to_string(), PlayerStatus::TechnicalLoss),
            ]),
            drawn_number: Some(4),
            number_parity: Some(Parity::Even),
            points_awarded: HashMap::new(),
        };
        outcome.award_points(&ScoringConfig::default());
        assert_eq!(outcome.points_awarded["P01"], 3);
        assert_eq!(outcome.points_awarded["P02"], 0);
    }
}
