use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeagueStatus {
    Pending,
    Active,
    Completed,
}

/// Points awarded per match result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub win: u32,
    pub draw: u32,
    pub loss: u32,
    pub technical_loss: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            win: 3,
            draw: 1,
            loss: 0,
            technical_loss: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct League {
    pub league_id: String,
    pub game_type: String,
    pub status: LeagueStatus,
    pub scoring: ScoringConfig,
    pub min_players: usize,
    pub max_players: usize,
    pub registered_players: BTreeSet<String>,
    pub assigned_referees: BTreeSet<String>,
}

impl League {
    pub fn new(league_id: impl Into<String>, game_type: impl Into<String>) -> Self {
        Self {
            league_id: league_id.into(),
            game_type: game_type.into(),
            status: LeagueStatus::Pending,
            scoring: ScoringConfig::default(),
            min_players: 2,
            max_players: 64,
            registered_players: BTreeSet::new(),
            assigned_referees: BTreeSet::new(),
        }
    }
}
