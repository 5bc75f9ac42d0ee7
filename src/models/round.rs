use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundStatus {
    Pending,
    Active,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduledMatchStatus {
    Scheduled,
    Dispatched,
    Finished,
}

/// One scheduled pairing inside `rounds.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledMatch {
    pub match_id: String,
    pub players: [String; 2],
    pub referee_id: String,
    pub status: ScheduledMatchStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub round_id: u32,
    pub status: RoundStatus,
    pub matches: Vec<ScheduledMatch>,
}

/// Persistent schedule, `data/leagues/<league_id>/rounds.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundsFile {
    pub league_id: String,
    pub rounds: Vec<Round>,
}

impl RoundsFile {
    pub fn find_match_mut(&mut self, match_id: &str) -> Option<&mut ScheduledMatch> {
        self.rounds
            .iter_mut()
            .flat_map(|r| r.matches.iter_mut())
            .find(|m| m.match_id == match_id)
    }

    pub fn total_matches(&self) -> usize {
        self.rounds.iter().map(|r| r.matches.len()).sum()
    }
}
