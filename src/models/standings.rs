use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::models::match_models::{MatchOutcome, PlayerStatus};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct HeadToHead {
    pub w: u32,
    pub d: u32,
    pub l: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandingsRow {
    pub points: u32,
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
    pub technical_losses: u32,
    pub games_played: u32,
    pub head_to_head: BTreeMap<String, HeadToHead>,
}

/// Standings snapshot, `data/leagues/<league_id>/standings.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Standings {
    pub league_id: String,
    pub rows: BTreeMap<String, StandingsRow>,
    pub updated_at: DateTime<Utc>,
}

impl Standings {
    pub fn empty(league_id: impl Into<String>) -> Self {
        Self {
            league_id: league_id.into(),
            rows: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    /// Apply one finished match. Points come pre-computed in the outcome so
    /// the aggregator never re-derives scoring rules.
    pub fn apply(&mut self, outcome: &MatchOutcome) {
        let players: Vec<String> = outcome.statuses.keys().cloned().collect();
        for (player, status) in &outcome.statuses {
            let opponent = players.iter().find(|p| *p != player).cloned();
            let row = self.rows.entry(player.clone()).or_default();
            row.games_played += 1;
            row.points += outcome.points_awarded.get(player).copied().unwrap_or(0);
            match status {
                PlayerStatus::Win => row.wins += 1,
                PlayerStatus::Draw => row.draws += 1,
                PlayerStatus::Loss => row.losses += 1,
                PlayerStatus::TechnicalLoss => {
                    row.losses += 1;
                    row.technical_losses += 1;
                }
            }
            if let Some(opponent) = opponent {
                let h2h = row.head_to_head.entry(opponent).or_default();
                match status {
                    PlayerStatus::Win => h2h.w += 1,
                    PlayerStatus::Draw => h2h.d += 1,
                    PlayerStatus::Loss | PlayerStatus::TechnicalLoss => h2h.l += 1,
                }
            }
        }
        self.updated_at = Utc::now();
    }

    /// Ranked player ids: points desc, wins desc, head-to-head points among
    /// the tied group, then a deterministic shuffle seeded by
    /// `(league_id, current_round)`. Computed per query, never stored.
    pub fn ranked(&self, current_round: u32) -> Vec<String> {
        let mut ids: Vec<String> = self.rows.keys().cloned().collect();

        let seed = tiebreak_seed(&self.league_id, current_round);
        let mut rng = StdRng::seed_from_u64(seed);
        ids.shuffle(&mut rng);

        ids.sort_by(|a, b| {
            let ra = &self.rows[a];
            let rb = &self.rows[b];
            rb.points
                .cmp(&ra.points)
                .then(rb.wins.cmp(&ra.wins))
                .then_with(|| {
                    let a_vs_b = h2h_points(ra, b);
                    let b_vs_a = h2h_points(rb, a);
                    b_vs_a.cmp(&a_vs_b)
                })
        });
        ids
    }
}

fn h2h_points(row: &StandingsRow, opponent: &str) -> u32 {
    row.head_to_head
        .get(opponent)
        .map(|h| h.w * 3 + h.d)
        .unwrap_or(0)
}

fn tiebreak_seed(league_id: &str, current_round: u32) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(league_id.as_bytes());
    hasher.update(current_round.to_be_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[..8].try_into().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::match_models::Parity;
    use std::collections::HashMap;

    fn win_outcome(winner: &str, loser: &str) -> MatchOutcome {
        MatchOutcome {
            winner_player_id: winner.to_string(),
            statuses: HashMap::from([
                (winner.to_string(), PlayerStatus::Win),
                (loser.to_string(), PlayerStatus::Loss),
            ]),
            drawn_number: Some(4),
            number_parity: Some(Parity::Even),
            points_awarded: HashMap::from([(winner.to_string(), 3), (loser.to_string(), 0)]),
        }
    }

    #[test]
    fn points_identity_holds() {
        let mut standings = Standings::empty("L1");
        standings.apply(&win_outcome("P01", "P02"));
        standings.apply(&win_outcome("P01", "P03"));
        let draw = MatchOutcome {
            winner_player_id: crate::models::match_models::OUTCOME_DRAW.to_string(),
            statuses: HashMap::from([
                ("P02".to_string(), PlayerStatus::Draw),
                ("P03".to_string(), PlayerStatus::Draw),
            ]),
            drawn_number: Some(7),
            number_parity: Some(Parity::Odd),
            points_awarded: HashMap::from([("P02".to_string(), 1), ("P03".to_string(), 1)]),
        };
        standings.apply(&draw);

        let total_games: u32 = standings.rows.values().map(|r| r.games_played).sum();
        assert_eq!(total_games, 6, "games_played must sum to 2 * matches");
        for row in standings.rows.values() {
            assert_eq!(row.points, row.wins * 3 + row.draws);
        }
    }

    #[test]
    fn technical_loss_counts_as_loss() {
        let mut standings = Standings::empty("L1");
        let outcome = MatchOutcome {
            winner_player_id: "P01".into(),
            statuses: HashMap::from([
                ("P01".to_string(), PlayerStatus::Win),
                ("P02".to_string(), PlayerStatus::TechnicalLoss),
            ]),
            drawn_number: None,
            number_parity: None,
            points_awarded: HashMap::from([("P01".to_string(), 3), ("P02".to_string(), 0)]),
        };
        standings.apply(&outcome);
        let row = &standings.rows["P02"];
        assert_eq!(row.losses, 1);
        assert_eq!(row.technical_losses, 1);
        assert_eq!(row.points, 0);
    }

    #[test]
    fn ranking_is_deterministic() {
        let mut standings = Standings::empty("L1");
        standings.apply(&win_outcome("P01", "P02"));
        standings.apply(&win_outcome("P03", "P04"));
        let first = standings.ranked(2);
        let second = standings.ranked(2);
        assert_eq!(first, second);
        let leaders = first[0..2]
            .iter()
            .filter(|p| p.as_str() == "P01" || p.as_str() == "P03")
            .count();
        assert_eq!(leaders, 2, "both winners rank above both losers");
    }
}
