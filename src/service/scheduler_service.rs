//! Round-robin scheduling by the circle method, deterministic per league.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::error::LeagueError;
use crate::models::{Round, RoundStatus, RoundsFile, ScheduledMatch, ScheduledMatchStatus};

/// Build the full round-robin schedule. Deterministic in
/// `(sorted players, league_id)`: the seating order is a shuffle seeded
/// from the league id.
pub fn build_schedule(
    league_id: &str,
    players: &[String],
    referees: &[String],
) -> Result<RoundsFile, LeagueError> {
    if players.len() < 2 {
        return Err(LeagueError::LeagueNotFound(format!(
            "need at least 2 players, have {}",
            players.len()
        )));
    }
    if referees.is_empty() {
        return Err(LeagueError::LeagueState("no referees assigned".into()));
    }

    let mut seats: Vec<Option<String>> = {
        let mut sorted: Vec<String> = players.to_vec();
        sorted.sort();
        sorted.dedup();
        let mut rng = StdRng::seed_from_u64(schedule_seed(league_id));
        sorted.shuffle(&mut rng);
        sorted.into_iter().map(Some).collect()
    };
    if seats.len() % 2 == 1 {
        seats.push(None); // bye
    }
    let n = seats.len();

    let mut rounds = Vec::with_capacity(n - 1);
    for round_index in 0..n - 1 {
        let mut matches = Vec::new();
        for i in 0..n / 2 {
            let a = seats[i].clone();
            let b = seats[n - 1 - i].clone();
            if let (Some(a), Some(b)) = (a, b) {
                let k = matches.len();
                matches.push(ScheduledMatch {
                    match_id: format!("R{}M{}", round_index + 1, k + 1),
                    players: [a, b],
                    referee_id: referees[k % referees.len()].clone(),
                    status: ScheduledMatchStatus::Scheduled,
                });
            }
        }
        rounds.push(Round {
            round_id: (round_index + 1) as u32,
            status: RoundStatus::Pending,
            matches,
        });
        // Position 0 stays fixed; the rest rotate one step.
        seats[1..].rotate_right(1);
    }

    Ok(RoundsFile {
        league_id: league_id.to_string(),
        rounds,
    })
}

fn schedule_seed(league_id: &str) -> u64 {
    let digest = Sha256::digest(league_id.as_bytes());
    u64::from_be_bytes(digest[..8].try_into().unwrap())
}

/// Immutable lookup view over a schedule, kept in memory by the league
/// manager so report validation never touches the filesystem.
#[derive(Debug, Clone)]
pub struct ScheduleIndex {
    by_match: HashMap<String, ScheduledMatch>,
}

impl ScheduleIndex {
    pub fn from_rounds(rounds: &RoundsFile) -> Self {
        let mut by_match = HashMap::new();
        for round in &rounds.rounds {
            for m in &round.matches {
                by_match.insert(m.match_id.clone(), m.clone());
            }
        }
        Self { by_match }
    }

    pub fn lookup(&self, match_id: &str) -> Option<&ScheduledMatch> {
        self.by_match.get(match_id)
    }

    pub fn total_matches(&self) -> usize {
        self.by_match.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn players(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("P{i:02}")).collect()
    }

    fn referees() -> Vec<String> {
        vec!["REF01".to_string(), "REF02".to_string()]
    }

    #[test]
    fn four_players_three_rounds_six_matches() {
        let schedule = build_schedule("L1", &players(4), &referees()).unwrap();
        assert_eq!(schedule.rounds.len(), 3);
        assert_eq!(schedule.total_matches(), 6);
        for round in &schedule.rounds {
            assert_eq!(round.matches.len(), 2);
        }
    }

    #[test]
    fn every_unordered_pair_appears_exactly_once() {
        for n in [2, 3, 4, 5, 6, 7, 8] {
            let schedule = build_schedule("L1", &players(n), &referees()).unwrap();
            let mut seen = HashSet::new();
            for round in &schedule.rounds {
                let mut in_round = HashSet::new();
                for m in &round.matches {
                    let mut pair = [m.players[0].clone(), m.players[1].clone()];
                    pair.sort();
                    assert!(seen.insert(pair.clone()), "pair {pair:?} repeated");
                    for p in &m.players {
                        assert!(in_round.insert(p.clone()), "{p} plays twice in a round");
                    }
                }
            }
            assert_eq!(seen.len(), n * (n - 1) / 2, "N={n}");
        }
    }

    #[test]
    fn odd_player_count_gets_byes() {
        let schedule = build_schedule("L1", &players(5), &referees()).unwrap();
        assert_eq!(schedule.rounds.len(), 5);
        for round in &schedule.rounds {
            assert_eq!(round.matches.len(), 2, "floor(5/2) matches per round");
        }
    }

    #[test]
    fn schedule_is_deterministic_per_league() {
        let a = build_schedule("L1", &players(6), &referees()).unwrap();
        let b = build_schedule("L1", &players(6), &referees()).unwrap();
        assert_eq!(
            serde_json::to_value(&a).unwrap(),
            serde_json::to_value(&b).unwrap()
        );
        // Input order must not matter.
        let mut shuffled = players(6);
        shuffled.reverse();
        let c = build_schedule("L1", &shuffled, &referees()).unwrap();
        assert_eq!(
            serde_json::to_value(&a).unwrap(),
            serde_json::to_value(&c).unwrap()
        );
    }

    #[test]
    fn referees_rotate_within_a_round() {
        let schedule = build_schedule("L1", &players(8), &referees()).unwrap();
        for round in &schedule.rounds {
            assert_eq!(round.matches[0].referee_id, "REF01");
            assert_eq!(round.matches[1].referee_id, "REF02");
            assert_eq!(round.matches[2].referee_id, "REF01");
        }
    }

    #[test]
    fn too_few_players_is_an_error() {
        let err = build_schedule("L1", &players(1), &referees()).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::E008);
        let err = build_schedule("L1", &players(4), &[]).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::E005);
    }
}
