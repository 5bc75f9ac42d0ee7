//! Pluggable game rules, registered by game_type.

use rand::rngs::OsRng;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use crate::error::LeagueError;
use crate::models::{Parity, PlayerStatus};

/// Source of the drawn number. Production uses the OS CSPRNG; tests inject
/// a scripted sequence.
pub trait NumberDraw: Send + Sync {
    fn draw(&self, low: u8, high: u8) -> u8;
}

pub struct SecureDraw;

impl NumberDraw for SecureDraw {
    fn draw(&self, low: u8, high: u8) -> u8 {
        OsRng.gen_range(low..=high)
    }
}

/// Deterministic draw source for tests: yields the scripted numbers in
/// order, then repeats the last one.
pub struct ScriptedDraw {
    numbers: Mutex<Vec<u8>>,
}

impl ScriptedDraw {
    pub fn new(numbers: Vec<u8>) -> Self {
        assert!(!numbers.is_empty(), "scripted draw needs at least one number");
        let mut numbers = numbers;
        numbers.reverse();
        Self {
            numbers: Mutex::new(numbers),
        }
    }
}

impl NumberDraw for ScriptedDraw {
    fn draw(&self, _low: u8, _high: u8) -> u8 {
        let mut numbers = self.numbers.lock().unwrap();
        if numbers.len() > 1 {
            numbers.pop().unwrap()
        } else {
            numbers[0]
        }
    }
}

/// What a rule implementation decides about one match.
#[derive(Debug, Clone)]
pub struct RuleDecision {
    /// Index of the winning side, `None` for a draw or a double forfeit.
    pub winner: Option<usize>,
    pub statuses: [PlayerStatus; 2],
    pub drawn_number: Option<u8>,
    pub number_parity: Option<Parity>,
}

pub trait GameRules: Send + Sync {
    fn game_type(&self) -> &'static str;

    /// Decide the outcome from the validated choices. `None` means the
    /// player produced no valid choice and already carries a technical
    /// loss.
    fn determine_outcome(
        &self,
        choice_a: Option<Parity>,
        choice_b: Option<Parity>,
        draw: &dyn NumberDraw,
    ) -> RuleDecision;
}

/// Even/odd: a number is drawn from [low, high]; identical choices are a
/// draw regardless of the number, otherwise the matching parity wins.
pub struct EvenOddRules {
    pub low: u8,
    pub high: u8,
}

impl Default for EvenOddRules {
    fn default() -> Self {
        Self { low: 1, high: 10 }
    }
}

impl GameRules for EvenOddRules {
    fn game_type(&self) -> &'static str {
        "even_odd"
    }

    fn determine_outcome(
        &self,
        choice_a: Option<Parity>,
        choice_b: Option<Parity>,
        draw: &dyn NumberDraw,
    ) -> RuleDecision {
        match (choice_a, choice_b) {
            (None, None) => RuleDecision {
                winner: None,
                statuses: [PlayerStatus::TechnicalLoss, PlayerStatus::TechnicalLoss],
                drawn_number: None,
                number_parity: None,
            },
            (Some(_), None) => RuleDecision {
                winner: Some(0),
                statuses: [PlayerStatus::Win, PlayerStatus::TechnicalLoss],
                drawn_number: None,
                number_parity: None,
            },
            (None, Some(_)) => RuleDecision {
                winner: Some(1),
                statuses: [PlayerStatus::TechnicalLoss, PlayerStatus::Win],
                drawn_number: None,
                number_parity: None,
            },
            (Some(a), Some(b)) => {
                let n = draw.draw(self.low, self.high);
                let parity = Parity::of(n);
                if a == b {
                    // Identical choices cannot produce simultaneous
                    // win/loss; the drawn number is recorded but moot.
                    RuleDecision {
                        winner: None,
                        statuses: [PlayerStatus::Draw, PlayerStatus::Draw],
                        drawn_number: Some(n),
                        number_parity: Some(parity),
                    }
                } else if a == parity {
                    RuleDecision {
                        winner: Some(0),
                        statuses: [PlayerStatus::Win, PlayerStatus::Loss],
                        drawn_number: Some(n),
                        number_parity: Some(parity),
                    }
                } else {
                    RuleDecision {
                        winner: Some(1),
                        statuses: [PlayerStatus::Loss, PlayerStatus::Win],
                        drawn_number: Some(n),
                        number_parity: Some(parity),
                    }
                }
            }
        }
    }
}

/// Rule implementations by game_type.
pub struct GameRegistry {
    rules: HashMap<String, Arc<dyn GameRules>>,
}

impl GameRegistry {
    pub fn new() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    pub fn register(&mut self, rules: Arc<dyn GameRules>) {
        self.rules.insert(rules.game_type().to_string(), rules);
    }

    pub fn get(&self, game_type: &str) -> Result<Arc<dyn GameRules>, LeagueError> {
        self.rules
            .get(game_type)
            .cloned()
            .ok_or_else(|| LeagueError::Validation(format!("unknown game_type '{game_type}'")))
    }
}

impl Default for GameRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EvenOddRules::default()));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decide(a: Option<Parity>, b: Option<Parity>, n: u8) -> RuleDecision {
        EvenOddRules::default().determine_outcome(a, b, &ScriptedDraw::new(vec![n]))
    }

    #[test]
    fn matching_parity_wins() {
        let d = decide(Some(Parity::Even), Some(Parity::Odd), 4);
        assert_eq!(d.winner, Some(0));
        assert_eq!(d.statuses, [PlayerStatus::Win, PlayerStatus::Loss]);
        assert_eq!(d.drawn_number, Some(4));
        assert_eq!(d.number_parity, Some(Parity::Even));
    }

    #[test]
    fn identical_choices_draw_regardless_of_number() {
        for n in [3, 8] {
            let d = decide(Some(Parity::Even), Some(Parity::Even), n);
            assert_eq!(d.winner, None);
            assert_eq!(d.statuses, [PlayerStatus::Draw, PlayerStatus::Draw]);
        }
    }

    #[test]
    fn missing_choice_forfeits() {
        let d = decide(Some(Parity::Odd), None, 7);
        assert_eq!(d.winner, Some(0));
        assert_eq!(d.statuses, [PlayerStatus::Win, PlayerStatus::TechnicalLoss]);
        assert_eq!(d.drawn_number, None, "no number is drawn for a forfeit");
    }

    #[test]
    fn double_forfeit_has_no_winner() {
        let d = decide(None, None, 5);
        assert_eq!(d.winner, None);
        assert_eq!(
            d.statuses,
            [PlayerStatus::TechnicalLoss, PlayerStatus::TechnicalLoss]
        );
    }

    #[test]
    fn scripted_draw_repeats_last() {
        let draw = ScriptedDraw::new(vec![4, 7]);
        assert_eq!(draw.draw(1, 10), 4);
        assert_eq!(draw.draw(1, 10), 7);
        assert_eq!(draw.draw(1, 10), 7);
    }
}
