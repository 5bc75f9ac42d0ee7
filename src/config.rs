//! Environment-driven settings for the agent binaries.

use std::str::FromStr;

use crate::models::Parity;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct LeagueManagerSettings {
    pub bind_addr: String,
    pub port: u16,
    pub league_id: String,
    pub game_type: String,
    pub min_players: usize,
    pub max_players: usize,
    pub data_dir: String,
}

impl LeagueManagerSettings {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_or("LM_BIND_ADDR", "0.0.0.0"),
            port: env_parse("LM_PORT", 9000),
            league_id: env_or("LEAGUE_ID", "league-1"),
            game_type: env_or("GAME_TYPE", "even_odd"),
            min_players: env_parse("LEAGUE_MIN_PLAYERS", 2),
            max_players: env_parse("LEAGUE_MAX_PLAYERS", 64),
            data_dir: env_or("DATA_DIR", "data"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefereeSettings {
    pub bind_addr: String,
    pub port: u16,
    pub referee_id: String,
    pub lm_endpoint: String,
    pub contact_endpoint: String,
    pub max_concurrent_matches: usize,
    pub data_dir: String,
}

impl RefereeSettings {
    pub fn from_env() -> Self {
        let port = env_parse("REFEREE_PORT", 9201);
        Self {
            bind_addr: env_or("REFEREE_BIND_ADDR", "0.0.0.0"),
            port,
            referee_id: env_or("REFEREE_ID", "REF01"),
            lm_endpoint: env_or("LM_ENDPOINT", "http://127.0.0.1:9000"),
            contact_endpoint: env_or(
                "REFEREE_CONTACT_ENDPOINT",
                &format!("http://127.0.0.1:{port}"),
            ),
            max_concurrent_matches: env_parse("REFEREE_MAX_CONCURRENT", 50),
            data_dir: env_or("DATA_DIR", "data"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub bind_addr: String,
    pub port: u16,
    pub player_id: String,
    pub lm_endpoint: String,
    pub contact_endpoint: String,
    /// "random", "even" or "odd".
    pub strategy: String,
    pub data_dir: String,
}

impl PlayerSettings {
    pub fn from_env() -> Self {
        let port = env_parse("PLAYER_PORT", 9101);
        Self {
            bind_addr: env_or("PLAYER_BIND_ADDR", "0.0.0.0"),
            port,
            player_id: env_or("PLAYER_ID", "P01"),
            lm_endpoint: env_or("LM_ENDPOINT", "http://127.0.0.1:9000"),
            contact_endpoint: env_or(
                "PLAYER_CONTACT_ENDPOINT",
                &format!("http://127.0.0.1:{port}"),
            ),
            strategy: env_or("PLAYER_STRATEGY", "random"),
            data_dir: env_or("DATA_DIR", "data"),
        }
    }

    pub fn fixed_parity(&self) -> Option<Parity> {
        Parity::parse(&self.strategy)
    }
}
