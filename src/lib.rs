//! parity-league: a distributed round-robin league of two-player parity
//! games, coordinated over authenticated JSON-RPC 2.0 with per-method
//! deadlines, retries and circuit breaking.

pub mod agents;
pub mod config;
pub mod error;
pub mod http;
pub mod models;
pub mod protocol;
pub mod service;
pub mod storage;

pub use error::{ErrorCode, LeagueError};
