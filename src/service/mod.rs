// Service layer module for parity-league
pub mod communication;
pub mod game_service;
pub mod match_service;
pub mod registry_service;
pub mod scheduler_service;
pub mod standings_service;

pub use communication::{CallOptions, HttpTransport, RetryConfig, RpcClient, Transport};
pub use game_service::{EvenOddRules, GameRegistry, GameRules, NumberDraw, ScriptedDraw, SecureDraw};
pub use match_service::MatchConductor;
pub use registry_service::{RegistryConfig, RegistryService};
pub use scheduler_service::{build_schedule, ScheduleIndex};
pub use standings_service::{AggregatorConfig, EnqueueAck, RoundEvent, StandingsAggregator};
