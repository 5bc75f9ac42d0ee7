// Domain models
pub mod agent;
pub mod league;
pub mod match_models;
pub mod round;
pub mod standings;

// Flat re-exports
pub use agent::*;
pub use league::*;
pub use match_models::*;
pub use round::*;
pub use standings::*;
