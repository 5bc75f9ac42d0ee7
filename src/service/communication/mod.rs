//! Communication module for inter-agent RPC
//! Provides the authenticated JSON-RPC client with retry, per-method
//! deadlines and per-endpoint circuit breaking

pub mod circuit_breaker;
pub mod rpc_client;

pub use circuit_breaker::{BreakerMap, CircuitBreaker, CircuitConfig, CircuitState};
pub use rpc_client::{CallOptions, HttpTransport, RetryConfig, RpcClient, Transport};
