//! league.v2 wire protocol: envelopes, JSON-RPC framing, message types
//! and the transport-independent request ingress.

pub mod envelope;
pub mod ingress;
pub mod jsonrpc;
pub mod messages;

pub use envelope::{Envelope, PROTOCOL_VERSION};
pub use ingress::MessageDispatcher;
pub use jsonrpc::{JsonRpcRequest, MAX_BODY_BYTES};
