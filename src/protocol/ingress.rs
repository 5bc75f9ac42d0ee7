//! Transport-independent request ingress shared by the HTTP endpoint and
//! the in-memory transport used in tests.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::LeagueError;
use crate::protocol::envelope::Envelope;
use crate::protocol::jsonrpc;
use crate::protocol::messages;

/// An agent's method dispatch surface. The ingress has already resolved
/// aliases, validated the envelope structurally, stripped its fields out
/// of `params` and armed the per-method deadline; authentication is the
/// implementor's concern.
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        method: &'static str,
        envelope: &Envelope,
        params: Value,
    ) -> Result<Value, LeagueError>;
}

/// Run one JSON-RPC request through validation, alias mapping and dispatch.
/// Returns `None` for notifications, which expect no response body.
pub async fn handle_request(dispatcher: &dyn MessageDispatcher, body: &[u8]) -> Option<Value> {
    let request = match jsonrpc::parse_request(body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error_code = %e.code(), "rejected malformed request: {e}");
            return Some(jsonrpc::error_response(Value::Null, &e, None, None));
        }
    };
    let id = request.id.clone().unwrap_or(Value::Null);
    let notification = request.is_notification();
    let method = messages::canonicalize(&request.method);
    let conversation_id = request
        .params
        .get("conversation_id")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let outcome = match method {
        None => Err(LeagueError::UnknownMethod(request.method.clone())),
        Some(method) => dispatch_with_deadline(dispatcher, method, request.params).await,
    };

    if notification {
        if let Err(e) = outcome {
            debug!(
                error_code = %e.code(),
                conversation_id = conversation_id.as_deref().unwrap_or(""),
                "notification handler failed: {e}"
            );
        }
        return None;
    }
    Some(match outcome {
        Ok(result) => jsonrpc::success_response(id, result),
        Err(e) => {
            debug!(
                message_type = method.unwrap_or(""),
                conversation_id = conversation_id.as_deref().unwrap_or(""),
                error_code = %e.code(),
                "dispatch failed: {e}"
            );
            jsonrpc::error_response(id, &e, method, conversation_id.as_deref())
        }
    })
}

async fn dispatch_with_deadline(
    dispatcher: &dyn MessageDispatcher,
    method: &'static str,
    params: Value,
) -> Result<Value, LeagueError> {
    let (envelope, message) = Envelope::split_params(params)?;
    envelope.validate()?;

    let deadline = messages::method_deadline(method);
    tokio::time::timeout(deadline, dispatcher.dispatch(method, &envelope, message))
        .await
        .map_err(|_| {
            LeagueError::Timeout(format!(
                "{method} exceeded its {}s server budget",
                deadline.as_secs()
            ))
        })?
}
