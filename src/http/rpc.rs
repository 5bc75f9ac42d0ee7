use actix_web::http::header::CONTENT_TYPE;
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::Value;
use std::sync::Arc;

use crate::error::LeagueError;
use crate::protocol::{ingress, jsonrpc, MessageDispatcher};

/// JSON-RPC entry point. Always answers HTTP 200; errors travel in the
/// JSON-RPC error object.
pub async fn mcp_endpoint(
    req: HttpRequest,
    body: web::Bytes,
    dispatcher: web::Data<Arc<dyn MessageDispatcher>>,
) -> HttpResponse {
    let json_content = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);
    if !json_content {
        let err = LeagueError::Validation("Content-Type must be application/json".into());
        return HttpResponse::Ok().json(jsonrpc::error_response(Value::Null, &err, None, None));
    }
    match ingress::handle_request(dispatcher.get_ref().as_ref(), &body).await {
        Some(response) => HttpResponse::Ok().json(response),
        // Notifications produce no JSON-RPC response body.
        None => HttpResponse::Ok().json(Value::Null),
    }
}
