use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ErrorCode, LeagueError};

pub const JSONRPC_VERSION: &str = "2.0";

/// Request body size cap, 64 KiB.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
    #[serde(default)]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Parse raw bytes into a single JSON-RPC request. Batches, oversized
/// bodies and malformed frames are all `E002`.
pub fn parse_request(body: &[u8]) -> Result<JsonRpcRequest, LeagueError> {
    if body.len() > MAX_BODY_BYTES {
        return Err(LeagueError::Validation(format!(
            "body of {} bytes exceeds the {} byte cap",
            body.len(),
            MAX_BODY_BYTES
        )));
    }
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| LeagueError::Validation(format!("request is not valid JSON: {e}")))?;
    if value.is_array() {
        return Err(LeagueError::Validation("batch requests are not supported".into()));
    }
    let request: JsonRpcRequest = serde_json::from_value(value)
        .map_err(|e| LeagueError::Validation(format!("malformed JSON-RPC request: {e}")))?;
    if request.jsonrpc != JSONRPC_VERSION {
        return Err(LeagueError::Validation(format!(
            "jsonrpc must be \"{JSONRPC_VERSION}\""
        )));
    }
    if !request.params.is_object() {
        return Err(LeagueError::Validation("params must be an object".into()));
    }
    Ok(request)
}

pub fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

/// Build a JSON-RPC error object carrying the league error code and
/// conversation context in `data`.
pub fn error_response(
    id: Value,
    error: &LeagueError,
    message_type: Option<&str>,
    conversation_id: Option<&str>,
) -> Value {
    let code = error.code();
    let mut data = json!({
        "error_code": code.as_str(),
        "message_type": message_type,
        "conversation_id": conversation_id,
    });
    if code == ErrorCode::E011 {
        data["supported_protocols"] = json!([crate::protocol::PROTOCOL_VERSION]);
    }
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": {
            "code": code.jsonrpc_code(),
            "message": error.to_string(),
            "data": data,
        },
    })
}

/// Decode the remote side of a call: either the `result` value or a
/// reconstructed `LeagueError` from the error object.
pub fn decode_response(response: &Value) -> Result<Value, LeagueError> {
    if let Some(err) = response.get("error") {
        let code = err
            .get("data")
            .and_then(|d| d.get("error_code"))
            .and_then(|c| c.as_str())
            .and_then(ErrorCode::parse)
            .unwrap_or(ErrorCode::E006);
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("remote error")
            .to_string();
        return Err(LeagueError::from_code(code, message));
    }
    response
        .get("result")
        .cloned()
        .ok_or_else(|| LeagueError::Validation("response carries neither result nor error".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_batches() {
        let body = br#"[{"jsonrpc":"2.0","method":"a","params":{}}]"#;
        let err = parse_request(body).unwrap_err();
        assert_eq!(err.code(), ErrorCode::E002);
    }

    #[test]
    fn rejects_oversized_body() {
        let body = vec![b' '; MAX_BODY_BYTES + 1];
        assert_eq!(parse_request(&body).unwrap_err().code(), ErrorCode::E002);
    }

    #[test]
    fn rejects_non_object_params() {
        let body = br#"{"jsonrpc":"2.0","method":"a","params":[1,2]}"#;
        assert_eq!(parse_request(body).unwrap_err().code(), ErrorCode::E002);
    }

    #[test]
    fn parses_notification() {
        let body = br#"{"jsonrpc":"2.0","method":"ROUND_COMPLETED","params":{}}"#;
        let req = parse_request(body).unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn protocol_error_lists_supported_protocols() {
        let err = LeagueError::Protocol("league.v1".into());
        let resp = error_response(Value::Null, &err, Some("X"), Some("c1"));
        assert_eq!(resp["error"]["code"], -32600);
        assert_eq!(
            resp["error"]["data"]["supported_protocols"][0],
            crate::protocol::PROTOCOL_VERSION
        );
    }

    #[test]
    fn decode_round_trip() {
        let ok = success_response(json!(1), json!({"status": "ack"}));
        assert_eq!(decode_response(&ok).unwrap()["status"], "ack");

        let err = error_response(json!(2), &LeagueError::Timeout("slow".into()), None, None);
        let decoded = decode_response(&err).unwrap_err();
        assert_eq!(decoded.code(), ErrorCode::E001);
    }
}
