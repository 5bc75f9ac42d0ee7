//! Outbound JSON-RPC client composing encode, authentication, per-method
//! deadline, retry with jittered backoff and per-endpoint circuit breaking.

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::LeagueError;
use crate::models::AgentIdentity;
use crate::protocol::envelope::Envelope;
use crate::protocol::jsonrpc::{self, JSONRPC_VERSION};
use crate::protocol::messages;
use crate::service::communication::circuit_breaker::{BreakerMap, CircuitConfig};

/// Wire-level delivery of one encoded request. Production uses HTTP POST;
/// tests inject a deterministic in-memory implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        endpoint: &str,
        body: Value,
        deadline: Duration,
    ) -> Result<Value, LeagueError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        endpoint: &str,
        body: Value,
        deadline: Duration,
    ) -> Result<Value, LeagueError> {
        let url = format!("{}/mcp", endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .timeout(deadline)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LeagueError::Timeout(format!("no response from {endpoint} within deadline"))
                } else {
                    LeagueError::AgentUnavailable(format!("{endpoint}: {e}"))
                }
            })?;
        response
            .json()
            .await
            .map_err(|e| LeagueError::AgentUnavailable(format!("{endpoint}: bad response body: {e}")))
    }
}

/// Retry policy: max 3 total attempts, nominal delays 2s/4s/8s capped at
/// 10s, full jitter in [0.5x, 1.5x].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Zero-delay policy for tests.
    pub fn immediate() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Backoff before retry number `retry` (0-based): base * 2^retry,
    /// capped, jittered.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let nominal = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay);
        if !self.jitter || nominal.is_zero() {
            return nominal;
        }
        let factor = rand::thread_rng().gen_range(0.5..1.5);
        nominal.mul_f64(factor)
    }
}

/// Per-call knobs. Defaults come from the method class.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub deadline: Duration,
    pub retry: bool,
}

impl CallOptions {
    pub fn for_method(method: &str) -> Self {
        Self {
            deadline: messages::method_deadline(method),
            // The parity call's 30s window is authoritative for fairness;
            // retrying it would hand the slow side extra time.
            retry: method != messages::CHOOSE_PARITY_CALL,
        }
    }
}

pub struct RpcClient {
    transport: Arc<dyn Transport>,
    breakers: BreakerMap,
    retry: RetryConfig,
    identity: AgentIdentity,
    auth_token: RwLock<Option<String>>,
}

impl RpcClient {
    pub fn new(transport: Arc<dyn Transport>, identity: AgentIdentity) -> Self {
        Self {
            transport,
            breakers: BreakerMap::new(CircuitConfig::default()),
            retry: RetryConfig::default(),
            identity,
            auth_token: RwLock::new(None),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_config(mut self, circuit: CircuitConfig) -> Self {
        self.breakers = BreakerMap::new(circuit);
        self
    }

    /// Pre-seed the auth token, for agents that self-issue one instead of
    /// registering (the league manager).
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = RwLock::new(Some(token.into()));
        self
    }

    /// Install the token issued at registration; used on every later call.
    pub async fn set_auth_token(&self, token: impl Into<String>) {
        *self.auth_token.write().await = Some(token.into());
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// Authenticated call with the method's default deadline and retry
    /// policy.
    pub async fn call(
        &self,
        endpoint: &str,
        method: &'static str,
        conversation_id: &str,
        body: Value,
    ) -> Result<Value, LeagueError> {
        self.call_with(endpoint, method, conversation_id, body, CallOptions::for_method(method))
            .await
    }

    pub async fn call_with(
        &self,
        endpoint: &str,
        method: &'static str,
        conversation_id: &str,
        body: Value,
        opts: CallOptions,
    ) -> Result<Value, LeagueError> {
        let params = self.enveloped(method, conversation_id, body).await;
        let request = json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": Uuid::new_v4().to_string(),
            "method": method,
            "params": params,
        });

        let mut last_error = None;
        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                let delay = self.retry.delay_for(attempt - 1);
                debug!(
                    method,
                    endpoint,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }
            match self.attempt(endpoint, &request, opts.deadline).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    let retryable = opts.retry && e.is_retryable();
                    if !retryable {
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            LeagueError::AgentUnavailable(format!("{endpoint}: retries exhausted"))
        }))
    }

    /// Fire-and-forget broadcast: no `id`, no response expected, no retry.
    /// Breaker accounting still applies so a dead recipient stops costing
    /// timeouts.
    pub async fn notify(
        &self,
        endpoint: &str,
        method: &'static str,
        conversation_id: &str,
        body: Value,
    ) -> Result<(), LeagueError> {
        let params = self.enveloped(method, conversation_id, body).await;
        let request = json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": method,
            "params": params,
        });
        let breaker = self.breakers.get(endpoint).await;
        breaker.try_acquire()?;
        match self
            .transport
            .send(endpoint, request, messages::method_deadline(method))
            .await
        {
            Ok(_) => {
                breaker.on_success();
                Ok(())
            }
            Err(e) => {
                breaker.on_failure();
                warn!(method, endpoint, error_code = %e.code(), "broadcast delivery failed: {e}");
                Err(e)
            }
        }
    }

    async fn attempt(
        &self,
        endpoint: &str,
        request: &Value,
        deadline: Duration,
    ) -> Result<Value, LeagueError> {
        let breaker = self.breakers.get(endpoint).await;
        breaker.try_acquire()?;
        match self.transport.send(endpoint, request.clone(), deadline).await {
            Ok(response) => {
                // The endpoint answered; application-level errors do not
                // count against its health.
                breaker.on_success();
                jsonrpc::decode_response(&response)
            }
            Err(e) => {
                breaker.on_failure();
                Err(e)
            }
        }
    }

    async fn enveloped(&self, method: &str, conversation_id: &str, body: Value) -> Value {
        let token = self.auth_token.read().await.clone();
        Envelope::outbound(method, &self.identity, conversation_id, token).merged_into(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::models::AgentType;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedTransport {
        calls: AtomicU32,
        fail_first: u32,
        error: fn(String) -> LeagueError,
    }

    impl ScriptedTransport {
        fn failing(fail_first: u32, error: fn(String) -> LeagueError) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first,
                error,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(
            &self,
            endpoint: &str,
            body: Value,
            _deadline: Duration,
        ) -> Result<Value, LeagueError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err((self.error)(endpoint.to_string()));
            }
            Ok(jsonrpc::success_response(
                body.get("id").cloned().unwrap_or(Value::Null),
                json!({"status": "ack"}),
            ))
        }
    }

    fn client(transport: Arc<dyn Transport>) -> RpcClient {
        RpcClient::new(transport, AgentIdentity::new(AgentType::Referee, "REF01"))
            .with_retry_config(RetryConfig::immediate())
    }

    #[tokio::test]
    async fn retries_transient_failures_up_to_three_attempts() {
        let transport = Arc::new(ScriptedTransport::failing(2, LeagueError::AgentUnavailable));
        let c = client(transport.clone());
        let result = c
            .call("http://peer", messages::MATCH_RESULT_REPORT, "conv", json!({}))
            .await
            .unwrap();
        assert_eq!(result["status"], "ack");
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn never_exceeds_three_attempts() {
        let transport = Arc::new(ScriptedTransport::failing(10, LeagueError::AgentUnavailable));
        let c = client(transport.clone());
        let err = c
            .call("http://peer", messages::MATCH_RESULT_REPORT, "conv", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::E006);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn terminal_errors_are_not_retried() {
        let transport = Arc::new(ScriptedTransport::failing(10, LeagueError::Auth));
        let c = client(transport.clone());
        let err = c
            .call("http://peer", messages::MATCH_RESULT_REPORT, "conv", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::E012);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn parity_call_gets_a_single_window() {
        let transport = Arc::new(ScriptedTransport::failing(10, LeagueError::Timeout));
        let c = client(transport.clone());
        let err = c
            .call("http://peer", messages::CHOOSE_PARITY_CALL, "conv", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::E001);
        assert_eq!(transport.calls(), 1, "the 30s deadline is authoritative");
    }

    #[tokio::test]
    async fn breaker_short_circuits_without_transport_io() {
        let transport = Arc::new(ScriptedTransport::failing(100, LeagueError::AgentUnavailable));
        let c = client(transport.clone());
        // 5 consecutive transport failures over two calls (3 + 2) open the
        // circuit mid-call; afterwards no further transport I/O happens.
        for _ in 0..2 {
            let _ = c
                .call("http://peer", messages::MATCH_RESULT_REPORT, "conv", json!({}))
                .await;
        }
        let calls_when_open = transport.calls();
        assert_eq!(calls_when_open, 5);
        let err = c
            .call("http://peer", messages::MATCH_RESULT_REPORT, "conv", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::E016);
        assert_eq!(transport.calls(), calls_when_open);
    }

    #[tokio::test]
    async fn delays_are_capped_and_jittered() {
        let retry = RetryConfig::default();
        for retry_n in 0..5 {
            let nominal = [2.0, 4.0, 8.0, 10.0, 10.0][retry_n as usize];
            for _ in 0..20 {
                let d = retry.delay_for(retry_n).as_secs_f64();
                assert!(d >= nominal * 0.5 - 1e-9 && d <= nominal * 1.5 + 1e-9);
            }
        }
    }
}
