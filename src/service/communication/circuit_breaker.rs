//! Per-endpoint circuit breaking
//! Stops calling a peer after repeated failures until a probe succeeds

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::LeagueError;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub open_duration: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Per-endpoint breaker. All call sites targeting the same endpoint share
/// one instance through [`BreakerMap`].
pub struct CircuitBreaker {
    endpoint: String,
    config: CircuitConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(endpoint: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Gate a call attempt. While OPEN this fails fast with `E016` and no
    /// network I/O; once the open window has elapsed, exactly one caller is
    /// admitted as the HALF_OPEN probe.
    pub fn try_acquire(&self) -> Result<(), LeagueError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.open_duration {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    Ok(())
                } else {
                    Err(LeagueError::CircuitOpen(self.endpoint.clone()))
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(LeagueError::CircuitOpen(self.endpoint.clone()))
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.probe_in_flight = false;
                inner.opened_at = None;
                tracing::info!(endpoint = %self.endpoint, "circuit closed after successful probe");
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    tracing::warn!(
                        endpoint = %self.endpoint,
                        failures = inner.consecutive_failures,
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_in_flight = false;
                tracing::warn!(endpoint = %self.endpoint, "circuit reopened after failed probe");
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }
}

/// Shared registry of per-endpoint breakers.
#[derive(Clone)]
pub struct BreakerMap {
    config: CircuitConfig,
    breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
}

impl BreakerMap {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            breakers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get(&self, endpoint: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().await.get(endpoint) {
            return breaker.clone();
        }
        let mut breakers = self.breakers.write().await;
        breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(endpoint, self.config.clone())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(open_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "http://peer:9000",
            CircuitConfig {
                failure_threshold: 5,
                open_duration: Duration::from_millis(open_ms),
            },
        )
    }

    #[test]
    fn opens_after_five_consecutive_failures() {
        let b = breaker(60_000);
        for _ in 0..4 {
            b.try_acquire().unwrap();
            b.on_failure();
        }
        assert_eq!(b.state(), CircuitState::Closed);
        b.try_acquire().unwrap();
        b.on_failure();
        assert_eq!(b.state(), CircuitState::Open);
        assert!(b.try_acquire().is_err());
    }

    #[test]
    fn success_resets_consecutive_count() {
        let b = breaker(60_000);
        for _ in 0..4 {
            b.try_acquire().unwrap();
            b.on_failure();
        }
        b.try_acquire().unwrap();
        b.on_success();
        for _ in 0..4 {
            b.try_acquire().unwrap();
            b.on_failure();
        }
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_admits_exactly_one_probe() {
        let b = breaker(20);
        for _ in 0..5 {
            b.try_acquire().unwrap();
            b.on_failure();
        }
        assert_eq!(b.state(), CircuitState::Open);
        tokio::time::sleep(Duration::from_millis(40)).await;

        b.try_acquire().unwrap();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        // Second caller is rejected while the probe is in flight.
        assert!(b.try_acquire().is_err());

        b.on_success();
        assert_eq!(b.state(), CircuitState::Closed);
        b.try_acquire().unwrap();
    }

    #[tokio::test]
    async fn failed_probe_reopens_with_fresh_timer() {
        let b = breaker(20);
        for _ in 0..5 {
            b.try_acquire().unwrap();
            b.on_failure();
        }
        tokio::time::sleep(Duration::from_millis(40)).await;
        b.try_acquire().unwrap();
        b.on_failure();
        assert_eq!(b.state(), CircuitState::Open);
        assert!(b.try_acquire().is_err());
    }
}
