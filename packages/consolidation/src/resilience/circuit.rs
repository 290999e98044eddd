//! Circuit breaker for external dependencies.
//!
//! After `failure_threshold` consecutive failures the circuit opens and
//! every call fails fast with `CircuitOpen` until `cooldown` has elapsed.
//! The first call after the cooldown is a probe: success closes the
//! circuit, failure re-opens it for another cooldown.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{ConsolidationError, Result, Service};

/// Circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening. Default: 5.
    pub failure_threshold: u32,

    /// How long the circuit stays open. Default: 30s.
    pub cooldown_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 30_000,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a config.
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown_ms: cooldown.as_millis() as u64,
        }
    }

    fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
enum Inner {
    Closed { consecutive_failures: u32 },
    Open { until: Instant },
    HalfOpen,
}

/// Fail-fast guard for one dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    service: Service,
    config: CircuitBreakerConfig,
    state: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(service: Service, config: CircuitBreakerConfig) -> Self {
        Self {
            service,
            config,
            state: Mutex::new(Inner::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// Current state, moving Open → HalfOpen if the cooldown has passed.
    pub fn state(&self) -> CircuitState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Self::advance(&mut state);
        match *state {
            Inner::Closed { .. } => CircuitState::Closed,
            Inner::Open { .. } => CircuitState::Open,
            Inner::HalfOpen => CircuitState::HalfOpen,
        }
    }

    /// Fail fast if the circuit is open.
    pub fn check(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Self::advance(&mut state);
        match *state {
            Inner::Open { until } => Err(ConsolidationError::CircuitOpen {
                service: self.service,
                retry_in: until.saturating_duration_since(Instant::now()),
            }),
            _ => Ok(()),
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, Inner::HalfOpen) {
            info!(service = %self.service, "Circuit closed after successful probe");
        }
        *state = Inner::Closed {
            consecutive_failures: 0,
        };
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let next = match *state {
            Inner::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.config.failure_threshold {
                    warn!(
                        service = %self.service,
                        failures = failures,
                        cooldown_ms = self.config.cooldown_ms,
                        "Circuit opened"
                    );
                    self.open()
                } else {
                    Inner::Closed {
                        consecutive_failures: failures,
                    }
                }
            }
            Inner::HalfOpen => {
                warn!(service = %self.service, "Probe failed, circuit re-opened");
                self.open()
            }
            Inner::Open { until } => Inner::Open { until },
        };
        *state = next;
    }

    /// Run `f` behind the breaker.
    pub async fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        self.check()?;
        match f.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    fn open(&self) -> Inner {
        Inner::Open {
            until: Instant::now() + self.config.cooldown(),
        }
    }

    fn advance(state: &mut Inner) {
        if let Inner::Open { until } = *state {
            if Instant::now() >= until {
                *state = Inner::HalfOpen;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            Service::Verifier,
            CircuitBreakerConfig::new(2, Duration::from_secs(10)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let cb = breaker();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        let err = cb.check().unwrap_err();
        assert!(matches!(
            err,
            ConsolidationError::CircuitOpen {
                service: Service::Verifier,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_counter() {
        let cb = breaker();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe() {
        let cb = breaker();
        cb.record_failure();
        cb.record_failure();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.check().is_ok());

        // Failed probe re-opens
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(11)).await;
        let value = cb.call(async { Ok::<_, ConsolidationError>(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_fails_fast_when_open() {
        let cb = breaker();
        cb.record_failure();
        cb.record_failure();

        let mut ran = false;
        let result = cb
            .call(async {
                ran = true;
                Ok::<_, ConsolidationError>(())
            })
            .await;
        assert!(result.is_err());
        assert!(!ran);
    }
}
