//! Circuit breaker for remote tier calls (cache, origin store)
//!
//! A dead dependency must cost one fast rejection per lookup, not one
//! timeout. States:
//! - Closed: calls pass through, consecutive failures are counted
//! - Open: calls are rejected without running until `recovery_timeout` elapses
//! - HalfOpen: one probe is let through; success closes, failure reopens.
//!   Other calls are rejected while the probe is in flight. A probe that never
//!   reports back (its future was dropped) is replaced after `recovery_timeout`.

use parking_lot::Mutex;
use std::future::Future;
use std::time::{Duration, Instant};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u64,
    /// Time spent open before a probe is allowed
    pub recovery_timeout: Duration,
    /// Name for logs
    pub name: String,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            name: "default".to_string(),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u64,
    opened_at: Option<Instant>,
    probe_started: Option<Instant>,
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
                probe_started: None,
            }),
        }
    }

    /// Whether a call may run now. Moves Open → HalfOpen once the recovery
    /// timeout has passed and admits a single probe in that state.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        let timeout = self.config.recovery_timeout;
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                let stale = inner.probe_started.map(|t| t.elapsed() >= timeout).unwrap_or(true);
                if stale {
                    inner.probe_started = Some(Instant::now());
                }
                stale
            }
            CircuitState::Open => {
                let recovered = inner.opened_at.map(|t| t.elapsed() >= timeout).unwrap_or(true);
                if recovered {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_started = Some(Instant::now());
                }
                recovered
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.failures = 0;
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.probe_started = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failures += 1;
        let trip = match inner.state {
            CircuitState::Closed => inner.failures >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if trip {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.probe_started = None;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u64 {
        self.inner.lock().failures
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Run `f` through the breaker
    pub async fn call<F, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        if !self.allow_request() {
            return Err(CircuitBreakerError::Open(self.config.name.clone()));
        }

        match f.await {
            Ok(val) => {
                self.record_success();
                Ok(val)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }
}

/// The inner error, or a rejection because the circuit is open
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    Open(String),
    Inner(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open(name) => write!(f, "Circuit breaker '{}' is open", name),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::fmt::Display + std::fmt::Debug> std::error::Error for CircuitBreakerError<E> {}
