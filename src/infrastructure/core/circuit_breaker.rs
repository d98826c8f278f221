use crate::domain::errors::MarketDataError;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Circuit state of one remote source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,   // requests pass through
    Open,     // source is failing, requests are rejected without a network call
    HalfOpen, // probing whether the source recovered
}

struct Counters {
    state: CircuitState,
    failures: usize,
    successes: usize,
    opened_at: Option<Instant>,
}

/// Stops hammering a remote source once it keeps failing, so the fallback
/// chain moves on to the next source immediately.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: usize,
    success_threshold: usize,
    cool_down: Duration,
    counters: Mutex<Counters>,
}

impl CircuitBreaker {
    /// * `failure_threshold` - consecutive failures before opening
    /// * `success_threshold` - consecutive half-open successes before closing
    /// * `cool_down` - time spent open before a trial call is allowed
    pub fn new(
        name: impl Into<String>,
        failure_threshold: usize,
        success_threshold: usize,
        cool_down: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            cool_down,
            counters: Mutex::new(Counters {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                opened_at: None,
            }),
        }
    }

    /// Runs `f` unless the circuit is open.
    pub async fn call<F, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        self.admit().map_err(CircuitBreakerError::Open)?;

        match f.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        // Counters stay consistent even if a holder panicked
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn admit(&self) -> Result<(), String> {
        let mut counters = self.lock();
        if counters.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = counters
            .opened_at
            .map(|t| t.elapsed())
            .unwrap_or(self.cool_down);

        if elapsed >= self.cool_down {
            info!(
                "CircuitBreaker [{}]: Open -> HalfOpen after {:?}",
                self.name, elapsed
            );
            counters.state = CircuitState::HalfOpen;
            counters.successes = 0;
            Ok(())
        } else {
            Err(format!(
                "{} is open, retry in {:?}",
                self.name,
                self.cool_down - elapsed
            ))
        }
    }

    fn record_success(&self) {
        let mut counters = self.lock();
        match counters.state {
            CircuitState::Closed => counters.failures = 0,
            CircuitState::HalfOpen => {
                counters.successes += 1;
                if counters.successes >= self.success_threshold {
                    info!(
                        "CircuitBreaker [{}]: HalfOpen -> Closed ({} successes)",
                        self.name, counters.successes
                    );
                    counters.state = CircuitState::Closed;
                    counters.failures = 0;
                    counters.successes = 0;
                    counters.opened_at = None;
                }
            }
            CircuitState::Open => {
                warn!(
                    "CircuitBreaker [{}]: success recorded while open",
                    self.name
                );
            }
        }
    }

    fn record_failure(&self) {
        let mut counters = self.lock();
        counters.failures += 1;

        match counters.state {
            CircuitState::Closed if counters.failures >= self.failure_threshold => {
                error!(
                    "CircuitBreaker [{}]: Closed -> Open ({} consecutive failures)",
                    self.name, counters.failures
                );
                counters.state = CircuitState::Open;
                counters.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                warn!(
                    "CircuitBreaker [{}]: HalfOpen -> Open (trial call failed)",
                    self.name
                );
                counters.state = CircuitState::Open;
                counters.successes = 0;
                counters.opened_at = Some(Instant::now());
            }
            _ => {}
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker is open: {0}")]
    Open(String),

    #[error(transparent)]
    Inner(E),
}

impl From<CircuitBreakerError<MarketDataError>> for MarketDataError {
    fn from(e: CircuitBreakerError<MarketDataError>) -> Self {
        match e {
            CircuitBreakerError::Open(reason) => MarketDataError::CircuitOpen { reason },
            CircuitBreakerError::Inner(inner) => inner,
        }
    }
}
