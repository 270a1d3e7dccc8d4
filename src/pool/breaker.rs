//! Three-state circuit breaker guarding pool acquisition.
//!
//! 1. **Closed**: normal operation, requests pass through
//! 2. **Open**: too many failures, requests fail fast
//! 3. **Half-Open**: one trial request tests recovery

use crate::pool::{PoolError, Result};
use parking_lot::RwLock;
use std::time::{Duration, Instant};

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failures inside the window that open the circuit
    pub max_failures: u32,

    /// How long the circuit stays open before allowing a trial
    pub reset_timeout: Duration,

    /// Successes in half-open required to close
    pub success_threshold: u32,

    /// Rolling failure-count window
    pub window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 1,
            window: Duration::from_secs(60),
        }
    }
}

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    failures: u32,
    successes: u32,
    last_transition: Instant,
    window_start: Instant,
    trial_in_flight: bool,
}

/// Three-state circuit breaker
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: RwLock<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker in the closed state
    pub fn new(config: BreakerConfig) -> Self {
        let now = Instant::now();
        Self {
            config,
            inner: RwLock::new(BreakerInner {
                state: BreakerState::Closed,
                failures: 0,
                successes: 0,
                last_transition: now,
                window_start: now,
                trial_in_flight: false,
            }),
        }
    }

    /// Gate a request.
    ///
    /// Open fails fast with `CircuitOpen` until the reset timeout elapses,
    /// then transitions to half-open and admits a single trial.
    pub fn allow(&self) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                if inner.last_transition.elapsed() >= self.config.reset_timeout {
                    log::info!("circuit breaker transitioning to HALF-OPEN");
                    inner.state = BreakerState::HalfOpen;
                    inner.successes = 0;
                    inner.last_transition = Instant::now();
                    inner.trial_in_flight = true;
                    Ok(())
                } else {
                    Err(PoolError::CircuitOpen)
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(PoolError::CircuitOpen)
                } else {
                    inner.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Record a successful request
    pub fn record_success(&self) {
        let mut inner = self.inner.write();
        match inner.state {
            BreakerState::Closed => inner.failures = 0,
            BreakerState::HalfOpen => {
                inner.trial_in_flight = false;
                inner.successes += 1;
                if inner.successes >= self.config.success_threshold {
                    log::info!("circuit breaker transitioning to CLOSED");
                    inner.state = BreakerState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.last_transition = Instant::now();
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed request
    pub fn record_failure(&self) {
        let mut inner = self.inner.write();

        if inner.window_start.elapsed() >= self.config.window {
            inner.window_start = Instant::now();
            inner.failures = 0;
        }

        match inner.state {
            BreakerState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.max_failures {
                    log::warn!("circuit breaker transitioning to OPEN");
                    inner.state = BreakerState::Open;
                    inner.successes = 0;
                    inner.last_transition = Instant::now();
                }
            }
            BreakerState::HalfOpen => {
                // A failed trial reopens immediately.
                log::warn!("circuit breaker trial failed, back to OPEN");
                inner.state = BreakerState::Open;
                inner.trial_in_flight = false;
                inner.successes = 0;
                inner.last_transition = Instant::now();
            }
            BreakerState::Open => {}
        }
    }

    /// Current state
    pub fn state(&self) -> BreakerState {
        self.inner.read().state
    }
}
