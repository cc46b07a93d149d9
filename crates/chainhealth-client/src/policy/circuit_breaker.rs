//! Circuit breaker capability and a keyed default implementation.
//!
//! The fallback router only asks [`CircuitBreaker::is_open`] before an
//! attempt and reports the attempt's criticality afterwards; deciding when a
//! circuit opens belongs to the implementation.
//!
//! [`CircuitRegistry`] keeps one three-state [`Circuit`] per circuit name:
//! - `Closed` → `Open`:     critical failures reach `failure_threshold`
//! - `Open` → `Half-Open`:  `open_duration` has elapsed
//! - `Half-Open` → `Closed`: `success_threshold` probes succeed
//! - `Half-Open` → `Open`:   a probe fails

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Decision source consulted before each provider attempt.
pub trait CircuitBreaker: Send + Sync {
    /// Returns `true` if attempts on `circuit` should be skipped.
    fn is_open(&self, circuit: &str) -> bool;

    /// Feedback after an attempt ran. `critical` is `true` only for failures
    /// that mark a provider down. The default ignores it.
    fn record_outcome(&self, _circuit: &str, _critical: bool) {}
}

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Attempts are skipped until `open_duration` passes.
    Open,
    /// Probe attempts are let through.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration shared by every circuit of a registry.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive critical failures before opening.
    pub failure_threshold: u32,
    /// How long to stay open before probing.
    pub open_duration: Duration,
    /// Successful half-open probes before closing.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            success_threshold: 1,
        }
    }
}

/// State machine of one circuit.
#[derive(Debug, Clone)]
pub struct Circuit {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

impl Default for Circuit {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            opened_at: None,
        }
    }
}

impl Circuit {
    /// Current state, moving Open → HalfOpen once the wait has elapsed.
    pub fn state(&mut self, config: &CircuitBreakerConfig) -> CircuitState {
        if self.state == CircuitState::Open
            && self
                .opened_at
                .is_some_and(|at| at.elapsed() >= config.open_duration)
        {
            self.state = CircuitState::HalfOpen;
            self.success_count = 0;
        }
        self.state
    }

    fn on_success(&mut self, config: &CircuitBreakerConfig) -> bool {
        match self.state {
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= config.success_threshold {
                    *self = Self::default();
                    return true;
                }
            }
            CircuitState::Closed => self.failure_count = 0,
            CircuitState::Open => {}
        }
        false
    }

    fn on_failure(&mut self, config: &CircuitBreakerConfig) -> bool {
        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= config.failure_threshold {
                    self.trip();
                    return true;
                }
            }
            CircuitState::HalfOpen => {
                self.trip();
                return true;
            }
            CircuitState::Open => {}
        }
        false
    }

    fn trip(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.success_count = 0;
    }
}

/// Thread-safe set of circuits keyed by circuit name.
#[derive(Debug, Default)]
pub struct CircuitRegistry {
    config: CircuitBreakerConfig,
    circuits: Mutex<HashMap<String, Circuit>>,
}

impl CircuitRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    /// State of `circuit`; unknown circuits are closed.
    pub fn state(&self, circuit: &str) -> CircuitState {
        self.lock()
            .get_mut(circuit)
            .map_or(CircuitState::Closed, |c| c.state(&self.config))
    }

    pub fn record_success(&self, circuit: &str) {
        let mut circuits = self.lock();
        let entry = circuits.entry(circuit.to_string()).or_default();
        entry.state(&self.config);
        if entry.on_success(&self.config) {
            tracing::info!(circuit, "circuit closed");
        }
    }

    pub fn record_failure(&self, circuit: &str) {
        let mut circuits = self.lock();
        let entry = circuits.entry(circuit.to_string()).or_default();
        entry.state(&self.config);
        if entry.on_failure(&self.config) {
            tracing::warn!(circuit, failures = entry.failure_count, "circuit opened");
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Circuit>> {
        self.circuits.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CircuitBreaker for CircuitRegistry {
    fn is_open(&self, circuit: &str) -> bool {
        self.state(circuit) == CircuitState::Open
    }

    fn record_outcome(&self, circuit: &str, critical: bool) {
        if critical {
            self.record_failure(circuit);
        } else {
            self.record_success(circuit);
        }
    }
}

/// A breaker whose circuits never open.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverOpen;

impl CircuitBreaker for NeverOpen {
    fn is_open(&self, _circuit: &str) -> bool {
        false
    }
}
