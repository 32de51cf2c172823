//! Failure containment for recovery attempts: a per-artifact circuit breaker
//! and a per-component retry loop monitor. Both are safe to share across
//! threads and keep their ledgers behind a single mutex each.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use remend_core::CircuitState;
use serde::Serialize;

mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit blocks before a half-open probe is allowed.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

#[derive(Debug)]
struct CircuitEntry {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitEntry {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

/// Keyed by artifact id. CLOSED admits attempts; OPEN blocks them until the
/// reset timeout elapses; the single probe after the timeout runs HALF_OPEN,
/// where success closes the circuit and failure reopens it with a fresh timer.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Box<dyn Clock>,
    circuits: Mutex<HashMap<String, CircuitEntry>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Box::new(SystemClock))
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: Box<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    /// Gate called before any recovery work. Returns whether the attempt may
    /// proceed and the state it will run under.
    pub fn allow_recovery_attempt(&self, artifact_id: &str) -> (bool, CircuitState) {
        let now = self.clock.now();
        let mut circuits = self.circuits.lock().expect("circuit lock poisoned");
        let entry = circuits
            .entry(artifact_id.to_string())
            .or_insert_with(CircuitEntry::closed);

        if entry.state == CircuitState::Open {
            let elapsed = entry.opened_at.map(|at| now.duration_since(at));
            if elapsed.is_some_and(|e| e >= self.config.reset_timeout) {
                entry.state = CircuitState::HalfOpen;
                return (true, CircuitState::HalfOpen);
            }
            return (false, CircuitState::Open);
        }

        (true, entry.state)
    }

    pub fn record_failure(&self, artifact_id: &str) -> CircuitState {
        let now = self.clock.now();
        let mut circuits = self.circuits.lock().expect("circuit lock poisoned");
        let entry = circuits
            .entry(artifact_id.to_string())
            .or_insert_with(CircuitEntry::closed);

        entry.consecutive_failures += 1;
        if entry.state == CircuitState::HalfOpen
            || entry.consecutive_failures >= self.config.failure_threshold
        {
            entry.state = CircuitState::Open;
            entry.opened_at = Some(now);
        }
        entry.state
    }

    pub fn record_success(&self, artifact_id: &str) -> CircuitState {
        let mut circuits = self.circuits.lock().expect("circuit lock poisoned");
        let entry = circuits
            .entry(artifact_id.to_string())
            .or_insert_with(CircuitEntry::closed);
        *entry = CircuitEntry::closed();
        entry.state
    }

    /// Manual override from the UI's "try again" affordance.
    pub fn reset_circuit(&self, artifact_id: &str) {
        self.circuits
            .lock()
            .expect("circuit lock poisoned")
            .remove(artifact_id);
    }

    pub fn snapshot(&self, artifact_id: &str) -> CircuitSnapshot {
        let circuits = self.circuits.lock().expect("circuit lock poisoned");
        circuits
            .get(artifact_id)
            .map(|entry| CircuitSnapshot {
                state: entry.state,
                consecutive_failures: entry.consecutive_failures,
            })
            .unwrap_or(CircuitSnapshot {
                state: CircuitState::Closed,
                consecutive_failures: 0,
            })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryMonitorConfig {
    /// Consecutive failures that block further retries for a component.
    pub max_retries: u32,
    /// How long a blocked component waits before retries are admitted again.
    pub cooldown: Duration,
    /// Sliding window for loop detection.
    pub window: Duration,
    /// Retries inside the window that raise an alert before the hard ceiling.
    pub window_alert_threshold: u32,
}

impl Default for RetryMonitorConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            cooldown: Duration::from_secs(30),
            window: Duration::from_secs(60),
            window_alert_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryAlertKind {
    InfiniteLoopDetected,
    RetryLimitReached,
}

impl RetryAlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InfiniteLoopDetected => "infinite_loop_detected",
            Self::RetryLimitReached => "retry_limit_reached",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryAlert {
    pub component_id: String,
    pub kind: RetryAlertKind,
    pub retries_in_window: u32,
    pub total_retries: u32,
}

/// Point-in-time view of one component's retry ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentState {
    pub total_retries: u32,
    pub consecutive_failures: u32,
    pub blocked: bool,
    pub last_error: Option<String>,
    pub last_duration: Option<Duration>,
}

#[derive(Debug, Default)]
struct RetryEntry {
    timestamps: Vec<Instant>,
    total: u32,
    consecutive_failures: u32,
    last_error: Option<String>,
    last_duration: Option<Duration>,
    last_retry_at: Option<Instant>,
}

impl RetryEntry {
    fn blocked(&self, now: Instant, config: &RetryMonitorConfig) -> bool {
        self.consecutive_failures >= config.max_retries
            && self
                .last_retry_at
                .is_some_and(|at| now.duration_since(at) < config.cooldown)
    }
}

/// Watches retry churn per UI component and flags runaway loops early, before
/// the hard retry ceiling is reached.
pub struct RetryLoopMonitor {
    config: RetryMonitorConfig,
    clock: Box<dyn Clock>,
    history: Mutex<HashMap<String, RetryEntry>>,
}

impl RetryLoopMonitor {
    pub fn new(config: RetryMonitorConfig) -> Self {
        Self::with_clock(config, Box::new(SystemClock))
    }

    pub fn with_clock(config: RetryMonitorConfig, clock: Box<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Denies retries once the consecutive-failure ceiling is hit, until the
    /// cooldown elapses. Mirrors the circuit breaker's gate under its own
    /// threshold and timeout.
    pub fn can_retry(&self, component_id: &str) -> bool {
        let now = self.clock.now();
        let history = self.history.lock().expect("retry lock poisoned");
        history
            .get(component_id)
            .is_none_or(|entry| !entry.blocked(now, &self.config))
    }

    /// Records one retry and returns the alert it raises, if any.
    pub fn record_retry(
        &self,
        component_id: &str,
        error_message: &str,
        duration: Option<Duration>,
    ) -> Option<RetryAlert> {
        let now = self.clock.now();
        let mut history = self.history.lock().expect("retry lock poisoned");
        let entry = history.entry(component_id.to_string()).or_default();

        entry.total += 1;
        entry.consecutive_failures += 1;
        entry.last_error = Some(error_message.to_string());
        entry.last_duration = duration;
        entry.last_retry_at = Some(now);
        entry
            .timestamps
            .retain(|at| now.duration_since(*at) < self.config.window);
        entry.timestamps.push(now);

        let alert_kind = if entry.consecutive_failures >= self.config.max_retries {
            Some(RetryAlertKind::RetryLimitReached)
        } else if entry.timestamps.len() as u32 >= self.config.window_alert_threshold {
            Some(RetryAlertKind::InfiniteLoopDetected)
        } else {
            None
        };

        alert_kind.map(|kind| RetryAlert {
            component_id: component_id.to_string(),
            kind,
            retries_in_window: entry.timestamps.len() as u32,
            total_retries: entry.total,
        })
    }

    /// A successful render clears the consecutive-failure run; the lifetime
    /// total is kept.
    pub fn record_success(&self, component_id: &str) {
        let mut history = self.history.lock().expect("retry lock poisoned");
        if let Some(entry) = history.get_mut(component_id) {
            entry.consecutive_failures = 0;
            entry.last_error = None;
        }
    }

    pub fn component_state(&self, component_id: &str) -> ComponentState {
        let now = self.clock.now();
        let history = self.history.lock().expect("retry lock poisoned");
        match history.get(component_id) {
            Some(entry) => ComponentState {
                total_retries: entry.total,
                consecutive_failures: entry.consecutive_failures,
                blocked: entry.blocked(now, &self.config),
                last_error: entry.last_error.clone(),
                last_duration: entry.last_duration,
            },
            None => ComponentState {
                total_retries: 0,
                consecutive_failures: 0,
                blocked: false,
                last_error: None,
                last_duration: None,
            },
        }
    }

    /// Alerts still in force right now, window pruning applied.
    pub fn get_active_alerts(&self) -> Vec<RetryAlert> {
        let now = self.clock.now();
        let mut history = self.history.lock().expect("retry lock poisoned");
        let mut alerts: Vec<RetryAlert> = history
            .iter_mut()
            .filter_map(|(component_id, entry)| {
                entry
                    .timestamps
                    .retain(|at| now.duration_since(*at) < self.config.window);
                let kind = if entry.consecutive_failures >= self.config.max_retries {
                    RetryAlertKind::RetryLimitReached
                } else if entry.timestamps.len() as u32 >= self.config.window_alert_threshold {
                    RetryAlertKind::InfiniteLoopDetected
                } else {
                    return None;
                };
                Some(RetryAlert {
                    component_id: component_id.clone(),
                    kind,
                    retries_in_window: entry.timestamps.len() as u32,
                    total_retries: entry.total,
                })
            })
            .collect();
        alerts.sort_by(|a, b| a.component_id.cmp(&b.component_id));
        alerts
    }

    pub fn reset(&self, component_id: &str) {
        self.history
            .lock()
            .expect("retry lock poisoned")
            .remove(component_id);
    }
}
