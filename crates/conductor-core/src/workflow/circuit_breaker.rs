//! Per-dependency-class circuit breakers.
//!
//! A breaker is keyed by agent name, not by step, so a failing capability
//! cannot starve steps that use a different one. State lives in memory for
//! the life of the process and is shared by every workflow through an
//! injected `CircuitBreakerRegistry`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use conductor_types::config::CircuitBreakerConfig;
use conductor_types::error::{ErrorCategory, ErrorInfo};

/// Public view of a breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone)]
enum CircuitState {
    Closed {
        consecutive_failures: u32,
    },
    Open {
        reopen_at: Instant,
    },
    HalfOpen {
        successes: u32,
        trial_in_flight: bool,
    },
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    last_failure_at: Option<DateTime<Utc>>,
}

/// Rejection returned while a breaker is open.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker for '{agent}' is open{}", retry_hint(.retry_in))]
pub struct BreakerOpen {
    pub agent: String,
    /// Time until a trial call will be admitted, if known.
    pub retry_in: Option<Duration>,
}

fn retry_hint(retry_in: &Option<Duration>) -> String {
    match retry_in {
        Some(d) => format!("; next trial in {}s", d.as_secs().max(1)),
        None => "; a trial call is already in flight".to_string(),
    }
}

impl BreakerOpen {
    /// Breaker rejections are recoverable dependency failures.
    pub fn into_info(self, step_id: &str) -> ErrorInfo {
        ErrorInfo::new(ErrorCategory::ExternalDependency, self.to_string())
            .recoverable(true)
            .with_step(step_id)
    }
}

/// Point-in-time snapshot for status output.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub agent: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Remaining cool-down while open.
    pub cooldown_remaining_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

/// Breaker for one dependency class. One mutex, short critical sections.
#[derive(Debug)]
pub struct CircuitBreaker {
    agent: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(agent: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            agent: agent.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed {
                    consecutive_failures: 0,
                },
                last_failure_at: None,
            }),
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ask to make a call. Open breakers reject without calling anything;
    /// half-open breakers admit one trial at a time.
    pub fn try_acquire(self: &Arc<Self>) -> Result<BreakerPermit, BreakerOpen> {
        let mut inner = self.lock();
        let now = Instant::now();
        let trial = match inner.state {
            CircuitState::Closed { .. } => false,
            CircuitState::Open { reopen_at } if now >= reopen_at => {
                tracing::info!(agent = %self.agent, "circuit breaker half-open, admitting trial call");
                inner.state = CircuitState::HalfOpen {
                    successes: 0,
                    trial_in_flight: true,
                };
                true
            }
            CircuitState::Open { reopen_at } => {
                return Err(BreakerOpen {
                    agent: self.agent.clone(),
                    retry_in: Some(reopen_at.saturating_duration_since(now)),
                });
            }
            CircuitState::HalfOpen {
                trial_in_flight: true,
                ..
            } => {
                return Err(BreakerOpen {
                    agent: self.agent.clone(),
                    retry_in: None,
                });
            }
            CircuitState::HalfOpen { successes, .. } => {
                inner.state = CircuitState::HalfOpen {
                    successes,
                    trial_in_flight: true,
                };
                true
            }
        };
        Ok(BreakerPermit {
            breaker: Arc::clone(self),
            trial,
            settled: false,
        })
    }

    fn record_success(&self, trial: bool) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed { .. } => {
                inner.state = CircuitState::Closed {
                    consecutive_failures: 0,
                };
            }
            CircuitState::HalfOpen { successes, .. } if trial => {
                let successes = successes + 1;
                if successes >= self.config.success_threshold {
                    tracing::info!(agent = %self.agent, "circuit breaker closed after successful trials");
                    inner.state = CircuitState::Closed {
                        consecutive_failures: 0,
                    };
                } else {
                    inner.state = CircuitState::HalfOpen {
                        successes,
                        trial_in_flight: false,
                    };
                }
            }
            // A call admitted before the breaker opened finished late.
            CircuitState::HalfOpen { .. } | CircuitState::Open { .. } => {}
        }
    }

    fn record_failure(&self, trial: bool, category: ErrorCategory) {
        if !category.counts_against_breaker() {
            self.release(trial);
            return;
        }
        let mut inner = self.lock();
        inner.last_failure_at = Some(Utc::now());
        let cooldown = Duration::from_secs(self.config.cooldown_secs);
        match inner.state {
            CircuitState::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.config.failure_threshold {
                    tracing::warn!(
                        agent = %self.agent,
                        failures,
                        cooldown_secs = self.config.cooldown_secs,
                        "circuit breaker opened"
                    );
                    inner.state = CircuitState::Open {
                        reopen_at: Instant::now() + cooldown,
                    };
                } else {
                    inner.state = CircuitState::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            CircuitState::HalfOpen { .. } => {
                tracing::warn!(agent = %self.agent, "trial call failed, circuit breaker reopened");
                inner.state = CircuitState::Open {
                    reopen_at: Instant::now() + cooldown,
                };
            }
            CircuitState::Open { .. } => {}
        }
    }

    /// Give back a permit without an outcome (cancelled call).
    fn release(&self, trial: bool) {
        if !trial {
            return;
        }
        let mut inner = self.lock();
        if let CircuitState::HalfOpen { successes, .. } = inner.state {
            inner.state = CircuitState::HalfOpen {
                successes,
                trial_in_flight: false,
            };
        }
    }

    /// Current state, applying the open -> half-open cool-down check.
    pub fn state(&self) -> BreakerState {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed { .. } => BreakerState::Closed,
            CircuitState::Open { reopen_at } if Instant::now() >= reopen_at => BreakerState::HalfOpen,
            CircuitState::Open { .. } => BreakerState::Open,
            CircuitState::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state();
        let inner = self.lock();
        let (consecutive_failures, half_open_successes, cooldown_remaining_secs) = match inner.state {
            CircuitState::Closed {
                consecutive_failures,
            } => (consecutive_failures, 0, None),
            CircuitState::Open { reopen_at } => (
                self.config.failure_threshold,
                0,
                Some(reopen_at.saturating_duration_since(Instant::now()).as_secs()),
            ),
            CircuitState::HalfOpen { successes, .. } => (0, successes, None),
        };
        BreakerSnapshot {
            agent: self.agent.clone(),
            state,
            consecutive_failures,
            half_open_successes,
            last_failure_at: inner.last_failure_at,
            cooldown_remaining_secs,
        }
    }
}

/// Permission to make one call. Report the outcome with [`succeed`] or
/// [`fail`]; dropping it unreported frees a half-open trial slot.
///
/// [`succeed`]: BreakerPermit::succeed
/// [`fail`]: BreakerPermit::fail
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    settled: bool,
}

impl BreakerPermit {
    /// Whether this call is a half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.record_success(self.trial);
    }

    pub fn fail(mut self, category: ErrorCategory) {
        self.settled = true;
        self.breaker.record_failure(self.trial, category);
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release(self.trial);
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Process-wide set of breakers, one per agent class.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// Breaker for `agent`, created closed on first use.
    pub fn get(&self, agent: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(agent.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(agent, self.config.clone())))
            .clone()
    }

    /// Snapshots of every breaker, sorted by agent.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut out: Vec<_> = self.breakers.iter().map(|b| b.value().snapshot()).collect();
        out.sort_by(|a, b| a.agent.cmp(&b.agent));
        out
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn config(success_threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold,
            cooldown_secs: 30,
        }
    }

    fn fail_times(breaker: &Arc<CircuitBreaker>, n: u32) {
        for _ in 0..n {
            breaker
                .try_acquire()
                .unwrap()
                .fail(ErrorCategory::ExternalDependency);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_short_circuits() {
        let breaker = Arc::new(CircuitBreaker::new("agent-x", config(2)));
        fail_times(&breaker, 2);
        assert_eq!(breaker.state(), BreakerState::Closed);
        fail_times(&breaker, 1);
        assert_eq!(breaker.state(), BreakerState::Open);

        let rejected = breaker.try_acquire().unwrap_err();
        assert_eq!(rejected.agent, "agent-x");
        assert!(rejected.retry_in.is_some());
        assert!(rejected.to_string().contains("is open"));
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_consecutive_failures() {
        let breaker = Arc::new(CircuitBreaker::new("agent-x", config(2)));
        fail_times(&breaker, 2);
        breaker.try_acquire().unwrap().succeed();
        fail_times(&breaker, 2);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_single_trial_then_closes() {
        let breaker = Arc::new(CircuitBreaker::new("agent-x", config(1)));
        fail_times(&breaker, 3);
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        let trial = breaker.try_acquire().unwrap();
        assert!(trial.is_trial());
        assert!(breaker.try_acquire().is_err(), "only one trial at a time");
        trial.succeed();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(!breaker.try_acquire().unwrap().is_trial());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_needs_consecutive_successes() {
        let breaker = Arc::new(CircuitBreaker::new("agent-x", config(2)));
        fail_times(&breaker, 3);
        tokio::time::advance(Duration::from_secs(30)).await;

        breaker.try_acquire().unwrap().succeed();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.try_acquire().unwrap().succeed();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn trial_failure_reopens() {
        let breaker = Arc::new(CircuitBreaker::new("agent-x", config(2)));
        fail_times(&breaker, 3);
        tokio::time::advance(Duration::from_secs(30)).await;
        breaker
            .try_acquire()
            .unwrap()
            .fail(ErrorCategory::Timeout);
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_trial_frees_slot() {
        let breaker = Arc::new(CircuitBreaker::new("agent-x", config(2)));
        fail_times(&breaker, 3);
        tokio::time::advance(Duration::from_secs(30)).await;
        drop(breaker.try_acquire().unwrap());
        assert!(breaker.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn caller_faults_do_not_count() {
        let breaker = Arc::new(CircuitBreaker::new("agent-x", config(2)));
        for _ in 0..5 {
            breaker
                .try_acquire()
                .unwrap()
                .fail(ErrorCategory::Validation);
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn registry_isolates_agents() {
        let registry = CircuitBreakerRegistry::new(config(2));
        let x = registry.get("agent-x");
        fail_times(&x, 3);
        assert_eq!(registry.get("agent-x").state(), BreakerState::Open);
        assert_eq!(registry.get("agent-y").state(), BreakerState::Closed);

        let snapshots = registry.snapshots();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].agent, "agent-x");
        assert_eq!(snapshots[0].state, BreakerState::Open);
        assert!(snapshots[0].last_failure_at.is_some());
    }

    #[test]
    fn breaker_open_is_recoverable_dependency_error() {
        let info = BreakerOpen {
            agent: "x".into(),
            retry_in: Some(Duration::from_secs(5)),
        }
        .into_info("step-1");
        assert_eq!(info.category, ErrorCategory::ExternalDependency);
        assert!(info.recoverable);
        assert_eq!(info.step_id.as_deref(), Some("step-1"));
    }
}
