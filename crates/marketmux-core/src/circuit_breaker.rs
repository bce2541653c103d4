//! Per-provider circuit breaker.
//!
//! Three-state gate in front of every provider call: `Closed` admits calls
//! and counts consecutive failures, `Open` rejects until a cooldown elapses,
//! `HalfOpen` admits exactly one probe whose outcome decides the next state.
//! Caller cancellation is propagated unchanged and never recorded as a
//! failure.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::context::CallContext;
use crate::error::{BreakerError, ProviderError};
use crate::source::ProviderId;

/// Runtime circuit state for provider upstream calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub half_open_after: Duration,
    /// Per-call deadline attached to admitted calls; `None` disables it.
    pub call_timeout: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            half_open_after: Duration::from_secs(30),
            call_timeout: None,
        }
    }
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    total_successes: u64,
    total_failures: u64,
    opened_at: Option<Instant>,
    half_open_at: Option<Instant>,
    last_transition: Option<Instant>,
    probe_in_flight: bool,
}

impl Default for CircuitInner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            total_successes: 0,
            total_failures: 0,
            opened_at: None,
            half_open_at: None,
            last_transition: None,
            probe_in_flight: false,
        }
    }
}

/// Read-only counters and timestamps for one circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitMetrics {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub opened_at: Option<Instant>,
    pub half_open_at: Option<Instant>,
    pub last_transition: Option<Instant>,
}

enum Admission {
    Allowed { probe: bool },
    Rejected,
}

/// Thread-safe circuit breaker guarding one provider.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(CircuitInner::default()),
        }
    }

    /// Runs `op` through the gate.
    ///
    /// Applies the tighter of the configured call timeout and the context
    /// deadline; deadline expiry settles as a `Timeout` failure. Caller
    /// cancellation clears the half-open probe flag and records nothing.
    pub async fn execute<T, F>(&self, ctx: &CallContext, op: F) -> Result<T, BreakerError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        if !self.config.enabled {
            return match self.settle(ctx, op).await {
                Settled::Cancelled => Err(BreakerError::Cancelled),
                Settled::Ok(value) => Ok(value),
                Settled::Err(error) => Err(BreakerError::Upstream(error)),
            };
        }

        let probe = match self.admit() {
            Admission::Rejected => return Err(BreakerError::CircuitOpen),
            Admission::Allowed { probe } => probe,
        };

        match self.settle(ctx, op).await {
            Settled::Cancelled => {
                self.clear_probe(probe);
                Err(BreakerError::Cancelled)
            }
            Settled::Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Settled::Err(error) => {
                self.record_failure();
                Err(BreakerError::Upstream(error))
            }
        }
    }

    async fn settle<T, F>(&self, ctx: &CallContext, op: F) -> Settled<T>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        let budget = match (self.config.call_timeout, ctx.remaining()) {
            (Some(call), Some(chain)) => Some(call.min(chain)),
            (Some(call), None) => Some(call),
            (None, Some(chain)) => Some(chain),
            (None, None) => None,
        };

        match budget {
            Some(budget) => {
                tokio::select! {
                    _ = ctx.cancelled() => Settled::Cancelled,
                    outcome = tokio::time::timeout(budget, op) => match outcome {
                        Ok(Ok(value)) => Settled::Ok(value),
                        Ok(Err(error)) => Settled::Err(error),
                        Err(_) => Settled::Err(ProviderError::timeout(format!(
                            "call exceeded {:.1}s deadline",
                            budget.as_secs_f64()
                        ))),
                    },
                }
            }
            None => {
                tokio::select! {
                    _ = ctx.cancelled() => Settled::Cancelled,
                    outcome = op => match outcome {
                        Ok(value) => Settled::Ok(value),
                        Err(error) => Settled::Err(error),
                    },
                }
            }
        }
    }

    fn admit(&self) -> Admission {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Admission::Allowed { probe: false },
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .map(|opened_at| opened_at.elapsed() >= self.config.half_open_after)
                    .unwrap_or(true);
                if !cooled_down {
                    return Admission::Rejected;
                }

                let now = Instant::now();
                inner.state = CircuitState::HalfOpen;
                inner.half_open_at = Some(now);
                inner.last_transition = Some(now);
                inner.probe_in_flight = true;
                info!(circuit = %self.name, "circuit half-open, admitting probe");
                Admission::Allowed { probe: true }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return Admission::Rejected;
                }
                inner.probe_in_flight = true;
                Admission::Allowed { probe: true }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.total_successes = inner.total_successes.saturating_add(1);
        inner.probe_in_flight = false;
        if inner.state != CircuitState::Closed {
            info!(circuit = %self.name, "circuit closed after successful probe");
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
            inner.last_transition = Some(Instant::now());
        }
    }

    fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.total_failures = inner.total_failures.saturating_add(1);

        match inner.state {
            CircuitState::HalfOpen => {
                info!(circuit = %self.name, "probe failed, circuit re-opened");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.last_transition = Some(Instant::now());
                inner.probe_in_flight = false;
            }
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    info!(
                        circuit = %self.name,
                        failures = inner.consecutive_failures,
                        "failure threshold reached, circuit opened"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.last_transition = Some(Instant::now());
                } else {
                    debug!(
                        circuit = %self.name,
                        failures = inner.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "failure recorded"
                    );
                }
            }
            CircuitState::Open => {
                // A straggler admitted before the transition; restart cooldown.
                inner.opened_at = Some(Instant::now());
            }
        }
    }

    fn clear_probe(&self, probe: bool) {
        if !probe {
            return;
        }
        let mut inner = self.lock();
        inner.probe_in_flight = false;
    }

    /// Forces the circuit back to `Closed` and zeroes the consecutive counter.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
        inner.last_transition = Some(Instant::now());
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn metrics(&self) -> CircuitMetrics {
        let inner = self.lock();
        CircuitMetrics {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            opened_at: inner.opened_at,
            half_open_at: inner.half_open_at,
            last_transition: inner.last_transition,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CircuitInner> {
        self.inner
            .lock()
            .expect("circuit breaker lock is not poisoned")
    }
}

enum Settled<T> {
    Ok(T),
    Err(ProviderError),
    Cancelled,
}

/// Lazily-populated map of per-provider breakers sharing one configuration.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<ProviderId, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the breaker guarding `provider`, creating it on first use.
    pub fn breaker_for(&self, provider: &ProviderId) -> Arc<CircuitBreaker> {
        let mut breakers = self
            .breakers
            .lock()
            .expect("breaker registry lock is not poisoned");
        Arc::clone(breakers.entry(provider.clone()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(provider.as_str(), self.config))
        }))
    }

    pub fn metrics(&self) -> Vec<(ProviderId, CircuitMetrics)> {
        let breakers = self
            .breakers
            .lock()
            .expect("breaker registry lock is not poisoned");
        let mut entries: Vec<_> = breakers
            .iter()
            .map(|(provider, breaker)| (provider.clone(), breaker.metrics()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn reset_all(&self) {
        let breakers = self
            .breakers
            .lock()
            .expect("breaker registry lock is not poisoned");
        for breaker in breakers.values() {
            breaker.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn breaker(threshold: u32, cooldown_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                enabled: true,
                failure_threshold: threshold,
                half_open_after: Duration::from_millis(cooldown_ms),
                call_timeout: None,
            },
        )
    }

    async fn fail(breaker: &CircuitBreaker, ctx: &CallContext) -> BreakerError {
        breaker
            .execute::<(), _>(ctx, async { Err(ProviderError::service("boom")) })
            .await
            .expect_err("call should fail")
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let breaker = breaker(3, 10_000);
        let ctx = CallContext::new();

        for _ in 0..2 {
            fail(&breaker, &ctx).await;
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        fail(&breaker, &ctx).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let rejected = breaker
            .execute(&ctx, async { Ok::<_, ProviderError>(1) })
            .await;
        assert_eq!(rejected, Err(BreakerError::CircuitOpen));
    }

    #[tokio::test]
    async fn success_resets_consecutive_counter() {
        let breaker = breaker(3, 10_000);
        let ctx = CallContext::new();

        fail(&breaker, &ctx).await;
        fail(&breaker, &ctx).await;
        breaker
            .execute(&ctx, async { Ok::<_, ProviderError>("ok") })
            .await
            .expect("success passes through");

        let metrics = breaker.metrics();
        assert_eq!(metrics.consecutive_failures, 0);
        assert_eq!(metrics.total_failures, 2);
        assert_eq!(metrics.total_successes, 1);
    }

    #[tokio::test]
    async fn probe_success_closes_the_circuit() {
        let breaker = breaker(1, 5);
        let ctx = CallContext::new();

        fail(&breaker, &ctx).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let value = breaker
            .execute(&ctx, async { Ok::<_, ProviderError>(42) })
            .await
            .expect("probe should be admitted and succeed");
        assert_eq!(value, 42);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn probe_failure_reopens_and_restarts_cooldown() {
        let breaker = breaker(1, 5);
        let ctx = CallContext::new();

        fail(&breaker, &ctx).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        fail(&breaker, &ctx).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let rejected = breaker
            .execute(&ctx, async { Ok::<_, ProviderError>(()) })
            .await;
        assert_eq!(rejected, Err(BreakerError::CircuitOpen));
    }

    #[tokio::test]
    async fn half_open_admits_exactly_one_probe() {
        let breaker = Arc::new(breaker(1, 1));
        let ctx = CallContext::new();

        fail(&breaker, &ctx).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let slow_probe = {
            let breaker = Arc::clone(&breaker);
            let ctx = ctx.clone();
            tokio::spawn(async move {
                breaker
                    .execute(&ctx, async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, ProviderError>(())
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        let concurrent = breaker
            .execute(&ctx, async { Ok::<_, ProviderError>(()) })
            .await;
        assert_eq!(concurrent, Err(BreakerError::CircuitOpen));

        slow_probe
            .await
            .expect("probe task completes")
            .expect("probe succeeds");
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn cancellation_is_not_recorded_and_clears_the_probe() {
        let breaker = breaker(1, 1);
        let ctx = CallContext::new();

        fail(&breaker, &ctx).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let cancelled_ctx = ctx.child();
        cancelled_ctx.cancel();
        let outcome = breaker
            .execute(&cancelled_ctx, async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, ProviderError>(())
            })
            .await;
        assert_eq!(outcome, Err(BreakerError::Cancelled));

        // The probe slot was released; the next admission probes again.
        let value = breaker
            .execute(&ctx, async { Ok::<_, ProviderError>(7) })
            .await
            .expect("new probe admitted after cancellation");
        assert_eq!(value, 7);

        let metrics = breaker.metrics();
        assert_eq!(metrics.total_failures, 1, "cancellation is not a failure");
    }

    #[tokio::test]
    async fn call_timeout_settles_as_timeout_failure() {
        let breaker = CircuitBreaker::new(
            "slow",
            CircuitBreakerConfig {
                call_timeout: Some(Duration::from_millis(10)),
                ..CircuitBreakerConfig::default()
            },
        );
        let ctx = CallContext::new();

        let outcome = breaker
            .execute(&ctx, async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, ProviderError>(())
            })
            .await;
        match outcome {
            Err(BreakerError::Upstream(error)) => assert_eq!(error.kind(), ErrorKind::Timeout),
            other => panic!("expected timeout failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disabled_breaker_is_passthrough() {
        let breaker = CircuitBreaker::new(
            "off",
            CircuitBreakerConfig {
                enabled: false,
                failure_threshold: 1,
                ..CircuitBreakerConfig::default()
            },
        );
        let ctx = CallContext::new();

        for _ in 0..5 {
            let _ = breaker
                .execute::<(), _>(&ctx, async { Err(ProviderError::service("boom")) })
                .await;
        }
        breaker
            .execute(&ctx, async { Ok::<_, ProviderError>(()) })
            .await
            .expect("disabled breaker never rejects");
    }

    #[tokio::test]
    async fn registry_hands_out_one_breaker_per_provider() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        let a = registry.breaker_for(&ProviderId::new("a"));
        let same_a = registry.breaker_for(&ProviderId::new("a"));
        let b = registry.breaker_for(&ProviderId::new("b"));

        assert!(Arc::ptr_eq(&a, &same_a));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.metrics().len(), 2);
    }
}
