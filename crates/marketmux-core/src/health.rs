//! Rolling per-provider health tracking.
//!
//! Each provider gets a bounded FIFO of recent call outcomes. Entries older
//! than the retention horizon are pruned on read; the window never exceeds
//! its cap. Three consecutive failures mark a provider unhealthy; any success
//! marks it healthy again. The monitor is advisory: the router skips
//! unhealthy providers, but a healthy verdict never bypasses the breaker.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::CallContext;
use crate::error::ErrorKind;
use crate::provider::DataProvider;
use crate::source::ProviderId;

/// Window and threshold settings for the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthMonitorConfig {
    /// Maximum retained outcomes per provider.
    pub window_cap: usize,
    /// Outcomes older than this are pruned on read.
    pub retention: Duration,
    /// Consecutive failures before a provider is marked unhealthy.
    pub unhealthy_threshold: u32,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            window_cap: 100,
            retention: Duration::from_secs(300),
            unhealthy_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct OutcomeRecord {
    success: bool,
    latency: Duration,
    at: Instant,
}

#[derive(Debug)]
struct ProviderHealth {
    window: VecDeque<OutcomeRecord>,
    consecutive_failures: u32,
    last_success_at: Option<Instant>,
    healthy: bool,
    error_counts: HashMap<ErrorKind, u64>,
}

impl ProviderHealth {
    fn new() -> Self {
        Self {
            window: VecDeque::new(),
            consecutive_failures: 0,
            last_success_at: None,
            healthy: true,
            error_counts: HashMap::new(),
        }
    }

    fn push(&mut self, record: OutcomeRecord, cap: usize) {
        self.window.push_back(record);
        while self.window.len() > cap {
            self.window.pop_front();
        }
    }

    fn prune(&mut self, retention: Duration) {
        let now = Instant::now();
        while let Some(front) = self.window.front() {
            if now.duration_since(front.at) > retention {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Point-in-time view of one provider's rolling window.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSnapshot {
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub sample_count: usize,
    pub failure_count: usize,
    /// Failures over total within the surviving window; 0 when empty.
    pub error_rate: f64,
    /// Mean latency over successful entries, when any exist.
    pub avg_success_latency: Option<Duration>,
    pub last_success_age: Option<Duration>,
    pub error_counts: HashMap<ErrorKind, u64>,
}

impl HealthSnapshot {
    fn untracked() -> Self {
        Self {
            healthy: true,
            consecutive_failures: 0,
            sample_count: 0,
            failure_count: 0,
            error_rate: 0.0,
            avg_success_latency: None,
            last_success_age: None,
            error_counts: HashMap::new(),
        }
    }
}

/// Advisory rolling-window health tracker, one record per provider.
#[derive(Debug, Default)]
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    records: Mutex<HashMap<ProviderId, Arc<Mutex<ProviderHealth>>>>,
}

impl HealthMonitor {
    pub fn new(config: HealthMonitorConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    fn record_for(&self, provider: &ProviderId) -> Arc<Mutex<ProviderHealth>> {
        let mut records = self
            .records
            .lock()
            .expect("health record map lock is not poisoned");
        Arc::clone(
            records
                .entry(provider.clone())
                .or_insert_with(|| Arc::new(Mutex::new(ProviderHealth::new()))),
        )
    }

    pub fn record_success(&self, provider: &ProviderId, latency: Duration) {
        let record = self.record_for(provider);
        let mut health = record.lock().expect("health record lock is not poisoned");
        health.push(
            OutcomeRecord {
                success: true,
                latency,
                at: Instant::now(),
            },
            self.config.window_cap,
        );
        health.consecutive_failures = 0;
        health.last_success_at = Some(Instant::now());
        if !health.healthy {
            debug!(provider = %provider, "provider healthy again");
        }
        health.healthy = true;
    }

    pub fn record_failure(&self, provider: &ProviderId, kind: ErrorKind) {
        let record = self.record_for(provider);
        let mut health = record.lock().expect("health record lock is not poisoned");
        health.push(
            OutcomeRecord {
                success: false,
                latency: Duration::ZERO,
                at: Instant::now(),
            },
            self.config.window_cap,
        );
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        *health.error_counts.entry(kind).or_insert(0) += 1;
        if health.consecutive_failures >= self.config.unhealthy_threshold && health.healthy {
            warn!(
                provider = %provider,
                failures = health.consecutive_failures,
                "provider marked unhealthy"
            );
            health.healthy = false;
        }
    }

    /// Marks a provider healthy without touching its rolling window. Used by
    /// the background prober on a passing probe.
    pub fn mark_healthy(&self, provider: &ProviderId) {
        let record = self.record_for(provider);
        let mut health = record.lock().expect("health record lock is not poisoned");
        health.healthy = true;
        health.consecutive_failures = 0;
    }

    /// Advisory healthy flag; unknown providers default to healthy.
    pub fn is_healthy(&self, provider: &ProviderId) -> bool {
        let records = self
            .records
            .lock()
            .expect("health record map lock is not poisoned");
        match records.get(provider) {
            Some(record) => {
                record
                    .lock()
                    .expect("health record lock is not poisoned")
                    .healthy
            }
            None => true,
        }
    }

    /// Prunes stale entries and returns a snapshot of the surviving window.
    pub fn status(&self, provider: &ProviderId) -> HealthSnapshot {
        let record = {
            let records = self
                .records
                .lock()
                .expect("health record map lock is not poisoned");
            match records.get(provider) {
                Some(record) => Arc::clone(record),
                None => return HealthSnapshot::untracked(),
            }
        };

        let mut health = record.lock().expect("health record lock is not poisoned");
        health.prune(self.config.retention);

        let sample_count = health.window.len();
        let failure_count = health.window.iter().filter(|r| !r.success).count();
        let error_rate = if sample_count == 0 {
            0.0
        } else {
            failure_count as f64 / sample_count as f64
        };

        let successes: Vec<Duration> = health
            .window
            .iter()
            .filter(|r| r.success)
            .map(|r| r.latency)
            .collect();
        let avg_success_latency = if successes.is_empty() {
            None
        } else {
            Some(successes.iter().sum::<Duration>() / successes.len() as u32)
        };

        HealthSnapshot {
            healthy: health.healthy,
            consecutive_failures: health.consecutive_failures,
            sample_count,
            failure_count,
            error_rate,
            avg_success_latency,
            last_success_age: health.last_success_at.map(|at| at.elapsed()),
            error_counts: health.error_counts.clone(),
        }
    }

    /// Snapshots for every tracked provider, sorted by id.
    pub fn snapshots(&self) -> Vec<(ProviderId, HealthSnapshot)> {
        let ids: Vec<ProviderId> = {
            let records = self
                .records
                .lock()
                .expect("health record map lock is not poisoned");
            records.keys().cloned().collect()
        };
        let mut snapshots: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let snapshot = self.status(&id);
                (id, snapshot)
            })
            .collect();
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));
        snapshots
    }

    /// Starts the background probe loop.
    ///
    /// Every `interval`, each provider exposing a probe is checked in
    /// parallel: a pass re-marks the provider healthy, a failure records a
    /// `ServiceError` in its window. The task stops when `cancel` fires.
    pub fn spawn_prober(
        self: &Arc<Self>,
        providers: Vec<Arc<dyn DataProvider>>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        monitor.probe_all(&providers, &cancel).await;
                    }
                }
            }
        })
    }

    async fn probe_all(&self, providers: &[Arc<dyn DataProvider>], cancel: &CancellationToken) {
        let probes = providers
            .iter()
            .map(|provider| self.probe_one(Arc::clone(provider), cancel.child_token()));
        join_all(probes).await;
    }

    async fn probe_one(&self, provider: Arc<dyn DataProvider>, cancel: CancellationToken) {
        let ctx = CallContext::with_cancel(cancel).with_timeout(PROBE_TIMEOUT);
        let id = provider.id();
        let Some(probe) = provider.health_probe(&ctx) else {
            return;
        };
        match probe.await {
            Ok(()) => self.mark_healthy(&id),
            Err(error) => {
                debug!(provider = %id, error = %error, "health probe failed");
                self.record_failure(&id, ErrorKind::ServiceError);
            }
        }
    }
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
