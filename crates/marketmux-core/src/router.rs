//! Request routing across providers.
//!
//! For every request the router resolves an ordered provider chain from
//! configuration, then executes it in one of two modes: sequential failover
//! (stop at the first success) or parallel aggregation (settle everything,
//! then reduce). Each provider call runs through its circuit breaker, and
//! every outcome feeds the health monitor.
//!
//! Ordering guarantees: failover tries providers in strict chain order;
//! aggregation launches concurrently but reduces successes in chain order,
//! so the result is deterministic for a given success set.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::circuit_breaker::{CircuitBreakerRegistry, CircuitMetrics};
use crate::config::AppConfig;
use crate::context::CallContext;
use crate::error::{
    AggregateFailure, BreakerError, ErrorKind, ProviderError, RouterError,
};
use crate::health::{HealthMonitor, HealthSnapshot};
use crate::news::{DedupError, NewsDeduplicator};
use crate::provider::{DataProvider, DataRequest, DataType};
use crate::source::ProviderId;

/// Provider registry and routing engine.
pub struct Router {
    providers: HashMap<ProviderId, Arc<dyn DataProvider>>,
    breakers: CircuitBreakerRegistry,
    health: Arc<HealthMonitor>,
    config: Arc<AppConfig>,
    dedup: NewsDeduplicator,
}

impl Router {
    pub fn new(config: Arc<AppConfig>, providers: Vec<Arc<dyn DataProvider>>) -> Self {
        let breakers = CircuitBreakerRegistry::new(config.circuit_breaker.to_breaker_config());
        let dedup = NewsDeduplicator::new(
            config.news_deduplication.clone(),
            config.news_dedup_budget(),
        );
        Self {
            providers: providers
                .into_iter()
                .map(|provider| (provider.id(), provider))
                .collect(),
            breakers,
            health: Arc::new(HealthMonitor::default()),
            config,
            dedup,
        }
    }

    /// Routes one request to completion.
    pub async fn dispatch(
        &self,
        req: &DataRequest,
        ctx: &CallContext,
    ) -> Result<String, RouterError> {
        let data_type = req.data_type();
        let ctx = ctx.with_timeout(self.config.timeout_for(data_type));
        let chain = self.resolve_chain(data_type);
        debug!(
            data_type = %data_type,
            chain = ?chain.iter().map(ProviderId::as_str).collect::<Vec<_>>(),
            "resolved provider chain"
        );

        if self.config.aggregate_for(data_type) {
            self.run_aggregation(data_type, &chain, req, &ctx).await
        } else {
            self.run_failover(data_type, &chain, req, &ctx).await
        }
    }

    /// Ordered, deduplicated chain of registered providers able to serve
    /// `data_type`. Unknown ids and capability mismatches are dropped
    /// silently.
    fn resolve_chain(&self, data_type: DataType) -> Vec<ProviderId> {
        let candidates: Vec<ProviderId> = match self.config.chain_for(data_type) {
            Some(chain) => {
                let mut ids = vec![chain.primary_provider_id.clone()];
                ids.extend(chain.fallback_provider_ids.iter().cloned());
                ids
            }
            None => {
                let mut declared: Vec<_> = self
                    .config
                    .providers
                    .iter()
                    .filter(|provider| provider.enabled)
                    .collect();
                declared.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.cmp(&b.id)));
                declared.into_iter().map(|p| p.id.clone()).collect()
            }
        };

        let mut seen = HashSet::new();
        candidates
            .into_iter()
            .filter(|id| {
                self.providers
                    .get(id)
                    .is_some_and(|provider| provider.capabilities().supports(data_type))
            })
            .filter(|id| seen.insert(id.clone()))
            .collect()
    }

    async fn run_failover(
        &self,
        data_type: DataType,
        chain: &[ProviderId],
        req: &DataRequest,
        ctx: &CallContext,
    ) -> Result<String, RouterError> {
        let mut attempted = Vec::new();
        let mut errors: Vec<(ProviderId, ProviderError)> = Vec::new();

        for provider_id in chain {
            if ctx.is_cancelled() {
                return Err(RouterError::Cancelled);
            }
            if !self.health.is_healthy(provider_id) {
                debug!(provider = %provider_id, "skipping unhealthy provider");
                continue;
            }

            attempted.push(provider_id.clone());
            match self.call_provider(provider_id, req, ctx).await {
                Ok(payload) => {
                    if !errors.is_empty() {
                        info!(
                            provider = %provider_id,
                            failed_attempts = errors.len(),
                            "failover succeeded after earlier failures"
                        );
                    }
                    return Ok(payload);
                }
                Err(BreakerError::Cancelled) => return Err(RouterError::Cancelled),
                Err(BreakerError::CircuitOpen) => {
                    self.health
                        .record_failure(provider_id, ErrorKind::ServiceError);
                    errors.push((
                        provider_id.clone(),
                        ProviderError::service("circuit breaker is open"),
                    ));
                }
                Err(BreakerError::Upstream(error)) => {
                    self.health.record_failure(provider_id, error.kind());
                    let terminal = error.kind() == ErrorKind::NotFound;
                    errors.push((provider_id.clone(), error));
                    if terminal {
                        // The entity does not exist; asking another provider
                        // for it would waste the rest of the chain.
                        break;
                    }
                }
            }
        }

        warn!(data_type = %data_type, attempts = attempted.len(), "failover chain exhausted");
        Err(RouterError::Exhausted(AggregateFailure {
            data_type,
            attempted,
            errors,
        }))
    }

    async fn run_aggregation(
        &self,
        data_type: DataType,
        chain: &[ProviderId],
        req: &DataRequest,
        ctx: &CallContext,
    ) -> Result<String, RouterError> {
        let eligible: Vec<&ProviderId> = chain
            .iter()
            .filter(|provider_id| {
                let healthy = self.health.is_healthy(provider_id);
                if !healthy {
                    debug!(provider = %provider_id, "skipping unhealthy provider");
                }
                healthy
            })
            .collect();

        let calls = eligible.iter().map(|provider_id| async move {
            let outcome = self.call_provider(provider_id, req, ctx).await;
            ((*provider_id).clone(), outcome)
        });
        let settled = join_all(calls).await;

        if ctx.is_cancelled() {
            return Err(RouterError::Cancelled);
        }

        let mut attempted = Vec::new();
        let mut successes: Vec<(ProviderId, String)> = Vec::new();
        let mut errors: Vec<(ProviderId, ProviderError)> = Vec::new();
        for (provider_id, outcome) in settled {
            attempted.push(provider_id.clone());
            match outcome {
                Ok(payload) => successes.push((provider_id, payload)),
                Err(BreakerError::Cancelled) => return Err(RouterError::Cancelled),
                Err(BreakerError::CircuitOpen) => {
                    self.health
                        .record_failure(&provider_id, ErrorKind::ServiceError);
                    errors.push((
                        provider_id,
                        ProviderError::service("circuit breaker is open"),
                    ));
                }
                Err(BreakerError::Upstream(error)) => {
                    self.health.record_failure(&provider_id, error.kind());
                    errors.push((provider_id, error));
                }
            }
        }

        if successes.is_empty() {
            warn!(data_type = %data_type, peers = attempted.len(), "all aggregation peers failed");
            return Err(RouterError::Exhausted(AggregateFailure {
                data_type,
                attempted,
                errors,
            }));
        }

        if data_type.is_news() && self.config.news_deduplication.enabled {
            match self.dedup.deduplicate(&successes, ctx) {
                Ok(payload) => return Ok(payload),
                Err(DedupError::Cancelled) => return Err(RouterError::Cancelled),
                Err(error) => {
                    warn!(error = %error, "news deduplication failed, returning raw merge");
                }
            }
        }

        Ok(raw_merge(&successes))
    }

    /// One provider call through its breaker, with health bookkeeping on
    /// success. Failure bookkeeping happens at the call sites, which know
    /// the mode-specific policy.
    async fn call_provider(
        &self,
        provider_id: &ProviderId,
        req: &DataRequest,
        ctx: &CallContext,
    ) -> Result<String, BreakerError> {
        let provider = self
            .providers
            .get(provider_id)
            .expect("chain only contains registered providers");
        let breaker = self.breakers.breaker_for(provider_id);
        let started = Instant::now();

        let result = breaker.execute(ctx, provider.fetch(req, ctx)).await;
        if result.is_ok() {
            self.health.record_success(provider_id, started.elapsed());
        }
        result
    }

    /// Read-only per-provider health view.
    pub fn health_snapshots(&self) -> Vec<(ProviderId, HealthSnapshot)> {
        self.health.snapshots()
    }

    /// Read-only per-provider breaker view.
    pub fn breaker_metrics(&self) -> Vec<(ProviderId, CircuitMetrics)> {
        self.breakers.metrics()
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn registered_providers(&self) -> Vec<Arc<dyn DataProvider>> {
        let mut providers: Vec<_> = self.providers.values().cloned().collect();
        providers.sort_by_key(|provider| provider.id());
        providers
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

/// Chain-ordered concatenation of successful payloads, one blank line
/// between providers.
fn raw_merge(successes: &[(ProviderId, String)]) -> String {
    successes
        .iter()
        .map(|(_, payload)| payload.trim_end_matches(['\n', '\r', ' ']))
        .collect::<Vec<_>>()
        .join("\n\n")
}
