//! Scripted offline providers for routing behavior tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use marketmux_core::{
    AppConfig, CallContext, CapabilitySet, ChainConfig, DataProvider, DataRequest, DataType,
    ProviderConfig, ProviderError, ProviderFuture, ProviderId, ProviderInfo,
};

/// Provider that replays a queued list of outcomes, one per call.
pub struct ScriptedProvider {
    id: ProviderId,
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(id: &str, outcomes: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            id: ProviderId::new(id),
            script: Mutex::new(outcomes.into()),
            calls: AtomicUsize::new(0),
            delay: None,
        })
    }

    pub fn delayed(
        id: &str,
        delay: Duration,
        outcomes: Vec<Result<String, ProviderError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: ProviderId::new(id),
            script: Mutex::new(outcomes.into()),
            calls: AtomicUsize::new(0),
            delay: Some(delay),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DataProvider for ScriptedProvider {
    fn id(&self) -> ProviderId {
        self.id.clone()
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo::new(self.id.clone(), "scripted", "0.0")
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::full()
    }

    fn fetch<'a>(
        &'a self,
        _req: &'a DataRequest,
        _ctx: &'a CallContext,
    ) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.script
                .lock()
                .expect("script lock")
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::service("script exhausted")))
        })
    }
}

/// Config declaring `ids` in order, with an explicit chain for `data_type`.
pub fn chain_config(data_type: DataType, ids: &[&str], aggregate: Option<bool>) -> AppConfig {
    let mut config = AppConfig {
        providers: ids
            .iter()
            .map(|id| ProviderConfig {
                id: ProviderId::new(*id),
                r#type: String::from("scripted"),
                name: None,
                enabled: true,
                priority: 10,
                api_key: None,
            })
            .collect(),
        ..AppConfig::default()
    };
    config.routing.data_type_routing.insert(
        data_type,
        ChainConfig {
            primary_provider_id: ProviderId::new(ids[0]),
            fallback_provider_ids: ids[1..].iter().map(|id| ProviderId::new(*id)).collect(),
            aggregate_results: aggregate,
            timeout_seconds: None,
        },
    );
    config
}
