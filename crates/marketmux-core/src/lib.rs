//! Core contracts for marketmux.
//!
//! This crate contains:
//! - Provider identifiers, the adapter contract, and request types
//! - The routing engine with failover and parallel aggregation
//! - Per-provider circuit breakers and rolling health tracking
//! - The error taxonomy and classifier
//! - The GET-only upstream transport gateway with per-provider rate budgets
//! - News deduplication and title similarity
//! - Startup configuration loading and validation

pub mod adapters;
pub mod circuit_breaker;
pub mod config;
pub mod context;
pub mod error;
pub mod health;
pub mod news;
pub mod provider;
pub mod router;
pub mod similarity;
pub mod source;
pub mod transport;

pub use adapters::{build_provider, AlphaVantageAdapter, YahooAdapter};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitMetrics, CircuitState,
};
pub use config::{
    expand_env, redact_secrets, AppConfig, ChainConfig, CircuitBreakerSettings, ConfigError,
    NewsDedupConfig, PerformanceConfig, ProviderConfig, RoutingConfig,
};
pub use context::CallContext;
pub use error::{
    classify_transport, provider_error_from_transport, AggregateFailure, BreakerError, ErrorKind,
    ProviderError, RouterError, ValidationError,
};
pub use health::{HealthMonitor, HealthMonitorConfig, HealthSnapshot};
pub use news::{
    parse_articles, sanitize_text, sanitize_url, serialize_articles, DedupError, NewsArticle,
    NewsDeduplicator, NewsSource,
};
pub use provider::{
    BarInterval, CapabilitySet, DataProvider, DataRequest, DataType, FinancialStatementKind,
    HolderKind, OptionSide, Period, ProviderFuture, RecommendationKind, Ticker,
};
pub use router::Router;
pub use similarity::{normalize_title, title_similarity};
pub use source::{ProviderId, ProviderInfo};
pub use transport::{
    JsonGateway, OfflineTransport, ReqwestTransport, TransportError, TransportErrorKind,
    UpstreamQuota, UpstreamRequest, UpstreamResponse, UpstreamTransport,
};
