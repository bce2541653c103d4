//! Startup configuration.
//!
//! Configuration is loaded from a JSON file once, validated, and never
//! mutated afterwards. An absent file adopts the built-in defaults; a present
//! but unreadable or invalid file fails startup. `${NAME}` tokens anywhere in
//! the file are expanded from the environment before parsing, and an unset
//! variable is a validation failure, not a silent empty string.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::provider::DataType;
use crate::source::ProviderId;

/// Bounds enforced by semantic validation.
const SIMILARITY_RANGE: (f64, f64) = (0.50, 0.99);
const WINDOW_HOURS_RANGE: (i64, i64) = (1, 168);
const MAX_ARTICLES_RANGE: (usize, usize) = (10, 1000);

/// Configuration failures; all fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file '{path}': {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("environment variable '{name}' referenced by config is not set")]
    MissingEnvVar { name: String },
    #[error("unterminated ${{...}} reference in config")]
    UnterminatedEnvRef,
    #[error("config file is not valid JSON: {message}")]
    Parse { message: String },
    #[error("config must declare at least one provider")]
    NoProviders,
    #[error("provider at index {index} has an empty id")]
    ProviderMissingId { index: usize },
    #[error("provider '{id}' has an empty type")]
    ProviderMissingType { id: ProviderId },
    #[error("duplicate provider id '{id}'")]
    DuplicateProviderId { id: ProviderId },
    #[error("routing for '{data_type}' references undeclared provider '{id}'")]
    UnknownRoutingProvider { data_type: DataType, id: ProviderId },
    #[error("newsDeduplication.similarityThreshold {value} outside [0.50, 0.99]")]
    SimilarityThresholdOutOfRange { value: f64 },
    #[error("newsDeduplication.timestampWindowHours {value} outside [1, 168]")]
    TimestampWindowOutOfRange { value: i64 },
    #[error("newsDeduplication.maxArticlesForComparison {value} outside [10, 1000]")]
    MaxArticlesOutOfRange { value: usize },
}

/// One declared upstream provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub id: ProviderId,
    /// Adapter implementation selector, e.g. `yahoo` or `alphavantage`.
    pub r#type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Explicit chain for one data type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    pub primary_provider_id: ProviderId,
    #[serde(default)]
    pub fallback_provider_ids: Vec<ProviderId>,
    /// Defaults to true for news data types, false otherwise.
    #[serde(default)]
    pub aggregate_results: Option<bool>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// Per-data-type routing table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingConfig {
    #[serde(default)]
    pub data_type_routing: HashMap<DataType, ChainConfig>,
}

/// News deduplication tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsDedupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_window_hours")]
    pub timestamp_window_hours: i64,
    #[serde(default = "default_max_articles")]
    pub max_articles_for_comparison: usize,
    /// Accepted for compatibility; content comparison is not performed.
    #[serde(default)]
    pub compare_content: bool,
}

impl Default for NewsDedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: default_similarity_threshold(),
            timestamp_window_hours: default_window_hours(),
            max_articles_for_comparison: default_max_articles(),
            compare_content: false,
        }
    }
}

/// Circuit breaker settings shared by every provider circuit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_half_open_after")]
    pub half_open_after_seconds: u64,
    /// Per-call deadline in seconds; 0 disables it.
    #[serde(default)]
    pub timeout_seconds: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            half_open_after_seconds: default_half_open_after(),
            timeout_seconds: 0,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            enabled: self.enabled,
            failure_threshold: self.failure_threshold,
            half_open_after: Duration::from_secs(self.half_open_after_seconds),
            call_timeout: match self.timeout_seconds {
                0 => None,
                seconds => Some(Duration::from_secs(seconds)),
            },
        }
    }
}

/// Request budgets and background cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceConfig {
    #[serde(default = "default_request_timeout")]
    pub default_timeout_seconds: u64,
    #[serde(default = "default_dedup_budget_ms")]
    pub news_dedup_budget_ms: u64,
    /// Health probe cadence; absent disables the background prober.
    #[serde(default)]
    pub health_probe_interval_seconds: Option<u64>,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: default_request_timeout(),
            news_dedup_budget_ms: default_dedup_budget_ms(),
            health_probe_interval_seconds: None,
        }
    }
}

/// Immutable runtime configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub news_deduplication: NewsDedupConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            providers: vec![
                ProviderConfig {
                    id: ProviderId::new("yahoo"),
                    r#type: String::from("yahoo"),
                    name: Some(String::from("Yahoo Finance")),
                    enabled: true,
                    priority: 10,
                    api_key: None,
                },
                ProviderConfig {
                    id: ProviderId::new("alphavantage"),
                    r#type: String::from("alphavantage"),
                    name: Some(String::from("Alpha Vantage")),
                    enabled: true,
                    priority: 20,
                    api_key: None,
                },
            ],
            routing: RoutingConfig::default(),
            news_deduplication: NewsDedupConfig::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            performance: PerformanceConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads and validates configuration.
    ///
    /// `None` adopts the built-in defaults. A present path that cannot be
    /// read, parsed, expanded, or validated fails startup.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            info!("no config file given, using built-in defaults");
            return Ok(Self::default());
        };

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
        let expanded = expand_env(&raw)?;
        let config: Self =
            serde_json::from_str(&expanded).map_err(|error| ConfigError::Parse {
                message: redact_secrets(&error.to_string()),
            })?;
        config.validate()?;
        info!(
            path = %path.display(),
            providers = config.providers.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }

        let mut seen: Vec<&ProviderId> = Vec::new();
        for (index, provider) in self.providers.iter().enumerate() {
            if provider.id.is_empty() {
                return Err(ConfigError::ProviderMissingId { index });
            }
            if provider.r#type.trim().is_empty() {
                return Err(ConfigError::ProviderMissingType {
                    id: provider.id.clone(),
                });
            }
            if seen.contains(&&provider.id) {
                return Err(ConfigError::DuplicateProviderId {
                    id: provider.id.clone(),
                });
            }
            seen.push(&provider.id);
        }

        for (data_type, chain) in &self.routing.data_type_routing {
            let mut referenced = vec![&chain.primary_provider_id];
            referenced.extend(chain.fallback_provider_ids.iter());
            for id in referenced {
                if !self.providers.iter().any(|p| &p.id == id) {
                    return Err(ConfigError::UnknownRoutingProvider {
                        data_type: *data_type,
                        id: id.clone(),
                    });
                }
            }
        }

        let threshold = self.news_deduplication.similarity_threshold;
        if !(SIMILARITY_RANGE.0..=SIMILARITY_RANGE.1).contains(&threshold) {
            return Err(ConfigError::SimilarityThresholdOutOfRange { value: threshold });
        }
        let window = self.news_deduplication.timestamp_window_hours;
        if !(WINDOW_HOURS_RANGE.0..=WINDOW_HOURS_RANGE.1).contains(&window) {
            return Err(ConfigError::TimestampWindowOutOfRange { value: window });
        }
        let max_articles = self.news_deduplication.max_articles_for_comparison;
        if !(MAX_ARTICLES_RANGE.0..=MAX_ARTICLES_RANGE.1).contains(&max_articles) {
            return Err(ConfigError::MaxArticlesOutOfRange {
                value: max_articles,
            });
        }

        Ok(())
    }

    pub fn chain_for(&self, data_type: DataType) -> Option<&ChainConfig> {
        self.routing.data_type_routing.get(&data_type)
    }

    /// Whether requests for `data_type` aggregate across providers. News
    /// data types aggregate unless explicitly disabled.
    pub fn aggregate_for(&self, data_type: DataType) -> bool {
        match self
            .chain_for(data_type)
            .and_then(|chain| chain.aggregate_results)
        {
            Some(explicit) => explicit,
            None => data_type.is_news(),
        }
    }

    /// Chain-level timeout for `data_type`.
    pub fn timeout_for(&self, data_type: DataType) -> Duration {
        let seconds = self
            .chain_for(data_type)
            .and_then(|chain| chain.timeout_seconds)
            .unwrap_or(self.performance.default_timeout_seconds);
        Duration::from_secs(seconds)
    }

    pub fn news_dedup_budget(&self) -> Duration {
        Duration::from_millis(self.performance.news_dedup_budget_ms)
    }
}

/// Replaces every `${NAME}` token with the value of environment variable
/// `NAME`. Unset variables fail the load.
pub fn expand_env(raw: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(ConfigError::UnterminatedEnvRef);
        };
        let name = &after[..end];
        let value = std::env::var(name).map_err(|_| ConfigError::MissingEnvVar {
            name: name.to_owned(),
        })?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Replaces any run of 16 or more alphanumerics with `[REDACTED]` so keys
/// and tokens embedded in config content never reach logs or clients.
pub fn redact_secrets(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut run = String::new();
    for ch in message.chars() {
        if ch.is_ascii_alphanumeric() {
            run.push(ch);
            continue;
        }
        flush_run(&mut out, &mut run);
        out.push(ch);
    }
    flush_run(&mut out, &mut run);
    out
}

fn flush_run(out: &mut String, run: &mut String) {
    if run.len() >= 16 {
        out.push_str("[REDACTED]");
    } else {
        out.push_str(run);
    }
    run.clear();
}

const fn default_true() -> bool {
    true
}

const fn default_version() -> u32 {
    1
}

const fn default_priority() -> u32 {
    10
}

const fn default_similarity_threshold() -> f64 {
    0.85
}

const fn default_window_hours() -> i64 {
    24
}

const fn default_max_articles() -> usize {
    100
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_half_open_after() -> u64 {
    30
}

const fn default_request_timeout() -> u64 {
    30
}

const fn default_dedup_budget_ms() -> u64 {
    500
}
