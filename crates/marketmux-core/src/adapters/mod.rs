//! Built-in provider adapters.

mod alphavantage;
mod yahoo;

pub use alphavantage::AlphaVantageAdapter;
pub use yahoo::YahooAdapter;

use std::sync::Arc;

use tracing::warn;

use crate::config::ProviderConfig;
use crate::provider::DataProvider;
use crate::transport::UpstreamTransport;

/// Instantiates the adapter a provider declaration asks for, or `None` when
/// the type is unknown.
pub fn build_provider(
    config: &ProviderConfig,
    transport: Arc<dyn UpstreamTransport>,
) -> Option<Arc<dyn DataProvider>> {
    match config.r#type.trim().to_ascii_lowercase().as_str() {
        "yahoo" => Some(Arc::new(YahooAdapter::new(config.id.clone(), transport))),
        "alphavantage" => Some(Arc::new(AlphaVantageAdapter::new(
            config.id.clone(),
            transport,
            config.api_key.clone(),
        ))),
        other => {
            warn!(provider = %config.id, r#type = other, "unknown provider type, skipping");
            None
        }
    }
}
