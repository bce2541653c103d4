//! Alpha Vantage adapter.
//!
//! Covers daily price history, company overview, and the news sentiment
//! feed. The free tier allows 5 requests per minute, enforced locally so an
//! exhausted budget surfaces as `RateLimitExceeded` instead of burning the
//! upstream quota.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::PrimitiveDateTime;

use crate::context::CallContext;
use crate::error::ProviderError;
use crate::provider::{
    CapabilitySet, DataProvider, DataRequest, DataType, ProviderFuture, Ticker,
};
use crate::source::{ProviderId, ProviderInfo};
use crate::transport::{
    JsonGateway, OfflineTransport, UpstreamQuota, UpstreamRequest, UpstreamTransport,
};

const ADAPTER_VERSION: &str = "1.4.0";
const BASE_URL: &str = "https://www.alphavantage.co/query";

/// Free-tier budget: 5 requests per minute.
const QUOTA_WINDOW: Duration = Duration::from_secs(60);
const QUOTA_LIMIT: u32 = 5;

const FEED_TIME_FORMAT: &[FormatItem<'static>] =
    format_description!("[year][month][day]T[hour][minute][second]");
const BLOCK_TIME_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Alpha Vantage adapter for prices, fundamentals overview, and news.
pub struct AlphaVantageAdapter {
    id: ProviderId,
    gateway: JsonGateway,
    api_key: String,
}

impl AlphaVantageAdapter {
    pub fn new(
        id: ProviderId,
        transport: Arc<dyn UpstreamTransport>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            id,
            gateway: JsonGateway::new(
                transport,
                UpstreamQuota::new(QUOTA_WINDOW, QUOTA_LIMIT),
                "alphavantage",
            ),
            api_key: api_key.unwrap_or_else(|| String::from("demo")),
        }
    }

    pub fn mock_mode(id: ProviderId) -> Self {
        Self::new(id, Arc::new(OfflineTransport), None)
    }

    async fn get_json(&self, url: String, ctx: &CallContext) -> Result<Value, ProviderError> {
        let value = self
            .gateway
            .get_json(UpstreamRequest::new(url), ctx)
            .await?;

        // The API reports throttling and bad requests inside a 200 body.
        if let Some(note) = value["Note"].as_str() {
            return Err(ProviderError::rate_limited(note.to_owned()));
        }
        if let Some(message) = value["Error Message"].as_str() {
            return Err(ProviderError::not_found(message.to_owned()));
        }
        Ok(value)
    }

    async fn historical_prices(
        &self,
        ticker: &Ticker,
        ctx: &CallContext,
    ) -> Result<String, ProviderError> {
        let url = format!(
            "{BASE_URL}?function=TIME_SERIES_DAILY&symbol={}&outputsize=compact&apikey={}",
            ticker, self.api_key
        );
        let value = self.get_json(url, ctx).await?;
        let Some(series) = value["Time Series (Daily)"].as_object() else {
            return Err(ProviderError::data(
                "alphavantage response lacks daily time series",
            ));
        };

        let mut rows: Vec<(&String, &Value)> = series.iter().collect();
        rows.sort_by(|a, b| b.0.cmp(a.0));

        let mut lines = vec![format!("Historical prices for {ticker} (daily)")];
        for (date, bar) in rows {
            lines.push(format!(
                "{date} | Open {} | High {} | Low {} | Close {} | Volume {}",
                bar["1. open"].as_str().unwrap_or("-"),
                bar["2. high"].as_str().unwrap_or("-"),
                bar["3. low"].as_str().unwrap_or("-"),
                bar["4. close"].as_str().unwrap_or("-"),
                bar["5. volume"].as_str().unwrap_or("-"),
            ));
        }
        Ok(lines.join("\n"))
    }

    async fn stock_info(&self, ticker: &Ticker, ctx: &CallContext) -> Result<String, ProviderError> {
        let url = format!(
            "{BASE_URL}?function=OVERVIEW&symbol={}&apikey={}",
            ticker, self.api_key
        );
        let value = self.get_json(url, ctx).await?;
        let Some(fields) = value.as_object() else {
            return Err(ProviderError::data("alphavantage overview is not an object"));
        };
        if fields.is_empty() {
            return Err(ProviderError::not_found(format!(
                "no overview data for {ticker}"
            )));
        }

        let mut lines = vec![format!("Stock information for {ticker}")];
        for label in [
            "Name",
            "Exchange",
            "Currency",
            "Sector",
            "Industry",
            "MarketCapitalization",
            "PERatio",
            "DividendYield",
            "52WeekHigh",
            "52WeekLow",
        ] {
            if let Some(text) = fields.get(label).and_then(Value::as_str) {
                if !text.is_empty() && text != "None" {
                    lines.push(format!("{label}: {text}"));
                }
            }
        }
        Ok(lines.join("\n"))
    }

    async fn news(&self, topic: Option<&Ticker>, ctx: &CallContext) -> Result<String, ProviderError> {
        let url = match topic {
            Some(ticker) => format!(
                "{BASE_URL}?function=NEWS_SENTIMENT&tickers={}&limit=10&apikey={}",
                ticker, self.api_key
            ),
            None => format!(
                "{BASE_URL}?function=NEWS_SENTIMENT&topics=financial_markets&limit=20&apikey={}",
                self.api_key
            ),
        };
        let value = self.get_json(url, ctx).await?;
        let Some(feed) = value["feed"].as_array() else {
            return Err(ProviderError::data("alphavantage response lacks news feed"));
        };

        let mut blocks = Vec::new();
        for item in feed {
            let Some(title) = item["title"].as_str() else { continue };
            let mut lines = vec![format!("Title: {title}")];
            lines.push(format!(
                "Publisher: {}",
                item["source"].as_str().unwrap_or("")
            ));
            let published = item["time_published"]
                .as_str()
                .and_then(reformat_feed_time)
                .unwrap_or_else(|| String::from("Unknown"));
            lines.push(format!("Published: {published}"));
            if let Some(sentiments) = item["ticker_sentiment"].as_array() {
                let tickers: Vec<&str> = sentiments
                    .iter()
                    .filter_map(|entry| entry["ticker"].as_str())
                    .collect();
                if !tickers.is_empty() {
                    lines.push(format!("Related Tickers: {}", tickers.join(", ")));
                }
            }
            lines.push(format!("URL: {}", item["url"].as_str().unwrap_or("")));
            blocks.push(lines.join("\n"));
        }

        if blocks.is_empty() {
            return Err(ProviderError::not_found("no news in alphavantage feed"));
        }
        Ok(blocks.join("\n\n"))
    }

    fn mock_payload(&self, req: &DataRequest) -> String {
        match req {
            DataRequest::HistoricalPrices { ticker, .. } => format!(
                "Historical prices for {ticker} (daily)\n2026-01-03 | Open 184.22 | High 185.88 | Low 183.43 | Close 184.25 | Volume 58414500\n2026-01-02 | Open 187.15 | High 188.44 | Low 183.89 | Close 185.64 | Volume 82488700"
            ),
            DataRequest::StockInfo { ticker } => format!(
                "Stock information for {ticker}\nName: {ticker} Inc.\nExchange: NASDAQ\nCurrency: USD\nSector: TECHNOLOGY"
            ),
            DataRequest::News { ticker } => format!(
                "Title: {ticker} shares rally after earnings beat\nPublisher: MarketWatch\nPublished: 2026-02-27 10:05:00\nRelated Tickers: {ticker}\nURL: https://news.example.com/{ticker}/earnings-beat"
            ),
            DataRequest::MarketNews => String::from(
                "Title: Stocks close higher as rate fears ease\nPublisher: Benzinga\nPublished: 2026-02-27 21:10:00\nURL: https://news.example.com/markets/close-higher",
            ),
            _ => String::new(),
        }
    }
}

impl DataProvider for AlphaVantageAdapter {
    fn id(&self) -> ProviderId {
        self.id.clone()
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo::new(self.id.clone(), "Alpha Vantage", ADAPTER_VERSION)
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::of(&[
            DataType::HistoricalPrices,
            DataType::StockInfo,
            DataType::News,
            DataType::MarketNews,
        ])
    }

    fn fetch<'a>(
        &'a self,
        req: &'a DataRequest,
        ctx: &'a CallContext,
    ) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            if !self.capabilities().supports(req.data_type()) {
                return Err(ProviderError::service(format!(
                    "alphavantage does not support {}",
                    req.data_type()
                )));
            }
            if self.gateway.is_offline() {
                return Ok(self.mock_payload(req));
            }

            match req {
                DataRequest::HistoricalPrices { ticker, .. } => {
                    self.historical_prices(ticker, ctx).await
                }
                DataRequest::StockInfo { ticker } => self.stock_info(ticker, ctx).await,
                DataRequest::News { ticker } => self.news(Some(ticker), ctx).await,
                DataRequest::MarketNews => self.news(None, ctx).await,
                _ => unreachable!("capability check rejects unsupported operations"),
            }
        })
    }

    fn health_probe<'a>(&'a self, ctx: &'a CallContext) -> Option<ProviderFuture<'a, ()>> {
        Some(Box::pin(async move {
            if self.gateway.is_offline() {
                return Ok(());
            }
            self.news(None, ctx).await.map(|_| ())
        }))
    }
}

/// Feed timestamps arrive as `20260227T100000`; the block format wants
/// `2026-02-27 10:00:00`.
fn reformat_feed_time(value: &str) -> Option<String> {
    let parsed = PrimitiveDateTime::parse(value, FEED_TIME_FORMAT).ok()?;
    parsed.format(BLOCK_TIME_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::news::parse_articles;
    use crate::provider::{BarInterval, OptionSide, Period};

    fn adapter() -> AlphaVantageAdapter {
        AlphaVantageAdapter::mock_mode(ProviderId::new("alphavantage"))
    }

    fn ticker() -> Ticker {
        Ticker::parse("AAPL").expect("valid ticker")
    }

    #[test]
    fn capabilities_exclude_unsupported_operations() {
        let caps = adapter().capabilities();
        assert!(caps.supports(DataType::News));
        assert!(caps.supports(DataType::HistoricalPrices));
        assert!(!caps.supports(DataType::OptionChain));
        assert!(!caps.supports(DataType::HolderInfo));
    }

    #[tokio::test]
    async fn unsupported_operations_fail_cleanly() {
        let req = DataRequest::OptionChain {
            ticker: ticker(),
            expiration: time::macros::date!(2026 - 03 - 20),
            side: OptionSide::Calls,
        };
        let error = adapter()
            .fetch(&req, &CallContext::new())
            .await
            .expect_err("option chain is unsupported");
        assert_eq!(error.kind(), crate::error::ErrorKind::ServiceError);
    }

    #[tokio::test]
    async fn mock_news_parses_as_valid_blocks() {
        let payload = adapter()
            .fetch(&DataRequest::News { ticker: ticker() }, &CallContext::new())
            .await
            .expect("mock news");
        let articles = parse_articles(&ProviderId::new("alphavantage"), &payload);
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].publisher, "MarketWatch");
    }

    #[tokio::test]
    async fn mock_prices_serve_offline() {
        let req = DataRequest::HistoricalPrices {
            ticker: ticker(),
            period: Period::OneMonth,
            interval: BarInterval::OneDay,
        };
        let payload = adapter()
            .fetch(&req, &CallContext::new())
            .await
            .expect("mock prices");
        assert!(payload.starts_with("Historical prices for AAPL"));
    }

    #[test]
    fn feed_timestamps_reformat_into_block_format() {
        assert_eq!(
            reformat_feed_time("20260227T100000"),
            Some(String::from("2026-02-27 10:00:00"))
        );
        assert_eq!(reformat_feed_time("not-a-time"), None);
    }
}
