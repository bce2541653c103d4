//! Yahoo Finance adapter.
//!
//! Yahoo's unofficial API needs a session cookie (acquired by visiting
//! fc.yahoo.com) and a crumb token for the quoteSummary endpoints. Both are
//! cached behind an internal lock; a 401/403 answer invalidates the session
//! and the call is retried once with a fresh crumb.
//!
//! With a mock transport the adapter serves deterministic fixture payloads,
//! which keeps router and deduplication tests offline.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::debug;

use crate::context::CallContext;
use crate::error::ProviderError;
use crate::provider::{
    CapabilitySet, DataProvider, DataRequest, FinancialStatementKind, HolderKind, OptionSide,
    ProviderFuture, RecommendationKind, Ticker,
};
use crate::source::{ProviderId, ProviderInfo};
use crate::transport::{
    JsonGateway, OfflineTransport, UpstreamQuota, UpstreamRequest, UpstreamTransport,
};

const ADAPTER_VERSION: &str = "2.1.0";
const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(10);
const SESSION_TTL: Duration = Duration::from_secs(3600);
const REFERER: &str = "https://finance.yahoo.com/";

const DATETIME_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Cached cookie/crumb session state.
///
/// The cookie itself lives in the transport's jar; only the crumb and its
/// age are tracked here. Refreshes are serialized by an async lock so
/// concurrent callers do not stampede the auth endpoints.
struct YahooSession {
    crumb: Mutex<Option<(String, Instant)>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl YahooSession {
    fn new() -> Self {
        Self {
            crumb: Mutex::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn cached(&self) -> Option<String> {
        let crumb = self.crumb.lock().expect("session lock is not poisoned");
        crumb.as_ref().and_then(|(value, at)| {
            (at.elapsed() < SESSION_TTL).then(|| value.clone())
        })
    }

    fn invalidate(&self) {
        *self.crumb.lock().expect("session lock is not poisoned") = None;
    }

    async fn crumb(&self, transport: &dyn UpstreamTransport) -> Result<String, ProviderError> {
        if let Some(crumb) = self.cached() {
            return Ok(crumb);
        }

        let _guard = self.refresh_lock.lock().await;
        if let Some(crumb) = self.cached() {
            return Ok(crumb);
        }
        self.refresh(transport).await
    }

    async fn refresh(&self, transport: &dyn UpstreamTransport) -> Result<String, ProviderError> {
        debug!("refreshing yahoo session");

        // Seed the cookie jar first; the crumb endpoint rejects cookieless
        // callers.
        let seed = UpstreamRequest::new("https://fc.yahoo.com")
            .with_header("referer", REFERER)
            .with_timeout(BOOTSTRAP_TIMEOUT);
        let _ = transport.get(seed).await;

        let endpoints = [
            "https://query1.finance.yahoo.com/v1/test/getcrumb",
            "https://query2.finance.yahoo.com/v1/test/getcrumb",
        ];
        for endpoint in endpoints {
            let request = UpstreamRequest::new(endpoint)
                .with_header("referer", REFERER)
                .with_timeout(BOOTSTRAP_TIMEOUT);
            let Ok(response) = transport.get(request).await else {
                continue;
            };
            if !response.is_success() {
                continue;
            }

            let body = response.body.trim();
            if body.is_empty() || body.len() >= 100 || body.contains(' ') || body.contains('<') {
                continue;
            }

            *self.crumb.lock().expect("session lock is not poisoned") =
                Some((body.to_owned(), Instant::now()));
            return Ok(body.to_owned());
        }

        Err(ProviderError::authentication(
            "failed to obtain yahoo crumb from any endpoint",
        ))
    }
}

/// Yahoo Finance adapter covering the full operation set.
pub struct YahooAdapter {
    id: ProviderId,
    gateway: JsonGateway,
    session: YahooSession,
}

impl YahooAdapter {
    pub fn new(id: ProviderId, transport: Arc<dyn UpstreamTransport>) -> Self {
        Self {
            id,
            gateway: JsonGateway::new(
                transport,
                UpstreamQuota::new(Duration::from_secs(60), 60),
                "yahoo",
            ),
            session: YahooSession::new(),
        }
    }

    pub fn mock_mode(id: ProviderId) -> Self {
        Self::new(id, Arc::new(OfflineTransport))
    }

    async fn get_json(&self, url: String, ctx: &CallContext) -> Result<Value, ProviderError> {
        let request = UpstreamRequest::new(url)
            .with_header("referer", REFERER)
            .with_header("accept", "application/json");
        self.gateway.get_json(request, ctx).await
    }

    /// quoteSummary needs the crumb; a rejected session is refreshed and the
    /// call retried once.
    async fn get_summary(
        &self,
        ticker: &Ticker,
        modules: &str,
        ctx: &CallContext,
    ) -> Result<Value, ProviderError> {
        let mut refreshed = false;
        loop {
            let crumb = self.session.crumb(self.gateway.transport()).await?;
            let url = format!(
                "https://query1.finance.yahoo.com/v10/finance/quoteSummary/{}?modules={}&crumb={}",
                ticker, modules, crumb
            );
            match self.get_json(url, ctx).await {
                Err(error)
                    if !refreshed
                        && error.kind() == crate::error::ErrorKind::AuthenticationError =>
                {
                    self.session.invalidate();
                    refreshed = true;
                }
                other => {
                    let value = other?;
                    let result = &value["quoteSummary"]["result"];
                    if result.is_null() {
                        let description = value["quoteSummary"]["error"]["description"]
                            .as_str()
                            .unwrap_or("empty quoteSummary result");
                        return Err(not_found_or_data(description, ticker));
                    }
                    return Ok(result[0].clone());
                }
            }
        }
    }

    async fn historical_prices(
        &self,
        ticker: &Ticker,
        period: &str,
        interval: &str,
        ctx: &CallContext,
    ) -> Result<String, ProviderError> {
        let url = format!(
            "https://query1.finance.yahoo.com/v8/finance/chart/{}?range={}&interval={}&events=div,splits",
            ticker, period, interval
        );
        let value = self.get_json(url, ctx).await?;
        let result = chart_result(&value, ticker)?;

        let timestamps = result["timestamp"].as_array().cloned().unwrap_or_default();
        let quote = &result["indicators"]["quote"][0];
        let mut lines = vec![format!(
            "Historical prices for {ticker} (period {period}, interval {interval})"
        )];
        for (index, stamp) in timestamps.iter().enumerate() {
            let Some(epoch) = stamp.as_i64() else { continue };
            let open = quote["open"][index].as_f64();
            let high = quote["high"][index].as_f64();
            let low = quote["low"][index].as_f64();
            let close = quote["close"][index].as_f64();
            let volume = quote["volume"][index].as_i64();
            lines.push(format!(
                "{} | Open {} | High {} | Low {} | Close {} | Volume {}",
                format_date(epoch),
                fmt_price(open),
                fmt_price(high),
                fmt_price(low),
                fmt_price(close),
                volume.map_or_else(|| String::from("-"), |v| v.to_string()),
            ));
        }
        if lines.len() == 1 {
            return Err(ProviderError::not_found(format!(
                "no price history for {ticker}"
            )));
        }
        Ok(lines.join("\n"))
    }

    async fn stock_info(&self, ticker: &Ticker, ctx: &CallContext) -> Result<String, ProviderError> {
        let result = self
            .get_summary(ticker, "price,summaryDetail,assetProfile", ctx)
            .await?;
        let price = &result["price"];
        let detail = &result["summaryDetail"];
        let profile = &result["assetProfile"];

        let mut lines = vec![format!("Stock information for {ticker}")];
        push_field(&mut lines, "Name", price["longName"].as_str());
        push_field(&mut lines, "Exchange", price["exchangeName"].as_str());
        push_field(&mut lines, "Currency", price["currency"].as_str());
        push_field(&mut lines, "Sector", profile["sector"].as_str());
        push_field(&mut lines, "Industry", profile["industry"].as_str());
        push_raw_fmt(&mut lines, "Price", &price["regularMarketPrice"]);
        push_raw_fmt(&mut lines, "Market Cap", &price["marketCap"]);
        push_raw_fmt(&mut lines, "52 Week High", &detail["fiftyTwoWeekHigh"]);
        push_raw_fmt(&mut lines, "52 Week Low", &detail["fiftyTwoWeekLow"]);
        push_raw_fmt(&mut lines, "Dividend Yield", &detail["dividendYield"]);
        push_raw_fmt(&mut lines, "Trailing PE", &detail["trailingPE"]);
        Ok(lines.join("\n"))
    }

    async fn news(&self, query: &str, count: usize, ctx: &CallContext) -> Result<String, ProviderError> {
        let url = format!(
            "https://query1.finance.yahoo.com/v1/finance/search?q={}&newsCount={}&quotesCount=0",
            query, count
        );
        let value = self.get_json(url, ctx).await?;
        let Some(items) = value["news"].as_array() else {
            return Err(ProviderError::data("yahoo search response lacks news array"));
        };

        let mut blocks = Vec::new();
        for item in items {
            let Some(title) = item["title"].as_str() else { continue };
            let mut lines = vec![format!("Title: {title}")];
            lines.push(format!(
                "Publisher: {}",
                item["publisher"].as_str().unwrap_or("")
            ));
            let published = item["providerPublishTime"]
                .as_i64()
                .map_or_else(|| String::from("Unknown"), format_datetime);
            lines.push(format!("Published: {published}"));
            if let Some(tickers) = item["relatedTickers"].as_array() {
                let tickers: Vec<&str> = tickers.iter().filter_map(Value::as_str).collect();
                if !tickers.is_empty() {
                    lines.push(format!("Related Tickers: {}", tickers.join(", ")));
                }
            }
            lines.push(format!("URL: {}", item["link"].as_str().unwrap_or("")));
            blocks.push(lines.join("\n"));
        }

        if blocks.is_empty() {
            return Err(ProviderError::not_found(format!("no news for '{query}'")));
        }
        Ok(blocks.join("\n\n"))
    }

    async fn stock_actions(&self, ticker: &Ticker, ctx: &CallContext) -> Result<String, ProviderError> {
        let url = format!(
            "https://query1.finance.yahoo.com/v8/finance/chart/{}?range=5y&interval=1mo&events=div,splits",
            ticker
        );
        let value = self.get_json(url, ctx).await?;
        let result = chart_result(&value, ticker)?;

        let mut lines = vec![format!("Corporate actions for {ticker}")];
        if let Some(dividends) = result["events"]["dividends"].as_object() {
            for dividend in dividends.values() {
                if let (Some(date), Some(amount)) =
                    (dividend["date"].as_i64(), dividend["amount"].as_f64())
                {
                    lines.push(format!("{} | Dividend {amount}", format_date(date)));
                }
            }
        }
        if let Some(splits) = result["events"]["splits"].as_object() {
            for split in splits.values() {
                if let (Some(date), Some(ratio)) =
                    (split["date"].as_i64(), split["splitRatio"].as_str())
                {
                    lines.push(format!("{} | Split {ratio}", format_date(date)));
                }
            }
        }
        if lines.len() == 1 {
            lines.push(String::from("No dividends or splits in range"));
        }
        Ok(lines.join("\n"))
    }

    async fn financial_statement(
        &self,
        ticker: &Ticker,
        statement: FinancialStatementKind,
        ctx: &CallContext,
    ) -> Result<String, ProviderError> {
        let (module, items_key) = match statement {
            FinancialStatementKind::IncomeStatement => {
                ("incomeStatementHistory", "incomeStatementHistory")
            }
            FinancialStatementKind::QuarterlyIncomeStatement => (
                "incomeStatementHistoryQuarterly",
                "incomeStatementHistory",
            ),
            FinancialStatementKind::BalanceSheet => {
                ("balanceSheetHistory", "balanceSheetStatements")
            }
            FinancialStatementKind::QuarterlyBalanceSheet => {
                ("balanceSheetHistoryQuarterly", "balanceSheetStatements")
            }
            FinancialStatementKind::Cashflow => {
                ("cashflowStatementHistory", "cashflowStatements")
            }
            FinancialStatementKind::QuarterlyCashflow => {
                ("cashflowStatementHistoryQuarterly", "cashflowStatements")
            }
        };

        let result = self.get_summary(ticker, module, ctx).await?;
        let Some(statements) = result[module][items_key].as_array() else {
            return Err(ProviderError::not_found(format!(
                "no {statement} data for {ticker}"
            )));
        };

        let mut lines = vec![format!("{statement} for {ticker}")];
        for entry in statements {
            let Some(entries) = entry.as_object() else { continue };
            let end_date = entry["endDate"]["fmt"].as_str().unwrap_or("unknown period");
            lines.push(format!("Period ending {end_date}:"));
            for (key, value) in entries {
                if key == "endDate" || key == "maxAge" {
                    continue;
                }
                if let Some(rendered) = raw_fmt(value) {
                    lines.push(format!("  {key}: {rendered}"));
                }
            }
        }
        Ok(lines.join("\n"))
    }

    async fn holder_info(
        &self,
        ticker: &Ticker,
        holder: HolderKind,
        ctx: &CallContext,
    ) -> Result<String, ProviderError> {
        let (module, list_key) = match holder {
            HolderKind::MajorHolders => ("majorHoldersBreakdown", None),
            HolderKind::InstitutionalHolders => ("institutionOwnership", Some("ownershipList")),
            HolderKind::MutualFundHolders => ("fundOwnership", Some("ownershipList")),
            HolderKind::InsiderTransactions => ("insiderTransactions", Some("transactions")),
            HolderKind::InsiderPurchases => ("netSharePurchaseActivity", None),
            HolderKind::InsiderRosterHolders => ("insiderHolders", Some("holders")),
        };

        let result = self.get_summary(ticker, module, ctx).await?;
        let section = &result[module];
        if section.is_null() {
            return Err(ProviderError::not_found(format!(
                "no {holder} data for {ticker}"
            )));
        }

        let mut lines = vec![format!("{holder} for {ticker}")];
        match list_key {
            Some(key) => {
                let Some(entries) = section[key].as_array() else {
                    return Err(ProviderError::data(format!(
                        "yahoo {module} response lacks '{key}'"
                    )));
                };
                for entry in entries {
                    if let Some(fields) = entry.as_object() {
                        let row: Vec<String> = fields
                            .iter()
                            .filter(|(key, _)| *key != "maxAge")
                            .filter_map(|(key, value)| {
                                raw_fmt(value).map(|rendered| format!("{key} {rendered}"))
                            })
                            .collect();
                        if !row.is_empty() {
                            lines.push(row.join(" | "));
                        }
                    }
                }
            }
            None => {
                if let Some(fields) = section.as_object() {
                    for (key, value) in fields {
                        if key == "maxAge" {
                            continue;
                        }
                        if let Some(rendered) = raw_fmt(value) {
                            lines.push(format!("{key}: {rendered}"));
                        }
                    }
                }
            }
        }
        Ok(lines.join("\n"))
    }

    async fn option_expiration_dates(
        &self,
        ticker: &Ticker,
        ctx: &CallContext,
    ) -> Result<String, ProviderError> {
        let url = format!("https://query1.finance.yahoo.com/v7/finance/options/{ticker}");
        let value = self.get_json(url, ctx).await?;
        let result = &value["optionChain"]["result"][0];
        let Some(dates) = result["expirationDates"].as_array() else {
            return Err(ProviderError::not_found(format!(
                "no option expirations for {ticker}"
            )));
        };

        let mut lines = vec![format!("Option expiration dates for {ticker}")];
        for date in dates.iter().filter_map(Value::as_i64) {
            lines.push(format_date(date));
        }
        Ok(lines.join("\n"))
    }

    async fn option_chain(
        &self,
        ticker: &Ticker,
        expiration: time::Date,
        side: OptionSide,
        ctx: &CallContext,
    ) -> Result<String, ProviderError> {
        let midnight = expiration.midnight().assume_utc().unix_timestamp();
        let url = format!(
            "https://query1.finance.yahoo.com/v7/finance/options/{ticker}?date={midnight}"
        );
        let value = self.get_json(url, ctx).await?;
        let result = &value["optionChain"]["result"][0];
        let options = &result["options"][0];
        let key = match side {
            OptionSide::Calls => "calls",
            OptionSide::Puts => "puts",
        };
        let Some(contracts) = options[key].as_array() else {
            return Err(ProviderError::not_found(format!(
                "no {side} for {ticker} expiring {expiration}"
            )));
        };

        let mut lines = vec![format!("{side} for {ticker} expiring {expiration}")];
        for contract in contracts {
            lines.push(format!(
                "Strike {} | Last {} | Bid {} | Ask {} | Volume {} | Open Interest {}",
                fmt_price(contract["strike"].as_f64()),
                fmt_price(contract["lastPrice"].as_f64()),
                fmt_price(contract["bid"].as_f64()),
                fmt_price(contract["ask"].as_f64()),
                contract["volume"].as_i64().unwrap_or(0),
                contract["openInterest"].as_i64().unwrap_or(0),
            ));
        }
        Ok(lines.join("\n"))
    }

    async fn recommendations(
        &self,
        ticker: &Ticker,
        kind: RecommendationKind,
        months_back: u32,
        ctx: &CallContext,
    ) -> Result<String, ProviderError> {
        match kind {
            RecommendationKind::Recommendations => {
                let result = self.get_summary(ticker, "recommendationTrend", ctx).await?;
                let Some(trend) = result["recommendationTrend"]["trend"].as_array() else {
                    return Err(ProviderError::not_found(format!(
                        "no recommendation trend for {ticker}"
                    )));
                };
                let mut lines = vec![format!("Analyst recommendations for {ticker}")];
                for entry in trend {
                    lines.push(format!(
                        "Period {} | Strong Buy {} | Buy {} | Hold {} | Sell {} | Strong Sell {}",
                        entry["period"].as_str().unwrap_or("?"),
                        entry["strongBuy"].as_i64().unwrap_or(0),
                        entry["buy"].as_i64().unwrap_or(0),
                        entry["hold"].as_i64().unwrap_or(0),
                        entry["sell"].as_i64().unwrap_or(0),
                        entry["strongSell"].as_i64().unwrap_or(0),
                    ));
                }
                Ok(lines.join("\n"))
            }
            RecommendationKind::UpgradesDowngrades => {
                let result = self
                    .get_summary(ticker, "upgradeDowngradeHistory", ctx)
                    .await?;
                let Some(history) = result["upgradeDowngradeHistory"]["history"].as_array() else {
                    return Err(ProviderError::not_found(format!(
                        "no upgrade/downgrade history for {ticker}"
                    )));
                };

                let cutoff = OffsetDateTime::now_utc().unix_timestamp()
                    - i64::from(months_back) * 30 * 24 * 3600;
                let mut lines =
                    vec![format!("Upgrades and downgrades for {ticker} (last {months_back} months)")];
                for entry in history {
                    let Some(stamp) = entry["epochGradeDate"].as_i64() else { continue };
                    if stamp < cutoff {
                        continue;
                    }
                    lines.push(format!(
                        "{} | {} | {} -> {} | {}",
                        format_date(stamp),
                        entry["firm"].as_str().unwrap_or("?"),
                        entry["fromGrade"].as_str().unwrap_or("-"),
                        entry["toGrade"].as_str().unwrap_or("-"),
                        entry["action"].as_str().unwrap_or("-"),
                    ));
                }
                Ok(lines.join("\n"))
            }
        }
    }

    fn mock_payload(&self, req: &DataRequest) -> String {
        match req {
            DataRequest::HistoricalPrices {
                ticker,
                period,
                interval,
            } => format!(
                "Historical prices for {ticker} (period {period}, interval {interval})\n2026-01-02 | Open 187.15 | High 188.44 | Low 183.89 | Close 185.64 | Volume 82488700\n2026-01-03 | Open 184.22 | High 185.88 | Low 183.43 | Close 184.25 | Volume 58414500"
            ),
            DataRequest::StockInfo { ticker } => format!(
                "Stock information for {ticker}\nName: {ticker} Inc.\nExchange: NasdaqGS\nCurrency: USD\nPrice: 185.64\nMarket Cap: 2886400000000"
            ),
            DataRequest::News { ticker } => format!(
                "Title: {ticker} shares rally after earnings beat\nPublisher: Reuters\nPublished: 2026-02-27 10:00:00\nRelated Tickers: {ticker}\nURL: https://finance.example.com/{ticker}/earnings\n\nTitle: Analysts raise {ticker} price targets\nPublisher: Bloomberg\nPublished: 2026-02-26 15:30:00\nRelated Tickers: {ticker}\nURL: https://finance.example.com/{ticker}/targets"
            ),
            DataRequest::MarketNews => String::from(
                "Title: Stocks close higher as rate fears ease\nPublisher: Reuters\nPublished: 2026-02-27 21:05:00\nURL: https://finance.example.com/markets/close\n\nTitle: Treasury yields slip ahead of jobs report\nPublisher: AP\nPublished: 2026-02-27 18:40:00\nURL: https://finance.example.com/markets/yields",
            ),
            DataRequest::StockActions { ticker } => format!(
                "Corporate actions for {ticker}\n2025-11-08 | Dividend 0.24\n2024-06-10 | Split 4:1"
            ),
            DataRequest::FinancialStatement { ticker, statement } => format!(
                "{statement} for {ticker}\nPeriod ending 2025-12-31:\n  totalRevenue: 394.3B\n  netIncome: 99.8B"
            ),
            DataRequest::HolderInfo { ticker, holder } => format!(
                "{holder} for {ticker}\norganization Vanguard Group | pctHeld 8.31% | position 1290000000"
            ),
            DataRequest::OptionExpirationDates { ticker } => format!(
                "Option expiration dates for {ticker}\n2026-03-20\n2026-04-17\n2026-06-19"
            ),
            DataRequest::OptionChain {
                ticker,
                expiration,
                side,
            } => format!(
                "{side} for {ticker} expiring {expiration}\nStrike 180.00 | Last 8.05 | Bid 7.95 | Ask 8.15 | Volume 1024 | Open Interest 5321"
            ),
            DataRequest::Recommendations {
                ticker,
                kind,
                months_back,
            } => match kind {
                RecommendationKind::Recommendations => format!(
                    "Analyst recommendations for {ticker}\nPeriod 0m | Strong Buy 11 | Buy 21 | Hold 6 | Sell 0 | Strong Sell 1"
                ),
                RecommendationKind::UpgradesDowngrades => format!(
                    "Upgrades and downgrades for {ticker} (last {months_back} months)\n2026-01-12 | Morgan Stanley | Equal-Weight -> Overweight | up"
                ),
            },
        }
    }
}

impl DataProvider for YahooAdapter {
    fn id(&self) -> ProviderId {
        self.id.clone()
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo::new(self.id.clone(), "Yahoo Finance", ADAPTER_VERSION)
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::full()
    }

    fn fetch<'a>(
        &'a self,
        req: &'a DataRequest,
        ctx: &'a CallContext,
    ) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            if self.gateway.is_offline() {
                return Ok(self.mock_payload(req));
            }

            match req {
                DataRequest::HistoricalPrices {
                    ticker,
                    period,
                    interval,
                } => {
                    self.historical_prices(ticker, period.as_str(), interval.as_str(), ctx)
                        .await
                }
                DataRequest::StockInfo { ticker } => self.stock_info(ticker, ctx).await,
                DataRequest::News { ticker } => self.news(ticker.as_str(), 10, ctx).await,
                DataRequest::MarketNews => self.news("stock+market", 20, ctx).await,
                DataRequest::StockActions { ticker } => self.stock_actions(ticker, ctx).await,
                DataRequest::FinancialStatement { ticker, statement } => {
                    self.financial_statement(ticker, *statement, ctx).await
                }
                DataRequest::HolderInfo { ticker, holder } => {
                    self.holder_info(ticker, *holder, ctx).await
                }
                DataRequest::OptionExpirationDates { ticker } => {
                    self.option_expiration_dates(ticker, ctx).await
                }
                DataRequest::OptionChain {
                    ticker,
                    expiration,
                    side,
                } => self.option_chain(ticker, *expiration, *side, ctx).await,
                DataRequest::Recommendations {
                    ticker,
                    kind,
                    months_back,
                } => {
                    self.recommendations(ticker, *kind, *months_back, ctx)
                        .await
                }
            }
        })
    }

    fn health_probe<'a>(&'a self, ctx: &'a CallContext) -> Option<ProviderFuture<'a, ()>> {
        Some(Box::pin(async move {
            if self.gateway.is_offline() {
                return Ok(());
            }
            self.news("market", 1, ctx).await.map(|_| ())
        }))
    }
}

fn chart_result<'v>(value: &'v Value, ticker: &Ticker) -> Result<&'v Value, ProviderError> {
    let error = &value["chart"]["error"];
    if !error.is_null() {
        let description = error["description"].as_str().unwrap_or("chart error");
        return Err(not_found_or_data(description, ticker));
    }
    let result = &value["chart"]["result"][0];
    if result.is_null() {
        return Err(ProviderError::not_found(format!(
            "no chart data for {ticker}"
        )));
    }
    Ok(result)
}

fn not_found_or_data(description: &str, ticker: &Ticker) -> ProviderError {
    let lowered = description.to_ascii_lowercase();
    if lowered.contains("not found") || lowered.contains("no data") {
        ProviderError::not_found(format!("{ticker}: {description}"))
    } else {
        ProviderError::data(format!("{ticker}: {description}"))
    }
}

fn push_field(lines: &mut Vec<String>, label: &str, value: Option<&str>) {
    if let Some(value) = value {
        lines.push(format!("{label}: {value}"));
    }
}

fn push_raw_fmt(lines: &mut Vec<String>, label: &str, value: &Value) {
    if let Some(rendered) = raw_fmt(value) {
        lines.push(format!("{label}: {rendered}"));
    }
}

/// Yahoo wraps numbers as `{"raw": 1.23, "fmt": "1.23"}`; prefer the
/// formatted form and fall back to the raw value or plain scalars.
fn raw_fmt(value: &Value) -> Option<String> {
    if let Some(fmt) = value["fmt"].as_str() {
        return Some(fmt.to_owned());
    }
    if !value["raw"].is_null() {
        return Some(value["raw"].to_string());
    }
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn fmt_price(value: Option<f64>) -> String {
    value.map_or_else(|| String::from("-"), |v| format!("{v:.2}"))
}

fn format_date(epoch: i64) -> String {
    OffsetDateTime::from_unix_timestamp(epoch)
        .ok()
        .and_then(|at| at.format(DATE_FORMAT).ok())
        .unwrap_or_else(|| epoch.to_string())
}

fn format_datetime(epoch: i64) -> String {
    OffsetDateTime::from_unix_timestamp(epoch)
        .ok()
        .and_then(|at| at.format(DATETIME_FORMAT).ok())
        .unwrap_or_else(|| String::from("Unknown"))
}
