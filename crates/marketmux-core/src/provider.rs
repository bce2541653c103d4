//! Provider contract and request types.
//!
//! This module defines the uniform adapter contract (`DataProvider`) that all
//! upstream implementations follow, the closed set of routable operations
//! (`DataType`), and the validated argument tuple for each operation
//! (`DataRequest`).
//!
//! Adapters return an opaque textual payload; the router treats it as a
//! string except on news paths, where the deduplication pipeline parses the
//! block format.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::context::CallContext;
use crate::error::{ProviderError, ValidationError};
use crate::source::{ProviderId, ProviderInfo};

/// Closed set of routable operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    HistoricalPrices,
    StockInfo,
    News,
    MarketNews,
    StockActions,
    FinancialStatement,
    HolderInfo,
    OptionExpirationDates,
    OptionChain,
    Recommendations,
}

impl DataType {
    pub const ALL: [Self; 10] = [
        Self::HistoricalPrices,
        Self::StockInfo,
        Self::News,
        Self::MarketNews,
        Self::StockActions,
        Self::FinancialStatement,
        Self::HolderInfo,
        Self::OptionExpirationDates,
        Self::OptionChain,
        Self::Recommendations,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HistoricalPrices => "historical_prices",
            Self::StockInfo => "stock_info",
            Self::News => "news",
            Self::MarketNews => "market_news",
            Self::StockActions => "stock_actions",
            Self::FinancialStatement => "financial_statement",
            Self::HolderInfo => "holder_info",
            Self::OptionExpirationDates => "option_expiration_dates",
            Self::OptionChain => "option_chain",
            Self::Recommendations => "recommendations",
        }
    }

    /// News payloads get the aggregation + deduplication treatment.
    pub const fn is_news(self) -> bool {
        matches!(self, Self::News | Self::MarketNews)
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "historical_prices" => Ok(Self::HistoricalPrices),
            "stock_info" => Ok(Self::StockInfo),
            "news" => Ok(Self::News),
            "market_news" => Ok(Self::MarketNews),
            "stock_actions" => Ok(Self::StockActions),
            "financial_statement" => Ok(Self::FinancialStatement),
            "holder_info" => Ok(Self::HolderInfo),
            "option_expiration_dates" => Ok(Self::OptionExpirationDates),
            "option_chain" => Ok(Self::OptionChain),
            "recommendations" => Ok(Self::Recommendations),
            other => Err(ValidationError::InvalidDataType {
                value: other.to_owned(),
            }),
        }
    }
}

/// Validated ticker symbol: 1-10 ASCII letters/digits/`.`/`-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticker(String);

impl Ticker {
    pub const MAX_LEN: usize = 10;

    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ValidationError::EmptyTicker);
        }
        if value.len() > Self::MAX_LEN {
            return Err(ValidationError::TickerTooLong {
                len: value.len(),
                max: Self::MAX_LEN,
            });
        }
        for (index, ch) in value.chars().enumerate() {
            if !(ch.is_ascii_alphanumeric() || ch == '.' || ch == '-') {
                return Err(ValidationError::TickerInvalidChar { ch, index });
            }
        }
        Ok(Self(value.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Ticker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Financial statement flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinancialStatementKind {
    IncomeStatement,
    QuarterlyIncomeStatement,
    BalanceSheet,
    QuarterlyBalanceSheet,
    Cashflow,
    QuarterlyCashflow,
}

impl FinancialStatementKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IncomeStatement => "income_stmt",
            Self::QuarterlyIncomeStatement => "quarterly_income_stmt",
            Self::BalanceSheet => "balance_sheet",
            Self::QuarterlyBalanceSheet => "quarterly_balance_sheet",
            Self::Cashflow => "cashflow",
            Self::QuarterlyCashflow => "quarterly_cashflow",
        }
    }
}

impl Display for FinancialStatementKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FinancialStatementKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "income_stmt" => Ok(Self::IncomeStatement),
            "quarterly_income_stmt" => Ok(Self::QuarterlyIncomeStatement),
            "balance_sheet" => Ok(Self::BalanceSheet),
            "quarterly_balance_sheet" => Ok(Self::QuarterlyBalanceSheet),
            "cashflow" => Ok(Self::Cashflow),
            "quarterly_cashflow" => Ok(Self::QuarterlyCashflow),
            other => Err(ValidationError::InvalidFinancialStatementKind {
                value: other.to_owned(),
            }),
        }
    }
}

/// Holder-information flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HolderKind {
    MajorHolders,
    InstitutionalHolders,
    MutualFundHolders,
    InsiderTransactions,
    InsiderPurchases,
    InsiderRosterHolders,
}

impl HolderKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MajorHolders => "major_holders",
            Self::InstitutionalHolders => "institutional_holders",
            Self::MutualFundHolders => "mutualfund_holders",
            Self::InsiderTransactions => "insider_transactions",
            Self::InsiderPurchases => "insider_purchases",
            Self::InsiderRosterHolders => "insider_roster_holders",
        }
    }
}

impl Display for HolderKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HolderKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "major_holders" => Ok(Self::MajorHolders),
            "institutional_holders" => Ok(Self::InstitutionalHolders),
            "mutualfund_holders" => Ok(Self::MutualFundHolders),
            "insider_transactions" => Ok(Self::InsiderTransactions),
            "insider_purchases" => Ok(Self::InsiderPurchases),
            "insider_roster_holders" => Ok(Self::InsiderRosterHolders),
            other => Err(ValidationError::InvalidHolderKind {
                value: other.to_owned(),
            }),
        }
    }
}

/// Option chain side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionSide {
    Calls,
    Puts,
}

impl OptionSide {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Calls => "calls",
            Self::Puts => "puts",
        }
    }
}

impl Display for OptionSide {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptionSide {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "calls" => Ok(Self::Calls),
            "puts" => Ok(Self::Puts),
            other => Err(ValidationError::InvalidOptionSide {
                value: other.to_owned(),
            }),
        }
    }
}

/// Analyst recommendation flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    Recommendations,
    UpgradesDowngrades,
}

impl RecommendationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Recommendations => "recommendations",
            Self::UpgradesDowngrades => "upgrades_downgrades",
        }
    }
}

impl Display for RecommendationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecommendationKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "recommendations" => Ok(Self::Recommendations),
            "upgrades_downgrades" => Ok(Self::UpgradesDowngrades),
            other => Err(ValidationError::InvalidRecommendationKind {
                value: other.to_owned(),
            }),
        }
    }
}

/// Historical price lookback window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    OneDay,
    FiveDays,
    OneMonth,
    ThreeMonths,
    SixMonths,
    OneYear,
    TwoYears,
    FiveYears,
    TenYears,
    YearToDate,
    Max,
}

impl Period {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneDay => "1d",
            Self::FiveDays => "5d",
            Self::OneMonth => "1mo",
            Self::ThreeMonths => "3mo",
            Self::SixMonths => "6mo",
            Self::OneYear => "1y",
            Self::TwoYears => "2y",
            Self::FiveYears => "5y",
            Self::TenYears => "10y",
            Self::YearToDate => "ytd",
            Self::Max => "max",
        }
    }
}

impl Display for Period {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "1d" => Ok(Self::OneDay),
            "5d" => Ok(Self::FiveDays),
            "1mo" => Ok(Self::OneMonth),
            "3mo" => Ok(Self::ThreeMonths),
            "6mo" => Ok(Self::SixMonths),
            "1y" => Ok(Self::OneYear),
            "2y" => Ok(Self::TwoYears),
            "5y" => Ok(Self::FiveYears),
            "10y" => Ok(Self::TenYears),
            "ytd" => Ok(Self::YearToDate),
            "max" => Ok(Self::Max),
            other => Err(ValidationError::InvalidPeriod {
                value: other.to_owned(),
            }),
        }
    }
}

/// Historical price bar interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BarInterval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    ThirtyMinutes,
    OneHour,
    OneDay,
    OneWeek,
    OneMonth,
    ThreeMonths,
}

impl BarInterval {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::OneDay => "1d",
            Self::OneWeek => "1wk",
            Self::OneMonth => "1mo",
            Self::ThreeMonths => "3mo",
        }
    }
}

impl Display for BarInterval {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BarInterval {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "1m" => Ok(Self::OneMinute),
            "5m" => Ok(Self::FiveMinutes),
            "15m" => Ok(Self::FifteenMinutes),
            "30m" => Ok(Self::ThirtyMinutes),
            "1h" => Ok(Self::OneHour),
            "1d" => Ok(Self::OneDay),
            "1wk" => Ok(Self::OneWeek),
            "1mo" => Ok(Self::OneMonth),
            "3mo" => Ok(Self::ThreeMonths),
            other => Err(ValidationError::InvalidBarInterval {
                value: other.to_owned(),
            }),
        }
    }
}

/// Argument tuple for a single routable operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataRequest {
    HistoricalPrices {
        ticker: Ticker,
        period: Period,
        interval: BarInterval,
    },
    StockInfo {
        ticker: Ticker,
    },
    News {
        ticker: Ticker,
    },
    MarketNews,
    StockActions {
        ticker: Ticker,
    },
    FinancialStatement {
        ticker: Ticker,
        statement: FinancialStatementKind,
    },
    HolderInfo {
        ticker: Ticker,
        holder: HolderKind,
    },
    OptionExpirationDates {
        ticker: Ticker,
    },
    OptionChain {
        ticker: Ticker,
        expiration: Date,
        side: OptionSide,
    },
    Recommendations {
        ticker: Ticker,
        kind: RecommendationKind,
        months_back: u32,
    },
}

impl DataRequest {
    pub const fn data_type(&self) -> DataType {
        match self {
            Self::HistoricalPrices { .. } => DataType::HistoricalPrices,
            Self::StockInfo { .. } => DataType::StockInfo,
            Self::News { .. } => DataType::News,
            Self::MarketNews => DataType::MarketNews,
            Self::StockActions { .. } => DataType::StockActions,
            Self::FinancialStatement { .. } => DataType::FinancialStatement,
            Self::HolderInfo { .. } => DataType::HolderInfo,
            Self::OptionExpirationDates { .. } => DataType::OptionExpirationDates,
            Self::OptionChain { .. } => DataType::OptionChain,
            Self::Recommendations { .. } => DataType::Recommendations,
        }
    }

    /// Ticker the request targets, when the operation has one.
    pub fn ticker(&self) -> Option<&Ticker> {
        match self {
            Self::HistoricalPrices { ticker, .. }
            | Self::StockInfo { ticker }
            | Self::News { ticker }
            | Self::StockActions { ticker }
            | Self::FinancialStatement { ticker, .. }
            | Self::HolderInfo { ticker, .. }
            | Self::OptionExpirationDates { ticker }
            | Self::OptionChain { ticker, .. }
            | Self::Recommendations { ticker, .. } => Some(ticker),
            Self::MarketNews => None,
        }
    }
}

/// Supported operation matrix for a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CapabilitySet {
    supported: BTreeSet<DataType>,
}

impl CapabilitySet {
    pub fn of(data_types: &[DataType]) -> Self {
        Self {
            supported: data_types.iter().copied().collect(),
        }
    }

    pub fn full() -> Self {
        Self::of(&DataType::ALL)
    }

    pub fn supports(&self, data_type: DataType) -> bool {
        self.supported.contains(&data_type)
    }

    pub fn is_empty(&self) -> bool {
        self.supported.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = DataType> + '_ {
        self.supported.iter().copied()
    }
}

pub type ProviderFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Uniform adapter contract over one upstream data source.
///
/// Adapters validate what they can cheaply check, propagate cancellation
/// promptly, and fail only with kinds from the closed error taxonomy. Session
/// state (cookies, tokens) is adapter-internal and must be thread-safe.
pub trait DataProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    fn info(&self) -> ProviderInfo;

    fn capabilities(&self) -> CapabilitySet;

    /// Execute one operation, returning an opaque text payload.
    fn fetch<'a>(
        &'a self,
        req: &'a DataRequest,
        ctx: &'a CallContext,
    ) -> ProviderFuture<'a, String>;

    /// Optional lightweight availability probe.
    fn health_probe<'a>(&'a self, ctx: &'a CallContext) -> Option<ProviderFuture<'a, ()>> {
        let _ = ctx;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_accepts_exchange_suffixes() {
        let ticker = Ticker::parse("brk.b").expect("valid ticker");
        assert_eq!(ticker.as_str(), "BRK.B");

        Ticker::parse("RY-PD").expect("dash tickers are valid");
    }

    #[test]
    fn ticker_rejects_bad_shapes() {
        assert!(matches!(
            Ticker::parse(""),
            Err(ValidationError::EmptyTicker)
        ));
        assert!(matches!(
            Ticker::parse("WAYTOOLONGSYM"),
            Err(ValidationError::TickerTooLong { .. })
        ));
        assert!(matches!(
            Ticker::parse("AA PL"),
            Err(ValidationError::TickerInvalidChar { ch: ' ', index: 2 })
        ));
    }

    #[test]
    fn data_type_parses_wire_names() {
        for data_type in DataType::ALL {
            let parsed: DataType = data_type.as_str().parse().expect("round trip");
            assert_eq!(parsed, data_type);
        }
        assert!("quotes".parse::<DataType>().is_err());
    }

    #[test]
    fn capability_set_matches_declared_operations() {
        let caps = CapabilitySet::of(&[DataType::News, DataType::StockInfo]);
        assert!(caps.supports(DataType::News));
        assert!(!caps.supports(DataType::OptionChain));
        assert!(CapabilitySet::full().supports(DataType::Recommendations));
    }

    #[test]
    fn request_exposes_its_data_type() {
        let req = DataRequest::Recommendations {
            ticker: Ticker::parse("AAPL").expect("valid ticker"),
            kind: RecommendationKind::UpgradesDowngrades,
            months_back: 12,
        };
        assert_eq!(req.data_type(), DataType::Recommendations);
        assert_eq!(req.ticker().map(Ticker::as_str), Some("AAPL"));
        assert_eq!(DataRequest::MarketNews.ticker(), None);
    }
}
