//! Tool surface exposed over the line protocol.
//!
//! Every tool maps onto one routable operation; argument parsing produces a
//! validated `DataRequest` or a human-readable invalid-params message.

use serde::Serialize;
use serde_json::{json, Value};
use time::macros::format_description;
use time::Date;

use marketmux_core::{
    BarInterval, DataRequest, FinancialStatementKind, HolderKind, OptionSide, Period,
    RecommendationKind, Ticker, ValidationError,
};

const DEFAULT_PERIOD: &str = "1mo";
const DEFAULT_INTERVAL: &str = "1d";
const DEFAULT_MONTHS_BACK: u32 = 12;

/// One advertised tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// The closed tool list served by `tools/list`.
pub fn list_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "get_historical_stock_prices",
            description: "Historical OHLCV prices for a ticker",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "ticker": {"type": "string"},
                    "period": {
                        "type": "string",
                        "enum": ["1d", "5d", "1mo", "3mo", "6mo", "1y", "2y", "5y", "10y", "ytd", "max"],
                        "default": DEFAULT_PERIOD
                    },
                    "interval": {
                        "type": "string",
                        "enum": ["1m", "5m", "15m", "30m", "1h", "1d", "1wk", "1mo", "3mo"],
                        "default": DEFAULT_INTERVAL
                    }
                },
                "required": ["ticker"]
            }),
        },
        ToolDefinition {
            name: "get_stock_info",
            description: "Company and quote summary for a ticker",
            input_schema: ticker_only_schema(),
        },
        ToolDefinition {
            name: "get_yahoo_finance_news",
            description: "Recent news articles for a ticker",
            input_schema: ticker_only_schema(),
        },
        ToolDefinition {
            name: "get_market_news",
            description: "Broad market news headlines",
            input_schema: json!({"type": "object", "properties": {}}),
        },
        ToolDefinition {
            name: "get_stock_actions",
            description: "Dividend and split history for a ticker",
            input_schema: ticker_only_schema(),
        },
        ToolDefinition {
            name: "get_financial_statement",
            description: "A financial statement for a ticker",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "ticker": {"type": "string"},
                    "financial_type": {
                        "type": "string",
                        "enum": [
                            "income_stmt", "quarterly_income_stmt",
                            "balance_sheet", "quarterly_balance_sheet",
                            "cashflow", "quarterly_cashflow"
                        ]
                    }
                },
                "required": ["ticker", "financial_type"]
            }),
        },
        ToolDefinition {
            name: "get_holder_info",
            description: "Ownership and insider data for a ticker",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "ticker": {"type": "string"},
                    "holder_type": {
                        "type": "string",
                        "enum": [
                            "major_holders", "institutional_holders", "mutualfund_holders",
                            "insider_transactions", "insider_purchases", "insider_roster_holders"
                        ]
                    }
                },
                "required": ["ticker", "holder_type"]
            }),
        },
        ToolDefinition {
            name: "get_option_expiration_dates",
            description: "Available option expiration dates for a ticker",
            input_schema: ticker_only_schema(),
        },
        ToolDefinition {
            name: "get_option_chain",
            description: "Option chain for one expiration and side",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "ticker": {"type": "string"},
                    "expiration_date": {"type": "string", "description": "YYYY-MM-DD"},
                    "option_type": {"type": "string", "enum": ["calls", "puts"]}
                },
                "required": ["ticker", "expiration_date", "option_type"]
            }),
        },
        ToolDefinition {
            name: "get_recommendations",
            description: "Analyst recommendations or upgrade/downgrade history",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "ticker": {"type": "string"},
                    "recommendation_type": {
                        "type": "string",
                        "enum": ["recommendations", "upgrades_downgrades"]
                    },
                    "months_back": {"type": "integer", "default": DEFAULT_MONTHS_BACK}
                },
                "required": ["ticker", "recommendation_type"]
            }),
        },
    ]
}

fn ticker_only_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"ticker": {"type": "string"}},
        "required": ["ticker"]
    })
}

/// Maps a `tools/call` payload onto a validated request.
pub fn parse_tool_call(name: &str, arguments: &Value) -> Result<DataRequest, String> {
    match name {
        "get_historical_stock_prices" => {
            let ticker = required_ticker(arguments)?;
            let period: Period = optional_str(arguments, "period", DEFAULT_PERIOD)
                .parse()
                .map_err(validation_message)?;
            let interval: BarInterval = optional_str(arguments, "interval", DEFAULT_INTERVAL)
                .parse()
                .map_err(validation_message)?;
            Ok(DataRequest::HistoricalPrices {
                ticker,
                period,
                interval,
            })
        }
        "get_stock_info" => Ok(DataRequest::StockInfo {
            ticker: required_ticker(arguments)?,
        }),
        "get_yahoo_finance_news" => Ok(DataRequest::News {
            ticker: required_ticker(arguments)?,
        }),
        "get_market_news" => Ok(DataRequest::MarketNews),
        "get_stock_actions" => Ok(DataRequest::StockActions {
            ticker: required_ticker(arguments)?,
        }),
        "get_financial_statement" => {
            let ticker = required_ticker(arguments)?;
            let statement: FinancialStatementKind = required_str(arguments, "financial_type")?
                .parse()
                .map_err(validation_message)?;
            Ok(DataRequest::FinancialStatement { ticker, statement })
        }
        "get_holder_info" => {
            let ticker = required_ticker(arguments)?;
            let holder: HolderKind = required_str(arguments, "holder_type")?
                .parse()
                .map_err(validation_message)?;
            Ok(DataRequest::HolderInfo { ticker, holder })
        }
        "get_option_expiration_dates" => Ok(DataRequest::OptionExpirationDates {
            ticker: required_ticker(arguments)?,
        }),
        "get_option_chain" => {
            let ticker = required_ticker(arguments)?;
            let raw_date = required_str(arguments, "expiration_date")?;
            let expiration =
                Date::parse(raw_date, format_description!("[year]-[month]-[day]")).map_err(
                    |_| {
                        validation_message(ValidationError::InvalidExpirationDate {
                            value: raw_date.to_owned(),
                        })
                    },
                )?;
            let side: OptionSide = required_str(arguments, "option_type")?
                .parse()
                .map_err(validation_message)?;
            Ok(DataRequest::OptionChain {
                ticker,
                expiration,
                side,
            })
        }
        "get_recommendations" => {
            let ticker = required_ticker(arguments)?;
            let kind: RecommendationKind = required_str(arguments, "recommendation_type")?
                .parse()
                .map_err(validation_message)?;
            let months_back = match arguments.get("months_back") {
                None | Some(Value::Null) => DEFAULT_MONTHS_BACK,
                Some(value) => value
                    .as_u64()
                    .filter(|months| *months > 0)
                    .and_then(|months| u32::try_from(months).ok())
                    .ok_or_else(|| validation_message(ValidationError::InvalidMonthsBack))?,
            };
            Ok(DataRequest::Recommendations {
                ticker,
                kind,
                months_back,
            })
        }
        other => Err(format!("unknown tool '{other}'")),
    }
}

fn required_ticker(arguments: &Value) -> Result<Ticker, String> {
    Ticker::parse(required_str(arguments, "ticker")?).map_err(validation_message)
}

fn required_str<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, String> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing required argument '{key}'"))
}

fn optional_str<'a>(arguments: &'a Value, key: &str, default: &'a str) -> &'a str {
    arguments.get(key).and_then(Value::as_str).unwrap_or(default)
}

fn validation_message(error: ValidationError) -> String {
    error.to_string()
}
