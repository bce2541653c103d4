//! Error taxonomy and classification.
//!
//! Per-provider outcomes are tagged values, never unwinding: an adapter call
//! settles as `Ok(payload)` or a `ProviderError` carrying one of the closed
//! `ErrorKind`s. Caller cancellation is the only condition raised for
//! propagation and never counts as a provider failure.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::DataType;
use crate::source::ProviderId;
use crate::transport::{TransportError, TransportErrorKind};

/// Request and argument validation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("ticker cannot be empty")]
    EmptyTicker,
    #[error("ticker length {len} exceeds max {max}")]
    TickerTooLong { len: usize, max: usize },
    #[error("ticker contains invalid character '{ch}' at index {index}")]
    TickerInvalidChar { ch: char, index: usize },

    #[error("invalid data type '{value}'")]
    InvalidDataType { value: String },
    #[error("invalid financial_type '{value}'")]
    InvalidFinancialStatementKind { value: String },
    #[error("invalid holder_type '{value}'")]
    InvalidHolderKind { value: String },
    #[error("invalid option_type '{value}', expected calls or puts")]
    InvalidOptionSide { value: String },
    #[error("invalid recommendation_type '{value}'")]
    InvalidRecommendationKind { value: String },
    #[error("invalid period '{value}'")]
    InvalidPeriod { value: String },
    #[error("invalid interval '{value}'")]
    InvalidBarInterval { value: String },
    #[error("expiration_date must be YYYY-MM-DD: '{value}'")]
    InvalidExpirationDate { value: String },
    #[error("months_back must be greater than zero")]
    InvalidMonthsBack,
}

/// Closed failure taxonomy for provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NetworkError,
    Timeout,
    ServiceError,
    RateLimitExceeded,
    DataError,
    AuthenticationError,
    NotFound,
    Unknown,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NetworkError => "network_error",
            Self::Timeout => "timeout",
            Self::ServiceError => "service_error",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::DataError => "data_error",
            Self::AuthenticationError => "authentication_error",
            Self::NotFound => "not_found",
            Self::Unknown => "unknown",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured provider failure used by routing decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    kind: ErrorKind,
    message: String,
    retryable: bool,
}

impl ProviderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let retryable = matches!(
            kind,
            ErrorKind::NetworkError
                | ErrorKind::Timeout
                | ErrorKind::ServiceError
                | ErrorKind::RateLimitExceeded
        );
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn service(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceError, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimitExceeded, message)
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DataError, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthenticationError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            ErrorKind::NetworkError => "provider.network_error",
            ErrorKind::Timeout => "provider.timeout",
            ErrorKind::ServiceError => "provider.service_error",
            ErrorKind::RateLimitExceeded => "provider.rate_limit_exceeded",
            ErrorKind::DataError => "provider.data_error",
            ErrorKind::AuthenticationError => "provider.authentication_error",
            ErrorKind::NotFound => "provider.not_found",
            ErrorKind::Unknown => "provider.unknown",
        }
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for ProviderError {}

/// Maps a transport failure to its taxonomy kind.
///
/// Adapters may pre-classify with this, but the router treats the resulting
/// kind as authoritative either way.
pub fn classify_transport(error: &TransportError) -> ErrorKind {
    match error.kind() {
        TransportErrorKind::Connect => ErrorKind::NetworkError,
        TransportErrorKind::Timeout => ErrorKind::Timeout,
        TransportErrorKind::Status(429) => ErrorKind::RateLimitExceeded,
        TransportErrorKind::Status(401) | TransportErrorKind::Status(403) => {
            ErrorKind::AuthenticationError
        }
        TransportErrorKind::Status(404) => ErrorKind::NotFound,
        TransportErrorKind::Status(code) if (400..600).contains(&code) => ErrorKind::ServiceError,
        TransportErrorKind::Status(_) => ErrorKind::Unknown,
        TransportErrorKind::Body => ErrorKind::DataError,
    }
}

/// Converts a transport failure into a classified provider failure.
pub fn provider_error_from_transport(error: &TransportError) -> ProviderError {
    ProviderError::new(classify_transport(error), error.message().to_owned())
}

/// Outcome of a call executed through a circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerError {
    /// The breaker rejected the call without invoking the provider.
    CircuitOpen,
    /// The caller cancelled; nothing was recorded against the provider.
    Cancelled,
    /// The provider call settled with a classified failure.
    Upstream(ProviderError),
}

impl Display for BreakerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CircuitOpen => f.write_str("circuit breaker is open"),
            Self::Cancelled => f.write_str("call cancelled"),
            Self::Upstream(error) => Display::fmt(error, f),
        }
    }
}

impl std::error::Error for BreakerError {}

/// Collapsed failure after a chain is exhausted or every parallel peer fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateFailure {
    pub data_type: DataType,
    pub attempted: Vec<ProviderId>,
    pub errors: Vec<(ProviderId, ProviderError)>,
}

impl AggregateFailure {
    /// Collapses the per-provider kinds into the kind surfaced at the
    /// protocol edge: unanimous `NotFound` or `RateLimitExceeded` pass
    /// through, anything mixed becomes `ServiceError`.
    pub fn surfaced_kind(&self) -> ErrorKind {
        let mut kinds = self.errors.iter().map(|(_, error)| error.kind());
        let Some(first) = kinds.next() else {
            return ErrorKind::ServiceError;
        };
        if !kinds.all(|kind| kind == first) {
            return ErrorKind::ServiceError;
        }
        match first {
            ErrorKind::NotFound => ErrorKind::NotFound,
            ErrorKind::RateLimitExceeded => ErrorKind::RateLimitExceeded,
            _ => ErrorKind::ServiceError,
        }
    }
}

impl Display for AggregateFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "all {} provider(s) failed for '{}'",
            self.attempted.len(),
            self.data_type
        )?;
        for (_, error) in &self.errors {
            write!(f, "; {}: {}", error.code(), error.message())?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateFailure {}

/// Terminal routing outcome raised to the protocol edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    Cancelled,
    Exhausted(AggregateFailure),
}

impl Display for RouterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => f.write_str("request cancelled"),
            Self::Exhausted(failure) => Display::fmt(failure, f),
        }
    }
}

impl std::error::Error for RouterError {}
