//! Upstream transport seam.
//!
//! Every upstream this service talks to is a JSON-over-GET API, so the seam
//! is deliberately narrow: a request is a URL, a handful of headers, and a
//! deadline. Adapters go through [`JsonGateway`], which stacks the
//! per-provider rate budget, deadline clamping, and failure classification
//! on top of the raw trait; the trait itself stays reachable for the odd
//! non-JSON call such as session bootstrap.

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::num::NonZeroU32;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use serde_json::Value;

use crate::context::CallContext;
use crate::error::{provider_error_from_transport, ProviderError};

/// Ceiling for any single upstream call.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// One outbound GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamRequest {
    url: String,
    headers: Vec<(&'static str, String)>,
    timeout: Duration,
}

impl UpstreamRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &[(&'static str, String)] {
        &self.headers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Raw answer from an upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
}

impl UpstreamResponse {
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// The body on a 2xx answer; any other status becomes a classified
    /// transport error carrying the code.
    pub fn ok_body(self) -> Result<String, TransportError> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(TransportError::status(
                self.status,
                format!("upstream returned status {}", self.status),
            ))
        }
    }
}

/// Machine-usable cause of a transport failure, kept separate from the
/// message so the error classifier never has to parse text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Could not reach the upstream at all.
    Connect,
    /// The request deadline elapsed.
    Timeout,
    /// The upstream answered with a non-success status.
    Status(u16),
    /// The response body could not be read or decoded.
    Body,
}

/// Transport-level failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
}

impl TransportError {
    pub fn connect(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Connect,
            message: message.into(),
        }
    }

    pub fn timed_out(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Timeout,
            message: message.into(),
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Status(status),
            message: message.into(),
        }
    }

    pub fn body(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Body,
            message: message.into(),
        }
    }

    pub const fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TransportError {}

pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<UpstreamResponse, TransportError>> + Send + 'a>>;

/// Executes upstream GETs.
pub trait UpstreamTransport: Send + Sync {
    fn get<'a>(&'a self, request: UpstreamRequest) -> TransportFuture<'a>;

    /// True when no network is ever touched; adapters switch to their
    /// deterministic fixtures.
    fn is_offline(&self) -> bool {
        false
    }
}

/// Transport for offline tests: answers every GET with an empty JSON object
/// and advertises itself so adapters serve fixtures instead.
#[derive(Debug, Default)]
pub struct OfflineTransport;

impl UpstreamTransport for OfflineTransport {
    fn get<'a>(&'a self, request: UpstreamRequest) -> TransportFuture<'a> {
        let _ = request;
        Box::pin(async {
            Ok(UpstreamResponse {
                status: 200,
                body: String::from("{}"),
            })
        })
    }

    fn is_offline(&self) -> bool {
        true
    }
}

/// Production transport backed by reqwest. The cookie store is required:
/// the yahoo session seeds cookies on one host and spends them on another.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Arc<reqwest::Client>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: Arc::new(
                reqwest::Client::builder()
                    .user_agent(concat!("marketmux/", env!("CARGO_PKG_VERSION")))
                    .cookie_store(true)
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
            ),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamTransport for ReqwestTransport {
    fn get<'a>(&'a self, request: UpstreamRequest) -> TransportFuture<'a> {
        Box::pin(async move {
            let mut builder = self.client.get(request.url()).timeout(request.timeout());
            for (name, value) in request.headers() {
                builder = builder.header(*name, value);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError::timed_out(format!("request timeout: {e}"))
                } else if e.is_connect() {
                    TransportError::connect(format!("connection failed: {e}"))
                } else {
                    TransportError::connect(format!("request failed: {e}"))
                }
            })?;

            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|e| TransportError::body(format!("failed to read response body: {e}")))?;

            Ok(UpstreamResponse { status, body })
        })
    }
}

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// In-memory rate budget for one upstream.
///
/// Gated calls fail fast as `RateLimitExceeded` when the local budget is
/// spent instead of hammering the upstream and burning the real quota.
#[derive(Clone)]
pub struct UpstreamQuota {
    limiter: Arc<DirectRateLimiter>,
    window: Duration,
    limit: u32,
}

impl UpstreamQuota {
    pub fn new(window: Duration, limit: u32) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::direct(quota_from_window(window, limit))),
            window,
            limit,
        }
    }

    /// Tries to take one unit of budget. On exhaustion returns the window
    /// slice to wait before the budget refills.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        if self.limiter.check().is_ok() {
            return Ok(());
        }
        Err(self.window / self.limit.max(1))
    }

    pub const fn limit(&self) -> u32 {
        self.limit
    }
}

impl std::fmt::Debug for UpstreamQuota {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamQuota")
            .field("window", &self.window)
            .field("limit", &self.limit)
            .finish()
    }
}

fn quota_from_window(window: Duration, limit: u32) -> Quota {
    let safe_limit = limit.max(1);
    let burst = NonZeroU32::new(safe_limit).expect("safe limit must be non-zero");

    let seconds_per_cell = (window.as_secs_f64() / f64::from(safe_limit)).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .expect("period is always greater than zero")
        .allow_burst(burst)
}

/// What adapters actually call: a quota-gated JSON GET with classified
/// failures and deadlines clamped to the caller's remaining budget.
pub struct JsonGateway {
    transport: Arc<dyn UpstreamTransport>,
    quota: UpstreamQuota,
    upstream: &'static str,
}

impl JsonGateway {
    pub fn new(
        transport: Arc<dyn UpstreamTransport>,
        quota: UpstreamQuota,
        upstream: &'static str,
    ) -> Self {
        Self {
            transport,
            quota,
            upstream,
        }
    }

    pub fn is_offline(&self) -> bool {
        self.transport.is_offline()
    }

    /// Raw transport access for the rare non-JSON exchange.
    pub fn transport(&self) -> &dyn UpstreamTransport {
        self.transport.as_ref()
    }

    pub async fn get_json(
        &self,
        request: UpstreamRequest,
        ctx: &CallContext,
    ) -> Result<Value, ProviderError> {
        if let Err(wait) = self.quota.try_acquire() {
            return Err(ProviderError::rate_limited(format!(
                "{} request budget exhausted; retry in {:.1}s",
                self.upstream,
                wait.as_secs_f64()
            )));
        }

        let deadline = ctx
            .remaining()
            .map_or(DEFAULT_CALL_TIMEOUT, |remaining| {
                remaining.min(DEFAULT_CALL_TIMEOUT)
            });
        let request = request.with_timeout(deadline);

        let body = self
            .transport
            .get(request)
            .await
            .and_then(UpstreamResponse::ok_body)
            .map_err(|error| provider_error_from_transport(&error))?;

        serde_json::from_str(&body).map_err(|error| {
            ProviderError::data(format!(
                "{} response is not JSON: {error}",
                self.upstream
            ))
        })
    }
}

impl std::fmt::Debug for JsonGateway {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonGateway")
            .field("upstream", &self.upstream)
            .field("quota", &self.quota)
            .field("offline", &self.is_offline())
            .finish()
    }
}
