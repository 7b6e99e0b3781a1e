#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Rate-limited REST API client core for `ModKit`
//!
//! Shared call machinery for clients of remote REST APIs (exchanges, market data
//! vendors, partner services):
//! - Rolling-window rate gate per API, with a bypass for high-priority methods
//! - Public and private (signed) request paths through an [`ApiCapabilities`] hook
//! - Strictly increasing nonces for signatures
//! - Ordered retry policies: 429 cooldown, no retries for 403/404, backoff for the rest
//! - Per-method attempt timeouts and caller-driven cancellation
//! - A uniform [`CallOutcome`] that carries the raw response text and timing, and
//!   never surfaces as `Err` or a panic
//!
//! Transport is hyper over rustls (HTTPS only by default) with connection pooling
//! and transparent response decompression.
//!
//! # Example
//!
//! ```ignore
//! use modkit_api_client::{ApiClient, MethodDescriptor, Priority};
//!
//! static TICKER: LazyLock<MethodDescriptor> =
//!     LazyLock::new(|| MethodDescriptor::public_get(Priority::Normal));
//!
//! let client = ApiClient::builder().build(MyExchange::new(keys))?;
//!
//! let outcome = client
//!     .call(&TICKER, "api/v3/ticker/price")
//!     .query_pairs(&[("symbol", "BTCUSDT")])
//!     .send::<Ticker>()
//!     .await;
//! if let Some(ticker) = outcome.value() {
//!     println!("{}", ticker.price);
//! }
//! ```

mod builder;
mod capabilities;
mod client;
mod config;
mod descriptor;
mod error;
mod layers;
mod nonce;
mod outcome;
mod rate_gate;
mod request;
mod response;
mod transport;

pub use builder::ApiClientBuilder;
pub use capabilities::{ApiCapabilities, SigningContext};
pub use client::{ApiClient, BufferedService, CallBuilder, ServiceFuture, map_buffer_error};
pub use config::{
    ApiClientConfig, ApiSettings, ApisConfig, DEFAULT_METHOD_TIMEOUT,
    DEFAULT_RATE_LIMIT_OCCURRENCES, DEFAULT_RATE_LIMIT_WINDOW, DEFAULT_USER_AGENT,
    ExponentialBackoff, RateLimit, RateLimitSettings, RetryDelay, RetryPolicyConfig,
    StatusRetryConfig, TlsRootConfig, TransportSecurity,
};
pub use descriptor::{ContentKind, Exposure, MethodDescriptor, Priority};
pub use error::{ApiError, BoxError, ErrorKind, InvalidUriKind, UsageError};
pub use layers::{
    AttemptTimeout, AttemptTimeoutLayer, AttemptTimeoutService, DefaultHeadersLayer,
    DefaultHeadersService, RetryInner, RetryLayer, RetryMatch, RetryPolicyComposer, RetryRule,
    RetryService, calculate_backoff,
};
pub use nonce::NonceGenerator;
pub use outcome::{
    CallMeta, CallOutcome, FailureReport, RAW_BODY_UNREADABLE, RAW_NO_RESPONSE, RAW_NOT_SENT,
};
pub use rate_gate::RateGate;
pub use request::{ApiRequest, RequestPayload, compose_target};
pub use response::{
    ERROR_BODY_PREVIEW_LIMIT, RETRY_DRAIN_LIMIT, ResponseBody, body_preview, drain_response_body,
    parse_retry_after, read_body_limited,
};
pub use transport::hyper_transport;
