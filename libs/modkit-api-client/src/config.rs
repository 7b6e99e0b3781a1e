use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Default User-Agent string for outbound API calls
pub const DEFAULT_USER_AGENT: &str = concat!("modkit-api-client/", env!("CARGO_PKG_VERSION"));

/// Calls admitted per window when an API has no explicit rate limit
pub const DEFAULT_RATE_LIMIT_OCCURRENCES: u32 = 10;

/// Window length when an API has no explicit rate limit
pub const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(1);

/// Per-attempt timeout of a method descriptor unless overridden
pub const DEFAULT_METHOD_TIMEOUT: Duration = Duration::from_millis(59_000);

/// Throughput cap of one API: at most `occurrences` admissions in any rolling `window`.
///
/// `occurrences == 0` disables limiting entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    occurrences: u32,
    window: Duration,
}

impl RateLimit {
    #[must_use]
    pub const fn new(occurrences: u32, window: Duration) -> Self {
        Self {
            occurrences,
            window,
        }
    }

    /// A limit that never blocks.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            occurrences: 0,
            window: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn occurrences(&self) -> u32 {
        self.occurrences
    }

    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Whether calls can ever be held back by this limit.
    ///
    /// A zero window releases every slot the instant it is taken, so it limits nothing.
    #[must_use]
    pub const fn has_limit(&self) -> bool {
        self.occurrences != 0 && !self.window.is_zero()
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_LIMIT_OCCURRENCES, DEFAULT_RATE_LIMIT_WINDOW)
    }
}

/// Raw rate-limit numbers for one API as they appear in configuration.
///
/// Missing values fall back to 10 occurrences per 1 second.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitSettings {
    pub occurrences: Option<u32>,
    pub seconds: Option<u64>,
}

impl RateLimitSettings {
    #[must_use]
    pub fn to_rate_limit(&self) -> RateLimit {
        RateLimit::new(
            self.occurrences.unwrap_or(DEFAULT_RATE_LIMIT_OCCURRENCES),
            self.seconds
                .map_or(DEFAULT_RATE_LIMIT_WINDOW, Duration::from_secs),
        )
    }
}

/// Settings of one remote API, keyed by its API id in [`ApisConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiSettings {
    pub rate_limit: RateLimitSettings,
}

/// Per-API settings section.
///
/// ```yaml
/// apis:
///   exchange-a:
///     rate_limit:
///       occurrences: 20
///       seconds: 1
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApisConfig {
    pub apis: HashMap<String, ApiSettings>,
}

impl ApisConfig {
    /// Rate limit configured for `api_id`, or the default when the API is not listed.
    #[must_use]
    pub fn rate_limit_for(&self, api_id: &str) -> RateLimit {
        self.apis
            .get(api_id)
            .map(|settings| settings.rate_limit.to_rate_limit())
            .unwrap_or_default()
    }
}

/// Exponential backoff configuration for retries
///
/// Computes delay as: `min(initial * multiplier^attempt, max)` with optional jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    /// Delay before the first retry (default: 2s)
    pub initial: Duration,

    /// Upper bound for any single delay (default: 60s)
    pub max: Duration,

    /// Growth factor between consecutive retries (default: 2.0)
    pub multiplier: f64,

    /// Add a random 0-25% on top of each delay (default: false)
    pub jitter: bool,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl ExponentialBackoff {
    /// Create backoff with custom initial and max durations
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            ..Default::default()
        }
    }

    /// Create fast backoff for testing (1ms initial, 100ms max, no jitter)
    #[must_use]
    pub fn fast() -> Self {
        Self {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

/// Delay strategy between retries of one retry rule
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDelay {
    /// Same delay before every retry
    Fixed(Duration),
    /// Growing delay, see [`ExponentialBackoff`]
    Exponential(ExponentialBackoff),
}

/// Retry budget and delay for one class of outcome
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRetryConfig {
    /// Retries after the initial attempt (0 = never retry)
    pub max_retries: usize,
    pub delay: RetryDelay,
}

impl StatusRetryConfig {
    #[must_use]
    pub fn never() -> Self {
        Self {
            max_retries: 0,
            delay: RetryDelay::Fixed(Duration::ZERO),
        }
    }

    #[must_use]
    pub fn fixed(max_retries: usize, delay: Duration) -> Self {
        Self {
            max_retries,
            delay: RetryDelay::Fixed(delay),
        }
    }

    #[must_use]
    pub fn exponential(max_retries: usize, backoff: ExponentialBackoff) -> Self {
        Self {
            max_retries,
            delay: RetryDelay::Exponential(backoff),
        }
    }
}

/// Layered retry policy, applied outer to inner:
///
/// 1. `too_many_requests` (429)
/// 2. `forbidden` (403)
/// 3. `not_found` (404)
/// 4. `transient`: transport faults, attempt timeouts and every other non-success status
///
/// A status handled by rules 1-3 is never retried by rule 4.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicyConfig {
    /// 429 handling (default: 4 retries, fixed 14s cooldown)
    pub too_many_requests: StatusRetryConfig,

    /// 403 handling (default: no retries)
    pub forbidden: StatusRetryConfig,

    /// 404 handling (default: no retries)
    pub not_found: StatusRetryConfig,

    /// Everything else that failed (default: 3 retries, 2s/4s/8s)
    pub transient: StatusRetryConfig,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            too_many_requests: StatusRetryConfig::fixed(4, Duration::from_secs(14)),
            forbidden: StatusRetryConfig::never(),
            not_found: StatusRetryConfig::never(),
            transient: StatusRetryConfig::exponential(3, ExponentialBackoff::default()),
        }
    }
}

impl RetryPolicyConfig {
    /// Every rule with zero retries; each outcome surfaces after a single attempt.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            too_many_requests: StatusRetryConfig::never(),
            forbidden: StatusRetryConfig::never(),
            not_found: StatusRetryConfig::never(),
            transient: StatusRetryConfig::never(),
        }
    }

    /// Default retry budgets with millisecond delays, for tests
    #[must_use]
    pub fn fast() -> Self {
        Self {
            too_many_requests: StatusRetryConfig::fixed(4, Duration::from_millis(5)),
            transient: StatusRetryConfig::exponential(3, ExponentialBackoff::fast()),
            ..Self::default()
        }
    }
}

/// TLS root certificate strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsRootConfig {
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// Use OS native certificate store
    Native,
}

/// Transport security mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportSecurity {
    /// Require TLS for all connections (HTTPS only) - default and recommended
    #[default]
    TlsOnly,
    /// Allow plain HTTP connections; only for local mock servers
    AllowInsecureHttp,
}

/// Configuration of an [`ApiClient`](crate::ApiClient)
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Throughput cap shared by every call of the client (default: 10 per second)
    pub rate_limit: RateLimit,

    /// Retry policy; `None` sends every request exactly once
    pub retry: Option<RetryPolicyConfig>,

    /// User-Agent header value
    pub user_agent: String,

    /// Headers added to every request unless the request already carries them,
    /// e.g. a static `Authorization` value
    pub default_headers: Vec<(String, String)>,

    /// Maximum response body size in bytes (default: 10 MB)
    pub max_body_size: usize,

    /// Transport security mode (default: `TlsOnly`)
    pub transport: TransportSecurity,

    /// TLS root certificate strategy (default: `WebPki`)
    pub tls_roots: TlsRootConfig,

    /// Requests that may queue in front of the transport worker (default: 1024)
    pub buffer_capacity: usize,

    /// Timeout for idle pooled connections (default: 90 seconds)
    pub pool_idle_timeout: Option<Duration>,

    /// Maximum number of idle connections per host (default: 32)
    pub pool_max_idle_per_host: usize,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimit::default(),
            retry: Some(RetryPolicyConfig::default()),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            default_headers: Vec::new(),
            max_body_size: 10 * 1024 * 1024,
            transport: TransportSecurity::TlsOnly,
            tls_roots: TlsRootConfig::default(),
            buffer_capacity: 1024,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
        }
    }
}

impl ApiClientConfig {
    /// Configuration for tests against local mock servers
    ///
    /// Plain HTTP, no rate limit, no retries, small pool.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            rate_limit: RateLimit::unlimited(),
            retry: None,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            default_headers: Vec::new(),
            max_body_size: 1024 * 1024,
            transport: TransportSecurity::AllowInsecureHttp,
            tls_roots: TlsRootConfig::default(),
            buffer_capacity: 256,
            pool_idle_timeout: Some(Duration::from_secs(10)),
            pool_max_idle_per_host: 4,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_default_is_ten_per_second() {
        let limit = RateLimit::default();
        assert_eq!(limit.occurrences(), 10);
        assert_eq!(limit.window(), Duration::from_secs(1));
        assert!(limit.has_limit());
    }

    #[test]
    fn test_zero_occurrences_means_unlimited() {
        assert!(!RateLimit::new(0, Duration::from_secs(1)).has_limit());
        assert!(!RateLimit::unlimited().has_limit());
        assert!(!RateLimit::new(5, Duration::ZERO).has_limit());
    }

    #[test]
    fn test_apis_config_deserialize() {
        let raw = serde_json::json!({
            "apis": {
                "exchange-a": { "rate_limit": { "occurrences": 20, "seconds": 2 } },
                "exchange-b": { "rate_limit": { "occurrences": 0 } },
                "exchange-c": {}
            }
        });
        let config: ApisConfig = serde_json::from_value(raw).unwrap();

        assert_eq!(
            config.rate_limit_for("exchange-a"),
            RateLimit::new(20, Duration::from_secs(2))
        );
        assert!(!config.rate_limit_for("exchange-b").has_limit());
        assert_eq!(config.rate_limit_for("exchange-c"), RateLimit::default());
        assert_eq!(config.rate_limit_for("unknown"), RateLimit::default());
    }

    #[test]
    fn test_rate_limit_settings_reject_unknown_fields() {
        let raw = serde_json::json!({ "occurences": 3 });
        let result: Result<RateLimitSettings, _> = serde_json::from_value(raw);
        assert!(result.is_err());
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicyConfig::default();
        assert_eq!(
            policy.too_many_requests,
            StatusRetryConfig::fixed(4, Duration::from_secs(14))
        );
        assert_eq!(policy.forbidden.max_retries, 0);
        assert_eq!(policy.not_found.max_retries, 0);
        assert_eq!(policy.transient.max_retries, 3);
        assert_eq!(
            policy.transient.delay,
            RetryDelay::Exponential(ExponentialBackoff::default())
        );
    }

    #[test]
    fn test_retry_policy_disabled() {
        let policy = RetryPolicyConfig::disabled();
        assert_eq!(policy.too_many_requests.max_retries, 0);
        assert_eq!(policy.transient.max_retries, 0);
    }

    #[test]
    fn test_client_config_for_testing() {
        let config = ApiClientConfig::for_testing();
        assert_eq!(config.transport, TransportSecurity::AllowInsecureHttp);
        assert!(config.retry.is_none());
        assert!(!config.rate_limit.has_limit());
    }

    #[test]
    fn test_client_config_default() {
        let config = ApiClientConfig::default();
        assert_eq!(config.transport, TransportSecurity::TlsOnly);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.rate_limit, RateLimit::default());
        assert!(config.retry.is_some());
        assert_eq!(config.buffer_capacity, 1024);
    }
}
