use crate::capabilities::ApiCapabilities;
use crate::client::{ApiClient, BufferedService};
use crate::config::{
    ApiClientConfig, ApisConfig, DEFAULT_METHOD_TIMEOUT, RateLimit, RetryPolicyConfig,
    TlsRootConfig, TransportSecurity,
};
use crate::error::ApiError;
use crate::layers::{AttemptTimeoutLayer, DefaultHeadersLayer, RetryInner, RetryPolicyComposer};
use crate::rate_gate::RateGate;
use crate::transport::hyper_transport;
use std::time::Duration;
use tower::buffer::Buffer;
use tower::{ServiceBuilder, ServiceExt};

/// Builder for [`ApiClient`]
///
/// ```no_run
/// # use modkit_api_client::{ApiCapabilities, ApiClientBuilder, RateLimit};
/// # use std::time::Duration;
/// # async fn demo<C: ApiCapabilities>(caps: C) -> Result<(), modkit_api_client::ApiError> {
/// let client = ApiClientBuilder::new()
///     .rate_limit(RateLimit::new(5, Duration::from_secs(1)))
///     .default_header("x-client", "desk-7")
///     .build(caps)?;
/// # Ok(())
/// # }
/// ```
pub struct ApiClientBuilder {
    config: ApiClientConfig,
    apis: Option<ApisConfig>,
    transport: Option<RetryInner>,
}

impl ApiClientBuilder {
    /// Create a new builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ApiClientConfig::default(),
            apis: None,
            transport: None,
        }
    }

    /// Create a builder with a specific configuration
    #[must_use]
    pub fn with_config(config: ApiClientConfig) -> Self {
        Self {
            config,
            apis: None,
            transport: None,
        }
    }

    /// Throughput cap of the client's rate gate
    #[must_use]
    pub fn rate_limit(mut self, limit: RateLimit) -> Self {
        self.config.rate_limit = limit;
        self
    }

    /// Take the rate limit from per-API settings, keyed by the capabilities' `api_id`.
    ///
    /// Resolved in [`build`](Self::build); overrides [`rate_limit`](Self::rate_limit).
    #[must_use]
    pub fn apis_config(mut self, apis: ApisConfig) -> Self {
        self.apis = Some(apis);
        self
    }

    /// Set retry policy; `None` disables retries
    #[must_use]
    pub fn retry(mut self, retry: Option<RetryPolicyConfig>) -> Self {
        self.config.retry = retry;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Add a header sent with every request that does not already carry it
    #[must_use]
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config
            .default_headers
            .push((name.into(), value.into()));
        self
    }

    /// Replace all default headers
    #[must_use]
    pub fn default_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.config.default_headers = headers;
        self
    }

    /// Maximum response body size in bytes
    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Set transport security mode
    #[must_use]
    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.config.transport = transport;
        self
    }

    /// Allow plain `http://` targets.
    ///
    /// Available in debug builds, or with the `allow-insecure-http` feature. Meant for
    /// tests against local mock servers.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        tracing::warn!(
            target: "modkit_api_client::security",
            "allow_insecure_http() called - HTTP traffic will NOT be encrypted"
        );
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    #[must_use]
    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.config.tls_roots = roots;
        self
    }

    /// Requests that may queue in front of the transport worker; at least 1
    #[must_use]
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer_capacity = capacity.max(1);
        self
    }

    /// Timeout for idle pooled connections; `None` keeps them indefinitely
    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.pool_idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.pool_max_idle_per_host = max;
        self
    }

    /// Replace the hyper transport with another service.
    ///
    /// Retries, attempt timeouts and default headers still wrap it.
    #[must_use]
    pub fn with_transport(mut self, transport: RetryInner) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the client. Must be called within a Tokio runtime.
    ///
    /// # Errors
    /// Returns `ApiError::Tls` if the TLS roots cannot be loaded, or a header error
    /// if the user agent or a default header is invalid.
    pub fn build<C: ApiCapabilities>(self, capabilities: C) -> Result<ApiClient<C>, ApiError> {
        let config = self.config;
        if config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                api_id = capabilities.api_id(),
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 use only for testing with mock servers"
            );
        }

        let rate_limit = self.apis.as_ref().map_or(config.rate_limit, |apis| {
            apis.rate_limit_for(capabilities.api_id())
        });

        let headers_layer =
            DefaultHeadersLayer::try_new(&config.user_agent, &config.default_headers)?;
        let transport = self
            .transport
            .map_or_else(|| hyper_transport(&config), Ok)?;

        // Retry → AttemptTimeout → DefaultHeaders → transport.
        // The timeout sits inside the retry loop so it bounds each attempt.
        let mut service: RetryInner = ServiceBuilder::new()
            .layer(AttemptTimeoutLayer::new(DEFAULT_METHOD_TIMEOUT))
            .layer(headers_layer)
            .service(transport)
            .boxed_clone();

        if let Some(retry) = &config.retry {
            service = RetryPolicyComposer::new(retry).wrap(service);
        }

        let buffered: BufferedService = Buffer::new(service, config.buffer_capacity.max(1));

        tracing::debug!(
            api_id = capabilities.api_id(),
            occurrences = rate_limit.occurrences(),
            window_ms = rate_limit.window().as_millis(),
            retries = config.retry.is_some(),
            "api client built"
        );

        Ok(ApiClient::new(
            capabilities,
            RateGate::new(rate_limit),
            buffered,
            config.transport,
            config.max_body_size,
        ))
    }
}

impl Default for ApiClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
