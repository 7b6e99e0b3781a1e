use crate::descriptor::MethodDescriptor;
use crate::error::{ApiError, UsageError};
use crate::nonce::NonceGenerator;
use crate::outcome::FailureReport;
use crate::request::{ApiRequest, compose_target};
use async_trait::async_trait;

/// What a concrete exchange/service client plugs into the shared call machinery.
///
/// Only `api_id` and `base_url` are mandatory. A client without private methods
/// leaves `build_private_request` alone; calling a private method on it then fails
/// with [`UsageError::SigningNotConfigured`] before anything is sent.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use modkit_api_client::{ApiCapabilities, ApiError, ApiRequest, SigningContext};
///
/// struct Exchange {
///     key: String,
/// }
///
/// #[async_trait]
/// impl ApiCapabilities for Exchange {
///     fn api_id(&self) -> &str {
///         "exchange"
///     }
///
///     fn base_url(&self) -> &str {
///         "https://api.exchange.example"
///     }
///
///     async fn build_private_request(
///         &self,
///         request: &mut ApiRequest,
///         ctx: &SigningContext<'_>,
///     ) -> Result<(), ApiError> {
///         request.set_header("x-api-key", &self.key)?;
///         request.set_header("x-nonce", &ctx.next_nonce().to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait ApiCapabilities: Send + Sync + 'static {
    /// Identifier used for configuration lookup and in log lines
    fn api_id(&self) -> &str;

    /// Scheme and host (plus optional path prefix) every target is built on
    fn base_url(&self) -> &str;

    /// Absolute target of a public call
    fn public_target(&self, path: &str, query: &str) -> String {
        compose_target(self.base_url(), path, query)
    }

    /// Absolute target of a private call, before signing
    fn private_target(&self, path: &str, query: &str) -> String {
        compose_target(self.base_url(), path, query)
    }

    /// Adjust a public request (extra headers, API keys); no-op by default.
    ///
    /// # Errors
    /// An error here fails the call without sending it.
    async fn build_public_request(
        &self,
        _request: &mut ApiRequest,
        _ctx: &SigningContext<'_>,
    ) -> Result<(), ApiError> {
        Ok(())
    }

    /// Authenticate a private request.
    ///
    /// # Errors
    /// The default returns [`UsageError::SigningNotConfigured`]; implementations
    /// report their own signing failures as [`ApiError::Signing`].
    async fn build_private_request(
        &self,
        _request: &mut ApiRequest,
        _ctx: &SigningContext<'_>,
    ) -> Result<(), ApiError> {
        Err(UsageError::SigningNotConfigured {
            api_id: self.api_id().to_owned(),
        }
        .into())
    }

    /// Observe an unsuccessful call.
    ///
    /// Errors and panics raised here are logged and discarded; they never change
    /// the outcome handed back to the caller.
    ///
    /// # Errors
    /// Any error is swallowed by the dispatcher.
    async fn notify_failure(&self, report: &FailureReport<'_>) -> anyhow::Result<()> {
        tracing::debug!(
            api_id = report.api_id,
            elapsed_ms = report.elapsed.as_millis(),
            "{} {}:{} {} | {}",
            report.api_id,
            report
                .status
                .map_or_else(|| "-".to_owned(), |status| status.as_u16().to_string()),
            report.target,
            report.error,
            report.raw_text
        );
        Ok(())
    }
}

/// Per-call context handed to the request hooks.
#[derive(Debug, Clone, Copy)]
pub struct SigningContext<'a> {
    nonce: &'a NonceGenerator,
    method: &'a MethodDescriptor,
}

impl<'a> SigningContext<'a> {
    #[must_use]
    pub fn new(nonce: &'a NonceGenerator, method: &'a MethodDescriptor) -> Self {
        Self { nonce, method }
    }

    /// Strictly increasing nonce from the client's generator
    #[must_use]
    pub fn next_nonce(&self) -> u64 {
        self.nonce.next()
    }

    #[must_use]
    pub fn method(&self) -> &'a MethodDescriptor {
        self.method
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::descriptor::{ContentKind, Priority};
    use crate::request::RequestPayload;
    use http::Method;

    struct PublicOnly;

    #[async_trait]
    impl ApiCapabilities for PublicOnly {
        fn api_id(&self) -> &str {
            "public-only"
        }

        fn base_url(&self) -> &str {
            "https://api.example.com"
        }
    }

    fn request() -> ApiRequest {
        ApiRequest::new(
            Method::GET,
            "https://api.example.com/v1/time".to_owned(),
            "v1/time".to_owned(),
            String::new(),
            ContentKind::Json,
            RequestPayload::Empty,
        )
    }

    #[test]
    fn test_default_targets_compose_base_url() {
        let caps = PublicOnly;
        assert_eq!(
            caps.public_target("/v1/ticker", "symbol=BTC"),
            "https://api.example.com/v1/ticker?symbol=BTC"
        );
        assert_eq!(
            caps.private_target("v1/orders", ""),
            "https://api.example.com/v1/orders"
        );
    }

    #[tokio::test]
    async fn test_default_private_hook_is_usage_error() {
        let caps = PublicOnly;
        let nonce = NonceGenerator::new();
        let method = MethodDescriptor::private_get(Priority::Normal);
        let ctx = SigningContext::new(&nonce, &method);

        let mut req = request();
        let err = caps.build_private_request(&mut req, &ctx).await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::Usage(UsageError::SigningNotConfigured { ref api_id }) if api_id == "public-only"
        ));
        // Refusing to sign must not consume a nonce
        assert_eq!(nonce.last_issued(), 0);
    }

    #[tokio::test]
    async fn test_default_public_hook_leaves_request_untouched() {
        let caps = PublicOnly;
        let nonce = NonceGenerator::new();
        let method = MethodDescriptor::public_get(Priority::Normal);
        let ctx = SigningContext::new(&nonce, &method);

        let mut req = request();
        caps.build_public_request(&mut req, &ctx).await.unwrap();
        assert!(req.headers().is_empty());
        assert_eq!(req.target(), "https://api.example.com/v1/time");
    }

    #[test]
    fn test_signing_context_nonces_increase() {
        let nonce = NonceGenerator::new();
        let method = MethodDescriptor::private_post(Priority::High);
        let ctx = SigningContext::new(&nonce, &method);

        let first = ctx.next_nonce();
        let second = ctx.next_nonce();
        assert!(second > first);
        assert!(ctx.method().is_high_priority());
    }
}
