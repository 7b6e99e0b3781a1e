use crate::config::{ExponentialBackoff, RetryDelay, RetryPolicyConfig, StatusRetryConfig};
use crate::error::ApiError;
use crate::response::{RETRY_DRAIN_LIMIT, ResponseBody, drain_response_body};
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::util::BoxCloneService;
use tower::{Layer, Service, ServiceExt};

/// Type-erased service every retry rule wraps
pub type RetryInner = BoxCloneService<Request<Full<Bytes>>, Response<ResponseBody>, ApiError>;

/// What a retry rule reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryMatch {
    /// Exactly this status
    Status(StatusCode),
    /// Transport faults, attempt timeouts, and any non-success status outside `classified`
    Transient { classified: Vec<StatusCode> },
}

/// One retry rule: what it matches, how often it retries, how long it waits.
#[derive(Debug, Clone)]
pub struct RetryRule {
    name: &'static str,
    matcher: RetryMatch,
    max_retries: usize,
    delay: RetryDelay,
}

impl RetryRule {
    #[must_use]
    pub fn status(name: &'static str, status: StatusCode, config: &StatusRetryConfig) -> Self {
        Self {
            name,
            matcher: RetryMatch::Status(status),
            max_retries: config.max_retries,
            delay: config.delay.clone(),
        }
    }

    #[must_use]
    pub fn transient(
        name: &'static str,
        classified: Vec<StatusCode>,
        config: &StatusRetryConfig,
    ) -> Self {
        Self {
            name,
            matcher: RetryMatch::Transient { classified },
            max_retries: config.max_retries,
            delay: config.delay.clone(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn matcher(&self) -> &RetryMatch {
        &self.matcher
    }

    #[must_use]
    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn matches_status(&self, status: StatusCode) -> bool {
        match &self.matcher {
            RetryMatch::Status(expected) => status == *expected,
            RetryMatch::Transient { classified } => {
                !status.is_success() && !classified.contains(&status)
            }
        }
    }

    fn matches_error(&self, err: &ApiError) -> bool {
        matches!(self.matcher, RetryMatch::Transient { .. })
            && matches!(err, ApiError::Transport(_) | ApiError::Timeout(_))
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        match &self.delay {
            RetryDelay::Fixed(delay) => *delay,
            RetryDelay::Exponential(backoff) => calculate_backoff(backoff, attempt),
        }
    }
}

/// Builds the layered retry stack from a [`RetryPolicyConfig`].
///
/// Rules are applied outer to inner: 429, 403, 404, then the transient rule. The
/// transient rule's exclusion set is derived from the status rules above it, so a
/// classified status can never be retried twice.
#[derive(Debug, Clone)]
pub struct RetryPolicyComposer {
    rules: Vec<RetryRule>,
}

impl RetryPolicyComposer {
    #[must_use]
    pub fn new(config: &RetryPolicyConfig) -> Self {
        let mut rules = vec![
            RetryRule::status(
                "too_many_requests",
                StatusCode::TOO_MANY_REQUESTS,
                &config.too_many_requests,
            ),
            RetryRule::status("forbidden", StatusCode::FORBIDDEN, &config.forbidden),
            RetryRule::status("not_found", StatusCode::NOT_FOUND, &config.not_found),
        ];
        let classified = rules
            .iter()
            .filter_map(|rule| match &rule.matcher {
                RetryMatch::Status(status) => Some(*status),
                RetryMatch::Transient { .. } => None,
            })
            .collect();
        rules.push(RetryRule::transient(
            "transient",
            classified,
            &config.transient,
        ));
        Self { rules }
    }

    /// Rules, outermost first
    #[must_use]
    pub fn rules(&self) -> &[RetryRule] {
        &self.rules
    }

    /// Wrap `inner` so the first rule ends up outermost.
    #[must_use]
    pub fn wrap(&self, inner: RetryInner) -> RetryInner {
        self.rules.iter().rev().fold(inner, |service, rule| {
            RetryLayer::new(rule.clone()).layer(service).boxed_clone()
        })
    }
}

/// Tower layer applying a single [`RetryRule`]
#[derive(Clone, Debug)]
pub struct RetryLayer {
    rule: Arc<RetryRule>,
}

impl RetryLayer {
    #[must_use]
    pub fn new(rule: RetryRule) -> Self {
        Self {
            rule: Arc::new(rule),
        }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService {
            inner,
            rule: Arc::clone(&self.rule),
        }
    }
}

/// Service that re-sends a request while its [`RetryRule`] matches the outcome
///
/// Exhausted retries surface the last outcome unchanged: a response stays a
/// response (whatever its status), an error stays an error. Bodies of discarded
/// responses are drained for connection reuse.
#[derive(Clone, Debug)]
pub struct RetryService<S> {
    inner: S,
    rule: Arc<RetryRule>,
}

impl<S> Service<Request<Full<Bytes>>> for RetryService<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResponseBody>, Error = ApiError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = S::Response;
    type Error = ApiError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        // Swap so we consume the instance that was poll_ready'd,
        // leaving a fresh clone for the next poll_ready cycle.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let rule = Arc::clone(&self.rule);

        let (parts, body) = req.into_parts();
        let http_version = parts.version;
        let extensions = parts.extensions.clone();
        let parts = Arc::new(parts);

        Box::pin(async move {
            let mut attempt = 0usize;
            let mut svc = inner;
            loop {
                let mut req = Request::from_parts((*parts).clone(), body.clone());
                *req.version_mut() = http_version;
                *req.extensions_mut() = extensions.clone();

                let outcome = svc.ready().await?.call(req).await;
                if attempt >= rule.max_retries {
                    return outcome;
                }

                match outcome {
                    Ok(resp) if rule.matches_status(resp.status()) => {
                        let delay = rule.delay_for(attempt);
                        tracing::debug!(
                            rule = rule.name,
                            retry = attempt + 1,
                            max_retries = rule.max_retries,
                            status = resp.status().as_u16(),
                            method = %parts.method,
                            uri = %parts.uri,
                            backoff_ms = delay.as_millis(),
                            "Retrying request after status code"
                        );
                        if let Err(e) = drain_response_body(resp, RETRY_DRAIN_LIMIT).await {
                            tracing::debug!(
                                error = %e,
                                "Failed to drain response body before retry; connection may not be reused"
                            );
                        }
                        tokio::time::sleep(delay).await;
                    }
                    Err(err) if rule.matches_error(&err) => {
                        let delay = rule.delay_for(attempt);
                        tracing::debug!(
                            rule = rule.name,
                            retry = attempt + 1,
                            max_retries = rule.max_retries,
                            error = %err,
                            method = %parts.method,
                            uri = %parts.uri,
                            backoff_ms = delay.as_millis(),
                            "Retrying request after error"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    other => return other,
                }
                attempt += 1;
            }
        })
    }
}

/// Calculate backoff duration for a given attempt
///
/// Safely handles edge cases (NaN, infinity, negative values) to avoid panics.
#[must_use]
pub fn calculate_backoff(backoff: &ExponentialBackoff, attempt: usize) -> Duration {
    // 1 day; anything longer is not a meaningful retry delay
    const MAX_BACKOFF_SECS: f64 = 86400.0;

    let attempt_i32 = i32::try_from(attempt).unwrap_or(i32::MAX);

    let multiplier = if backoff.multiplier.is_finite() && backoff.multiplier >= 0.0 {
        backoff.multiplier
    } else {
        1.0
    };

    let initial_secs = backoff.initial.as_secs_f64();
    let max_secs = backoff.max.as_secs_f64().min(MAX_BACKOFF_SECS);

    let base = initial_secs * multiplier.powi(attempt_i32);
    let clamped = if base.is_finite() {
        base.min(max_secs).max(0.0)
    } else {
        max_secs
    };
    let duration = Duration::from_secs_f64(clamped);

    let duration = if backoff.jitter {
        let jitter_factor = rand::rng().random_range(0.0..=0.25);
        duration + duration.mul_f64(jitter_factor)
    } else {
        duration
    };

    duration.min(Duration::from_secs_f64(max_secs))
}
