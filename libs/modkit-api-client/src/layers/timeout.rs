use crate::error::ApiError;
use http::Request;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service};

/// Per-attempt timeout of one request, carried as a request extension.
///
/// Set from the method descriptor; read by [`AttemptTimeoutLayer`] on every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptTimeout(pub Duration);

/// Bounds each attempt by the request's [`AttemptTimeout`], or `fallback` without one.
#[derive(Debug, Clone, Copy)]
pub struct AttemptTimeoutLayer {
    fallback: Duration,
}

impl AttemptTimeoutLayer {
    #[must_use]
    pub fn new(fallback: Duration) -> Self {
        Self { fallback }
    }
}

impl<S> Layer<S> for AttemptTimeoutLayer {
    type Service = AttemptTimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AttemptTimeoutService {
            inner,
            fallback: self.fallback,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttemptTimeoutService<S> {
    inner: S,
    fallback: Duration,
}

impl<S, ReqBody> Service<Request<ReqBody>> for AttemptTimeoutService<S>
where
    S: Service<Request<ReqBody>, Error = ApiError>,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = ApiError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let timeout = req
            .extensions()
            .get::<AttemptTimeout>()
            .map_or(self.fallback, |attempt| attempt.0);
        let fut = self.inner.call(req);
        Box::pin(async move {
            tokio::time::timeout(timeout, fut)
                .await
                .map_err(|_| ApiError::Timeout(timeout))?
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::Response;
    use http_body_util::Full;
    use tower::ServiceExt;

    /// Answers after a fixed delay
    #[derive(Clone)]
    struct SlowService {
        delay: Duration,
    }

    impl Service<Request<Full<Bytes>>> for SlowService {
        type Response = Response<Full<Bytes>>;
        type Error = ApiError;
        type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: Request<Full<Bytes>>) -> Self::Future {
            let delay = self.delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                Ok(Response::new(Full::new(Bytes::new())))
            })
        }
    }

    fn request_with_timeout(timeout: Option<Duration>) -> Request<Full<Bytes>> {
        let mut req = Request::builder()
            .uri("http://example.com")
            .body(Full::new(Bytes::new()))
            .unwrap();
        if let Some(timeout) = timeout {
            req.extensions_mut().insert(AttemptTimeout(timeout));
        }
        req
    }

    #[tokio::test(start_paused = true)]
    async fn test_extension_timeout_applies() {
        let service = AttemptTimeoutLayer::new(Duration::from_secs(60)).layer(SlowService {
            delay: Duration::from_secs(5),
        });

        let result = service
            .oneshot(request_with_timeout(Some(Duration::from_secs(1))))
            .await;
        assert!(matches!(result, Err(ApiError::Timeout(d)) if d == Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_timeout_without_extension() {
        let layer = AttemptTimeoutLayer::new(Duration::from_secs(2));

        let slow = layer.layer(SlowService {
            delay: Duration::from_secs(5),
        });
        let result = slow.oneshot(request_with_timeout(None)).await;
        assert!(matches!(result, Err(ApiError::Timeout(d)) if d == Duration::from_secs(2)));

        let fast = layer.layer(SlowService {
            delay: Duration::from_millis(10),
        });
        assert!(fast.oneshot(request_with_timeout(None)).await.is_ok());
    }
}
