use crate::error::ApiError;
use http::header::{HeaderName, HeaderValue, USER_AGENT};
use http::{Request, Response};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer that adds User-Agent and client-wide default headers to every request
///
/// Headers already present on the request (e.g. set by a signing hook) are kept.
#[derive(Clone, Debug)]
pub struct DefaultHeadersLayer {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl DefaultHeadersLayer {
    /// Create a layer from a user agent and additional `(name, value)` pairs
    ///
    /// # Errors
    /// Returns `ApiError::InvalidHeaderName` / `ApiError::InvalidHeaderValue` if any
    /// pair cannot be used as an HTTP header.
    pub fn try_new(
        user_agent: impl AsRef<str>,
        extra: &[(String, String)],
    ) -> Result<Self, ApiError> {
        let mut headers = Vec::with_capacity(extra.len() + 1);
        headers.push((USER_AGENT, HeaderValue::from_str(user_agent.as_ref())?));
        for (name, value) in extra {
            headers.push((
                HeaderName::try_from(name.as_str())?,
                HeaderValue::try_from(value.as_str())?,
            ));
        }
        Ok(Self { headers })
    }
}

impl<S> Layer<S> for DefaultHeadersLayer {
    type Service = DefaultHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DefaultHeadersService {
            inner,
            headers: self.headers.clone(),
        }
    }
}

/// Service that fills in missing default headers
#[derive(Clone, Debug)]
pub struct DefaultHeadersService<S> {
    inner: S,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for DefaultHeadersService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        for (name, value) in &self.headers {
            if !req.headers().contains_key(name) {
                req.headers_mut().insert(name.clone(), value.clone());
            }
        }
        self.inner.call(req)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{HeaderMap, Method, StatusCode};
    use http_body_util::Full;
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    /// Records the headers of the last request it saw
    #[derive(Clone, Default)]
    struct CaptureService {
        seen: Arc<Mutex<Option<HeaderMap>>>,
    }

    impl Service<Request<Full<Bytes>>> for CaptureService {
        type Response = Response<Full<Bytes>>;
        type Error = ApiError;
        type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
            *self.seen.lock().unwrap() = Some(req.headers().clone());
            std::future::ready(Ok(Response::builder()
                .status(StatusCode::OK)
                .body(Full::new(Bytes::new()))
                .unwrap()))
        }
    }

    fn get(headers: &[(&str, &str)]) -> Request<Full<Bytes>> {
        let mut builder = Request::builder()
            .method(Method::GET)
            .uri("https://api.example.com");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    #[tokio::test]
    async fn test_user_agent_and_defaults_added() {
        let capture = CaptureService::default();
        let layer = DefaultHeadersLayer::try_new(
            "test-agent/1.0",
            &[("x-api-key".to_owned(), "k-1".to_owned())],
        )
        .unwrap();

        layer.layer(capture.clone()).oneshot(get(&[])).await.unwrap();

        let seen = capture.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.get(USER_AGENT).unwrap(), "test-agent/1.0");
        assert_eq!(seen.get("x-api-key").unwrap(), "k-1");
    }

    #[tokio::test]
    async fn test_request_headers_not_overwritten() {
        let capture = CaptureService::default();
        let layer = DefaultHeadersLayer::try_new(
            "test-agent/1.0",
            &[("x-api-key".to_owned(), "default".to_owned())],
        )
        .unwrap();

        layer
            .layer(capture.clone())
            .oneshot(get(&[("user-agent", "custom/2.0"), ("x-api-key", "signed")]))
            .await
            .unwrap();

        let seen = capture.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.get(USER_AGENT).unwrap(), "custom/2.0");
        assert_eq!(seen.get("x-api-key").unwrap(), "signed");
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(DefaultHeadersLayer::try_new("invalid\x00agent", &[]).is_err());
        assert!(
            DefaultHeadersLayer::try_new("ok", &[("bad header".to_owned(), "v".to_owned())])
                .is_err()
        );
    }
}
