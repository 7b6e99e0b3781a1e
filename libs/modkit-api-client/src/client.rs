use crate::builder::ApiClientBuilder;
use crate::capabilities::{ApiCapabilities, SigningContext};
use crate::config::TransportSecurity;
use crate::descriptor::MethodDescriptor;
use crate::error::ApiError;
use crate::nonce::NonceGenerator;
use crate::outcome::CallOutcome;
use crate::rate_gate::RateGate;
use crate::request::{ApiRequest, RequestPayload};
use crate::response::{ResponseBody, read_body_limited};
use bytes::Bytes;
use futures::FutureExt;
use http::{Request, Response};
use http_body_util::Full;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower::buffer::Buffer;

/// Type alias for the future type of the inner service
pub type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, ApiError>> + Send>>;

/// Type alias for the buffered service
pub type BufferedService = Buffer<Request<Full<Bytes>>, ServiceFuture>;

/// Rate-limited, retrying client of one remote API.
///
/// Owns its capabilities, rate gate, nonce generator and transport. `Send + Sync`:
/// share one instance (behind an `Arc`) between every task that talks to the API,
/// so they all draw from the same rate budget.
///
/// Every call resolves to a [`CallOutcome`]; transport faults, error statuses and
/// integration mistakes are reported in it rather than as `Err` or a panic.
pub struct ApiClient<C> {
    capabilities: C,
    gate: RateGate,
    nonce: NonceGenerator,
    service: BufferedService,
    transport_security: TransportSecurity,
    max_body_size: usize,
}

impl<C: ApiCapabilities> ApiClient<C> {
    pub(crate) fn new(
        capabilities: C,
        gate: RateGate,
        service: BufferedService,
        transport_security: TransportSecurity,
        max_body_size: usize,
    ) -> Self {
        Self {
            capabilities,
            gate,
            nonce: NonceGenerator::new(),
            service,
            transport_security,
            max_body_size,
        }
    }

    #[must_use]
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::new()
    }

    #[must_use]
    pub fn capabilities(&self) -> &C {
        &self.capabilities
    }

    #[must_use]
    pub fn api_id(&self) -> &str {
        self.capabilities.api_id()
    }

    #[must_use]
    pub fn rate_gate(&self) -> &RateGate {
        &self.gate
    }

    #[must_use]
    pub fn nonce(&self) -> &NonceGenerator {
        &self.nonce
    }

    /// Start a call of `method` on `path`.
    ///
    /// `path` is relative to the base URL, or an absolute URL that already starts with
    /// it (e.g. a pagination link), which is used as is.
    pub fn call<'a>(
        &'a self,
        method: &'a MethodDescriptor,
        path: impl Into<String>,
    ) -> CallBuilder<'a, C> {
        CallBuilder {
            client: self,
            method,
            path: path.into(),
            query: String::new(),
            payload: RequestPayload::Empty,
            cancel: None,
            error: None,
        }
    }

    async fn execute<T>(
        &self,
        request: Request<Full<Bytes>>,
        target: String,
        body_timeout: Duration,
        started: Instant,
    ) -> CallOutcome<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let response = match self
            .service
            .clone()
            .oneshot(request)
            .await
            .map_err(map_buffer_error)
        {
            Ok(response) => response,
            Err(err) => return CallOutcome::no_response(err, target, started.elapsed()),
        };

        // The attempt timeout ends with the head; the body gets its own deadline
        let (parts, body) = response.into_parts();
        let read = tokio::time::timeout(body_timeout, read_body_limited(body, self.max_body_size))
            .await
            .unwrap_or(Err(ApiError::Timeout(body_timeout)));
        match read {
            Ok(bytes) => CallOutcome::from_response(
                target,
                parts.status,
                &parts.headers,
                &bytes,
                started.elapsed(),
            ),
            Err(err) => CallOutcome::body_unreadable(
                err,
                target,
                parts.status,
                &parts.headers,
                started.elapsed(),
            ),
        }
    }

    /// Run the failure hook for unsuccessful outcomes, isolating the caller from it.
    async fn finish<T: Send>(&self, outcome: CallOutcome<T>) -> CallOutcome<T> {
        let api_id = self.capabilities.api_id();
        if let Some(report) = outcome.failure_report(api_id) {
            let notified = AssertUnwindSafe(self.capabilities.notify_failure(&report))
                .catch_unwind()
                .await;
            match notified {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(api_id, error = %err, "failure hook returned an error");
                }
                Err(_) => {
                    tracing::warn!(api_id, target = report.target, "failure hook panicked");
                }
            }
        } else {
            tracing::trace!(
                api_id,
                target = outcome.target(),
                elapsed_ms = outcome.elapsed().as_millis(),
                "call succeeded"
            );
        }
        outcome
    }
}

/// One pending call, built by [`ApiClient::call`].
///
/// Builder errors (e.g. an unencodable payload) are deferred to [`send`](Self::send),
/// which reports them as a failure without contacting the server.
#[must_use = "a call does nothing until `.send()` is awaited"]
pub struct CallBuilder<'a, C> {
    client: &'a ApiClient<C>,
    method: &'a MethodDescriptor,
    path: String,
    query: String,
    payload: RequestPayload,
    cancel: Option<CancellationToken>,
    error: Option<ApiError>,
}

impl<C: ApiCapabilities> CallBuilder<'_, C> {
    /// Append a pre-encoded query string (without the leading `?`)
    pub fn query(mut self, query: impl AsRef<str>) -> Self {
        self.append_query(query.as_ref().trim_start_matches('?'));
        self
    }

    /// Append form-encoded query parameters
    pub fn query_pairs<T: Serialize + ?Sized>(mut self, pairs: &T) -> Self {
        if self.error.is_none() {
            match serde_urlencoded::to_string(pairs) {
                Ok(encoded) => self.append_query(&encoded),
                Err(e) => self.error = Some(e.into()),
            }
        }
        self
    }

    /// Body encoded the way the method's content kind requires (form or JSON).
    ///
    /// Ignored for GET methods.
    pub fn payload<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        if self.error.is_none() {
            match RequestPayload::encode(self.method.content_kind(), value) {
                Ok(payload) => self.payload = payload,
                Err(e) => self.error = Some(e),
            }
        }
        self
    }

    /// Body sent verbatim. Ignored for GET methods.
    pub fn raw_body(mut self, body: impl Into<String>) -> Self {
        self.payload = RequestPayload::Raw(body.into());
        self
    }

    /// Abort the call when `token` is cancelled, at the gate or in flight.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn append_query(&mut self, part: &str) {
        if part.is_empty() {
            return;
        }
        if !self.query.is_empty() {
            self.query.push('&');
        }
        self.query.push_str(part);
    }

    /// Send the call and interpret the response as `T`.
    ///
    /// The method is signed (private) or prepared (public), passes the rate gate
    /// unless it is high priority, then goes through retries. Failures are handed to
    /// the capabilities' failure hook before being returned.
    pub async fn send<T>(self) -> CallOutcome<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let Self {
            client,
            method,
            path,
            query,
            payload,
            cancel,
            error,
        } = self;
        let capabilities = &client.capabilities;

        let target = if method.is_private() {
            capabilities.private_target(&path, &query)
        } else {
            capabilities.public_target(&path, &query)
        };
        if let Some(err) = error {
            return client.finish(CallOutcome::not_sent(err, target)).await;
        }

        let mut request = ApiRequest::new(
            method.verb().clone(),
            target,
            path,
            query,
            method.content_kind(),
            payload,
        );
        let ctx = SigningContext::new(&client.nonce, method);
        let prepared = if method.is_private() {
            capabilities.build_private_request(&mut request, &ctx).await
        } else {
            capabilities.build_public_request(&mut request, &ctx).await
        };
        let target = request.target().to_owned();
        if let Err(err) = prepared {
            if let ApiError::Usage(usage) = &err {
                tracing::error!(api_id = capabilities.api_id(), error = %usage, "call not sent");
            }
            return client.finish(CallOutcome::not_sent(err, target)).await;
        }

        let http_request = match request.into_http(client.transport_security, method.timeout()) {
            Ok(http_request) => http_request,
            Err(err) => return client.finish(CallOutcome::not_sent(err, target)).await,
        };

        let cancel = cancel.unwrap_or_default();
        if cancel.is_cancelled() {
            return client
                .finish(CallOutcome::not_sent(ApiError::Cancelled, target))
                .await;
        }
        if method.is_high_priority() {
            client.gate.notify_priority_call_made();
        } else if let Err(err) = client.gate.wait_to_proceed_or_cancel(&cancel).await {
            return client.finish(CallOutcome::not_sent(err, target)).await;
        }

        let started = Instant::now();
        let execute = client.execute::<T>(http_request, target.clone(), method.timeout(), started);
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                CallOutcome::no_response(ApiError::Cancelled, target, started.elapsed())
            }
            outcome = execute => outcome,
        };
        client.finish(outcome).await
    }
}

/// Map buffer errors to `ApiError`
///
/// The buffer hands back the inner service's error boxed, or its own error once the
/// worker is gone.
pub fn map_buffer_error(err: tower::BoxError) -> ApiError {
    match err.downcast::<ApiError>() {
        Ok(api_err) => *api_err,
        Err(err) => {
            tracing::error!(
                error = %err,
                "buffer worker closed unexpectedly; service unavailable"
            );
            ApiError::ServiceClosed
        }
    }
}
