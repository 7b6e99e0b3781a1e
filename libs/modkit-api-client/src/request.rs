use crate::config::TransportSecurity;
use crate::descriptor::ContentKind;
use crate::error::{ApiError, InvalidUriKind};
use crate::layers::AttemptTimeout;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Request};
use http_body_util::Full;
use serde::Serialize;
use std::time::Duration;

/// Absolute target for `path` under `base_url`, with `query` appended when non-blank.
///
/// A `path` that already starts with `base_url` is used as is, so pagination links
/// returned by the remote API can be followed directly.
#[must_use]
pub fn compose_target(base_url: &str, path: &str, query: &str) -> String {
    let url = if path.starts_with(base_url) {
        path.to_owned()
    } else {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };

    let query = query.trim();
    if query.is_empty() {
        url
    } else {
        format!("{url}?{}", query.trim_start_matches('?'))
    }
}

/// Encoded request body
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RequestPayload {
    #[default]
    Empty,
    /// Raw text sent verbatim
    Raw(String),
    /// Serialized payload, encoded according to the method's content kind
    Encoded(Bytes),
}

impl RequestPayload {
    /// Encode `value` the way a method of `content_kind` sends it: form-urlencoded for
    /// form methods, JSON for everything else.
    ///
    /// # Errors
    /// Returns `ApiError::FormEncode` or `ApiError::EncodeJson` if `value` cannot be
    /// represented in that encoding.
    pub fn encode<T: Serialize + ?Sized>(
        content_kind: ContentKind,
        value: &T,
    ) -> Result<Self, ApiError> {
        let bytes = match content_kind {
            ContentKind::FormUrlEncoded => Bytes::from(serde_urlencoded::to_string(value)?),
            _ => Bytes::from(serde_json::to_vec(value).map_err(ApiError::EncodeJson)?),
        };
        Ok(Self::Encoded(bytes))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Raw(text) => text.is_empty(),
            Self::Encoded(bytes) => bytes.is_empty(),
        }
    }

    fn into_bytes(self) -> Bytes {
        match self {
            Self::Empty => Bytes::new(),
            Self::Raw(text) => Bytes::from(text),
            Self::Encoded(bytes) => bytes,
        }
    }
}

/// Outbound request as seen by the public/private request hooks.
///
/// Hooks may add headers, rewrite the target (e.g. append a signature parameter)
/// or replace the body before the request is handed to the transport.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    target: String,
    path: String,
    query: String,
    content_kind: ContentKind,
    headers: HeaderMap,
    body: RequestPayload,
}

impl ApiRequest {
    /// GET requests never carry a body, whatever `body` holds.
    #[must_use]
    pub fn new(
        method: Method,
        target: String,
        path: String,
        query: String,
        content_kind: ContentKind,
        body: RequestPayload,
    ) -> Self {
        let body = if method == Method::GET {
            RequestPayload::Empty
        } else {
            body
        };
        Self {
            method,
            target,
            path,
            query,
            content_kind,
            headers: HeaderMap::new(),
            body,
        }
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Absolute target URL
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn set_target(&mut self, target: impl Into<String>) {
        self.target = target.into();
    }

    /// Path as passed by the caller, before composition with the base URL
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query string as passed by the caller, without the leading `?`
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    #[must_use]
    pub fn content_kind(&self) -> ContentKind {
        self.content_kind
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Insert (or replace) a header
    ///
    /// # Errors
    /// Returns `ApiError::InvalidHeaderName` / `ApiError::InvalidHeaderValue` for
    /// values that cannot appear in an HTTP header.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), ApiError> {
        let name = HeaderName::try_from(name)?;
        let value = HeaderValue::try_from(value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Set `Authorization: <scheme> <credentials>`
    ///
    /// # Errors
    /// Returns `ApiError::InvalidHeaderValue` if the credentials contain characters
    /// not allowed in a header.
    pub fn set_authorization(&mut self, scheme: &str, credentials: &str) -> Result<(), ApiError> {
        let mut value = HeaderValue::try_from(format!("{scheme} {credentials}"))?;
        value.set_sensitive(true);
        self.headers.insert(http::header::AUTHORIZATION, value);
        Ok(())
    }

    #[must_use]
    pub fn body(&self) -> &RequestPayload {
        &self.body
    }

    /// Replace the body; ignored for GET requests.
    pub fn set_body(&mut self, body: RequestPayload) {
        if self.method != Method::GET {
            self.body = body;
        }
    }

    /// Validate the target and build the transport request.
    ///
    /// `Content-Type` is the method's content kind unless a hook set one, and is
    /// omitted for requests without a body. The per-attempt `timeout` travels as a
    /// request extension.
    pub(crate) fn into_http(
        self,
        transport_security: TransportSecurity,
        timeout: Duration,
    ) -> Result<Request<Full<Bytes>>, ApiError> {
        let uri = validate_url(&self.target, transport_security)?;

        let mut headers = self.headers;
        if !self.body.is_empty() && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static(self.content_kind.mime()),
            );
        }

        let mut request = Request::builder()
            .method(self.method)
            .uri(uri)
            .body(Full::new(self.body.into_bytes()))?;
        *request.headers_mut() = headers;
        request.extensions_mut().insert(AttemptTimeout(timeout));
        Ok(request)
    }
}

fn validate_url(url: &str, transport_security: TransportSecurity) -> Result<http::Uri, ApiError> {
    let uri: http::Uri = url
        .parse()
        .map_err(|e: http::uri::InvalidUri| ApiError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::ParseError,
            reason: e.to_string(),
        })?;

    if uri.authority().is_none() {
        return Err(ApiError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::MissingAuthority,
            reason: "missing host/authority".to_owned(),
        });
    }

    match uri.scheme_str() {
        Some("https") => Ok(uri),
        Some("http") => match transport_security {
            TransportSecurity::AllowInsecureHttp => Ok(uri),
            TransportSecurity::TlsOnly => Err(ApiError::InvalidScheme {
                scheme: "http".to_owned(),
                reason: "HTTPS required (transport security is TlsOnly)".to_owned(),
            }),
        },
        Some(scheme) => Err(ApiError::InvalidScheme {
            scheme: scheme.to_owned(),
            reason: "only http:// and https:// schemes are supported".to_owned(),
        }),
        None => Err(ApiError::InvalidUri {
            url: url.to_owned(),
            kind: InvalidUriKind::MissingScheme,
            reason: "missing scheme".to_owned(),
        }),
    }
}
