use std::time::Duration;
use thiserror::Error;

/// Boxed source error carried by transport-level variants
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Classification of URL validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    MissingAuthority,
    /// URL is missing required scheme (http/https)
    MissingScheme,
}

/// Integration defects: the concrete API client asked for something it never provided.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum UsageError {
    /// A private method was called but the client has no signing hook
    #[error("API '{api_id}' has no private request signing; private methods are unavailable")]
    SigningNotConfigured { api_id: String },
}

/// Coarse error taxonomy used by callers to decide what to do with a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller or integration defect; never retried
    Usage,
    /// No response was obtained (network, TLS, timeout, cancellation)
    Transport,
    /// The server answered with a non-success status
    Protocol,
    /// The response could not be interpreted
    Decode,
}

/// API client error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ApiError {
    /// Integration defect detected before anything was sent
    #[error(transparent)]
    Usage(#[from] UsageError),

    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Invalid URL (failed to parse)
    ///
    /// Match on `kind`; `reason` is a diagnostic message with no stable format.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        url: String,
        kind: InvalidUriKind,
        reason: String,
    },

    /// Invalid URL scheme for transport security configuration
    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme { scheme: String, reason: String },

    /// Request payload could not be serialized as JSON
    #[error("JSON encoding failed: {0}")]
    EncodeJson(#[source] serde_json::Error),

    /// Request payload or query could not be form-encoded
    #[error("Form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    /// The private request signing hook failed
    #[error("Request signing failed: {0}")]
    Signing(#[source] BoxError),

    /// Single request attempt timed out
    #[error("Request attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the call
    #[error("Call cancelled")]
    Cancelled,

    /// Transport error (network, connection, etc)
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[source] BoxError),

    /// Internal service failure (buffer worker died, channel closed)
    #[error("Service unavailable: internal failure")]
    ServiceClosed,

    /// Response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// Non-success status
    #[error("StatusCode = {status} {body_preview}")]
    HttpStatus {
        status: http::StatusCode,
        body_preview: String,
        /// Parsed `Retry-After` header value, if present and valid
        retry_after: Option<Duration>,
    },

    /// Successful JSON response that does not fit the target type
    #[error("Failed to decode response body: {0}")]
    Decode(#[source] serde_json::Error),

    /// Successful response whose content type cannot be interpreted
    #[error("Unsupported content type '{}' from {target}", content_type.as_deref().unwrap_or("<none>"))]
    UnsupportedContentType {
        target: String,
        content_type: Option<String>,
    },
}

impl ApiError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Usage(_)
            | Self::RequestBuild(_)
            | Self::InvalidHeaderName(_)
            | Self::InvalidHeaderValue(_)
            | Self::InvalidUri { .. }
            | Self::InvalidScheme { .. }
            | Self::EncodeJson(_)
            | Self::FormEncode(_)
            | Self::Signing(_) => ErrorKind::Usage,
            Self::Timeout(_)
            | Self::Cancelled
            | Self::Transport(_)
            | Self::Tls(_)
            | Self::ServiceClosed
            | Self::BodyTooLarge { .. } => ErrorKind::Transport,
            Self::HttpStatus { .. } => ErrorKind::Protocol,
            Self::Decode(_) | Self::UnsupportedContentType { .. } => ErrorKind::Decode,
        }
    }

    #[must_use]
    pub fn is_usage(&self) -> bool {
        self.kind() == ErrorKind::Usage
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Status of the response this error was derived from, if any
    #[must_use]
    pub fn status(&self) -> Option<http::StatusCode> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<hyper::Error> for ApiError {
    fn from(err: hyper::Error) -> Self {
        ApiError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for ApiError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        ApiError::Transport(Box::new(err))
    }
}
