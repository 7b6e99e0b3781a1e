//! Uniform result of one remote call.
//!
//! A call never returns `Err` to its caller: every path, including "nothing was
//! sent" and "no response", ends up as a [`CallOutcome`] with the raw response
//! text and timing attached.

use crate::descriptor::ContentKind;
use crate::error::ApiError;
use crate::response::{ERROR_BODY_PREVIEW_LIMIT, body_preview, parse_retry_after};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use std::any::{Any, TypeId};
use std::time::Duration;

/// Raw text of a failure where the request never reached the network
pub const RAW_NOT_SENT: &str = "no call made";
/// Raw text of a failure where no response arrived
pub const RAW_NO_RESPONSE: &str = "no response";
/// Raw text of a failure where the body could not be read after the head arrived
pub const RAW_BODY_UNREADABLE: &str = "error reading response body";

/// Call metadata recorded on every outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallMeta {
    /// Absolute target URL
    pub target: String,
    pub status: Option<StatusCode>,
    /// Raw `Content-Type` header value
    pub content_type: Option<String>,
    pub content_kind: Option<ContentKind>,
    /// Time from the start of the send (after the gate) to the outcome
    pub elapsed: Duration,
}

impl CallMeta {
    fn new(target: String, elapsed: Duration) -> Self {
        Self {
            target,
            status: None,
            content_type: None,
            content_kind: None,
            elapsed,
        }
    }
}

/// Result of one call
#[must_use]
#[derive(Debug)]
pub enum CallOutcome<T> {
    /// JSON response decoded into `T`
    Success {
        value: T,
        raw_text: String,
        meta: CallMeta,
    },
    /// `text/plain` response
    TextSuccess { text: String, meta: CallMeta },
    /// Anything else; `raw_text` is the body when one was read
    Failure {
        error: ApiError,
        raw_text: String,
        meta: CallMeta,
    },
}

impl<T> CallOutcome<T>
where
    T: DeserializeOwned + 'static,
{
    /// Interpret a fully read response.
    ///
    /// `raw_text` is the body decoded lossily; JSON values are decoded from the bytes,
    /// so a body that is not valid UTF-8 is a decode failure.
    pub fn from_response(
        target: String,
        status: StatusCode,
        headers: &HeaderMap,
        body: &Bytes,
        elapsed: Duration,
    ) -> Self {
        let raw_text = String::from_utf8_lossy(body).into_owned();
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let content_kind = content_type
            .as_deref()
            .and_then(ContentKind::from_content_type);
        let meta = CallMeta {
            target,
            status: Some(status),
            content_type,
            content_kind,
            elapsed,
        };

        if !status.is_success() {
            let error = ApiError::HttpStatus {
                status,
                body_preview: body_preview(&raw_text, ERROR_BODY_PREVIEW_LIMIT),
                retry_after: parse_retry_after(headers),
            };
            return Self::Failure {
                error,
                raw_text,
                meta,
            };
        }

        match content_kind {
            Some(ContentKind::Json) => Self::decode_json(body, raw_text, meta),
            Some(ContentKind::Text) => Self::TextSuccess {
                text: raw_text,
                meta,
            },
            _ => Self::Failure {
                error: ApiError::UnsupportedContentType {
                    target: meta.target.clone(),
                    content_type: meta.content_type.clone(),
                },
                raw_text,
                meta,
            },
        }
    }

    fn decode_json(body: &[u8], raw_text: String, meta: CallMeta) -> Self {
        // A String target gets the raw JSON document, when it is valid UTF-8
        if TypeId::of::<T>() == TypeId::of::<String>() && std::str::from_utf8(body).is_ok() {
            let boxed: Box<dyn Any> = Box::new(raw_text.clone());
            if let Ok(value) = boxed.downcast::<T>() {
                return Self::Success {
                    value: *value,
                    raw_text,
                    meta,
                };
            }
        }

        match serde_json::from_slice::<T>(body) {
            Ok(value) => Self::Success {
                value,
                raw_text,
                meta,
            },
            Err(e) => Self::Failure {
                error: ApiError::Decode(e),
                raw_text,
                meta,
            },
        }
    }
}

impl<T> CallOutcome<T> {
    /// Failure of a call that was never sent (usage or encoding error, cancelled at the gate)
    pub fn not_sent(error: ApiError, target: String) -> Self {
        Self::Failure {
            error,
            raw_text: RAW_NOT_SENT.to_owned(),
            meta: CallMeta::new(target, Duration::ZERO),
        }
    }

    /// Failure of a call that got no response
    pub fn no_response(error: ApiError, target: String, elapsed: Duration) -> Self {
        Self::Failure {
            error,
            raw_text: RAW_NO_RESPONSE.to_owned(),
            meta: CallMeta::new(target, elapsed),
        }
    }

    /// Failure of a call whose head arrived but whose body could not be read
    pub fn body_unreadable(
        error: ApiError,
        target: String,
        status: StatusCode,
        headers: &HeaderMap,
        elapsed: Duration,
    ) -> Self {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let content_kind = content_type
            .as_deref()
            .and_then(ContentKind::from_content_type);
        Self::Failure {
            error,
            raw_text: RAW_BODY_UNREADABLE.to_owned(),
            meta: CallMeta {
                target,
                status: Some(status),
                content_type,
                content_kind,
                elapsed,
            },
        }
    }

    #[must_use]
    pub fn was_successful(&self) -> bool {
        !matches!(self, Self::Failure { .. })
    }

    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Success { value, .. } => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Success { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Body of a `text/plain` success
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::TextSuccess { text, .. } => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&ApiError> {
        match self {
            Self::Failure { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Response text, or the marker text of a failure without one
    #[must_use]
    pub fn raw_text(&self) -> &str {
        match self {
            Self::Success { raw_text, .. } | Self::Failure { raw_text, .. } => raw_text,
            Self::TextSuccess { text, .. } => text,
        }
    }

    #[must_use]
    pub fn meta(&self) -> &CallMeta {
        match self {
            Self::Success { meta, .. }
            | Self::TextSuccess { meta, .. }
            | Self::Failure { meta, .. } => meta,
        }
    }

    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.meta().status
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.meta().elapsed
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.meta().target
    }

    #[must_use]
    pub fn content_kind(&self) -> Option<ContentKind> {
        self.meta().content_kind
    }

    /// Convert into a `Result`, dropping metadata.
    ///
    /// # Errors
    /// Returns the failure's error, or `ApiError::UnsupportedContentType` for a
    /// text success, which has no `T`.
    pub fn into_result(self) -> Result<T, ApiError> {
        match self {
            Self::Success { value, .. } => Ok(value),
            Self::TextSuccess { meta, .. } => Err(ApiError::UnsupportedContentType {
                target: meta.target,
                content_type: meta.content_type,
            }),
            Self::Failure { error, .. } => Err(error),
        }
    }

    /// Report handed to the failure hook; `None` for successful outcomes.
    #[must_use]
    pub fn failure_report<'a>(&'a self, api_id: &'a str) -> Option<FailureReport<'a>> {
        match self {
            Self::Failure {
                error,
                raw_text,
                meta,
            } => Some(FailureReport {
                api_id,
                target: &meta.target,
                status: meta.status,
                error,
                raw_text,
                elapsed: meta.elapsed,
            }),
            _ => None,
        }
    }
}

/// Borrowed view of a failed call, passed to `ApiCapabilities::notify_failure`.
#[derive(Debug, Clone, Copy)]
pub struct FailureReport<'a> {
    pub api_id: &'a str,
    pub target: &'a str,
    pub status: Option<StatusCode>,
    pub error: &'a ApiError,
    pub raw_text: &'a str,
    pub elapsed: Duration,
}
