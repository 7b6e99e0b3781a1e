use crate::error::ApiError;
use bytes::Bytes;
use http::{HeaderMap, Response};
use http_body_util::BodyExt;
use std::time::{Duration, SystemTime};

/// Maximum body preview size carried in `ApiError::HttpStatus` (8KB).
///
/// The full body is still available as the outcome's raw text.
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Bytes drained from a response before it is discarded for a retry.
pub const RETRY_DRAIN_LIMIT: usize = 64 * 1024;

/// Type-erased response body (raw or decompressed).
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// Parse `Retry-After` header value into a `Duration`.
///
/// Supports delay-seconds ("120") and HTTP-date ("Wed, 21 Oct 2015 07:28:00 GMT").
/// Returns `None` if the header is missing, unparsable, or already in the past.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?;
    let trimmed = value.trim();

    if let Ok(seconds) = trimmed.parse::<i64>() {
        return u64::try_from(seconds).ok().map(Duration::from_secs);
    }

    let parsed = httpdate::parse_http_date(trimmed).ok()?;
    parsed.duration_since(SystemTime::now()).ok()
}

/// Read the whole body, failing once more than `limit` bytes arrive.
///
/// # Errors
/// `ApiError::BodyTooLarge` past the limit, `ApiError::Transport` if a frame fails.
pub async fn read_body_limited(body: ResponseBody, limit: usize) -> Result<Bytes, ApiError> {
    let mut collected = Vec::new();
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(ApiError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(ApiError::BodyTooLarge {
                    limit,
                    actual: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}

/// Drain up to `limit` bytes so the connection can go back to the pool.
///
/// For HTTP/1.1 a connection is only reusable once its previous response body has
/// been consumed. Bodies larger than `limit` are abandoned and the connection closes.
///
/// # Errors
/// `ApiError::Transport` if a frame fails.
pub async fn drain_response_body(
    response: Response<ResponseBody>,
    limit: usize,
) -> Result<(), ApiError> {
    let (_parts, body) = response.into_parts();
    let mut body = std::pin::pin!(body);
    let mut drained = 0usize;

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(ApiError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            drained += chunk.len();
            if drained >= limit {
                break;
            }
        }
    }

    Ok(())
}

/// Leading part of `text`, cut on a char boundary at most `limit` bytes in.
#[must_use]
pub fn body_preview(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_owned();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
