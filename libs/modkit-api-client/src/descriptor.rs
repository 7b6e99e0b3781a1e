//! Immutable metadata describing one logical remote method.

use crate::config::DEFAULT_METHOD_TIMEOUT;
use http::Method;
use std::time::Duration;

/// Whether a method needs the private (signed) request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exposure {
    Public,
    Private,
}

/// Rate-gate treatment of a method.
///
/// `High` calls never wait at the gate but still count against its capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    #[default]
    Normal,
    High,
}

/// Media type a method sends and expects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum ContentKind {
    #[default]
    Json,
    Text,
    Xml,
    Html,
    Jpeg,
    FormUrlEncoded,
}

impl ContentKind {
    #[must_use]
    pub const fn mime(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Text => "text/plain",
            Self::Xml => "application/xml",
            Self::Html => "text/html",
            Self::Jpeg => "image/jpeg",
            Self::FormUrlEncoded => "application/x-www-form-urlencoded",
        }
    }

    /// Classify a `Content-Type` header value, ignoring parameters such as `charset`.
    #[must_use]
    pub fn from_content_type(value: &str) -> Option<Self> {
        let essence = value.split(';').next().unwrap_or_default().trim();
        [
            Self::Json,
            Self::Text,
            Self::Xml,
            Self::Html,
            Self::Jpeg,
            Self::FormUrlEncoded,
        ]
        .into_iter()
        .find(|kind| kind.mime().eq_ignore_ascii_case(essence))
    }
}

/// Describes one remote method: who may call it, how it is gated, and what it speaks.
///
/// Built once per logical method and shared read-only by every call:
///
/// ```ignore
/// static TICKER: LazyLock<MethodDescriptor> =
///     LazyLock::new(|| MethodDescriptor::public_get(Priority::Normal));
/// static CANCEL_ORDER: LazyLock<MethodDescriptor> = LazyLock::new(|| {
///     MethodDescriptor::private_delete(Priority::High).with_timeout(Duration::from_secs(5))
/// });
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    exposure: Exposure,
    priority: Priority,
    verb: Method,
    content_kind: ContentKind,
    timeout: Duration,
}

impl MethodDescriptor {
    /// JSON method with the default 59s per-attempt timeout.
    #[must_use]
    pub fn new(exposure: Exposure, verb: Method, priority: Priority) -> Self {
        Self {
            exposure,
            priority,
            verb,
            content_kind: ContentKind::Json,
            timeout: DEFAULT_METHOD_TIMEOUT,
        }
    }

    #[must_use]
    pub fn public_get(priority: Priority) -> Self {
        Self::new(Exposure::Public, Method::GET, priority)
    }

    #[must_use]
    pub fn public_post(priority: Priority) -> Self {
        Self::new(Exposure::Public, Method::POST, priority)
    }

    #[must_use]
    pub fn private_get(priority: Priority) -> Self {
        Self::new(Exposure::Private, Method::GET, priority)
    }

    #[must_use]
    pub fn private_post(priority: Priority) -> Self {
        Self::new(Exposure::Private, Method::POST, priority)
    }

    #[must_use]
    pub fn private_put(priority: Priority) -> Self {
        Self::new(Exposure::Private, Method::PUT, priority)
    }

    #[must_use]
    pub fn private_delete(priority: Priority) -> Self {
        Self::new(Exposure::Private, Method::DELETE, priority)
    }

    #[must_use]
    pub fn with_content_kind(mut self, content_kind: ContentKind) -> Self {
        self.content_kind = content_kind;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn exposure(&self) -> Exposure {
        self.exposure
    }

    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    #[must_use]
    pub fn verb(&self) -> &Method {
        &self.verb
    }

    #[must_use]
    pub fn content_kind(&self) -> ContentKind {
        self.content_kind
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn is_private(&self) -> bool {
        self.exposure == Exposure::Private
    }

    #[must_use]
    pub fn is_high_priority(&self) -> bool {
        self.priority == Priority::High
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_factories() {
        let get = MethodDescriptor::public_get(Priority::Normal);
        assert_eq!(get.exposure(), Exposure::Public);
        assert_eq!(get.verb(), &Method::GET);
        assert_eq!(get.content_kind(), ContentKind::Json);
        assert_eq!(get.timeout(), Duration::from_millis(59_000));
        assert!(!get.is_high_priority());

        let delete = MethodDescriptor::private_delete(Priority::High);
        assert!(delete.is_private());
        assert!(delete.is_high_priority());
        assert_eq!(delete.verb(), &Method::DELETE);
    }

    #[test]
    fn test_with_overrides() {
        let method = MethodDescriptor::private_post(Priority::Normal)
            .with_content_kind(ContentKind::FormUrlEncoded)
            .with_timeout(Duration::from_secs(5));
        assert_eq!(method.content_kind(), ContentKind::FormUrlEncoded);
        assert_eq!(method.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_content_kind_parsing() {
        assert_eq!(
            ContentKind::from_content_type("application/json; charset=utf-8"),
            Some(ContentKind::Json)
        );
        assert_eq!(
            ContentKind::from_content_type("Text/Plain"),
            Some(ContentKind::Text)
        );
        assert_eq!(
            ContentKind::from_content_type("image/jpeg"),
            Some(ContentKind::Jpeg)
        );
        assert_eq!(ContentKind::from_content_type("application/pdf"), None);
        assert_eq!(ContentKind::from_content_type(""), None);
    }
}
