//! Tower middleware of the transport stack.

mod default_headers;
mod retry;
mod timeout;

pub use default_headers::{DefaultHeadersLayer, DefaultHeadersService};
pub use retry::{
    RetryInner, RetryLayer, RetryMatch, RetryPolicyComposer, RetryRule, RetryService,
    calculate_backoff,
};
pub use timeout::{AttemptTimeout, AttemptTimeoutLayer, AttemptTimeoutService};
