//! Tower layers composing the transport stack

mod bearer;
mod default_headers;
mod retry;

pub use bearer::{BearerAuthLayer, BearerAuthService};
pub use default_headers::{DefaultHeadersLayer, DefaultHeadersService};
pub(crate) use retry::calculate_backoff;
pub use retry::{RETRY_ATTEMPT_HEADER, RetryLayer, RetryService};
