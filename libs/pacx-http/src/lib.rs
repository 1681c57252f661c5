#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Resilient HTTP transport for OData services.
//!
//! The transport is a hyper client wrapped in a tower stack:
//! - Bearer authentication from a caller-supplied [`TokenAccessor`],
//!   re-evaluated on every attempt
//! - Default headers merged under caller headers (caller wins)
//! - Retries on transport errors, timeouts, HTTP 429 and HTTP 503 with
//!   exponential backoff that honors `Retry-After`
//! - Structured [`HttpError::Status`] for every other non-2xx response
//! - Relative URLs resolved against a service root
//!
//! # Example
//!
//! ```ignore
//! use pacx_http::{HttpTransport, StaticToken};
//!
//! let transport = HttpTransport::builder("https://org.crm.dynamics.com/api/data/v9.2")
//!     .bearer_auth(StaticToken::new(token))
//!     .build()?;
//!
//! let who: serde_json::Value = transport.get("WhoAmI").send().await?.json()?;
//! ```

mod auth;
mod builder;
mod config;
mod error;
mod layers;
mod request;
mod response;
mod transport;

pub use auth::{StaticToken, TokenAccessor, TokenError};
pub use builder::HttpTransportBuilder;
pub use config::{
    DEFAULT_MAX_BODY_SIZE, DEFAULT_USER_AGENT, ExponentialBackoff, RetryPolicy, RetryTrigger,
    TransportConfig, TransportSecurity, odata_default_headers,
};
pub use error::{HttpError, InvalidUriKind};
pub use layers::{
    BearerAuthLayer, BearerAuthService, DefaultHeadersLayer, DefaultHeadersService,
    RETRY_ATTEMPT_HEADER, RetryLayer, RetryService,
};
pub use request::RequestBuilder;
pub use response::{HttpResponse, ResponseBody, parse_retry_after};
pub use transport::HttpTransport;
