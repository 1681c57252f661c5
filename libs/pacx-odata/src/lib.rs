#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! OData `$batch` support.
//!
//! - [`encode`] turns an ordered list of [`LogicalOperation`]s into one
//!   `multipart/mixed` body. Reads travel as plain batch parts; all writes
//!   share a single changeset so the service applies them atomically.
//! - [`decode`] splits a batch response back into per-part
//!   [`OperationResult`]s, descending into changeset responses.
//! - [`BatchClient`] sends a batch over a [`pacx_http::HttpTransport`],
//!   correlates results to operations and re-sends throttled parts.
//! - [`alternate_key`] renders and parses `name='value'` key segments.
//!
//! ```ignore
//! use pacx_odata::{BatchClient, LogicalOperation};
//! use serde_json::json;
//!
//! let ops = vec![
//!     LogicalOperation::get("accounts?$top=1"),
//!     LogicalOperation::post("contacts", json!({"lastname": "Ng"})),
//! ];
//! let outcome = BatchClient::new(transport).execute(&ops).await?;
//! for item in outcome.failed() {
//!     eprintln!("operation {} failed", item.operation_index);
//! }
//! ```

pub mod alternate_key;
mod boundary;
mod client;
mod decode;
mod encode;
mod error;
mod operation;

pub use alternate_key::{
    alternate_key_path, build_alternate_key_segment, escape_key_value,
    parse_alternate_key_segment,
};
pub use boundary::Boundary;
pub use client::{BatchClient, BatchItem, BatchOutcome, BatchRetryPolicy, DEFAULT_BATCH_PATH};
pub use decode::{OperationResult, decode};
pub use encode::{BatchRequest, encode};
pub use error::BatchError;
pub use operation::{BatchMethod, LogicalOperation};
