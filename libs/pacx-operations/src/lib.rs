#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Long-running operation support.
//!
//! A service that answers `202 Accepted` with a status URL is turned into a
//! single awaited call: [`OperationHandle::from_accepted`] captures the URL,
//! [`OperationMonitor`] polls it through the transport, and [`poll_until`]
//! is the generic loop underneath with progress callbacks, a timeout and
//! cooperative cancellation.

mod error;
mod handle;
mod monitor;
mod poller;
pub mod status;

pub use error::OperationError;
pub use handle::OperationHandle;
pub use monitor::OperationMonitor;
pub use poller::{PollOptions, PollOutcome, PollResult, poll_json_until_terminal, poll_until};
pub use status::{is_failure_marker, is_import_finished, is_terminal, progress_of, state_of};
