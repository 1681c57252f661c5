use pacx_http::HttpError;
use thiserror::Error;

/// Errors from starting or tracking a long-running operation
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum OperationError {
    /// Accepted response carried neither `Operation-Location` nor `Location`
    #[error("Response {status} has no Operation-Location or Location header")]
    MissingLocation { status: u16 },

    /// Status request failed
    #[error(transparent)]
    Http(#[from] HttpError),
}
