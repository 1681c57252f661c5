use pacx_http::HttpError;
use thiserror::Error;

/// Errors from building, sending or parsing a `$batch`
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BatchError {
    /// Method outside GET/POST/PATCH/DELETE
    #[error("Unsupported batch method '{0}'")]
    UnsupportedMethod(String),

    /// Operation body could not be serialized
    #[error("Failed to serialize operation body: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Alternate key map is empty or has an unusable entry
    #[error("Invalid alternate key: {0}")]
    InvalidAlternateKey(String),

    /// Response `Content-Type` has no usable `boundary` parameter
    #[error("Missing multipart boundary in content type '{0}'")]
    MissingBoundary(String),

    /// Embedded response does not start with `HTTP/<ver> <code> ...`
    #[error("Invalid status line '{0}'")]
    InvalidStatusLine(String),

    /// Part is structurally broken (no header/body separator, bad encoding)
    #[error("Malformed batch part {index}: {reason}")]
    MalformedPart { index: usize, reason: String },

    /// Embedded header could not be represented as an HTTP header
    #[error("Invalid header '{0}' in batch part")]
    InvalidHeader(String),

    /// The `$batch` request itself failed
    #[error(transparent)]
    Http(#[from] HttpError),
}

impl BatchError {
    /// True for failures detected while building the request body.
    #[must_use]
    pub fn is_encoding(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedMethod(_) | Self::Serialize(_) | Self::InvalidAlternateKey(_)
        )
    }

    /// True for failures detected while reading the response body.
    #[must_use]
    pub fn is_parse(&self) -> bool {
        matches!(
            self,
            Self::MissingBoundary(_)
                | Self::InvalidStatusLine(_)
                | Self::MalformedPart { .. }
                | Self::InvalidHeader(_)
        )
    }
}
