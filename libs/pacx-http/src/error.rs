use std::time::Duration;
use thiserror::Error;

/// Classification of URL validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    MissingAuthority,
    /// Relative URL could not be joined onto the service root
    JoinError,
}

/// Transport error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Single request attempt timed out
    #[error("Request attempt timed out after {0:?}")]
    Timeout(Duration),

    /// Transport error (network, connection, etc)
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The token accessor failed to produce a bearer token
    #[error("Failed to obtain bearer token: {0}")]
    Auth(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// Non-2xx response that is not retried
    #[error("HTTP {} {reason}: {body_preview}", .status.as_u16())]
    Status {
        status: http::StatusCode,
        /// Reason phrase as sent by the server
        reason: String,
        /// Body parsed as JSON, when it was JSON
        body: Option<serde_json::Value>,
        /// Leading part of the body as text
        body_preview: String,
        /// Parsed `Retry-After` header value, if present and valid
        retry_after: Option<Duration>,
    },

    /// JSON parsing error
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid URL
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        url: String,
        kind: InvalidUriKind,
        /// Diagnostic message, for logging only
        reason: String,
    },

    /// URL scheme not permitted by the transport security mode
    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme { scheme: String, reason: String },
}

impl HttpError {
    /// Status code of a [`HttpError::Status`] error.
    #[must_use]
    pub fn status(&self) -> Option<http::StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// OData error message (`error.message`) from a structured error body.
    #[must_use]
    pub fn service_message(&self) -> Option<&str> {
        match self {
            Self::Status { body: Some(body), .. } => body
                .pointer("/error/message")
                .and_then(serde_json::Value::as_str),
            _ => None,
        }
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;
    use std::error::Error;
    use std::fmt;

    #[derive(Debug)]
    struct TestError(&'static str);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Error for TestError {}

    #[test]
    fn test_transport_error_preserves_source() {
        let err = HttpError::Transport(Box::new(TestError("connection reset")));

        let source = err.source().expect("Transport error should have a source");
        let downcast = source.downcast_ref::<TestError>().unwrap();
        assert_eq!(downcast.0, "connection reset");
    }

    #[test]
    fn test_auth_error_preserves_source() {
        let err = HttpError::Auth(Box::new(TestError("token expired")));
        assert!(err.to_string().contains("token expired"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_status_error_accessors() {
        let err = HttpError::Status {
            status: http::StatusCode::NOT_FOUND,
            reason: "Not Found".to_owned(),
            body: Some(json!({"error": {"code": "0x80040217", "message": "account does not exist"}})),
            body_preview: String::new(),
            retry_after: None,
        };

        assert_eq!(err.status(), Some(http::StatusCode::NOT_FOUND));
        assert_eq!(err.service_message(), Some("account does not exist"));
        assert_eq!(err.to_string(), "HTTP 404 Not Found: ");
    }

    #[test]
    fn test_non_status_error_has_no_status() {
        let err = HttpError::Timeout(Duration::from_secs(1));
        assert_eq!(err.status(), None);
        assert_eq!(err.service_message(), None);
    }
}
