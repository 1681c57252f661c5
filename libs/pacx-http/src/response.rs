use crate::error::HttpError;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Response, StatusCode};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::time::{Duration, SystemTime};

/// Maximum body preview kept in [`HttpError::Status`] (8 KiB).
const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Parse the `Retry-After` header.
///
/// Accepts delta-seconds (`"120"`) or an HTTP-date. Returns `None` when the
/// header is missing, unparsable, negative or a date in the past.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = httpdate::parse_http_date(value).ok()?;
    at.duration_since(SystemTime::now()).ok()
}

/// Boxed body type flowing through the tower stack.
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// Fully buffered HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: StatusCode,
    reason: String,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpResponse {
    /// Build a response from parts. Used by tests and by callers adapting
    /// other sources.
    #[must_use]
    pub fn from_parts(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            reason: status.canonical_reason().unwrap_or_default().to_owned(),
            headers,
            body,
        }
    }

    /// Read the streamed body into memory, enforcing `limit`.
    pub(crate) async fn read(response: Response<ResponseBody>, limit: usize) -> Result<Self, HttpError> {
        let (parts, body) = response.into_parts();

        let reason = parts
            .extensions
            .get::<hyper::ext::ReasonPhrase>()
            .map(|r| String::from_utf8_lossy(r.as_bytes()).into_owned())
            .or_else(|| parts.status.canonical_reason().map(ToOwned::to_owned))
            .unwrap_or_default();

        let mut body = std::pin::pin!(body);
        let mut buf = BytesMut::new();
        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(HttpError::Transport)?;
            if let Ok(chunk) = frame.into_data() {
                if buf.len() + chunk.len() > limit {
                    return Err(HttpError::BodyTooLarge {
                        limit,
                        actual: buf.len() + chunk.len(),
                    });
                }
                buf.extend_from_slice(&chunk);
            }
        }

        Ok(Self {
            status: parts.status,
            reason,
            headers: parts.headers,
            body: buf.freeze(),
        })
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Reason phrase from the status line
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header, if it is valid visible ASCII.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    #[must_use]
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Body decoded as UTF-8, lossily.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Deserialize the body as JSON.
    ///
    /// # Errors
    /// Returns `HttpError::Json` if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Convert this response into a structured [`HttpError::Status`].
    #[must_use]
    pub fn into_status_error(self) -> HttpError {
        let body = serde_json::from_slice::<serde_json::Value>(&self.body).ok();
        let preview_len = self.body.len().min(ERROR_BODY_PREVIEW_LIMIT);
        let body_preview = String::from_utf8_lossy(&self.body[..preview_len]).into_owned();

        HttpError::Status {
            status: self.status,
            retry_after: parse_retry_after(&self.headers),
            reason: self.reason,
            body,
            body_preview,
        }
    }
}
