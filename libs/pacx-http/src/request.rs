use crate::error::HttpError;
use crate::response::HttpResponse;
use crate::transport::HttpTransport;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Fluent request builder
///
/// Created by [`HttpTransport::get`], [`HttpTransport::post`], etc. Header
/// errors are deferred until [`send`](RequestBuilder::send).
///
/// ```ignore
/// let resp = transport
///     .patch("accounts(00000000-0000-0000-0000-000000000001)")
///     .header("If-Match", "*")
///     .json(&json!({"name": "Contoso"}))?
///     .send()
///     .await?;
/// ```
#[must_use = "RequestBuilder does nothing until .send() is called"]
pub struct RequestBuilder {
    transport: HttpTransport,
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Bytes,
    error: Option<HttpError>,
}

impl RequestBuilder {
    pub(crate) fn new(transport: HttpTransport, method: Method, url: String) -> Self {
        Self {
            transport,
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            error: None,
        }
    }

    /// Set a header, replacing any previous value with the same name.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }

        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            (Err(e), _) => self.error = Some(HttpError::InvalidHeaderName(e)),
            (_, Err(e)) => self.error = Some(HttpError::InvalidHeaderValue(e)),
        }
        self
    }

    /// Merge a prepared header map; its entries replace same-named ones.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        let mut last = None;
        for (name, value) in headers {
            let name = match name {
                Some(name) => {
                    last = Some(name.clone());
                    self.headers.remove(&name);
                    name
                }
                None => match last.clone() {
                    Some(name) => name,
                    None => continue,
                },
            };
            self.headers.append(name, value);
        }
        self
    }

    /// Serialize `body` as JSON. Sets `Content-Type` unless already present.
    ///
    /// # Errors
    /// Returns the deferred header error, or `HttpError::Json` if
    /// serialization fails.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        self.body = Bytes::from(serde_json::to_vec(body)?);
        if !self.headers.contains_key(CONTENT_TYPE) {
            self.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        }
        Ok(self)
    }

    /// Raw request body. The caller sets `Content-Type`.
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Send the request.
    ///
    /// # Errors
    /// Returns the deferred header error or any error from
    /// [`HttpTransport::send`].
    pub async fn send(self) -> Result<HttpResponse, HttpError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        self.transport
            .send(self.method, &self.url, self.headers, self.body)
            .await
    }
}
