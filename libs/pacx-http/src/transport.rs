use crate::builder::HttpTransportBuilder;
use crate::config::{RetryTrigger, TransportSecurity};
use crate::error::{HttpError, InvalidUriKind};
use crate::request::RequestBuilder;
use crate::response::{HttpResponse, ResponseBody};
use bytes::Bytes;
use http::{HeaderMap, Method, Request, Response};
use http_body_util::Full;
use tower::ServiceExt;
use tower::util::BoxCloneSyncService;
use url::Url;

/// Fully composed tower stack behind a transport.
pub(crate) type TransportService =
    BoxCloneSyncService<Request<Full<Bytes>>, Response<ResponseBody>, HttpError>;

/// Authenticated, retrying HTTP transport bound to one service root
///
/// Built with [`HttpTransport::builder`]. Cheap to clone; clones share the
/// connection pool.
///
/// # Outcome mapping
///
/// - 2xx: `Ok(HttpResponse)`
/// - 429/503 after retries are exhausted: `Ok(HttpResponse)` with that status
/// - any other status: `Err(HttpError::Status { .. })`
/// - transport failure after retries are exhausted: `Err(HttpError::Transport)`
///   or `Err(HttpError::Timeout)`
#[derive(Clone)]
pub struct HttpTransport {
    pub(crate) service: TransportService,
    pub(crate) base_url: Url,
    pub(crate) max_body_size: usize,
    pub(crate) transport_security: TransportSecurity,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url.as_str())
            .field("max_body_size", &self.max_body_size)
            .field("transport_security", &self.transport_security)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Start building a transport for the given service root,
    /// e.g. `https://org.crm.dynamics.com/api/data/v9.2`.
    #[must_use]
    pub fn builder(base_url: impl Into<String>) -> HttpTransportBuilder {
        HttpTransportBuilder::new(base_url)
    }

    /// Service root that relative URLs resolve against (always ends in `/`).
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a request URL.
    ///
    /// Absolute `http(s)://` URLs are used verbatim. Anything else is appended
    /// to the service root; a leading `/` does not escape the root path.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidUri` if the result is not a valid URL.
    pub fn resolve_url(&self, url: &str) -> Result<Url, HttpError> {
        if is_absolute(url) {
            return Url::parse(url).map_err(|e| HttpError::InvalidUri {
                url: url.to_owned(),
                kind: InvalidUriKind::ParseError,
                reason: e.to_string(),
            });
        }

        self.base_url
            .join(url.trim_start_matches('/'))
            .map_err(|e| HttpError::InvalidUri {
                url: url.to_owned(),
                kind: InvalidUriKind::JoinError,
                reason: e.to_string(),
            })
    }

    /// Start a request with the fluent builder.
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        RequestBuilder::new(self.clone(), method, url.to_owned())
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    pub fn patch(&self, url: &str) -> RequestBuilder {
        self.request(Method::PATCH, url)
    }

    pub fn put(&self, url: &str) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    pub fn delete(&self, url: &str) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }

    /// Send one request through the authenticated retrying stack.
    ///
    /// `headers` take precedence over configured default headers.
    ///
    /// # Errors
    /// See the type-level outcome mapping.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<HttpResponse, HttpError> {
        let resolved = self.resolve_url(url)?;
        let uri = self.validate_url(&resolved)?;

        let mut request = Request::builder().method(method).uri(uri).body(Full::new(body))?;
        *request.headers_mut() = headers;

        let response = self.service.clone().oneshot(request).await?;
        let response = HttpResponse::read(response, self.max_body_size).await?;

        let status = response.status();
        if status.is_success() || RetryTrigger::Status(status.as_u16()).is_transient() {
            Ok(response)
        } else {
            Err(response.into_status_error())
        }
    }

    fn validate_url(&self, url: &Url) -> Result<http::Uri, HttpError> {
        match (url.scheme(), self.transport_security) {
            ("https", _) | ("http", TransportSecurity::AllowInsecureHttp) => {}
            ("http", TransportSecurity::TlsOnly) => {
                return Err(HttpError::InvalidScheme {
                    scheme: "http".to_owned(),
                    reason: "plain HTTP requires TransportSecurity::AllowInsecureHttp".to_owned(),
                });
            }
            (other, _) => {
                return Err(HttpError::InvalidScheme {
                    scheme: other.to_owned(),
                    reason: "only http and https are supported".to_owned(),
                });
            }
        }

        let uri: http::Uri = url
            .as_str()
            .parse()
            .map_err(|e: http::uri::InvalidUri| HttpError::InvalidUri {
                url: url.to_string(),
                kind: InvalidUriKind::ParseError,
                reason: e.to_string(),
            })?;

        if uri.authority().is_none() {
            return Err(HttpError::InvalidUri {
                url: url.to_string(),
                kind: InvalidUriKind::MissingAuthority,
                reason: "URL must have a host".to_owned(),
            });
        }
        Ok(uri)
    }
}

fn is_absolute(url: &str) -> bool {
    let lower = url.get(..8).unwrap_or(url).to_ascii_lowercase();
    lower.starts_with("https://") || lower.starts_with("http://")
}
