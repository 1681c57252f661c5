use crate::auth::TokenAccessor;
use crate::config::{RetryPolicy, TransportConfig, TransportSecurity};
use crate::error::{HttpError, InvalidUriKind};
use crate::layers::{BearerAuthLayer, DefaultHeadersLayer, RetryLayer};
use crate::response::ResponseBody;
use crate::transport::{HttpTransport, TransportService};
use bytes::Bytes;
use http::Response;
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::sync::Arc;
use std::time::Duration;
use tower::timeout::TimeoutLayer;
use tower::util::BoxCloneSyncService;
use tower::{ServiceBuilder, ServiceExt};
use url::Url;

/// Builder for [`HttpTransport`]
pub struct HttpTransportBuilder {
    base_url: String,
    config: TransportConfig,
    token: Option<Arc<dyn TokenAccessor>>,
}

impl HttpTransportBuilder {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            config: TransportConfig::default(),
            token: None,
        }
    }

    /// Replace the whole configuration
    #[must_use]
    pub fn with_config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Per-attempt timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set the retry policy; `None` disables retries.
    #[must_use]
    pub fn retry(mut self, retry: Option<RetryPolicy>) -> Self {
        self.config.retry = retry;
        self
    }

    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Add (or replace) a default header.
    #[must_use]
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.config
            .default_headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.config.default_headers.push((name, value.into()));
        self
    }

    /// Use `accessor` for `Authorization: Bearer` on every attempt.
    #[must_use]
    pub fn bearer_auth(mut self, accessor: impl TokenAccessor + 'static) -> Self {
        self.token = Some(Arc::new(accessor));
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.config.transport = transport;
        self
    }

    /// Accept plain `http://` URLs (local mock servers only).
    ///
    /// Available in debug builds or with the `allow-insecure-http` feature.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    /// Build the transport.
    ///
    /// Stack, outer to inner:
    /// `Retry → BearerAuth → ErrorMapping → Timeout → DefaultHeaders → hyper`.
    /// Auth sits inside the retry loop so every attempt asks for a token.
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid, a default header is
    /// malformed, or TLS initialization fails.
    pub fn build(self) -> Result<HttpTransport, HttpError> {
        if self.config.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                base_url = %self.base_url,
                "insecure HTTP enabled; use only against local mock servers"
            );
        }

        let base_url = parse_base_url(&self.base_url)?;
        let timeout = self.config.request_timeout;

        let https = build_https_connector(self.config.transport)?;

        let mut client_builder = Client::builder(TokioExecutor::new());
        client_builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(self.config.pool_max_idle_per_host);
        if let Some(idle) = self.config.pool_idle_timeout {
            client_builder.pool_idle_timeout(idle);
        }
        let hyper_client = client_builder.build::<_, Full<Bytes>>(https);

        let defaults = DefaultHeadersLayer::try_new(
            self.config
                .default_headers
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .chain([("User-Agent", self.config.user_agent.as_str())]),
        )?;

        let service = ServiceBuilder::new()
            .layer(TimeoutLayer::new(timeout))
            .layer(defaults)
            .service(hyper_client)
            .map_response(box_response)
            .map_err(move |e: tower::BoxError| map_tower_error(e, timeout));

        let mut service: TransportService = BoxCloneSyncService::new(service);

        if let Some(token) = self.token {
            service = BoxCloneSyncService::new(
                ServiceBuilder::new()
                    .layer(BearerAuthLayer::new(token))
                    .service(service),
            );
        }

        if let Some(policy) = self.config.retry {
            service = BoxCloneSyncService::new(
                ServiceBuilder::new()
                    .layer(RetryLayer::new(policy))
                    .service(service),
            );
        }

        Ok(HttpTransport {
            service,
            base_url,
            max_body_size: self.config.max_body_size,
            transport_security: self.config.transport,
        })
    }
}

/// Parse the service root and make sure it ends with `/` so that
/// `Url::join` appends instead of replacing the last segment.
fn parse_base_url(raw: &str) -> Result<Url, HttpError> {
    let mut url = Url::parse(raw).map_err(|e| HttpError::InvalidUri {
        url: raw.to_owned(),
        kind: InvalidUriKind::ParseError,
        reason: e.to_string(),
    })?;

    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(HttpError::InvalidUri {
            url: raw.to_owned(),
            kind: InvalidUriKind::MissingAuthority,
            reason: "service root must be an absolute URL with a host".to_owned(),
        });
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn map_tower_error(err: tower::BoxError, timeout: Duration) -> HttpError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return HttpError::Timeout(timeout);
    }

    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(other) => HttpError::Transport(other),
    }
}

fn box_response<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: hyper::body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, body.map_err(Into::into).boxed())
}

fn crypto_provider() -> Arc<rustls::crypto::CryptoProvider> {
    rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// HTTPS connector with webpki roots; ALPN advertises h2 and http/1.1.
fn build_https_connector(
    transport: TransportSecurity,
) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let builder = hyper_rustls::HttpsConnectorBuilder::new()
        .with_provider_and_webpki_roots(crypto_provider())
        .map_err(|e| HttpError::Tls(Box::new(e)))?;

    let connector = match transport {
        TransportSecurity::AllowInsecureHttp => {
            builder.https_or_http().enable_all_versions().build()
        }
        TransportSecurity::TlsOnly => builder.https_only().enable_all_versions().build(),
    };
    Ok(connector)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::DEFAULT_USER_AGENT;

    #[test]
    fn test_builder_defaults() {
        let builder = HttpTransportBuilder::new("https://org.example.com/api/data/v9.2");
        assert_eq!(builder.config.request_timeout, Duration::from_secs(60));
        assert_eq!(builder.config.user_agent, DEFAULT_USER_AGENT);
        assert!(builder.config.retry.is_some());
        assert!(builder.token.is_none());
    }

    #[test]
    fn test_default_header_replaces_same_name() {
        let builder = HttpTransportBuilder::new("https://org.example.com/")
            .default_header("accept", "application/xml")
            .default_header("Prefer", "return=representation");

        let accepts: Vec<_> = builder
            .config
            .default_headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("accept"))
            .collect();
        assert_eq!(accepts.len(), 1);
        assert_eq!(accepts[0].1, "application/xml");
        assert!(
            builder
                .config
                .default_headers
                .iter()
                .any(|(k, v)| k == "Prefer" && v == "return=representation")
        );
    }

    #[test]
    fn test_allow_insecure_http() {
        let builder = HttpTransportBuilder::new("http://localhost:8080/").allow_insecure_http();
        assert_eq!(builder.config.transport, TransportSecurity::AllowInsecureHttp);
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let url = parse_base_url("https://org.example.com/api/data/v9.2").unwrap();
        assert_eq!(url.as_str(), "https://org.example.com/api/data/v9.2/");

        let url = parse_base_url("https://org.example.com").unwrap();
        assert_eq!(url.as_str(), "https://org.example.com/");
    }

    #[test]
    fn test_invalid_base_url() {
        let err = parse_base_url("not a url").unwrap_err();
        assert!(matches!(
            err,
            HttpError::InvalidUri {
                kind: InvalidUriKind::ParseError,
                ..
            }
        ));

        let err = parse_base_url("mailto:ops@example.com").unwrap_err();
        assert!(matches!(
            err,
            HttpError::InvalidUri {
                kind: InvalidUriKind::MissingAuthority,
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_default_header_fails_build() {
        let result = HttpTransportBuilder::new("https://org.example.com/")
            .default_header("bad header", "x")
            .build();
        assert!(matches!(result, Err(HttpError::InvalidHeaderName(_))));
    }

    #[test]
    fn test_map_tower_error_timeout() {
        let err = map_tower_error(
            Box::new(tower::timeout::error::Elapsed::new()),
            Duration::from_secs(3),
        );
        assert!(matches!(err, HttpError::Timeout(d) if d == Duration::from_secs(3)));
    }

    #[test]
    fn test_map_tower_error_preserves_http_error() {
        let err = map_tower_error(
            Box::new(HttpError::BodyTooLarge { limit: 1, actual: 2 }),
            Duration::from_secs(1),
        );
        assert!(matches!(err, HttpError::BodyTooLarge { limit: 1, actual: 2 }));
    }
}
