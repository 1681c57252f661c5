use std::time::Duration;

/// Default User-Agent string for outbound requests
pub const DEFAULT_USER_AGENT: &str = concat!("pacx/", env!("CARGO_PKG_VERSION"));

/// Default cap on buffered response bodies (50 MiB)
pub const DEFAULT_MAX_BODY_SIZE: usize = 50 * 1024 * 1024;

/// Failure classes considered by the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RetryTrigger {
    /// Connection-level failure (refused, reset, DNS)
    TransportError,
    /// A single attempt exceeded the request timeout
    Timeout,
    /// HTTP response status code
    Status(u16),
    /// Anything else (bad URL, auth accessor failure, ...)
    NonRetryable,
}

impl RetryTrigger {
    /// HTTP 429 Too Many Requests
    pub const TOO_MANY_REQUESTS: Self = Self::Status(429);
    /// HTTP 503 Service Unavailable
    pub const SERVICE_UNAVAILABLE: Self = Self::Status(503);

    /// Whether this failure class is retried by the transport.
    ///
    /// Transport errors, timeouts, 429 and 503 are transient; every other
    /// status reaches the caller on the first attempt.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::TransportError | Self::Timeout | Self::Status(429 | 503)
        )
    }
}

/// Exponential backoff configuration
///
/// Computes delay as `min(initial * multiplier^attempt, max)`, with an optional
/// 0-25% jitter on top.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay before the first retry (default: 500ms)
    pub initial: Duration,

    /// Upper bound for any single delay (default: 60s)
    pub max: Duration,

    /// Growth factor per attempt (default: 2.0)
    pub multiplier: f64,

    /// Add random 0-25% jitter (default: false)
    pub jitter: bool,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl ExponentialBackoff {
    /// Backoff with the given base delay and multiplier and the default cap.
    #[must_use]
    pub fn new(initial: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            multiplier,
            ..Default::default()
        }
    }

    /// Millisecond-scale backoff for tests (1ms initial, 100ms max)
    #[must_use]
    pub fn fast() -> Self {
        Self {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// Enable jitter.
    #[must_use]
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Delay before retry number `attempt + 1` (zero-based `attempt`).
    #[must_use]
    pub fn delay_for(&self, attempt: usize) -> Duration {
        crate::layers::calculate_backoff(self, attempt)
    }
}

/// Retry policy, fixed for the lifetime of a transport
///
/// Total attempts = 1 + `max_retries`. Retries apply to every HTTP method:
/// the server reports 429/503 before doing any work.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (default: 2)
    pub max_retries: usize,

    /// Delay schedule between attempts
    pub backoff: ExponentialBackoff,

    /// Ignore `Retry-After` and always use the computed backoff.
    pub ignore_retry_after: bool,

    /// Bytes to drain from a retried response before dropping it (default: 64 KiB)
    pub drain_limit: usize,
}

/// Default drain limit for response bodies before retry (64 KiB)
pub const DEFAULT_RETRY_DRAIN_LIMIT: usize = 64 * 1024;

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: ExponentialBackoff::default(),
            ignore_retry_after: false,
            drain_limit: DEFAULT_RETRY_DRAIN_LIMIT,
        }
    }
}

impl RetryPolicy {
    /// Policy from the three classic knobs: retry count, base delay, multiplier.
    #[must_use]
    pub fn new(max_retries: usize, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_retries,
            backoff: ExponentialBackoff::new(base_delay, multiplier),
            ..Default::default()
        }
    }

    /// Policy that never retries
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Whether `attempt` (0-based, already performed) may be followed by
    /// another one for the given trigger.
    #[must_use]
    pub fn should_retry(&self, trigger: RetryTrigger, attempt: usize) -> bool {
        attempt < self.max_retries && trigger.is_transient()
    }
}

/// Transport security mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportSecurity {
    /// Only `https://` URLs are accepted (default)
    #[default]
    TlsOnly,
    /// Plain `http://` is accepted as well. Local mock servers only.
    AllowInsecureHttp,
}

/// Headers every request to an OData v4 service carries unless overridden.
#[must_use]
pub fn odata_default_headers() -> Vec<(String, String)> {
    vec![
        ("OData-Version".to_owned(), "4.0".to_owned()),
        ("OData-MaxVersion".to_owned(), "4.0".to_owned()),
        ("Accept".to_owned(), "application/json".to_owned()),
    ]
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Timeout for each individual attempt (default: 60s)
    pub request_timeout: Duration,

    /// Maximum buffered response body size in bytes
    pub max_body_size: usize,

    /// User-Agent header value
    pub user_agent: String,

    /// Retry policy. `None` disables the retry layer entirely.
    pub retry: Option<RetryPolicy>,

    /// Accepted URL schemes
    pub transport: TransportSecurity,

    /// Headers added to every request when the caller did not set them
    pub default_headers: Vec<(String, String)>,

    /// Idle pooled connections are closed after this long (default: 90s)
    pub pool_idle_timeout: Option<Duration>,

    /// Idle connections kept per host (default: 16)
    pub pool_max_idle_per_host: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            retry: Some(RetryPolicy::default()),
            transport: TransportSecurity::TlsOnly,
            default_headers: odata_default_headers(),
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 16,
        }
    }
}

impl TransportConfig {
    /// Configuration for tests against local mock servers: plain HTTP,
    /// fast backoff, short timeout.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            retry: Some(RetryPolicy {
                backoff: ExponentialBackoff::fast(),
                ..RetryPolicy::default()
            }),
            transport: TransportSecurity::AllowInsecureHttp,
            ..Default::default()
        }
    }
}
