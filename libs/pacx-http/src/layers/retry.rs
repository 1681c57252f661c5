use crate::config::{ExponentialBackoff, RetryPolicy, RetryTrigger};
use crate::error::HttpError;
use crate::response::{ResponseBody, parse_retry_after};
use bytes::Bytes;
use http::{HeaderValue, Request, Response};
use http_body_util::{BodyExt, Full};
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service, ServiceExt};

/// Header carrying the retry number (1-based) on retried requests.
pub const RETRY_ATTEMPT_HEADER: &str = "X-Retry-Attempt";

/// Tower layer that retries transient failures with exponential backoff
#[derive(Clone, Debug)]
pub struct RetryLayer {
    policy: RetryPolicy,
}

impl RetryLayer {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService {
            inner,
            policy: self.policy.clone(),
        }
    }
}

/// Service implementing the retry loop.
///
/// States per attempt: success, retryable (transport error, timeout, 429,
/// 503) or fatal (everything else). Once `max_retries` is spent:
/// - a transport error or timeout is returned as `Err`
/// - a 429/503 response is returned as `Ok(Response)`
///
/// A `Retry-After` header on a retryable response replaces the computed
/// delay for that attempt.
#[derive(Clone, Debug)]
pub struct RetryService<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> Service<Request<Full<Bytes>>> for RetryService<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResponseBody>, Error = HttpError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = S::Response;
    type Error = HttpError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        // Consume the instance that was poll_ready'd.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let policy = self.policy.clone();

        let (parts, body) = req.into_parts();
        let version = parts.version;
        let extensions = parts.extensions.clone();
        let parts = Arc::new(parts);

        Box::pin(async move {
            let method = parts.method.clone();
            let host = parts
                .uri
                .authority()
                .map_or_else(|| "unknown".to_owned(), ToString::to_string);

            let mut attempt = 0usize;
            loop {
                let mut req = Request::from_parts((*parts).clone(), body.clone());
                *req.version_mut() = version;
                *req.extensions_mut() = extensions.clone();

                if attempt > 0
                    && let Ok(value) = HeaderValue::try_from(attempt.to_string())
                {
                    req.headers_mut().insert(RETRY_ATTEMPT_HEADER, value);
                }

                let mut svc = inner.clone();
                svc.ready().await?;

                match svc.call(req).await {
                    Ok(resp) => {
                        let status = resp.status().as_u16();
                        let trigger = RetryTrigger::Status(status);
                        if !policy.should_retry(trigger, attempt) {
                            return Ok(resp);
                        }

                        let retry_after = if policy.ignore_retry_after {
                            None
                        } else {
                            parse_retry_after(resp.headers())
                        };
                        let delay =
                            retry_after.unwrap_or_else(|| calculate_backoff(&policy.backoff, attempt));

                        if let Err(e) = drain_response_body(resp, policy.drain_limit).await {
                            tracing::debug!(
                                error = %e,
                                "Failed to drain response body before retry"
                            );
                        }

                        tracing::debug!(
                            retry = attempt + 1,
                            max_retries = policy.max_retries,
                            status,
                            method = %method,
                            host = %host,
                            backoff_ms = delay.as_millis(),
                            retry_after_used = retry_after.is_some(),
                            "Retrying request after status code"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Err(err) => {
                        let trigger = retry_trigger(&err);
                        if !policy.should_retry(trigger, attempt) {
                            if attempt > 0 && trigger.is_transient() {
                                tracing::warn!(
                                    attempts = attempt + 1,
                                    error = %err,
                                    method = %method,
                                    host = %host,
                                    "Retries exhausted"
                                );
                            }
                            return Err(err);
                        }

                        let delay = calculate_backoff(&policy.backoff, attempt);
                        tracing::debug!(
                            retry = attempt + 1,
                            max_retries = policy.max_retries,
                            error = %err,
                            trigger = ?trigger,
                            method = %method,
                            host = %host,
                            backoff_ms = delay.as_millis(),
                            "Retrying request after error"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                }
            }
        })
    }
}

/// Read and discard up to `limit` bytes so the connection can go back to the pool.
async fn drain_response_body(response: Response<ResponseBody>, limit: usize) -> Result<(), HttpError> {
    let mut body = std::pin::pin!(response.into_body());
    let mut drained = 0usize;

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            drained += chunk.len();
            if drained >= limit {
                break;
            }
        }
    }

    Ok(())
}

fn retry_trigger(err: &HttpError) -> RetryTrigger {
    match err {
        HttpError::Transport(_) => RetryTrigger::TransportError,
        HttpError::Timeout(_) => RetryTrigger::Timeout,
        _ => RetryTrigger::NonRetryable,
    }
}

/// Delay before retry number `attempt + 1`: `initial * multiplier^attempt`,
/// capped at `max`.
///
/// NaN, infinite or negative inputs are sanitized instead of panicking.
pub(crate) fn calculate_backoff(backoff: &ExponentialBackoff, attempt: usize) -> Duration {
    // One day; anything longer is a configuration mistake.
    const CEILING_SECS: f64 = 86_400.0;

    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);

    let multiplier = if backoff.multiplier.is_finite() && backoff.multiplier >= 0.0 {
        backoff.multiplier
    } else {
        1.0
    };

    let initial = backoff.initial.as_secs_f64();
    let max = backoff.max.as_secs_f64().min(CEILING_SECS);

    let raw = initial * multiplier.powi(exponent);
    let secs = if raw.is_finite() { raw.clamp(0.0, max) } else { max };
    let delay = Duration::from_secs_f64(secs);

    if backoff.jitter {
        let factor = rand::rng().random_range(0.0..=0.25);
        (delay + delay.mul_f64(factor)).min(Duration::from_secs_f64(max))
    } else {
        delay
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::{Method, StatusCode};
    use std::sync::Mutex;
    use std::time::Instant;

    fn make_response_body(data: &[u8]) -> ResponseBody {
        Full::new(Bytes::from(data.to_vec()))
            .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })
            .boxed()
    }

    fn post_request() -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::POST)
            .uri("https://org.example.com/api/data/v9.2/accounts")
            .body(Full::new(Bytes::from_static(b"{\"name\":\"Contoso\"}")))
            .unwrap()
    }

    fn fast_policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: ExponentialBackoff::fast(),
            ..RetryPolicy::default()
        }
    }

    /// What the scripted service answers on a given call.
    #[derive(Clone, Copy)]
    enum Reply {
        Status(u16),
        StatusWithRetryAfter(u16, &'static str),
        TransportError,
    }

    /// Answers from a script; repeats the last entry once the script runs out.
    #[derive(Clone)]
    struct ScriptedService {
        script: Arc<Vec<Reply>>,
        calls: Arc<Mutex<usize>>,
        attempt_headers: Arc<Mutex<Vec<Option<String>>>>,
    }

    impl ScriptedService {
        fn new(script: Vec<Reply>) -> Self {
            Self {
                script: Arc::new(script),
                calls: Arc::new(Mutex::new(0)),
                attempt_headers: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl Service<Request<Full<Bytes>>> for ScriptedService {
        type Response = Response<ResponseBody>;
        type Error = HttpError;
        type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
            let index = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls - 1
            };
            self.attempt_headers.lock().unwrap().push(
                req.headers()
                    .get(RETRY_ATTEMPT_HEADER)
                    .map(|v| v.to_str().unwrap().to_owned()),
            );
            let reply = self.script[index.min(self.script.len() - 1)];

            Box::pin(async move {
                match reply {
                    Reply::Status(code) => Ok(Response::builder()
                        .status(code)
                        .body(make_response_body(b"{}"))
                        .unwrap()),
                    Reply::StatusWithRetryAfter(code, after) => Ok(Response::builder()
                        .status(code)
                        .header(http::header::RETRY_AFTER, after)
                        .body(make_response_body(b""))
                        .unwrap()),
                    Reply::TransportError => Err(HttpError::Transport("connection reset".into())),
                }
            })
        }
    }

    #[tokio::test]
    async fn test_success_is_not_retried() {
        let svc = ScriptedService::new(vec![Reply::Status(200)]);
        let retry = RetryLayer::new(fast_policy(2)).layer(svc.clone());

        let resp = retry.oneshot(post_request()).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(svc.calls(), 1);
    }

    #[tokio::test]
    async fn test_429_twice_then_200_succeeds_on_third_attempt() {
        let svc = ScriptedService::new(vec![
            Reply::Status(429),
            Reply::Status(429),
            Reply::Status(200),
        ]);
        let retry = RetryLayer::new(fast_policy(2)).layer(svc.clone());

        let resp = retry.oneshot(post_request()).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(svc.calls(), 3);
        let headers = svc.attempt_headers.lock().unwrap().clone();
        assert_eq!(
            headers,
            vec![None, Some("1".to_owned()), Some("2".to_owned())]
        );
    }

    #[tokio::test]
    async fn test_exhausted_503_returns_last_response() {
        let svc = ScriptedService::new(vec![Reply::Status(503)]);
        let retry = RetryLayer::new(fast_policy(2)).layer(svc.clone());

        let resp = retry.oneshot(post_request()).await.unwrap();

        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(svc.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_transport_error_is_reraised() {
        let svc = ScriptedService::new(vec![Reply::TransportError]);
        let retry = RetryLayer::new(fast_policy(2)).layer(svc.clone());

        let err = retry.oneshot(post_request()).await.unwrap_err();

        assert!(matches!(err, HttpError::Transport(_)));
        assert_eq!(svc.calls(), 3);
    }

    #[tokio::test]
    async fn test_transport_error_then_success() {
        let svc = ScriptedService::new(vec![Reply::TransportError, Reply::Status(201)]);
        let retry = RetryLayer::new(fast_policy(2)).layer(svc.clone());

        let resp = retry.oneshot(post_request()).await.unwrap();

        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(svc.calls(), 2);
    }

    #[tokio::test]
    async fn test_non_transient_status_not_retried() {
        for code in [400, 404, 409, 500, 502] {
            let svc = ScriptedService::new(vec![Reply::Status(code), Reply::Status(200)]);
            let retry = RetryLayer::new(fast_policy(2)).layer(svc.clone());

            let resp = retry.oneshot(post_request()).await.unwrap();

            assert_eq!(resp.status().as_u16(), code);
            assert_eq!(svc.calls(), 1, "status {code} must not be retried");
        }
    }

    #[tokio::test]
    async fn test_zero_retries_returns_first_429() {
        let svc = ScriptedService::new(vec![Reply::Status(429), Reply::Status(200)]);
        let retry = RetryLayer::new(RetryPolicy::disabled()).layer(svc.clone());

        let resp = retry.oneshot(post_request()).await.unwrap();

        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(svc.calls(), 1);
    }

    #[tokio::test]
    async fn test_retry_after_overrides_backoff() {
        let svc = ScriptedService::new(vec![
            Reply::StatusWithRetryAfter(429, "1"),
            Reply::Status(200),
        ]);
        // Computed backoff would be one hour.
        let policy = RetryPolicy {
            max_retries: 1,
            backoff: ExponentialBackoff {
                initial: Duration::from_secs(3600),
                max: Duration::from_secs(3600),
                multiplier: 1.0,
                jitter: false,
            },
            ..RetryPolicy::default()
        };
        let retry = RetryLayer::new(policy).layer(svc.clone());

        let started = Instant::now();
        let resp = retry.oneshot(post_request()).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(resp.status(), StatusCode::OK);
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_ignore_retry_after_uses_backoff() {
        let svc = ScriptedService::new(vec![
            Reply::StatusWithRetryAfter(503, "3600"),
            Reply::Status(200),
        ]);
        let policy = RetryPolicy {
            ignore_retry_after: true,
            ..fast_policy(1)
        };
        let retry = RetryLayer::new(policy).layer(svc.clone());

        let started = Instant::now();
        let resp = retry.oneshot(post_request()).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let backoff = ExponentialBackoff {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: false,
        };

        assert_eq!(calculate_backoff(&backoff, 0), Duration::from_millis(100));
        assert_eq!(calculate_backoff(&backoff, 1), Duration::from_millis(200));
        assert_eq!(calculate_backoff(&backoff, 2), Duration::from_millis(400));
        assert_eq!(calculate_backoff(&backoff, 3), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_is_capped() {
        let backoff = ExponentialBackoff {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(5),
            multiplier: 10.0,
            jitter: false,
        };

        assert_eq!(calculate_backoff(&backoff, 4), Duration::from_secs(5));
        assert_eq!(calculate_backoff(&backoff, usize::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_sanitizes_bad_multiplier() {
        let backoff = ExponentialBackoff {
            initial: Duration::from_millis(50),
            max: Duration::from_secs(1),
            multiplier: f64::NAN,
            jitter: false,
        };

        assert_eq!(calculate_backoff(&backoff, 3), Duration::from_millis(50));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let backoff = ExponentialBackoff {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        };

        for _ in 0..50 {
            let delay = calculate_backoff(&backoff, 1);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(250));
        }
    }
}
