use crate::status::is_terminal;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Interval, overall timeout and optional cancellation for one poll cycle
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Sleep between fetches; zero is allowed
    pub interval: Duration,
    /// Give up (returning the last status) once this much time has passed
    pub timeout: Duration,
    /// Checked before and after every sleep
    pub cancel: Option<CancellationToken>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(600),
            cancel: None,
        }
    }
}

impl PollOptions {
    #[must_use]
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            cancel: None,
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

/// Why polling stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Completed,
    TimedOut,
    Cancelled,
}

/// Last fetched status and how polling ended
#[derive(Debug, Clone)]
pub struct PollResult<S> {
    pub status: S,
    pub outcome: PollOutcome,
    /// Number of fetches performed
    pub polls: u32,
}

impl<S> PollResult<S> {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.outcome == PollOutcome::Completed
    }

    pub fn into_status(self) -> S {
        self.status
    }
}

/// Fetch `get_status` until `is_done` accepts it.
///
/// Every fetch is passed to `on_progress`, changed or not. The first fetch
/// always happens, so a result always carries a real status. Timeout and
/// cancellation are not errors: the last status is returned with
/// [`PollOutcome::TimedOut`] or [`PollOutcome::Cancelled`].
///
/// # Errors
/// The first error returned by `get_status`.
pub async fn poll_until<S, E, F, Fut, D>(
    mut get_status: F,
    mut is_done: D,
    options: &PollOptions,
    mut on_progress: Option<&mut (dyn FnMut(&S) + Send)>,
) -> Result<PollResult<S>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<S, E>>,
    D: FnMut(&S) -> bool,
{
    let started = Instant::now();
    let mut polls: u32 = 0;

    loop {
        let status = get_status().await?;
        polls = polls.saturating_add(1);

        if let Some(callback) = on_progress.as_mut() {
            callback(&status);
        }

        if is_done(&status) {
            return Ok(PollResult {
                status,
                outcome: PollOutcome::Completed,
                polls,
            });
        }

        let elapsed = started.elapsed();
        tracing::debug!(
            polls,
            elapsed_ms = elapsed.as_millis(),
            "Operation not finished yet"
        );

        if elapsed >= options.timeout {
            tracing::debug!(polls, timeout = ?options.timeout, "Polling timed out");
            return Ok(PollResult {
                status,
                outcome: PollOutcome::TimedOut,
                polls,
            });
        }
        if options.is_cancelled() {
            return Ok(PollResult {
                status,
                outcome: PollOutcome::Cancelled,
                polls,
            });
        }

        match &options.cancel {
            Some(token) => {
                tokio::select! {
                    () = tokio::time::sleep(options.interval) => {}
                    () = token.cancelled() => {}
                }
            }
            None => tokio::time::sleep(options.interval).await,
        }

        if options.is_cancelled() {
            return Ok(PollResult {
                status,
                outcome: PollOutcome::Cancelled,
                polls,
            });
        }
    }
}

/// [`poll_until`] over JSON payloads, stopping on any recognized terminal
/// state (see [`is_terminal`]).
///
/// # Errors
/// The first error returned by `get_status`.
pub async fn poll_json_until_terminal<E, F, Fut>(
    get_status: F,
    options: &PollOptions,
    on_progress: Option<&mut (dyn FnMut(&Value) + Send)>,
) -> Result<PollResult<Value>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Value, E>>,
{
    poll_until(get_status, is_terminal, options, on_progress).await
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::convert::Infallible;
    use std::sync::{Arc, Mutex};

    /// Hands out scripted statuses; the last one repeats.
    fn scripted(
        statuses: Vec<Value>,
    ) -> impl FnMut() -> std::future::Ready<Result<Value, Infallible>> {
        let mut queue: VecDeque<Value> = statuses.into();
        move || {
            let next = if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().cloned().unwrap()
            };
            std::future::ready(Ok(next))
        }
    }

    fn fast() -> PollOptions {
        PollOptions::new(Duration::ZERO, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_progress_reported_for_every_fetch() {
        let mut seen = Vec::new();
        let record: &mut (dyn FnMut(&Value) + Send) =
            &mut |s: &Value| seen.push(s["progress"].as_i64().unwrap());

        let result = poll_until(
            scripted(vec![
                json!({"done": false, "progress": 10}),
                json!({"done": true, "progress": 90}),
            ]),
            |s: &Value| s["done"].as_bool().unwrap_or(false),
            &fast(),
            Some(record),
        )
        .await
        .unwrap();

        assert_eq!(seen, vec![10, 90]);
        assert_eq!(result.outcome, PollOutcome::Completed);
        assert_eq!(result.status["progress"], 90);
        assert_eq!(result.polls, 2);
    }

    #[tokio::test]
    async fn test_unchanged_status_still_reported() {
        let mut count = 0;
        let record: &mut (dyn FnMut(&Value) + Send) = &mut |_: &Value| count += 1;

        poll_until(
            scripted(vec![
                json!({"state": "Running"}),
                json!({"state": "Running"}),
                json!({"state": "Succeeded"}),
            ]),
            is_terminal,
            &fast(),
            Some(record),
        )
        .await
        .unwrap();

        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_timeout_returns_last_status() {
        let mut n = 0;
        let get = move || {
            n += 1;
            std::future::ready(Ok::<_, Infallible>(json!({"done": false, "n": n})))
        };
        let options = PollOptions::new(Duration::from_millis(5), Duration::from_millis(30));

        let result = poll_until(get, |_: &Value| false, &options, None)
            .await
            .unwrap();

        assert_eq!(result.outcome, PollOutcome::TimedOut);
        assert!(!result.is_completed());
        assert_eq!(result.status["n"], u64::from(result.polls));
        assert!(result.polls >= 2);
    }

    #[tokio::test]
    async fn test_zero_timeout_fetches_once() {
        let options = PollOptions::new(Duration::from_secs(60), Duration::ZERO);
        let result = poll_until(
            scripted(vec![json!({"status": "Running"})]),
            is_terminal,
            &options,
            None,
        )
        .await
        .unwrap();

        assert_eq!(result.outcome, PollOutcome::TimedOut);
        assert_eq!(result.polls, 1);
    }

    #[tokio::test]
    async fn test_fetch_error_propagates() {
        let mut calls = 0;
        let get = move || {
            calls += 1;
            std::future::ready(if calls < 2 {
                Ok(json!({"status": "Running"}))
            } else {
                Err("status endpoint gone")
            })
        };

        let err = poll_until(get, is_terminal, &fast(), None).await.unwrap_err();
        assert_eq!(err, "status endpoint gone");
    }

    #[tokio::test]
    async fn test_cancel_during_sleep() {
        let token = CancellationToken::new();
        let options = PollOptions::new(Duration::from_secs(30), Duration::from_secs(300))
            .with_cancel(token.clone());

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel();
            })
        };

        let result = poll_until(
            scripted(vec![json!({"status": "Running", "progress": 5})]),
            is_terminal,
            &options,
            None,
        )
        .await
        .unwrap();
        canceller.await.unwrap();

        assert_eq!(result.outcome, PollOutcome::Cancelled);
        assert_eq!(result.polls, 1);
        assert_eq!(result.status["progress"], 5);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_still_fetches_once() {
        let token = CancellationToken::new();
        token.cancel();
        let options = fast().with_cancel(token);

        let result = poll_until(
            scripted(vec![json!({"status": "Running"})]),
            is_terminal,
            &options,
            None,
        )
        .await
        .unwrap();

        assert_eq!(result.outcome, PollOutcome::Cancelled);
        assert_eq!(result.polls, 1);
    }

    #[tokio::test]
    async fn test_json_convenience_stops_on_failure_marker() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let record: &mut (dyn FnMut(&Value) + Send) =
            &mut move |s: &Value| sink.lock().unwrap().push(s.clone());

        let result = poll_json_until_terminal(
            scripted(vec![json!({"status": "Running"}), json!({"status": "Faulted"})]),
            &fast(),
            Some(record),
        )
        .await
        .unwrap();

        assert!(result.is_completed());
        assert!(crate::status::is_failure_marker(&result.status));
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
