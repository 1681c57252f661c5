use crate::error::OperationError;
use crate::handle::OperationHandle;
use crate::poller::{PollOptions, PollResult, poll_until};
use crate::status::{is_terminal, progress_of, state_of};
use pacx_http::HttpTransport;
use serde_json::{Map, Value};
use std::sync::Mutex;

/// Polls operation status URLs through an [`HttpTransport`]
#[derive(Debug, Clone)]
pub struct OperationMonitor {
    transport: HttpTransport,
}

impl OperationMonitor {
    #[must_use]
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }

    /// GET `url` once. An unparsable body reads as `{}` so polling carries on.
    ///
    /// # Errors
    /// Any transport error, including non-2xx statuses.
    pub async fn fetch_status(&self, url: &str) -> Result<Value, OperationError> {
        self.fetch_status_after(url, &Value::Object(Map::new())).await
    }

    /// Like [`fetch_status`](Self::fetch_status), but JSON that is not an
    /// object keeps `previous`.
    async fn fetch_status_after(
        &self,
        url: &str,
        previous: &Value,
    ) -> Result<Value, OperationError> {
        let response = self.transport.get(url).send().await?;
        let status = match response.json::<Value>() {
            Ok(value @ Value::Object(_)) => value,
            Ok(_) => previous.clone(),
            Err(_) => Value::Object(Map::new()),
        };

        tracing::debug!(
            url,
            state = state_of(&status).unwrap_or_default(),
            progress = progress_of(&status),
            "Fetched operation status"
        );
        Ok(status)
    }

    /// Poll `url` until the payload reports a terminal state, the timeout
    /// passes or the options' token is cancelled.
    ///
    /// # Errors
    /// The first failed status request.
    pub async fn track(
        &self,
        url: &str,
        options: &PollOptions,
        on_progress: Option<&mut (dyn FnMut(&Value) + Send)>,
    ) -> Result<PollResult<Value>, OperationError> {
        let last = Mutex::new(Value::Object(Map::new()));
        let last = &last;

        let fetch = move || async move {
            let previous = last
                .lock()
                .map_or_else(|_| Value::Object(Map::new()), |guard| guard.clone());
            let status = self.fetch_status_after(url, &previous).await?;
            if let Ok(mut guard) = last.lock() {
                guard.clone_from(&status);
            }
            Ok::<_, OperationError>(status)
        };
        let result = poll_until(fetch, is_terminal, options, on_progress).await?;

        tracing::info!(
            url,
            outcome = ?result.outcome,
            polls = result.polls,
            state = state_of(&result.status).unwrap_or_default(),
            "Operation tracking finished"
        );
        Ok(result)
    }

    /// [`track`](Self::track) the handle's location.
    ///
    /// # Errors
    /// Same as [`track`](Self::track).
    pub async fn wait(
        &self,
        handle: &OperationHandle,
        options: &PollOptions,
        on_progress: Option<&mut (dyn FnMut(&Value) + Send)>,
    ) -> Result<PollResult<Value>, OperationError> {
        self.track(&handle.location, options, on_progress).await
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::poller::PollOutcome;
    use crate::status::is_failure_marker;
    use httpmock::prelude::*;
    use pacx_http::{StaticToken, TransportConfig};
    use serde_json::json;
    use std::time::Duration;

    fn monitor_for(server: &MockServer) -> OperationMonitor {
        let transport = HttpTransport::builder(server.base_url())
            .with_config(TransportConfig::for_testing())
            .bearer_auth(StaticToken::new("t"))
            .build()
            .unwrap();
        OperationMonitor::new(transport)
    }

    fn fast() -> PollOptions {
        PollOptions::new(Duration::ZERO, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_stops_on_faulted_state() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/operations/1")
                .header("authorization", "Bearer t");
            then.status(200).json_body(json!({"status": "Faulted"}));
        });

        let result = monitor_for(&server)
            .track("operations/1", &fast(), None)
            .await
            .unwrap();

        assert_eq!(mock.calls(), 1);
        assert_eq!(result.outcome, PollOutcome::Completed);
        assert!(is_failure_marker(&result.status));
    }

    #[tokio::test]
    async fn test_stops_on_error_state() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/operations/2");
            then.status(200).json_body(json!({"state": "Error"}));
        });

        let result = monitor_for(&server)
            .track("operations/2", &fast(), None)
            .await
            .unwrap();

        assert_eq!(mock.calls(), 1);
        assert_eq!(result.status["state"], "Error");
    }

    #[tokio::test]
    async fn test_non_json_body_keeps_polling_until_timeout() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/operations/3");
            then.status(200).body("<html>busy</html>");
        });

        let options = PollOptions::new(Duration::from_millis(5), Duration::from_millis(40));
        let result = monitor_for(&server)
            .track("operations/3", &options, None)
            .await
            .unwrap();

        assert_eq!(result.outcome, PollOutcome::TimedOut);
        assert_eq!(result.status, json!({}));
        assert!(result.polls >= 2);
    }

    #[tokio::test]
    async fn test_non_object_json_keeps_previous_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/operations/5");
            then.status(200).json_body(json!([1, 2]));
        });
        server.mock(|when, then| {
            when.method(GET).path("/operations/6");
            then.status(200).body("not json");
        });
        let monitor = monitor_for(&server);
        let previous = json!({"status": "Running", "progress": 40});

        let kept = monitor
            .fetch_status_after("operations/5", &previous)
            .await
            .unwrap();
        let reset = monitor
            .fetch_status_after("operations/6", &previous)
            .await
            .unwrap();

        assert_eq!(kept, previous);
        assert_eq!(reset, json!({}));
    }

    #[tokio::test]
    async fn test_status_error_propagates() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/operations/4");
            then.status(404)
                .json_body(json!({"error": {"code": "NotFound", "message": "No such operation"}}));
        });

        let err = monitor_for(&server)
            .track("operations/4", &fast(), None)
            .await
            .unwrap_err();

        match err {
            OperationError::Http(http) => {
                assert_eq!(http.status(), Some(http::StatusCode::NOT_FOUND));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
