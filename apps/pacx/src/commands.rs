use crate::config::AppConfig;
use anyhow::{Context, Result};
use pacx_http::{HttpResponse, HttpTransport, parse_retry_after};
use pacx_odata::{BatchClient, BatchItem, LogicalOperation};
use pacx_operations::{
    OperationMonitor, PollOutcome, PollResult, is_failure_marker, progress_of, state_of,
};
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

/// Read a JSON array of operations from `file`.
///
/// # Errors
/// Unreadable file or entries that are not `{method, url, body?, headers?}`.
pub fn load_operations(file: &Path) -> Result<Vec<LogicalOperation>> {
    let raw = std::fs::read(file)
        .with_context(|| format!("failed to read operations file {}", file.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("invalid operations file {}", file.display()))
}

/// `pacx batch`: send the operations and print one line per result.
pub async fn batch(
    transport: HttpTransport,
    config: &AppConfig,
    file: &Path,
    path: Option<&str>,
) -> Result<ExitCode> {
    let operations = load_operations(file)?;
    if operations.is_empty() {
        tracing::warn!(file = %file.display(), "Operations file is empty; nothing to send");
        return Ok(ExitCode::SUCCESS);
    }

    let client = BatchClient::new(transport)
        .with_path(path.unwrap_or(&config.batch.path))
        .with_retry(config.batch_retry());

    let outcome = client
        .execute(&operations)
        .await
        .context("batch request failed")?;

    let mut out = std::io::stdout().lock();
    for item in &outcome.items {
        writeln!(out, "{}", result_line(item, &operations[item.operation_index]))?;
    }

    let failed = outcome.failed().count();
    if failed > 0 {
        tracing::warn!(failed, total = outcome.items.len(), "Some batch operations failed");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn result_line(item: &BatchItem, operation: &LogicalOperation) -> String {
    let target = format!("{} {}", operation.method(), operation.url());
    let retries = if item.retries > 0 {
        format!(" (retried {}x)", item.retries)
    } else {
        String::new()
    };

    match &item.result {
        None => format!("#{} {target}: no response{retries}", item.operation_index + 1),
        Some(result) if result.is_success() => format!(
            "#{} {target}: {} {}{retries}",
            item.operation_index + 1,
            result.status(),
            result.reason()
        ),
        Some(result) => format!(
            "#{} {target}: {} {}{retries}: {}",
            item.operation_index + 1,
            result.status(),
            result.reason(),
            result
                .service_message()
                .unwrap_or_else(|| result.text().trim().to_owned())
        ),
    }
}

/// `pacx wait`: poll `url` until terminal, printing the final status.
///
/// Ctrl+C stops polling and prints the last status seen.
pub async fn wait(
    transport: HttpTransport,
    config: &AppConfig,
    url: &str,
    interval_ms: Option<u64>,
    timeout_secs: Option<u64>,
) -> Result<ExitCode> {
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl+C received, stopping");
                cancel.cancel();
            }
        }
    });

    let mut options = config.poll_options().with_cancel(cancel);
    if let Some(ms) = interval_ms {
        options.interval = std::time::Duration::from_millis(ms);
    }
    if let Some(secs) = timeout_secs {
        options.timeout = std::time::Duration::from_secs(secs);
    }

    let mut last_progress = None;
    let on_progress: &mut (dyn FnMut(&Value) + Send) = &mut |status: &Value| {
        let progress = progress_of(status);
        if progress != last_progress {
            tracing::info!(
                state = state_of(status).unwrap_or_default(),
                progress,
                "Operation progress"
            );
            last_progress = progress;
        }
    };

    let result = OperationMonitor::new(transport)
        .track(url, &options, Some(on_progress))
        .await
        .with_context(|| format!("failed to poll {url}"))?;

    println!("{}", serde_json::to_string_pretty(&result.status)?);
    Ok(wait_exit_code(&result))
}

fn wait_exit_code(result: &PollResult<Value>) -> ExitCode {
    match result.outcome {
        PollOutcome::Completed if is_failure_marker(&result.status) => {
            tracing::error!(
                state = state_of(&result.status).unwrap_or_default(),
                "Operation failed"
            );
            ExitCode::FAILURE
        }
        PollOutcome::Completed => ExitCode::SUCCESS,
        PollOutcome::TimedOut => {
            tracing::error!(polls = result.polls, "Operation did not finish in time");
            ExitCode::FAILURE
        }
        PollOutcome::Cancelled => {
            tracing::warn!(polls = result.polls, "Polling cancelled");
            ExitCode::FAILURE
        }
    }
}

/// `pacx get`: one GET, body printed as pretty JSON when it parses.
pub async fn get(transport: &HttpTransport, path: &str) -> Result<ExitCode> {
    let response = transport
        .get(path)
        .header("Accept", "application/json")
        .send()
        .await
        .with_context(|| format!("GET {path} failed"))?;

    match response.json::<Value>() {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{}", response.text()),
    }
    Ok(get_exit_code(&response, path))
}

// Throttling that outlasts the retry budget still arrives as `Ok`.
fn get_exit_code(response: &HttpResponse, path: &str) -> ExitCode {
    if response.status().is_success() {
        return ExitCode::SUCCESS;
    }
    tracing::error!(
        path,
        status = response.status().as_u16(),
        retry_after_secs = parse_retry_after(response.headers()).map(|d| d.as_secs()),
        "GET did not succeed"
    );
    ExitCode::FAILURE
}
