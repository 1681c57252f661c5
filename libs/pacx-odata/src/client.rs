use crate::decode::{OperationResult, decode};
use crate::encode::encode;
use crate::error::BatchError;
use crate::operation::LogicalOperation;
use pacx_http::{ExponentialBackoff, HttpTransport};
use std::time::Duration;

/// Path of the batch endpoint relative to the service root
pub const DEFAULT_BATCH_PATH: &str = "$batch";

/// Re-send policy for parts the service throttled inside a successful batch
///
/// Complements the transport retry, which only sees the status of the outer
/// `$batch` request.
#[derive(Debug, Clone)]
pub struct BatchRetryPolicy {
    /// Re-send rounds after the first batch (default: 3)
    pub max_retries: usize,
    /// Wait between rounds when the part carries no `Retry-After`
    pub backoff: ExponentialBackoff,
    /// Also re-send parts answered with 503 (default: true)
    pub retry_service_unavailable: bool,
}

impl Default for BatchRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: ExponentialBackoff::default(),
            retry_service_unavailable: true,
        }
    }
}

impl BatchRetryPolicy {
    /// Never re-send parts.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    fn is_retryable(&self, status: u16) -> bool {
        status == 429 || (self.retry_service_unavailable && status == 503)
    }
}

/// Final state of one submitted operation
#[derive(Debug, Clone)]
pub struct BatchItem {
    /// Position in the submitted operation list
    pub operation_index: usize,
    /// Last response part for the operation; `None` if the service sent none
    pub result: Option<OperationResult>,
    /// Number of times the operation was re-sent
    pub retries: usize,
}

impl BatchItem {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.as_ref().is_some_and(OperationResult::is_success)
    }
}

/// Per-operation outcome of [`BatchClient::execute`], in submission order
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub items: Vec<BatchItem>,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> impl Iterator<Item = &BatchItem> {
        self.items.iter().filter(|item| item.is_success())
    }

    /// Items with a non-2xx part or no part at all.
    pub fn failed(&self) -> impl Iterator<Item = &BatchItem> {
        self.items.iter().filter(|item| !item.is_success())
    }

    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.items.iter().all(BatchItem::is_success)
    }

    #[must_use]
    pub fn retry_counts(&self) -> Vec<usize> {
        self.items.iter().map(|item| item.retries).collect()
    }
}

/// Sends batches over an [`HttpTransport`]
#[derive(Debug, Clone)]
pub struct BatchClient {
    transport: HttpTransport,
    path: String,
    retry: BatchRetryPolicy,
}

impl BatchClient {
    #[must_use]
    pub fn new(transport: HttpTransport) -> Self {
        Self {
            transport,
            path: DEFAULT_BATCH_PATH.to_owned(),
            retry: BatchRetryPolicy::default(),
        }
    }

    /// Post to `path` instead of `$batch`.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: BatchRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Execute `operations`, re-sending throttled parts in fresh batches.
    ///
    /// Each round re-encodes only the operations whose last part was
    /// retryable, so a write that already succeeded is never repeated.
    ///
    /// # Errors
    /// Encoding errors, a failed `$batch` request, or an unparsable response.
    /// Per-operation failures are reported in the outcome, not as errors.
    pub async fn execute(
        &self,
        operations: &[LogicalOperation],
    ) -> Result<BatchOutcome, BatchError> {
        let mut items: Vec<BatchItem> = (0..operations.len())
            .map(|operation_index| BatchItem {
                operation_index,
                result: None,
                retries: 0,
            })
            .collect();

        let mut pending: Vec<usize> = (0..operations.len()).collect();
        let mut round = 0;

        while !pending.is_empty() {
            let batch: Vec<LogicalOperation> =
                pending.iter().map(|&i| operations[i].clone()).collect();
            let results = self.send_once(&batch).await?;

            let mut next = Vec::new();
            let mut hinted = Duration::ZERO;
            for (&index, result) in pending.iter().zip(results) {
                let retryable = result
                    .as_ref()
                    .is_some_and(|r| self.retry.is_retryable(r.status()));
                if retryable && round < self.retry.max_retries {
                    if let Some(after) = result.as_ref().and_then(OperationResult::retry_after) {
                        hinted = hinted.max(after);
                    }
                    items[index].retries += 1;
                    next.push(index);
                }
                items[index].result = result;
            }

            if next.is_empty() {
                break;
            }

            let delay = if hinted.is_zero() {
                self.retry.backoff.delay_for(round)
            } else {
                hinted
            };
            tracing::debug!(
                round = round + 1,
                max_retries = self.retry.max_retries,
                operations = next.len(),
                backoff_ms = delay.as_millis(),
                "Re-sending throttled batch operations"
            );
            tokio::time::sleep(delay).await;

            round += 1;
            pending = next;
        }

        Ok(BatchOutcome { items })
    }

    /// Send one batch and return one slot per operation, `None` where the
    /// service sent no matching part.
    ///
    /// # Errors
    /// Same as [`execute`](Self::execute).
    pub async fn send_once(
        &self,
        operations: &[LogicalOperation],
    ) -> Result<Vec<Option<OperationResult>>, BatchError> {
        let request = encode(operations)?;

        let response = self
            .transport
            .post(&self.path)
            .header("Content-Type", &request.content_type())
            .body_bytes(request.into_body())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BatchError::Http(response.into_status_error()));
        }

        let content_type = response.header("content-type").unwrap_or_default();
        let results = decode(content_type, response.body())?;
        if results.len() != operations.len() {
            tracing::warn!(
                expected = operations.len(),
                received = results.len(),
                "Batch response part count differs from request"
            );
        }

        Ok(correlate(operations.len(), results))
    }
}

/// Place results by Content-ID (1-based); parts without a usable ID fill the
/// remaining slots in order.
fn correlate(len: usize, results: Vec<OperationResult>) -> Vec<Option<OperationResult>> {
    let mut slots: Vec<Option<OperationResult>> = vec![None; len];
    let mut unmatched = Vec::new();

    for result in results {
        let slot = result
            .content_id()
            .and_then(|id| usize::try_from(id).ok())
            .and_then(|id| id.checked_sub(1))
            .filter(|&i| i < len && slots[i].is_none());
        match slot {
            Some(i) => slots[i] = Some(result),
            None => unmatched.push(result),
        }
    }

    for result in unmatched {
        if let Some(slot) = slots.iter_mut().find(|s| s.is_none()) {
            *slot = Some(result);
        }
    }
    slots
}
