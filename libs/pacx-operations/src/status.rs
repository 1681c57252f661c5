//! Heuristics over JSON status payloads.
//!
//! Status resources differ between services; these helpers look at the
//! field names the platform APIs use in practice.

use serde_json::Value;

const STATE_FIELDS: [&str; 3] = ["status", "state", "provisioningState"];

const TERMINAL_STATES: [&str; 7] = [
    "succeeded",
    "completed",
    "failed",
    "canceled",
    "cancelled",
    "faulted",
    "error",
];

const PROGRESS_FIELDS: [&str; 6] = [
    "progress",
    "percentComplete",
    "percent",
    "percentagecomplete",
    "percentage",
    "completionPercent",
];

/// First non-empty string among `status`, `state` and `provisioningState`.
#[must_use]
pub fn state_of(status: &Value) -> Option<&str> {
    STATE_FIELDS
        .iter()
        .filter_map(|field| status.get(field).and_then(Value::as_str))
        .find(|s| !s.is_empty())
}

/// `Faulted` or `Error` (any case) in `status` or `state`.
#[must_use]
pub fn is_failure_marker(status: &Value) -> bool {
    STATE_FIELDS[..2].iter().any(|field| {
        status
            .get(field)
            .and_then(Value::as_str)
            .is_some_and(|s| s.eq_ignore_ascii_case("faulted") || s.eq_ignore_ascii_case("error"))
    })
}

/// The payload reports a finished operation, successful or not.
#[must_use]
pub fn is_terminal(status: &Value) -> bool {
    state_of(status).is_some_and(|state| {
        TERMINAL_STATES
            .iter()
            .any(|terminal| state.eq_ignore_ascii_case(terminal))
    })
}

/// Completion percentage, if the payload reports one.
#[must_use]
pub fn progress_of(status: &Value) -> Option<f64> {
    PROGRESS_FIELDS
        .iter()
        .find_map(|field| status.get(field).and_then(Value::as_f64))
}

/// Solution import jobs: done at 100% or once `statecode`/`status` says
/// completed, succeeded or failed.
#[must_use]
pub fn is_import_finished(status: &Value) -> bool {
    if progress_of(status).is_some_and(|p| p >= 100.0) {
        return true;
    }
    ["statecode", "status"]
        .iter()
        .filter_map(|field| status.get(field).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .is_some_and(|state| {
            ["completed", "succeeded", "failed"]
                .iter()
                .any(|done| state.eq_ignore_ascii_case(done))
        })
}
