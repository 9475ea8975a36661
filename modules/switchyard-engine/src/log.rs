//! Dispatch log entries, kept in debug mode.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::action::Input;
use crate::timing::ActionTimings;

/// One handled top-level event.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub seq: usize,
    pub recorded_at: DateTime<Utc>,
    pub event: String,
    /// Final merged input returned to the caller.
    pub input: Input,
    pub timings: ActionTimings,
    pub validation: Option<Value>,
    pub failures: Vec<ActionFailure>,
    /// Index of the history entry this dispatch recorded.
    pub history_index: Option<usize>,
}

/// An action that failed and was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionFailure {
    pub action: String,
    pub message: String,
}
