//! Typed errors for dispatch, actions, and dispatcher construction.

use thiserror::Error;

/// Configuration-level failures. These reach the caller of `dispatch`.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No sequence is registered for the key
    #[error(
        "an event with key `{key}` does not exist; \
         check its spelling in both the trigger and the sequence table"
    )]
    UnknownEvent { key: String },

    /// Nested sequences went deeper than the configured cap
    #[error(
        "sequence `{key}` nested past depth {depth}; sequences reference each other cyclically"
    )]
    CyclicSequence { key: String, depth: usize },
}

/// Execution-level failures. Contained per action: reported, then the
/// sequence moves on.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Name resolves to no handler and is not a redirect target
    #[error("no local or remote handler registered for action `{name}`")]
    UnknownAction { name: String },

    /// A handler or effect returned an error
    #[error("action `{action}` failed: {error:#}")]
    Handler { action: String, error: anyhow::Error },

    /// A validation rule returned an error
    #[error("rule `{rule}` on `{field}` failed: {error:#}")]
    Rule {
        rule: String,
        field: String,
        error: anyhow::Error,
    },
}

/// Problems detected while assembling a dispatcher.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("sequence `{key}` is registered twice")]
    DuplicateSequence { key: String },

    #[error("sequence `{from}` references unregistered sequence `{to}`")]
    DanglingSequence { from: String, to: String },

    #[error("sequences reference each other cyclically: {}", cycle.join(" -> "))]
    CyclicSequence { cycle: Vec<String> },
}

/// Result type alias for dispatch.
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;
