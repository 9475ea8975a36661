//! Event dispatch engine.
//!
//! Maps an event key to an ordered sequence of actions and runs them against
//! a shared store: resolve → validate → execute → commit → log. Actions are
//! local (synchronous), remote (async), or both; sequences may branch on
//! store values and redirect to routes.
//!
//! In debug mode every dispatch also records validation results, per-action
//! timings, and a serialized history entry that `time_travel` can restore.

pub mod action;
pub mod conditional;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod log;
pub mod registry;
pub mod rules;
pub mod timing;
pub mod triggers;
pub mod validation;

pub use action::{ActionRef, Branch, Effect, Input, Nested, Sequence, SequenceKind, SequenceTable};
pub use config::DispatcherConfig;
pub use engine::{Dispatcher, DispatcherBuilder};
pub use error::{ActionError, BuildError, DispatchError, DispatchResult};
pub use history::History;
pub use log::{ActionFailure, LogEntry};
pub use registry::{lock_store, ActionRegistry, LocalAction, RemoteAction, StoreHandle};
pub use timing::ActionTimings;
pub use triggers::{
    match_route, parse_query, serve_listeners, serve_navigation, serve_socket, subscribe_listeners,
    ChannelRedirect, Navigation, Redirect, SocketMessage,
};
pub use validation::{all_valid, validate, Rule, RuleContext, RuleSet, ValidatorSpec};
