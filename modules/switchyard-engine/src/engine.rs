//! The dispatch pipeline.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use switchyard_store::{is_truthy, SerializedState, Store};
use tracing::{debug, error, info, warn};

use crate::action::{is_redirect, merge, ActionRef, Input, SequenceKind, SequenceTable};
use crate::conditional;
use crate::config::DispatcherConfig;
use crate::error::{ActionError, BuildError, DispatchError, DispatchResult};
use crate::history::History;
use crate::log::{ActionFailure, LogEntry};
use crate::registry::{
    lock_store, ActionRegistry, LocalAction, RemoteAction, Resolved, StoreHandle,
};
use crate::timing::ActionTimings;
use crate::triggers::Redirect;
use crate::validation::{all_valid, validate, RuleContext, RuleSet, ValidatorSpec};

/// Failure label for validation passes that could not evaluate.
const VALIDATE_LABEL: &str = "<validate>";

/// Scratch state for one top-level dispatch, shared with its nested branches.
#[derive(Default)]
struct Run {
    timings: ActionTimings,
    failures: Vec<ActionFailure>,
}

enum Step {
    Merged(Input),
    Redirect,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Resolve → validate → execute → commit → log, per top-level `dispatch`.
///
/// Actions within a sequence run strictly one at a time; an awaited remote
/// handler is the only suspension point. Concurrent dispatches interleave at
/// those points, and their commits are serialized by a shared token.
pub struct Dispatcher<S: Store> {
    sequences: SequenceTable,
    registry: ActionRegistry<S>,
    validators: HashMap<String, ValidatorSpec>,
    rules: RuleSet,
    redirect: Option<Arc<dyn Redirect>>,
    config: DispatcherConfig,
    store: StoreHandle<S>,
    commit_token: tokio::sync::Mutex<()>,
    history: Mutex<History>,
    timings: Mutex<ActionTimings>,
    logs: Mutex<Vec<LogEntry>>,
}

impl<S: Store> Dispatcher<S> {
    pub fn builder() -> DispatcherBuilder<S> {
        DispatcherBuilder::new()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn sequences(&self) -> &SequenceTable {
        &self.sequences
    }

    /// Shared handle to the live store.
    pub fn store(&self) -> StoreHandle<S> {
        Arc::clone(&self.store)
    }

    /// Run `f` with the store locked.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut lock_store(&self.store))
    }

    /// Names referenced by sequences that resolve to no handler and are not
    /// redirect targets. Dispatching them reports an `UnknownAction` failure.
    pub fn unhandled_actions(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sequences
            .referenced_names()
            .into_iter()
            .filter(|name| !is_redirect(name) && !self.registry.contains(name))
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }

    /// Dispatch `key` with `payload` and return the merged input.
    ///
    /// Fails only for configuration-level problems: an unregistered key, or
    /// nesting past `max_depth`. Per-action failures are logged and skipped.
    pub async fn dispatch(&self, key: &str, payload: Input) -> DispatchResult<Input> {
        let Some(sequence) = self.sequences.get(key) else {
            warn!(event = key, "Dispatch to unregistered event");
            return Err(DispatchError::UnknownEvent {
                key: key.to_string(),
            });
        };

        debug!(event = key, actions = sequence.actions.len(), "Dispatching");
        let mut run = Run::default();
        let result = self
            .run_sequence(key, &sequence.actions, payload, 0, &mut run)
            .await;
        *guard(&self.timings) = run.timings.clone();
        let input = result?;

        let history_index = self.commit_and_record().await;

        if self.config.debug {
            self.log(key, &input, run, history_index);
        }

        Ok(input)
    }

    /// Restore the store to history entry `index` and return the freshly
    /// committed, serialized state. `None` when no such entry exists.
    pub async fn time_travel(&self, index: usize) -> Option<SerializedState> {
        let snapshot = guard(&self.history).get(index).cloned();
        let Some(snapshot) = snapshot else {
            debug!(index, "Time travel missed: no history entry");
            return None;
        };

        let _token = self.commit_token.lock().await;
        let mut store = lock_store(&self.store);
        if let Err(error) = store.restore(&snapshot) {
            error!(index, error = %error, "Failed to restore history entry");
            return None;
        }

        let state = store.commit();
        match store.serialize(&state) {
            Ok(serialized) => {
                info!(index, "Time travelled");
                Some(serialized)
            }
            Err(error) => {
                error!(index, error = %error, "Failed to serialize restored state");
                None
            }
        }
    }

    /// Total history entries recorded.
    pub fn history_len(&self) -> usize {
        guard(&self.history).len()
    }

    pub fn history_entry(&self, index: usize) -> Option<SerializedState> {
        guard(&self.history).get(index).cloned()
    }

    /// Timings of the most recent top-level dispatch.
    pub fn action_times(&self) -> ActionTimings {
        guard(&self.timings).clone()
    }

    /// Debug-mode dispatch log, oldest first.
    pub fn logs(&self) -> Vec<LogEntry> {
        guard(&self.logs).clone()
    }

    // -----------------------------------------------------------------------
    // Pipeline
    // -----------------------------------------------------------------------

    /// Execute `actions` in order, threading the input through. Conditional
    /// branches recurse with the current input as payload and share `run`,
    /// so nested actions land in the same timing map.
    fn run_sequence<'a>(
        &'a self,
        key: &'a str,
        actions: &'a [ActionRef],
        payload: Input,
        depth: usize,
        run: &'a mut Run,
    ) -> BoxFuture<'a, DispatchResult<Input>> {
        async move {
            if depth > self.config.max_depth {
                error!(event = key, depth, "Sequence nesting exceeded max depth");
                return Err(DispatchError::CyclicSequence {
                    key: key.to_string(),
                    depth,
                });
            }

            let validator = self.validator_for(key);
            let mut input = payload;
            if let Some(spec) = validator {
                self.refresh_validation(key, spec, &mut input, run);
            }

            for action in actions {
                let started = Instant::now();
                let mut halt = false;

                let label = match action {
                    ActionRef::Conditional(branch) => {
                        let open = conditional::is_open(&*lock_store(&self.store), branch);
                        if open {
                            let nested = conditional::resolve(branch, &self.sequences).ok_or_else(
                                || DispatchError::UnknownEvent {
                                    key: branch.key().to_string(),
                                },
                            )?;
                            debug!(
                                event = key,
                                branch = branch.key(),
                                depth = depth + 1,
                                "Branch taken"
                            );
                            input = self
                                .run_sequence(branch.key(), nested, input, depth + 1, run)
                                .await?;
                            conditional::taken_label(branch, nested)
                        } else {
                            debug!(event = key, path = branch.path.as_str(), "Branch skipped");
                            conditional::skipped_label(branch)
                        }
                    }
                    ActionRef::Effect(effect) => {
                        let label = action.label();
                        if let Err(error) = effect.fire() {
                            let err = ActionError::Handler {
                                action: label.clone(),
                                error,
                            };
                            self.report(key, &label, err, run);
                        }
                        label
                    }
                    ActionRef::Name(name) => {
                        if let Some(spec) = validator {
                            self.refresh_validation(key, spec, &mut input, run);
                        }
                        let step = self.run_named(name, &input).await;
                        match step {
                            Ok(Step::Merged(next)) => input = next,
                            Ok(Step::Redirect) => {
                                self.redirect_to(name, &input);
                                halt = true;
                            }
                            Err(err) => self.report(key, name, err, run),
                        }
                        name.clone()
                    }
                };

                run.timings.record(label, started.elapsed());

                if halt {
                    break;
                }
            }

            if let Some(spec) = validator {
                self.refresh_validation(key, spec, &mut input, run);
            }

            Ok(input)
        }
        .boxed()
    }

    /// Resolve and run one named action against a copy of the input. The
    /// copy replaces the input only if every handler succeeds.
    async fn run_named(&self, name: &str, input: &Input) -> Result<Step, ActionError> {
        let resolved = self.registry.lookup(name);
        if resolved.is_empty() {
            return if is_redirect(name) {
                Ok(Step::Redirect)
            } else {
                Err(ActionError::UnknownAction {
                    name: name.to_string(),
                })
            };
        }

        let Resolved { local, remote } = resolved;
        let mut next = input.clone();
        if let Some(local) = &local {
            self.apply_local(name, local.as_ref(), &mut next)?;
        }

        if let Some(remote) = remote {
            // Listeners observe pre-remote state before we suspend.
            self.commit().await;
            let output = remote
                .call(Arc::clone(&self.store), next.clone())
                .await
                .map_err(|error| ActionError::Handler {
                    action: name.to_string(),
                    error,
                })?;
            merge(&mut next, output);

            // Remote resolves the canonical value; local reconciles it.
            if let Some(local) = &local {
                self.apply_local(name, local.as_ref(), &mut next)?;
            }
        }

        Ok(Step::Merged(next))
    }

    fn apply_local(
        &self,
        name: &str,
        local: &dyn LocalAction<S>,
        input: &mut Input,
    ) -> Result<(), ActionError> {
        let output = {
            let mut store = lock_store(&self.store);
            local.apply(&mut store, input)
        }
        .map_err(|error| ActionError::Handler {
            action: name.to_string(),
            error,
        })?;
        merge(input, output);
        Ok(())
    }

    fn validator_for(&self, key: &str) -> Option<&ValidatorSpec> {
        if self.config.debug {
            self.validators.get(key)
        } else {
            None
        }
    }

    fn refresh_validation(
        &self,
        event: &str,
        spec: &ValidatorSpec,
        input: &mut Input,
        run: &mut Run,
    ) {
        let result = {
            let store = lock_store(&self.store);
            validate(spec, input, &self.rules, &*store)
        };
        match result {
            Ok(validation) => {
                input.insert("validation".to_string(), validation);
            }
            Err(err) => self.report(event, VALIDATE_LABEL, err, run),
        }
    }

    async fn commit(&self) {
        let _token = self.commit_token.lock().await;
        lock_store(&self.store).commit();
    }

    /// Final commit. In debug mode the committed state is also appended to
    /// history under the same token, so history order is commit order.
    async fn commit_and_record(&self) -> Option<usize> {
        let _token = self.commit_token.lock().await;
        let mut store = lock_store(&self.store);
        let state = store.commit();

        if !self.config.debug {
            return None;
        }

        match store.serialize(&state) {
            Ok(snapshot) => Some(guard(&self.history).record(snapshot)),
            Err(error) => {
                error!(error = %error, "Failed to serialize state for history");
                None
            }
        }
    }

    fn redirect_to(&self, destination: &str, input: &Input) {
        match &self.redirect {
            Some(redirect) => {
                info!(to = destination, "Redirecting");
                redirect.redirect(destination, input);
            }
            None => warn!(to = destination, "Redirect requested but no router is attached"),
        }
    }

    fn report(&self, event: &str, action: &str, err: ActionError, run: &mut Run) {
        error!(event, action, error = %err, "Action failed");
        run.failures.push(ActionFailure {
            action: action.to_string(),
            message: err.to_string(),
        });
    }

    fn log(&self, event: &str, input: &Input, run: Run, history_index: Option<usize>) {
        let validation = input.get("validation").cloned();
        let timings = serde_json::to_string(&run.timings).unwrap_or_default();
        let merged = Value::Object(input.clone());

        info!(
            event,
            input = %merged,
            timings = timings.as_str(),
            failures = run.failures.len(),
            valid = validation.as_ref().map_or(true, all_valid),
            "Handled event"
        );
        if let Some(Value::Object(fields)) = &validation {
            for (field, outcome) in fields {
                debug!(event, field = field.as_str(), outcome = %outcome, "Validated field");
            }
        }

        let mut logs = guard(&self.logs);
        let seq = logs.len();
        logs.push(LogEntry {
            seq,
            recorded_at: Utc::now(),
            event: event.to_string(),
            input: input.clone(),
            timings: run.timings,
            validation,
            failures: run.failures,
            history_index,
        });
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Assembles sequences, handlers, validators, and settings into a
/// `Dispatcher`. Registration problems surface from `build`.
pub struct DispatcherBuilder<S: Store> {
    sequences: SequenceTable,
    registry: ActionRegistry<S>,
    validators: HashMap<String, ValidatorSpec>,
    rules: RuleSet,
    redirect: Option<Arc<dyn Redirect>>,
    config: DispatcherConfig,
    debug_from_store: bool,
    error: Option<BuildError>,
}

impl<S: Store> DispatcherBuilder<S> {
    pub fn new() -> Self {
        Self {
            sequences: SequenceTable::new(),
            registry: ActionRegistry::new(),
            validators: HashMap::new(),
            rules: RuleSet::builtin(),
            redirect: None,
            config: DispatcherConfig::default(),
            debug_from_store: false,
            error: None,
        }
    }

    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Take the debug flag from the store's `debug` path at build time.
    pub fn debug_from_store(mut self) -> Self {
        self.debug_from_store = true;
        self
    }

    pub fn sequence(
        mut self,
        key: impl Into<String>,
        kind: SequenceKind,
        actions: Vec<ActionRef>,
    ) -> Self {
        if let Err(error) = self.sequences.insert(key, kind, actions) {
            self.error.get_or_insert(error);
        }
        self
    }

    pub fn event(self, key: impl Into<String>, actions: Vec<ActionRef>) -> Self {
        self.sequence(key, SequenceKind::Event, actions)
    }

    /// `pattern` like `/users/:id`; dispatched by `Dispatcher::navigate`.
    pub fn route(self, pattern: impl Into<String>, actions: Vec<ActionRef>) -> Self {
        self.sequence(pattern, SequenceKind::Route, actions)
    }

    /// `paths` is one or more comma-separated store paths.
    pub fn listener(self, paths: impl Into<String>, actions: Vec<ActionRef>) -> Self {
        self.sequence(paths, SequenceKind::Listener, actions)
    }

    pub fn socket(self, message: impl Into<String>, actions: Vec<ActionRef>) -> Self {
        self.sequence(message, SequenceKind::Socket, actions)
    }

    pub fn local<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut S, &Input) -> Result<Input> + Send + Sync + 'static,
    {
        self.registry = self.registry.local(name, handler);
        self
    }

    pub fn remote<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(StoreHandle<S>, Input) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Input>> + Send + 'static,
    {
        self.registry = self.registry.remote(name, handler);
        self
    }

    pub fn with_local(
        mut self,
        name: impl Into<String>,
        handler: Arc<dyn LocalAction<S>>,
    ) -> Self {
        self.registry = self.registry.with_local(name, handler);
        self
    }

    pub fn with_remote(
        mut self,
        name: impl Into<String>,
        handler: Arc<dyn RemoteAction<S>>,
    ) -> Self {
        self.registry = self.registry.with_remote(name, handler);
        self
    }

    /// Validator for the sequence `key` (for inline branches, the gating path).
    pub fn validator(mut self, key: impl Into<String>, spec: ValidatorSpec) -> Self {
        self.validators.insert(key.into(), spec);
        self
    }

    /// Register a custom validation rule.
    pub fn rule<F>(mut self, name: impl Into<String>, rule: F) -> Self
    where
        F: Fn(&RuleContext<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.rules = self.rules.with(name, rule);
        self
    }

    pub fn redirect(mut self, redirect: Arc<dyn Redirect>) -> Self {
        self.redirect = Some(redirect);
        self
    }

    pub fn build(self, store: S) -> Result<Dispatcher<S>, BuildError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        self.sequences.check_references()?;

        let mut config = self.config;
        if self.debug_from_store {
            config.debug = is_truthy(store.get(&["debug"]).as_ref());
        }

        for name in self.sequences.referenced_names() {
            if !is_redirect(name) && !self.registry.contains(name) {
                warn!(action = name, "Action has no local or remote handler");
            }
        }

        info!(
            sequences = self.sequences.len(),
            debug = config.debug,
            "Dispatcher ready"
        );

        Ok(Dispatcher {
            sequences: self.sequences,
            registry: self.registry,
            validators: self.validators,
            rules: self.rules,
            redirect: self.redirect,
            history: Mutex::new(History::new(config.history_limit)),
            config,
            store: Arc::new(Mutex::new(store)),
            commit_token: tokio::sync::Mutex::new(()),
            timings: Mutex::new(ActionTimings::new()),
            logs: Mutex::new(Vec::new()),
        })
    }
}

impl<S: Store> Default for DispatcherBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}
