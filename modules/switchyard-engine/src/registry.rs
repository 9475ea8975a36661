//! Handler traits and the action registry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use async_trait::async_trait;

use crate::action::Input;

/// Shared handle to the dispatcher's store. Lock it briefly; never hold the
/// guard across an `.await`.
pub type StoreHandle<S> = Arc<Mutex<S>>;

/// Lock a store handle. A poisoned lock still yields the store: a panicking
/// handler must not take the dispatcher down with it.
pub fn lock_store<S>(store: &StoreHandle<S>) -> MutexGuard<'_, S> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Synchronous store-aware transform. Returns a partial output that is
/// shallow-merged into the input.
pub trait LocalAction<S>: Send + Sync {
    fn apply(&self, store: &mut S, input: &Input) -> Result<Input>;
}

impl<S, F> LocalAction<S> for F
where
    F: Fn(&mut S, &Input) -> Result<Input> + Send + Sync,
{
    fn apply(&self, store: &mut S, input: &Input) -> Result<Input> {
        self(store, input)
    }
}

/// Asynchronous transform, the pipeline's only suspension point.
///
/// Receives a store handle rather than a borrow so other dispatches can run
/// while it is pending.
#[async_trait]
pub trait RemoteAction<S: Send + 'static>: Send + Sync {
    async fn call(&self, store: StoreHandle<S>, input: Input) -> Result<Input>;
}

#[async_trait]
impl<S, F, Fut> RemoteAction<S> for F
where
    S: Send + 'static,
    F: Fn(StoreHandle<S>, Input) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Input>> + Send,
{
    async fn call(&self, store: StoreHandle<S>, input: Input) -> Result<Input> {
        self(store, input).await
    }
}

/// What a name resolved to. Both, one, or neither may be present.
pub struct Resolved<S: Send + 'static> {
    pub local: Option<Arc<dyn LocalAction<S>>>,
    pub remote: Option<Arc<dyn RemoteAction<S>>>,
}

impl<S: Send + 'static> Resolved<S> {
    pub fn is_empty(&self) -> bool {
        self.local.is_none() && self.remote.is_none()
    }
}

/// Name → local handler, name → remote handler.
pub struct ActionRegistry<S: Send + 'static> {
    local: HashMap<String, Arc<dyn LocalAction<S>>>,
    remote: HashMap<String, Arc<dyn RemoteAction<S>>>,
}

impl<S: Send + 'static> ActionRegistry<S> {
    pub fn new() -> Self {
        Self {
            local: HashMap::new(),
            remote: HashMap::new(),
        }
    }

    /// Register a local handler closure.
    pub fn local<F>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut S, &Input) -> Result<Input> + Send + Sync + 'static,
    {
        self.with_local(name, Arc::new(handler))
    }

    /// Register a remote handler closure.
    pub fn remote<F, Fut>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(StoreHandle<S>, Input) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Input>> + Send + 'static,
    {
        self.with_remote(name, Arc::new(handler))
    }

    pub fn with_local(
        mut self,
        name: impl Into<String>,
        handler: Arc<dyn LocalAction<S>>,
    ) -> Self {
        self.local.insert(name.into(), handler);
        self
    }

    pub fn with_remote(
        mut self,
        name: impl Into<String>,
        handler: Arc<dyn RemoteAction<S>>,
    ) -> Self {
        self.remote.insert(name.into(), handler);
        self
    }

    pub fn lookup(&self, name: &str) -> Resolved<S> {
        Resolved {
            local: self.local.get(name).cloned(),
            remote: self.remote.get(name).cloned(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.local.contains_key(name) || self.remote.contains_key(name)
    }
}

impl<S: Send + 'static> Default for ActionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn output(value: serde_json::Value) -> Input {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn lookup_reports_each_side() {
        let registry = ActionRegistry::<()>::new()
            .local("both", |_store: &mut (), _input: &Input| Ok(Input::new()))
            .remote("both", |_store, _input| async { anyhow::Ok(Input::new()) })
            .local("onlyLocal", |_store: &mut (), _input: &Input| Ok(Input::new()));

        let both = registry.lookup("both");
        assert!(both.local.is_some() && both.remote.is_some());

        let local = registry.lookup("onlyLocal");
        assert!(local.local.is_some() && local.remote.is_none());

        assert!(registry.lookup("missing").is_empty());
        assert!(!registry.contains("missing"));
    }

    #[tokio::test]
    async fn closures_are_handlers() {
        let registry = ActionRegistry::<u32>::new()
            .local("bump", |count: &mut u32, _input: &Input| {
                *count += 1;
                Ok(output(json!({"count": *count})))
            })
            .remote("fetch", |_store, input: Input| async move {
                let mut out = Input::new();
                out.insert("echo".into(), json!(input.len()));
                anyhow::Ok(out)
            });

        let mut count = 0;
        let local = registry.lookup("bump").local.unwrap();
        assert_eq!(local.apply(&mut count, &Input::new()).unwrap(), output(json!({"count": 1})));

        let remote = registry.lookup("fetch").remote.unwrap();
        let out = remote
            .call(Arc::new(Mutex::new(0)), output(json!({"a": 1, "b": 2})))
            .await
            .unwrap();
        assert_eq!(out, output(json!({"echo": 2})));
    }
}
