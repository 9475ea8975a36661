//! In-memory JSON store.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::debug;

use crate::path::{get_path, set_path, split_path};
use crate::traits::{Store, StoreView};
use crate::types::{SerializedState, StoreUpdate};

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// In-memory JSON tree. Writes are staged until `commit`, which publishes a
/// `StoreUpdate` for every watched path whose value changed since the last
/// commit.
pub struct MemoryStore {
    staged: Value,
    committed: Value,
    commits: u64,
    watched: Vec<String>,
    updates: broadcast::Sender<StoreUpdate>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_state(Value::Object(Map::new()))
    }

    /// Start from an initial state. The initial state counts as committed, so
    /// the first commit only reports paths that changed after construction.
    pub fn with_state(state: Value) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            staged: state.clone(),
            committed: state,
            commits: 0,
            watched: Vec::new(),
            updates,
        }
    }

    /// Register a dotted path as a cursor and subscribe to updates.
    pub fn watch(&mut self, path: &str) -> broadcast::Receiver<StoreUpdate> {
        if !self.watched.iter().any(|p| p == path) {
            self.watched.push(path.to_string());
        }
        self.updates.subscribe()
    }

    /// Subscribe to updates for every watched path.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreUpdate> {
        self.updates.subscribe()
    }

    /// Number of commits since construction.
    pub fn commit_count(&self) -> u64 {
        self.commits
    }

    /// State as of the last commit.
    pub fn committed(&self) -> &Value {
        &self.committed
    }

    /// Current state, including uncommitted writes.
    pub fn state(&self) -> &Value {
        &self.staged
    }

    fn changed_watches(&self) -> Vec<StoreUpdate> {
        self.watched
            .iter()
            .filter_map(|path| {
                let segments = split_path(path);
                let before = get_path(&self.committed, &segments);
                let after = get_path(&self.staged, &segments);
                (before != after).then(|| StoreUpdate {
                    path: path.clone(),
                    data: after.cloned().unwrap_or(Value::Null),
                })
            })
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreView for MemoryStore {
    fn get(&self, path: &[&str]) -> Option<Value> {
        get_path(&self.staged, path).cloned()
    }
}

impl Store for MemoryStore {
    fn set(&mut self, path: &[&str], value: Value) {
        set_path(&mut self.staged, path, value);
    }

    fn commit(&mut self) -> Value {
        let changed = self.changed_watches();
        self.committed = self.staged.clone();
        self.commits += 1;

        for update in changed {
            debug!(path = update.path.as_str(), "Store cursor updated");
            // No receivers is fine: nobody is listening on this cursor yet.
            let _ = self.updates.send(update);
        }

        self.committed.clone()
    }

    fn serialize(&self, state: &Value) -> Result<SerializedState> {
        let bytes = serde_json::to_vec(state).context("Failed to serialize store state")?;
        Ok(SerializedState::new(bytes))
    }

    fn restore(&mut self, snapshot: &SerializedState) -> Result<()> {
        self.staged = snapshot
            .to_json()
            .context("Failed to decode store snapshot")?;
        Ok(())
    }
}
