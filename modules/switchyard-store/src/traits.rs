//! The store adapter contract.

use anyhow::Result;
use serde_json::Value;

use crate::types::SerializedState;

/// Read-only view of a store.
///
/// Validation rules receive this so they can consult state without being able
/// to write it.
pub trait StoreView {
    /// Value at `path`, or `None` when any segment along the way is missing.
    fn get(&self, path: &[&str]) -> Option<Value>;
}

/// Keyed-path state container the dispatcher reads, writes, and commits.
///
/// Writes made through `set` are visible to `get` immediately. `commit`
/// publishes them to listeners and returns the committed state.
pub trait Store: StoreView + Send + 'static {
    fn set(&mut self, path: &[&str], value: Value);

    /// Publish staged writes. Returns the state as committed.
    fn commit(&mut self) -> Value;

    /// Serialize a committed state for the history log.
    fn serialize(&self, state: &Value) -> Result<SerializedState>;

    /// Replace the live state with a previously serialized snapshot.
    /// The replacement is staged; callers commit afterwards.
    fn restore(&mut self, snapshot: &SerializedState) -> Result<()>;
}
