//! Core types shared by store implementations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A serialized store snapshot. Opaque to the dispatcher; two snapshots are
/// identical iff their bytes are.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SerializedState(Vec<u8>);

impl SerializedState {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode the snapshot as JSON. Only meaningful for stores that serialize
    /// to JSON, which `MemoryStore` does.
    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::from_slice(&self.0)
    }
}

impl From<Vec<u8>> for SerializedState {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Published on commit when a watched path's value changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreUpdate {
    /// Dotted path as it was registered with `watch`.
    pub path: String,
    /// Value at `path` after the commit. `Null` when the path was removed.
    pub data: Value,
}
