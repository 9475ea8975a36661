//! Store adapter contract for the dispatcher.
//!
//! The dispatcher treats application state as an opaque keyed-path store:
//! `get(path)`, `set(path, value)`, `commit()`, `serialize(state)`. It never
//! inspects the shape of the state beyond that.
//!
//! `MemoryStore` is an in-memory JSON tree that implements the contract and
//! publishes cursor updates for watched paths on commit.

pub mod memory;
pub mod path;
pub mod traits;
pub mod types;

pub use memory::MemoryStore;
pub use path::{get_path, is_truthy, set_path, split_path};
pub use traits::{Store, StoreView};
pub use types::{SerializedState, StoreUpdate};
