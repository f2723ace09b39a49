//! Universe of discourse: an in-memory, versioned concept graph.
//!
//! Nodes are locked per transaction, every mutation propagates change
//! notifications to owners and listening pointers, undo snapshots are taken
//! before the first change of each node, and reactive functions keyed by URI
//! run on a worker pool once the transaction releases its locks.

pub mod functions;
pub mod listeners;
pub mod observer;
mod ops;
mod propagation;
mod query;
mod recovery;
pub mod registry;
pub mod transaction;
pub mod undo;
pub mod universe;

pub use functions::{FunctionCall, FunctionCallManager, FunctionRegistry, ReactiveFn};
pub use listeners::ListenerRegistry;
pub use observer::{GraphEvent, GraphObserver, ObserverHub};
pub use registry::NodeHandle;
pub use transaction::Transaction;
pub use undo::{UndoEntry, UndoKind, UndoManager};
pub use universe::Universe;

pub use crlgraph_concurrent::LockMode;
pub use crlgraph_core::*;
