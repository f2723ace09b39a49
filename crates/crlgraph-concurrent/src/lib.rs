//! Concurrency primitives for CrlGraph
//!
//! - `held_locks`: per-operation set of acquired locks with at-most-once acquisition
//! - `barrier`: counting completion barrier that collects unit-of-work failures
//! - `pool`: worker pool that runs deferred callbacks under a barrier

pub mod barrier;
pub mod held_locks;
pub mod pool;

pub use barrier::{BarrierTicket, CompletionBarrier};
pub use held_locks::{Checkpoint, HeldLocks, LockError, LockMode};
pub use pool::WorkerPool;
