use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crlgraph_concurrent::{CompletionBarrier, HeldLocks, LockError, LockMode};
use crlgraph_core::{ChangeNotification, CrlGraphError, NodeId, NodeState, Result, UniverseId};

use crate::functions::FunctionCallManager;
use crate::registry::NodeHandle;
use crate::universe::Universe;

/// How often an operation that started with locks already held re-plans its
/// lock set before giving up on an out-of-order node.
const MAX_ORDERED_RESTARTS: usize = 8;

/// Bookkeeping for the public operation currently running in a transaction.
#[derive(Debug, Default)]
pub(crate) struct OperationScope {
    /// Nodes whose undo snapshot has been taken.
    pub snapshotted: HashSet<NodeId>,
    /// Nodes whose version has been bumped.
    pub bumped: HashSet<NodeId>,
    /// Nodes registered by this operation.
    pub created: HashSet<NodeId>,
    /// Nodes whose change handler has run.
    pub visited: HashSet<NodeId>,
    /// Nodes already reported as a root notification.
    pub rooted: HashSet<NodeId>,
}

impl OperationScope {
    pub fn reset(&mut self) {
        self.snapshotted.clear();
        self.bumped.clear();
        self.created.clear();
        self.visited.clear();
        self.rooted.clear();
    }
}

/// The lock set of one logical unit of work against a [`Universe`].
///
/// Every node touched by an operation stays locked until the transaction is
/// released (explicitly or on drop). Release then publishes the top-level
/// notifications to observers and hands the batched reactive function calls
/// to the worker pool.
pub struct Transaction {
    universe: Universe,
    pub(crate) locks: HeldLocks<NodeId, NodeState>,
    pub(crate) calls: FunctionCallManager,
    pub(crate) scope: OperationScope,
    pub(crate) roots: Vec<Arc<ChangeNotification>>,
    barrier: Arc<CompletionBarrier>,
}

impl Transaction {
    pub(crate) fn new(universe: Universe, mode: LockMode) -> Self {
        let timeout = universe.config().lock_wait_timeout();
        Self {
            universe,
            locks: HeldLocks::with_timeout(mode, timeout),
            calls: FunctionCallManager::new(),
            scope: OperationScope::default(),
            roots: Vec::new(),
            barrier: CompletionBarrier::new(),
        }
    }

    pub fn universe_id(&self) -> UniverseId {
        self.universe.id()
    }

    pub fn mode(&self) -> LockMode {
        self.locks.mode()
    }

    pub fn is_read_only(&self) -> bool {
        self.locks.mode() == LockMode::Shared
    }

    pub fn is_held(&self, id: &NodeId) -> bool {
        self.locks.is_held(id)
    }

    /// Number of distinct nodes currently locked.
    pub fn held(&self) -> usize {
        self.locks.len()
    }

    /// Underlying lock acquisitions made over the life of the transaction.
    pub fn lock_acquisitions(&self) -> u64 {
        self.locks.acquisitions()
    }

    pub fn pending_calls(&self) -> usize {
        self.calls.pending_len()
    }

    pub fn pending_notifications(&self) -> usize {
        self.roots.len()
    }

    pub fn barrier(&self) -> &Arc<CompletionBarrier> {
        &self.barrier
    }

    /// Lock every node `wanted` names, re-planning until the set is stable.
    ///
    /// Nodes are taken in ascending id order. When the plan grows with a node
    /// below one already held and that node is contended, the locks taken by
    /// this call are dropped and the whole plan is taken again in order. An
    /// operation that began with nothing held can always do so; one that
    /// inherits locks from earlier operations of the transaction gives up
    /// after a few restarts rather than wait out of order.
    pub(crate) fn acquire_with<F>(&mut self, mut wanted: F) -> Result<()>
    where
        F: FnMut() -> Vec<(NodeId, NodeHandle)>,
    {
        let checkpoint = self.locks.checkpoint();
        let mut restarts = 0;
        loop {
            let mut missing: Vec<_> = wanted()
                .into_iter()
                .filter(|(id, _)| !self.locks.is_held(id))
                .collect();
            if missing.is_empty() {
                return Ok(());
            }
            missing.sort_by(|a, b| a.0.cmp(&b.0));

            let mut contended = false;
            for (id, cell) in &missing {
                let in_order = self.locks.highest().map_or(true, |h| *id > h);
                if in_order {
                    self.locks.lock(*id, cell).map_err(lock_error)?;
                } else if !self.locks.try_lock(*id, cell) {
                    contended = true;
                    break;
                }
            }
            if !contended {
                continue;
            }

            restarts += 1;
            if checkpoint.is_origin() || restarts <= MAX_ORDERED_RESTARTS {
                let released = self.locks.release_to(checkpoint);
                debug!(restarts, released, "lock plan contended, restarting in order");
                std::thread::yield_now();
            } else if let Err(e) = self.locks.lock_all(missing) {
                warn!(restarts, error = %e, "lock plan contended below inherited locks");
                self.locks.release_to(checkpoint);
                return Err(lock_error(e));
            }
        }
    }

    /// Lock one node on demand.
    ///
    /// A read-only transaction that meets a contended node below one it
    /// already holds drops its locks and takes them all again in order.
    pub(crate) fn lock_one(&mut self, id: NodeId, cell: &NodeHandle) -> Result<()> {
        match self.locks.lock(id, cell) {
            Ok(_) => Ok(()),
            Err(LockError::OutOfOrder { .. }) if self.is_read_only() => {
                self.locks.relock_in_order(id, cell).map_err(lock_error)?;
                Ok(())
            }
            Err(e) => Err(lock_error(e)),
        }
    }

    pub(crate) fn cell(&self, id: &NodeId) -> Option<NodeHandle> {
        self.locks.cell(id)
    }

    /// Identity of `cell` if this transaction already holds it.
    pub(crate) fn held_key_of(&self, cell: &NodeHandle) -> Option<NodeId> {
        self.locks
            .keys()
            .copied()
            .find(|id| self.locks.cell(id).is_some_and(|c| Arc::ptr_eq(&c, cell)))
    }

    /// Unlock everything, publish root notifications and dispatch queued
    /// function calls. Returns the number of nodes that were locked.
    pub fn release(&mut self) -> usize {
        let released = self.locks.release_all();
        self.scope.reset();

        let roots = std::mem::take(&mut self.roots);
        let inner = self.universe.inner();
        inner.observers.publish(&roots);
        self.calls
            .dispatch_all(&inner.functions, &inner.pool, &[&self.barrier, &inner.inflight]);
        released
    }

    /// [`release`](Self::release), then wait for every dispatched callback.
    pub fn release_and_wait(&mut self) -> Result<usize> {
        let released = self.release();
        self.barrier.wait();
        let failures = self.barrier.take_failures();
        if failures.is_empty() {
            Ok(released)
        } else {
            Err(CrlGraphError::CallbackFailed(failures.join("; ")))
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("universe", &self.universe.id())
            .field("locks", &self.locks)
            .field("pending_calls", &self.calls.pending_len())
            .finish()
    }
}

pub(crate) fn lock_error(e: LockError<NodeId>) -> CrlGraphError {
    match e {
        LockError::Timeout { key, waited } => CrlGraphError::LockTimeout {
            node: key,
            waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
        },
        LockError::OutOfOrder { key } => CrlGraphError::LockOrder { node: key },
    }
}
