use parking_lot::RwLock;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

use crlgraph_concurrent::{CompletionBarrier, LockMode, WorkerPool};
use crlgraph_core::{
    ChangeNotification, ConceptNode, CrlGraphError, HomeRef, Identifiable, KindTag,
    NatureOfChange, NodeHome, NodeId, NodeState, Owned, PointerRole, Pointerish, Result,
    UniverseConfig, UniverseId, Versioned,
};

use crate::functions::{FunctionCall, FunctionRegistry};
use crate::observer::{GraphEvent, GraphObserver, ObserverHub};
use crate::registry::{IndexKey, NodeHandle, Registry};
use crate::transaction::Transaction;
use crate::undo::{UndoEntry, UndoKind, UndoManager};

/// Callback failures kept for [`Universe::wait_idle`]; later ones are counted.
const MAX_RETAINED_FAILURES: usize = 64;

pub(crate) struct UniverseInner {
    pub(crate) id: UniverseId,
    pub(crate) config: UniverseConfig,
    pub(crate) registry: RwLock<Registry>,
    pub(crate) undo: UndoManager,
    pub(crate) functions: FunctionRegistry,
    pub(crate) observers: ObserverHub,
    pub(crate) pool: WorkerPool,
    /// Every dispatched callback, across transactions.
    pub(crate) inflight: Arc<CompletionBarrier>,
}

impl NodeHome for UniverseInner {
    fn universe_id(&self) -> UniverseId {
        self.id
    }

    fn release_node(&self, snapshot: &NodeState) {
        let removed = self.registry.write().remove(&snapshot.id());
        if let Some(handle) = removed {
            self.undo.record_deletion(snapshot.clone(), handle);
            info!(universe = %self.id, node = %snapshot.id(), "node released to another universe");
        }
    }
}

/// Registry and lock domain for one connected set of concept nodes.
///
/// Cheap to clone; clones share the same graph.
#[derive(Clone)]
pub struct Universe {
    inner: Arc<UniverseInner>,
}

impl Universe {
    pub fn new(config: UniverseConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| CrlGraphError::Config(format!("{e:#}")))?;
        let pool = WorkerPool::new(config.dispatch_threads)
            .map_err(|e| CrlGraphError::Config(format!("dispatch pool: {e}")))?;
        let id = Uuid::new_v4();
        info!(
            universe = %id,
            recording_undo = config.recording_undo,
            dispatch_threads = pool.threads(),
            "universe of discourse created"
        );
        Ok(Self {
            inner: Arc::new(UniverseInner {
                id,
                observers: ObserverHub::new(id, config.observer_channel_capacity),
                undo: UndoManager::new(config.recording_undo),
                registry: RwLock::new(Registry::default()),
                functions: FunctionRegistry::new(),
                inflight: CompletionBarrier::with_failure_limit(MAX_RETAINED_FAILURES),
                pool,
                config,
            }),
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(UniverseConfig::default())
    }

    pub fn id(&self) -> UniverseId {
        self.inner.id
    }

    pub fn config(&self) -> &UniverseConfig {
        &self.inner.config
    }

    pub(crate) fn inner(&self) -> &UniverseInner {
        &self.inner
    }

    fn home_ref(&self) -> HomeRef {
        let home: Arc<dyn NodeHome> = self.inner.clone();
        HomeRef::new(&home)
    }

    /// Start an exclusive transaction.
    pub fn begin(&self) -> Transaction {
        Transaction::new(self.clone(), LockMode::Exclusive)
    }

    /// Start a shared transaction; mutators reject it.
    pub fn begin_read(&self) -> Transaction {
        Transaction::new(self.clone(), LockMode::Shared)
    }

    // ---- reactive functions and observers ----

    pub fn functions(&self) -> &FunctionRegistry {
        &self.inner.functions
    }

    pub fn register_function<F>(&self, uri: impl Into<String>, callback: F)
    where
        F: Fn(&FunctionCall) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.functions.register(uri, callback);
    }

    pub fn add_observer(&self, observer: Arc<dyn GraphObserver>) {
        self.inner.observers.add(observer);
    }

    pub fn remove_observer(&self, observer: &Arc<dyn GraphObserver>) -> bool {
        self.inner.observers.remove(observer)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<GraphEvent> {
        self.inner.observers.subscribe()
    }

    /// Wait for every dispatched callback of every transaction.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> Result<()> {
        let drained = match timeout {
            Some(t) => self.inner.inflight.wait_timeout(t),
            None => {
                self.inner.inflight.wait();
                true
            }
        };
        let failures = self.inner.inflight.take_failures();
        if !failures.is_empty() {
            return Err(CrlGraphError::CallbackFailed(failures.join("; ")));
        }
        if !drained {
            return Err(CrlGraphError::invalid_operation(format!(
                "{} reactive calls still running",
                self.inner.inflight.pending()
            )));
        }
        Ok(())
    }

    // ---- registry lookups (no node locks) ----

    pub fn get_node(&self, id: NodeId) -> Option<NodeHandle> {
        self.inner.registry.read().get(&id).cloned()
    }

    pub fn get_node_by_uri(&self, uri: &str) -> Option<NodeHandle> {
        self.inner.registry.read().by_uri(uri).cloned()
    }

    pub(crate) fn uri_holder(&self, uri: &str) -> Option<NodeId> {
        self.inner.registry.read().id_by_uri(uri)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.inner.registry.read().contains(&id)
    }

    pub fn node_count(&self) -> usize {
        self.inner.registry.read().len()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.inner.registry.read().ids().copied().collect()
    }

    /// Pointer nodes whose cached target is `target`.
    pub fn listeners_of(&self, target: NodeId) -> Vec<NodeId> {
        self.inner.registry.read().listeners(target).to_vec()
    }

    pub(crate) fn index_key(&self, id: NodeId) -> Option<IndexKey> {
        self.inner.registry.read().key(&id).cloned()
    }

    pub(crate) fn role_child_indexed(&self, owner: NodeId, role: PointerRole) -> Option<NodeId> {
        self.inner.registry.read().role_child(owner, role)
    }

    // ---- undo controls ----

    pub fn mark_undo_point(&self) {
        self.inner.undo.record_marker();
    }

    pub fn set_recording_undo(&self, recording: bool) {
        self.inner.undo.set_recording(recording);
    }

    pub fn is_recording_undo(&self) -> bool {
        self.inner.undo.is_recording()
    }

    pub fn undo_depth(&self) -> usize {
        self.inner.undo.undo_depth()
    }

    pub fn redo_depth(&self) -> usize {
        self.inner.undo.redo_depth()
    }

    // ---- transaction plumbing ----

    pub(crate) fn check(&self, tx: &Transaction) -> Result<()> {
        if tx.universe_id() != self.inner.id {
            return Err(CrlGraphError::invalid_argument(format!(
                "transaction belongs to universe {}, not {}",
                tx.universe_id(),
                self.inner.id
            )));
        }
        Ok(())
    }

    /// Entry point of every public mutator.
    pub(crate) fn begin_op(&self, tx: &mut Transaction, op: &'static str) -> Result<()> {
        self.check(tx)?;
        if tx.is_read_only() {
            return Err(CrlGraphError::invalid_operation(format!(
                "{op} needs an exclusive transaction"
            )));
        }
        tx.scope.reset();
        debug!(op, held = tx.held(), "operation started");
        Ok(())
    }

    /// Nodes registered here or already held by `tx`.
    pub(crate) fn is_known(&self, tx: &Transaction, id: NodeId) -> bool {
        tx.is_held(&id) || self.contains(id)
    }

    pub(crate) fn require_known(&self, tx: &Transaction, id: NodeId) -> Result<()> {
        if id.is_nil() {
            return Err(CrlGraphError::invalid_argument("nil node identity"));
        }
        if !self.is_known(tx, id) {
            return Err(CrlGraphError::invalid_argument(format!("unknown node {id}")));
        }
        Ok(())
    }

    fn ensure_held(&self, tx: &mut Transaction, id: NodeId) -> Result<()> {
        if tx.is_held(&id) {
            return Ok(());
        }
        let handle = self
            .get_node(id)
            .ok_or_else(|| CrlGraphError::invalid_argument(format!("unknown node {id}")))?;
        tx.lock_one(id, &handle)
    }

    pub(crate) fn held<'t>(&self, tx: &'t mut Transaction, id: NodeId) -> Result<&'t NodeState> {
        self.ensure_held(tx, id)?;
        tx.locks
            .get(&id)
            .ok_or_else(|| CrlGraphError::InconsistentState(format!("node {id} lost its lock")))
    }

    pub(crate) fn held_mut<'t>(
        &self,
        tx: &'t mut Transaction,
        id: NodeId,
    ) -> Result<&'t mut NodeState> {
        self.ensure_held(tx, id)?;
        tx.locks
            .get_mut(&id)
            .ok_or_else(|| CrlGraphError::invalid_operation(format!("node {id} is held read-only")))
    }

    /// Every node an operation seeded with `seeds` may touch: the seeds, their
    /// owner chains, the pointers listening to any of those (transitively),
    /// and a refinement's refined pointer and element. `plain` nodes are
    /// locked without expansion. With `subtree`, owned descendants of the
    /// seeds are expanded too.
    pub(crate) fn lock_plan(
        &self,
        seeds: &[NodeId],
        plain: &[NodeId],
        subtree: bool,
    ) -> Vec<(NodeId, NodeHandle)> {
        let reg = self.inner.registry.read();
        let mut queue: VecDeque<NodeId> = seeds.iter().copied().collect();
        if subtree {
            let mut seen: HashSet<NodeId> = seeds.iter().copied().collect();
            let mut stack: Vec<NodeId> = seeds.to_vec();
            while let Some(id) = stack.pop() {
                for child in reg.children(&id) {
                    if seen.insert(child) {
                        queue.push_back(child);
                        stack.push(child);
                    }
                }
            }
        }

        let mut planned: BTreeSet<NodeId> = BTreeSet::new();
        while let Some(id) = queue.pop_front() {
            if !reg.contains(&id) || !planned.insert(id) {
                continue;
            }
            let Some(key) = reg.key(&id) else { continue };
            if let Some(owner) = key.owner {
                queue.push_back(owner);
            }
            queue.extend(reg.listeners(id).iter().copied());
            if key.kind == KindTag::Refinement {
                if let Some(rp) = reg.role_child(id, PointerRole::Refined) {
                    queue.push_back(rp);
                    if let Some(target) = reg.key(&rp).and_then(IndexKey::target) {
                        queue.push_back(target);
                    }
                }
            }
        }
        planned.extend(plain.iter().copied().filter(|id| reg.contains(id)));

        planned
            .into_iter()
            .filter_map(|id| reg.get(&id).map(|h| (id, h.clone())))
            .collect()
    }

    pub(crate) fn acquire(
        &self,
        tx: &mut Transaction,
        seeds: &[NodeId],
        plain: &[NodeId],
        subtree: bool,
    ) -> Result<()> {
        tx.acquire_with(|| self.lock_plan(seeds, plain, subtree))
    }

    /// Push the structural fields of a held node into the registry mirror.
    pub(crate) fn sync_index(&self, tx: &mut Transaction, id: NodeId) -> Result<()> {
        let state = self.held(tx, id)?;
        self.inner.registry.write().sync(state);
        Ok(())
    }

    /// Record an undo snapshot of `id`, once per operation.
    pub(crate) fn pre_change(&self, tx: &mut Transaction, id: NodeId) -> Result<()> {
        if !self.inner.undo.is_recording()
            || tx.scope.created.contains(&id)
            || tx.scope.snapshotted.contains(&id)
        {
            return Ok(());
        }
        let snapshot = self.held(tx, id)?.clone();
        tx.scope.snapshotted.insert(id);
        if let Some(handle) = tx.cell(&id) {
            self.inner.undo.record_change(snapshot, handle);
        }
        Ok(())
    }

    /// Increment the version of `id`, once per operation.
    pub(crate) fn bump(&self, tx: &mut Transaction, id: NodeId) -> Result<u64> {
        let first = tx.scope.bumped.insert(id);
        let state = self.held_mut(tx, id)?;
        Ok(if first {
            state.increment_version()
        } else {
            state.version()
        })
    }

    /// Register a node built inside the current operation.
    pub(crate) fn register(&self, tx: &mut Transaction, mut state: NodeState) -> Result<NodeId> {
        let id = state.id();
        if id.is_nil() {
            return Err(CrlGraphError::invalid_argument("nil node identity"));
        }
        if self.contains(id) {
            return Err(CrlGraphError::invalid_argument(format!(
                "node {id} is already registered"
            )));
        }
        state.set_home(self.home_ref());
        let handle: NodeHandle = Arc::new(RwLock::new(state));
        tx.lock_one(id, &handle)?;
        {
            let state = self.held(tx, id)?;
            self.inner.registry.write().insert(handle.clone(), state);
        }
        tx.scope.created.insert(id);
        tx.scope.snapshotted.insert(id);
        self.inner.undo.record_creation(id, handle);
        Ok(id)
    }

    /// Register a batch of nodes as one unit. Either every node is inserted
    /// or none is; collisions are checked under the same registry write lock
    /// that performs the inserts.
    pub(crate) fn register_all(
        &self,
        tx: &mut Transaction,
        states: Vec<NodeState>,
    ) -> Result<Vec<NodeId>> {
        let mut handles: Vec<(NodeId, NodeHandle)> = Vec::with_capacity(states.len());
        for mut state in states {
            let id = state.id();
            if id.is_nil() || tx.is_held(&id) {
                self.unlock_unregistered(tx, &handles);
                return Err(CrlGraphError::invalid_argument(format!(
                    "node {id} cannot be registered"
                )));
            }
            state.set_home(self.home_ref());
            let handle: NodeHandle = Arc::new(RwLock::new(state));
            if let Err(e) = tx.lock_one(id, &handle) {
                self.unlock_unregistered(tx, &handles);
                return Err(e);
            }
            handles.push((id, handle));
        }

        {
            let mut registry = self.inner.registry.write();
            let collision = handles.iter().find_map(|(id, _)| {
                if registry.contains(id) {
                    return Some(format!("node {id} is already registered"));
                }
                let uri = tx.locks.get(id).and_then(|s| s.uri())?;
                registry
                    .id_by_uri(uri)
                    .map(|_| format!("uri {uri} is already in use"))
            });
            if let Some(reason) = collision {
                drop(registry);
                self.unlock_unregistered(tx, &handles);
                return Err(CrlGraphError::InvalidArgument(reason));
            }
            for (id, handle) in &handles {
                if let Some(state) = tx.locks.get(id) {
                    registry.insert(handle.clone(), state);
                }
            }
        }

        let mut ids = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            tx.scope.created.insert(id);
            tx.scope.snapshotted.insert(id);
            self.inner.undo.record_creation(id, handle);
            ids.push(id);
        }
        Ok(ids)
    }

    fn unlock_unregistered(&self, tx: &mut Transaction, handles: &[(NodeId, NodeHandle)]) {
        for (id, _) in handles {
            tx.locks.release(id);
        }
    }

    /// Queue a root notification for observers without propagating it.
    pub(crate) fn announce(
        &self,
        tx: &mut Transaction,
        id: NodeId,
        nature: NatureOfChange,
        origin: &'static str,
    ) -> Result<()> {
        let state = self.held(tx, id)?;
        let root = ChangeNotification::new(id, state.kind_tag(), state.version(), nature, origin, None);
        tx.roots.push(root);
        Ok(())
    }

    // ---- registry mutation ----

    /// Register an existing node. A node still living in another universe
    /// is released there first.
    pub fn add_node(&self, tx: &mut Transaction, node: NodeHandle) -> Result<NodeId> {
        self.begin_op(tx, "add_node")?;
        let id = match tx.held_key_of(&node) {
            Some(id) => id,
            None => node.read().id(),
        };
        if id.is_nil() {
            return Err(CrlGraphError::invalid_argument("nil node identity"));
        }
        if let Some(existing) = self.get_node(id) {
            if Arc::ptr_eq(&existing, &node) {
                return Ok(id);
            }
            return Err(CrlGraphError::invalid_argument(format!(
                "a different node with id {id} is already registered"
            )));
        }

        tx.lock_one(id, &node)?;
        let (previous, snapshot) = {
            let state = self.held(tx, id)?;
            (state.home().clone(), state.clone())
        };
        if let Some(other) = previous.universe_id().filter(|u| *u != self.inner.id) {
            if let Some(home) = previous.upgrade() {
                debug!(node = %id, from = %other, to = %self.inner.id, "adopting node");
                home.release_node(&snapshot);
            }
        }

        self.held_mut(tx, id)?.set_home(self.home_ref());
        {
            let state = self.held(tx, id)?;
            self.inner.registry.write().insert(node.clone(), state);
        }
        tx.scope.created.insert(id);
        self.inner.undo.record_creation(id, node);
        self.announce(tx, id, NatureOfChange::Add, "add_node")?;
        Ok(id)
    }

    /// Drop a node from the registry. Returns `false` if it was not registered.
    pub fn remove_node(&self, tx: &mut Transaction, id: NodeId) -> Result<bool> {
        self.begin_op(tx, "remove_node")?;
        if id.is_nil() {
            return Err(CrlGraphError::invalid_argument("nil node identity"));
        }
        if !self.contains(id) {
            return Ok(false);
        }
        self.ensure_held(tx, id)?;
        self.unregister_held(tx, id, true)?;
        self.announce(tx, id, NatureOfChange::Remove, "remove_node")?;
        Ok(true)
    }

    /// Remove a held node from the registry, optionally recording a Deletion.
    pub(crate) fn unregister_held(&self, tx: &mut Transaction, id: NodeId, record: bool) -> Result<()> {
        let snapshot = self.held(tx, id)?.clone();
        let removed = self.inner.registry.write().remove(&id);
        self.held_mut(tx, id)?.set_home(HomeRef::default());
        if let (true, Some(handle)) = (record, removed) {
            self.inner.undo.record_deletion(snapshot, handle);
        }
        Ok(())
    }

    fn reregister_held(&self, tx: &mut Transaction, id: NodeId, handle: &NodeHandle) -> Result<()> {
        self.held_mut(tx, id)?.set_home(self.home_ref());
        let state = self.held(tx, id)?;
        self.inner.registry.write().insert(handle.clone(), state);
        Ok(())
    }

    // ---- reads ----

    /// Run `f` against a consistent view of `id`, locking it for the rest of
    /// the transaction. `None` when no such node exists.
    pub fn read<R>(
        &self,
        tx: &mut Transaction,
        id: NodeId,
        f: impl FnOnce(&NodeState) -> R,
    ) -> Result<Option<R>> {
        self.check(tx)?;
        if !tx.is_held(&id) {
            let Some(handle) = self.get_node(id) else {
                return Ok(None);
            };
            tx.lock_one(id, &handle)?;
        }
        Ok(tx.locks.get(&id).map(f))
    }

    pub fn snapshot(&self, tx: &mut Transaction, id: NodeId) -> Result<Option<NodeState>> {
        self.read(tx, id, NodeState::clone)
    }

    pub fn version(&self, tx: &mut Transaction, id: NodeId) -> Result<Option<u64>> {
        self.read(tx, id, |s| s.version())
    }

    pub fn kind(&self, tx: &mut Transaction, id: NodeId) -> Result<Option<KindTag>> {
        self.read(tx, id, |s| s.kind_tag())
    }

    pub fn owner(&self, tx: &mut Transaction, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.read(tx, id, |s| s.owner())?.flatten())
    }

    pub fn owned(&self, tx: &mut Transaction, id: NodeId) -> Result<Vec<NodeId>> {
        Ok(self
            .read(tx, id, |s| s.owned().iter().copied().collect::<Vec<_>>())?
            .unwrap_or_default())
    }

    pub fn uri(&self, tx: &mut Transaction, id: NodeId) -> Result<Option<String>> {
        Ok(self.read(tx, id, |s| s.uri().map(str::to_string))?.flatten())
    }

    pub fn literal_value(&self, tx: &mut Transaction, id: NodeId) -> Result<Option<String>> {
        Ok(self
            .read(tx, id, |s| s.literal_value().map(str::to_string))?
            .flatten())
    }

    pub fn pointer_role(&self, tx: &mut Transaction, id: NodeId) -> Result<Option<PointerRole>> {
        Ok(self.read(tx, id, |s| s.role())?.flatten())
    }

    pub fn pointer_target(&self, tx: &mut Transaction, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.read(tx, id, |s| s.target())?.flatten())
    }

    pub fn pointer_target_version(&self, tx: &mut Transaction, id: NodeId) -> Result<Option<u64>> {
        Ok(self.read(tx, id, |s| s.target_version())?.flatten())
    }

    /// Resolve a pointer's cached target identity through the registry.
    pub fn resolve_target(&self, tx: &mut Transaction, pointer: NodeId) -> Result<Option<NodeHandle>> {
        Ok(self
            .pointer_target(tx, pointer)?
            .and_then(|target| self.get_node(target)))
    }

    // ---- undo / redo ----

    /// Revert the most recent undoable group. A no-op on an empty history.
    pub fn undo(&self, tx: &mut Transaction) -> Result<usize> {
        self.begin_op(tx, "undo")?;
        let group = self.inner.undo.take_undo_group();
        if group.is_empty() {
            return Ok(0);
        }
        self.lock_entries(tx, &group)?;

        let mut redo = Vec::with_capacity(group.len());
        for entry in group {
            let (Some(id), Some(handle)) = (entry.node_id(), entry.handle().cloned()) else {
                continue;
            };
            match entry.kind() {
                UndoKind::Creation => {
                    self.unregister_held(tx, id, false)?;
                    self.announce(tx, id, NatureOfChange::Remove, "undo")?;
                    redo.push(entry);
                }
                UndoKind::Deletion => {
                    if self.restore(tx, id, &entry)? {
                        self.reregister_held(tx, id, &handle)?;
                        self.announce(tx, id, NatureOfChange::Add, "undo")?;
                        redo.push(entry);
                    }
                }
                UndoKind::Change => {
                    let current = self.held(tx, id)?.clone();
                    if self.restore(tx, id, &entry)? {
                        self.sync_index(tx, id)?;
                        self.announce(tx, id, NatureOfChange::Modify, "undo")?;
                        redo.push(UndoEntry::change(current, handle));
                    }
                }
                UndoKind::Marker => {}
            }
        }
        let applied = redo.len();
        self.inner.undo.push_redo(redo);
        debug!(applied, "undo applied");
        Ok(applied)
    }

    /// Replay the most recently undone group. A no-op on an empty history.
    pub fn redo(&self, tx: &mut Transaction) -> Result<usize> {
        self.begin_op(tx, "redo")?;
        let group = self.inner.undo.take_redo_group();
        if group.is_empty() {
            return Ok(0);
        }
        self.lock_entries(tx, &group)?;

        let mut undo = Vec::with_capacity(group.len());
        for entry in group {
            let (Some(id), Some(handle)) = (entry.node_id(), entry.handle().cloned()) else {
                continue;
            };
            match entry.kind() {
                UndoKind::Creation => {
                    self.reregister_held(tx, id, &handle)?;
                    self.announce(tx, id, NatureOfChange::Add, "redo")?;
                    undo.push(entry);
                }
                UndoKind::Deletion => {
                    self.unregister_held(tx, id, false)?;
                    self.announce(tx, id, NatureOfChange::Remove, "redo")?;
                    undo.push(entry);
                }
                UndoKind::Change => {
                    let current = self.held(tx, id)?.clone();
                    if self.restore(tx, id, &entry)? {
                        self.sync_index(tx, id)?;
                        self.announce(tx, id, NatureOfChange::Modify, "redo")?;
                        undo.push(UndoEntry::change(current, handle));
                    }
                }
                UndoKind::Marker => {}
            }
        }
        let applied = undo.len();
        self.inner.undo.push_undo(undo);
        debug!(applied, "redo applied");
        Ok(applied)
    }

    fn lock_entries(&self, tx: &mut Transaction, entries: &[UndoEntry]) -> Result<()> {
        tx.acquire_with(|| {
            entries
                .iter()
                .filter_map(|e| e.node_id().zip(e.handle().cloned()))
                .collect()
        })
    }

    /// Copy the entry's snapshot onto the live node. A kind mismatch is
    /// logged and the step skipped.
    fn restore(&self, tx: &mut Transaction, id: NodeId, entry: &UndoEntry) -> Result<bool> {
        let Some(prior) = entry.prior() else {
            return Ok(false);
        };
        match self.held_mut(tx, id)?.restore_from(prior) {
            Ok(()) => Ok(true),
            Err(e) => {
                error!(node = %id, error = %e, "skipping undo step");
                Ok(false)
            }
        }
    }
}

impl fmt::Debug for Universe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Universe")
            .field("id", &self.inner.id)
            .field("nodes", &self.node_count())
            .field("functions", &self.inner.functions)
            .finish()
    }
}
