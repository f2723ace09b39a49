use parking_lot::Mutex;
use std::fmt;

use crlgraph_core::{Identifiable, NodeId, NodeState};

use crate::registry::NodeHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoKind {
    Marker,
    Creation,
    Deletion,
    Change,
}

/// One recorded step. `prior` is the field snapshot to restore, `node` the
/// live node it is restored onto.
#[derive(Clone)]
pub struct UndoEntry {
    kind: UndoKind,
    prior: Option<NodeState>,
    node: Option<(NodeId, NodeHandle)>,
}

impl UndoEntry {
    pub fn marker() -> Self {
        Self {
            kind: UndoKind::Marker,
            prior: None,
            node: None,
        }
    }

    pub fn creation(id: NodeId, node: NodeHandle) -> Self {
        Self {
            kind: UndoKind::Creation,
            prior: None,
            node: Some((id, node)),
        }
    }

    pub fn deletion(prior: NodeState, node: NodeHandle) -> Self {
        Self {
            kind: UndoKind::Deletion,
            node: Some((prior.id(), node)),
            prior: Some(prior),
        }
    }

    pub fn change(prior: NodeState, node: NodeHandle) -> Self {
        Self {
            kind: UndoKind::Change,
            node: Some((prior.id(), node)),
            prior: Some(prior),
        }
    }

    pub fn kind(&self) -> UndoKind {
        self.kind
    }

    pub fn prior(&self) -> Option<&NodeState> {
        self.prior.as_ref()
    }

    pub fn node_id(&self) -> Option<NodeId> {
        self.node.as_ref().map(|(id, _)| *id)
    }

    pub fn handle(&self) -> Option<&NodeHandle> {
        self.node.as_ref().map(|(_, h)| h)
    }
}

impl fmt::Debug for UndoEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UndoEntry")
            .field("kind", &self.kind)
            .field("node", &self.node_id())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct UndoStack {
    entries: Vec<UndoEntry>,
}

impl UndoStack {
    pub fn push(&mut self, entry: UndoEntry) {
        self.entries.push(entry);
    }

    pub fn pop(&mut self) -> Option<UndoEntry> {
        self.entries.pop()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Default)]
struct UndoState {
    recording: bool,
    undo: UndoStack,
    redo: UndoStack,
}

/// Marker-delimited history of graph mutations.
///
/// The manager only moves entries between its two stacks. Applying an entry
/// to the live graph is the universe's job, since that needs node locks and
/// the registry, neither of which may be waited on while this mutex is held.
#[derive(Debug, Default)]
pub struct UndoManager {
    state: Mutex<UndoState>,
}

impl UndoManager {
    pub fn new(recording: bool) -> Self {
        Self {
            state: Mutex::new(UndoState {
                recording,
                ..UndoState::default()
            }),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.state.lock().recording
    }

    pub fn set_recording(&self, recording: bool) {
        self.state.lock().recording = recording;
    }

    pub fn record_marker(&self) {
        let mut state = self.state.lock();
        if state.recording {
            state.undo.push(UndoEntry::marker());
        }
    }

    pub fn record_creation(&self, id: NodeId, node: NodeHandle) {
        self.record(UndoEntry::creation(id, node));
    }

    pub fn record_deletion(&self, prior: NodeState, node: NodeHandle) {
        self.record(UndoEntry::deletion(prior, node));
    }

    pub fn record_change(&self, prior: NodeState, node: NodeHandle) {
        self.record(UndoEntry::change(prior, node));
    }

    /// A fresh edit invalidates whatever could have been redone.
    fn record(&self, entry: UndoEntry) {
        let mut state = self.state.lock();
        if state.recording {
            state.undo.push(entry);
            state.redo.clear();
        }
    }

    pub fn undo_depth(&self) -> usize {
        self.state.lock().undo.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.state.lock().redo.len()
    }

    /// Pop the most recent undoable group, most recent entry first.
    ///
    /// A marker on top is consumed (moved to the redo stack) and popping
    /// continues; the next marker ends the group and stays on the undo stack.
    pub fn take_undo_group(&self) -> Vec<UndoEntry> {
        let mut state = self.state.lock();
        let mut group = Vec::new();
        let mut first = true;
        while let Some(entry) = state.undo.pop() {
            if entry.kind == UndoKind::Marker {
                if first {
                    state.redo.push(entry);
                } else {
                    state.undo.push(entry);
                    break;
                }
            } else {
                group.push(entry);
            }
            first = false;
        }
        group
    }

    /// Pop redo entries up to and including the next marker, which moves
    /// back onto the undo stack.
    pub fn take_redo_group(&self) -> Vec<UndoEntry> {
        let mut state = self.state.lock();
        let mut group = Vec::new();
        while let Some(entry) = state.redo.pop() {
            if entry.kind == UndoKind::Marker {
                state.undo.push(entry);
                break;
            }
            group.push(entry);
        }
        group
    }

    /// Entries produced while replaying an undo group, in replay order.
    pub fn push_redo(&self, entries: Vec<UndoEntry>) {
        let mut state = self.state.lock();
        for entry in entries {
            state.redo.push(entry);
        }
    }

    /// Entries produced while replaying a redo group, in replay order.
    pub fn push_undo(&self, entries: Vec<UndoEntry>) {
        let mut state = self.state.lock();
        for entry in entries {
            state.undo.push(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crlgraph_core::NodeKind;
    use parking_lot::RwLock;
    use std::sync::Arc;

    fn node() -> (NodeState, NodeHandle) {
        let state = NodeState::new(NodeKind::Element);
        let handle = Arc::new(RwLock::new(state.clone()));
        (state, handle)
    }

    #[test]
    fn not_recording_records_nothing() {
        let mgr = UndoManager::new(false);
        let (state, handle) = node();
        mgr.record_marker();
        mgr.record_change(state, handle);
        assert_eq!(mgr.undo_depth(), 0);
    }

    #[test]
    fn leading_marker_is_consumed_and_next_marker_stops() {
        let mgr = UndoManager::new(true);
        let (a, ha) = node();
        let (b, hb) = node();
        mgr.record_creation(a.id(), ha);
        mgr.record_marker();
        mgr.record_change(b.clone(), hb.clone());
        mgr.record_change(b, hb);
        mgr.record_marker();

        let group = mgr.take_undo_group();
        assert_eq!(group.len(), 2);
        assert!(group.iter().all(|e| e.kind() == UndoKind::Change));
        // creation + the marker that delimited it
        assert_eq!(mgr.undo_depth(), 2);
        // the consumed leading marker
        assert_eq!(mgr.redo_depth(), 1);

        let group = mgr.take_undo_group();
        assert_eq!(group.len(), 1);
        assert_eq!(group[0].kind(), UndoKind::Creation);
        assert_eq!(mgr.undo_depth(), 0);
    }

    #[test]
    fn redo_moves_marker_back() {
        let mgr = UndoManager::new(true);
        let (a, ha) = node();
        mgr.push_redo(vec![UndoEntry::change(a, ha)]);
        mgr.state.lock().redo.push(UndoEntry::marker());
        let group = mgr.take_redo_group();
        assert!(group.is_empty());
        assert_eq!(mgr.undo_depth(), 1);
        let group = mgr.take_redo_group();
        assert_eq!(group.len(), 1);
        assert_eq!(mgr.redo_depth(), 0);
    }

    #[test]
    fn new_edit_clears_redo() {
        let mgr = UndoManager::new(true);
        let (a, ha) = node();
        mgr.push_redo(vec![UndoEntry::change(a.clone(), ha.clone())]);
        mgr.record_change(a, ha);
        assert_eq!(mgr.redo_depth(), 0);
    }

    #[test]
    fn empty_stacks_yield_empty_groups() {
        let mgr = UndoManager::new(true);
        assert!(mgr.take_undo_group().is_empty());
        assert!(mgr.take_redo_group().is_empty());
    }
}
