use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crlgraph_core::{
    ConceptNode, Identifiable, KindTag, NodeId, NodeState, Owned, PointerRole, Pointerish,
};

use crate::listeners::ListenerRegistry;

pub type NodeHandle = Arc<RwLock<NodeState>>;

/// Registry-side copy of the structural fields of one node.
///
/// Kept in step with the node under the node's own lock, so lock-set
/// planning and abstraction lookups never have to touch node locks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IndexKey {
    pub kind: KindTag,
    pub owner: Option<NodeId>,
    pub uri: Option<String>,
    pub pointer: Option<(PointerRole, Option<NodeId>)>,
}

impl IndexKey {
    pub fn of(state: &NodeState) -> Self {
        Self {
            kind: state.kind_tag(),
            owner: state.owner(),
            uri: state.uri().map(str::to_string),
            pointer: state.role().map(|role| (role, state.target())),
        }
    }

    pub fn target(&self) -> Option<NodeId> {
        self.pointer.and_then(|(_, t)| t)
    }

    pub fn role(&self) -> Option<PointerRole> {
        self.pointer.map(|(r, _)| r)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    nodes: HashMap<NodeId, NodeHandle>,
    uris: HashMap<String, NodeId>,
    mirror: HashMap<NodeId, IndexKey>,
    children: HashMap<NodeId, BTreeSet<NodeId>>,
    listeners: ListenerRegistry,
}

impl Registry {
    pub fn get(&self, id: &NodeId) -> Option<&NodeHandle> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn by_uri(&self, uri: &str) -> Option<&NodeHandle> {
        self.uris.get(uri).and_then(|id| self.nodes.get(id))
    }

    pub fn id_by_uri(&self, uri: &str) -> Option<NodeId> {
        self.uris.get(uri).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn key(&self, id: &NodeId) -> Option<&IndexKey> {
        self.mirror.get(id)
    }

    pub fn children(&self, id: &NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children.get(id).into_iter().flatten().copied()
    }

    pub fn listeners(&self, target: NodeId) -> &[NodeId] {
        self.listeners.listeners(target)
    }

    /// The owned pointer of `owner` carrying `role`, if any.
    pub fn role_child(&self, owner: NodeId, role: PointerRole) -> Option<NodeId> {
        self.children(&owner)
            .find(|c| self.mirror.get(c).and_then(IndexKey::role) == Some(role))
    }

    /// Refinements whose `role` pointer currently targets `element`.
    pub fn refinements_by(&self, element: NodeId, role: PointerRole) -> Vec<NodeId> {
        self.listeners(element)
            .iter()
            .filter_map(|p| self.mirror.get(p))
            .filter(|key| key.role() == Some(role))
            .filter_map(|key| key.owner)
            .filter(|r| self.mirror.get(r).map(|k| k.kind) == Some(KindTag::Refinement))
            .collect()
    }

    /// Elements that `element` refines directly.
    pub fn immediate_abstractions(&self, element: NodeId) -> Vec<NodeId> {
        self.refinements_by(element, PointerRole::Refined)
            .into_iter()
            .filter_map(|r| self.role_child(r, PointerRole::Abstract))
            .filter_map(|p| self.mirror.get(&p).and_then(IndexKey::target))
            .collect()
    }

    /// Transitive closure of [`immediate_abstractions`](Self::immediate_abstractions),
    /// nearest first. Cycles are tolerated.
    pub fn abstractions_recursively(&self, element: NodeId) -> Vec<NodeId> {
        let mut seen = HashSet::from([element]);
        let mut found = Vec::new();
        let mut queue = VecDeque::from([element]);
        while let Some(next) = queue.pop_front() {
            for abstraction in self.immediate_abstractions(next) {
                if seen.insert(abstraction) {
                    found.push(abstraction);
                    queue.push_back(abstraction);
                }
            }
        }
        found
    }

    pub fn insert(&mut self, handle: NodeHandle, state: &NodeState) {
        let id = state.id();
        self.nodes.insert(id, handle);
        self.reindex(id, Some(IndexKey::of(state)));
    }

    pub fn remove(&mut self, id: &NodeId) -> Option<NodeHandle> {
        let handle = self.nodes.remove(id)?;
        self.reindex(*id, None);
        Some(handle)
    }

    /// Refresh the structural mirror of a registered node.
    pub fn sync(&mut self, state: &NodeState) {
        let id = state.id();
        if self.nodes.contains_key(&id) {
            self.reindex(id, Some(IndexKey::of(state)));
        }
    }

    fn reindex(&mut self, id: NodeId, next: Option<IndexKey>) {
        let prev = match &next {
            Some(key) => self.mirror.insert(id, key.clone()),
            None => self.mirror.remove(&id),
        };
        if prev == next {
            return;
        }
        let (prev_owner, prev_uri, prev_target) = split(prev.as_ref());
        let (next_owner, next_uri, next_target) = split(next.as_ref());

        if prev_owner != next_owner {
            if let Some(old) = prev_owner {
                if let Some(set) = self.children.get_mut(&old) {
                    set.remove(&id);
                    if set.is_empty() {
                        self.children.remove(&old);
                    }
                }
            }
            if let Some(new) = next_owner {
                self.children.entry(new).or_default().insert(id);
            }
        }

        if prev_uri != next_uri {
            if let Some(old) = prev_uri {
                if self.uris.get(old) == Some(&id) {
                    self.uris.remove(old);
                }
            }
            if let Some(new) = next_uri {
                self.uris.insert(new.to_string(), id);
            }
        }

        self.listeners.retarget(id, prev_target, next_target);
    }
}

fn split(key: Option<&IndexKey>) -> (Option<NodeId>, Option<&str>, Option<NodeId>) {
    match key {
        Some(k) => (k.owner, k.uri.as_deref(), k.target()),
        None => (None, None, None),
    }
}
