use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::{CrlGraphError, KindTag, NodeId, PointerRole, Result, UniverseId};

/// Cached cross-reference held by every pointer-kind node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerState {
    pub role: PointerRole,
    #[serde(default)]
    pub target: Option<NodeId>,
    #[serde(default)]
    pub target_version: u64,
}

impl PointerState {
    pub fn new(role: PointerRole) -> Self {
        Self {
            role,
            target: None,
            target_version: 0,
        }
    }
}

/// Closed set of concept kinds, tagged by `type` when serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeKind {
    Element,
    /// An element that owns a `Referenced` pointer.
    Reference,
    /// An element that owns an `Abstract` and a `Refined` pointer.
    Refinement,
    Literal {
        #[serde(default)]
        value: String,
    },
    Pointer(PointerState),
}

impl NodeKind {
    pub fn tag(&self) -> KindTag {
        match self {
            NodeKind::Element => KindTag::Element,
            NodeKind::Reference => KindTag::Reference,
            NodeKind::Refinement => KindTag::Refinement,
            NodeKind::Literal { .. } => KindTag::Literal,
            NodeKind::Pointer(_) => KindTag::Pointer,
        }
    }
}

/// The registry a node currently lives in.
///
/// Implemented by the universe so that a node adopted by another universe can
/// be released from its previous home without any process-wide state.
pub trait NodeHome: Send + Sync {
    fn universe_id(&self) -> UniverseId;

    /// Forget `snapshot.id()` because the node is moving to another registry.
    fn release_node(&self, snapshot: &NodeState);
}

#[derive(Clone, Default)]
pub struct HomeRef {
    home: Option<(UniverseId, Weak<dyn NodeHome>)>,
}

impl HomeRef {
    pub fn new(home: &Arc<dyn NodeHome>) -> Self {
        Self {
            home: Some((home.universe_id(), Arc::downgrade(home))),
        }
    }

    pub fn universe_id(&self) -> Option<UniverseId> {
        self.home.as_ref().map(|(id, _)| *id)
    }

    /// The home registry, if it is still alive.
    pub fn upgrade(&self) -> Option<Arc<dyn NodeHome>> {
        self.home.as_ref().and_then(|(_, weak)| weak.upgrade())
    }
}

impl fmt::Debug for HomeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.universe_id() {
            Some(id) => write!(f, "HomeRef({})", id),
            None => f.write_str("HomeRef(none)"),
        }
    }
}

pub trait Identifiable {
    fn id(&self) -> NodeId;
}

pub trait Versioned {
    fn version(&self) -> u64;
    fn set_version(&mut self, version: u64);

    fn increment_version(&mut self) -> u64 {
        let next = self.version().saturating_add(1);
        self.set_version(next);
        next
    }
}

pub trait Owned {
    fn owner(&self) -> Option<NodeId>;
    fn set_owner(&mut self, owner: Option<NodeId>);
    fn owned(&self) -> &BTreeSet<NodeId>;
    fn add_owned(&mut self, child: NodeId) -> bool;
    fn remove_owned(&mut self, child: NodeId) -> bool;
}

pub trait Pointerish {
    fn role(&self) -> Option<PointerRole>;
    fn target(&self) -> Option<NodeId>;
    fn target_version(&self) -> Option<u64>;
    fn set_target(&mut self, target: Option<NodeId>, target_version: u64) -> Result<()>;
    fn set_target_version(&mut self, target_version: u64) -> Result<()>;
}

/// Contract every graph node satisfies.
pub trait ConceptNode: Identifiable + Versioned + Owned + Pointerish + Clone {
    fn kind_tag(&self) -> KindTag;

    /// Field-level equality, ignoring which registry the node lives in.
    fn is_equivalent(&self, other: &Self) -> bool;

    /// Copy every field of `snapshot` onto `self` in place, keeping identity.
    fn restore_from(&mut self, snapshot: &Self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct NodeState {
    id: NodeId,
    version: u64,
    owner: Option<NodeId>,
    owned: BTreeSet<NodeId>,
    uri: Option<String>,
    kind: NodeKind,
    home: HomeRef,
}

impl NodeState {
    pub fn new(kind: NodeKind) -> Self {
        Self::with_id(uuid::Uuid::new_v4(), kind)
    }

    pub fn with_id(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            version: 0,
            owner: None,
            owned: BTreeSet::new(),
            uri: None,
            kind,
            home: HomeRef::default(),
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn set_uri(&mut self, uri: Option<String>) {
        self.uri = uri.filter(|u| !u.is_empty());
    }

    pub fn literal_value(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Literal { value } => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn set_literal_value(&mut self, new_value: impl Into<String>) -> Result<()> {
        match &mut self.kind {
            NodeKind::Literal { value } => {
                *value = new_value.into();
                Ok(())
            }
            other => Err(CrlGraphError::invalid_argument(format!(
                "node {} is a {}, not a literal",
                self.id,
                other.tag()
            ))),
        }
    }

    pub fn pointer(&self) -> Option<&PointerState> {
        match &self.kind {
            NodeKind::Pointer(p) => Some(p),
            _ => None,
        }
    }

    fn pointer_mut(&mut self) -> Result<&mut PointerState> {
        let id = self.id;
        match &mut self.kind {
            NodeKind::Pointer(p) => Ok(p),
            other => Err(CrlGraphError::invalid_argument(format!(
                "node {} is a {}, not a pointer",
                id,
                other.tag()
            ))),
        }
    }

    pub fn home(&self) -> &HomeRef {
        &self.home
    }

    pub fn set_home(&mut self, home: HomeRef) {
        self.home = home;
    }
}

impl Identifiable for NodeState {
    fn id(&self) -> NodeId {
        self.id
    }
}

impl Versioned for NodeState {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

impl Owned for NodeState {
    fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    fn set_owner(&mut self, owner: Option<NodeId>) {
        self.owner = owner;
    }

    fn owned(&self) -> &BTreeSet<NodeId> {
        &self.owned
    }

    fn add_owned(&mut self, child: NodeId) -> bool {
        self.owned.insert(child)
    }

    fn remove_owned(&mut self, child: NodeId) -> bool {
        self.owned.remove(&child)
    }
}

impl Pointerish for NodeState {
    fn role(&self) -> Option<PointerRole> {
        self.pointer().map(|p| p.role)
    }

    fn target(&self) -> Option<NodeId> {
        self.pointer().and_then(|p| p.target)
    }

    fn target_version(&self) -> Option<u64> {
        self.pointer().map(|p| p.target_version)
    }

    fn set_target(&mut self, target: Option<NodeId>, target_version: u64) -> Result<()> {
        let pointer = self.pointer_mut()?;
        pointer.target = target;
        pointer.target_version = if target.is_some() { target_version } else { 0 };
        Ok(())
    }

    fn set_target_version(&mut self, target_version: u64) -> Result<()> {
        self.pointer_mut()?.target_version = target_version;
        Ok(())
    }
}

impl ConceptNode for NodeState {
    fn kind_tag(&self) -> KindTag {
        self.kind.tag()
    }

    fn is_equivalent(&self, other: &Self) -> bool {
        self.id == other.id
            && self.version == other.version
            && self.owner == other.owner
            && self.owned == other.owned
            && self.uri == other.uri
            && self.kind == other.kind
    }

    fn restore_from(&mut self, snapshot: &Self) -> Result<()> {
        if self.kind_tag() != snapshot.kind_tag() {
            return Err(CrlGraphError::InconsistentState(format!(
                "cannot restore {} {} from a {} snapshot",
                self.kind_tag(),
                self.id,
                snapshot.kind_tag()
            )));
        }
        self.version = snapshot.version;
        self.owner = snapshot.owner;
        self.owned = snapshot.owned.clone();
        self.uri = snapshot.uri.clone();
        self.kind = snapshot.kind.clone();
        Ok(())
    }
}
