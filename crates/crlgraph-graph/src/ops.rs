use tracing::debug;

use crlgraph_core::{
    ConceptNode, CrlGraphError, KindTag, NatureOfChange, NodeId, NodeKind, NodeState, Owned,
    PointerRole, PointerState, Pointerish, Result, Versioned,
};

use crate::transaction::Transaction;
use crate::universe::Universe;

/// Node constructors and mutators. Every public method here is one
/// operation: it locks what it needs, applies the change, records undo
/// snapshots and propagates notifications before returning.
impl Universe {
    // ---- constructors ----

    pub fn new_element(&self, tx: &mut Transaction, uri: Option<&str>) -> Result<NodeId> {
        self.begin_op(tx, "new_element")?;
        let id = self.create(tx, NodeKind::Element, uri)?;
        self.changed(tx, id, NatureOfChange::Add, "new_element")?;
        Ok(id)
    }

    pub fn new_literal(
        &self,
        tx: &mut Transaction,
        value: impl Into<String>,
        uri: Option<&str>,
    ) -> Result<NodeId> {
        self.begin_op(tx, "new_literal")?;
        let id = self.create(tx, NodeKind::Literal { value: value.into() }, uri)?;
        self.changed(tx, id, NatureOfChange::Add, "new_literal")?;
        Ok(id)
    }

    pub fn new_pointer(
        &self,
        tx: &mut Transaction,
        role: PointerRole,
        uri: Option<&str>,
    ) -> Result<NodeId> {
        self.begin_op(tx, "new_pointer")?;
        let id = self.create(tx, NodeKind::Pointer(PointerState::new(role)), uri)?;
        self.changed(tx, id, NatureOfChange::Add, "new_pointer")?;
        Ok(id)
    }

    /// A reference together with its (untargeted) referenced pointer.
    pub fn new_reference(&self, tx: &mut Transaction, uri: Option<&str>) -> Result<NodeId> {
        self.begin_op(tx, "new_reference")?;
        let id = self.create(tx, NodeKind::Reference, uri)?;
        self.create_role_pointer(tx, id, PointerRole::Referenced)?;
        self.changed(tx, id, NatureOfChange::Add, "new_reference")?;
        Ok(id)
    }

    /// A refinement together with its abstract and refined pointers.
    pub fn new_refinement(&self, tx: &mut Transaction, uri: Option<&str>) -> Result<NodeId> {
        self.begin_op(tx, "new_refinement")?;
        let id = self.create(tx, NodeKind::Refinement, uri)?;
        self.create_role_pointer(tx, id, PointerRole::Abstract)?;
        self.create_role_pointer(tx, id, PointerRole::Refined)?;
        self.changed(tx, id, NatureOfChange::Add, "new_refinement")?;
        Ok(id)
    }

    fn create(&self, tx: &mut Transaction, kind: NodeKind, uri: Option<&str>) -> Result<NodeId> {
        if let Some(uri) = uri.filter(|u| !u.is_empty()) {
            if self.uri_holder(uri).is_some() {
                return Err(CrlGraphError::invalid_argument(format!(
                    "uri {uri} is already in use"
                )));
            }
        }
        let mut state = NodeState::new(kind);
        state.set_uri(uri.map(str::to_string));
        self.register(tx, state)
    }

    fn create_role_pointer(
        &self,
        tx: &mut Transaction,
        owner: NodeId,
        role: PointerRole,
    ) -> Result<NodeId> {
        let pointer = self.create(tx, NodeKind::Pointer(PointerState::new(role)), None)?;
        self.attach(tx, pointer, Some(owner))?;
        Ok(pointer)
    }

    // ---- structural primitives (no notifications) ----

    /// Move `child` under `parent` in the owner/owned bookkeeping.
    fn attach(&self, tx: &mut Transaction, child: NodeId, parent: Option<NodeId>) -> Result<()> {
        let old = self.held(tx, child)?.owner();
        if old == parent {
            return Ok(());
        }
        self.pre_change(tx, child)?;
        if let Some(old) = old {
            if self.is_known(tx, old) {
                self.pre_change(tx, old)?;
                self.held_mut(tx, old)?.remove_owned(child);
            }
        }
        if let Some(parent) = parent {
            self.pre_change(tx, parent)?;
            self.held_mut(tx, parent)?.add_owned(child);
        }
        self.held_mut(tx, child)?.set_owner(parent);
        self.sync_index(tx, child)
    }

    /// Point `pointer` at `target`, caching the target's current version.
    fn retarget(&self, tx: &mut Transaction, pointer: NodeId, target: Option<NodeId>) -> Result<()> {
        self.pre_change(tx, pointer)?;
        let target_version = match target {
            Some(t) => self.held(tx, t)?.version(),
            None => 0,
        };
        self.held_mut(tx, pointer)?.set_target(target, target_version)?;
        self.sync_index(tx, pointer)
    }

    fn indexed_kind(&self, tx: &mut Transaction, id: NodeId) -> Result<KindTag> {
        self.require_known(tx, id)?;
        match self.index_key(id) {
            Some(key) => Ok(key.kind),
            None => Ok(self.held(tx, id)?.kind_tag()),
        }
    }

    // ---- ownership ----

    /// Make `new_owner` the owner of `child`, or detach it with `None`.
    pub fn set_owner(
        &self,
        tx: &mut Transaction,
        child: NodeId,
        new_owner: Option<NodeId>,
    ) -> Result<()> {
        self.begin_op(tx, "set_owner")?;
        self.set_owner_in_op(tx, child, new_owner)
    }

    fn set_owner_in_op(
        &self,
        tx: &mut Transaction,
        child: NodeId,
        new_owner: Option<NodeId>,
    ) -> Result<()> {
        let child_kind = self.indexed_kind(tx, child)?;
        if let Some(owner) = new_owner {
            if owner == child {
                return Err(CrlGraphError::invalid_argument(format!(
                    "node {child} cannot own itself"
                )));
            }
            let owner_kind = self.indexed_kind(tx, owner)?;
            if !owner_kind.is_element_like() {
                return Err(CrlGraphError::invalid_argument(format!(
                    "a {owner_kind} cannot own other nodes"
                )));
            }
        }

        let old_owner = self.index_key(child).and_then(|k| k.owner);
        let owning = child_kind
            .is_element_like()
            .then(|| self.role_child_indexed(child, PointerRole::Owning))
            .flatten();
        let seeds: Vec<NodeId> = [Some(child), old_owner, new_owner, owning]
            .into_iter()
            .flatten()
            .collect();
        self.acquire(tx, &seeds, &[], false)?;

        if let Some(owner) = new_owner {
            self.reject_ownership_cycle(tx, child, owner)?;
        }
        let old_owner = self.held(tx, child)?.owner();
        if old_owner == new_owner {
            return Ok(());
        }
        debug!(node = %child, from = ?old_owner, to = ?new_owner, "set owner");

        self.attach(tx, child, new_owner)?;
        if child_kind.is_element_like() {
            let owning = match self.role_child_indexed(child, PointerRole::Owning) {
                Some(p) => Some((p, NatureOfChange::Modify)),
                None if new_owner.is_some() => Some((
                    self.create_role_pointer(tx, child, PointerRole::Owning)?,
                    NatureOfChange::Add,
                )),
                None => None,
            };
            match owning {
                Some((pointer, nature)) => {
                    self.retarget(tx, pointer, new_owner)?;
                    self.changed(tx, pointer, nature, "set_owner")?;
                }
                None => self.changed(tx, child, NatureOfChange::Modify, "set_owner")?,
            }
        } else {
            self.changed(tx, child, NatureOfChange::Modify, "set_owner")?;
        }
        if let Some(old) = old_owner.filter(|o| self.is_known(tx, *o)) {
            self.changed(tx, old, NatureOfChange::Modify, "set_owner")?;
        }
        Ok(())
    }

    /// Ownership must stay a forest: `child` may not become its own ancestor.
    fn reject_ownership_cycle(&self, tx: &mut Transaction, child: NodeId, owner: NodeId) -> Result<()> {
        let mut cursor = Some(owner);
        let mut steps = 0usize;
        while let Some(node) = cursor {
            if node == child {
                return Err(CrlGraphError::invalid_argument(format!(
                    "making {owner} the owner of {child} would create an ownership cycle"
                )));
            }
            steps += 1;
            if steps > self.node_count() + 1 {
                return Err(CrlGraphError::InconsistentState(format!(
                    "owner chain of {owner} does not terminate"
                )));
            }
            cursor = match self.index_key(node) {
                Some(key) => key.owner,
                None => self.held(tx, node)?.owner(),
            };
        }
        Ok(())
    }

    // ---- pointers ----

    /// Retarget a pointer. Retargeting an owning pointer changes the owner
    /// of the element that owns the pointer.
    pub fn set_pointer_target(
        &self,
        tx: &mut Transaction,
        pointer: NodeId,
        target: Option<NodeId>,
    ) -> Result<()> {
        self.begin_op(tx, "set_pointer_target")?;
        let kind = self.indexed_kind(tx, pointer)?;
        if kind != KindTag::Pointer {
            return Err(CrlGraphError::invalid_argument(format!(
                "node {pointer} is a {kind}, not a pointer"
            )));
        }
        let role = self
            .index_key(pointer)
            .and_then(|k| k.role())
            .ok_or_else(|| CrlGraphError::InconsistentState(format!("pointer {pointer} has no role")))?;
        if let Some(target) = target {
            self.check_target(tx, role, target)?;
        }

        if role == PointerRole::Owning {
            let element = self.index_key(pointer).and_then(|k| k.owner).ok_or_else(|| {
                CrlGraphError::invalid_operation(format!("owning pointer {pointer} has no owner"))
            })?;
            return self.set_owner_in_op(tx, element, target);
        }
        self.retarget_in_op(tx, pointer, target)
    }

    fn check_target(&self, tx: &mut Transaction, role: PointerRole, target: NodeId) -> Result<()> {
        let kind = self.indexed_kind(tx, target)?;
        let accepted = match role {
            PointerRole::Referenced => true,
            r if r.targets_literal() => kind == KindTag::Literal,
            _ => kind.is_element_like(),
        };
        if !accepted {
            return Err(CrlGraphError::invalid_argument(format!(
                "a {role} pointer cannot target a {kind}"
            )));
        }
        Ok(())
    }

    fn retarget_in_op(
        &self,
        tx: &mut Transaction,
        pointer: NodeId,
        target: Option<NodeId>,
    ) -> Result<()> {
        let old = self.index_key(pointer).and_then(|k| k.target());
        let seeds: Vec<NodeId> = [Some(pointer), target].into_iter().flatten().collect();
        let plain: Vec<NodeId> = old.into_iter().collect();
        self.acquire(tx, &seeds, &plain, false)?;

        if self.held(tx, pointer)?.target() == target {
            return Ok(());
        }
        self.retarget(tx, pointer, target)?;
        self.changed(tx, pointer, NatureOfChange::Modify, "set_pointer_target")
    }

    /// Retarget the role pointer owned by `owner`, creating it if needed.
    fn set_role_target(
        &self,
        tx: &mut Transaction,
        owner: NodeId,
        expected: KindTag,
        role: PointerRole,
        target: Option<NodeId>,
        op: &'static str,
    ) -> Result<()> {
        self.begin_op(tx, op)?;
        let kind = self.indexed_kind(tx, owner)?;
        if kind != expected {
            return Err(CrlGraphError::invalid_argument(format!(
                "{op} needs a {expected}, node {owner} is a {kind}"
            )));
        }
        if let Some(target) = target {
            self.check_target(tx, role, target)?;
        }
        let Some(pointer) = self.role_child_indexed(owner, role) else {
            let seeds: Vec<NodeId> = [Some(owner), target].into_iter().flatten().collect();
            self.acquire(tx, &seeds, &[], false)?;
            let pointer = self.create_role_pointer(tx, owner, role)?;
            if target.is_some() {
                self.retarget(tx, pointer, target)?;
            }
            return self.changed(tx, pointer, NatureOfChange::Add, op);
        };
        self.retarget_in_op(tx, pointer, target)
    }

    pub fn set_referenced(
        &self,
        tx: &mut Transaction,
        reference: NodeId,
        target: Option<NodeId>,
    ) -> Result<()> {
        self.set_role_target(
            tx,
            reference,
            KindTag::Reference,
            PointerRole::Referenced,
            target,
            "set_referenced",
        )
    }

    pub fn set_abstract(
        &self,
        tx: &mut Transaction,
        refinement: NodeId,
        abstraction: Option<NodeId>,
    ) -> Result<()> {
        self.set_role_target(
            tx,
            refinement,
            KindTag::Refinement,
            PointerRole::Abstract,
            abstraction,
            "set_abstract",
        )
    }

    pub fn set_refined(
        &self,
        tx: &mut Transaction,
        refinement: NodeId,
        refined: Option<NodeId>,
    ) -> Result<()> {
        self.set_role_target(
            tx,
            refinement,
            KindTag::Refinement,
            PointerRole::Refined,
            refined,
            "set_refined",
        )
    }

    // ---- values ----

    pub fn set_literal_value(
        &self,
        tx: &mut Transaction,
        literal: NodeId,
        value: impl Into<String>,
    ) -> Result<()> {
        self.begin_op(tx, "set_literal_value")?;
        let kind = self.indexed_kind(tx, literal)?;
        if kind != KindTag::Literal {
            return Err(CrlGraphError::invalid_argument(format!(
                "node {literal} is a {kind}, not a literal"
            )));
        }
        self.acquire(tx, &[literal], &[], false)?;
        let value = value.into();
        if self.held(tx, literal)?.literal_value() == Some(value.as_str()) {
            return Ok(());
        }
        self.pre_change(tx, literal)?;
        self.held_mut(tx, literal)?.set_literal_value(value)?;
        self.changed(tx, literal, NatureOfChange::Modify, "set_literal_value")
    }

    /// Set or clear the URI of any node. URIs are unique per universe.
    pub fn set_uri(&self, tx: &mut Transaction, id: NodeId, uri: Option<&str>) -> Result<()> {
        self.begin_op(tx, "set_uri")?;
        self.require_known(tx, id)?;
        let uri = uri.filter(|u| !u.is_empty());
        if let Some(uri) = uri {
            if self.uri_holder(uri).is_some_and(|other| other != id) {
                return Err(CrlGraphError::invalid_argument(format!(
                    "uri {uri} is already in use"
                )));
            }
        }
        self.acquire(tx, &[id], &[], false)?;
        if self.held(tx, id)?.uri() == uri {
            return Ok(());
        }
        self.pre_change(tx, id)?;
        self.held_mut(tx, id)?.set_uri(uri.map(str::to_string));
        self.sync_index(tx, id)?;
        self.changed(tx, id, NatureOfChange::Modify, "set_uri")
    }

    pub fn set_name(&self, tx: &mut Transaction, element: NodeId, name: &str) -> Result<()> {
        self.begin_op(tx, "set_name")?;
        self.set_literal_child(tx, element, PointerRole::Name, name)
    }

    pub fn set_definition(
        &self,
        tx: &mut Transaction,
        element: NodeId,
        definition: &str,
    ) -> Result<()> {
        self.begin_op(tx, "set_definition")?;
        self.set_literal_child(tx, element, PointerRole::Definition, definition)
    }

    /// Store `value` in the literal the element's `role` pointer targets,
    /// creating the pointer and the literal as owned children when missing.
    fn set_literal_child(
        &self,
        tx: &mut Transaction,
        element: NodeId,
        role: PointerRole,
        value: &str,
    ) -> Result<()> {
        let kind = self.indexed_kind(tx, element)?;
        if !kind.is_element_like() {
            return Err(CrlGraphError::invalid_argument(format!(
                "a {kind} has no {role}"
            )));
        }
        let pointer = self.role_child_indexed(element, role);
        let literal = pointer.and_then(|p| self.index_key(p)).and_then(|k| k.target());
        let seeds: Vec<NodeId> = [Some(element), pointer, literal].into_iter().flatten().collect();
        self.acquire(tx, &seeds, &[], false)?;

        let (pointer, pointer_nature) = match pointer {
            Some(p) => (p, NatureOfChange::Modify),
            None => (
                self.create_role_pointer(tx, element, role)?,
                NatureOfChange::Add,
            ),
        };
        let current = match self.held(tx, pointer)?.target() {
            Some(l) => (self.indexed_kind(tx, l)? == KindTag::Literal).then_some(l),
            None => None,
        };
        let literal = match current {
            Some(l) => {
                if self.held(tx, l)?.literal_value() == Some(value) {
                    return Ok(());
                }
                self.pre_change(tx, l)?;
                self.held_mut(tx, l)?.set_literal_value(value)?;
                self.changed(tx, l, NatureOfChange::Modify, "set_literal_value")?;
                l
            }
            None => {
                let l = self.create(tx, NodeKind::Literal { value: value.to_string() }, None)?;
                self.attach(tx, l, Some(element))?;
                self.retarget(tx, pointer, Some(l))?;
                self.changed(tx, l, NatureOfChange::Add, "set_literal_value")?;
                l
            }
        };
        debug!(node = %element, %role, literal = %literal, "literal child set");
        self.changed(tx, pointer, pointer_nature, "set_literal_value")
    }

    // ---- deletion ----

    /// Detach and unregister a node and everything it owns. Pointers that
    /// targeted a deleted node are cleared.
    pub fn delete_node(&self, tx: &mut Transaction, id: NodeId) -> Result<()> {
        self.begin_op(tx, "delete_node")?;
        self.require_known(tx, id)?;
        if !self.contains(id) {
            return Ok(());
        }
        self.acquire(tx, &[id], &[], true)?;
        self.delete_in_op(tx, id)
    }

    fn delete_in_op(&self, tx: &mut Transaction, id: NodeId) -> Result<()> {
        if self.held(tx, id)?.owner().is_some() {
            self.set_owner_in_op(tx, id, None)?;
        }
        let children: Vec<NodeId> = self.held(tx, id)?.owned().iter().copied().collect();
        for child in children {
            if self.contains(child) {
                self.delete_in_op(tx, child)?;
            }
        }
        for listener in self.listeners_of(id) {
            self.retarget(tx, listener, None)?;
            self.changed(tx, listener, NatureOfChange::Modify, "delete_node")?;
        }
        self.unregister_held(tx, id, true)?;
        self.announce(tx, id, NatureOfChange::Remove, "delete_node")?;
        debug!(node = %id, "deleted");
        Ok(())
    }
}
