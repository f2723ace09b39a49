use crlgraph_core::{NodeId, PointerRole, Result};

use crate::transaction::Transaction;
use crate::universe::Universe;

/// Read-side navigation over ownership and refinement structure.
///
/// Every query locks the nodes it reports on in the transaction's mode, so
/// results stay valid until the transaction is released.
impl Universe {
    /// The owned pointer of `owner` carrying `role`.
    pub fn role_pointer(
        &self,
        tx: &mut Transaction,
        owner: NodeId,
        role: PointerRole,
    ) -> Result<Option<NodeId>> {
        for child in self.owned(tx, owner)? {
            if self.pointer_role(tx, child)? == Some(role) {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }

    /// Target of the `role` pointer owned by `owner`.
    pub fn role_target(
        &self,
        tx: &mut Transaction,
        owner: NodeId,
        role: PointerRole,
    ) -> Result<Option<NodeId>> {
        match self.role_pointer(tx, owner, role)? {
            Some(pointer) => self.pointer_target(tx, pointer),
            None => Ok(None),
        }
    }

    pub fn name(&self, tx: &mut Transaction, element: NodeId) -> Result<Option<String>> {
        self.role_literal(tx, element, PointerRole::Name)
    }

    pub fn definition(&self, tx: &mut Transaction, element: NodeId) -> Result<Option<String>> {
        self.role_literal(tx, element, PointerRole::Definition)
    }

    fn role_literal(
        &self,
        tx: &mut Transaction,
        element: NodeId,
        role: PointerRole,
    ) -> Result<Option<String>> {
        match self.role_target(tx, element, role)? {
            Some(literal) => self.literal_value(tx, literal),
            None => Ok(None),
        }
    }

    /// The owned child of `parent` whose URI is `uri`.
    pub fn child_with_uri(
        &self,
        tx: &mut Transaction,
        parent: NodeId,
        uri: &str,
    ) -> Result<Option<NodeId>> {
        for child in self.owned(tx, parent)? {
            if self.uri(tx, child)?.as_deref() == Some(uri) {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }

    /// The owned child of `parent` that has `uri` itself or among its
    /// abstractions.
    pub fn child_with_ancestor_uri(
        &self,
        tx: &mut Transaction,
        parent: NodeId,
        uri: &str,
    ) -> Result<Option<NodeId>> {
        for child in self.owned(tx, parent)? {
            if self.uri(tx, child)?.as_deref() == Some(uri) {
                return Ok(Some(child));
            }
            for abstraction in self.abstract_elements_recursively(tx, child)? {
                if self.uri(tx, abstraction)?.as_deref() == Some(uri) {
                    return Ok(Some(child));
                }
            }
        }
        Ok(None)
    }

    /// Refinements whose refined element is `element`.
    pub fn immediate_refinements_of(
        &self,
        tx: &mut Transaction,
        element: NodeId,
    ) -> Result<Vec<NodeId>> {
        self.locked_view(tx, element, |u| {
            u.inner()
                .registry
                .read()
                .refinements_by(element, PointerRole::Refined)
        })
    }

    /// Refinements whose abstract element is `element`.
    pub fn immediate_refinements_by(
        &self,
        tx: &mut Transaction,
        element: NodeId,
    ) -> Result<Vec<NodeId>> {
        self.locked_view(tx, element, |u| {
            u.inner()
                .registry
                .read()
                .refinements_by(element, PointerRole::Abstract)
        })
    }

    /// Elements `element` refines directly.
    pub fn immediate_abstractions(
        &self,
        tx: &mut Transaction,
        element: NodeId,
    ) -> Result<Vec<NodeId>> {
        self.locked_view(tx, element, |u| {
            u.inner().registry.read().immediate_abstractions(element)
        })
    }

    /// Every element `element` refines, directly or transitively.
    pub fn abstract_elements_recursively(
        &self,
        tx: &mut Transaction,
        element: NodeId,
    ) -> Result<Vec<NodeId>> {
        self.locked_view(tx, element, |u| {
            u.inner().registry.read().abstractions_recursively(element)
        })
    }

    pub fn is_refinement_of(
        &self,
        tx: &mut Transaction,
        element: NodeId,
        abstraction: NodeId,
    ) -> Result<bool> {
        Ok(self
            .abstract_elements_recursively(tx, element)?
            .contains(&abstraction))
    }

    /// Lock `element`, run `view` over the registry, then lock every node it
    /// reported.
    fn locked_view<F>(&self, tx: &mut Transaction, element: NodeId, view: F) -> Result<Vec<NodeId>>
    where
        F: Fn(&Universe) -> Vec<NodeId>,
    {
        if self.read(tx, element, |_| ())?.is_none() {
            return Ok(Vec::new());
        }
        let found = view(self);
        for id in &found {
            self.read(tx, *id, |_| ())?;
        }
        Ok(found)
    }
}
