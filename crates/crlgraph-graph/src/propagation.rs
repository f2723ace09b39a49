//! Change propagation between held nodes.
//!
//! A mutation produces one root notification per directly changed node.
//! From there the change travels to the owner (`child_changed`), to every
//! pointer listening to the node (`target_changed`), and from a refinement
//! whose refined pointer moved to the refined element
//! (`abstraction_changed`). A node already present in the causal chain is
//! never notified again, and within one operation every node is handled at
//! most once, so cyclic graphs terminate.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{trace, warn};

use crlgraph_core::{
    ChangeNotification, ConceptNode, KindTag, NatureOfChange, NodeId, Owned, PointerRole, Pointerish,
    Result,
};

use crate::registry::IndexKey;
use crate::transaction::Transaction;
use crate::universe::Universe;

impl Universe {
    /// Report a direct mutation of `id` and propagate it.
    pub(crate) fn changed(
        &self,
        tx: &mut Transaction,
        id: NodeId,
        nature: NatureOfChange,
        origin: &'static str,
    ) -> Result<()> {
        if !tx.scope.rooted.insert(id) {
            return Ok(());
        }
        tx.scope.visited.insert(id);
        self.post_change(tx, id, nature, origin, None)?;
        Ok(())
    }

    fn post_change(
        &self,
        tx: &mut Transaction,
        id: NodeId,
        nature: NatureOfChange,
        origin: &'static str,
        cause: Option<Arc<ChangeNotification>>,
    ) -> Result<Option<Arc<ChangeNotification>>> {
        let depth = cause.as_ref().map_or(1, |c| c.depth() + 1);
        let limit = self.config().max_propagation_depth;
        if limit > 0 && depth > limit {
            warn!(node = %id, depth, limit, "propagation depth limit reached, dropping notification");
            return Ok(None);
        }

        let version = self.bump(tx, id)?;
        let (kind, owner) = {
            let state = self.held(tx, id)?;
            (state.kind_tag(), state.owner())
        };
        let notification = ChangeNotification::new(id, kind, version, nature, origin, cause);
        trace!(node = %id, %kind, version, depth, origin, "change");
        if notification.is_root() {
            tx.roots.push(notification.clone());
        }
        self.queue_functions(tx, id, &notification);

        if let Some(owner) = owner {
            self.child_changed(tx, owner, &notification)?;
        }
        for listener in self.listeners_of(id) {
            if notification.is_referenced(listener) {
                continue;
            }
            self.target_changed(tx, listener, &notification)?;
        }
        Ok(Some(notification))
    }

    fn child_changed(
        &self,
        tx: &mut Transaction,
        parent: NodeId,
        cause: &Arc<ChangeNotification>,
    ) -> Result<()> {
        if cause.is_referenced(parent) || !self.is_known(tx, parent) {
            return Ok(());
        }
        if !tx.scope.visited.insert(parent) {
            return Ok(());
        }
        self.pre_change(tx, parent)?;
        let Some(notification) = self.post_change(
            tx,
            parent,
            NatureOfChange::Modify,
            "child_changed",
            Some(cause.clone()),
        )?
        else {
            return Ok(());
        };

        // A refinement whose refined pointer was retargeted tells the
        // refined element that its abstractions changed.
        if notification.changed_kind() == KindTag::Refinement {
            let refined = {
                let reg = self.inner().registry.read();
                reg.role_child(parent, PointerRole::Refined)
                    .map(|rp| (rp, reg.key(&rp).and_then(IndexKey::target)))
            };
            if let Some((rp, Some(element))) = refined {
                if cause
                    .referencing(rp)
                    .is_some_and(ChangeNotification::is_root)
                {
                    self.abstraction_changed(tx, element, &notification)?;
                }
            }
        }
        Ok(())
    }

    fn abstraction_changed(
        &self,
        tx: &mut Transaction,
        element: NodeId,
        cause: &Arc<ChangeNotification>,
    ) -> Result<()> {
        if cause.is_referenced(element) || !self.is_known(tx, element) {
            return Ok(());
        }
        if !tx.scope.visited.insert(element) {
            return Ok(());
        }
        self.pre_change(tx, element)?;
        self.post_change(
            tx,
            element,
            NatureOfChange::Modify,
            "abstraction_changed",
            Some(cause.clone()),
        )?;
        Ok(())
    }

    fn target_changed(
        &self,
        tx: &mut Transaction,
        pointer: NodeId,
        cause: &Arc<ChangeNotification>,
    ) -> Result<()> {
        if !tx.scope.visited.insert(pointer) {
            return Ok(());
        }
        self.pre_change(tx, pointer)?;
        self.held_mut(tx, pointer)?
            .set_target_version(cause.version())?;
        self.post_change(
            tx,
            pointer,
            NatureOfChange::Modify,
            "target_changed",
            Some(cause.clone()),
        )?;
        Ok(())
    }

    /// Queue calls for every function registered under the node's URI or
    /// the URI of any of its abstractions.
    fn queue_functions(
        &self,
        tx: &mut Transaction,
        id: NodeId,
        notification: &Arc<ChangeNotification>,
    ) {
        let functions = &self.inner().functions;
        if functions.is_empty() {
            return;
        }
        let uris: BTreeSet<String> = {
            let reg = self.inner().registry.read();
            std::iter::once(id)
                .chain(reg.abstractions_recursively(id))
                .filter_map(|n| reg.key(&n).and_then(|k| k.uri.clone()))
                .collect()
        };
        for uri in uris {
            if functions.contains(&uri) {
                tx.calls.queue(&uri, id, notification.clone());
            }
        }
    }
}
