//! JSON export and recovery of ownership trees.
//!
//! A tree is written as nested objects:
//!
//! ```json
//! { "id": "<uuid>", "version": 3, "uri": "urn:x",
//!   "kind": { "type": "Pointer", "role": "NAME", "target": "<uuid>", "target_version": 1 },
//!   "owned": [] }
//! ```
//!
//! Owners are implied by nesting and are not written.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt::Write as _;
use tracing::info;

use crlgraph_core::{
    ConceptNode, CrlGraphError, Identifiable, KindTag, NatureOfChange, NodeId, NodeKind, NodeState,
    Owned, Pointerish, Result, Versioned,
};

use crate::transaction::Transaction;
use crate::universe::Universe;

#[derive(Debug, Serialize, Deserialize)]
struct SerializedNode {
    id: NodeId,
    #[serde(default)]
    version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uri: Option<String>,
    kind: NodeKind,
    #[serde(default)]
    owned: Vec<SerializedNode>,
}

impl Universe {
    /// Serialize `root` and everything it owns.
    pub fn export_graph(&self, tx: &mut Transaction, root: NodeId) -> Result<String> {
        let tree = self.export_node(tx, root)?;
        Ok(serde_json::to_string_pretty(&tree)?)
    }

    fn export_node(&self, tx: &mut Transaction, id: NodeId) -> Result<SerializedNode> {
        let state = self
            .snapshot(tx, id)?
            .ok_or_else(|| CrlGraphError::invalid_argument(format!("unknown node {id}")))?;
        let owned = state
            .owned()
            .iter()
            .map(|child| self.export_node(tx, *child))
            .collect::<Result<Vec<_>>>()?;
        Ok(SerializedNode {
            id,
            version: state.version(),
            uri: state.uri().map(str::to_string),
            kind: state.kind().clone(),
            owned,
        })
    }

    /// Rebuild a tree written by [`export_graph`](Self::export_graph) and
    /// register every node in it. Returns the id of the root.
    ///
    /// Nothing is registered unless the whole document is valid.
    pub fn recover_graph(&self, tx: &mut Transaction, json: &[u8]) -> Result<NodeId> {
        self.begin_op(tx, "recover_graph")?;
        let value: Value = serde_json::from_slice(json)?;
        check_types(&value)?;
        let tree: SerializedNode = serde_json::from_value(value)?;

        let mut states = Vec::new();
        flatten(tree, None, &mut states);
        self.validate_recovered(&states)?;

        let root = states
            .first()
            .map(NodeState::id)
            .ok_or_else(|| CrlGraphError::invalid_argument("empty graph"))?;
        let count = self.register_all(tx, states)?.len();
        self.announce(tx, root, NatureOfChange::Add, "recover_graph")?;
        info!(root = %root, nodes = count, "graph recovered");
        Ok(root)
    }

    fn validate_recovered(&self, states: &[NodeState]) -> Result<()> {
        let mut ids = HashSet::with_capacity(states.len());
        let mut uris = HashSet::new();
        for state in states {
            let id = state.id();
            if id.is_nil() {
                return Err(CrlGraphError::invalid_argument("nil node identity in graph"));
            }
            if !ids.insert(id) {
                return Err(CrlGraphError::invalid_argument(format!(
                    "duplicate node identity {id} in graph"
                )));
            }
            if self.contains(id) {
                return Err(CrlGraphError::invalid_argument(format!(
                    "node {id} is already registered"
                )));
            }
            if let Some(uri) = state.uri() {
                if !uris.insert(uri.to_string()) || self.uri_holder(uri).is_some() {
                    return Err(CrlGraphError::invalid_argument(format!(
                        "uri {uri} is already in use"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Indented listing of `root` and its owned subtree.
    pub fn render_tree(&self, tx: &mut Transaction, root: NodeId) -> Result<String> {
        let mut out = String::new();
        let mut stack = vec![(root, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let Some(state) = self.snapshot(tx, id)? else {
                continue;
            };
            let _ = write!(
                out,
                "{:indent$}{} {} v{}",
                "",
                state.kind_tag(),
                id,
                state.version(),
                indent = depth * 2
            );
            if let Some(uri) = state.uri() {
                let _ = write!(out, " <{uri}>");
            }
            if let Some(value) = state.literal_value() {
                let _ = write!(out, " {value:?}");
            }
            if let Some(role) = state.role() {
                match state.target() {
                    Some(target) => {
                        let _ = write!(out, " {role} -> {target}");
                    }
                    None => {
                        let _ = write!(out, " {role} -> (none)");
                    }
                }
            }
            out.push('\n');
            for child in state.owned().iter().rev() {
                stack.push((*child, depth + 1));
            }
        }
        Ok(out)
    }
}

/// Every object in the tree must carry a known `kind.type` before any
/// structural decoding happens.
fn check_types(value: &Value) -> Result<()> {
    let mut stack = vec![value];
    while let Some(node) = stack.pop() {
        let kind = node
            .get("kind")
            .and_then(|k| k.get("type"))
            .ok_or_else(|| CrlGraphError::UnknownType("<missing>".to_string()))?;
        let tag = kind.as_str().unwrap_or_default();
        if KindTag::parse(tag).is_none() {
            return Err(CrlGraphError::UnknownType(kind.to_string()));
        }
        if let Some(owned) = node.get("owned").and_then(Value::as_array) {
            stack.extend(owned);
        }
    }
    Ok(())
}

/// Depth-first, parents before children, with owners taken from nesting.
fn flatten(node: SerializedNode, owner: Option<NodeId>, out: &mut Vec<NodeState>) {
    let SerializedNode {
        id,
        version,
        uri,
        kind,
        owned,
    } = node;
    let mut state = NodeState::with_id(id, kind);
    state.set_version(version);
    state.set_uri(uri);
    state.set_owner(owner);
    for child in &owned {
        state.add_owned(child.id);
    }
    out.push(state);
    for child in owned {
        flatten(child, Some(id), out);
    }
}
