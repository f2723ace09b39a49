use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::sync::Arc;

use crate::{KindTag, NatureOfChange, NodeId};

/// Immutable record of one state change, optionally wrapping its cause.
///
/// Notifications form a causal chain from the node that changed last back to
/// the root mutation. The chain doubles as the cycle detector during
/// propagation: a node that already appears in it is not notified again.
#[derive(Debug)]
pub struct ChangeNotification {
    changed: NodeId,
    changed_kind: KindTag,
    version: u64,
    nature: NatureOfChange,
    origin: &'static str,
    at: DateTime<Utc>,
    depth: usize,
    underlying: Option<Arc<ChangeNotification>>,
}

impl ChangeNotification {
    pub fn new(
        changed: NodeId,
        changed_kind: KindTag,
        version: u64,
        nature: NatureOfChange,
        origin: &'static str,
        underlying: Option<Arc<ChangeNotification>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            changed,
            changed_kind,
            version,
            nature,
            origin,
            at: Utc::now(),
            depth: underlying.as_ref().map_or(1, |u| u.depth + 1),
            underlying,
        })
    }

    pub fn changed_node(&self) -> NodeId {
        self.changed
    }

    pub fn changed_kind(&self) -> KindTag {
        self.changed_kind
    }

    /// Version of the changed node once the change was applied.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn nature(&self) -> NatureOfChange {
        self.nature
    }

    pub fn origin(&self) -> &'static str {
        self.origin
    }

    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }

    pub fn underlying(&self) -> Option<&Arc<ChangeNotification>> {
        self.underlying.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.underlying.is_none()
    }

    /// Walks from this notification to the root cause.
    pub fn chain(&self) -> Chain<'_> {
        Chain { next: Some(self) }
    }

    pub fn is_referenced(&self, node: NodeId) -> bool {
        self.chain().any(|n| n.changed == node)
    }

    /// The first notification in the chain whose changed node is `node`.
    pub fn referencing(&self, node: NodeId) -> Option<&ChangeNotification> {
        self.chain().find(|n| n.changed == node)
    }

    /// Number of notifications in the chain, this one included.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn root_cause(&self) -> &ChangeNotification {
        let mut current = self;
        while let Some(next) = current.underlying.as_deref() {
            current = next;
        }
        current
    }

    /// Indented, human readable rendering of the causal chain.
    pub fn render_chain(&self) -> String {
        let mut out = String::new();
        for (level, n) in self.chain().enumerate() {
            let _ = writeln!(
                out,
                "{:indent$}[{}] {} {} {} v{} ({})",
                "",
                level,
                n.nature,
                n.changed_kind,
                n.changed,
                n.version,
                n.origin,
                indent = level * 2
            );
        }
        out
    }
}

impl Drop for ChangeNotification {
    fn drop(&mut self) {
        // Unlink iteratively so long chains do not recurse on drop.
        let mut next = self.underlying.take();
        while let Some(link) = next {
            match Arc::try_unwrap(link) {
                Ok(mut inner) => next = inner.underlying.take(),
                Err(_) => break,
            }
        }
    }
}

pub struct Chain<'a> {
    next: Option<&'a ChangeNotification>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a ChangeNotification;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.underlying.as_deref();
        Some(current)
    }
}
