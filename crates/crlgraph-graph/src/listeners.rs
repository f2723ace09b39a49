use std::collections::HashMap;

use crlgraph_core::NodeId;

/// Reverse-edge index from a target node to the pointer nodes referencing it.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    by_target: HashMap<NodeId, Vec<NodeId>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pointer` as a listener of `target`. Returns `false` if it already was.
    pub fn add_listener(&mut self, target: NodeId, pointer: NodeId) -> bool {
        let entry = self.by_target.entry(target).or_default();
        if entry.contains(&pointer) {
            return false;
        }
        entry.push(pointer);
        true
    }

    pub fn remove_listener(&mut self, target: NodeId, pointer: NodeId) -> bool {
        let Some(entry) = self.by_target.get_mut(&target) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|p| *p != pointer);
        let removed = entry.len() != before;
        if entry.is_empty() {
            self.by_target.remove(&target);
        }
        removed
    }

    /// Move `pointer` from `old` to `new`, dropping the old registration first.
    pub fn retarget(&mut self, pointer: NodeId, old: Option<NodeId>, new: Option<NodeId>) {
        if old == new {
            return;
        }
        if let Some(old) = old {
            self.remove_listener(old, pointer);
        }
        if let Some(new) = new {
            self.add_listener(new, pointer);
        }
    }

    pub fn listeners(&self, target: NodeId) -> &[NodeId] {
        self.by_target
            .get(&target)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_listening(&self, target: NodeId, pointer: NodeId) -> bool {
        self.listeners(target).contains(&pointer)
    }

    pub fn target_count(&self) -> usize {
        self.by_target.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn add_is_identity_deduplicated() {
        let mut reg = ListenerRegistry::new();
        let (t, p) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(reg.add_listener(t, p));
        assert!(!reg.add_listener(t, p));
        assert_eq!(reg.listeners(t), &[p]);
    }

    #[test]
    fn retarget_moves_registration() {
        let mut reg = ListenerRegistry::new();
        let (a, b, p) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        reg.retarget(p, None, Some(a));
        assert!(reg.is_listening(a, p));

        reg.retarget(p, Some(a), Some(b));
        assert!(!reg.is_listening(a, p));
        assert!(reg.is_listening(b, p));
        assert_eq!(reg.target_count(), 1);

        reg.retarget(p, Some(b), None);
        assert!(reg.listeners(b).is_empty());
        assert_eq!(reg.target_count(), 0);
    }

    #[test]
    fn remove_unknown_is_noop() {
        let mut reg = ListenerRegistry::new();
        assert!(!reg.remove_listener(Uuid::new_v4(), Uuid::new_v4()));
    }
}
