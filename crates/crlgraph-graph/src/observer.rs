use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

use crlgraph_core::{ChangeNotification, UniverseId};

/// External consumer of graph changes (editors, renderers).
pub trait GraphObserver: Send + Sync {
    fn on_change(&self, notification: &ChangeNotification);
}

#[derive(Debug, Clone)]
pub struct GraphEvent {
    pub universe: UniverseId,
    pub root: Arc<ChangeNotification>,
    /// Length of the causal chain behind `root`.
    pub depth: usize,
}

/// Fan-out of top-level notifications to observers and broadcast subscribers.
pub struct ObserverHub {
    universe: UniverseId,
    observers: RwLock<Vec<Arc<dyn GraphObserver>>>,
    events: broadcast::Sender<GraphEvent>,
}

impl ObserverHub {
    pub fn new(universe: UniverseId, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            universe,
            observers: RwLock::new(Vec::new()),
            events,
        }
    }

    pub fn add(&self, observer: Arc<dyn GraphObserver>) {
        self.observers.write().push(observer);
    }

    /// Remove an observer by identity.
    pub fn remove(&self, observer: &Arc<dyn GraphObserver>) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|o| !Arc::ptr_eq(o, observer));
        observers.len() != before
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.events.subscribe()
    }

    pub fn publish(&self, roots: &[Arc<ChangeNotification>]) {
        if roots.is_empty() {
            return;
        }
        let observers = self.observers.read().clone();
        for root in roots {
            for observer in &observers {
                observer.on_change(root);
            }
            // No subscribers is not an error.
            let _ = self.events.send(GraphEvent {
                universe: self.universe,
                root: root.clone(),
                depth: root.depth(),
            });
        }
        trace!(count = roots.len(), "published root notifications");
    }
}
