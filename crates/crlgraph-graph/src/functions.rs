use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crlgraph_concurrent::{CompletionBarrier, WorkerPool};
use crlgraph_core::{ChangeNotification, NodeId};

/// One batched invocation handed to every callback registered for a URI.
#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub function_uri: String,
    pub node: NodeId,
    pub notifications: Vec<Arc<ChangeNotification>>,
}

pub type ReactiveFn = Arc<dyn Fn(&FunctionCall) -> anyhow::Result<()> + Send + Sync>;

/// Callbacks keyed by the URI of the concept they react to.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: Arc<DashMap<String, Vec<ReactiveFn>>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, uri: impl Into<String>, callback: F)
    where
        F: Fn(&FunctionCall) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let uri = uri.into();
        debug!(uri = %uri, "registering reactive function");
        self.functions
            .entry(uri)
            .or_default()
            .push(Arc::new(callback));
    }

    /// Drop every callback registered under `uri`, returning how many there were.
    pub fn unregister(&self, uri: &str) -> usize {
        self.functions.remove(uri).map_or(0, |(_, v)| v.len())
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.functions.contains_key(uri)
    }

    pub fn lookup(&self, uri: &str) -> Vec<ReactiveFn> {
        self.functions
            .get(uri)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("uris", &self.functions.len())
            .finish()
    }
}

/// Pending function calls for one transaction, batched per (function, node).
#[derive(Debug, Default)]
pub struct FunctionCallManager {
    pending: BTreeMap<(String, NodeId), Vec<Arc<ChangeNotification>>>,
}

impl FunctionCallManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&mut self, function_uri: &str, node: NodeId, notification: Arc<ChangeNotification>) {
        self.pending
            .entry((function_uri.to_string(), node))
            .or_default()
            .push(notification);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending_for(&self, function_uri: &str, node: NodeId) -> usize {
        self.pending
            .get(&(function_uri.to_string(), node))
            .map_or(0, Vec::len)
    }

    /// Launch one unit of work per pending (function, node) pair and clear
    /// the table. Never waits for the launched work.
    pub fn dispatch_all(
        &mut self,
        registry: &FunctionRegistry,
        pool: &WorkerPool,
        barriers: &[&Arc<CompletionBarrier>],
    ) -> usize {
        let pending = std::mem::take(&mut self.pending);
        let mut launched = 0;
        for ((function_uri, node), notifications) in pending {
            let callbacks = registry.lookup(&function_uri);
            if callbacks.is_empty() {
                continue;
            }
            let label = format!("{function_uri}@{node}");
            let call = FunctionCall {
                function_uri,
                node,
                notifications,
            };
            pool.submit(barriers, label, move || {
                for callback in &callbacks {
                    callback(&call)?;
                }
                Ok(())
            });
            launched += 1;
        }
        if launched > 0 {
            debug!(launched, "dispatched reactive function calls");
        }
        launched
    }
}
