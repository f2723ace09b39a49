use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::CompletionBarrier;

/// Thread pool for deferred callbacks.
///
/// Every job holds a ticket on each barrier it is submitted under. Errors and
/// panics are recorded on those barriers instead of being swallowed.
pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("crlgraph-dispatch-{i}"))
            .build()?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `job` on the pool without blocking the caller.
    pub fn submit<F>(&self, barriers: &[&Arc<CompletionBarrier>], label: String, job: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let mut tickets: Vec<_> = barriers.iter().map(|b| b.ticket()).collect();
        self.pool.spawn(move || {
            let failure = match catch_unwind(AssertUnwindSafe(job)) {
                Ok(Ok(())) => {
                    debug!(job = %label, "dispatched job finished");
                    None
                }
                Ok(Err(e)) => {
                    warn!(job = %label, error = %e, "dispatched job failed");
                    Some(format!("{label}: {e:#}"))
                }
                Err(payload) => {
                    let msg = panic_message(payload.as_ref());
                    warn!(job = %label, panic = %msg, "dispatched job panicked");
                    Some(format!("{label}: panicked: {msg}"))
                }
            };
            if let Some(failure) = failure {
                for ticket in &mut tickets {
                    ticket.fail(failure.clone());
                }
            }
            drop(tickets);
        });
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
