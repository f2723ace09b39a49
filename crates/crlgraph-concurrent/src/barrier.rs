use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct BarrierState {
    pending: usize,
    completed: u64,
    failures: Vec<String>,
    /// Failures dropped because `failures` was full.
    overflow: u64,
}

/// Counting join point for deferred units of work.
///
/// Launchers take a [`BarrierTicket`] before handing work off; the ticket
/// decrements the pending count when dropped, so a unit that panics still
/// completes its slot.
#[derive(Debug, Default)]
pub struct CompletionBarrier {
    state: Mutex<BarrierState>,
    drained: Condvar,
    failure_limit: Option<usize>,
}

impl CompletionBarrier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A barrier that keeps at most `limit` failure messages between drains
    /// and only counts the rest.
    pub fn with_failure_limit(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            failure_limit: Some(limit),
            ..Self::default()
        })
    }

    pub fn ticket(self: &Arc<Self>) -> BarrierTicket {
        self.state.lock().pending += 1;
        BarrierTicket {
            barrier: Arc::clone(self),
            failure: None,
        }
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending
    }

    pub fn completed(&self) -> u64 {
        self.state.lock().completed
    }

    /// Block until every outstanding ticket has been dropped.
    pub fn wait(&self) {
        let mut state = self.state.lock();
        while state.pending > 0 {
            self.drained.wait(&mut state);
        }
    }

    /// Like [`wait`](Self::wait) with a deadline. Returns `true` if drained.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.pending > 0 {
            if self.drained.wait_until(&mut state, deadline).timed_out() {
                return state.pending == 0;
            }
        }
        true
    }

    /// Drain the failure messages reported so far. Messages dropped over the
    /// limit are summarized in a final entry.
    pub fn take_failures(&self) -> Vec<String> {
        let mut state = self.state.lock();
        let mut failures = std::mem::take(&mut state.failures);
        let overflow = std::mem::take(&mut state.overflow);
        if overflow > 0 {
            failures.push(format!("{overflow} more failures not retained"));
        }
        failures
    }

    fn complete(&self, failure: Option<String>) {
        let mut state = self.state.lock();
        state.pending = state.pending.saturating_sub(1);
        state.completed += 1;
        if let Some(f) = failure {
            if self.failure_limit.is_some_and(|limit| state.failures.len() >= limit) {
                state.overflow += 1;
            } else {
                state.failures.push(f);
            }
        }
        if state.pending == 0 {
            self.drained.notify_all();
        }
    }
}

#[derive(Debug)]
pub struct BarrierTicket {
    barrier: Arc<CompletionBarrier>,
    failure: Option<String>,
}

impl BarrierTicket {
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.failure = Some(reason.into());
    }
}

impl Drop for BarrierTicket {
    fn drop(&mut self) {
        self.barrier.complete(self.failure.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn counts_tickets() {
        let barrier = CompletionBarrier::new();
        let a = barrier.ticket();
        let mut b = barrier.ticket();
        assert_eq!(barrier.pending(), 2);
        drop(a);
        b.fail("boom");
        drop(b);
        assert_eq!(barrier.pending(), 0);
        assert_eq!(barrier.completed(), 2);
        assert_eq!(barrier.take_failures(), vec!["boom".to_string()]);
        assert!(barrier.take_failures().is_empty());
    }

    #[test]
    fn failure_messages_are_capped() {
        let barrier = CompletionBarrier::with_failure_limit(2);
        for i in 0..5 {
            let mut t = barrier.ticket();
            t.fail(format!("failure {i}"));
        }
        let failures = barrier.take_failures();
        assert_eq!(failures.len(), 3);
        assert_eq!(failures[0], "failure 0");
        assert_eq!(failures[2], "3 more failures not retained");
        assert!(barrier.take_failures().is_empty());
    }

    #[test]
    fn wait_blocks_until_drained() {
        let barrier = CompletionBarrier::new();
        let tickets: Vec<_> = (0..4).map(|_| barrier.ticket()).collect();
        let handles: Vec<_> = tickets
            .into_iter()
            .map(|t| {
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(5));
                    drop(t);
                })
            })
            .collect();
        barrier.wait();
        assert_eq!(barrier.pending(), 0);
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn wait_timeout_reports_outstanding_work() {
        let barrier = CompletionBarrier::new();
        let ticket = barrier.ticket();
        assert!(!barrier.wait_timeout(Duration::from_millis(10)));
        drop(ticket);
        assert!(barrier.wait_timeout(Duration::from_millis(10)));
    }
}
