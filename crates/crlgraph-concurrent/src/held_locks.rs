use crossbeam_utils::Backoff;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Error)]
pub enum LockError<K: fmt::Debug> {
    #[error("timed out after {waited:?} waiting for lock {key:?}")]
    Timeout { key: K, waited: Duration },

    #[error("lock {key:?} is contended and sorts below a held lock")]
    OutOfOrder { key: K },
}

enum Held<T> {
    Shared(ArcRwLockReadGuard<RawRwLock, T>),
    Exclusive(ArcRwLockWriteGuard<RawRwLock, T>),
}

impl<T> Held<T> {
    fn get(&self) -> &T {
        match self {
            Held::Shared(g) => &**g,
            Held::Exclusive(g) => &**g,
        }
    }
}

/// Position in the acquisition history; see [`HeldLocks::release_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

impl Checkpoint {
    /// Whether nothing was held when the checkpoint was taken.
    pub fn is_origin(self) -> bool {
        self.0 == 0
    }
}

/// The complete set of locks acquired for one logical operation.
///
/// A key is locked at most once no matter how often `lock` is called for it,
/// so helpers may re-enter the same node freely. Keys acquired in ascending
/// order block as usual. A key below the highest held key is never waited on
/// without a bound: it is retried with backoff, then either waited on for the
/// configured timeout or refused with [`LockError::OutOfOrder`].
pub struct HeldLocks<K: Ord + Copy + fmt::Debug, T> {
    mode: LockMode,
    wait_timeout: Option<Duration>,
    held: BTreeMap<K, Held<T>>,
    order: Vec<K>,
    acquisitions: u64,
}

impl<K: Ord + Copy + fmt::Debug, T> HeldLocks<K, T> {
    pub fn new(mode: LockMode) -> Self {
        Self::with_timeout(mode, None)
    }

    pub fn with_timeout(mode: LockMode, wait_timeout: Option<Duration>) -> Self {
        Self {
            mode,
            wait_timeout,
            held: BTreeMap::new(),
            order: Vec::new(),
            acquisitions: 0,
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn is_held(&self, key: &K) -> bool {
        self.held.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Number of underlying lock acquisitions performed so far.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions
    }

    pub fn highest(&self) -> Option<K> {
        self.held.keys().next_back().copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.held.keys()
    }

    /// Lock `key` unless it is already held. Returns whether a new lock was taken.
    pub fn lock(&mut self, key: K, cell: &Arc<RwLock<T>>) -> Result<bool, LockError<K>> {
        if self.held.contains_key(&key) {
            return Ok(false);
        }
        let in_order = self.highest().map_or(true, |h| key > h);
        if in_order {
            let held = self.acquire_blocking(cell);
            self.insert(key, held);
            return Ok(true);
        }

        let backoff = Backoff::new();
        while !backoff.is_completed() {
            if let Some(held) = self.acquire_nonblocking(cell) {
                self.insert(key, held);
                return Ok(true);
            }
            backoff.snooze();
        }

        match self.wait_timeout {
            Some(timeout) => {
                let start = Instant::now();
                match self.acquire_timed(cell, timeout) {
                    Some(held) => {
                        self.insert(key, held);
                        Ok(true)
                    }
                    None => {
                        warn!(key = ?key, held = self.held.len(), "lock wait timed out");
                        Err(LockError::Timeout {
                            key,
                            waited: start.elapsed(),
                        })
                    }
                }
            }
            None => {
                debug!(key = ?key, held = self.held.len(), "refusing contended out-of-order lock");
                Err(LockError::OutOfOrder { key })
            }
        }
    }

    /// Drop every held lock and take them again, together with `key`, in
    /// ascending order. Only sound when nothing written under the held locks
    /// depends on them staying held.
    pub fn relock_in_order(&mut self, key: K, cell: &Arc<RwLock<T>>) -> Result<usize, LockError<K>> {
        let mut cells: Vec<(K, Arc<RwLock<T>>)> = self
            .held
            .keys()
            .filter_map(|k| self.cell(k).map(|c| (*k, c)))
            .collect();
        cells.push((key, Arc::clone(cell)));
        let released = self.release_all();
        debug!(key = ?key, released, "re-locking in ascending order");
        self.lock_all(cells)
    }

    /// Lock `key` only if it is free right now.
    pub fn try_lock(&mut self, key: K, cell: &Arc<RwLock<T>>) -> bool {
        if self.held.contains_key(&key) {
            return true;
        }
        match self.acquire_nonblocking(cell) {
            Some(held) => {
                self.insert(key, held);
                true
            }
            None => false,
        }
    }

    /// Lock every cell in ascending key order. Returns the number newly taken.
    pub fn lock_all(&mut self, mut cells: Vec<(K, Arc<RwLock<T>>)>) -> Result<usize, LockError<K>> {
        cells.sort_by(|a, b| a.0.cmp(&b.0));
        cells.dedup_by(|a, b| a.0 == b.0);
        let mut taken = 0;
        for (key, cell) in &cells {
            if self.lock(*key, cell)? {
                taken += 1;
            }
        }
        Ok(taken)
    }

    /// The lock cell behind a held key.
    pub fn cell(&self, key: &K) -> Option<Arc<RwLock<T>>> {
        self.held.get(key).map(|held| match held {
            Held::Shared(g) => Arc::clone(ArcRwLockReadGuard::rwlock(g)),
            Held::Exclusive(g) => Arc::clone(ArcRwLockWriteGuard::rwlock(g)),
        })
    }

    pub fn get(&self, key: &K) -> Option<&T> {
        self.held.get(key).map(Held::get)
    }

    /// Mutable access to a held value. `None` when not held or held shared.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut T> {
        match self.held.get_mut(key) {
            Some(Held::Exclusive(g)) => Some(&mut **g),
            _ => None,
        }
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.order.len())
    }

    /// Release every lock acquired after `checkpoint`, keeping older ones.
    pub fn release_to(&mut self, checkpoint: Checkpoint) -> usize {
        let mut released = 0;
        while self.order.len() > checkpoint.0 {
            if let Some(key) = self.order.pop() {
                if self.held.remove(&key).is_some() {
                    released += 1;
                }
            }
        }
        released
    }

    /// Release a single held lock.
    pub fn release(&mut self, key: &K) -> bool {
        if self.held.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    /// Unlock everything. Returns the number of distinct locks released.
    pub fn release_all(&mut self) -> usize {
        let released = self.held.len();
        self.held.clear();
        self.order.clear();
        if released > 0 {
            debug!(released, "released held locks");
        }
        released
    }

    fn insert(&mut self, key: K, held: Held<T>) {
        self.acquisitions += 1;
        self.order.push(key);
        self.held.insert(key, held);
    }

    fn acquire_blocking(&self, cell: &Arc<RwLock<T>>) -> Held<T> {
        match self.mode {
            LockMode::Shared => Held::Shared(cell.read_arc()),
            LockMode::Exclusive => Held::Exclusive(cell.write_arc()),
        }
    }

    fn acquire_nonblocking(&self, cell: &Arc<RwLock<T>>) -> Option<Held<T>> {
        match self.mode {
            LockMode::Shared => cell.try_read_arc().map(Held::Shared),
            LockMode::Exclusive => cell.try_write_arc().map(Held::Exclusive),
        }
    }

    fn acquire_timed(&self, cell: &Arc<RwLock<T>>, timeout: Duration) -> Option<Held<T>> {
        match self.mode {
            LockMode::Shared => cell.try_read_arc_for(timeout).map(Held::Shared),
            LockMode::Exclusive => cell.try_write_arc_for(timeout).map(Held::Exclusive),
        }
    }
}

impl<K: Ord + Copy + fmt::Debug, T> Drop for HeldLocks<K, T> {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl<K: Ord + Copy + fmt::Debug, T> fmt::Debug for HeldLocks<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeldLocks")
            .field("mode", &self.mode)
            .field("held", &self.held.keys().collect::<Vec<_>>())
            .field("acquisitions", &self.acquisitions)
            .finish()
    }
}
