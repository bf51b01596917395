//! Per-parent lock table for merge and delete.
//!
//! # Invariants
//! - At most one guard per `ParentId` exists at a time.
//! - Guards for distinct ids never block each other.
//! - Waiting is bounded by the table's timeout.

use crate::model::parent::ParentId;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default bounded wait for a parent lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Lock acquisition did not complete within the bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimeout {
    pub parent_id: ParentId,
    pub waited: Duration,
}

impl Display for LockTimeout {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "timed out after {}ms waiting for parent {}",
            self.waited.as_millis(),
            self.parent_id
        )
    }
}

impl Error for LockTimeout {}

/// Shared table of parent ids currently held by a writer.
///
/// Share one table (via `Arc`) between every service that writes to the
/// same database.
#[derive(Debug)]
pub struct MergeLocks {
    held: Mutex<HashSet<ParentId>>,
    released: Condvar,
    timeout: Duration,
}

impl Default for MergeLocks {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl MergeLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Blocks until `parent_id` is free or the timeout elapses.
    pub fn acquire(&self, parent_id: ParentId) -> Result<MergeGuard<'_>, LockTimeout> {
        let started_at = Instant::now();
        let deadline = started_at + self.timeout;
        let mut held = self.lock_held();

        while held.contains(&parent_id) {
            let now = Instant::now();
            if now >= deadline {
                return Err(LockTimeout {
                    parent_id,
                    waited: started_at.elapsed(),
                });
            }
            let (next, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            held = next;
        }

        held.insert(parent_id);
        Ok(MergeGuard {
            locks: self,
            parent_id,
        })
    }

    /// Returns whether `parent_id` is currently held.
    pub fn is_held(&self, parent_id: ParentId) -> bool {
        self.lock_held().contains(&parent_id)
    }

    fn release(&self, parent_id: ParentId) {
        self.lock_held().remove(&parent_id);
        self.released.notify_all();
    }

    fn lock_held(&self) -> MutexGuard<'_, HashSet<ParentId>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds one parent id until dropped.
#[derive(Debug)]
pub struct MergeGuard<'locks> {
    locks: &'locks MergeLocks,
    parent_id: ParentId,
}

impl MergeGuard<'_> {
    pub fn parent_id(&self) -> ParentId {
        self.parent_id
    }
}

impl Drop for MergeGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(self.parent_id);
    }
}

#[cfg(test)]
mod tests {
    use super::MergeLocks;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn guard_release_frees_the_id() {
        let locks = MergeLocks::new(Duration::from_millis(50));

        let guard = locks.acquire(1).expect("first acquire should succeed");
        assert!(locks.is_held(1));
        drop(guard);

        assert!(!locks.is_held(1));
        locks.acquire(1).expect("re-acquire after release should succeed");
    }

    #[test]
    fn distinct_ids_do_not_contend() {
        let locks = MergeLocks::new(Duration::from_millis(50));

        let _first = locks.acquire(1).expect("id 1 should be free");
        let second = locks.acquire(2).expect("id 2 should be free");
        assert_eq!(second.parent_id(), 2);
    }

    #[test]
    fn held_id_times_out() {
        let locks = MergeLocks::new(Duration::from_millis(30));

        let _guard = locks.acquire(7).expect("first acquire should succeed");
        let timeout = locks.acquire(7).expect_err("second acquire must time out");
        assert_eq!(timeout.parent_id, 7);
        assert!(timeout.waited >= Duration::from_millis(30));
    }

    #[test]
    fn waiter_proceeds_once_holder_releases() {
        let locks = Arc::new(MergeLocks::new(Duration::from_secs(2)));
        let guard = locks.acquire(3).expect("first acquire should succeed");

        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || locks.acquire(3).map(|guard| guard.parent_id()))
        };

        thread::sleep(Duration::from_millis(20));
        drop(guard);

        let acquired = waiter.join().expect("waiter thread should not panic");
        assert_eq!(acquired, Ok(3));
    }
}
