//! A lock-free deadline cell shared between tasks.
//!
//! The receive loop polls its deadlines on a fixed interval instead of
//! sleeping until the nearest one, so arming and clearing only needs a
//! relaxed atomic store from any task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const UNARMED: u64 = u64::MAX;

/// An absolute deadline, stored as milliseconds since the cell's creation.
#[derive(Debug)]
pub(crate) struct Deadline {
    epoch: Instant,
    at_millis: AtomicU64,
}

impl Deadline {
    /// A new, unarmed deadline.
    pub(crate) fn unarmed() -> Deadline {
        Deadline {
            epoch: Instant::now(),
            at_millis: AtomicU64::new(UNARMED),
        }
    }

    fn now_millis(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Arm the deadline `after` from now.
    pub(crate) fn arm_in(&self, after: Duration) {
        let at = self.now_millis().saturating_add(after.as_millis() as u64);
        self.at_millis.store(at, Ordering::SeqCst);
    }

    /// Disarm the deadline; `expired` returns false until re-armed.
    pub(crate) fn clear(&self) {
        self.at_millis.store(UNARMED, Ordering::SeqCst);
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.at_millis.load(Ordering::SeqCst) != UNARMED
    }

    pub(crate) fn expired(&self) -> bool {
        let at = self.at_millis.load(Ordering::SeqCst);
        at != UNARMED && self.now_millis() >= at
    }
}
