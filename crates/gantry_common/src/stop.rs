//! Cooperative stop signal for background probers.
//!
//! Every health-supervisor worker of a namespace holds a clone of the same
//! `StopSignal`. The namespace close path triggers it once; workers blocked
//! in a backoff or inter-tick sleep wake within milliseconds instead of
//! riding out the full interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Cloneable stop signal. All clones share state: one `trigger()` wakes
/// every waiter on every clone.
#[derive(Clone, Default)]
pub struct StopSignal {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    triggered: AtomicBool,
    lock: Mutex<()>,
    waiters: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request stop. Idempotent; wakes all current waiters immediately.
    pub fn trigger(&self) {
        self.shared.triggered.store(true, Ordering::SeqCst);
        self.shared.waiters.notify_all();
    }

    /// Non-blocking check.
    pub fn is_triggered(&self) -> bool {
        self.shared.triggered.load(Ordering::SeqCst)
    }

    /// Sleep for at most `timeout`, waking early on `trigger()`.
    ///
    /// Returns `true` when stop was requested; the caller should unwind.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        let mut guard = self.shared.lock.lock();
        if self.is_triggered() {
            return true;
        }
        self.shared.waiters.wait_for(&mut guard, timeout);
        self.is_triggered()
    }
}
