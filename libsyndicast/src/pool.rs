//! Worker pool: selection and lifecycle of sending identities
//!
//! Owns the rate/cooldown ledger behind a single mutex so that checking a
//! worker's eligibility and reserving it are atomic with respect to
//! concurrent dispatch tasks: no two dispatches can acquire the same worker
//! before its cooldown lands.

use parking_lot::Mutex;

use crate::ledger::{RateLedger, ReserveRefusal, WorkerLimits};
use crate::types::{WorkerId, WorkerRegistration, WorkerSnapshot};

pub struct WorkerPool {
    inner: Mutex<RateLedger>,
}

impl WorkerPool {
    pub fn new(defaults: WorkerLimits) -> Self {
        Self {
            inner: Mutex::new(RateLedger::new(defaults)),
        }
    }

    pub fn register(&self, reg: &WorkerRegistration) {
        self.inner.lock().register(reg);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Acquire an eligible worker and reserve one send on it.
    ///
    /// Selection is least-recently-used by `last_used_at`, ties broken by
    /// lowest id, so the choice is deterministic. Workers that have never
    /// been used sort before all used ones.
    pub fn acquire(&self, now: i64, excluding: &[WorkerId]) -> Option<WorkerId> {
        let mut ledger = self.inner.lock();
        let chosen = ledger
            .eligible(now)
            .into_iter()
            .filter(|id| !excluding.contains(id))
            .min_by_key(|id| (ledger.last_used_at(*id).unwrap_or(i64::MIN), id.0))?;

        // Same lock as the eligibility scan, so this cannot be refused by
        // a concurrent acquisition.
        ledger.try_reserve(chosen, now).ok()?;
        Some(chosen)
    }

    /// Reserve a specific worker, reporting the blocking reason on refusal.
    pub fn try_reserve(&self, id: WorkerId, now: i64) -> Result<(), ReserveRefusal> {
        self.inner.lock().try_reserve(id, now)
    }

    pub fn apply_cooldown(&self, id: WorkerId, now: i64, duration_secs: u64) {
        self.inner.lock().apply_cooldown(id, now, duration_secs);
    }

    pub fn suspend(&self, id: WorkerId, until: i64) {
        self.inner.lock().suspend(id, until);
    }

    pub fn reinstate(&self, id: WorkerId) {
        self.inner.lock().reinstate(id);
    }

    /// Seed `last_used_at` without consuming a reservation (used by tests
    /// and when restoring state at startup).
    pub fn touch(&self, id: WorkerId, at: i64) {
        self.inner.lock().touch(id, at);
    }

    pub fn snapshot(&self, now: i64) -> Vec<WorkerSnapshot> {
        self.inner.lock().snapshot(now)
    }
}
