//! Per-worker rate and cooldown accounting
//!
//! Tracks usage counters, cooldown expiry and suspension windows for each
//! worker identity. Counter windows roll over lazily on access (floor to
//! UTC hour/day), so no background timer is needed and the counters cannot
//! drift.

use std::collections::HashMap;

use crate::types::{WorkerId, WorkerRegistration, WorkerSnapshot, WorkerStatus};

const HOUR_SECS: i64 = 3600;
const DAY_SECS: i64 = 86400;

/// Why a reservation was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveRefusal {
    Suspended,
    InCooldown,
    HourlyExhausted,
    DailyExhausted,
    UnknownWorker,
}

impl ReserveRefusal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Suspended => "suspended",
            Self::InCooldown => "in_cooldown",
            Self::HourlyExhausted => "hourly_exhausted",
            Self::DailyExhausted => "daily_exhausted",
            Self::UnknownWorker => "unknown_worker",
        }
    }
}

impl std::fmt::Display for ReserveRefusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Limits applied to workers registered without per-worker overrides
#[derive(Debug, Clone, Copy)]
pub struct WorkerLimits {
    pub hourly: u32,
    pub daily: u32,
}

impl Default for WorkerLimits {
    fn default() -> Self {
        Self {
            hourly: 15,
            daily: 150,
        }
    }
}

/// Get the window start timestamp (floor to the window size)
fn window_start(timestamp: i64, window_secs: i64) -> i64 {
    (timestamp / window_secs) * window_secs
}

#[derive(Debug, Clone)]
struct WorkerEntry {
    id: WorkerId,
    handle: String,
    hourly_limit: u32,
    daily_limit: u32,
    hourly_count: u32,
    daily_count: u32,
    hour_window: i64,
    day_window: i64,
    cooldown_until: Option<i64>,
    last_used_at: Option<i64>,
    suspended_until: Option<i64>,
}

impl WorkerEntry {
    /// Count for the current hour window; stale windows read as zero.
    fn effective_hourly(&self, now: i64) -> u32 {
        if window_start(now, HOUR_SECS) == self.hour_window {
            self.hourly_count
        } else {
            0
        }
    }

    fn effective_daily(&self, now: i64) -> u32 {
        if window_start(now, DAY_SECS) == self.day_window {
            self.daily_count
        } else {
            0
        }
    }

    fn is_suspended(&self, now: i64) -> bool {
        matches!(self.suspended_until, Some(until) if now < until)
    }

    fn in_cooldown(&self, now: i64) -> bool {
        matches!(self.cooldown_until, Some(until) if now < until)
    }

    fn check(&self, now: i64) -> std::result::Result<(), ReserveRefusal> {
        if self.is_suspended(now) {
            return Err(ReserveRefusal::Suspended);
        }
        if self.in_cooldown(now) {
            return Err(ReserveRefusal::InCooldown);
        }
        if self.effective_hourly(now) >= self.hourly_limit {
            return Err(ReserveRefusal::HourlyExhausted);
        }
        if self.effective_daily(now) >= self.daily_limit {
            return Err(ReserveRefusal::DailyExhausted);
        }
        Ok(())
    }

    fn status(&self, now: i64) -> WorkerStatus {
        if self.is_suspended(now) {
            WorkerStatus::Suspended
        } else if self.in_cooldown(now) {
            WorkerStatus::CoolingDown
        } else {
            WorkerStatus::Active
        }
    }
}

/// Rate/cooldown ledger for a set of workers.
///
/// Pure state, no I/O and no internal locking; `WorkerPool` owns an
/// instance behind a single mutex so that eligibility checks and
/// reservations stay atomic with respect to concurrent dispatches.
pub struct RateLedger {
    defaults: WorkerLimits,
    workers: HashMap<WorkerId, WorkerEntry>,
}

impl RateLedger {
    pub fn new(defaults: WorkerLimits) -> Self {
        Self {
            defaults,
            workers: HashMap::new(),
        }
    }

    /// Register a worker identity. Registration is append-only within a
    /// run; re-registering updates the limit overrides only.
    pub fn register(&mut self, reg: &WorkerRegistration) {
        let hourly = reg.hourly_limit.unwrap_or(self.defaults.hourly);
        let daily = reg.daily_limit.unwrap_or(self.defaults.daily);
        self.workers
            .entry(reg.id)
            .and_modify(|e| {
                e.hourly_limit = hourly;
                e.daily_limit = daily;
            })
            .or_insert(WorkerEntry {
                id: reg.id,
                handle: reg.handle.clone(),
                hourly_limit: hourly,
                daily_limit: daily,
                hourly_count: 0,
                daily_count: 0,
                hour_window: 0,
                day_window: 0,
                cooldown_until: None,
                last_used_at: None,
                suspended_until: None,
            });
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Check eligibility without consuming a reservation.
    pub fn check(&self, id: WorkerId, now: i64) -> std::result::Result<(), ReserveRefusal> {
        match self.workers.get(&id) {
            Some(entry) => entry.check(now),
            None => Err(ReserveRefusal::UnknownWorker),
        }
    }

    /// Reserve one send on the worker: increments both counters and stamps
    /// `last_used_at`. Fails with the blocking reason otherwise.
    pub fn try_reserve(&mut self, id: WorkerId, now: i64) -> std::result::Result<(), ReserveRefusal> {
        let entry = self
            .workers
            .get_mut(&id)
            .ok_or(ReserveRefusal::UnknownWorker)?;
        entry.check(now)?;

        // Expired suspension/cooldown clear lazily, like the counters.
        entry.suspended_until = None;
        entry.cooldown_until = None;

        let hour = window_start(now, HOUR_SECS);
        if entry.hour_window != hour {
            entry.hour_window = hour;
            entry.hourly_count = 0;
        }
        let day = window_start(now, DAY_SECS);
        if entry.day_window != day {
            entry.day_window = day;
            entry.daily_count = 0;
        }

        entry.hourly_count += 1;
        entry.daily_count += 1;
        entry.last_used_at = Some(now);
        Ok(())
    }

    /// Make the worker ineligible until `now + duration_secs`.
    pub fn apply_cooldown(&mut self, id: WorkerId, now: i64, duration_secs: u64) {
        if let Some(entry) = self.workers.get_mut(&id) {
            entry.cooldown_until = Some(now + duration_secs as i64);
        }
    }

    pub fn suspend(&mut self, id: WorkerId, until: i64) {
        if let Some(entry) = self.workers.get_mut(&id) {
            entry.suspended_until = Some(until);
        }
    }

    pub fn reinstate(&mut self, id: WorkerId) {
        if let Some(entry) = self.workers.get_mut(&id) {
            entry.suspended_until = None;
        }
    }

    pub fn last_used_at(&self, id: WorkerId) -> Option<i64> {
        self.workers.get(&id).and_then(|e| e.last_used_at)
    }

    /// Set `last_used_at` without reserving, used when seeding state.
    pub fn touch(&mut self, id: WorkerId, at: i64) {
        if let Some(entry) = self.workers.get_mut(&id) {
            entry.last_used_at = Some(at);
        }
    }

    /// Workers currently able to take a reservation, in arbitrary order.
    pub fn eligible(&self, now: i64) -> Vec<WorkerId> {
        self.workers
            .values()
            .filter(|e| e.check(now).is_ok())
            .map(|e| e.id)
            .collect()
    }

    pub fn snapshot(&self, now: i64) -> Vec<WorkerSnapshot> {
        let mut snaps: Vec<WorkerSnapshot> = self
            .workers
            .values()
            .map(|e| WorkerSnapshot {
                id: e.id,
                handle: e.handle.clone(),
                status: e.status(now),
                hourly_count: e.effective_hourly(now),
                daily_count: e.effective_daily(now),
                hourly_limit: e.hourly_limit,
                daily_limit: e.daily_limit,
                cooldown_until: e.cooldown_until,
                last_used_at: e.last_used_at,
                suspended_until: e.suspended_until,
            })
            .collect();
        snaps.sort_by_key(|s| s.id);
        snaps
    }
}
