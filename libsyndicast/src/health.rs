//! Destination health tracking and suppression
//!
//! Tracks success/failure streaks per destination and pauses ("suppresses")
//! destinations that keep failing, with escalating windows on repeat
//! offenders. Destinations are never deleted here; persistently bad ones
//! are flagged for operator review.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::warn;

use crate::types::{DestinationId, DestinationSnapshot, FailureKind};

/// Tunable suppression policy; defaults follow the most common operating
/// values, all overridable from configuration.
#[derive(Debug, Clone)]
pub struct SuppressionPolicy {
    /// Consecutive failures before a generic suppression.
    pub threshold: u32,
    /// Escalating suppression windows; repeat suppressions walk this list
    /// and stick at the last entry.
    pub windows_secs: Vec<i64>,
    /// Below this rolling success rate (with enough samples) a destination
    /// is flagged for review.
    pub min_success_rate: f64,
    pub min_samples: u64,
    /// Smoothing factor for the rolling success rate.
    pub ewma_alpha: f64,
}

impl Default for SuppressionPolicy {
    fn default() -> Self {
        Self {
            threshold: 3,
            windows_secs: vec![3600, 21600, 86400],
            min_success_rate: 0.5,
            min_samples: 10,
            ewma_alpha: 0.2,
        }
    }
}

#[derive(Debug, Clone)]
struct DestEntry {
    consecutive_failures: u32,
    success_rate: f64,
    total_attempts: u64,
    suppressed_until: Option<i64>,
    suppression_count: u32,
    flagged: bool,
    active: bool,
}

impl DestEntry {
    fn new() -> Self {
        Self {
            consecutive_failures: 0,
            success_rate: 0.0,
            total_attempts: 0,
            suppressed_until: None,
            suppression_count: 0,
            flagged: false,
            active: true,
        }
    }

    fn observe(&mut self, value: f64, alpha: f64) {
        self.total_attempts += 1;
        if self.total_attempts == 1 {
            self.success_rate = value;
        } else {
            self.success_rate = alpha * value + (1.0 - alpha) * self.success_rate;
        }
    }
}

/// Per-destination health tracker.
///
/// Exclusively owns destination suppression state; callers interact only
/// through `record_*` and `is_eligible`.
pub struct DestinationHealth {
    policy: SuppressionPolicy,
    inner: Mutex<HashMap<DestinationId, DestEntry>>,
}

impl DestinationHealth {
    pub fn new(policy: SuppressionPolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Record a successful delivery: resets the failure streak and updates
    /// the rolling success rate.
    pub fn record_success(&self, dest: &DestinationId, _now: i64) {
        let mut table = self.inner.lock();
        let entry = table.entry(dest.clone()).or_insert_with(DestEntry::new);
        entry.observe(1.0, self.policy.ewma_alpha);
        entry.consecutive_failures = 0;
    }

    /// Record a terminal delivery failure.
    ///
    /// `banned` and `destination_invalid` suppress immediately; other kinds
    /// suppress once the consecutive-failure threshold is reached.
    pub fn record_failure(&self, dest: &DestinationId, kind: FailureKind, now: i64) {
        let mut table = self.inner.lock();
        let entry = table.entry(dest.clone()).or_insert_with(DestEntry::new);
        entry.observe(0.0, self.policy.ewma_alpha);
        entry.consecutive_failures += 1;

        let immediate = matches!(kind, FailureKind::Banned | FailureKind::DestinationInvalid);
        if immediate || entry.consecutive_failures >= self.policy.threshold {
            entry.suppression_count += 1;
            let idx = (entry.suppression_count as usize)
                .saturating_sub(1)
                .min(self.policy.windows_secs.len().saturating_sub(1));
            // An empty window list degrades to a fixed 1h pause.
            let window = self.policy.windows_secs.get(idx).copied().unwrap_or(3600);
            entry.suppressed_until = Some(now + window);
            warn!(
                destination = %dest,
                kind = %kind,
                window_secs = window,
                "destination suppressed"
            );
        }

        if !entry.flagged
            && entry.total_attempts >= self.policy.min_samples
            && entry.success_rate < self.policy.min_success_rate
        {
            entry.flagged = true;
            warn!(destination = %dest, rate = entry.success_rate, "destination flagged for review");
        }
    }

    /// Whether the destination may be dispatched to right now.
    /// Unknown destinations are eligible; they are created on first record.
    pub fn is_eligible(&self, dest: &DestinationId, now: i64) -> bool {
        let table = self.inner.lock();
        match table.get(dest) {
            Some(entry) => {
                entry.active && !matches!(entry.suppressed_until, Some(until) if now < until)
            }
            None => true,
        }
    }

    /// Pause a destination indefinitely. Operator-driven; never automatic.
    pub fn mark_inactive(&self, dest: &DestinationId) {
        let mut table = self.inner.lock();
        table
            .entry(dest.clone())
            .or_insert_with(DestEntry::new)
            .active = false;
    }

    pub fn mark_active(&self, dest: &DestinationId) {
        let mut table = self.inner.lock();
        if let Some(entry) = table.get_mut(dest) {
            entry.active = true;
        }
    }

    pub fn snapshot(&self, _now: i64) -> Vec<DestinationSnapshot> {
        let table = self.inner.lock();
        let mut snaps: Vec<DestinationSnapshot> = table
            .iter()
            .map(|(dest, e)| DestinationSnapshot {
                destination: dest.clone(),
                consecutive_failures: e.consecutive_failures,
                success_rate: e.success_rate,
                total_attempts: e.total_attempts,
                suppressed_until: e.suppressed_until,
                flagged: e.flagged,
                active: e.active,
            })
            .collect();
        snaps.sort_by(|a, b| a.destination.0.cmp(&b.destination.0));
        snaps
    }
}
