//! Dispatch of a single (slot, destination) delivery
//!
//! The dispatcher acquires a worker, invokes the transport, classifies the
//! outcome and drives the retry/backoff/abandon decision. Ledger and health
//! updates always land before the audit record is appended, so the posting
//! history is consistent with ledger state at the time of each write.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::classify::classify;
use crate::error::Result;
use crate::health::DestinationHealth;
use crate::pool::WorkerPool;
use crate::transport::{Transport, TransportError};
use crate::types::{ContentSlot, DestinationId, FailureKind, PostingAttempt, WorkerId};

/// Append-only sink for posting attempts, consumed by reporting surfaces.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn append_attempt(&self, attempt: &PostingAttempt) -> Result<()>;
}

/// Tunable dispatch policy. Every value here is configuration, not an
/// invariant; defaults follow the most common operating values.
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    /// Bounded retries for transient/unknown failures.
    pub max_transient_retries: u32,
    /// Bounded retries (on a different worker) after rate limiting.
    pub max_rate_limit_retries: u32,
    /// Base for exponential backoff between transient retries.
    pub retry_backoff_secs: u64,
    /// Randomized reuse window applied to a worker after a success.
    pub reuse_cooldown_min_secs: u64,
    pub reuse_cooldown_max_secs: u64,
    /// Longer cooldown applied after a transient failure.
    pub transient_cooldown_secs: u64,
    /// Quarantine applied to a worker on a ban signal.
    pub ban_quarantine_secs: u64,
    /// Upper bound on a single transport call.
    pub transport_timeout_secs: u64,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_transient_retries: 2,
            max_rate_limit_retries: 2,
            retry_backoff_secs: 1,
            reuse_cooldown_min_secs: 30,
            reuse_cooldown_max_secs: 90,
            transient_cooldown_secs: 300,
            ban_quarantine_secs: 86400,
            transport_timeout_secs: 30,
        }
    }
}

/// Why a dispatch was skipped without a transport call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The destination is suppressed or marked inactive.
    Suppressed,
    /// No worker passed reservation.
    NoWorkerAvailable,
}

/// Final outcome of a dispatch, after all local retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    Delivered { worker: WorkerId, receipt: String },
    Skipped(SkipReason),
    Failed { kind: FailureKind },
}

pub struct Dispatcher {
    pool: Arc<WorkerPool>,
    health: Arc<DestinationHealth>,
    transport: Arc<dyn Transport>,
    history: Arc<dyn HistorySink>,
    policy: DispatchPolicy,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<WorkerPool>,
        health: Arc<DestinationHealth>,
        transport: Arc<dyn Transport>,
        history: Arc<dyn HistorySink>,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            pool,
            health,
            transport,
            history,
            policy,
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn health(&self) -> &Arc<DestinationHealth> {
        &self.health
    }

    /// Dispatch one slot's content to one destination.
    ///
    /// Failures below the retry ceiling are recovered here and are
    /// invisible to the caller; the result reflects the terminal outcome
    /// only. Never returns an error: delivery failures surface as audit
    /// records and health-state changes, not as `Err`.
    pub async fn dispatch(&self, slot: &ContentSlot, destination: &DestinationId) -> DispatchResult {
        let mut excluded: Vec<WorkerId> = Vec::new();
        let mut transient_used = 0u32;
        let mut rate_limit_used = 0u32;
        let mut ban_retry_used = 0u32;

        loop {
            let now = chrono::Utc::now().timestamp();

            // Re-checked every iteration: another dispatch may have
            // suppressed the destination while we were backing off.
            if !self.health.is_eligible(destination, now) {
                debug!(slot = %slot.id, destination = %destination, "destination suppressed, skipping");
                return DispatchResult::Skipped(SkipReason::Suppressed);
            }

            let Some(worker) = self.pool.acquire(now, &excluded) else {
                debug!(slot = %slot.id, destination = %destination, "no worker available");
                return DispatchResult::Skipped(SkipReason::NoWorkerAvailable);
            };

            let delivery = match timeout(
                Duration::from_secs(self.policy.transport_timeout_secs),
                self.transport.deliver(worker, destination, &slot.content),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(self.policy.transport_timeout_secs)),
            };

            let now = chrono::Utc::now().timestamp();
            match delivery {
                Ok(receipt) => {
                    let cooldown = self.reuse_cooldown();
                    self.pool.apply_cooldown(worker, now, cooldown);
                    self.health.record_success(destination, now);
                    self.append(slot, destination, worker, now, true, None, Some(&receipt))
                        .await;
                    info!(
                        slot = %slot.id,
                        destination = %destination,
                        worker = %worker,
                        "delivered"
                    );
                    return DispatchResult::Delivered { worker, receipt };
                }
                Err(err) => {
                    let kind = classify(&err);
                    warn!(
                        slot = %slot.id,
                        destination = %destination,
                        worker = %worker,
                        kind = %kind,
                        "delivery failed: {}",
                        err
                    );

                    match kind {
                        FailureKind::Transient | FailureKind::Unknown => {
                            self.pool.apply_cooldown(
                                worker,
                                now,
                                self.policy.transient_cooldown_secs,
                            );
                            if transient_used < self.policy.max_transient_retries {
                                self.append(slot, destination, worker, now, false, Some(kind), Some(&err.to_string()))
                                    .await;
                                let backoff = self
                                    .policy
                                    .retry_backoff_secs
                                    .saturating_mul(1 << transient_used);
                                transient_used += 1;
                                if backoff > 0 {
                                    sleep(Duration::from_secs(backoff)).await;
                                }
                                continue;
                            }
                            self.health.record_failure(destination, kind, now);
                            self.append(slot, destination, worker, now, false, Some(kind), Some(&err.to_string()))
                                .await;
                            return DispatchResult::Failed { kind };
                        }
                        FailureKind::RateLimited { wait_secs } => {
                            // The worker sits out the provider-reported
                            // wait; the destination takes no penalty.
                            self.pool.apply_cooldown(worker, now, wait_secs);
                            self.append(slot, destination, worker, now, false, Some(kind), Some(&err.to_string()))
                                .await;
                            if rate_limit_used < self.policy.max_rate_limit_retries {
                                rate_limit_used += 1;
                                continue;
                            }
                            return DispatchResult::Failed { kind };
                        }
                        FailureKind::Banned => {
                            self.pool
                                .suspend(worker, now + self.policy.ban_quarantine_secs as i64);
                            excluded.push(worker);
                            if ban_retry_used < 1 {
                                self.append(slot, destination, worker, now, false, Some(kind), Some(&err.to_string()))
                                    .await;
                                ban_retry_used += 1;
                                continue;
                            }
                            self.health.record_failure(destination, kind, now);
                            self.append(slot, destination, worker, now, false, Some(kind), Some(&err.to_string()))
                                .await;
                            return DispatchResult::Failed { kind };
                        }
                        FailureKind::DestinationInvalid => {
                            // Immediate suppression, no retry.
                            self.health.record_failure(destination, kind, now);
                            self.append(slot, destination, worker, now, false, Some(kind), Some(&err.to_string()))
                                .await;
                            return DispatchResult::Failed { kind };
                        }
                    }
                }
            }
        }
    }

    fn reuse_cooldown(&self) -> u64 {
        let min = self.policy.reuse_cooldown_min_secs;
        let max = self.policy.reuse_cooldown_max_secs.max(min);
        if min == max {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }

    #[allow(clippy::too_many_arguments)]
    async fn append(
        &self,
        slot: &ContentSlot,
        destination: &DestinationId,
        worker: WorkerId,
        now: i64,
        success: bool,
        kind: Option<FailureKind>,
        detail: Option<&str>,
    ) {
        let attempt = PostingAttempt {
            id: None,
            slot_id: slot.id.clone(),
            destination: destination.clone(),
            worker_id: worker,
            attempted_at: now,
            success,
            failure_kind: kind.map(|k| k.label().to_string()),
            detail: detail.map(|d| d.to_string()),
        };
        // The audit trail must not take the engine down with it.
        if let Err(e) = self.history.append_attempt(&attempt).await {
            warn!(slot = %slot.id, destination = %destination, "failed to append posting attempt: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::SuppressionPolicy;
    use crate::ledger::WorkerLimits;
    use crate::transport::MockTransport;
    use crate::types::WorkerRegistration;
    use parking_lot::Mutex;

    struct MemoryHistory {
        attempts: Mutex<Vec<PostingAttempt>>,
    }

    impl MemoryHistory {
        fn new() -> Self {
            Self {
                attempts: Mutex::new(Vec::new()),
            }
        }

        fn attempts(&self) -> Vec<PostingAttempt> {
            self.attempts.lock().clone()
        }
    }

    #[async_trait]
    impl HistorySink for MemoryHistory {
        async fn append_attempt(&self, attempt: &PostingAttempt) -> Result<()> {
            self.attempts.lock().push(attempt.clone());
            Ok(())
        }
    }

    struct Harness {
        pool: Arc<WorkerPool>,
        health: Arc<DestinationHealth>,
        transport: Arc<MockTransport>,
        history: Arc<MemoryHistory>,
        dispatcher: Dispatcher,
    }

    fn harness(worker_ids: &[i64]) -> Harness {
        // Backoff zeroed so retry tests do not sleep.
        let policy = DispatchPolicy {
            retry_backoff_secs: 0,
            ..Default::default()
        };
        harness_with_policy(worker_ids, policy)
    }

    fn harness_with_policy(worker_ids: &[i64], policy: DispatchPolicy) -> Harness {
        let pool = Arc::new(WorkerPool::new(WorkerLimits::default()));
        for id in worker_ids {
            pool.register(&WorkerRegistration {
                id: WorkerId(*id),
                handle: format!("cred-{}", id),
                hourly_limit: None,
                daily_limit: None,
            });
        }
        let health = Arc::new(DestinationHealth::new(SuppressionPolicy::default()));
        let transport = Arc::new(MockTransport::new());
        let history = Arc::new(MemoryHistory::new());
        let dispatcher = Dispatcher::new(
            pool.clone(),
            health.clone(),
            transport.clone(),
            history.clone(),
            policy,
        );
        Harness {
            pool,
            health,
            transport,
            history,
            dispatcher,
        }
    }

    fn slot() -> ContentSlot {
        ContentSlot::new(
            "owner-1".to_string(),
            "hello world".to_string(),
            vec![DestinationId::from("dest-a")],
            3600,
        )
    }

    fn dest(name: &str) -> DestinationId {
        DestinationId::from(name)
    }

    fn network_err() -> TransportError {
        TransportError::Network("connection reset".to_string())
    }

    #[tokio::test]
    async fn test_successful_dispatch() {
        let h = harness(&[1]);
        let s = slot();
        let d = dest("dest-a");

        let result = h.dispatcher.dispatch(&s, &d).await;
        assert!(matches!(result, DispatchResult::Delivered { worker: WorkerId(1), .. }));

        // Worker is in its reuse cooldown: an immediate second acquire fails.
        let now = chrono::Utc::now().timestamp();
        assert_eq!(h.pool.acquire(now, &[]), None);

        let attempts = h.history.attempts();
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].success);
        assert!(attempts[0].failure_kind.is_none());

        let snap = &h.health.snapshot(now)[0];
        assert_eq!(snap.total_attempts, 1);
        assert_eq!(snap.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_suppressed_destination_skipped_without_worker() {
        let h = harness(&[1]);
        let s = slot();
        let d = dest("dest-a");
        let now = chrono::Utc::now().timestamp();
        h.health.record_failure(&d, FailureKind::DestinationInvalid, now);

        let result = h.dispatcher.dispatch(&s, &d).await;
        assert_eq!(result, DispatchResult::Skipped(SkipReason::Suppressed));
        // No transport call, no worker consumed, no audit record.
        assert_eq!(h.transport.call_count(), 0);
        assert!(h.history.attempts().is_empty());
        assert!(h.pool.acquire(now, &[]).is_some());
    }

    #[tokio::test]
    async fn test_no_worker_available() {
        let h = harness(&[]);
        let result = h.dispatcher.dispatch(&slot(), &dest("dest-a")).await;
        assert_eq!(result, DispatchResult::Skipped(SkipReason::NoWorkerAvailable));
        assert_eq!(h.transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_retries_then_succeeds() {
        let h = harness(&[1, 2, 3]);
        let s = slot();
        let d = dest("dest-a");
        h.transport.script(&d, vec![Err(network_err()), Ok("r".to_string())]);

        let result = h.dispatcher.dispatch(&s, &d).await;
        assert!(matches!(result, DispatchResult::Delivered { .. }));
        assert_eq!(h.transport.call_count(), 2);

        let attempts = h.history.attempts();
        assert_eq!(attempts.len(), 2);
        assert!(!attempts[0].success);
        assert_eq!(attempts[0].failure_kind.as_deref(), Some("transient"));
        assert!(attempts[1].success);

        // Mid-retry failures leave the destination streak untouched; the
        // final success resets whatever there was.
        let now = chrono::Utc::now().timestamp();
        let snap = &h.health.snapshot(now)[0];
        assert_eq!(snap.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_transient_retries_exhausted() {
        let h = harness(&[1, 2, 3, 4]);
        let s = slot();
        let d = dest("dest-a");
        h.transport.script(
            &d,
            vec![Err(network_err()), Err(network_err()), Err(network_err())],
        );

        let result = h.dispatcher.dispatch(&s, &d).await;
        assert_eq!(
            result,
            DispatchResult::Failed {
                kind: FailureKind::Transient
            }
        );
        // Initial attempt plus two retries.
        assert_eq!(h.transport.call_count(), 3);
        assert_eq!(h.history.attempts().len(), 3);

        // Only the terminal failure reaches the destination tracker.
        let now = chrono::Utc::now().timestamp();
        let snap = &h.health.snapshot(now)[0];
        assert_eq!(snap.consecutive_failures, 1);
        assert_eq!(snap.total_attempts, 1);
    }

    #[tokio::test]
    async fn test_rate_limited_cools_worker_and_spares_destination() {
        let h = harness(&[1, 2]);
        let s = slot();
        let d = dest("dest-a");
        h.transport.script(
            &d,
            vec![
                Err(TransportError::Provider {
                    code: Some(429),
                    retry_after: Some(120),
                    message: "rate limit".to_string(),
                }),
                Ok("r".to_string()),
            ],
        );

        let before = chrono::Utc::now().timestamp();
        let result = h.dispatcher.dispatch(&s, &d).await;
        assert!(matches!(result, DispatchResult::Delivered { worker: WorkerId(2), .. }));

        // First worker's cooldown reflects the provider wait.
        let snaps = h.pool.snapshot(before);
        let w1 = snaps.iter().find(|s| s.id == WorkerId(1)).unwrap();
        let until = w1.cooldown_until.unwrap();
        assert!(until >= before + 120 && until <= before + 125);

        // No destination penalty for rate limiting.
        let snap = &h.health.snapshot(before)[0];
        assert_eq!(snap.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_banned_suspends_and_retries_on_other_worker() {
        let h = harness(&[1, 2]);
        let s = slot();
        let d = dest("dest-a");
        h.transport.script(
            &d,
            vec![
                Err(TransportError::Provider {
                    code: Some(403),
                    retry_after: None,
                    message: "account banned".to_string(),
                }),
                Ok("r".to_string()),
            ],
        );

        let result = h.dispatcher.dispatch(&s, &d).await;
        assert!(matches!(result, DispatchResult::Delivered { worker: WorkerId(2), .. }));

        let now = chrono::Utc::now().timestamp();
        let snaps = h.pool.snapshot(now);
        let w1 = snaps.iter().find(|s| s.id == WorkerId(1)).unwrap();
        assert_eq!(w1.status, crate::types::WorkerStatus::Suspended);

        // The calls went to two different workers.
        let calls = h.transport.calls();
        assert_eq!(calls[0].0, WorkerId(1));
        assert_eq!(calls[1].0, WorkerId(2));
    }

    #[tokio::test]
    async fn test_banned_with_no_replacement_is_terminal() {
        let h = harness(&[1]);
        let s = slot();
        let d = dest("dest-a");
        h.transport.script(
            &d,
            vec![Err(TransportError::Provider {
                code: Some(403),
                retry_after: None,
                message: "banned".to_string(),
            })],
        );

        let result = h.dispatcher.dispatch(&s, &d).await;
        // The sole worker is suspended and excluded, so the retry finds
        // no worker at all.
        assert_eq!(result, DispatchResult::Skipped(SkipReason::NoWorkerAvailable));
        assert_eq!(h.transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_destination_invalid_is_terminal_and_suppresses() {
        let h = harness(&[1, 2]);
        let s = slot();
        let d = dest("dest-a");
        h.transport.script(
            &d,
            vec![Err(TransportError::Provider {
                code: Some(404),
                retry_after: None,
                message: "channel not found".to_string(),
            })],
        );

        let result = h.dispatcher.dispatch(&s, &d).await;
        assert_eq!(
            result,
            DispatchResult::Failed {
                kind: FailureKind::DestinationInvalid
            }
        );
        assert_eq!(h.transport.call_count(), 1);

        // Follow-up dispatch is skipped before touching the transport.
        let result = h.dispatcher.dispatch(&s, &d).await;
        assert_eq!(result, DispatchResult::Skipped(SkipReason::Suppressed));
        assert_eq!(h.transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_audit_order_ledger_before_history() {
        // After a success the attempt record must observe the worker
        // already cooled down: snapshot inside the sink sees the cooldown.
        struct OrderCheckingSink {
            pool: Arc<WorkerPool>,
            saw_cooldown: Mutex<bool>,
        }

        #[async_trait]
        impl HistorySink for OrderCheckingSink {
            async fn append_attempt(&self, attempt: &PostingAttempt) -> Result<()> {
                let snaps = self.pool.snapshot(attempt.attempted_at);
                let worker = snaps.iter().find(|s| s.id == attempt.worker_id).unwrap();
                *self.saw_cooldown.lock() = worker.cooldown_until.is_some();
                Ok(())
            }
        }

        let pool = Arc::new(WorkerPool::new(WorkerLimits::default()));
        pool.register(&WorkerRegistration {
            id: WorkerId(1),
            handle: "cred-1".to_string(),
            hourly_limit: None,
            daily_limit: None,
        });
        let sink = Arc::new(OrderCheckingSink {
            pool: pool.clone(),
            saw_cooldown: Mutex::new(false),
        });
        let dispatcher = Dispatcher::new(
            pool,
            Arc::new(DestinationHealth::new(SuppressionPolicy::default())),
            Arc::new(MockTransport::new()),
            sink.clone(),
            DispatchPolicy::default(),
        );

        let result = dispatcher.dispatch(&slot(), &dest("dest-a")).await;
        assert!(matches!(result, DispatchResult::Delivered { .. }));
        assert!(*sink.saw_cooldown.lock());
    }

    #[tokio::test]
    async fn test_reuse_cooldown_within_configured_window() {
        let policy = DispatchPolicy {
            reuse_cooldown_min_secs: 30,
            reuse_cooldown_max_secs: 90,
            ..Default::default()
        };
        let h = harness_with_policy(&[1], policy);

        let before = chrono::Utc::now().timestamp();
        let result = h.dispatcher.dispatch(&slot(), &dest("dest-a")).await;
        assert!(matches!(result, DispatchResult::Delivered { .. }));

        let snaps = h.pool.snapshot(before);
        let until = snaps[0].cooldown_until.unwrap();
        assert!(until >= before + 30 && until <= before + 95);
    }
}
