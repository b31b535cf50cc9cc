//! Scheduler loop
//!
//! Polls the slot store for due slots and runs one dispatch cycle per due
//! slot: every destination of the slot is dispatched (with bounded fan-out),
//! then the slot's clock is advanced exactly once. Slots already in flight
//! are never picked up again until their cycle finishes, so a slow cycle
//! spanning several polls cannot double-send.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::dispatch::{DispatchResult, Dispatcher};
use crate::error::Result;
use crate::types::{ContentSlot, SlotId};

/// Storage the scheduler polls for work and advances after each cycle.
#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Active slots whose interval has elapsed (or that were never sent).
    async fn list_due_slots(&self, now: i64) -> Result<Vec<ContentSlot>>;

    /// Stamp the slot's `last_sent_at`, restarting its interval.
    async fn advance_slot(&self, id: &SlotId, now: i64) -> Result<()>;
}

pub struct Scheduler {
    store: Arc<dyn SlotStore>,
    dispatcher: Arc<Dispatcher>,
    /// Caps concurrent transport calls across all cycles.
    fanout: Arc<Semaphore>,
    /// Slots with a cycle currently running.
    in_flight: Arc<Mutex<HashSet<SlotId>>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn SlotStore>, dispatcher: Arc<Dispatcher>, fanout_limit: usize) -> Self {
        Self {
            store,
            dispatcher,
            fanout: Arc::new(Semaphore::new(fanout_limit.max(1))),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Run the polling loop until `shutdown` is set.
    ///
    /// Returns `Err` only on fatal conditions (storage failures); delivery
    /// failures are absorbed by the dispatcher and recorded in the audit
    /// trail.
    pub async fn run(&self, poll_interval_secs: u64, shutdown: Arc<AtomicBool>) -> Result<()> {
        info!(poll_interval_secs, "scheduler started");
        let mut cycles: JoinSet<Result<()>> = JoinSet::new();

        while !shutdown.load(Ordering::Relaxed) {
            // Reap finished cycles; a failed advance is fatal.
            while let Some(joined) = cycles.try_join_next() {
                match joined {
                    Ok(result) => result?,
                    Err(e) => {
                        error!("dispatch cycle panicked: {}", e);
                    }
                }
            }

            self.tick(&mut cycles).await?;

            // Sleep in 1s steps so shutdown is honored promptly.
            for _ in 0..poll_interval_secs {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }

        info!("scheduler stopping, draining in-flight cycles");
        while let Some(joined) = cycles.join_next().await {
            match joined {
                Ok(result) => result?,
                Err(e) => error!("dispatch cycle panicked: {}", e),
            }
        }
        Ok(())
    }

    /// One poll: claim every due slot not already in flight and spawn its
    /// cycle.
    async fn tick(&self, cycles: &mut JoinSet<Result<()>>) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let due = self.store.list_due_slots(now).await?;
        if due.is_empty() {
            debug!("no slots due");
            return Ok(());
        }
        debug!(count = due.len(), "due slots");

        for slot in due {
            if !self.in_flight.lock().insert(slot.id.clone()) {
                debug!(slot = %slot.id, "cycle already in flight, skipping");
                continue;
            }
            let store = self.store.clone();
            let dispatcher = self.dispatcher.clone();
            let fanout = self.fanout.clone();
            let in_flight = self.in_flight.clone();
            cycles.spawn(async move {
                let result = run_cycle(&store, &dispatcher, &fanout, &slot).await;
                in_flight.lock().remove(&slot.id);
                result
            });
        }
        Ok(())
    }

    /// Run every currently-due slot to completion. Used by `--once` and by
    /// tests; the polling loop does not go through here.
    pub async fn run_once(&self) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let due = self.store.list_due_slots(now).await?;
        info!(count = due.len(), "running {} due slot(s)", due.len());
        for slot in due {
            if !self.in_flight.lock().insert(slot.id.clone()) {
                continue;
            }
            let result = run_cycle(&self.store, &self.dispatcher, &self.fanout, &slot).await;
            self.in_flight.lock().remove(&slot.id);
            result?;
        }
        Ok(())
    }
}

/// Dispatch one slot to all of its destinations, then advance its clock.
///
/// The advance happens exactly once per cycle, regardless of per-destination
/// outcomes: a cycle where every destination was skipped still restarts the
/// interval, so a bad destination cannot make a slot spin.
async fn run_cycle(
    store: &Arc<dyn SlotStore>,
    dispatcher: &Arc<Dispatcher>,
    fanout: &Arc<Semaphore>,
    slot: &ContentSlot,
) -> Result<()> {
    let outcomes = join_all(slot.destinations.iter().map(|dest| {
        let fanout = fanout.clone();
        async move {
            // Closed-semaphore acquisition cannot happen here; the permit
            // just bounds concurrent transport calls.
            let _permit = fanout.acquire().await.ok();
            dispatcher.dispatch(slot, dest).await
        }
    }))
    .await;

    let delivered = outcomes
        .iter()
        .filter(|o| matches!(o, DispatchResult::Delivered { .. }))
        .count();
    let skipped = outcomes
        .iter()
        .filter(|o| matches!(o, DispatchResult::Skipped(_)))
        .count();
    let failed = outcomes.len() - delivered - skipped;
    info!(
        slot = %slot.id,
        delivered,
        skipped,
        failed,
        "cycle complete"
    );

    let now = chrono::Utc::now().timestamp();
    store.advance_slot(&slot.id, now).await?;
    Ok(())
}
