//! Syndicast - worker-pool dispatch engine for scheduled content posting
//!
//! This library provides the scheduling core: a rate/cooldown ledger over a
//! pool of sending identities, destination health tracking with escalating
//! suppression, failure classification and the dispatch/scheduler loops that
//! tie them together.

pub mod classify;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod ledger;
pub mod logging;
pub mod pool;
pub mod scheduler;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::{Database, DestinationStats, WorkerStats};
pub use dispatch::{DispatchPolicy, DispatchResult, Dispatcher, HistorySink, SkipReason};
pub use error::{Result, SyndicastError};
pub use health::{DestinationHealth, SuppressionPolicy};
pub use ledger::{RateLedger, ReserveRefusal, WorkerLimits};
pub use pool::WorkerPool;
pub use scheduler::{Scheduler, SlotStore};
pub use transport::{ExecTransport, MockTransport, Transport, TransportError};
pub use types::{
    ContentSlot, DestinationId, FailureKind, PostingAttempt, SlotId, WorkerId, WorkerRegistration,
};
