//! Delivery transport boundary
//!
//! The engine never talks to a provider directly; it hands (worker,
//! destination, content) to a `Transport` and interprets the outcome
//! through the failure classifier. Two implementations live here: a
//! scriptable mock for tests and an exec transport that delegates
//! delivery to an external command.

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tracing::debug;

use crate::types::{DestinationId, WorkerId};

/// Transport-layer error signal, prior to classification.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("delivery timed out after {0}s")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(String),

    #[error("provider rejected delivery: {message}")]
    Provider {
        code: Option<u16>,
        retry_after: Option<u64>,
        message: String,
    },
}

pub type DeliveryResult = std::result::Result<String, TransportError>;

/// The external capability that actually delivers a piece of content.
///
/// Implementations resolve the worker's credentials themselves; the engine
/// only passes the opaque worker id. On success the provider-side receipt
/// (post id, message id, ...) is returned for the audit trail.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(
        &self,
        worker: WorkerId,
        destination: &DestinationId,
        content: &str,
    ) -> DeliveryResult;
}

// ============================================================================
// Exec transport
// ============================================================================

/// Exit codes the delivery command uses to signal structured failures.
/// Anything else non-zero is reported as a network-level error.
const EXIT_RATE_LIMITED: i32 = 2;
const EXIT_BANNED: i32 = 3;
const EXIT_INVALID_DESTINATION: i32 = 4;

/// Transport that shells out to a configured delivery command.
///
/// The command receives the worker id and destination in
/// `SYNDICAST_WORKER` / `SYNDICAST_DESTINATION` and the content on stdin.
/// Exit code 0 means delivered (stdout is the receipt); codes 2/3/4 signal
/// rate limiting, a ban and an invalid destination respectively. A
/// rate-limiting command may write `retry-after=<seconds>` to stderr.
pub struct ExecTransport {
    command: String,
    args: Vec<String>,
}

impl ExecTransport {
    pub fn new(command: String, args: Vec<String>) -> Self {
        Self { command, args }
    }
}

#[async_trait]
impl Transport for ExecTransport {
    async fn deliver(
        &self,
        worker: WorkerId,
        destination: &DestinationId,
        content: &str,
    ) -> DeliveryResult {
        let mut child = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .env("SYNDICAST_WORKER", worker.to_string())
            .env("SYNDICAST_DESTINATION", destination.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // The dispatcher bounds deliveries with a timeout; when that
            // drops this future mid-wait, the command must die with it.
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TransportError::Network(format!("failed to spawn {}: {}", self.command, e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(content.as_bytes())
                .await
                .map_err(|e| TransportError::Network(format!("failed to write content: {}", e)))?;
            // Closing stdin lets `cat`-style commands terminate.
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| TransportError::Network(format!("delivery command failed: {}", e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        debug!(worker = %worker, destination = %destination, code = ?output.status.code(), "delivery command finished");

        match output.status.code() {
            Some(0) => {
                let receipt = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if receipt.is_empty() {
                    Ok("delivered".to_string())
                } else {
                    Ok(receipt)
                }
            }
            Some(EXIT_RATE_LIMITED) => Err(TransportError::Provider {
                code: Some(429),
                retry_after: parse_retry_after(&stderr),
                message: fallback(&stderr, "rate limit exceeded"),
            }),
            Some(EXIT_BANNED) => Err(TransportError::Provider {
                code: Some(403),
                retry_after: None,
                message: fallback(&stderr, "worker banned"),
            }),
            Some(EXIT_INVALID_DESTINATION) => Err(TransportError::Provider {
                code: Some(404),
                retry_after: None,
                message: fallback(&stderr, "invalid destination"),
            }),
            _ => Err(TransportError::Network(fallback(
                &stderr,
                "delivery command failed",
            ))),
        }
    }
}

fn fallback(stderr: &str, default: &str) -> String {
    if stderr.is_empty() {
        default.to_string()
    } else {
        stderr.to_string()
    }
}

/// Extract `retry-after=<seconds>` from command stderr, if present.
fn parse_retry_after(stderr: &str) -> Option<u64> {
    stderr
        .lines()
        .find_map(|line| line.trim().strip_prefix("retry-after="))
        .and_then(|v| v.trim().parse().ok())
}

// ============================================================================
// Mock transport
// ============================================================================

/// Scriptable transport for tests.
///
/// Available for all builds (not just cfg(test)) so integration tests can
/// exercise the full engine without network access. Results are scripted
/// per destination and consumed in order; unscripted deliveries succeed.
pub struct MockTransport {
    scripts: Mutex<HashMap<DestinationId, VecDeque<DeliveryResult>>>,
    calls: Mutex<Vec<(WorkerId, DestinationId)>>,
    delay: Duration,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delay: Duration::from_millis(0),
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    /// Queue the next results for a destination, consumed one per call.
    pub fn script(&self, dest: &DestinationId, results: Vec<DeliveryResult>) {
        self.scripts
            .lock()
            .entry(dest.clone())
            .or_default()
            .extend(results);
    }

    /// Every (worker, destination) pair handed to `deliver`, in order.
    pub fn calls(&self) -> Vec<(WorkerId, DestinationId)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn deliver(
        &self,
        worker: WorkerId,
        destination: &DestinationId,
        _content: &str,
    ) -> DeliveryResult {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let call_no = {
            let mut calls = self.calls.lock();
            calls.push((worker, destination.clone()));
            calls.len()
        };

        let scripted = self
            .scripts
            .lock()
            .get_mut(destination)
            .and_then(|queue| queue.pop_front());

        match scripted {
            Some(result) => result,
            None => Ok(format!("mock:{}", call_no)),
        }
    }
}
