//! Failure classification
//!
//! Maps transport-layer error signals into the abstract failure taxonomy
//! that drives retry, cooldown and suspension decisions. This is the only
//! place provider-specific codes and message fragments are interpreted;
//! everything downstream works with `FailureKind` alone.

use crate::transport::TransportError;
use crate::types::FailureKind;

/// Wait applied when a provider signals rate limiting without a
/// retry-after hint.
pub const DEFAULT_RATE_LIMIT_WAIT_SECS: u64 = 60;

/// Classify a transport error. Pure: the same error always yields the
/// same kind. Unrecognized signals map to `Unknown`, which callers treat
/// as transient — never as a ban, to avoid false-positive suspensions.
pub fn classify(err: &TransportError) -> FailureKind {
    match err {
        TransportError::Timeout(_) | TransportError::Network(_) => FailureKind::Transient,
        TransportError::Provider {
            code,
            retry_after,
            message,
        } => classify_provider(*code, *retry_after, message),
    }
}

fn classify_provider(code: Option<u16>, retry_after: Option<u64>, message: &str) -> FailureKind {
    let msg = message.to_lowercase();

    if code == Some(429)
        || msg.contains("rate limit")
        || msg.contains("too many requests")
        || msg.contains("slow down")
    {
        return FailureKind::RateLimited {
            wait_secs: retry_after.unwrap_or(DEFAULT_RATE_LIMIT_WAIT_SECS),
        };
    }

    if matches!(code, Some(401) | Some(403))
        || msg.contains("banned")
        || msg.contains("suspended")
        || msg.contains("forbidden")
        || msg.contains("account disabled")
    {
        return FailureKind::Banned;
    }

    if matches!(code, Some(404) | Some(410))
        || msg.contains("not found")
        || msg.contains("no such")
        || msg.contains("invalid destination")
        || msg.contains("gone")
    {
        return FailureKind::DestinationInvalid;
    }

    FailureKind::Unknown
}
