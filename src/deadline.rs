//! Deadline enforcement for async operations.

use std::future::Future;
use std::time::Duration;

use crate::error::{DispatchError, Result};

/// Default limit for spawning a protocol server and completing its handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Default limit for a single steady-state call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(120_000);

/// The two deadlines applied by the dispatch core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    /// Connection establishment (process spawn + handshake).
    pub connect: Duration,
    /// Per-call invocation.
    pub call: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            call: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl Deadlines {
    pub fn from_millis(connect_ms: u64, call_ms: u64) -> Self {
        Self {
            connect: Duration::from_millis(connect_ms),
            call: Duration::from_millis(call_ms),
        }
    }
}

/// Await `operation` for at most `limit`.
///
/// On expiry the operation future is dropped and `Timeout { label, limit_ms }`
/// is returned. Dropping stops polling but does not reclaim resources the
/// operation handed off elsewhere (spawned tasks, child processes); owners of
/// such resources must tear them down on timeout.
pub async fn with_deadline<F, T>(operation: F, limit: Duration, label: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_elapsed) => {
            tracing::debug!(name: "deadline.expired", label, limit_ms = limit_ms(limit), "deadline expired");
            Err(DispatchError::Timeout {
                label: label.to_string(),
                limit_ms: limit_ms(limit),
            })
        }
    }
}

fn limit_ms(limit: Duration) -> u64 {
    u64::try_from(limit.as_millis()).unwrap_or(u64::MAX)
}
