//! Provisioning-aware retry.
//!
//! A freshly scheduled deployment answers `503` until its container is up.
//! [`RetryPolicy::run`] keeps re-issuing the call at a fixed interval while
//! the outcome is [`DispatchOutcome::StillProvisioning`], and gives up once
//! the accumulated wall-clock time reaches `max_elapsed`.  The last pause
//! is cut short so the final attempt lands on the deadline.  Any other
//! failure is returned immediately.  No jitter: there is exactly one
//! slow-starting resource, not a herd.

use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

/// Default pause between attempts.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Result of one call-establishment attempt.
#[derive(Debug)]
pub enum DispatchOutcome<T, E> {
    Ready(T),
    /// The remote is not ready yet; carries the response body for logging.
    StillProvisioning(String),
    Failed(E),
}

/// Why [`RetryPolicy::run`] gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    Failed(E),
    Timeout { elapsed: Duration, detail: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_elapsed: Duration,
}

impl RetryPolicy {
    pub fn new(interval: Duration, max_elapsed: Duration) -> Self {
        Self {
            interval,
            max_elapsed,
        }
    }

    /// Constant-interval policy with the default 1s spacing.
    pub fn with_timeout(max_elapsed: Duration) -> Self {
        Self::new(DEFAULT_INTERVAL, max_elapsed)
    }

    /// Drive `op` until it is ready, fails, or the deadline passes.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DispatchOutcome<T, E>>,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op().await {
                DispatchOutcome::Ready(value) => return Ok(value),
                DispatchOutcome::Failed(e) => return Err(RetryError::Failed(e)),
                DispatchOutcome::StillProvisioning(detail) => {
                    let elapsed = started.elapsed();
                    if elapsed >= self.max_elapsed {
                        warn!(
                            "retry: still provisioning after {} attempts ({:?}), giving up",
                            attempt, elapsed
                        );
                        return Err(RetryError::Timeout { elapsed, detail });
                    }
                    let pause = self.interval.min(self.max_elapsed - elapsed);
                    debug!("retry: attempt {} still provisioning, sleeping {:?}", attempt, pause);
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_timeout(Duration::from_secs(180))
    }
}

// ── Tests ────────────────────────────────────────────────────
