//! Admission control — load shedding on concurrent in-flight requests.
//!
//! A counting semaphore sized by the deployment's `concurrency`.  There is
//! no queue: a request that finds the pool saturated is turned away
//! immediately (`429`).  The saturation check and the acquisition are a
//! single `try_acquire_owned`, so two racing requests can never both take
//! the last slot, and releasing a slot (dropping the permit) needs no
//! coordination with concurrent admission attempts.
//!
//! ```text
//!   try_admit ──▶ Some(AdmissionSlot) ──drop──▶ slot back in pool
//!            └──▶ None  (saturated → 429)
//! ```
//!
//! For streamed responses the slot travels inside the response body (see
//! [`GuardedStream`](super::stream::GuardedStream)) and is released only
//! when the stream is exhausted or dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Point-in-time counters for the metrics endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmissionStats {
    pub concurrency: usize,
    pub in_flight: usize,
    pub admitted_total: u64,
    pub rejected_total: u64,
}

struct Counters {
    admitted: AtomicU64,
    rejected: AtomicU64,
}

/// Bounds concurrently processing requests for one server process.
#[derive(Clone)]
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    counters: Arc<Counters>,
}

impl AdmissionController {
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            counters: Arc::new(Counters {
                admitted: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
            }),
        }
    }

    /// Take a slot if one is free; never waits.
    pub fn try_admit(&self) -> Option<AdmissionSlot> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => {
                self.counters.admitted.fetch_add(1, Ordering::Relaxed);
                Some(AdmissionSlot { _permit: permit })
            }
            Err(_) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                debug!("admission: saturated ({} in flight)", self.concurrency);
                None
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.concurrency - self.semaphore.available_permits()
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn stats(&self) -> AdmissionStats {
        AdmissionStats {
            concurrency: self.concurrency,
            in_flight: self.in_flight(),
            admitted_total: self.counters.admitted.load(Ordering::Relaxed),
            rejected_total: self.counters.rejected.load(Ordering::Relaxed),
        }
    }
}

/// A held capacity token; dropping it returns the slot exactly once.
#[derive(Debug)]
pub struct AdmissionSlot {
    _permit: OwnedSemaphorePermit,
}

// ── Tests ────────────────────────────────────────────────────
