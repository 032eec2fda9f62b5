//! Byte-accounting for every fallible allocation on the read path.
//!
//! The store and the transport both hand the gateway fixed-capacity memory;
//! the budget is what turns "allocation failed" into a synchronous,
//! injectable, leak-countable outcome. Operation contexts, vector sets, and
//! buffer-pool units all charge the same budget, and tests size the limit
//! to trip any one of those reservations deterministically.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use crate::error::{ReadError, ReadResult};

#[derive(Debug)]
struct BudgetInner {
    limit: u64,
    used: AtomicU64,
    reserves: AtomicU64,
    releases: AtomicU64,
}

/// Shared allocation budget with a hard byte limit.
///
/// Cheap-to-clone handle; all clones account against the same limit. A CAS
/// loop admits reservations so concurrent callers never over-admit.
/// Reserve and release counts are kept for leak verification: after every
/// owner of a [`BudgetCharge`] is dropped, `used()` must be zero and the
/// two counters must match.
#[derive(Debug, Clone)]
pub struct MemoryBudget {
    inner: Arc<BudgetInner>,
}

impl MemoryBudget {
    /// Creates a budget with the given byte limit.
    pub fn new(limit_bytes: u64) -> Self {
        Self {
            inner: Arc::new(BudgetInner {
                limit: limit_bytes,
                used: AtomicU64::new(0),
                reserves: AtomicU64::new(0),
                releases: AtomicU64::new(0),
            }),
        }
    }

    /// Creates a budget that never refuses a reservation.
    pub fn unlimited() -> Self {
        Self::new(u64::MAX)
    }

    /// Reserves `bytes` against the limit.
    ///
    /// Returns a [`BudgetCharge`] receipt that releases the reservation
    /// when dropped, or `OutOfMemory` if the reservation would exceed the
    /// limit. A zero-byte reservation always succeeds and still counts in
    /// the reserve/release pairing.
    pub fn reserve(&self, bytes: u64) -> ReadResult<BudgetCharge> {
        let mut current = self.inner.used.load(Ordering::Acquire);
        loop {
            let available = self.inner.limit.saturating_sub(current);
            if bytes > available {
                return Err(ReadError::OutOfMemory {
                    requested: bytes,
                    available,
                });
            }
            match self.inner.used.compare_exchange_weak(
                current,
                current + bytes,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        self.inner.reserves.fetch_add(1, Ordering::Relaxed);
        Ok(BudgetCharge {
            budget: self.clone(),
            bytes,
        })
    }

    fn release(&self, bytes: u64) {
        let mut current = self.inner.used.load(Ordering::Acquire);
        loop {
            let next = if bytes > current {
                warn!(released = bytes, held = current, "budget underflow");
                0
            } else {
                current - bytes
            };
            match self.inner.used.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        self.inner.releases.fetch_add(1, Ordering::Relaxed);
    }

    /// Bytes currently reserved.
    pub fn used(&self) -> u64 {
        self.inner.used.load(Ordering::Acquire)
    }

    /// Bytes still available for reservation.
    pub fn available(&self) -> u64 {
        self.inner.limit.saturating_sub(self.used())
    }

    /// The configured limit.
    pub fn limit(&self) -> u64 {
        self.inner.limit
    }

    /// Number of successful reservations made so far.
    pub fn reserve_count(&self) -> u64 {
        self.inner.reserves.load(Ordering::Relaxed)
    }

    /// Number of releases performed so far.
    pub fn release_count(&self) -> u64 {
        self.inner.releases.load(Ordering::Relaxed)
    }
}

/// Move-only receipt for a budget reservation.
///
/// Dropping the charge releases the reserved bytes exactly once. There is
/// no way to release twice: the receipt has no Clone and no manual free
/// beyond consuming `self`.
#[derive(Debug)]
pub struct BudgetCharge {
    budget: MemoryBudget,
    bytes: u64,
}

impl BudgetCharge {
    /// Bytes covered by this charge.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Releases the charge now instead of at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for BudgetCharge {
    fn drop(&mut self) {
        self.budget.release(self.bytes);
    }
}
