use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the read-path counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadMetricsSnapshot {
    pub reads_launched: u64,
    pub reads_completed: u64,
    pub reads_failed: u64,
    pub oom_events: u64,
    pub bytes_read: u64,
}

/// Counters kept by one reader across its lifetime.
///
/// All counters are monotonic; `snapshot()` is the only read surface.
#[derive(Debug, Default)]
pub struct ReadMetrics {
    reads_launched: AtomicU64,
    reads_completed: AtomicU64,
    reads_failed: AtomicU64,
    oom_events: AtomicU64,
    bytes_read: AtomicU64,
}

impl ReadMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_reads_launched(&self) {
        self.reads_launched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_reads_completed(&self) {
        self.reads_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_reads_failed(&self) {
        self.reads_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_oom_events(&self) {
        self.oom_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ReadMetricsSnapshot {
        ReadMetricsSnapshot {
            reads_launched: self.reads_launched.load(Ordering::Relaxed),
            reads_completed: self.reads_completed.load(Ordering::Relaxed),
            reads_failed: self.reads_failed.load(Ordering::Relaxed),
            oom_events: self.oom_events.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
        }
    }
}
