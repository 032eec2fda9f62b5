use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::warn;

use crate::config::RequestId;
use crate::error::{ReadError, ReadResult};
use crate::store::ObjectStore;

const OP_PENDING: u8 = 0;
const OP_SUCCESS: u8 = 1;
const OP_FAILED: u8 = 2;

/// One-shot completion handle for a storage operation.
///
/// The signal is the success/failure continuation pair of an asynchronous
/// operation: exactly one of the two outcomes fires, exactly once. The
/// pending→completed transition is claimed by CAS, so a second completion
/// attempt is rejected (and counted) rather than delivered.
#[derive(Debug, Default)]
pub struct OpSignal {
    state: AtomicU8,
    result: Mutex<Option<ReadResult<()>>>,
    notify: Notify,
    success_fires: AtomicU64,
    failure_fires: AtomicU64,
    rejected: AtomicU64,
}

impl OpSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the completion. Returns `false` if the signal had already
    /// completed; the new result is discarded in that case.
    pub fn complete(&self, result: ReadResult<()>) -> bool {
        let target = if result.is_ok() {
            OP_SUCCESS
        } else {
            OP_FAILED
        };
        if self
            .state
            .compare_exchange(OP_PENDING, target, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        if result.is_ok() {
            self.success_fires.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failure_fires.fetch_add(1, Ordering::Relaxed);
        }
        *self.result.lock() = Some(result);
        self.notify.notify_waiters();
        true
    }

    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) != OP_PENDING
    }

    /// The completed result, if any.
    pub fn result(&self) -> Option<ReadResult<()>> {
        self.result.lock().clone()
    }

    /// Resolves once the signal completes.
    pub async fn wait(&self) -> ReadResult<()> {
        loop {
            if let Some(result) = self.result() {
                return result;
            }
            self.notify.notified().await;
        }
    }

    /// Times the success continuation has fired (0 or 1).
    pub fn success_fires(&self) -> u64 {
        self.success_fires.load(Ordering::Relaxed)
    }

    /// Times the failure continuation has fired (0 or 1).
    pub fn failure_fires(&self) -> u64 {
        self.failure_fires.load(Ordering::Relaxed)
    }

    /// Completion attempts rejected because the signal had already fired.
    pub fn rejected_completions(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// Base context every asynchronous storage call is built on.
///
/// Couples the request id, the one-shot completion signal, the desired
/// operation count, and the injected store handle. The store handle is the
/// substitution seam: a scripted or in-memory backend drops in without the
/// reader noticing.
pub struct AsyncOpContext {
    request_id: RequestId,
    op_count: usize,
    store: Arc<dyn ObjectStore>,
    signal: Arc<OpSignal>,
}

impl AsyncOpContext {
    pub fn new(
        request_id: RequestId,
        op_count: usize,
        store: Arc<dyn ObjectStore>,
        signal: Arc<OpSignal>,
    ) -> Self {
        Self {
            request_id,
            op_count,
            store,
            signal,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn op_count(&self) -> usize {
        self.op_count
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn signal(&self) -> &Arc<OpSignal> {
        &self.signal
    }

    /// Awaits a storage future and fires the signal with its outcome.
    ///
    /// This is the only completer of the signal; if the signal turns out to
    /// have fired already the duplicate is swallowed and logged, never
    /// delivered twice.
    pub async fn run<T, F>(&self, fut: F) -> ReadResult<T>
    where
        F: Future<Output = ReadResult<T>>,
    {
        let out = fut.await;
        let outcome = match &out {
            Ok(_) => Ok(()),
            Err(err) => Err(err.clone()),
        };
        if !self.signal.complete(outcome) {
            warn!(
                request_id = %self.request_id,
                "operation completed more than once; duplicate dropped"
            );
        }
        out
    }
}
