//! Object-reader state machine: open → read → iterate.
//!
//! One reader serves one client request. It opens the object to learn its
//! attributes, sizes a scatter-gather read by reconciling the store's
//! layout unit size against the transport's buffer unit size, launches the
//! read into a zero-copy buffer pool, and exposes the result either as an
//! iterable sequence of buffer units or as a whole-buffer ownership
//! transfer to the response path.

use std::fmt::{self, Display};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::budget::MemoryBudget;
use crate::buffer::{BufferEngine, OwnedBuffer, ZeroCopyBuffer};
use crate::completion::AsyncOpContext;
use crate::config::{LayoutId, ObjectId, RequestId};
use crate::context::{OpContext, OpStatus, RwVectorSet};
use crate::error::{ReadError, ReadResult};
use crate::metrics::{ReadMetrics, ReadMetricsSnapshot};
use crate::store::{LayoutMap, ObjectAttrs, ObjectStore, ReadBatch};

/// Reader lifecycle states.
///
/// State is mutated only by the reader itself, either synchronously when an
/// allocation fails or when a launched operation completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Start,
    Opening,
    FailedToLaunch,
    Failed,
    Reading,
    Success,
    Missing,
    OutOfMemory,
}

impl Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReaderState::Start => "start",
            ReaderState::Opening => "opening",
            ReaderState::FailedToLaunch => "failed_to_launch",
            ReaderState::Failed => "failed",
            ReaderState::Reading => "reading",
            ReaderState::Success => "success",
            ReaderState::Missing => "missing",
            ReaderState::OutOfMemory => "out_of_memory",
        };
        write!(f, "{name}")
    }
}

/// Everything one launched operation owns: the base async context, the
/// operation slots, and (for reads) the vector set and buffer pool.
///
/// Whatever was not transferred out is freed when the context drops.
struct ReaderContext {
    base: AsyncOpContext,
    op_ctx: OpContext,
    rw: Option<RwVectorSet>,
    buffer: Option<ZeroCopyBuffer>,
}

impl ReaderContext {
    fn create(
        request_id: RequestId,
        store: Arc<dyn ObjectStore>,
        budget: &MemoryBudget,
    ) -> ReadResult<Self> {
        let op_ctx = OpContext::create(request_id.clone(), 1, budget)?;
        let signal = op_ctx
            .signal(0)
            .cloned()
            .ok_or_else(|| ReadError::precondition("operation context has no slots"))?;
        let base = AsyncOpContext::new(request_id, 1, store, signal);
        Ok(Self {
            base,
            op_ctx,
            rw: None,
            buffer: None,
        })
    }
}

/// Asynchronous object reader.
///
/// The object id is resolved at a higher layer and is immutable for the
/// reader's lifetime. Exactly one operation is outstanding at a time; the
/// `&mut self` receiver of the async operations enforces that callers
/// await one completion before launching the next.
pub struct ObjectReader {
    request_id: RequestId,
    object_id: ObjectId,
    layout: LayoutId,
    layout_unit_bytes: u64,
    store: Arc<dyn ObjectStore>,
    engine: BufferEngine,
    metrics: Arc<ReadMetrics>,
    state: ReaderState,
    opened: Option<ObjectAttrs>,
    open_context: Option<ReaderContext>,
    reader_context: Option<ReaderContext>,
    iteration_index: usize,
    bound_units: usize,
    last_index: u64,
}

impl std::fmt::Debug for ObjectReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectReader")
            .field("request_id", &self.request_id)
            .field("object_id", &self.object_id)
            .field("layout", &self.layout)
            .field("layout_unit_bytes", &self.layout_unit_bytes)
            .field("engine", &self.engine)
            .field("metrics", &self.metrics)
            .field("state", &self.state)
            .field("iteration_index", &self.iteration_index)
            .field("bound_units", &self.bound_units)
            .field("last_index", &self.last_index)
            .finish_non_exhaustive()
    }
}

impl ObjectReader {
    /// Creates a reader for one object.
    ///
    /// The layout id must resolve through the layout map; zero or unknown
    /// ids are rejected here, before any store traffic.
    pub fn new(
        request_id: RequestId,
        object_id: ObjectId,
        layout: LayoutId,
        store: Arc<dyn ObjectStore>,
        engine: BufferEngine,
    ) -> ReadResult<Self> {
        let layout_unit_bytes = LayoutMap::default().unit_bytes(layout)?;
        debug!(
            request_id = %request_id,
            object = %object_id,
            layout = %layout,
            layout_unit_bytes,
            "reader created"
        );
        Ok(Self {
            request_id,
            object_id,
            layout,
            layout_unit_bytes,
            store,
            engine,
            metrics: Arc::new(ReadMetrics::new()),
            state: ReaderState::Start,
            opened: None,
            open_context: None,
            reader_context: None,
            iteration_index: 0,
            bound_units: 0,
            last_index: 0,
        })
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn layout(&self) -> LayoutId {
        self.layout
    }

    /// The store's unit size for this object's layout.
    pub fn layout_unit_bytes(&self) -> u64 {
        self.layout_unit_bytes
    }

    /// Next unread byte offset within the object.
    pub fn last_index(&self) -> u64 {
        self.last_index
    }

    /// Positions the cursor, e.g. at a range start before the first read.
    ///
    /// The cursor only moves forward once reads are issued; repositioning
    /// mid-stream discards nothing that was already buffered.
    pub fn set_last_index(&mut self, index: u64) {
        self.last_index = index;
    }

    pub fn metrics(&self) -> ReadMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Whether the metadata-only open has succeeded.
    pub fn is_opened(&self) -> bool {
        self.opened.is_some()
    }

    /// Attributes learned from the open, once available.
    pub fn object_attrs(&self) -> Option<&ObjectAttrs> {
        self.opened.as_ref()
    }

    /// Opens the object to learn the attributes needed for block-size
    /// arithmetic. Idempotent once successful.
    ///
    /// Not-found moves the reader to `missing`, any other store failure to
    /// `failed`; an allocation failure before the open is issued returns
    /// `OutOfMemory` synchronously without contacting the store.
    pub async fn open(&mut self) -> ReadResult<()> {
        if self.opened.is_some() {
            return Ok(());
        }
        self.state = ReaderState::Opening;
        let mut ctx = match ReaderContext::create(
            self.request_id.clone(),
            Arc::clone(&self.store),
            self.engine.budget(),
        ) {
            Ok(ctx) => ctx,
            Err(err) => return Err(self.fail_launch(err)),
        };
        ctx.op_ctx.set_status(0, OpStatus::Launched);
        let result = {
            let fut = ctx.base.store().open_object(self.object_id);
            ctx.base.run(fut).await
        };
        ctx.op_ctx.set_status(0, OpStatus::Completed);
        self.open_context = Some(ctx);
        match result {
            Ok(attrs) => {
                debug!(
                    request_id = %self.request_id,
                    object = %self.object_id,
                    size_hint = attrs.size_hint,
                    "object opened"
                );
                self.opened = Some(attrs);
                Ok(())
            }
            Err(err @ ReadError::NotFound(_)) => {
                self.state = ReaderState::Missing;
                warn!(
                    request_id = %self.request_id,
                    object = %self.object_id,
                    "object missing at open"
                );
                Err(err)
            }
            Err(err) => {
                self.state = ReaderState::Failed;
                warn!(
                    request_id = %self.request_id,
                    object = %self.object_id,
                    error = %err,
                    "open failed"
                );
                Err(err)
            }
        }
    }

    /// Thin wrapper over [`ObjectReader::open`] for existence checks:
    /// not-found maps to `missing`, any other failure to `failed`.
    pub async fn check_object_exist(&mut self) -> ReadResult<()> {
        self.open().await
    }

    /// Reads `block_count` layout blocks starting at the persisted cursor.
    ///
    /// The total read size is `block_count * layout_unit_bytes`; the pool
    /// is carved into `ceil(total / transport_unit_bytes)` units, which is
    /// where the store's and the transport's granularities meet. Returns
    /// the bytes read on success. Allocation failures are reported
    /// synchronously as `OutOfMemory` without contacting the store.
    pub async fn read_object_data(&mut self, block_count: usize) -> ReadResult<u64> {
        if block_count == 0 {
            return Err(ReadError::precondition("block_count must be >= 1"));
        }
        if self.opened.is_none() {
            return Err(ReadError::precondition(
                "object must be opened before reading",
            ));
        }
        let total_read_size = block_count as u64 * self.layout_unit_bytes;
        let transport_unit = self.engine.unit_bytes();
        let units_needed = ((total_read_size + transport_unit - 1) / transport_unit) as usize;
        debug!(
            request_id = %self.request_id,
            object = %self.object_id,
            blocks = block_count,
            total_read_size,
            units_needed,
            cursor = self.last_index,
            "launching read"
        );

        let budget = self.engine.budget().clone();
        let mut ctx = match ReaderContext::create(
            self.request_id.clone(),
            Arc::clone(&self.store),
            &budget,
        ) {
            Ok(ctx) => ctx,
            Err(err) => return Err(self.fail_launch(err)),
        };
        let mut set = match RwVectorSet::create(self.request_id.clone(), units_needed, &budget) {
            Ok(set) => set,
            Err(err) => return Err(self.fail_launch(err)),
        };
        let mut buffer = match ZeroCopyBuffer::new(
            self.request_id.clone(),
            total_read_size,
            self.engine.clone(),
        ) {
            Ok(buffer) => buffer,
            Err(err) => return Err(self.fail_launch(err)),
        };
        if let Err(err) = buffer.initialize() {
            return Err(self.fail_launch(err));
        }
        if let Err(err) = buffer.bind_read_targets(&mut set, &mut self.last_index) {
            return Err(self.fail_launch(err));
        }

        self.bound_units = set.bound_len();
        self.iteration_index = 0;
        self.state = ReaderState::Reading;
        self.metrics.incr_reads_launched();
        ctx.op_ctx.set_status(0, OpStatus::Launched);

        let result = {
            let batch = ReadBatch {
                request_id: self.request_id.clone(),
                object: self.object_id,
                extents: set.extents(),
                data: buffer.io_slices_mut(),
                attrs: set.attrs(),
            };
            let fut = ctx.base.store().read_at(batch);
            ctx.base.run(fut).await
        };
        ctx.op_ctx.set_status(0, OpStatus::Completed);
        ctx.rw = Some(set);
        ctx.buffer = Some(buffer);
        self.reader_context = Some(ctx);

        match result {
            Ok(()) => {
                self.state = ReaderState::Success;
                self.metrics.incr_reads_completed();
                self.metrics.add_bytes_read(total_read_size);
                debug!(
                    request_id = %self.request_id,
                    object = %self.object_id,
                    bytes = total_read_size,
                    "read complete"
                );
                Ok(total_read_size)
            }
            Err(err @ ReadError::NotFound(_)) => {
                self.state = ReaderState::Missing;
                self.metrics.incr_reads_failed();
                warn!(
                    request_id = %self.request_id,
                    object = %self.object_id,
                    "object vanished during read"
                );
                Err(err)
            }
            Err(err) => {
                self.state = ReaderState::Failed;
                self.metrics.incr_reads_failed();
                warn!(
                    request_id = %self.request_id,
                    object = %self.object_id,
                    error = %err,
                    "read failed"
                );
                Err(err)
            }
        }
    }

    fn fail_launch(&mut self, err: ReadError) -> ReadError {
        if err.is_out_of_memory() {
            self.state = ReaderState::OutOfMemory;
            self.metrics.incr_oom_events();
        } else {
            self.state = ReaderState::FailedToLaunch;
        }
        warn!(
            request_id = %self.request_id,
            object = %self.object_id,
            error = %err,
            "failed to launch storage operation"
        );
        err
    }

    /// First buffered unit of the last read, restarting the iteration.
    ///
    /// Returns `None` when nothing is buffered.
    pub fn first_block(&mut self) -> Option<&[u8]> {
        self.iteration_index = 0;
        self.next_block()
    }

    /// Next buffered unit, in bind order; `None` once exhausted.
    ///
    /// The sequence is finite and not restartable past exhaustion; a fresh
    /// read starts a fresh sequence.
    pub fn next_block(&mut self) -> Option<&[u8]> {
        if self.iteration_index >= self.bound_units {
            return None;
        }
        let index = self.iteration_index;
        self.iteration_index += 1;
        self.reader_context.as_ref()?.buffer.as_ref()?.unit(index)
    }

    /// The buffer pool of the last read, for range shaping.
    pub fn buffer(&self) -> Option<&ZeroCopyBuffer> {
        self.reader_context.as_ref()?.buffer.as_ref()
    }

    pub fn buffer_mut(&mut self) -> Option<&mut ZeroCopyBuffer> {
        self.reader_context.as_mut()?.buffer.as_mut()
    }

    /// Transfers the whole accumulated buffer to the caller.
    ///
    /// At most one transfer succeeds; afterwards the reader's own teardown
    /// no longer touches that memory.
    pub fn take_buffer(&mut self) -> Option<OwnedBuffer> {
        self.reader_context
            .as_mut()?
            .buffer
            .as_mut()?
            .release_ownership()
    }

    /// Transfers the last read's vector set to the caller.
    ///
    /// The set is a plain move; once taken, the reader's teardown no
    /// longer owns it.
    pub fn take_rw_vectors(&mut self) -> Option<RwVectorSet> {
        self.reader_context.as_mut()?.rw.take()
    }
}
