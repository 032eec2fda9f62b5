//! Store doubles and helpers for exercising the read path.
//!
//! Everything here goes through the same seams production code uses: the
//! [`ObjectStore`] trait and the engine's budget counters. No privileged
//! access to reader internals is needed to verify behavior.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::budget::MemoryBudget;
use crate::buffer::BufferEngine;
use crate::config::{LayoutId, ObjectId, ReadConfig, RequestId};
use crate::error::{ReadError, ReadResult, StorePhase};
use crate::store::{Extent, InMemoryStore, ObjectAttrs, ObjectStore, ReadBatch};

/// Object id for tests.
pub fn make_object_id(n: u64) -> ObjectId {
    ObjectId::from_parts(0x0a0f, n)
}

/// Request id for tests.
pub fn make_request_id(name: &str) -> RequestId {
    RequestId::new(name)
}

/// Buffer engine with an explicit unit size and budget limit.
pub fn make_engine(unit_bytes: u64, limit_bytes: u64) -> BufferEngine {
    let config = ReadConfig {
        transport_unit_bytes: unit_bytes,
        ..ReadConfig::default()
    };
    BufferEngine::new(&config, MemoryBudget::new(limit_bytes))
}

/// One captured scatter-gather request.
#[derive(Debug, Clone)]
pub struct RecordedBatch {
    pub object: ObjectId,
    pub extents: Vec<Extent>,
    pub data_lens: Vec<usize>,
    pub attrs: Vec<u32>,
}

/// In-memory store that counts calls and captures every read batch.
#[derive(Debug, Default)]
pub struct RecordingStore {
    inner: InMemoryStore,
    open_calls: AtomicU64,
    read_calls: AtomicU64,
    batches: Mutex<Vec<RecordedBatch>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_object(&self, id: ObjectId, layout: LayoutId, data: Vec<u8>) {
        self.inner.put_object(id, layout, data);
    }

    pub fn remove_object(&self, id: ObjectId) -> bool {
        self.inner.remove_object(id)
    }

    pub fn open_calls(&self) -> u64 {
        self.open_calls.load(Ordering::Relaxed)
    }

    pub fn read_calls(&self) -> u64 {
        self.read_calls.load(Ordering::Relaxed)
    }

    pub fn batches(&self) -> Vec<RecordedBatch> {
        self.batches.lock().clone()
    }
}

impl ObjectStore for RecordingStore {
    fn open_object(&self, id: ObjectId) -> BoxFuture<'_, ReadResult<ObjectAttrs>> {
        self.open_calls.fetch_add(1, Ordering::Relaxed);
        self.inner.open_object(id)
    }

    fn read_at<'a>(&'a self, batch: ReadBatch<'a>) -> BoxFuture<'a, ReadResult<()>> {
        self.read_calls.fetch_add(1, Ordering::Relaxed);
        self.batches.lock().push(RecordedBatch {
            object: batch.object,
            extents: batch.extents.to_vec(),
            data_lens: batch.data.iter().map(|slice| slice.len()).collect(),
            attrs: batch.attrs.to_vec(),
        });
        self.inner.read_at(batch)
    }
}

/// Store double that replays scripted outcomes.
///
/// Opens and reads pop their next outcome from a queue; an exhausted queue
/// reports a store error, so a test that forgets to script an outcome
/// fails loudly instead of hanging. Successful reads fill each bound slice
/// with `slot index + 1`.
pub struct ScriptedStore {
    layout: LayoutId,
    size_hint: u64,
    opens: Mutex<VecDeque<ReadResult<()>>>,
    reads: Mutex<VecDeque<ReadResult<()>>>,
    open_calls: AtomicU64,
    read_calls: AtomicU64,
}

impl ScriptedStore {
    pub fn new(layout: LayoutId, size_hint: u64) -> Self {
        Self {
            layout,
            size_hint,
            opens: Mutex::new(VecDeque::new()),
            reads: Mutex::new(VecDeque::new()),
            open_calls: AtomicU64::new(0),
            read_calls: AtomicU64::new(0),
        }
    }

    pub fn push_open(&self, outcome: ReadResult<()>) {
        self.opens.lock().push_back(outcome);
    }

    pub fn push_read(&self, outcome: ReadResult<()>) {
        self.reads.lock().push_back(outcome);
    }

    pub fn open_calls(&self) -> u64 {
        self.open_calls.load(Ordering::Relaxed)
    }

    pub fn read_calls(&self) -> u64 {
        self.read_calls.load(Ordering::Relaxed)
    }
}

impl ObjectStore for ScriptedStore {
    fn open_object(&self, id: ObjectId) -> BoxFuture<'_, ReadResult<ObjectAttrs>> {
        self.open_calls.fetch_add(1, Ordering::Relaxed);
        let outcome = self.opens.lock().pop_front();
        let layout = self.layout;
        let size_hint = self.size_hint;
        Box::pin(async move {
            match outcome {
                Some(Ok(())) => Ok(ObjectAttrs {
                    id,
                    layout,
                    size_hint,
                }),
                Some(Err(err)) => Err(err),
                None => Err(ReadError::store(StorePhase::Open, "open script exhausted")),
            }
        })
    }

    fn read_at<'a>(&'a self, mut batch: ReadBatch<'a>) -> BoxFuture<'a, ReadResult<()>> {
        self.read_calls.fetch_add(1, Ordering::Relaxed);
        let outcome = self.reads.lock().pop_front();
        Box::pin(async move {
            match outcome {
                Some(Ok(())) => {
                    for (i, slice) in batch.data.iter_mut().enumerate() {
                        slice.fill((i as u8).wrapping_add(1));
                    }
                    Ok(())
                }
                Some(Err(err)) => Err(err),
                None => Err(ReadError::store(StorePhase::Read, "read script exhausted")),
            }
        })
    }
}
