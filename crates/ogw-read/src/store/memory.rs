use std::collections::HashMap;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::trace;

use crate::config::{LayoutId, ObjectId};
use crate::error::{ReadError, ReadResult, StorePhase};

use super::{ObjectAttrs, ObjectStore, ReadBatch};

#[derive(Debug, Clone)]
struct StoredObject {
    layout: LayoutId,
    data: Vec<u8>,
}

/// In-memory object store.
///
/// The reference backend for embedding and for the integration tests:
/// objects live in a map, reads copy the addressed ranges into the caller's
/// bound slices. Reads past the end of an object zero-fill, matching the
/// block-hole semantics of the real store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    objects: Mutex<HashMap<ObjectId, StoredObject>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) an object.
    pub fn put_object(&self, id: ObjectId, layout: LayoutId, data: Vec<u8>) {
        self.objects
            .lock()
            .insert(id, StoredObject { layout, data });
    }

    /// Remove an object, e.g. to simulate a concurrent delete between open
    /// and read.
    pub fn remove_object(&self, id: ObjectId) -> bool {
        self.objects.lock().remove(&id).is_some()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.lock().contains_key(&id)
    }
}

impl ObjectStore for InMemoryStore {
    fn open_object(&self, id: ObjectId) -> BoxFuture<'_, ReadResult<ObjectAttrs>> {
        Box::pin(async move {
            let objects = self.objects.lock();
            match objects.get(&id) {
                Some(object) => Ok(ObjectAttrs {
                    id,
                    layout: object.layout,
                    size_hint: object.data.len() as u64,
                }),
                None => Err(ReadError::not_found(StorePhase::Open)),
            }
        })
    }

    fn read_at<'a>(&'a self, mut batch: ReadBatch<'a>) -> BoxFuture<'a, ReadResult<()>> {
        Box::pin(async move {
            if !batch.is_aligned() {
                return Err(ReadError::store(
                    StorePhase::Read,
                    "misaligned scatter-gather batch",
                ));
            }
            let objects = self.objects.lock();
            let object = objects
                .get(&batch.object)
                .ok_or(ReadError::NotFound(StorePhase::Read))?;
            trace!(
                request_id = %batch.request_id,
                object = %batch.object,
                regions = batch.extents.len(),
                "serving scatter-gather read"
            );
            for (extent, slice) in batch.extents.iter().zip(batch.data.iter_mut()) {
                let start = (extent.offset as usize).min(object.data.len());
                let end = (extent.end() as usize).min(object.data.len());
                let present = end - start;
                slice[..present].copy_from_slice(&object.data[start..end]);
                slice[present..].fill(0);
            }
            Ok(())
        })
    }
}
