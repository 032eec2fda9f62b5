//! The consumed object-store boundary.
//!
//! The read path does not implement a storage engine; it speaks to one
//! through [`ObjectStore`]. The trait is injected into every reader so a
//! scripted or in-memory backend slots in identically to a production one.

pub mod layout;
pub mod memory;

pub use layout::LayoutMap;
pub use memory::InMemoryStore;

use futures::future::BoxFuture;

use crate::config::{LayoutId, ObjectId, RequestId};
use crate::error::ReadResult;

/// A byte range within an object.
///
/// Within one scatter-gather request, extents are ordered, non-overlapping,
/// and monotonically increasing in offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Extent {
    /// Byte offset within the object.
    pub offset: u64,
    /// Length of the range in bytes.
    pub len: u64,
}

impl Extent {
    pub const fn new(offset: u64, len: u64) -> Self {
        Self { offset, len }
    }

    /// First offset past the range.
    pub const fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// Attributes learned from a metadata-only open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectAttrs {
    /// The opened object.
    pub id: ObjectId,
    /// Layout selecting the store's unit size for this object.
    pub layout: LayoutId,
    /// Object size as known at open time. Advisory: the object can be
    /// truncated or extended while a read is in flight.
    pub size_hint: u64,
}

/// One scatter-gather read request.
///
/// The three index-aligned sequences (extents, data slices, attribute
/// counts) describe a single multi-region read: the store fills
/// `data[i]` with the bytes at `extents[i]`. The slices borrow the buffer
/// pool's units directly, which is what makes the receive path copy-free.
pub struct ReadBatch<'a> {
    /// Request the read is performed for, for log correlation.
    pub request_id: RequestId,
    /// Target object.
    pub object: ObjectId,
    /// Byte ranges to read, in ascending offset order.
    pub extents: &'a [Extent],
    /// Destination slices, index-aligned with `extents`; each slice length
    /// equals the corresponding extent length.
    pub data: Vec<&'a mut [u8]>,
    /// Extended-attribute counts, index-aligned; always zero on reads.
    pub attrs: &'a [u32],
}

impl ReadBatch<'_> {
    /// Number of regions in the request.
    pub fn len(&self) -> usize {
        self.extents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    /// Total bytes requested across all extents.
    pub fn total_len(&self) -> u64 {
        self.extents.iter().map(|e| e.len).sum()
    }

    /// True when the three sequences are index-aligned: equal lengths and
    /// each data slice sized to its extent.
    pub fn is_aligned(&self) -> bool {
        self.extents.len() == self.data.len()
            && self.extents.len() == self.attrs.len()
            && self
                .extents
                .iter()
                .zip(self.data.iter())
                .all(|(extent, slice)| extent.len as usize == slice.len())
    }
}

/// Asynchronous object-store client.
///
/// Both operations resolve exactly once. Implementations report a missing
/// object as `NotFound` with the matching [`crate::StorePhase`] so the
/// reader can distinguish an object that never existed from one deleted
/// mid-read.
pub trait ObjectStore: Send + Sync {
    /// Open an object to learn its attributes; no data is transferred.
    fn open_object(&self, id: ObjectId) -> BoxFuture<'_, ReadResult<ObjectAttrs>>;

    /// Fill the batch's data slices with the bytes at its extents.
    fn read_at<'a>(&'a self, batch: ReadBatch<'a>) -> BoxFuture<'a, ReadResult<()>>;
}
