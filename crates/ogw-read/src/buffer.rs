//! Zero-copy buffer pool for staging storage reads.
//!
//! The transport sends from fixed-size buffer units; the store fills
//! whatever scatter-gather targets it is handed. [`BufferEngine`] hands out
//! units of the transport's size, and [`ZeroCopyBuffer`] chains them into
//! one logical byte buffer whose units are bound directly as read targets,
//! so there is no copy between "storage wrote here" and "transport reads
//! from here".

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Buf, BytesMut};
use tracing::trace;

use crate::budget::{BudgetCharge, MemoryBudget};
use crate::config::{ReadConfig, RequestId};
use crate::context::RwVectorSet;
use crate::error::{ReadError, ReadResult};
use crate::store::Extent;

#[derive(Debug)]
struct EngineInner {
    unit_bytes: u64,
    budget: MemoryBudget,
    outstanding: AtomicU64,
}

/// The transport buffer engine: source of fixed-size memory units.
///
/// Cheap-to-clone handle. Each unit is reserved and committed in one step
/// against the shared memory budget; `outstanding_units()` counts units
/// currently alive anywhere (pool, transferred buffer, or split fragment)
/// and must return to zero when every holder is dropped.
#[derive(Debug, Clone)]
pub struct BufferEngine {
    inner: Arc<EngineInner>,
}

impl BufferEngine {
    pub fn new(config: &ReadConfig, budget: MemoryBudget) -> Self {
        let config = config.normalized();
        Self {
            inner: Arc::new(EngineInner {
                unit_bytes: config.transport_unit_bytes,
                budget,
                outstanding: AtomicU64::new(0),
            }),
        }
    }

    /// Size of one unit in bytes.
    pub fn unit_bytes(&self) -> u64 {
        self.inner.unit_bytes
    }

    /// The budget all unit reservations charge.
    pub fn budget(&self) -> &MemoryBudget {
        &self.inner.budget
    }

    /// Units currently alive.
    pub fn outstanding_units(&self) -> u64 {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Reserves and commits one unit.
    pub fn reserve_unit(&self) -> ReadResult<BufferUnit> {
        let charge = self.inner.budget.reserve(self.inner.unit_bytes)?;
        let mut data = BytesMut::with_capacity(self.inner.unit_bytes as usize);
        data.resize(self.inner.unit_bytes as usize, 0);
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        Ok(BufferUnit {
            data,
            ticket: Arc::new(UnitTicket {
                engine: self.clone(),
                _charge: charge,
            }),
        })
    }
}

/// Accounting stub shared by all fragments of one reserved unit.
///
/// The budget charge and the engine's outstanding count are released when
/// the last fragment drops, wherever that fragment ended up.
#[derive(Debug)]
struct UnitTicket {
    engine: BufferEngine,
    _charge: BudgetCharge,
}

impl Drop for UnitTicket {
    fn drop(&mut self) {
        self.engine.inner.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One fixed-size memory unit (or a fragment of one after a split).
#[derive(Debug)]
pub struct BufferUnit {
    data: BytesMut,
    ticket: Arc<UnitTicket>,
}

impl BufferUnit {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    fn advance(&mut self, n: usize) {
        self.data.advance(n);
    }

    /// Splits off the first `n` bytes as a new fragment sharing this unit's
    /// reservation.
    fn split_to(&mut self, n: usize) -> BufferUnit {
        BufferUnit {
            data: self.data.split_to(n),
            ticket: Arc::clone(&self.ticket),
        }
    }
}

/// Buffer handle after ownership has left the pool.
///
/// Holds the unit chain of exactly the bytes that were read, in offset
/// order. Dropping it is what finally returns the memory to the engine.
#[derive(Debug)]
pub struct OwnedBuffer {
    units: Vec<BufferUnit>,
}

impl OwnedBuffer {
    pub fn len(&self) -> u64 {
        self.units.iter().map(|u| u.len() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// The buffered bytes, one chunk per unit, in order.
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> {
        self.units.iter().map(|u| u.as_slice())
    }

    /// Copies the content out, for consumers that cannot take chunks.
    pub fn copy_to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len() as usize);
        for chunk in self.chunks() {
            out.extend_from_slice(chunk);
        }
        out
    }
}

/// A chain of fixed-size units presenting one logical byte buffer.
///
/// `nvecs = ceil(total_size / unit_bytes)` units always cover at least
/// `total_size` bytes; the last unit is trimmed to the partial remainder.
/// Ownership is single-holder: either this pool or the transferee of
/// [`ZeroCopyBuffer::release_ownership`], never both.
#[derive(Debug)]
pub struct ZeroCopyBuffer {
    request_id: RequestId,
    engine: BufferEngine,
    units: VecDeque<BufferUnit>,
    nvecs: usize,
    total_size: u64,
    released: bool,
}

impl ZeroCopyBuffer {
    /// Creates an empty pool for `total_size` bytes; call
    /// [`ZeroCopyBuffer::initialize`] to reserve the units.
    pub fn new(request_id: RequestId, total_size: u64, engine: BufferEngine) -> ReadResult<Self> {
        if total_size == 0 {
            return Err(ReadError::precondition("buffer size must be >= 1"));
        }
        let unit = engine.unit_bytes();
        let nvecs = ((total_size + unit - 1) / unit) as usize;
        Ok(Self {
            request_id,
            engine,
            units: VecDeque::with_capacity(nvecs),
            nvecs,
            total_size,
            released: false,
        })
    }

    /// Number of units the pool spans.
    pub fn nvecs(&self) -> usize {
        self.nvecs
    }

    /// Logical size the pool was created for.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Reserves the pool's units from the engine.
    ///
    /// Any mid-loop reservation failure surfaces as `OutOfMemory`; units
    /// already reserved by this call are returned to the engine when the
    /// pool drops.
    pub fn initialize(&mut self) -> ReadResult<()> {
        if !self.units.is_empty() {
            return Err(ReadError::precondition("buffer already initialized"));
        }
        for _ in 0..self.nvecs {
            let unit = self.engine.reserve_unit()?;
            self.units.push_back(unit);
        }
        let remainder = (self.total_size % self.engine.unit_bytes()) as usize;
        if remainder != 0 {
            if let Some(last) = self.units.back_mut() {
                last.truncate(remainder);
            }
        }
        trace!(
            request_id = %self.request_id,
            nvecs = self.nvecs,
            total_size = self.total_size,
            "buffer pool initialized"
        );
        Ok(())
    }

    /// Bytes currently available for consumption.
    pub fn len(&self) -> u64 {
        self.units.iter().map(|u| u.len() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// View of the unit at `index`, in bind order.
    pub fn unit(&self, index: usize) -> Option<&[u8]> {
        self.units.get(index).map(|u| u.as_slice())
    }

    /// Binds every unit as a read target, advancing `cursor` past each.
    ///
    /// Fills the vector set's extent, data-length, and attribute slots
    /// index-aligned with this pool's units; binding stops once the
    /// cumulative length reaches `total_size` (the final unit binds short).
    pub fn bind_read_targets(&self, set: &mut RwVectorSet, cursor: &mut u64) -> ReadResult<()> {
        if self.units.is_empty() {
            return Err(ReadError::precondition("buffer not initialized"));
        }
        let mut bound = 0u64;
        for unit in &self.units {
            if bound >= self.total_size {
                break;
            }
            let len = unit.len() as u64;
            set.bind_next(Extent::new(*cursor, len), len)?;
            *cursor += len;
            bound += len;
        }
        Ok(())
    }

    /// Mutable slices over all units, index-aligned with the bound extents.
    ///
    /// This is the "data pointer" vector of the scatter-gather request,
    /// materialized as borrows for the duration of the store call.
    pub fn io_slices_mut(&mut self) -> Vec<&mut [u8]> {
        self.units.iter_mut().map(|u| u.as_mut_slice()).collect()
    }

    /// Discards the first `n` bytes, e.g. to skip to a requested range
    /// start inside the first unit.
    pub fn drain(&mut self, n: u64) -> ReadResult<()> {
        if n > self.len() {
            return Err(ReadError::precondition(format!(
                "cannot drain {n} bytes, only {} buffered",
                self.len()
            )));
        }
        let mut remaining = n as usize;
        while remaining > 0 {
            let front_len = match self.units.front() {
                Some(front) => front.len(),
                None => break,
            };
            if remaining >= front_len {
                self.units.pop_front();
                remaining -= front_len;
            } else {
                if let Some(front) = self.units.front_mut() {
                    front.advance(remaining);
                }
                remaining = 0;
            }
        }
        Ok(())
    }

    /// Splits off the first `n` bytes into a new buffer, removing them from
    /// this pool.
    ///
    /// This is how storage-block-sized reads are reshaped into
    /// transport-chunk-sized sends: the returned buffer goes to the
    /// transport while the remainder stays buffered here.
    pub fn consume_front(&mut self, n: u64) -> ReadResult<ZeroCopyBuffer> {
        if n == 0 {
            return Err(ReadError::precondition("cannot consume 0 bytes"));
        }
        if n > self.len() {
            return Err(ReadError::precondition(format!(
                "cannot consume {n} bytes, only {} buffered",
                self.len()
            )));
        }
        let mut taken: VecDeque<BufferUnit> = VecDeque::new();
        let mut remaining = n as usize;
        while remaining > 0 {
            let front_len = match self.units.front() {
                Some(front) => front.len(),
                None => break,
            };
            if remaining >= front_len {
                if let Some(front) = self.units.pop_front() {
                    taken.push_back(front);
                }
                remaining -= front_len;
            } else {
                if let Some(front) = self.units.front_mut() {
                    taken.push_back(front.split_to(remaining));
                }
                remaining = 0;
            }
        }
        Ok(ZeroCopyBuffer {
            request_id: self.request_id.clone(),
            engine: self.engine.clone(),
            nvecs: taken.len(),
            units: taken,
            total_size: n,
            released: false,
        })
    }

    /// Transfers the buffered bytes out of the pool.
    ///
    /// The first call returns the unit chain; any later call returns
    /// `None`, since ownership has already left the pool. After transfer
    /// the pool's own drop frees nothing.
    pub fn release_ownership(&mut self) -> Option<OwnedBuffer> {
        if self.released {
            return None;
        }
        self.released = true;
        Some(OwnedBuffer {
            units: mem::take(&mut self.units).into_iter().collect(),
        })
    }
}
