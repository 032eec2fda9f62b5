//! Descriptor bundles for one asynchronous storage operation.
//!
//! [`OpContext`] is the operation-handle array plus its completion-signal
//! table; [`RwVectorSet`] bundles the three index-aligned sequences of a
//! scatter-gather request. Both charge the shared [`MemoryBudget`] so an
//! allocation failure is synchronous and rolls back whatever the same call
//! already reserved.

use std::mem;
use std::sync::Arc;

use crate::budget::{BudgetCharge, MemoryBudget};
use crate::completion::OpSignal;
use crate::config::RequestId;
use crate::error::{ReadError, ReadResult};
use crate::store::Extent;

/// Lifecycle of one operation slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OpStatus {
    #[default]
    Idle,
    Launched,
    Completed,
}

/// One pending-operation slot.
#[derive(Debug, Clone, Copy)]
pub struct OpSlot {
    pub index: usize,
    pub status: OpStatus,
}

/// Operation handles plus their completion-signal table.
///
/// The two tables are index-aligned and sized together at creation. Freeing
/// is by Drop, exactly once: the budget receipts are move-only, so there is
/// no double free to guard against.
#[derive(Debug)]
pub struct OpContext {
    request_id: RequestId,
    slots: Vec<OpSlot>,
    signals: Vec<Arc<OpSignal>>,
    _slot_charge: BudgetCharge,
    _signal_charge: BudgetCharge,
}

impl OpContext {
    /// Accounting size of the slot table for `op_count` operations.
    pub fn slot_table_bytes(op_count: usize) -> u64 {
        (op_count * mem::size_of::<OpSlot>()) as u64
    }

    /// Accounting size of the signal table for `op_count` operations.
    pub fn signal_table_bytes(op_count: usize) -> u64 {
        (op_count * mem::size_of::<Arc<OpSignal>>()) as u64
    }

    /// Total accounting size of a context for `op_count` operations.
    pub fn budget_bytes(op_count: usize) -> u64 {
        Self::slot_table_bytes(op_count) + Self::signal_table_bytes(op_count)
    }

    /// Allocates a context for `op_count` operations.
    ///
    /// `op_count` must be at least 1. If the signal-table reservation
    /// fails, the slot-table reservation made by this same call is released
    /// before the error returns; a partially allocated context never
    /// escapes.
    pub fn create(
        request_id: RequestId,
        op_count: usize,
        budget: &MemoryBudget,
    ) -> ReadResult<Self> {
        if op_count == 0 {
            return Err(ReadError::precondition("op_count must be >= 1"));
        }
        let slot_charge = budget.reserve(Self::slot_table_bytes(op_count))?;
        let signal_charge = match budget.reserve(Self::signal_table_bytes(op_count)) {
            Ok(charge) => charge,
            Err(err) => {
                slot_charge.release();
                return Err(err);
            }
        };
        let slots = (0..op_count)
            .map(|index| OpSlot {
                index,
                status: OpStatus::Idle,
            })
            .collect();
        let signals = (0..op_count).map(|_| Arc::new(OpSignal::new())).collect();
        Ok(Self {
            request_id,
            slots,
            signals,
            _slot_charge: slot_charge,
            _signal_charge: signal_charge,
        })
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn op_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> Option<&OpSlot> {
        self.slots.get(index)
    }

    /// Completion signal for the slot at `index`.
    pub fn signal(&self, index: usize) -> Option<&Arc<OpSignal>> {
        self.signals.get(index)
    }

    pub fn set_status(&mut self, index: usize, status: OpStatus) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.status = status;
        }
    }
}

/// Per-slot target length of a scatter-gather read.
///
/// The "data pointer" half of the slot is not stored: it materializes as a
/// mutable borrow of the buffer-pool unit at the same index when the read
/// is launched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataSlot {
    pub len: u64,
}

/// The three index-aligned sequences of one scatter-gather request.
///
/// Extents, data-slot lengths, and attribute counts are allocated together
/// and stay the same length for the life of the set; a failure of any of
/// the three reservations releases the earlier ones, so the factory never
/// yields a partially valid structure. Attribute counts are always zero on
/// reads.
#[derive(Debug)]
pub struct RwVectorSet {
    request_id: RequestId,
    capacity: usize,
    extents: Vec<Extent>,
    data: Vec<DataSlot>,
    attrs: Vec<u32>,
    _extent_charge: BudgetCharge,
    _data_charge: BudgetCharge,
    _attr_charge: BudgetCharge,
}

impl RwVectorSet {
    /// Accounting size of the extent table for `block_count` slots.
    pub fn extent_table_bytes(block_count: usize) -> u64 {
        (block_count * mem::size_of::<Extent>()) as u64
    }

    /// Accounting size of the data table for `block_count` slots.
    pub fn data_table_bytes(block_count: usize) -> u64 {
        (block_count * mem::size_of::<DataSlot>()) as u64
    }

    /// Accounting size of the attribute table for `block_count` slots.
    pub fn attr_table_bytes(block_count: usize) -> u64 {
        (block_count * mem::size_of::<u32>()) as u64
    }

    /// Total accounting size of a set with `block_count` slots.
    pub fn budget_bytes(block_count: usize) -> u64 {
        Self::extent_table_bytes(block_count)
            + Self::data_table_bytes(block_count)
            + Self::attr_table_bytes(block_count)
    }

    /// Allocates an empty set with room for `block_count` slots.
    pub fn create(
        request_id: RequestId,
        block_count: usize,
        budget: &MemoryBudget,
    ) -> ReadResult<Self> {
        if block_count == 0 {
            return Err(ReadError::precondition("block_count must be >= 1"));
        }
        let extent_charge = budget.reserve(Self::extent_table_bytes(block_count))?;
        let data_charge = match budget.reserve(Self::data_table_bytes(block_count)) {
            Ok(charge) => charge,
            Err(err) => {
                extent_charge.release();
                return Err(err);
            }
        };
        let attr_charge = match budget.reserve(Self::attr_table_bytes(block_count)) {
            Ok(charge) => charge,
            Err(err) => {
                data_charge.release();
                extent_charge.release();
                return Err(err);
            }
        };
        Ok(Self {
            request_id,
            capacity: block_count,
            extents: Vec::with_capacity(block_count),
            data: Vec::with_capacity(block_count),
            attrs: Vec::with_capacity(block_count),
            _extent_charge: extent_charge,
            _data_charge: data_charge,
            _attr_charge: attr_charge,
        })
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Number of slots the set was sized for.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots bound so far.
    pub fn bound_len(&self) -> usize {
        self.extents.len()
    }

    /// Binds the next slot, keeping the three sequences index-aligned.
    ///
    /// Extents must arrive in ascending, non-overlapping offset order, and
    /// the slot's data length must match the extent length.
    pub fn bind_next(&mut self, extent: Extent, data_len: u64) -> ReadResult<()> {
        if self.bound_len() == self.capacity {
            return Err(ReadError::precondition(format!(
                "vector set full: capacity {}",
                self.capacity
            )));
        }
        if extent.len == 0 || extent.len != data_len {
            return Err(ReadError::precondition(format!(
                "slot length {data_len} does not cover extent of {} bytes",
                extent.len
            )));
        }
        if let Some(prev) = self.extents.last() {
            if extent.offset < prev.end() {
                return Err(ReadError::precondition(format!(
                    "extent at {} overlaps previous extent ending at {}",
                    extent.offset,
                    prev.end()
                )));
            }
        }
        self.extents.push(extent);
        self.data.push(DataSlot { len: data_len });
        // No extended attributes are requested on reads.
        self.attrs.push(0);
        Ok(())
    }

    pub fn extents(&self) -> &[Extent] {
        &self.extents
    }

    pub fn data_slots(&self) -> &[DataSlot] {
        &self.data
    }

    pub fn attrs(&self) -> &[u32] {
        &self.attrs
    }

    /// Total bytes covered by the bound extents.
    pub fn total_bound_bytes(&self) -> u64 {
        self.extents.iter().map(|e| e.len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid() -> RequestId {
        RequestId::new("req-ctx")
    }

    #[test]
    fn op_context_rejects_zero_ops() {
        let budget = MemoryBudget::unlimited();
        let err = OpContext::create(rid(), 0, &budget).expect_err("zero ops");
        assert!(matches!(err, ReadError::Precondition(_)));
        assert_eq!(budget.used(), 0);
    }

    #[test]
    fn op_context_tables_are_aligned() {
        let budget = MemoryBudget::unlimited();
        let ctx = OpContext::create(rid(), 3, &budget).expect("create");
        assert_eq!(ctx.op_count(), 3);
        for i in 0..3 {
            assert!(ctx.slot(i).is_some());
            assert!(ctx.signal(i).is_some());
        }
        assert!(ctx.signal(3).is_none());
    }

    #[test]
    fn op_context_partial_failure_rolls_back() {
        // Enough for the slot table, not for the signal table.
        let budget = MemoryBudget::new(OpContext::slot_table_bytes(2));
        let err = OpContext::create(rid(), 2, &budget).expect_err("oom");
        assert!(err.is_out_of_memory());
        assert_eq!(budget.used(), 0);
        assert_eq!(budget.reserve_count(), budget.release_count());
    }

    #[test]
    fn op_context_frees_once_on_drop() {
        let budget = MemoryBudget::unlimited();
        {
            let _ctx = OpContext::create(rid(), 1, &budget).expect("create");
            assert_eq!(budget.used(), OpContext::budget_bytes(1));
        }
        assert_eq!(budget.used(), 0);
        assert_eq!(budget.reserve_count(), 2);
        assert_eq!(budget.release_count(), 2);
    }

    #[test]
    fn vector_set_rejects_zero_blocks() {
        let budget = MemoryBudget::unlimited();
        let err = RwVectorSet::create(rid(), 0, &budget).expect_err("zero blocks");
        assert!(matches!(err, ReadError::Precondition(_)));
    }

    #[test]
    fn vector_set_mid_allocation_failure_rolls_back() {
        // Trip the second of the three reservations.
        let budget = MemoryBudget::new(RwVectorSet::extent_table_bytes(4));
        let err = RwVectorSet::create(rid(), 4, &budget).expect_err("oom");
        assert!(err.is_out_of_memory());
        assert_eq!(budget.used(), 0);
        assert_eq!(budget.reserve_count(), budget.release_count());

        // And the third.
        let budget = MemoryBudget::new(
            RwVectorSet::extent_table_bytes(4) + RwVectorSet::data_table_bytes(4),
        );
        let err = RwVectorSet::create(rid(), 4, &budget).expect_err("oom");
        assert!(err.is_out_of_memory());
        assert_eq!(budget.used(), 0);
    }

    #[test]
    fn bind_keeps_sequences_aligned() {
        let budget = MemoryBudget::unlimited();
        let mut set = RwVectorSet::create(rid(), 2, &budget).expect("create");
        set.bind_next(Extent::new(0, 512), 512).expect("bind 0");
        set.bind_next(Extent::new(512, 512), 512).expect("bind 1");
        assert_eq!(set.bound_len(), 2);
        assert_eq!(set.extents().len(), set.data_slots().len());
        assert_eq!(set.extents().len(), set.attrs().len());
        assert!(set.attrs().iter().all(|&count| count == 0));
        assert_eq!(set.total_bound_bytes(), 1024);
    }

    #[test]
    fn bind_rejects_overlap_and_overflow() {
        let budget = MemoryBudget::unlimited();
        let mut set = RwVectorSet::create(rid(), 1, &budget).expect("create");
        set.bind_next(Extent::new(0, 512), 512).expect("bind 0");
        let overflow = set.bind_next(Extent::new(512, 512), 512).expect_err("full");
        assert!(matches!(overflow, ReadError::Precondition(_)));

        let mut set = RwVectorSet::create(rid(), 2, &budget).expect("create");
        set.bind_next(Extent::new(0, 512), 512).expect("bind 0");
        let overlap = set
            .bind_next(Extent::new(256, 512), 512)
            .expect_err("overlap");
        assert!(matches!(overlap, ReadError::Precondition(_)));
    }
}
