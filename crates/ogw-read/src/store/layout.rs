use crate::config::LayoutId;
use crate::error::{ReadError, ReadResult};

/// Smallest valid layout id.
pub const LAYOUT_ID_MIN: u32 = 1;

/// Largest valid layout id.
pub const LAYOUT_ID_MAX: u32 = 14;

/// Unit size selected by the smallest layout id (1 KiB).
const LAYOUT_BASE_UNIT_BYTES: u64 = 1024;

/// Resolves a layout id to the store's block/unit size.
///
/// The store fixes an object's layout at creation time; id `n` selects a
/// unit size of `1 KiB << (n - 1)`, so ids 1 ..= 14 cover 1 KiB through
/// 8 MiB. The reader resolves the id once, at construction, and rejects
/// zero or out-of-table ids before any store traffic happens.
#[derive(Debug, Clone, Copy)]
pub struct LayoutMap {
    base_unit_bytes: u64,
}

impl Default for LayoutMap {
    fn default() -> Self {
        Self {
            base_unit_bytes: LAYOUT_BASE_UNIT_BYTES,
        }
    }
}

impl LayoutMap {
    /// Unit size in bytes for the given layout id.
    pub fn unit_bytes(&self, layout: LayoutId) -> ReadResult<u64> {
        let id = layout.as_u32();
        if !(LAYOUT_ID_MIN..=LAYOUT_ID_MAX).contains(&id) {
            return Err(ReadError::precondition(format!(
                "layout id {id} outside valid range {LAYOUT_ID_MIN}..={LAYOUT_ID_MAX}"
            )));
        }
        Ok(self.base_unit_bytes << (id - 1))
    }

    /// Smallest layout id whose unit size is at least `bytes`.
    pub fn layout_for_unit(&self, bytes: u64) -> LayoutId {
        for id in LAYOUT_ID_MIN..=LAYOUT_ID_MAX {
            if self.base_unit_bytes << (id - 1) >= bytes {
                return LayoutId::new(id);
            }
        }
        LayoutId::new(LAYOUT_ID_MAX)
    }
}
