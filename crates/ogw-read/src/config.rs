use std::fmt::{self, Display};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Minimum allowed transport buffer unit size (512 B).
///
/// Units smaller than this fragment a read into too many scatter-gather
/// slots for the store to handle efficiently.
const TRANSPORT_UNIT_MIN_LIMIT: u64 = 512;

/// Maximum allowed transport buffer unit size (4 MiB).
///
/// Larger units waste pool memory on short reads and defeat the
/// re-chunking the transport performs on send.
const TRANSPORT_UNIT_MAX_LIMIT: u64 = 4 * 1024 * 1024;

/// Default transport buffer unit size (16 KiB).
const DEFAULT_TRANSPORT_UNIT_BYTES: u64 = 16 * 1024;

/// Default memory budget for one gateway worker (64 MiB).
const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 64 * 1024 * 1024;

/// Computes the largest power of two that is less than or equal to the input value.
#[inline]
fn floor_power_of_two(value: u64) -> u64 {
    if value == 0 {
        0
    } else {
        let shift = 63_u32 - value.leading_zeros();
        1_u64 << shift
    }
}

/// Clamps a value to the given range and rounds to the nearest power of two.
#[inline]
fn clamp_power_of_two(value: u64, min: u64, max: u64) -> u64 {
    let clamped = value.clamp(min, max);
    if clamped.is_power_of_two() {
        return clamped;
    }

    let lower = floor_power_of_two(clamped).max(min);
    let upper = (lower << 1).min(max).max(min);

    if clamped - lower <= upper.saturating_sub(clamped) {
        lower
    } else {
        upper
    }
}

/// Opaque 128-bit identifier of an object in the store.
///
/// Object ids are assigned by the layer that resolves an object name to an
/// identifier and are immutable once set on a reader. The two 64-bit halves
/// carry no meaning inside this crate; they are packed only for transport.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ObjectId(pub u128);

impl ObjectId {
    /// Creates an object ID from a raw u128 value.
    #[inline]
    pub const fn new(raw: u128) -> Self {
        Self(raw)
    }

    /// Creates an object ID from its high and low 64-bit halves.
    #[inline]
    pub const fn from_parts(hi: u64, lo: u64) -> Self {
        Self(((hi as u128) << 64) | lo as u128)
    }

    /// Returns the high 64 bits.
    #[inline]
    pub const fn hi(self) -> u64 {
        (self.0 >> 64) as u64
    }

    /// Returns the low 64 bits.
    #[inline]
    pub const fn lo(self) -> u64 {
        self.0 as u64
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}:{:#x}", self.hi(), self.lo())
    }
}

/// Identifier selecting the storage engine's block/unit size for an object.
///
/// Layout ids are fixed at object creation time by the store. A reader
/// resolves the id to a unit size through [`crate::store::LayoutMap`] at
/// construction; zero and unknown ids are rejected there.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LayoutId(pub u32);

impl LayoutId {
    /// Creates a layout ID from a raw u32 value.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the layout ID as a u32.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl Display for LayoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Correlation id of the client request a read is performed for.
///
/// Threaded through every component for log correlation. Cloning is cheap;
/// the id itself is opaque to this crate.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(Arc<str>);

impl RequestId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(Arc::from(raw.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequestId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Configuration surface for the read path.
///
/// The transport buffer unit size is the one cross-subsystem constant of
/// the read path: the buffer pool carves its memory into units of this
/// size, and the reader reconciles it against the store's layout unit size
/// when sizing a scatter-gather read. It is passed in explicitly; there is
/// no process-wide default instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadConfig {
    /// Size of one transport buffer unit in bytes.
    ///
    /// Will be normalized to a power of two within valid limits.
    pub transport_unit_bytes: u64,

    /// Memory budget shared by all allocations of one worker, in bytes.
    ///
    /// Zero means unlimited.
    pub memory_limit_bytes: u64,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            transport_unit_bytes: DEFAULT_TRANSPORT_UNIT_BYTES,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
        }
    }
}

impl ReadConfig {
    /// Returns a copy of the configuration with the transport unit size
    /// rounded into the configured power-of-two window.
    pub fn normalized(mut self) -> Self {
        let raw = if self.transport_unit_bytes == 0 {
            DEFAULT_TRANSPORT_UNIT_BYTES
        } else {
            self.transport_unit_bytes
        };
        self.transport_unit_bytes =
            clamp_power_of_two(raw, TRANSPORT_UNIT_MIN_LIMIT, TRANSPORT_UNIT_MAX_LIMIT);
        self
    }
}

impl Display for ReadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ReadConfig(transport_unit_bytes={}, memory_limit_bytes={})",
            self.transport_unit_bytes, self.memory_limit_bytes
        )
    }
}
