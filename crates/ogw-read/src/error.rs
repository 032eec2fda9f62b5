use std::fmt::{Display, Formatter};

/// Phase of the storage conversation in which a failure surfaced.
///
/// Not-found during open (the object never existed, or its name resolved to
/// a stale identifier) and not-found during read (the object was truncated
/// or deleted while the read was in flight) arise from different races, so
/// the two are reported distinctly and never collapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePhase {
    Open,
    Read,
}

impl Display for StorePhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorePhase::Open => write!(f, "open"),
            StorePhase::Read => write!(f, "read"),
        }
    }
}

/// A specialized error type for read-path operations.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    /// An allocation was refused by the memory budget. Always detected
    /// synchronously, before the store is contacted.
    #[error("out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: u64, available: u64 },
    /// The object (or the requested range) does not exist in the store.
    #[error("object not found during {0}")]
    NotFound(StorePhase),
    /// Any other store-reported failure.
    #[error("store error during {phase}: {message}")]
    Store { phase: StorePhase, message: String },
    /// An operation was invoked in a state that cannot honor it; rejected
    /// without contacting the store.
    #[error("precondition violated: {0}")]
    Precondition(String),
    /// More budget released than was held. Guarded internally; surfacing
    /// this indicates a bookkeeping defect, not a caller mistake.
    #[error("budget underflow: released {released} bytes, only {held} held")]
    BudgetUnderflow { released: u64, held: u64 },
}

impl ReadError {
    /// Create a precondition-violation error from a displayable value.
    pub fn precondition<T>(msg: T) -> Self
    where
        T: Display,
    {
        Self::Precondition(msg.to_string())
    }

    /// Create a store error for the given phase from a displayable value.
    pub fn store<T>(phase: StorePhase, msg: T) -> Self
    where
        T: Display,
    {
        Self::Store {
            phase,
            message: msg.to_string(),
        }
    }

    /// Create a not-found error for the given phase.
    pub fn not_found(phase: StorePhase) -> Self {
        Self::NotFound(phase)
    }

    /// Returns true if this error is an allocation failure.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}

/// A Result type alias for read-path operations.
pub type ReadResult<T> = Result<T, ReadError>;
