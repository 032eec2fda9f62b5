//! Asynchronous read path of the OGW object-storage gateway.
//!
//! The crate turns a client's request for object bytes into scatter-gather
//! reads against a distributed object store and stages the results in a
//! zero-copy buffer pool the transport can send without another copy. It
//! wires together the operation-context factories, the buffer engine, and
//! the object-reader state machine, and exposes the store boundary as an
//! injectable trait so fake backends drop in for testing.

pub mod budget;
pub mod buffer;
pub mod completion;
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod reader;
pub mod store;
pub mod test_support;

pub use budget::{BudgetCharge, MemoryBudget};
pub use buffer::{BufferEngine, BufferUnit, OwnedBuffer, ZeroCopyBuffer};
pub use completion::{AsyncOpContext, OpSignal};
pub use config::{LayoutId, ObjectId, ReadConfig, RequestId};
pub use context::{DataSlot, OpContext, OpSlot, OpStatus, RwVectorSet};
pub use error::{ReadError, ReadResult, StorePhase};
pub use metrics::{ReadMetrics, ReadMetricsSnapshot};
pub use reader::{ObjectReader, ReaderState};
pub use store::{Extent, InMemoryStore, LayoutMap, ObjectAttrs, ObjectStore, ReadBatch};
