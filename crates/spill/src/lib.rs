//! On-disk spill storage for partitioned intermediate results.
//!
//! [`SpillWriter`] writes each partition as an Arrow IPC file whose record
//! batches are the partition's chunks; [`DiskChunkStore`] serves those chunks
//! back by index to partition cursors through the
//! [`spillway_execution::ChunkStore`] contract.

pub mod layout;
pub mod store;
pub mod writer;

pub use layout::*;
pub use store::DiskChunkStore;
pub use writer::SpillWriter;
