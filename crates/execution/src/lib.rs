#![deny(missing_docs)]

//! Read-back path for spilled partitions.
//!
//! Architecture role:
//! - [`ChunkStore`] contract toward the disk-backed spill store
//! - [`PartitionCursor`]: sequential, once-per-pass traversal of one partition
//! - [`PassBarrier`] / [`DrainRegistry`]: drain signaling used before a
//!   partition's storage is torn down
//!
//! Key modules:
//! - [`barrier`]
//! - [`context`]
//! - [`cursor`]
//! - [`registry`]
//! - [`store`]

pub mod barrier;
pub mod context;
pub mod cursor;
pub mod registry;
pub mod store;

pub use barrier::PassBarrier;
pub use context::TaskContext;
pub use cursor::{PartitionCursor, PassIter};
pub use registry::DrainRegistry;
pub use store::ChunkStore;
