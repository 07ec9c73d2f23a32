//! Contract between partition cursors and the disk-backed chunk store.

use arrow::record_batch::RecordBatch;
use spillway_common::{PartitionId, Result};

/// Disk-backed chunk store shared by every cursor reading one spill set.
///
/// Implementations must be safe to share through `Arc` across threads: many
/// cursors may read different partitions concurrently. All three operations
/// may fail with I/O-level errors and must not block indefinitely.
pub trait ChunkStore: Send + Sync {
    /// Number of chunks currently stored for `partition`.
    fn num_chunks(&self, partition: PartitionId) -> Result<usize>;

    /// Read the chunk at zero-based `index` within `partition`.
    fn read_chunk(&self, partition: PartitionId, index: usize) -> Result<RecordBatch>;

    /// Release every resource held for `partition`, including its on-disk data.
    fn release_partition(&self, partition: PartitionId) -> Result<()>;
}
