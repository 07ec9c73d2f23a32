use spillway_common::{PartitionId, QueryId, SpillId};

pub fn spill_set_dir(query_id: QueryId, spill_id: SpillId) -> String {
    format!("spill/{query_id}/{spill_id}")
}

pub fn partition_path(query_id: QueryId, spill_id: SpillId, partition: PartitionId) -> String {
    format!(
        "{}/part-{partition}.arrow",
        spill_set_dir(query_id, spill_id)
    )
}

/// What one `write_partition` call put on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpillPartitionMeta {
    pub partition: PartitionId,
    /// Path relative to the spill root.
    pub file: String,
    pub bytes: u64,
    pub rows: u64,
    pub chunks: u64,
}
