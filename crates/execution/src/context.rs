//! Identity of the execution driving a cursor.

use spillway_common::{QueryId, SpillId};

/// Identity of the execution that owns a cursor; used for log and metric labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskContext {
    /// Query the spilled partitions belong to.
    pub query_id: QueryId,

    /// Spill set within the query.
    pub spill_id: SpillId,
}

impl TaskContext {
    /// Create a context for one spill set of a query.
    pub fn new(query_id: QueryId, spill_id: SpillId) -> Self {
        Self { query_id, spill_id }
    }
}
