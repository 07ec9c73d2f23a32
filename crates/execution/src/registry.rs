//! Per-partition completion barriers owned by the component that tears
//! spilled partitions down.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use spillway_common::{PartitionId, Result, SpillConfig, SpillwayError};
use tracing::{debug, info};

use crate::barrier::PassBarrier;
use crate::context::TaskContext;
use crate::cursor::PartitionCursor;
use crate::store::ChunkStore;

/// Hands out one [`PassBarrier`] per partition and releases a partition only
/// once its in-flight passes have drained.
#[derive(Debug, Default)]
pub struct DrainRegistry {
    config: SpillConfig,
    ctx: TaskContext,
    barriers: Mutex<HashMap<PartitionId, PassBarrier>>,
}

impl DrainRegistry {
    /// Registry using default [`SpillConfig`] settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose cursors and teardown follow `config`.
    pub fn with_config(config: SpillConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Attach the owning execution's identity to every cursor handed out.
    pub fn with_context(mut self, ctx: TaskContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Barrier for `partition`, created on first use.
    pub fn barrier_for(&self, partition: PartitionId) -> PassBarrier {
        self.lock()
            .entry(partition)
            .or_insert_with(PassBarrier::new)
            .clone()
    }

    /// Cursor over `partition` wired to the partition's shared barrier.
    pub fn cursor(&self, store: Arc<dyn ChunkStore>, partition: PartitionId) -> PartitionCursor {
        PartitionCursor::new(store, partition, self.barrier_for(partition))
            .with_rearm(self.config.rearm)
            .with_context(self.ctx)
    }

    /// Move `cursor` to `partition` and wire it to that partition's barrier.
    pub fn rebind(&self, cursor: &mut PartitionCursor, partition: PartitionId) -> Result<()> {
        cursor.rebind(partition, self.barrier_for(partition))
    }

    /// Close `cursor`, releasing its partition, and forget the partition's
    /// barrier once no other cursor holds it.
    ///
    /// Returns the result of [`PartitionCursor::close`]. A cursor that refuses
    /// to close keeps its barrier registered.
    pub fn close(&self, cursor: &mut PartitionCursor) -> Result<()> {
        let result = cursor.close();
        if cursor.is_closed() {
            self.forget_if_unused(cursor.partition());
        }
        result
    }

    /// Wait until every pass in flight over `partition` has finished, then
    /// release the partition from `store` and forget its barrier.
    ///
    /// Waits at most `drain_timeout_ms` when configured; a partition still
    /// being read after that is left untouched and reported as an error.
    pub fn release_when_drained(
        &self,
        store: &dyn ChunkStore,
        partition: PartitionId,
    ) -> Result<()> {
        let barrier = self.barrier_for(partition);
        debug!(
            query_id = %self.ctx.query_id,
            partition = %partition,
            outstanding = barrier.outstanding(),
            "waiting for partition drain"
        );
        match self.config.drain_timeout() {
            None => barrier.await_drained(),
            Some(timeout) => {
                if !barrier.await_drained_timeout(timeout) {
                    return Err(SpillwayError::Execution(format!(
                        "partition {partition} still has {} pass(es) in flight after {timeout:?}",
                        barrier.outstanding()
                    )));
                }
            }
        }

        store.release_partition(partition)?;
        self.lock().remove(&partition);
        info!(
            query_id = %self.ctx.query_id,
            partition = %partition,
            "drained partition released"
        );
        Ok(())
    }

    /// Partitions that currently have a barrier.
    pub fn tracked_partitions(&self) -> Vec<PartitionId> {
        let mut out = self.lock().keys().copied().collect::<Vec<_>>();
        out.sort_unstable();
        out
    }

    fn forget_if_unused(&self, partition: PartitionId) {
        let mut barriers = self.lock();
        // The map entry and the closing cursor each hold one handle.
        let unused = barriers
            .get(&partition)
            .is_some_and(|b| b.handle_count() <= 2 && b.outstanding() == 0);
        if unused {
            barriers.remove(&partition);
            debug!(
                query_id = %self.ctx.query_id,
                partition = %partition,
                "partition barrier dropped after close"
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PartitionId, PassBarrier>> {
        self.barriers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
