//! Sequential read-back of one spilled partition.
//!
//! A [`PartitionCursor`] walks the chunks of a single partition in index order,
//! one chunk per [`PartitionCursor::produce_next`] call. A pass ends with
//! `Ok(None)`; the partition is then ready to be read again from chunk 0.
//!
//! Lifecycle:
//! `Unopened -> Opened(idle) <-> Opened(pass active) -> Closed`.
//!
//! Not thread-safe: one consumer per cursor. Index state is plain fields
//! behind `&mut self`; other threads coordinate through the cursor's
//! [`PassBarrier`] only.

use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use spillway_common::metrics::global_metrics;
use spillway_common::{PartitionId, RearmPolicy, Result, SpillwayError};
use tracing::{debug, info, warn};

use crate::barrier::PassBarrier;
use crate::context::TaskContext;
use crate::store::ChunkStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    Unopened,
    Opened,
    Closed,
}

/// Read cursor over one partition of a shared [`ChunkStore`].
pub struct PartitionCursor {
    store: Arc<dyn ChunkStore>,
    partition: PartitionId,
    chunk_index: usize,
    pass_active: bool,
    state: CursorState,
    rearm: RearmPolicy,
    barrier: PassBarrier,
    ctx: TaskContext,
}

impl PartitionCursor {
    /// Bind a cursor to `partition`. Pass starts and finishes are reported to `barrier`.
    pub fn new(store: Arc<dyn ChunkStore>, partition: PartitionId, barrier: PassBarrier) -> Self {
        Self {
            store,
            partition,
            chunk_index: 0,
            pass_active: false,
            state: CursorState::Unopened,
            rearm: RearmPolicy::Auto,
            barrier,
            ctx: TaskContext::default(),
        }
    }

    /// Choose how a new pass starts after an end-of-partition signal.
    pub fn with_rearm(mut self, rearm: RearmPolicy) -> Self {
        self.rearm = rearm;
        self
    }

    /// Attach the owning execution's identity (log and metric labels).
    pub fn with_context(mut self, ctx: TaskContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Partition currently bound to this cursor.
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Offset of the next chunk to be produced in the current pass.
    pub fn chunk_index(&self) -> usize {
        self.chunk_index
    }

    /// Whether a pass has started and not yet reached its end.
    pub fn is_pass_active(&self) -> bool {
        self.pass_active
    }

    /// Whether [`PartitionCursor::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.state == CursorState::Closed
    }

    /// Handle to the completion barrier this cursor reports to.
    pub fn barrier(&self) -> PassBarrier {
        self.barrier.clone()
    }

    /// Reset pass tracking to the start of the partition.
    ///
    /// Re-opening an open cursor abandons its own active pass, which counts
    /// as finished on the barrier. Passes of other cursors sharing the barrier
    /// are left alone. A closed cursor cannot be opened again.
    pub fn open(&mut self) -> Result<()> {
        if self.state == CursorState::Closed {
            return Err(self.misuse("open"));
        }
        if self.pass_active {
            self.pass_active = false;
            if let Err(e) = self.barrier.on_pass_finish() {
                warn!(
                    query_id = %self.ctx.query_id,
                    partition = %self.partition,
                    error = %e,
                    "abandoned pass was not tracked by the barrier"
                );
            }
        }
        self.chunk_index = 0;
        self.state = CursorState::Opened;
        debug!(
            query_id = %self.ctx.query_id,
            partition = %self.partition,
            "partition cursor opened"
        );
        Ok(())
    }

    /// Start a new pass from chunk 0.
    ///
    /// Fails if a pass is already in flight.
    pub fn begin_pass(&mut self) -> Result<()> {
        self.ensure_open("begin_pass")?;
        if self.pass_active {
            return Err(SpillwayError::InvalidState(format!(
                "partition {} already has an active pass at chunk {}",
                self.partition, self.chunk_index
            )));
        }
        self.barrier.on_pass_start();
        self.pass_active = true;
        self.chunk_index = 0;
        debug!(
            query_id = %self.ctx.query_id,
            partition = %self.partition,
            "partition pass started"
        );
        Ok(())
    }

    /// Produce the next chunk of the current pass.
    ///
    /// Returns `Ok(None)` once the partition is exhausted; that ends the pass
    /// and releases barrier waiters. Store errors are returned unchanged and
    /// leave the position where it was, so a retry re-reads the same chunk.
    pub fn produce_next(&mut self) -> Result<Option<RecordBatch>> {
        self.ensure_open("produce_next")?;
        if !self.pass_active {
            match self.rearm {
                RearmPolicy::Auto => self.begin_pass()?,
                RearmPolicy::Explicit => {
                    return Err(SpillwayError::InvalidState(format!(
                        "partition {} has no active pass; call begin_pass first",
                        self.partition
                    )));
                }
            }
        }

        let chunks = self.store.num_chunks(self.partition)?;
        if self.chunk_index >= chunks {
            self.finish_pass(chunks);
            return Ok(None);
        }

        let batch = self.store.read_chunk(self.partition, self.chunk_index)?;
        self.chunk_index += 1;
        Ok(Some(batch))
    }

    /// Iterate the chunks of one pass.
    ///
    /// Starts a pass if none is active (under either rearm policy). The
    /// iterator stops after the end-of-partition signal or the first error.
    pub fn pass(&mut self) -> Result<PassIter<'_>> {
        if !self.pass_active {
            self.begin_pass()?;
        }
        Ok(PassIter {
            cursor: self,
            done: false,
        })
    }

    /// Point the cursor at another partition of the same store, reporting
    /// later passes to `barrier`.
    ///
    /// Only allowed between passes. Cursors handed out by a
    /// [`DrainRegistry`](crate::DrainRegistry) should be moved with
    /// [`DrainRegistry::rebind`](crate::DrainRegistry::rebind) so the new
    /// partition's shared barrier is picked up.
    pub fn rebind(&mut self, partition: PartitionId, barrier: PassBarrier) -> Result<()> {
        if self.state == CursorState::Closed {
            return Err(self.misuse("rebind"));
        }
        if self.pass_active {
            return Err(SpillwayError::InvalidState(format!(
                "cannot rebind partition {} to {partition} during an active pass",
                self.partition
            )));
        }
        debug!(
            query_id = %self.ctx.query_id,
            from = %self.partition,
            to = %partition,
            "partition cursor rebound"
        );
        self.partition = partition;
        self.chunk_index = 0;
        self.barrier = barrier;
        Ok(())
    }

    /// Release the partition's storage and invalidate the cursor.
    ///
    /// Refused while a pass is in flight so the barrier never keeps a stale
    /// outstanding pass. A store failure is returned, but the cursor counts
    /// as closed either way. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            CursorState::Closed => return Ok(()),
            _ if self.pass_active => {
                warn!(
                    query_id = %self.ctx.query_id,
                    partition = %self.partition,
                    chunk_index = self.chunk_index,
                    "close refused while a pass is active"
                );
                return Err(SpillwayError::InvalidState(format!(
                    "cannot close partition {} while a pass is active at chunk {}",
                    self.partition, self.chunk_index
                )));
            }
            _ => {}
        }

        self.state = CursorState::Closed;
        self.chunk_index = 0;
        match self.store.release_partition(self.partition) {
            Ok(()) => {
                info!(
                    query_id = %self.ctx.query_id,
                    partition = %self.partition,
                    "spilled partition released"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    query_id = %self.ctx.query_id,
                    partition = %self.partition,
                    error = %e,
                    "spilled partition release failed"
                );
                Err(e)
            }
        }
    }

    /// End the active pass. Reaching the end of a partition is never an
    /// error, so a barrier that lost track of this pass is only logged.
    fn finish_pass(&mut self, chunks: usize) {
        self.pass_active = false;
        self.chunk_index = 0;
        match self.barrier.on_pass_finish() {
            Ok(()) => {
                global_metrics().inc_passes(&self.ctx.query_id.to_string(), self.partition.0);
                debug!(
                    query_id = %self.ctx.query_id,
                    partition = %self.partition,
                    chunks,
                    "partition pass finished"
                );
            }
            Err(e) => warn!(
                query_id = %self.ctx.query_id,
                partition = %self.partition,
                chunks,
                error = %e,
                "pass finished but the barrier had no outstanding pass"
            ),
        }
    }

    fn ensure_open(&self, op: &str) -> Result<()> {
        if self.state == CursorState::Opened {
            Ok(())
        } else {
            Err(self.misuse(op))
        }
    }

    fn misuse(&self, op: &str) -> SpillwayError {
        let state = match self.state {
            CursorState::Unopened => "not opened",
            CursorState::Opened => "open",
            CursorState::Closed => "closed",
        };
        SpillwayError::InvalidState(format!(
            "{op} on partition {} cursor that is {state}",
            self.partition
        ))
    }
}

/// Iterator over one pass of a [`PartitionCursor`].
pub struct PassIter<'a> {
    cursor: &'a mut PartitionCursor,
    done: bool,
}

impl Iterator for PassIter<'_> {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.cursor.produce_next() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
