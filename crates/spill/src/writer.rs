use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use spillway_common::metrics::global_metrics;
use spillway_common::{PartitionId, QueryId, Result, SpillConfig, SpillId, SpillwayError};
use tracing::debug;

use crate::layout::{SpillPartitionMeta, partition_path};

/// Writes spilled partitions as Arrow IPC files, one chunk per record batch.
pub struct SpillWriter {
    root_dir: PathBuf,
}

impl SpillWriter {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn from_config(config: &SpillConfig) -> Self {
        Self::new(&config.spill_dir)
    }

    /// Write `batches` as the chunks of `partition`, replacing any previous file.
    ///
    /// The schema is explicit so that a partition which received no rows is
    /// still written as a valid zero-chunk file.
    pub fn write_partition(
        &self,
        query_id: QueryId,
        spill_id: SpillId,
        partition: PartitionId,
        schema: SchemaRef,
        batches: &[RecordBatch],
    ) -> Result<SpillPartitionMeta> {
        let started = Instant::now();
        if let Some(pos) = batches.iter().position(|b| b.schema() != schema) {
            return Err(SpillwayError::Execution(format!(
                "chunk {pos} of partition {partition} does not match the partition schema"
            )));
        }

        let rel = partition_path(query_id, spill_id, partition);
        let abs = self.root_dir.join(&rel);
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut out = BufWriter::new(File::create(&abs)?);
        {
            let mut writer = arrow::ipc::writer::FileWriter::try_new(&mut out, schema.as_ref())
                .map_err(|e| SpillwayError::Execution(format!("ipc writer init failed: {e}")))?;
            for b in batches {
                writer
                    .write(b)
                    .map_err(|e| SpillwayError::Execution(format!("ipc write failed: {e}")))?;
            }
            writer
                .finish()
                .map_err(|e| SpillwayError::Execution(format!("ipc finish failed: {e}")))?;
        }
        out.flush()?;

        let bytes = fs::metadata(&abs)?.len();
        let rows = batches.iter().map(|b| b.num_rows() as u64).sum();
        let chunks = batches.len() as u64;
        global_metrics().record_spill(
            &query_id.to_string(),
            spill_id.0,
            "partition",
            bytes,
            started.elapsed().as_secs_f64(),
        );
        debug!(
            query_id = %query_id,
            spill_id = %spill_id,
            partition = %partition,
            chunks,
            rows,
            bytes,
            "spilled partition written"
        );

        Ok(SpillPartitionMeta {
            partition,
            file: rel,
            bytes,
            rows,
            chunks,
        })
    }
}
