use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use arrow::ipc::reader::FileReader;
use arrow::record_batch::RecordBatch;
use spillway_common::metrics::global_metrics;
use spillway_common::{PartitionId, QueryId, Result, SpillConfig, SpillId, SpillwayError};
use spillway_execution::ChunkStore;
use tracing::{debug, warn};

use crate::layout::{partition_path, spill_set_dir};

type PartitionReader = FileReader<BufReader<File>>;
type SharedReader = Arc<Mutex<PartitionReader>>;

/// [`ChunkStore`] over the partition files of one spill set.
///
/// Partition readers are opened lazily and cached, so repeated passes only
/// seek within the already-parsed IPC footer. Each partition has its own
/// reader lock; cursors on different partitions read concurrently. A
/// partition that was never written reports zero chunks.
pub struct DiskChunkStore {
    root_dir: PathBuf,
    query_id: QueryId,
    spill_id: SpillId,
    remove_empty_dirs: bool,
    readers: Mutex<HashMap<PartitionId, SharedReader>>,
}

impl DiskChunkStore {
    pub fn new(root_dir: impl Into<PathBuf>, query_id: QueryId, spill_id: SpillId) -> Self {
        Self {
            root_dir: root_dir.into(),
            query_id,
            spill_id,
            remove_empty_dirs: true,
            readers: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &SpillConfig, query_id: QueryId, spill_id: SpillId) -> Self {
        Self::new(&config.spill_dir, query_id, spill_id)
            .with_remove_empty_dirs(config.remove_empty_dirs)
    }

    pub fn with_remove_empty_dirs(mut self, enabled: bool) -> Self {
        self.remove_empty_dirs = enabled;
        self
    }

    pub fn partition_file(&self, partition: PartitionId) -> PathBuf {
        self.root_dir
            .join(partition_path(self.query_id, self.spill_id, partition))
    }

    fn with_reader<T>(
        &self,
        partition: PartitionId,
        f: impl FnOnce(&mut PartitionReader) -> Result<T>,
    ) -> Result<Option<T>> {
        let Some(shared) = self.reader_for(partition)? else {
            return Ok(None);
        };
        let mut reader = shared.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *reader).map(Some)
    }

    /// Cached reader for `partition`. The file is opened outside the map lock;
    /// if two threads race, the first reader cached wins.
    fn reader_for(&self, partition: PartitionId) -> Result<Option<SharedReader>> {
        if let Some(reader) = self.lock().get(&partition) {
            return Ok(Some(Arc::clone(reader)));
        }
        let Some(opened) = self.open_reader(partition)? else {
            return Ok(None);
        };
        let reader = self
            .lock()
            .entry(partition)
            .or_insert_with(|| Arc::new(Mutex::new(opened)))
            .clone();
        Ok(Some(reader))
    }

    fn open_reader(&self, partition: PartitionId) -> Result<Option<PartitionReader>> {
        let path = self.partition_file(partition);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let reader = FileReader::try_new(BufReader::new(file), None).map_err(|e| {
            SpillwayError::Execution(format!(
                "ipc reader init failed for {}: {e}",
                path.display()
            ))
        })?;
        debug!(
            query_id = %self.query_id,
            spill_id = %self.spill_id,
            partition = %partition,
            chunks = reader.num_batches(),
            "spilled partition opened"
        );
        Ok(Some(reader))
    }

    fn prune_empty_dirs(&self) {
        let set_dir = self.root_dir.join(spill_set_dir(self.query_id, self.spill_id));
        let Some(query_dir) = set_dir.parent().map(Path::to_path_buf) else {
            return;
        };
        // remove_dir only succeeds on empty directories.
        for dir in [set_dir, query_dir] {
            if fs::remove_dir(&dir).is_err() {
                break;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PartitionId, SharedReader>> {
        self.readers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChunkStore for DiskChunkStore {
    fn num_chunks(&self, partition: PartitionId) -> Result<usize> {
        Ok(self
            .with_reader(partition, |r| Ok(r.num_batches()))?
            .unwrap_or(0))
    }

    fn read_chunk(&self, partition: PartitionId, index: usize) -> Result<RecordBatch> {
        let started = Instant::now();
        let batch = self
            .with_reader(partition, |r| {
                if index >= r.num_batches() {
                    return Err(SpillwayError::Execution(format!(
                        "chunk {index} out of range for partition {partition} with {} chunks",
                        r.num_batches()
                    )));
                }
                r.set_index(index).map_err(|e| {
                    SpillwayError::Execution(format!("ipc seek to chunk {index} failed: {e}"))
                })?;
                match r.next() {
                    Some(Ok(batch)) => Ok(batch),
                    Some(Err(e)) => Err(SpillwayError::Execution(format!(
                        "ipc read of chunk {index} failed: {e}"
                    ))),
                    None => Err(SpillwayError::Execution(format!(
                        "chunk {index} missing from partition {partition}"
                    ))),
                }
            })?
            .ok_or_else(|| {
                SpillwayError::Execution(format!(
                    "partition {partition} has no spill file; chunk {index} is unavailable"
                ))
            })?;
        global_metrics().record_chunk_read(
            &self.query_id.to_string(),
            self.spill_id.0,
            batch.num_rows() as u64,
            started.elapsed().as_secs_f64(),
        );
        Ok(batch)
    }

    fn release_partition(&self, partition: PartitionId) -> Result<()> {
        self.lock().remove(&partition);
        let path = self.partition_file(partition);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(
                    query_id = %self.query_id,
                    partition = %partition,
                    path = %path.display(),
                    error = %e,
                    "failed to delete spilled partition"
                );
                return Err(e.into());
            }
        }
        if self.remove_empty_dirs {
            self.prune_empty_dirs();
        }
        global_metrics().inc_partitions_released(&self.query_id.to_string(), self.spill_id.0);
        Ok(())
    }
}
