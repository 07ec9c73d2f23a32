use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arrow::array::{Array, StringArray};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use spillway_common::{
    PartitionId, QueryId, RearmPolicy, Result, SpillConfig, SpillId, SpillwayError,
};
use spillway_execution::{ChunkStore, DrainRegistry, PartitionCursor, PassBarrier, TaskContext};
use spillway_spill::{DiskChunkStore, SpillWriter};
use tracing_subscriber::EnvFilter;

const QUERY: QueryId = QueryId(42);
const SPILL: SpillId = SpillId(3);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn temp_spill_root(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    std::env::temp_dir().join(format!("spillway_readback_{tag}_{nanos}"))
}

fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new("tag", DataType::Utf8, false)]))
}

fn chunk(tag: &str) -> RecordBatch {
    RecordBatch::try_new(schema(), vec![Arc::new(StringArray::from(vec![tag]))]).expect("batch")
}

fn tag_of(batch: &RecordBatch) -> String {
    batch
        .column(0)
        .as_any()
        .downcast_ref::<StringArray>()
        .expect("utf8")
        .value(0)
        .to_string()
}

fn spill(root: &Path, partition: u32, tags: &[&str]) {
    let batches = tags.iter().map(|t| chunk(t)).collect::<Vec<_>>();
    SpillWriter::new(root)
        .write_partition(QUERY, SPILL, PartitionId(partition), schema(), &batches)
        .expect("spill partition");
}

fn disk_store(root: &Path) -> Arc<DiskChunkStore> {
    Arc::new(DiskChunkStore::new(root, QUERY, SPILL))
}

#[test]
fn three_chunk_partition_reads_in_order_then_closes() {
    init_tracing();
    let root = temp_spill_root("abc");
    spill(&root, 0, &["A", "B", "C"]);
    let store = disk_store(&root);

    let mut cursor = PartitionCursor::new(store.clone(), PartitionId(0), PassBarrier::new())
        .with_context(TaskContext::new(QUERY, SPILL));
    cursor.open().expect("open");
    for expected in ["A", "B", "C"] {
        let batch = cursor.produce_next().expect("produce").expect("chunk");
        assert_eq!(tag_of(&batch), expected);
    }
    assert!(cursor.produce_next().expect("end").is_none());
    cursor.close().expect("close");

    assert_eq!(cursor.barrier().outstanding(), 0);
    assert!(!store.partition_file(PartitionId(0)).exists());
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn zero_chunk_partition_ends_and_closes() {
    init_tracing();
    let root = temp_spill_root("empty");
    spill(&root, 1, &[]);
    let store = disk_store(&root);

    let mut cursor = PartitionCursor::new(store.clone(), PartitionId(1), PassBarrier::new());
    cursor.open().expect("open");
    assert!(cursor.produce_next().expect("end").is_none());
    assert_eq!(cursor.barrier().outstanding(), 0);
    cursor.close().expect("close");

    let mut untouched = PartitionCursor::new(store, PartitionId(2), PassBarrier::new());
    untouched.close().expect("close without open or pass");
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn repeated_passes_reread_from_first_chunk() {
    init_tracing();
    let root = temp_spill_root("passes");
    spill(&root, 0, &["x", "y"]);
    let store = disk_store(&root);

    let mut cursor = PartitionCursor::new(store, PartitionId(0), PassBarrier::new());
    cursor.open().expect("open");
    for _ in 0..3 {
        let tags = cursor
            .pass()
            .expect("pass")
            .map(|b| b.map(|b| tag_of(&b)))
            .collect::<Result<Vec<_>>>()
            .expect("tags");
        assert_eq!(tags, vec!["x", "y"]);
        assert_eq!(cursor.barrier().outstanding(), 0);
    }
    assert_eq!(cursor.barrier().finished(), 3);
    cursor.close().expect("close");
    let _ = std::fs::remove_dir_all(root);
}

/// Serves chunks from a disk store but fails the first read of one index.
struct FlakyStore {
    inner: Arc<DiskChunkStore>,
    fail_index: usize,
    failed: AtomicBool,
}

impl ChunkStore for FlakyStore {
    fn num_chunks(&self, partition: PartitionId) -> Result<usize> {
        self.inner.num_chunks(partition)
    }

    fn read_chunk(&self, partition: PartitionId, index: usize) -> Result<RecordBatch> {
        if index == self.fail_index && !self.failed.swap(true, Ordering::SeqCst) {
            return Err(SpillwayError::Io(std::io::Error::other("short read")));
        }
        self.inner.read_chunk(partition, index)
    }

    fn release_partition(&self, partition: PartitionId) -> Result<()> {
        self.inner.release_partition(partition)
    }
}

#[test]
fn fetch_failure_is_surfaced_without_skipping_chunks() {
    init_tracing();
    let root = temp_spill_root("flaky");
    spill(&root, 0, &["first", "second"]);
    let store = Arc::new(FlakyStore {
        inner: disk_store(&root),
        fail_index: 1,
        failed: AtomicBool::new(false),
    });

    let mut cursor = PartitionCursor::new(store, PartitionId(0), PassBarrier::new());
    cursor.open().expect("open");
    assert_eq!(tag_of(&cursor.produce_next().expect("ok").expect("chunk")), "first");

    let err = cursor.produce_next().expect_err("chunk 1 fails");
    assert!(matches!(err, SpillwayError::Io(_)));
    assert_eq!(cursor.chunk_index(), 1);

    assert_eq!(tag_of(&cursor.produce_next().expect("retry").expect("chunk")), "second");
    assert!(cursor.produce_next().expect("end").is_none());
    cursor.close().expect("close");
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn teardown_waits_for_the_active_pass() {
    init_tracing();
    let root = temp_spill_root("teardown");
    let tags = (0..16).map(|i| format!("c{i}")).collect::<Vec<_>>();
    spill(&root, 5, &tags.iter().map(String::as_str).collect::<Vec<_>>());
    let store = disk_store(&root);

    let registry = DrainRegistry::with_config(SpillConfig {
        spill_dir: root.display().to_string(),
        ..SpillConfig::default()
    })
    .with_context(TaskContext::new(QUERY, SPILL));
    let mut cursor = registry.cursor(store.clone(), PartitionId(5));
    cursor.open().expect("open");
    cursor.begin_pass().expect("begin");

    let reader = thread::spawn(move || {
        let mut seen = Vec::new();
        while let Some(batch) = cursor.produce_next().expect("produce") {
            thread::sleep(Duration::from_millis(2));
            seen.push(tag_of(&batch));
        }
        seen
    });

    registry
        .release_when_drained(store.as_ref(), PartitionId(5))
        .expect("release after drain");
    assert!(!store.partition_file(PartitionId(5)).exists());

    let seen = reader.join().expect("reader thread");
    assert_eq!(seen, tags);
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn explicit_rearm_from_config() {
    init_tracing();
    let root = temp_spill_root("explicit");
    spill(&root, 0, &["only"]);
    let config = SpillConfig {
        spill_dir: root.display().to_string(),
        rearm: RearmPolicy::Explicit,
        ..SpillConfig::default()
    };
    let store = Arc::new(DiskChunkStore::from_config(&config, QUERY, SPILL));
    let registry = DrainRegistry::with_config(config);

    let mut cursor = registry.cursor(store, PartitionId(0));
    cursor.open().expect("open");
    assert!(matches!(
        cursor.produce_next(),
        Err(SpillwayError::InvalidState(_))
    ));
    cursor.begin_pass().expect("begin");
    assert_eq!(tag_of(&cursor.produce_next().expect("ok").expect("chunk")), "only");
    assert!(cursor.produce_next().expect("end").is_none());
    cursor.close().expect("close");
    assert!(!root.join("spill").join(QUERY.to_string()).exists());
    let _ = std::fs::remove_dir_all(root);
}
