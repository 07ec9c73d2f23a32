use std::sync::{Arc, OnceLock};

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    spill_bytes: CounterVec,
    spill_time_seconds: HistogramVec,
    spill_chunks_read: CounterVec,
    spill_rows_read: CounterVec,
    spill_read_seconds: HistogramVec,
    spill_passes: CounterVec,
    spill_partitions_released: CounterVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    pub fn record_spill(&self, query_id: &str, spill_id: u64, kind: &str, bytes: u64, secs: f64) {
        let labels = [query_id, &spill_id.to_string(), kind];
        self.inner
            .spill_bytes
            .with_label_values(&labels)
            .inc_by(bytes as f64);
        self.inner
            .spill_time_seconds
            .with_label_values(&labels)
            .observe(secs.max(0.0));
    }

    pub fn record_chunk_read(&self, query_id: &str, spill_id: u64, rows: u64, secs: f64) {
        let labels = [query_id, &spill_id.to_string()];
        self.inner
            .spill_chunks_read
            .with_label_values(&labels)
            .inc();
        self.inner
            .spill_rows_read
            .with_label_values(&labels)
            .inc_by(rows as f64);
        self.inner
            .spill_read_seconds
            .with_label_values(&labels)
            .observe(secs.max(0.0));
    }

    pub fn inc_passes(&self, query_id: &str, partition: u32) {
        let labels = [query_id, &partition.to_string()];
        self.inner.spill_passes.with_label_values(&labels).inc();
    }

    pub fn inc_partitions_released(&self, query_id: &str, spill_id: u64) {
        let labels = [query_id, &spill_id.to_string()];
        self.inner
            .spill_partitions_released
            .with_label_values(&labels)
            .inc();
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let spill_bytes = counter_vec(
            &registry,
            "spillway_spill_bytes_total",
            "Spill bytes written",
            &["query_id", "spill_id", "kind"],
        );
        let spill_time_seconds = histogram_vec(
            &registry,
            "spillway_spill_time_seconds",
            "Spill write time",
            &["query_id", "spill_id", "kind"],
        );
        let spill_chunks_read = counter_vec(
            &registry,
            "spillway_spill_chunks_read_total",
            "Spilled chunks read back from disk",
            &["query_id", "spill_id"],
        );
        let spill_rows_read = counter_vec(
            &registry,
            "spillway_spill_rows_read_total",
            "Spilled rows read back from disk",
            &["query_id", "spill_id"],
        );
        let spill_read_seconds = histogram_vec(
            &registry,
            "spillway_spill_read_seconds",
            "Time spent reading one spilled chunk",
            &["query_id", "spill_id"],
        );
        let spill_passes = counter_vec(
            &registry,
            "spillway_spill_passes_total",
            "Completed read passes over a spilled partition",
            &["query_id", "partition"],
        );
        let spill_partitions_released = counter_vec(
            &registry,
            "spillway_spill_partitions_released_total",
            "Spilled partitions released from disk",
            &["query_id", "spill_id"],
        );

        Self {
            registry,
            spill_bytes,
            spill_time_seconds,
            spill_chunks_read,
            spill_rows_read,
            spill_read_seconds,
            spill_passes,
            spill_partitions_released,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn histogram_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let h = HistogramVec::new(HistogramOpts::new(name, help), labels).expect("histogram vec");
    registry
        .register(Box::new(h.clone()))
        .expect("register histogram");
    h
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}
