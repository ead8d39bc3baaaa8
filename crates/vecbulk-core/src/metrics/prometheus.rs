//! Prometheus metrics export.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Histogram bucket boundaries in milliseconds for flush duration.
/// Converts to seconds: [0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
const FLUSH_DURATION_BUCKETS_MS: [u64; 7] = [100, 250, 500, 1000, 2500, 5000, 10000];

/// Default metric name prefix.
pub const DEFAULT_PREFIX: &str = "vecbulk";

/// Bulk writer metrics with counters, gauges, and a flush histogram.
///
/// Shared through an `Arc` by the writer, its commit worker and the upload
/// session. The upload counters double as upload progress.
#[derive(Debug, Default)]
pub struct BulkWriterMetrics {
    // === COUNTERS ===
    rows_appended_total: AtomicU64,
    rows_rejected_total: AtomicU64,
    flushes_total: AtomicU64,
    flush_failures_total: AtomicU64,
    rows_committed_total: AtomicU64,
    files_uploaded_total: AtomicU64,
    bytes_uploaded_total: AtomicU64,
    upload_failures_total: AtomicU64,
    upload_retries_total: AtomicU64,
    stage_applies_total: AtomicU64,
    credential_refreshes_total: AtomicU64,

    // === GAUGES ===
    buffered_bytes: AtomicU64,
    buffered_rows: AtomicU64,

    // === HISTOGRAM: flush_duration_seconds ===
    flush_duration_sum_ms: AtomicU64,
    flush_duration_count: AtomicU64,
    /// Buckets: [0.1s, 0.25s, 0.5s, 1.0s, 2.5s, 5.0s, 10.0s, +Inf]
    flush_duration_buckets: [AtomicU64; 8],
}

/// Snapshot of the flush duration histogram.
#[derive(Debug, Clone)]
pub struct FlushDurationHistogram {
    /// Sum of all durations in seconds
    pub sum_seconds: f64,
    /// Number of observations
    pub count: u64,
    /// Cumulative (upper bound in seconds, count) pairs
    pub buckets: [(f64, u64); 7],
    /// Count for the +Inf bucket
    pub inf_bucket: u64,
}

impl BulkWriterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    // === COUNTER RECORDING ===

    /// Record a row accepted by validation and buffered.
    pub fn record_row_appended(&self) {
        self.rows_appended_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a row rejected by validation.
    pub fn record_row_rejected(&self) {
        self.rows_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a committed chunk with its duration.
    pub fn record_flush(&self, rows: usize, duration: Duration) {
        self.flushes_total.fetch_add(1, Ordering::Relaxed);
        self.rows_committed_total
            .fetch_add(rows as u64, Ordering::Relaxed);

        let duration_ms = duration.as_millis() as u64;
        self.flush_duration_sum_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
        self.flush_duration_count.fetch_add(1, Ordering::Relaxed);

        // Buckets are cumulative (le)
        for (i, &bucket_ms) in FLUSH_DURATION_BUCKETS_MS.iter().enumerate() {
            if duration_ms <= bucket_ms {
                self.flush_duration_buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.flush_duration_buckets[7].fetch_add(1, Ordering::Relaxed);
    }

    /// Record a chunk that failed to seal or commit.
    pub fn record_flush_failure(&self) {
        self.flush_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one object uploaded.
    pub fn record_file_uploaded(&self, bytes: u64) {
        self.files_uploaded_total.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded_total
            .fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record one object that failed terminally.
    pub fn record_upload_failure(&self) {
        self.upload_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retried PUT.
    pub fn record_upload_retry(&self) {
        self.upload_retries_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a stage apply call. `refresh` marks calls that replaced a credential.
    pub fn record_stage_apply(&self, refresh: bool) {
        self.stage_applies_total.fetch_add(1, Ordering::Relaxed);
        if refresh {
            self.credential_refreshes_total
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    // === GAUGE UPDATES ===

    /// Update the active chunk's buffered size and row count.
    pub fn set_buffered(&self, bytes: usize, rows: usize) {
        self.buffered_bytes.store(bytes as u64, Ordering::Relaxed);
        self.buffered_rows.store(rows as u64, Ordering::Relaxed);
    }

    // === GETTERS ===

    pub fn rows_appended_total(&self) -> u64 {
        self.rows_appended_total.load(Ordering::Relaxed)
    }

    pub fn rows_rejected_total(&self) -> u64 {
        self.rows_rejected_total.load(Ordering::Relaxed)
    }

    pub fn flushes_total(&self) -> u64 {
        self.flushes_total.load(Ordering::Relaxed)
    }

    pub fn flush_failures_total(&self) -> u64 {
        self.flush_failures_total.load(Ordering::Relaxed)
    }

    pub fn rows_committed_total(&self) -> u64 {
        self.rows_committed_total.load(Ordering::Relaxed)
    }

    pub fn files_uploaded_total(&self) -> u64 {
        self.files_uploaded_total.load(Ordering::Relaxed)
    }

    pub fn bytes_uploaded_total(&self) -> u64 {
        self.bytes_uploaded_total.load(Ordering::Relaxed)
    }

    pub fn upload_failures_total(&self) -> u64 {
        self.upload_failures_total.load(Ordering::Relaxed)
    }

    pub fn upload_retries_total(&self) -> u64 {
        self.upload_retries_total.load(Ordering::Relaxed)
    }

    pub fn stage_applies_total(&self) -> u64 {
        self.stage_applies_total.load(Ordering::Relaxed)
    }

    pub fn credential_refreshes_total(&self) -> u64 {
        self.credential_refreshes_total.load(Ordering::Relaxed)
    }

    pub fn buffered_bytes(&self) -> u64 {
        self.buffered_bytes.load(Ordering::Relaxed)
    }

    pub fn buffered_rows(&self) -> u64 {
        self.buffered_rows.load(Ordering::Relaxed)
    }

    /// Get flush duration histogram data for export.
    pub fn flush_duration_histogram(&self) -> FlushDurationHistogram {
        let bucket = |i: usize| self.flush_duration_buckets[i].load(Ordering::Relaxed);
        FlushDurationHistogram {
            sum_seconds: self.flush_duration_sum_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            count: self.flush_duration_count.load(Ordering::Relaxed),
            buckets: [
                (0.1, bucket(0)),
                (0.25, bucket(1)),
                (0.5, bucket(2)),
                (1.0, bucket(3)),
                (2.5, bucket(4)),
                (5.0, bucket(5)),
                (10.0, bucket(6)),
            ],
            inf_bucket: bucket(7),
        }
    }

    /// Export all metrics in Prometheus text format.
    ///
    /// # Example
    /// ```
    /// use vecbulk_core::metrics::BulkWriterMetrics;
    ///
    /// let metrics = BulkWriterMetrics::new();
    /// metrics.record_row_appended();
    /// let text = metrics.export_prometheus_text();
    /// assert!(text.contains("vecbulk_rows_appended_total 1"));
    /// ```
    pub fn export_prometheus_text(&self) -> String {
        self.export_prometheus_text_with_prefix(DEFAULT_PREFIX)
    }

    /// Export metrics in Prometheus text format with a custom name prefix.
    pub fn export_prometheus_text_with_prefix(&self, prefix: &str) -> String {
        let mut output = String::with_capacity(4096);

        let counters = [
            ("rows_appended_total", "Rows accepted and buffered", self.rows_appended_total()),
            ("rows_rejected_total", "Rows rejected by schema validation", self.rows_rejected_total()),
            ("flushes_total", "Chunks sealed and committed", self.flushes_total()),
            ("flush_failures_total", "Chunks that failed to seal or commit", self.flush_failures_total()),
            ("rows_committed_total", "Rows in committed chunks", self.rows_committed_total()),
            ("files_uploaded_total", "Objects uploaded to the stage", self.files_uploaded_total()),
            ("bytes_uploaded_total", "Bytes uploaded to the stage", self.bytes_uploaded_total()),
            ("upload_failures_total", "Objects that failed after all attempts", self.upload_failures_total()),
            ("upload_retries_total", "Object PUTs retried", self.upload_retries_total()),
            ("stage_applies_total", "Stage apply calls issued", self.stage_applies_total()),
            ("credential_refreshes_total", "Stage credentials refreshed", self.credential_refreshes_total()),
        ];
        for (name, help, value) in counters {
            push_metric(&mut output, prefix, name, help, "counter", value);
        }

        push_metric(
            &mut output,
            prefix,
            "buffered_bytes",
            "Estimated bytes in the active chunk",
            "gauge",
            self.buffered_bytes(),
        );
        push_metric(
            &mut output,
            prefix,
            "buffered_rows",
            "Rows in the active chunk",
            "gauge",
            self.buffered_rows(),
        );

        // === HISTOGRAM: flush_duration_seconds ===

        let hist = self.flush_duration_histogram();
        let _ = writeln!(
            output,
            "# HELP {prefix}_flush_duration_seconds Duration of chunk commits"
        );
        let _ = writeln!(output, "# TYPE {prefix}_flush_duration_seconds histogram");
        for (le, count) in &hist.buckets {
            let _ = writeln!(
                output,
                "{prefix}_flush_duration_seconds_bucket{{le=\"{le}\"}} {count}"
            );
        }
        let _ = writeln!(
            output,
            "{prefix}_flush_duration_seconds_bucket{{le=\"+Inf\"}} {}",
            hist.inf_bucket
        );
        let _ = writeln!(output, "{prefix}_flush_duration_seconds_sum {}", hist.sum_seconds);
        let _ = writeln!(output, "{prefix}_flush_duration_seconds_count {}", hist.count);

        output
    }
}

fn push_metric(output: &mut String, prefix: &str, name: &str, help: &str, kind: &str, value: u64) {
    // Writing to a String cannot fail.
    let _ = writeln!(output, "# HELP {prefix}_{name} {help}");
    let _ = writeln!(output, "# TYPE {prefix}_{name} {kind}");
    let _ = writeln!(output, "{prefix}_{name} {value}");
    output.push('\n');
}
