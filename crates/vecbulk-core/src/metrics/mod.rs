//! Writer and upload metrics.

mod prometheus;

pub use prometheus::{BulkWriterMetrics, FlushDurationHistogram, DEFAULT_PREFIX};
