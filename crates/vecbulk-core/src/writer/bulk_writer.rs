//! Bulk writer: validate, buffer, flush, commit.
//!
//! ## Concurrency
//!
//! `append_row` takes `&self` and may be called from many threads. The append,
//! the counter update and the flush decision happen under the buffer mutex.
//! When a chunk is due, the builder is swapped for a fresh one and the sealed
//! builder is handed off under a second, narrower mutex: appends continue on
//! the new chunk while the hand-off waits for the single-flight slot.
//!
//! A dedicated commit worker thread receives sealed builders over a channel,
//! closes them and runs the sink. Commit failures are logged and recorded;
//! they surface from `commit(CommitMode::Sync)` and `close()`.

use super::sink::{ChunkSink, CommitReceipt, LocalSink, RemoteSink};
use crate::buffer::{ChunkBuffer, FlushSlot};
use crate::chunk::{BulkFileType, ChunkWriterFactory, SealedChunk};
use crate::config::WriterConfig;
use crate::error::FlushError;
use crate::metrics::BulkWriterMetrics;
use crate::schema::{CollectionSchema, Row, SchemaValidator};
use crate::upload::UploadSession;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default chunk size: 128 MiB of buffered row data.
pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024 * 1024;

/// How `commit` waits for the chunk it seals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Block until the chunk has been committed
    Sync,
    /// Return once the chunk has been handed off
    Async,
}

/// Sealed builder on its way to the commit worker.
struct CommitTask {
    ticket: u64,
    sealed: SealedChunk,
}

#[derive(Debug, Default)]
struct Outcome {
    receipts: Vec<CommitReceipt>,
    failure: Option<FlushError>,
}

/// State shared with the commit worker.
struct Shared {
    validator: SchemaValidator,
    buffer: Mutex<ChunkBuffer>,
    handoff: Mutex<Option<Sender<CommitTask>>>,
    slot: FlushSlot,
    outcome: Mutex<Outcome>,
    metrics: Arc<BulkWriterMetrics>,
    closed: AtomicBool,
}

impl Shared {
    /// Wait for the slot and send `sealed` to the worker. Returns its ticket.
    fn dispatch(&self, sender: Option<&Sender<CommitTask>>, sealed: SealedChunk) -> u64 {
        let ticket = self.slot.acquire();
        let sequence = sealed.sequence;
        let sent = match sender {
            Some(tx) => tx.send(CommitTask { ticket, sealed }).is_ok(),
            None => false,
        };
        if sent {
            debug!(chunk = sequence, ticket, "Chunk handed to commit worker");
        } else {
            self.slot.release(ticket);
            error!(chunk = sequence, "Commit worker is not running, chunk dropped");
            self.record_failure(FlushError::WorkerStopped);
        }
        ticket
    }

    /// Keep the first failure.
    fn record_failure(&self, failure: FlushError) {
        self.metrics.record_flush_failure();
        let mut outcome = self.outcome.lock();
        if outcome.failure.is_none() {
            outcome.failure = Some(failure);
        }
    }

    fn check_failure(&self) -> Result<()> {
        match &self.outcome.lock().failure {
            Some(failure) => Err(Error::Flush(failure.clone())),
            None => Ok(()),
        }
    }

    /// Swap out the active builder and open the next one.
    ///
    /// Returns the sealed chunk (if any rows were buffered) together with the
    /// hand-off guard, taken before the buffer lock is released so that
    /// hand-off order matches creation order.
    fn rotate<'a>(
        &'a self,
        buffer: &mut ChunkBuffer,
    ) -> (Option<SealedChunk>, parking_lot::MutexGuard<'a, Option<Sender<CommitTask>>>) {
        let sealed = buffer.take_sealed();
        if sealed.is_some() {
            if let Err(e) = buffer.open_next() {
                error!(chunk = buffer.sequence(), error = %e, "Failed to open next chunk");
                self.record_failure(FlushError::Open {
                    chunk: buffer.sequence(),
                    message: e.to_string(),
                });
            }
            self.metrics.set_buffered(0, 0);
        }
        (sealed, self.handoff.lock())
    }
}

/// Guard releasing a flush slot ticket when the worker is done with a chunk.
struct SlotRelease<'a> {
    slot: &'a FlushSlot,
    ticket: u64,
}

impl Drop for SlotRelease<'_> {
    fn drop(&mut self) {
        self.slot.release(self.ticket);
    }
}

fn run_worker(shared: Arc<Shared>, tasks: Receiver<CommitTask>, mut sink: Box<dyn ChunkSink>) {
    for task in tasks {
        // Declared first so the slot is released after the outcome is recorded.
        let _release = SlotRelease {
            slot: &shared.slot,
            ticket: task.ticket,
        };

        let start = Instant::now();
        let sequence = task.sealed.sequence;
        let rows = task.sealed.row_count;

        let result = task
            .sealed
            .seal()
            .map_err(|e| FlushError::Seal {
                chunk: sequence,
                message: e.to_string(),
            })
            .and_then(|chunk| {
                let file_size = chunk.file_size_bytes;
                sink.commit(chunk)
                    .map(|receipt| (receipt, file_size))
                    .map_err(|e| FlushError::Commit {
                        chunk: sequence,
                        message: e.to_string(),
                    })
            });

        match result {
            Ok((receipt, file_size)) => {
                let duration = start.elapsed();
                shared.metrics.record_flush(rows, duration);
                info!(
                    chunk = sequence,
                    rows,
                    file_size_bytes = file_size,
                    duration_ms = duration.as_millis() as u64,
                    "Chunk committed"
                );
                shared.outcome.lock().receipts.push(receipt);
            }
            Err(e) => {
                error!(chunk = sequence, rows, error = %e, "Chunk commit failed");
                shared.record_failure(e);
            }
        }
    }
    debug!("Commit worker stopped");
}

/// Remove `path` if it exists and is empty. Never fails.
fn remove_dir_if_empty(path: &Path) {
    match fs::read_dir(path) {
        Ok(mut entries) => {
            if entries.next().is_some() {
                info!(path = %path.display(), "Directory not empty, leaving in place");
                return;
            }
            if let Err(e) = fs::remove_dir(path) {
                warn!(path = %path.display(), error = %e, "Failed to remove directory");
            } else {
                debug!(path = %path.display(), "Removed empty directory");
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to inspect directory"),
    }
}

/// Schema-validated chunked writer.
///
/// Construct with [`BulkWriter::builder`]. Rows are appended from any number
/// of threads; sealed chunks are committed in creation order by a background
/// worker. Call [`BulkWriter::close`] to drain; dropping the writer closes it
/// on a best-effort basis.
pub struct BulkWriter {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    uuid: String,
    data_dir: PathBuf,
    /// Removed on close when empty (remote writers)
    outer_root: Option<PathBuf>,
}

impl BulkWriter {
    /// Start building a writer for `schema`.
    pub fn builder(schema: impl Into<Arc<CollectionSchema>>) -> BulkWriterBuilder {
        BulkWriterBuilder::new(schema.into())
    }

    /// Validate and buffer one row.
    ///
    /// Validation errors reject only this row. Flushing is triggered once
    /// the buffered bytes exceed the chunk size.
    pub fn append_row(&self, row: &Row) -> Result<()> {
        let normalized = match self.shared.validator.validate(row) {
            Ok(normalized) => normalized,
            Err(e) => {
                self.shared.metrics.record_row_rejected();
                debug!(error = %e, "Row rejected");
                return Err(e.into());
            }
        };

        let mut buffer = self.shared.buffer.lock();
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        buffer.append(&normalized)?;
        self.shared.metrics.record_row_appended();
        self.shared
            .metrics
            .set_buffered(buffer.buffered_bytes(), buffer.buffered_rows());

        if buffer.should_flush() {
            debug!(
                chunk = buffer.sequence(),
                bytes = buffer.buffered_bytes(),
                chunk_size = buffer.chunk_size(),
                "Chunk size exceeded, flushing"
            );
            let (sealed, handoff) = self.shared.rotate(&mut buffer);
            drop(buffer);
            if let Some(sealed) = sealed {
                self.shared.dispatch(handoff.as_ref(), sealed);
            }
        }

        Ok(())
    }

    /// Seal the current chunk below threshold and hand it off.
    ///
    /// `Sync` waits for the commit and returns any recorded commit failure.
    pub fn commit(&self, mode: CommitMode) -> Result<()> {
        let ticket = {
            let mut buffer = self.shared.buffer.lock();
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(Error::Closed);
            }
            let (sealed, handoff) = self.shared.rotate(&mut buffer);
            drop(buffer);
            sealed.map(|sealed| self.shared.dispatch(handoff.as_ref(), sealed))
        };

        match mode {
            CommitMode::Async => Ok(()),
            CommitMode::Sync => {
                // With nothing sealed, wait for whatever is already in flight.
                let ticket = ticket.unwrap_or_else(|| self.shared.slot.issued());
                self.shared.slot.wait_for(ticket);
                self.shared.check_failure()
            }
        }
    }

    /// Drain buffered rows, wait for in-flight commits, remove empty temp
    /// directories. Idempotent.
    pub fn close(&self) -> Result<()> {
        {
            let mut buffer = self.shared.buffer.lock();
            if self.shared.closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            info!(
                uuid = %self.uuid,
                rows = buffer.buffered_rows(),
                "Closing bulk writer"
            );

            let sealed = match buffer.finish() {
                Ok(sealed) => sealed,
                Err(e) => {
                    warn!(error = %e, "Failed to discard empty chunk builder");
                    None
                }
            };
            self.shared.metrics.set_buffered(0, 0);
            let mut handoff = self.shared.handoff.lock();
            drop(buffer);

            if let Some(sealed) = sealed {
                self.shared.dispatch(handoff.as_ref(), sealed);
            }
            // Dropping the sender lets the worker exit once drained.
            handoff.take();
        }

        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!("Commit worker panicked");
                self.shared.record_failure(FlushError::WorkerStopped);
            }
        }

        remove_dir_if_empty(&self.data_dir);
        if let Some(outer) = &self.outer_root {
            remove_dir_if_empty(outer);
        }

        let result = self.shared.check_failure();
        match &result {
            Ok(()) => info!(uuid = %self.uuid, chunks = self.committed_chunks(), "Bulk writer closed"),
            Err(e) => warn!(uuid = %self.uuid, error = %e, "Bulk writer closed with errors"),
        }
        result
    }

    /// Committed file locations in creation order.
    pub fn batch_files(&self) -> Vec<String> {
        self.shared
            .outcome
            .lock()
            .receipts
            .iter()
            .flat_map(|r| r.files.iter().cloned())
            .collect()
    }

    /// Receipts for committed chunks in creation order.
    pub fn receipts(&self) -> Vec<CommitReceipt> {
        self.shared.outcome.lock().receipts.clone()
    }

    fn committed_chunks(&self) -> usize {
        self.shared.outcome.lock().receipts.len()
    }

    /// Unique id of this writer; also the name of its temp subdirectory.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Directory chunk files are written to.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn schema(&self) -> &Arc<CollectionSchema> {
        self.shared.validator.schema()
    }

    pub fn metrics(&self) -> &Arc<BulkWriterMetrics> {
        &self.shared.metrics
    }

    /// Rows in the active chunk.
    pub fn buffered_rows(&self) -> usize {
        self.shared.buffer.lock().buffered_rows()
    }

    /// Estimated bytes in the active chunk.
    pub fn buffered_bytes(&self) -> usize {
        self.shared.buffer.lock().buffered_bytes()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl Drop for BulkWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Bulk writer dropped with errors");
        }
    }
}

impl std::fmt::Debug for BulkWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkWriter")
            .field("uuid", &self.uuid)
            .field("data_dir", &self.data_dir)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Builder for [`BulkWriter`].
pub struct BulkWriterBuilder {
    schema: Arc<CollectionSchema>,
    local_path: PathBuf,
    chunk_size: usize,
    factory: Arc<dyn ChunkWriterFactory>,
    metrics: Option<Arc<BulkWriterMetrics>>,
}

impl BulkWriterBuilder {
    fn new(schema: Arc<CollectionSchema>) -> Self {
        let defaults = WriterConfig::default();
        Self {
            schema,
            local_path: defaults.local_path,
            chunk_size: DEFAULT_CHUNK_SIZE,
            factory: defaults.file_type.factory(),
            metrics: None,
        }
    }

    /// Apply the `[writer]` configuration section.
    pub fn with_config(self, config: &WriterConfig) -> Self {
        self.with_local_path(&config.local_path)
            .with_chunk_size(config.chunk_size_bytes)
            .with_file_type(config.file_type)
    }

    /// Root directory; the writer creates `<local_path>/<uuid>` inside it.
    pub fn with_local_path(mut self, local_path: impl Into<PathBuf>) -> Self {
        self.local_path = local_path.into();
        self
    }

    /// Buffered bytes that trigger a flush once exceeded.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_file_type(mut self, file_type: BulkFileType) -> Self {
        self.factory = file_type.factory();
        self
    }

    /// Use a custom chunk format.
    pub fn with_writer_factory(mut self, factory: Arc<dyn ChunkWriterFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<BulkWriterMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Writer that keeps committed chunks in its local directory.
    pub fn build_local(self) -> Result<BulkWriter> {
        self.build_inner(None, |_| Ok(Box::new(LocalSink)))
    }

    /// Writer that uploads each committed chunk to the session's stage under
    /// `<remote_path>/<uuid>/`.
    pub fn build_remote(
        self,
        session: Arc<UploadSession>,
        remote_path: impl Into<String>,
    ) -> Result<BulkWriter> {
        let outer_root = self.local_path.clone();
        let upload_root = outer_root.clone();
        let remote_path = remote_path.into();
        self.build_inner(Some(outer_root), move |_| {
            Ok(Box::new(RemoteSink::new(session, upload_root, remote_path)))
        })
    }

    /// Writer with a caller-provided sink. `make_sink` receives the data dir.
    pub fn build_with_sink<F>(self, make_sink: F) -> Result<BulkWriter>
    where
        F: FnOnce(&Path) -> Result<Box<dyn ChunkSink>>,
    {
        self.build_inner(None, make_sink)
    }

    fn build_inner<F>(self, outer_root: Option<PathBuf>, make_sink: F) -> Result<BulkWriter>
    where
        F: FnOnce(&Path) -> Result<Box<dyn ChunkSink>>,
    {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk size must be greater than zero".into()));
        }

        let uuid = Uuid::new_v4().to_string();
        let data_dir = self.local_path.join(&uuid);
        fs::create_dir_all(&data_dir)?;

        let parts = ChunkBuffer::new(Arc::clone(&self.factory), &data_dir, self.chunk_size)
            .and_then(|buffer| make_sink(&data_dir).map(|sink| (buffer, sink)));
        let (buffer, sink) = match parts {
            Ok(parts) => parts,
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&data_dir) {
                    warn!(path = %data_dir.display(), error = %cleanup, "Failed to remove writer directory");
                }
                return Err(e);
            }
        };

        let metrics = self.metrics.unwrap_or_default();
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            validator: SchemaValidator::new(self.schema, self.factory.encoding()),
            buffer: Mutex::new(buffer),
            handoff: Mutex::new(Some(tx)),
            slot: FlushSlot::new(),
            outcome: Mutex::new(Outcome::default()),
            metrics,
            closed: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(format!("vecbulk-commit-{}", &uuid[..8]))
            .spawn(move || run_worker(worker_shared, rx, sink))?;

        info!(
            uuid = %uuid,
            data_dir = %data_dir.display(),
            chunk_size = self.chunk_size,
            format = self.factory.extension(),
            remote = outer_root.is_some(),
            "Bulk writer created"
        );

        Ok(BulkWriter {
            shared,
            worker: Mutex::new(Some(worker)),
            uuid,
            data_dir,
            outer_root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkFile;
    use crate::schema::{DataType, FieldSpec};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tempfile::TempDir;

    // int64 id (8 bytes) + 4-dim float vector (16 bytes)
    const ROW_BYTES: usize = 24;

    fn schema() -> CollectionSchema {
        CollectionSchema::builder()
            .field(FieldSpec::new("id", DataType::Int64).primary_key())
            .field(FieldSpec::new("vector", DataType::FloatVector).with_dim(4))
            .build()
            .unwrap()
    }

    fn row(id: i64) -> Row {
        match json!({"id": id, "vector": [0.5, 1.0, 1.5, 2.0]}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn read_ids(path: &Path) -> Vec<i64> {
        let doc: Value = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
        doc["rows"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_i64().unwrap())
            .collect()
    }

    /// Commits after a fixed delay, optionally refusing one chunk.
    struct SlowSink {
        delay: Duration,
        fail_on: Option<u64>,
    }

    impl ChunkSink for SlowSink {
        fn commit(&mut self, chunk: ChunkFile) -> Result<CommitReceipt> {
            thread::sleep(self.delay);
            if self.fail_on == Some(chunk.sequence) {
                return Err(Error::Config(format!("sink refused chunk {}", chunk.sequence)));
            }
            LocalSink.commit(chunk)
        }
    }

    fn slow(delay: Duration, fail_on: Option<u64>) -> SlowSink {
        SlowSink { delay, fail_on }
    }

    /// Reports each chunk as it arrives, then holds it until released.
    struct GatedSink {
        started: Sender<u64>,
        release: Receiver<()>,
    }

    impl ChunkSink for GatedSink {
        fn commit(&mut self, chunk: ChunkFile) -> Result<CommitReceipt> {
            let _ = self.started.send(chunk.sequence);
            let _ = self.release.recv();
            LocalSink.commit(chunk)
        }
    }

    #[test]
    fn test_chunks_preserve_row_order() {
        let dir = TempDir::new().unwrap();
        let writer = BulkWriter::builder(schema())
            .with_local_path(dir.path())
            .with_chunk_size(ROW_BYTES * 10)
            .build_local()
            .unwrap();

        for id in 0..200 {
            writer.append_row(&row(id)).unwrap();
        }
        writer.close().unwrap();

        let files = writer.batch_files();
        assert!(files.len() > 1);
        let ids: Vec<i64> = files
            .iter()
            .flat_map(|f| read_ids(Path::new(f)))
            .collect();
        assert_eq!(ids, (0..200).collect::<Vec<_>>());

        let sequences: Vec<u64> = writer.receipts().iter().map(|r| r.sequence).collect();
        let expected: Vec<u64> = (1..=sequences.len() as u64).collect();
        assert_eq!(sequences, expected);
        assert!(files.iter().all(|f| f.ends_with(".json")));
    }

    #[test]
    fn test_threshold_flush_through_writer() {
        let dir = TempDir::new().unwrap();
        let writer = BulkWriter::builder(schema())
            .with_local_path(dir.path())
            .with_chunk_size(ROW_BYTES * 5)
            .build_local()
            .unwrap();

        // 6 rows exceed 5 rows' worth of bytes; the 6th append flushes.
        for id in 0..5 {
            writer.append_row(&row(id)).unwrap();
        }
        assert_eq!(writer.buffered_rows(), 5);
        writer.append_row(&row(5)).unwrap();
        assert_eq!(writer.buffered_rows(), 0);

        writer.append_row(&row(6)).unwrap();
        assert_eq!(writer.buffered_rows(), 1);
        assert_eq!(writer.buffered_bytes(), ROW_BYTES);

        writer.close().unwrap();
        let rows: Vec<usize> = writer.receipts().iter().map(|r| r.row_count).collect();
        assert_eq!(rows, vec![6, 1]);
    }

    #[test]
    fn test_single_commit_in_flight() {
        let dir = TempDir::new().unwrap();
        let (started_tx, started) = mpsc::channel();
        let (release, release_rx) = mpsc::channel();
        let sink = GatedSink {
            started: started_tx,
            release: release_rx,
        };
        let writer = Arc::new(
            BulkWriter::builder(schema())
                .with_local_path(dir.path())
                .with_chunk_size(ROW_BYTES * 2)
                .build_with_sink(move |_| Ok(Box::new(sink)))
                .unwrap(),
        );

        // Third row exceeds the chunk size: chunk 1 goes to the sink and is held.
        for id in 0..3 {
            writer.append_row(&row(id)).unwrap();
        }
        assert_eq!(started.recv_timeout(Duration::from_secs(5)).unwrap(), 1);

        // Sixth row seals chunk 2; its hand-off must wait for chunk 1.
        let returned = Arc::new(AtomicBool::new(false));
        let appender = {
            let writer = Arc::clone(&writer);
            let returned = Arc::clone(&returned);
            thread::spawn(move || {
                for id in 3..6 {
                    writer.append_row(&row(id)).unwrap();
                }
                returned.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(200));
        assert!(!returned.load(Ordering::SeqCst));
        assert_eq!(writer.shared.slot.issued(), 1);
        assert!(started.try_recv().is_err());

        release.send(()).unwrap();
        assert_eq!(started.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
        appender.join().unwrap();
        assert!(returned.load(Ordering::SeqCst));
        assert_eq!(writer.shared.slot.issued(), 2);

        release.send(()).unwrap();
        writer.close().unwrap();

        let sequences: Vec<u64> = writer.receipts().iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
        let ids: Vec<i64> = writer
            .batch_files()
            .iter()
            .flat_map(|f| read_ids(Path::new(f)))
            .collect();
        assert_eq!(ids, (0..6).collect::<Vec<_>>());
    }

    #[test]
    fn test_sync_commit_waits() {
        let dir = TempDir::new().unwrap();
        let sink = slow(Duration::from_millis(50), None);
        let writer = BulkWriter::builder(schema())
            .with_local_path(dir.path())
            .build_with_sink(move |_| Ok(Box::new(sink)))
            .unwrap();

        writer.append_row(&row(1)).unwrap();
        writer.append_row(&row(2)).unwrap();
        writer.commit(CommitMode::Sync).unwrap();

        let receipts = writer.receipts();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].row_count, 2);
        assert_eq!(read_ids(Path::new(&receipts[0].files[0])), vec![1, 2]);

        // Nothing buffered: returns immediately.
        writer.commit(CommitMode::Sync).unwrap();
        assert_eq!(writer.receipts().len(), 1);
    }

    #[test]
    fn test_async_commit_then_close() {
        let dir = TempDir::new().unwrap();
        let writer = BulkWriter::builder(schema())
            .with_local_path(dir.path())
            .build_local()
            .unwrap();

        writer.append_row(&row(1)).unwrap();
        writer.commit(CommitMode::Async).unwrap();
        writer.append_row(&row(2)).unwrap();
        writer.close().unwrap();

        let rows: Vec<usize> = writer.receipts().iter().map(|r| r.row_count).collect();
        assert_eq!(rows, vec![1, 1]);
    }

    #[test]
    fn test_commit_failure_is_surfaced() {
        let dir = TempDir::new().unwrap();
        let sink = slow(Duration::ZERO, Some(1));
        let writer = BulkWriter::builder(schema())
            .with_local_path(dir.path())
            .build_with_sink(move |_| Ok(Box::new(sink)))
            .unwrap();

        writer.append_row(&row(1)).unwrap();
        let err = writer.commit(CommitMode::Sync).unwrap_err();
        assert!(matches!(err, Error::Flush(FlushError::Commit { chunk: 1, .. })));

        // Appends keep working; the failure stays recorded.
        writer.append_row(&row(2)).unwrap();
        assert!(matches!(writer.close(), Err(Error::Flush(_))));
        assert_eq!(writer.receipts().len(), 1);
        assert_eq!(writer.metrics().flush_failures_total(), 1);

        // Failed chunk stays on disk, so the directory is kept.
        assert!(writer.data_dir().exists());
    }

    #[test]
    fn test_close_removes_empty_dir() {
        let dir = TempDir::new().unwrap();
        let writer = BulkWriter::builder(schema())
            .with_local_path(dir.path())
            .build_local()
            .unwrap();
        let data_dir = writer.data_dir().to_path_buf();
        assert!(data_dir.exists());
        assert!(data_dir.ends_with(writer.uuid()));

        writer.close().unwrap();
        assert!(!data_dir.exists());
        assert!(writer.batch_files().is_empty());
    }

    #[test]
    fn test_close_keeps_dir_with_files() {
        let dir = TempDir::new().unwrap();
        let writer = BulkWriter::builder(schema())
            .with_local_path(dir.path())
            .build_local()
            .unwrap();
        writer.append_row(&row(1)).unwrap();
        writer.close().unwrap();

        assert!(writer.data_dir().join("1.json").exists());
        assert!(!writer.data_dir().join("1.json.partial").exists());
    }

    #[test]
    fn test_close_is_idempotent_and_blocks_appends() {
        let dir = TempDir::new().unwrap();
        let writer = BulkWriter::builder(schema())
            .with_local_path(dir.path())
            .build_local()
            .unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
        assert!(writer.is_closed());
        assert!(matches!(writer.append_row(&row(1)), Err(Error::Closed)));
        assert!(matches!(writer.commit(CommitMode::Sync), Err(Error::Closed)));
    }

    #[test]
    fn test_rejected_row_does_not_buffer() {
        let dir = TempDir::new().unwrap();
        let writer = BulkWriter::builder(schema())
            .with_local_path(dir.path())
            .build_local()
            .unwrap();

        let mut bad = row(1);
        bad.insert("vector".into(), json!([1.0, 2.0]));
        assert!(matches!(writer.append_row(&bad), Err(Error::Validation(_))));
        assert_eq!(writer.buffered_rows(), 0);
        assert_eq!(writer.metrics().rows_rejected_total(), 1);

        writer.append_row(&row(2)).unwrap();
        assert_eq!(writer.metrics().rows_appended_total(), 1);
        writer.close().unwrap();
    }

    #[test]
    fn test_concurrent_appends() {
        let dir = TempDir::new().unwrap();
        let writer = Arc::new(
            BulkWriter::builder(schema())
                .with_local_path(dir.path())
                .with_chunk_size(ROW_BYTES * 7)
                .build_local()
                .unwrap(),
        );

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let writer = Arc::clone(&writer);
                thread::spawn(move || {
                    for i in 0..50 {
                        writer.append_row(&row(t * 1000 + i)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        writer.close().unwrap();

        let mut ids: Vec<i64> = writer
            .batch_files()
            .iter()
            .flat_map(|f| read_ids(Path::new(f)))
            .collect();
        assert_eq!(ids.len(), 200);
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 200);

        let total: usize = writer.receipts().iter().map(|r| r.row_count).sum();
        assert_eq!(total, 200);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let dir = TempDir::new().unwrap();
        let result = BulkWriter::builder(schema())
            .with_local_path(dir.path())
            .with_chunk_size(0)
            .build_local();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_drop_closes() {
        let dir = TempDir::new().unwrap();
        let data_dir = {
            let writer = BulkWriter::builder(schema())
                .with_local_path(dir.path())
                .build_local()
                .unwrap();
            writer.append_row(&row(7)).unwrap();
            writer.data_dir().to_path_buf()
        };
        assert_eq!(read_ids(&data_dir.join("1.json")), vec![7]);
    }
}
