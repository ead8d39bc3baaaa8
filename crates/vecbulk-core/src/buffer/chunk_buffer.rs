//! Active chunk builder with size accounting.
//!
//! `ChunkBuffer` is not synchronized on its own. The writer keeps it behind a
//! mutex so that the append, the counter update and the flush decision happen
//! together.

use crate::chunk::{ChunkFileWriter, ChunkWriterFactory, SealedChunk};
use crate::error::FlushError;
use crate::schema::NormalizedRow;
use crate::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Suffix carried by chunk files until they are committed.
pub const PARTIAL_SUFFIX: &str = "partial";

/// Accumulates rows for the current chunk.
pub struct ChunkBuffer {
    factory: Arc<dyn ChunkWriterFactory>,
    dir: PathBuf,
    chunk_size: usize,
    active: Option<Box<dyn ChunkFileWriter>>,
    sequence: u64,
    buffered_bytes: usize,
    buffered_rows: usize,
}

impl ChunkBuffer {
    /// Create the buffer and open the first chunk builder in `dir`.
    pub fn new(
        factory: Arc<dyn ChunkWriterFactory>,
        dir: impl Into<PathBuf>,
        chunk_size: usize,
    ) -> Result<Self> {
        let mut buffer = Self {
            factory,
            dir: dir.into(),
            chunk_size,
            active: None,
            sequence: 1,
            buffered_bytes: 0,
            buffered_rows: 0,
        };
        buffer.open_next()?;
        Ok(buffer)
    }

    /// Append a validated row to the active chunk.
    pub fn append(&mut self, row: &NormalizedRow) -> Result<()> {
        self.open_next()?;
        let first_row = self.buffered_rows == 0;
        let sequence = self.sequence;
        let writer = self.active.as_mut().ok_or_else(|| {
            Error::Flush(FlushError::Open {
                chunk: sequence,
                message: "no active chunk builder".into(),
            })
        })?;

        writer.append_row(row, first_row)?;
        self.buffered_rows += 1;
        self.buffered_bytes += row.size_bytes();
        Ok(())
    }

    /// Whether buffered bytes have crossed the chunk size.
    pub fn should_flush(&self) -> bool {
        self.buffered_bytes > self.chunk_size
    }

    /// Swap out the active builder if it holds any rows.
    ///
    /// Counters reset and the sequence advances; the caller opens the next
    /// builder with [`ChunkBuffer::open_next`].
    pub fn take_sealed(&mut self) -> Option<SealedChunk> {
        if self.buffered_rows == 0 {
            return None;
        }
        let writer = self.active.take()?;

        let sealed = SealedChunk {
            sequence: self.sequence,
            writer,
            row_count: self.buffered_rows,
            buffered_bytes: self.buffered_bytes,
        };
        debug!(
            chunk = sealed.sequence,
            rows = sealed.row_count,
            bytes = sealed.buffered_bytes,
            "Swapped out chunk builder"
        );

        self.sequence += 1;
        self.buffered_rows = 0;
        self.buffered_bytes = 0;
        Some(sealed)
    }

    /// Open a builder for the current sequence if none is active.
    pub fn open_next(&mut self) -> Result<()> {
        if self.active.is_some() {
            return Ok(());
        }
        let path = self.chunk_path(self.sequence);
        let writer = self.factory.create(&path).map_err(|e| FlushError::Open {
            chunk: self.sequence,
            message: e.to_string(),
        })?;
        self.active = Some(writer);
        Ok(())
    }

    /// Drain for shutdown: seal a non-empty builder, discard an empty one.
    pub fn finish(&mut self) -> Result<Option<SealedChunk>> {
        if let Some(sealed) = self.take_sealed() {
            return Ok(Some(sealed));
        }

        if let Some(writer) = self.active.take() {
            let path = writer.close()?;
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove empty chunk file");
            }
        }
        Ok(None)
    }

    /// In-progress path for chunk `sequence`.
    pub fn chunk_path(&self, sequence: u64) -> PathBuf {
        self.dir.join(format!(
            "{}.{}.{}",
            sequence,
            self.factory.extension(),
            PARTIAL_SUFFIX
        ))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Sequence number of the active chunk.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    pub fn buffered_rows(&self) -> usize {
        self.buffered_rows
    }
}

impl fmt::Debug for ChunkBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkBuffer")
            .field("dir", &self.dir)
            .field("chunk_size", &self.chunk_size)
            .field("sequence", &self.sequence)
            .field("buffered_bytes", &self.buffered_bytes)
            .field("buffered_rows", &self.buffered_rows)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{JsonWriterFactory, VectorEncoding};
    use crate::schema::{validate_row, CollectionSchema, DataType, FieldSpec, Row};
    use serde_json::json;
    use tempfile::TempDir;

    /// Rows of exactly 30 bytes: int64 id (8) + 22-byte varchar.
    fn thirty_byte_row(id: i64) -> NormalizedRow {
        let schema = CollectionSchema::builder()
            .field(FieldSpec::new("id", DataType::Int64).primary_key())
            .field(FieldSpec::new("text", DataType::VarChar).with_max_length(64))
            .build()
            .unwrap();
        let row: Row =
            serde_json::from_value(json!({"id": id, "text": "abcdefghijklmnopqrstuv"})).unwrap();
        validate_row(&schema, &row, VectorEncoding::Textual).unwrap()
    }

    fn buffer(dir: &Path, chunk_size: usize) -> ChunkBuffer {
        ChunkBuffer::new(Arc::new(JsonWriterFactory), dir, chunk_size).unwrap()
    }

    #[test]
    fn test_opens_first_builder() {
        let dir = TempDir::new().unwrap();
        let buf = buffer(dir.path(), 1000);
        assert_eq!(buf.sequence(), 1);
        assert!(dir.path().join("1.json.partial").exists());
    }

    #[test]
    fn test_flush_threshold_is_strict() {
        let dir = TempDir::new().unwrap();
        let mut buf = buffer(dir.path(), 1000);

        let mut flushed_at = Vec::new();
        let mut sealed = Vec::new();
        for id in 1..=50 {
            let row = thirty_byte_row(id);
            assert_eq!(row.size_bytes(), 30);
            buf.append(&row).unwrap();
            if buf.should_flush() {
                flushed_at.push(id);
                assert_eq!(buf.buffered_bytes(), 1020);
                sealed.push(buf.take_sealed().unwrap());
                buf.open_next().unwrap();
            }
        }

        assert_eq!(flushed_at, vec![34]);
        assert_eq!(sealed[0].row_count, 34);
        assert_eq!(sealed[0].sequence, 1);
        assert_eq!(buf.buffered_rows(), 16);
        assert_eq!(buf.buffered_bytes(), 480);
        assert_eq!(buf.sequence(), 2);
    }

    #[test]
    fn test_exact_threshold_does_not_flush() {
        let dir = TempDir::new().unwrap();
        let mut buf = buffer(dir.path(), 60);
        buf.append(&thirty_byte_row(1)).unwrap();
        buf.append(&thirty_byte_row(2)).unwrap();
        assert!(!buf.should_flush());
        buf.append(&thirty_byte_row(3)).unwrap();
        assert!(buf.should_flush());
    }

    #[test]
    fn test_take_sealed_skips_empty_chunk() {
        let dir = TempDir::new().unwrap();
        let mut buf = buffer(dir.path(), 1000);
        assert!(buf.take_sealed().is_none());
        assert_eq!(buf.sequence(), 1);
    }

    #[test]
    fn test_finish_removes_empty_builder() {
        let dir = TempDir::new().unwrap();
        let mut buf = buffer(dir.path(), 1000);
        assert!(buf.finish().unwrap().is_none());
        assert!(!dir.path().join("1.json.partial").exists());
    }

    #[test]
    fn test_finish_seals_buffered_rows() {
        let dir = TempDir::new().unwrap();
        let mut buf = buffer(dir.path(), 1000);
        buf.append(&thirty_byte_row(1)).unwrap();
        let sealed = buf.finish().unwrap().unwrap();
        let chunk = sealed.seal().unwrap();
        assert_eq!(chunk.row_count, 1);
        assert_eq!(chunk.buffered_bytes, 30);
        assert_eq!(chunk.path, dir.path().join("1.json.partial"));
    }

    #[test]
    fn test_open_failure_reports_chunk() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone");
        let err = ChunkBuffer::new(Arc::new(JsonWriterFactory), &missing, 1000).unwrap_err();
        assert!(matches!(err, Error::Flush(FlushError::Open { chunk: 1, .. })));
    }
}
