//! Chunk files: the sealed, immutable units the writer produces.
//!
//! A [`ChunkFileWriter`] receives normalized rows for one chunk. Writers are
//! created by a [`ChunkWriterFactory`], which also reports the vector encoding
//! used by validation for byte accounting.

mod json;

pub use json::{JsonChunkWriter, JsonWriterFactory};

use crate::schema::NormalizedRow;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How vectors are laid out in the chunk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorEncoding {
    /// Raw little-endian bytes
    Binary,
    /// Numbers rendered as text
    Textual,
}

/// Built-in chunk file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkFileType {
    #[default]
    Json,
}

impl BulkFileType {
    pub fn extension(&self) -> &'static str {
        match self {
            BulkFileType::Json => "json",
        }
    }

    /// Writer factory for this format.
    pub fn factory(&self) -> Arc<dyn ChunkWriterFactory> {
        match self {
            BulkFileType::Json => Arc::new(JsonWriterFactory),
        }
    }
}

impl fmt::Display for BulkFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Writes rows of a single chunk to disk.
pub trait ChunkFileWriter: Send {
    /// Append one row. `first_row` is true for the first row of the chunk.
    fn append_row(&mut self, row: &NormalizedRow, first_row: bool) -> Result<()>;

    /// Path of the file being written.
    fn file_path(&self) -> &Path;

    /// Finish the file and return its path.
    fn close(self: Box<Self>) -> Result<PathBuf>;
}

/// Creates chunk writers of one format.
pub trait ChunkWriterFactory: Send + Sync {
    /// File extension without the leading dot.
    fn extension(&self) -> &str;

    fn encoding(&self) -> VectorEncoding;

    /// Create a writer for a new file at `path`.
    fn create(&self, path: &Path) -> Result<Box<dyn ChunkFileWriter>>;
}

/// A sealed chunk file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFile {
    /// Creation-order sequence number, starting at 1
    pub sequence: u64,
    /// Path of the sealed file
    pub path: PathBuf,
    /// Rows in the chunk
    pub row_count: usize,
    /// Estimated bytes accounted during buffering
    pub buffered_bytes: usize,
    /// Size of the file on disk
    pub file_size_bytes: u64,
}

/// A chunk whose builder has been swapped out but not yet closed.
pub struct SealedChunk {
    pub sequence: u64,
    pub writer: Box<dyn ChunkFileWriter>,
    pub row_count: usize,
    pub buffered_bytes: usize,
}

impl SealedChunk {
    /// Close the builder into a [`ChunkFile`].
    pub fn seal(self) -> Result<ChunkFile> {
        let path = self.writer.close()?;
        let file_size_bytes = std::fs::metadata(&path)?.len();
        Ok(ChunkFile {
            sequence: self.sequence,
            path,
            row_count: self.row_count,
            buffered_bytes: self.buffered_bytes,
            file_size_bytes,
        })
    }
}

impl fmt::Debug for SealedChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedChunk")
            .field("sequence", &self.sequence)
            .field("path", &self.writer.file_path())
            .field("row_count", &self.row_count)
            .field("buffered_bytes", &self.buffered_bytes)
            .finish()
    }
}
