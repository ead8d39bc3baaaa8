//! Bulk writers.
//!
//! [`BulkWriter`] validates rows, buffers them into chunk files and commits
//! each sealed chunk through a [`ChunkSink`]: kept locally by [`LocalSink`],
//! or uploaded to a stage by [`RemoteSink`].

mod bulk_writer;
mod sink;

pub use bulk_writer::{BulkWriter, BulkWriterBuilder, CommitMode, DEFAULT_CHUNK_SIZE};
pub use sink::{committed_path, ChunkSink, CommitReceipt, LocalSink, RemoteSink};
