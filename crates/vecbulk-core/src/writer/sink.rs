//! Commit stage for sealed chunks.
//!
//! The commit worker hands every sealed [`ChunkFile`] to a [`ChunkSink`], in
//! creation order, one at a time.

use crate::buffer::PARTIAL_SUFFIX;
use crate::chunk::ChunkFile;
use crate::upload::UploadSession;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of committing one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub sequence: u64,
    pub row_count: usize,
    /// Committed locations: local paths or remote object keys
    pub files: Vec<String>,
}

/// Receives sealed chunks from the commit worker.
pub trait ChunkSink: Send + 'static {
    fn commit(&mut self, chunk: ChunkFile) -> Result<CommitReceipt>;
}

/// Strip the in-progress suffix: `3.json.partial` becomes `3.json`.
pub fn committed_path(path: &Path) -> PathBuf {
    match path.extension() {
        Some(ext) if ext == PARTIAL_SUFFIX => path.with_extension(""),
        _ => path.to_path_buf(),
    }
}

fn finalize(chunk: &ChunkFile) -> Result<PathBuf> {
    let target = committed_path(&chunk.path);
    if target != chunk.path {
        std::fs::rename(&chunk.path, &target)?;
    }
    Ok(target)
}

/// Keeps chunk files in the writer's local directory.
#[derive(Debug, Default)]
pub struct LocalSink;

impl ChunkSink for LocalSink {
    fn commit(&mut self, chunk: ChunkFile) -> Result<CommitReceipt> {
        let path = finalize(&chunk)?;
        debug!(chunk = chunk.sequence, path = %path.display(), "Chunk committed locally");
        Ok(CommitReceipt {
            sequence: chunk.sequence,
            row_count: chunk.row_count,
            files: vec![path.display().to_string()],
        })
    }
}

/// Uploads each chunk through an [`UploadSession`] and deletes the local copy.
pub struct RemoteSink {
    session: Arc<UploadSession>,
    upload_root: PathBuf,
    remote_path: String,
    // Created on the commit worker thread at first use.
    runtime: Option<tokio::runtime::Runtime>,
}

impl RemoteSink {
    /// Keys are `remote_path` plus each file's path relative to `upload_root`.
    pub fn new(
        session: Arc<UploadSession>,
        upload_root: impl Into<PathBuf>,
        remote_path: impl Into<String>,
    ) -> Self {
        Self {
            session,
            upload_root: upload_root.into(),
            remote_path: remote_path.into(),
            runtime: None,
        }
    }

    fn runtime(&mut self) -> Result<&tokio::runtime::Runtime> {
        if self.runtime.is_none() {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            self.runtime = Some(runtime);
        }
        self.runtime
            .as_ref()
            .ok_or_else(|| Error::Config("upload runtime unavailable".into()))
    }
}

impl ChunkSink for RemoteSink {
    fn commit(&mut self, chunk: ChunkFile) -> Result<CommitReceipt> {
        let path = finalize(&chunk)?;
        let session = Arc::clone(&self.session);
        let upload_root = self.upload_root.clone();
        let remote_path = self.remote_path.clone();

        let paths = [path.clone()];
        let result = self
            .runtime()?
            .block_on(session.upload_all(&paths, &upload_root, &remote_path))?;

        if !result.is_complete() {
            // Leave the local file in place for a manual retry.
            return Err(match result.into_error() {
                Some(e) => Error::Upload(e),
                None => Error::Config("upload reported failure without detail".into()),
            });
        }

        if let Err(e) = std::fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "Failed to remove uploaded chunk file");
        }

        Ok(CommitReceipt {
            sequence: chunk.sequence,
            row_count: chunk.row_count,
            files: result.uploaded.into_iter().map(|f| f.key).collect(),
        })
    }
}
