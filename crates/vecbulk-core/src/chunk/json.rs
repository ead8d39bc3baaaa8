//! JSON chunk format: one `{"rows": [...]}` document per chunk.

use super::{ChunkFileWriter, ChunkWriterFactory, VectorEncoding};
use crate::schema::NormalizedRow;
use crate::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const HEADER: &[u8] = b"{\"rows\":[";
const FOOTER: &[u8] = b"]}";

/// Streams rows into a JSON document.
pub struct JsonChunkWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl JsonChunkWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(HEADER)?;
        Ok(Self {
            path: path.to_path_buf(),
            out,
        })
    }
}

impl ChunkFileWriter for JsonChunkWriter {
    fn append_row(&mut self, row: &NormalizedRow, first_row: bool) -> Result<()> {
        write_row(&mut self.out, row, first_row)
    }

    fn file_path(&self) -> &Path {
        &self.path
    }

    fn close(self: Box<Self>) -> Result<PathBuf> {
        let JsonChunkWriter { path, mut out } = *self;
        out.write_all(FOOTER)?;
        out.flush()?;
        out.get_ref().sync_all()?;
        Ok(path)
    }
}

/// Encode the row (with its separator) in full, then write it in one call.
/// A row that fails to encode leaves no bytes behind.
fn write_row<W: Write>(out: &mut W, row: &NormalizedRow, first_row: bool) -> Result<()> {
    let mut encoded = Vec::with_capacity(row.size_bytes() + 16);
    if !first_row {
        encoded.push(b',');
    }
    serde_json::to_writer(&mut encoded, row)?;
    out.write_all(&encoded)?;
    Ok(())
}

/// Factory for [`JsonChunkWriter`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonWriterFactory;

impl ChunkWriterFactory for JsonWriterFactory {
    fn extension(&self) -> &str {
        "json"
    }

    fn encoding(&self) -> VectorEncoding {
        VectorEncoding::Textual
    }

    fn create(&self, path: &Path) -> Result<Box<dyn ChunkFileWriter>> {
        Ok(Box::new(JsonChunkWriter::create(path)?))
    }
}
