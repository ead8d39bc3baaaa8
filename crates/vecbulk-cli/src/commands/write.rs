//! Write command implementation.

use anyhow::{Context, Result};
use serde_json::Value;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use vecbulk_core::metrics::BulkWriterMetrics;
use vecbulk_core::upload::UploadSession;
use vecbulk_core::{BulkWriter, Config, Error, Row};

/// Some input rows failed validation; the valid rows were still written.
#[derive(Debug)]
pub struct RejectedRows {
    pub rejected: usize,
    pub accepted: usize,
}

impl fmt::Display for RejectedRows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rows rejected by validation ({} written)",
            self.rejected, self.accepted
        )
    }
}

impl std::error::Error for RejectedRows {}

/// Summary of a write run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub files: Vec<String>,
}

/// Validate and write every row of `input`.
pub async fn run(config: Config, input: PathBuf, print_metrics: bool) -> Result<()> {
    let metrics = Arc::new(BulkWriterMetrics::new());
    let summary = {
        let metrics = Arc::clone(&metrics);
        tokio::task::spawn_blocking(move || write_file(&config, &input, metrics))
            .await
            .context("write task panicked")??
    };

    for file in &summary.files {
        println!("{}", file);
    }
    if print_metrics {
        print!("{}", metrics.export_prometheus_text());
    }

    if summary.rejected > 0 {
        return Err(RejectedRows {
            rejected: summary.rejected,
            accepted: summary.accepted,
        }
        .into());
    }
    Ok(())
}

/// Blocking body of the write command.
pub fn write_file(
    config: &Config,
    input: &Path,
    metrics: Arc<BulkWriterMetrics>,
) -> Result<WriteSummary> {
    let schema = config.schema.build()?;
    let builder = BulkWriter::builder(schema)
        .with_config(&config.writer)
        .with_metrics(Arc::clone(&metrics));

    let writer = match &config.remote {
        Some(remote) => {
            let session = UploadSession::from_config(remote)
                .map_err(Error::from)?
                .with_metrics(Arc::clone(&metrics));
            info!(stage = %remote.stage_name, "Writing to remote stage");
            builder.build_remote(Arc::new(session), remote.remote_path.clone())?
        }
        None => builder.build_local()?,
    };

    let reader = BufReader::new(
        File::open(input).with_context(|| format!("failed to open {}", input.display()))?,
    );

    let mut summary = WriteSummary::default();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let line_no = index + 1;

        let row: Row = match serde_json::from_str::<Value>(&line) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                warn!(line = line_no, "Input line is not a JSON object, skipped");
                summary.rejected += 1;
                continue;
            }
            Err(e) => {
                warn!(line = line_no, error = %e, "Input line is not valid JSON, skipped");
                summary.rejected += 1;
                continue;
            }
        };

        match writer.append_row(&row) {
            Ok(()) => summary.accepted += 1,
            Err(Error::Validation(e)) => {
                warn!(line = line_no, error = %e, "Row rejected");
                summary.rejected += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    writer.close()?;
    summary.files = writer.batch_files();
    info!(
        accepted = summary.accepted,
        rejected = summary.rejected,
        files = summary.files.len(),
        "Write complete"
    );
    Ok(summary)
}
