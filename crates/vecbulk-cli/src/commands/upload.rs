//! Upload command implementation.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;
use vecbulk_core::upload::UploadSession;
use vecbulk_core::{Config, Error};

/// Upload every file under `dir` to the configured stage.
pub async fn run(config: Config, dir: PathBuf, remote_path: Option<String>) -> Result<()> {
    let Some(remote) = config.remote else {
        bail!("upload requires a [remote] config section");
    };
    let remote_path = remote_path.unwrap_or_else(|| remote.remote_path.clone());

    let mut files = Vec::new();
    collect_files(&dir, &mut files)
        .with_context(|| format!("failed to list {}", dir.display()))?;
    files.sort();
    info!(dir = %dir.display(), files = files.len(), "Uploading directory");

    let session = UploadSession::from_config(&remote).map_err(Error::from)?;
    let result = session
        .upload_all(&files, &dir, &remote_path)
        .await
        .map_err(Error::from)?;

    for file in &result.uploaded {
        println!("{}", file.key);
    }
    println!(
        "Uploaded {} files ({} bytes) in {:.1}s",
        result.uploaded.len(),
        result.total_bytes,
        result.elapsed.as_secs_f64()
    );

    match result.into_error() {
        Some(e) => Err(Error::from(e).into()),
        None => Ok(()),
    }
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}
