use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::DownloadError;
use crate::plugins::DownloadItem;
use crate::utils::slugify;

/// Archive name for a run, derived from the handler and the URL.
pub fn archive_name(handler: &str, url: &str) -> String {
    format!("{}_{}.zip", handler, slugify(url))
}

/// Archive every successfully downloaded item of a run.
pub async fn package(
    directory: &Path,
    name: String,
    items: &[DownloadItem],
) -> Result<PathBuf, DownloadError> {
    let files: Vec<PathBuf> = items
        .iter()
        .filter(|item| item.is_done())
        .map(|item| item.path.clone())
        .collect();
    let directory = directory.to_path_buf();

    tokio::task::spawn_blocking(move || zip_files(&directory, &name, &files))
        .await
        .map_err(|e| DownloadError::Package(format!("Packaging task failed: {e}")))?
}

/// Write `files` (relative to `directory`) into `directory/name`.
pub fn zip_files(directory: &Path, name: &str, files: &[PathBuf]) -> Result<PathBuf, DownloadError> {
    let archive_path = directory.join(name);
    let file = File::create(&archive_path)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for relative in files {
        let entry = relative.to_string_lossy().replace('\\', "/");
        debug!("Adding to ZIP: {}", entry);

        zip.start_file(entry, options)
            .map_err(|e| DownloadError::Package(format!("Failed to start ZIP entry: {e}")))?;
        let mut input = File::open(directory.join(relative))?;
        std::io::copy(&mut input, &mut zip)?;
    }

    zip.finish()
        .map_err(|e| DownloadError::Package(format!("Failed to finalize ZIP archive: {e}")))?;

    info!("Packaged {} files into {}", files.len(), archive_path.display());
    Ok(archive_path)
}
