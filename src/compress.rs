//! Post-build compression of written pages.

use crate::error::OutputError;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Receives the list of files a build wrote.
pub trait CompressionSink: Send + Sync {
    /// Returns the files it produced.
    fn compress(&self, files: &[PathBuf]) -> Result<Vec<PathBuf>, OutputError>;
}

/// Writes a `<file>.gz` sibling for every file.
pub struct GzipSink {
    level: Compression,
}

impl Default for GzipSink {
    fn default() -> Self {
        Self {
            level: Compression::best(),
        }
    }
}

impl GzipSink {
    fn gzip(&self, path: &Path) -> std::io::Result<PathBuf> {
        let data = std::fs::read(path)?;
        let mut target = path.as_os_str().to_owned();
        target.push(".gz");
        let target = PathBuf::from(target);

        let mut encoder = GzEncoder::new(BufWriter::new(File::create(&target)?), self.level);
        encoder.write_all(&data)?;
        encoder.finish()?.flush()?;
        Ok(target)
    }
}

impl CompressionSink for GzipSink {
    fn compress(&self, files: &[PathBuf]) -> Result<Vec<PathBuf>, OutputError> {
        files
            .iter()
            .map(|path| {
                self.gzip(path).map_err(|source| OutputError::Compress {
                    path: path.clone(),
                    source,
                })
            })
            .collect()
    }
}

/// Run `sink` off the async runtime. Failure is logged, never propagated.
pub async fn compress_outputs(sink: Arc<dyn CompressionSink>, files: Vec<PathBuf>) -> Vec<PathBuf> {
    let count = files.len();
    match tokio::task::spawn_blocking(move || sink.compress(&files)).await {
        Ok(Ok(written)) => {
            tracing::info!(files = count, "compressed build output");
            written
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "compression failed; output left uncompressed");
            Vec::new()
        }
        Err(e) => {
            tracing::warn!(error = %e, "compression task panicked; output left uncompressed");
            Vec::new()
        }
    }
}
