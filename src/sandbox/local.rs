//! Local-file-first resolution under a resource root.

use super::{Resource, ResourceStrategy};
use crate::error::ResourceError;
use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use url::Url;

/// Serves `<root>/<url path>` when that file exists.
///
/// The URL's origin is ignored; only its path is joined onto the root. Paths
/// that would escape the root (via `..` or symlinks) are treated as misses.
pub struct LocalFileStrategy {
    root: PathBuf,
}

impl LocalFileStrategy {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, ResourceError> {
        let root = root.as_ref();
        let canonical = root.canonicalize().map_err(|source| ResourceError::Io {
            path: root.to_path_buf(),
            source,
        })?;

        if !canonical.is_dir() {
            return Err(ResourceError::Io {
                path: canonical,
                source: std::io::Error::new(ErrorKind::InvalidInput, "resource root must be a directory"),
            });
        }

        Ok(Self { root: canonical })
    }

    /// Map a URL onto a path under the root, without touching the filesystem.
    fn candidate(&self, url: &Url) -> Option<PathBuf> {
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        let decoded = percent_decode_str(url.path()).decode_utf8().ok()?;

        let mut path = self.root.clone();
        let mut pushed = false;
        for segment in decoded.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return None,
                s if s.contains('\\') || s.contains('\0') => return None,
                s => {
                    path.push(s);
                    pushed = true;
                }
            }
        }
        pushed.then_some(path)
    }
}

#[async_trait]
impl ResourceStrategy for LocalFileStrategy {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn resolve(&self, url: &Url) -> Result<Option<Resource>, ResourceError> {
        let Some(path) = self.candidate(url) else {
            return Ok(None);
        };

        // Symlinks may still point outside the root. A path that cannot be
        // canonicalized, such as a file used as a directory, is a miss.
        let canonical = match tokio::fs::canonicalize(&path).await {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "local resource miss");
                return Ok(None);
            }
        };
        if !canonical.starts_with(&self.root) {
            return Ok(None);
        }
        match tokio::fs::metadata(&canonical).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Ok(None),
        }

        let bytes = tokio::fs::read(&canonical)
            .await
            .map_err(|source| ResourceError::Io {
                path: canonical.clone(),
                source,
            })?;

        Ok(Some(Resource {
            url: url.clone(),
            bytes,
            content_type: None,
        }))
    }
}
