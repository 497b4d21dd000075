//! Build-time pre-rendering of every discovered route.

use crate::error::{OutputError, RenderError};
use crate::host::RenderMode;
use crate::render::{RenderRequest, Renderer};
use crate::routes::{pending_routes, RouteEntry, INDEX_FILENAME};
use futures::stream::{self, StreamExt};
use std::collections::btree_map::{BTreeMap, Entry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Serialized pages keyed by output filename. A filename is inserted at most once.
#[derive(Debug, Clone, Default)]
pub struct ProcessedResultSet {
    pages: BTreeMap<String, String>,
}

impl ProcessedResultSet {
    /// Returns false (and keeps the existing page) if `filename` is already present.
    pub fn insert(&mut self, filename: impl Into<String>, html: String) -> bool {
        match self.pages.entry(filename.into()) {
            Entry::Vacant(slot) => {
                slot.insert(html);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    pub fn get(&self, filename: &str) -> Option<&str> {
        self.pages.get(filename).map(String::as_str)
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.pages.contains_key(filename)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.pages.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pages.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Drives one render per route: root first, then every discovered static route.
pub struct PreRenderOrchestrator<R> {
    renderer: R,
    origin: Url,
    timeout: Duration,
    max_concurrent_renders: Option<usize>,
}

impl<R: Renderer> PreRenderOrchestrator<R> {
    pub fn new(renderer: R, origin: Url, timeout: Duration) -> Self {
        Self {
            renderer,
            origin,
            timeout,
            max_concurrent_renders: None,
        }
    }

    /// Cap simultaneous route renders (`None` = all at once).
    pub fn with_max_concurrent_renders(mut self, limit: Option<usize>) -> Self {
        self.max_concurrent_renders = limit;
        self
    }

    fn request(
        &self,
        url: Url,
        template: &Arc<str>,
        resource_root: Option<&Path>,
        discover_routes: bool,
    ) -> RenderRequest {
        RenderRequest {
            url,
            template_html: template.clone(),
            resource_root: resource_root.map(Path::to_path_buf),
            timeout: self.timeout,
            mode: RenderMode::Prerender,
            discover_routes,
        }
    }

    /// Render the root page and every static route it publishes.
    ///
    /// A failing root render is an error: without it there is nothing to
    /// discover. Failing routes are logged and left out of the result.
    pub async fn generate(
        &self,
        template_html: &str,
        resource_root: Option<&Path>,
    ) -> Result<ProcessedResultSet, RenderError> {
        let template: Arc<str> = Arc::from(template_html);
        let mut results = ProcessedResultSet::default();

        let root = self
            .renderer
            .render(self.request(self.origin.clone(), &template, resource_root, true))
            .await?;
        results.insert(INDEX_FILENAME, root.html);

        let table = match root.routes {
            Some(table) => table,
            None => {
                tracing::info!("no route table published; rendering root page only");
                return Ok(results);
            }
        };

        let pending = pending_routes(&table, results.filenames());
        tracing::info!(
            discovered = table.static_routes.len(),
            pending = pending.len(),
            "pre-rendering static routes"
        );

        let renders: Vec<_> = pending
            .into_iter()
            .filter_map(|route| match self.origin.join(&route.path) {
                Ok(url) => Some(self.render_route(route, self.request(url, &template, resource_root, false))),
                Err(e) => {
                    tracing::warn!(path = %route.path, error = %e, "route path is not a valid URL; skipped");
                    None
                }
            })
            .collect();

        let limit = self.max_concurrent_renders.unwrap_or(renders.len()).max(1);
        // Join barrier: nothing is recorded until every render has finished
        let outcomes: Vec<_> = stream::iter(renders).buffer_unordered(limit).collect().await;

        for (route, outcome) in outcomes {
            match outcome {
                Ok(html) => {
                    results.insert(route.html_filename.as_str(), html);
                }
                Err(e) if e.is_timeout() => {
                    tracing::warn!(path = %route.path, error = %e, "route render timed out; skipped");
                }
                Err(e) => {
                    tracing::warn!(path = %route.path, error = %e, "route render failed; skipped");
                }
            }
        }

        Ok(results)
    }

    async fn render_route<'a>(
        &self,
        route: &'a RouteEntry,
        request: RenderRequest,
    ) -> (&'a RouteEntry, Result<String, RenderError>) {
        let outcome = self.renderer.render(request).await.map(|output| output.html);
        (route, outcome)
    }
}

/// Write every page under `dir`, creating parent directories as needed.
pub async fn write_output(dir: &Path, results: &ProcessedResultSet) -> Result<Vec<PathBuf>, OutputError> {
    let mut written = Vec::with_capacity(results.len());
    for (filename, html) in results.iter() {
        let path = dir.join(filename);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| OutputError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&path, html)
            .await
            .map_err(|source| OutputError::Io {
                path: path.clone(),
                source,
            })?;
        tracing::debug!(path = %path.display(), bytes = html.len(), "page written");
        written.push(path);
    }
    Ok(written)
}
