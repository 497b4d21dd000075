//! Staging server: serve the pre-rendered output directory with a
//! single-page-app catch-all.

use super::has_extension;
use axum::{
    extract::{Request, State},
    http::Method,
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    Router,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::{services::ServeDir, trace::TraceLayer};

/// Page names (filename minus `.html`) mapped to files on disk.
#[derive(Debug, Clone)]
pub struct StageRoutes {
    pages: HashMap<String, PathBuf>,
    index: PathBuf,
}

impl StageRoutes {
    /// Collect every `*.html` file under `dir`.
    pub fn scan(dir: &Path) -> std::io::Result<Self> {
        let mut pages = HashMap::new();
        collect_pages(dir, dir, &mut pages)?;
        Ok(Self {
            pages,
            index: dir.join("index.html"),
        })
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// The page to serve for `request_path`, or `None` to serve it from disk.
    pub fn resolve(&self, request_path: &str) -> Option<&Path> {
        let trimmed = request_path.trim_matches('/');
        if trimmed.is_empty() {
            return Some(&self.index);
        }
        let name = trimmed.strip_suffix(".html").unwrap_or(trimmed);
        if let Some(page) = self.pages.get(name) {
            return Some(page);
        }
        if has_extension(request_path) {
            return None;
        }
        Some(&self.index)
    }
}

fn collect_pages(root: &Path, dir: &Path, pages: &mut HashMap<String, PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_pages(root, &path, pages)?;
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some("html") {
            continue;
        }
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let name = relative
            .with_extension("")
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        pages.insert(name, path);
    }
    Ok(())
}

async fn stage_middleware(State(routes): State<Arc<StageRoutes>>, request: Request, next: Next) -> Response {
    if request.method() != Method::GET && request.method() != Method::HEAD {
        return next.run(request).await;
    }
    let Some(page) = routes.resolve(request.uri().path()) else {
        return next.run(request).await;
    };
    match tokio::fs::read_to_string(page).await {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            tracing::warn!(page = %page.display(), error = %e, "failed to read staged page");
            next.run(request).await
        }
    }
}

pub fn stage_router(routes: Arc<StageRoutes>, dir: &Path) -> Router {
    Router::new()
        .fallback_service(ServeDir::new(dir))
        .layer(middleware::from_fn_with_state(routes, stage_middleware))
        .layer(TraceLayer::new_for_http())
}
