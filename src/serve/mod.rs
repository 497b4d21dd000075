//! HTTP serving for development (render per request) and staging (serve the
//! pre-rendered output with an SPA fallback).

pub mod dev;
mod shutdown;
pub mod stage;

pub use dev::{dev_router, DevState};
pub use stage::{stage_router, StageRoutes};

use axum::Router;
use tokio::net::TcpListener;

/// Dev-server protocol paths that must never be rendered.
const LIVE_RELOAD_PREFIXES: &[&str] = &["/@vite/", "/@fs/", "/@id/", "/__vite_ping", "/node_modules/"];

/// Requests that pass straight through to static serving.
#[derive(Debug, Clone)]
pub struct PathExclusions {
    asset_prefixes: Vec<String>,
}

impl PathExclusions {
    pub fn new(asset_prefixes: Vec<String>) -> Self {
        Self { asset_prefixes }
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.asset_prefixes.iter().any(|p| path.starts_with(p.as_str()))
            || LIVE_RELOAD_PREFIXES.iter().any(|p| path.starts_with(p))
            || has_extension(path)
    }
}

/// Whether the last path segment looks like a file name (`app.js`, `logo.svg`).
pub fn has_extension(path: &str) -> bool {
    let last = path.rsplit('/').next().unwrap_or_default();
    match last.rfind('.') {
        Some(i) => i > 0 && i + 1 < last.len(),
        None => false,
    }
}

/// Bind `port` and serve `app` until Ctrl+C or SIGTERM.
pub async fn serve(app: Router, port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("Server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
