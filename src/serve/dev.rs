//! Development server: render each page request through the virtual browser,
//! falling back to client-side rendering whenever that does not produce a
//! matching static route.

use super::PathExclusions;
use crate::host::RenderMode;
use crate::render::{RenderRequest, Renderer};
use axum::{
    extract::{Request, State},
    http::{header, Method},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{services::ServeDir, trace::TraceLayer};
use url::Url;

pub struct DevState<R> {
    pub renderer: Arc<R>,
    pub template: Arc<str>,
    pub resource_root: Option<PathBuf>,
    pub origin: Url,
    pub timeout: Duration,
    pub exclusions: Arc<PathExclusions>,
}

impl<R> Clone for DevState<R> {
    fn clone(&self) -> Self {
        Self {
            renderer: self.renderer.clone(),
            template: self.template.clone(),
            resource_root: self.resource_root.clone(),
            origin: self.origin.clone(),
            timeout: self.timeout,
            exclusions: self.exclusions.clone(),
        }
    }
}

/// Full URL of the incoming request on the configured origin. The Host
/// header is client-controlled and never picks the render origin.
fn request_url(origin: &Url, request: &Request) -> Url {
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    origin
        .join(path_and_query)
        .unwrap_or_else(|_| origin.clone())
}

/// Render GET page requests; serve the result only for known static routes.
pub async fn prerender_middleware<R: Renderer + 'static>(
    State(state): State<DevState<R>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if request.method() != Method::GET || state.exclusions.is_excluded(&path) {
        return next.run(request).await;
    }

    let render = RenderRequest {
        url: request_url(&state.origin, &request),
        template_html: state.template.clone(),
        resource_root: state.resource_root.clone(),
        timeout: state.timeout,
        mode: RenderMode::Request,
        discover_routes: true,
    };

    match state.renderer.render(render).await {
        Ok(output) => match output.routes.as_ref().and_then(|t| t.find_static(&path)) {
            Some(route) => {
                tracing::debug!(%path, file = %route.html_filename, "serving rendered page");
                return Html(output.html).into_response();
            }
            None => tracing::debug!(%path, "no static route matched; client rendering"),
        },
        Err(e) => tracing::warn!(%path, error = %e, "render failed; client rendering"),
    }

    next.run(request).await
}

/// Rendering middleware in front of the client-rendering fallback: files from
/// `dist_dir`, then the template for everything else.
pub fn dev_router<R: Renderer + 'static>(state: DevState<R>, dist_dir: &Path) -> Router {
    let template = state.template.clone();
    let client_rendering = ServeDir::new(dist_dir).fallback(get(move || {
        let template = template.clone();
        async move { Html(template.to_string()) }
    }));

    Router::new()
        .fallback_service(client_rendering)
        .layer(middleware::from_fn_with_state(state, prerender_middleware::<R>))
        .layer(TraceLayer::new_for_http())
}
