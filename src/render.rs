//! Rendering one URL end to end: open a session, wait for it to settle, read
//! its route table, serialize, close.
//!
//! Each render runs in its own OS thread with a single-threaded Tokio runtime
//! because `deno_core::JsRuntime` is not `Send`. Callers only see a `Send`
//! future, so the orchestrator and the dev server can fan out freely.

use crate::config::{DetectorConfig, SsprConfig};
use crate::detector::{CompletionDetector, DetectorReport};
use crate::error::RenderError;
use crate::host::{Interrupt, RenderMode, RenderSession, SessionTerminator, VirtualBrowserHost};
use crate::ops::ConsoleOutput;
use crate::routes::{parse_route_table, RouteTable};
use crate::sandbox::{NetworkStrategy, ResourceResolver};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use url::Url;

const RENDER_THREAD_STACK: usize = 8 * 1024 * 1024;

/// Lets the detector's own hard timer win whenever the event loop is responsive.
const WATCHDOG_GRACE: Duration = Duration::from_millis(100);

/// Input to a single render. Immutable once created.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub url: Url,
    pub template_html: Arc<str>,
    /// Directory mirrored by request paths; local files win over the network.
    pub resource_root: Option<PathBuf>,
    pub timeout: Duration,
    pub mode: RenderMode,
    /// Read the route table the application publishes. Only the root render
    /// of a build and dev renders need it.
    pub discover_routes: bool,
}

/// Result of a settled render.
#[derive(Debug, Clone, Default)]
pub struct RenderOutput {
    pub html: String,
    /// Route table the application published, if any.
    pub routes: Option<RouteTable>,
    pub console: ConsoleOutput,
    /// URLs the application tried to `fetch()`.
    pub blocked_fetches: Vec<String>,
    pub report: DetectorReport,
}

/// Something that can turn a [`RenderRequest`] into HTML.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, request: RenderRequest) -> Result<RenderOutput, RenderError>;
}

/// Session settings shared by every render of a build or server.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub detector: DetectorConfig,
    pub max_heap_size: Option<usize>,
    pub allowed_origins: Vec<String>,
}

impl RenderSettings {
    pub fn from_config(config: &SsprConfig) -> Self {
        Self {
            detector: config.detector.clone(),
            max_heap_size: config.max_heap_size,
            allowed_origins: config.allowed_origins.clone(),
        }
    }
}

/// Production renderer: one dedicated thread and isolate per request.
#[derive(Clone)]
pub struct ThreadRenderer {
    settings: Arc<RenderSettings>,
}

impl ThreadRenderer {
    pub fn new(settings: RenderSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }
}

#[async_trait]
impl Renderer for ThreadRenderer {
    async fn render(&self, request: RenderRequest) -> Result<RenderOutput, RenderError> {
        let settings = self.settings.clone();
        let (response_tx, response_rx) = oneshot::channel();

        std::thread::Builder::new()
            .name("sspr-render".to_string())
            .stack_size(RENDER_THREAD_STACK)
            .spawn(move || {
                let result = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt.block_on(render_in_place(&settings, request)),
                    Err(e) => Err(RenderError::Js(format!("failed to create render runtime: {e}"))),
                };
                // Receiver may have given up; nothing to do then
                let _ = response_tx.send(result);
            })
            .map_err(|e| RenderError::Js(format!("failed to spawn render thread: {e}")))?;

        response_rx.await.map_err(|_| RenderError::WorkerGone)?
    }
}

/// Render on the current thread. Must run inside a current-thread runtime.
pub async fn render_in_place(
    settings: &RenderSettings,
    request: RenderRequest,
) -> Result<RenderOutput, RenderError> {
    let network = NetworkStrategy::new(settings.allowed_origins.clone())?;
    let resolver = ResourceResolver::standard(request.resource_root.as_deref(), network)?;
    let host = VirtualBrowserHost::new(Arc::new(resolver), settings.max_heap_size);
    let detector = CompletionDetector::new(DetectorConfig {
        timeout: request.timeout,
        ..settings.detector.clone()
    });

    let mut session = host.open(&request.url, &request.template_html, request.mode)?;
    let watchdog = Watchdog::arm(session.terminator(), request.timeout + WATCHDOG_GRACE);
    let outcome = settle(&detector, &mut session, request.discover_routes).await;
    drop(watchdog);

    let interrupted = session.interrupted();
    let console = session.console();
    let stats = session.stats();
    session.close();

    let outcome = match interrupted {
        Some(Interrupt::HardTimeout) => Err(RenderError::Timeout(request.timeout.as_millis() as u64)),
        Some(Interrupt::HeapLimit) => Err(RenderError::HeapLimit {
            limit_mb: settings.max_heap_size.unwrap_or_default() / (1024 * 1024),
        }),
        None => outcome,
    };
    let (report, routes, html) = outcome?;
    tracing::debug!(
        url = %request.url,
        polls = report.polls,
        scripts = report.scripts,
        resources = stats.resources_loaded,
        blocked_fetches = stats.blocked_fetches.len(),
        "render settled"
    );

    Ok(RenderOutput {
        html,
        routes,
        console,
        blocked_fetches: stats.blocked_fetches,
        report,
    })
}

async fn settle(
    detector: &CompletionDetector,
    session: &mut RenderSession,
    discover_routes: bool,
) -> Result<(DetectorReport, Option<RouteTable>, String), RenderError> {
    let report = detector.wait(session).await?;
    let routes = if discover_routes {
        session
            .route_table_json()?
            .map(|json| parse_route_table(&json))
            .transpose()?
    } else {
        None
    };
    let html = session.serialize()?;
    Ok((report, routes, html))
}

/// Terminates a session's isolate once its deadline passes, even while a
/// script keeps the render thread busy. Dropping it disarms the timer.
struct Watchdog {
    _disarm: mpsc::Sender<()>,
}

impl Watchdog {
    fn arm(terminator: SessionTerminator, deadline: Duration) -> Self {
        let (disarm, disarmed) = mpsc::channel::<()>();
        let spawned = std::thread::Builder::new()
            .name("sspr-watchdog".to_string())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = disarmed.recv_timeout(deadline) {
                    tracing::warn!(deadline_ms = deadline.as_millis() as u64, "render blocked past its deadline, terminating");
                    terminator.terminate(Interrupt::HardTimeout);
                }
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "failed to spawn render watchdog");
        }
        Self { _disarm: disarm }
    }
}
