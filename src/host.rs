//! Virtual browser host - one sandboxed V8 isolate per render session.
//!
//! Each session gets a window-like global scope (booted from the build-time
//! snapshot) with:
//! - a DOM mounted from the template HTML
//! - console routed to `tracing` and captured per session
//! - URL, TextEncoder/Decoder, Blob, atob/btoa, timers, crypto
//! - a `fetch` that never settles, plus Request/Response/Headers/FormData
//! - resource and module loading through the session's `ResourceResolver`
//! - no fs, net, env, or other system access
//!
//! `JsRuntime` is `!Send`; a session must stay on the thread that opened it.

use crate::detector::{ScriptProgress, SettleProbe};
use crate::dom::{self, DomDocument};
use crate::error::RenderError;
use crate::loader::SessionLoader;
use crate::ops::{
    sspr_host, ConsoleOutput, InlineModules, ResourceBridge, ResourceFuture, SandboxStats,
    SessionLabel,
};
use crate::sandbox::ResourceResolver;
use async_trait::async_trait;
use deno_core::anyhow::anyhow;
use deno_core::error::AnyError;
use deno_core::{v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use serde::Serialize;
use std::rc::Rc;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use url::Url;

/// Set to `true` in every session.
pub const SSR_FLAG: &str = "__SSR__";
/// `true` only while pre-rendering at build time; set before any script runs.
pub const BUILD_FLAG: &str = "__SSPR_BUILD__";
/// Legacy route table global the application may assign once hydrated.
pub const ROUTES_GLOBAL: &str = "__SSPR_ROUTES__";
/// Render context object: `{ url, isBuild, isSSR, registerRoutes(table), done() }`.
pub const CONTEXT_GLOBAL: &str = "__SSPR__";

const HOST_OBJECT: &str = "__sspr_host__";

/// deno_core's event loop error for a module evaluation that can never finish.
const STALLED_MODULE: &str = "still pending but there are no pending ops";

static SNAPSHOT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/SSPR_SNAPSHOT.bin"));

/// Why a session is rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Build-time pre-render; the build marker is set.
    Prerender,
    /// Ad-hoc render of a live request (dev server).
    Request,
}

/// Why a session's isolate was stopped from outside its own event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// The hard timeout passed while a script held the render thread.
    HardTimeout,
    /// The isolate reached its heap limit.
    HeapLimit,
}

/// Stops a session's isolate from any thread. The first recorded reason wins.
#[derive(Clone)]
pub struct SessionTerminator {
    handle: v8::IsolateHandle,
    interrupt: Arc<OnceLock<Interrupt>>,
}

impl SessionTerminator {
    pub fn terminate(&self, reason: Interrupt) {
        let _ = self.interrupt.set(reason);
        self.handle.terminate_execution();
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MountOptions<'a> {
    href: &'a str,
    document: &'a DomDocument,
    ssr_flag: &'static str,
    build_flag: &'static str,
    is_build: bool,
    routes_global: &'static str,
    context_global: &'static str,
}

/// Factory for render sessions sharing one resource resolver.
pub struct VirtualBrowserHost {
    resolver: Arc<ResourceResolver>,
    /// Maximum heap size in bytes (None = unlimited)
    max_heap_size: Option<usize>,
}

impl VirtualBrowserHost {
    pub fn new(resolver: Arc<ResourceResolver>, max_heap_size: Option<usize>) -> Self {
        Self {
            resolver,
            max_heap_size,
        }
    }

    /// Build a window for `url`, mount `html` into it and install the globals.
    ///
    /// Scripts in the document do not run until the detector starts the session.
    pub fn open(&self, url: &Url, html: &str, mode: RenderMode) -> Result<RenderSession, RenderError> {
        let inline = InlineModules::default();
        let loader = SessionLoader::new(url.clone(), self.resolver.clone(), inline.clone());

        // Configure V8 heap limits if specified
        let create_params = self
            .max_heap_size
            .map(|max_bytes| v8::Isolate::create_params().heap_limits(0, max_bytes));

        let mut runtime = JsRuntime::new(RuntimeOptions {
            module_loader: Some(Rc::new(loader)),
            startup_snapshot: Some(SNAPSHOT),
            extensions: vec![
                deno_webidl::deno_webidl::init_ops(),
                deno_console::deno_console::init_ops(),
                deno_url::deno_url::init_ops(),
                deno_web::deno_web::init_ops::<deno_permissions::PermissionsContainer>(
                    Arc::new(deno_web::BlobStore::default()),
                    Some(url.clone()),
                ),
                deno_crypto::deno_crypto::init_ops(None),
                sspr_host::init_ops(),
            ],
            create_params,
            ..Default::default()
        });

        let terminator = SessionTerminator {
            handle: runtime.v8_isolate().thread_safe_handle(),
            interrupt: Arc::new(OnceLock::new()),
        };

        if self.max_heap_size.is_some() {
            let session = url.to_string();
            let terminator = terminator.clone();
            let mut granted = false;
            runtime.add_near_heap_limit_callback(move |current, initial| {
                tracing::warn!(
                    %session,
                    current_mb = current / (1024 * 1024),
                    initial_mb = initial / (1024 * 1024),
                    "render session hit heap limit, terminating"
                );
                terminator.terminate(Interrupt::HeapLimit);
                // Returning `current` unchanged aborts the process; give the
                // termination room to unwind, once
                if granted {
                    current
                } else {
                    granted = true;
                    current * 2
                }
            });
        }

        {
            let state = runtime.op_state();
            let mut state = state.borrow_mut();
            state.put(ConsoleOutput::default());
            state.put(SandboxStats::default());
            state.put(SessionLabel(url.to_string()));
            state.put(inline);
            state.put(resource_bridge(self.resolver.clone()));
        }

        let parsed = dom::parse_document(html);
        let options = MountOptions {
            href: url.as_str(),
            document: &parsed,
            ssr_flag: SSR_FLAG,
            build_flag: BUILD_FLAG,
            is_build: mode == RenderMode::Prerender,
            routes_global: ROUTES_GLOBAL,
            context_global: CONTEXT_GLOBAL,
        };
        let options = serde_json::to_string(&options).map_err(|e| RenderError::Js(e.to_string()))?;

        let mut session = RenderSession {
            runtime,
            url: url.clone(),
            terminator,
        };
        session.call(format!("{HOST_OBJECT}.mount({options})"))?;
        tracing::debug!(url = %session.url, ?mode, "render session opened");
        Ok(session)
    }
}

fn resource_bridge(resolver: Arc<ResourceResolver>) -> ResourceBridge {
    ResourceBridge(Rc::new(move |raw: String| -> ResourceFuture {
        let resolver = resolver.clone();
        Box::pin(async move {
            let url = Url::parse(&raw).map_err(|e| anyhow!("Invalid resource URL '{}': {}", raw, e))?;
            let resource = resolver.resolve(&url).await?;
            Ok::<_, AnyError>(resource.bytes)
        })
    }))
}

/// One isolated window bound to a single URL.
pub struct RenderSession {
    runtime: JsRuntime,
    url: Url,
    terminator: SessionTerminator,
}

impl RenderSession {
    /// Run a host call and stringify its result.
    fn call(&mut self, code: String) -> Result<String, RenderError> {
        let value = self
            .runtime
            .execute_script("<sspr-host>", code)
            .map_err(|e| RenderError::Js(e.to_string()))?;
        let scope = &mut self.runtime.handle_scope();
        let local = v8::Local::new(scope, value);
        Ok(local.to_rust_string_lossy(scope))
    }

    /// Serialize the current document to HTML, doctype first.
    pub fn serialize(&mut self) -> Result<String, RenderError> {
        let json = self.call(format!("{HOST_OBJECT}.snapshot()"))?;
        let document: DomDocument =
            serde_json::from_str(&json).map_err(|e| RenderError::Js(format!("bad document snapshot: {e}")))?;
        Ok(dom::serialize_document(&document))
    }

    /// Raw JSON of the route table the application published, if any.
    pub fn route_table_json(&mut self) -> Result<Option<String>, RenderError> {
        let json = self.call(format!("{HOST_OBJECT}.routes()"))?;
        Ok((json != "null").then_some(json))
    }

    /// Handle that can stop this session's scripts from another thread.
    pub fn terminator(&self) -> SessionTerminator {
        self.terminator.clone()
    }

    /// Why the isolate was terminated, if it was.
    pub fn interrupted(&self) -> Option<Interrupt> {
        self.terminator.interrupt.get().copied()
    }

    pub fn console(&mut self) -> ConsoleOutput {
        self.runtime.op_state().borrow().borrow::<ConsoleOutput>().clone()
    }

    pub fn stats(&mut self) -> SandboxStats {
        self.runtime.op_state().borrow().borrow::<SandboxStats>().clone()
    }

    /// Release the isolate and everything the document holds.
    pub fn close(self) {
        tracing::debug!(url = %self.url, "render session closed");
        drop(self.runtime);
    }
}

#[async_trait(?Send)]
impl SettleProbe for RenderSession {
    fn observe_scripts(&mut self) -> Result<usize, RenderError> {
        let count = self.call(format!("{HOST_OBJECT}.observeScripts()"))?;
        count
            .parse()
            .map_err(|_| RenderError::Js(format!("unexpected script count '{count}'")))
    }

    fn start(&mut self) -> Result<(), RenderError> {
        self.call(format!("{HOST_OBJECT}.start()")).map(|_| ())
    }

    async fn drive(&mut self, budget: Duration) -> Result<(), RenderError> {
        let started = tokio::time::Instant::now();
        let event_loop = self.runtime.run_event_loop(PollEventLoopOptions::default());
        match tokio::time::timeout(budget, event_loop).await {
            Ok(Ok(())) => {
                // Loop went idle early; wait out the slice
                tokio::time::sleep(budget.saturating_sub(started.elapsed())).await;
                Ok(())
            }
            // A module awaiting a promise that never settles (a blocked fetch)
            // stalls the loop; its script never loads and the hard timer decides
            Ok(Err(e)) if e.to_string().contains(STALLED_MODULE) => {
                tokio::time::sleep(budget.saturating_sub(started.elapsed())).await;
                Ok(())
            }
            Ok(Err(e)) => Err(RenderError::Js(e.to_string())),
            Err(_) => Ok(()),
        }
    }

    fn progress(&mut self) -> Result<ScriptProgress, RenderError> {
        let json = self.call(format!("{HOST_OBJECT}.progress()"))?;
        serde_json::from_str(&json).map_err(|e| RenderError::Js(format!("bad progress report: {e}")))
    }

    fn inject_sentinel(&mut self, source: &str) -> Result<(), RenderError> {
        let source = serde_json::Value::String(source.to_string()).to_string();
        self.call(format!("{HOST_OBJECT}.injectSentinel({source})")).map(|_| ())
    }

    fn marker_set(&mut self, name: &str) -> Result<bool, RenderError> {
        let name = serde_json::Value::String(name.to_string()).to_string();
        Ok(self.call(format!("{HOST_OBJECT}.markerSet({name})"))? == "true")
    }

    fn remove_sentinel(&mut self) -> Result<(), RenderError> {
        self.call(format!("{HOST_OBJECT}.removeSentinel()")).map(|_| ())
    }
}
