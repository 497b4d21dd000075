//! # SSPR
//!
//! Build-time pre-rendering for single-page applications. The application's
//! own bundle runs inside a sandboxed virtual browser (deno_core + a minimal
//! DOM); once the page settles, its serialized HTML is written out. Routes the
//! application publishes during that first render are pre-rendered too.
//!
//! ## Sandbox
//!
//! - **No filesystem access**: scripts and styles resolve from the output directory only
//! - **No network requests from `fetch()`**: calls never settle and are recorded
//! - **No environment or process access**: `process`, `Deno`, `require` don't exist
//! - **Heap-limited isolates**: one per render, dropped when the render ends
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sspr::{PreRenderOrchestrator, RenderSettings, SsprConfig, ThreadRenderer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SsprConfig::from_env()?;
//!     let renderer = ThreadRenderer::new(RenderSettings::from_config(&config));
//!     let template = std::fs::read_to_string(config.template_path())?;
//!
//!     let pages = PreRenderOrchestrator::new(renderer, config.origin.clone(), config.detector.timeout)
//!         .generate(&template, Some(&config.dist_dir))
//!         .await?;
//!     sspr::write_output(&config.dist_dir, &pages).await?;
//!     Ok(())
//! }
//! ```

pub mod bundle;
pub mod compress;
pub mod config;
pub mod detector;
pub mod dom;
pub mod error;
pub mod host;
mod loader;
pub mod ops;
pub mod orchestrator;
pub mod render;
pub mod routes;
mod sanitize;
pub mod sandbox;
pub mod serve;

pub use compress::{compress_outputs, CompressionSink, GzipSink};
pub use config::{DetectorConfig, Environment, SettleDelay, SsprConfig};
pub use detector::{CompletionDetector, DetectorReport};
pub use error::{BuildError, ConfigError, OutputError, RenderError, ResourceError, RouteError};
pub use host::{Interrupt, RenderMode, RenderSession, SessionTerminator, VirtualBrowserHost};
pub use ops::ConsoleOutput;
pub use orchestrator::{write_output, PreRenderOrchestrator, ProcessedResultSet};
pub use render::{render_in_place, RenderOutput, RenderRequest, RenderSettings, Renderer, ThreadRenderer};
pub use routes::{DynamicRoute, RouteEntry, RouteTable};
pub use sandbox::{ResourceResolver, ResourceStrategy};
