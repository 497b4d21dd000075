//! SSPR CLI
//!
//!   sspr prod   [--no-zip]     build (optional), pre-render every route, compress
//!   sspr dev    [-p <port>]    render each page request, fall back to client rendering
//!   sspr stage  [-p <port>]    serve the pre-rendered output with an SPA fallback

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sspr::bundle::run_build_command;
use sspr::serve::{self, dev_router, stage_router, DevState, PathExclusions, StageRoutes};
use sspr::{
    compress_outputs, config::parse_origin, write_output, GzipSink, PreRenderOrchestrator,
    RenderSettings, SsprConfig, ThreadRenderer,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// SSPR - pre-render single-page applications at build time
#[derive(Parser, Debug)]
#[command(name = "sspr")]
#[command(version, about, long_about = None, disable_version_flag = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Port to listen on (dev and stage)
    #[arg(long, short, global = true, default_value = "3000", env = "PORT")]
    port: u16,

    /// Skip post-build compression
    #[arg(long, global = true)]
    no_zip: bool,

    /// Bundler output directory
    #[arg(long, global = true, env = "SSPR_DIST_DIR")]
    dist: Option<PathBuf>,

    /// Template HTML (default: <dist>/index.html)
    #[arg(long, global = true, env = "SSPR_TEMPLATE")]
    template: Option<PathBuf>,

    /// Site root every render URL is built on
    #[arg(long, global = true, env = "SSPR_ORIGIN")]
    origin: Option<String>,

    /// Print version
    #[arg(short = 'v', long, action = clap::ArgAction::Version)]
    version: Option<bool>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build and pre-render every discovered route
    Prod,
    /// Development server rendering each request
    Dev,
    /// Serve the pre-rendered output
    Stage,
}

impl Cli {
    fn apply(&self, config: &mut SsprConfig) -> Result<()> {
        if let Some(dist) = &self.dist {
            config.dist_dir = dist.clone();
        }
        if let Some(template) = &self.template {
            config.template = Some(template.clone());
        }
        if let Some(origin) = &self.origin {
            config.origin = parse_origin(origin)?;
        }
        config.validate()?;
        Ok(())
    }
}

fn parse_args() -> Cli {
    match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // help and version go to stdout with exit 0; everything else is a usage error
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = parse_args();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sspr=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = SsprConfig::from_env()?;
    cli.apply(&mut config)?;

    match cli.command {
        Command::Prod => prod(&config, cli.no_zip).await,
        Command::Dev => dev(&config, cli.port).await,
        Command::Stage => stage(&config, cli.port).await,
    }
}

async fn read_template(config: &SsprConfig) -> Result<String> {
    let path = config.template_path();
    tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read template {}", path.display()))
}

async fn prod(config: &SsprConfig, no_zip: bool) -> Result<()> {
    let started = Instant::now();

    if let Some(command) = &config.build_command {
        run_build_command(command, config.is_production()).await?;
    }

    let template = read_template(config).await?;
    let renderer = ThreadRenderer::new(RenderSettings::from_config(config));
    let pages = PreRenderOrchestrator::new(renderer, config.origin.clone(), config.detector.timeout)
        .with_max_concurrent_renders(config.max_concurrent_renders)
        .generate(&template, Some(&config.dist_dir))
        .await?;

    let written = write_output(&config.dist_dir, &pages).await?;

    let mut compressed = 0;
    if config.is_production() && !no_zip {
        compressed = compress_outputs(Arc::new(GzipSink::default()), written.clone())
            .await
            .len();
    }

    tracing::info!(
        pages = written.len(),
        compressed,
        dist = %config.dist_dir.display(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "pre-render complete"
    );
    Ok(())
}

async fn dev(config: &SsprConfig, port: u16) -> Result<()> {
    let template = read_template(config).await?;
    let state = DevState {
        renderer: Arc::new(ThreadRenderer::new(RenderSettings::from_config(config))),
        template: Arc::from(template),
        resource_root: Some(config.dist_dir.clone()),
        origin: config.origin.clone(),
        timeout: config.detector.timeout,
        exclusions: Arc::new(PathExclusions::new(config.asset_prefixes.clone())),
    };

    tracing::info!(dist = %config.dist_dir.display(), "starting dev server");
    serve::serve(dev_router(state, &config.dist_dir), port).await?;
    Ok(())
}

async fn stage(config: &SsprConfig, port: u16) -> Result<()> {
    let routes = StageRoutes::scan(&config.dist_dir)
        .with_context(|| format!("failed to scan {}", config.dist_dir.display()))?;
    tracing::info!(pages = routes.len(), dist = %config.dist_dir.display(), "starting stage server");

    serve::serve(stage_router(Arc::new(routes), &config.dist_dir), port).await?;
    Ok(())
}
