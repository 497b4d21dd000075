//! Configuration loaded from `SSPR_*` environment variables, overridden by CLI flags.

use crate::error::ConfigError;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Scheduling turns the completion sentinel waits before setting its marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleDelay {
    /// Chained promise resolutions.
    pub microtask_hops: u32,
    /// Zero-delay timers queued after the microtask chain.
    pub macrotask_hops: u32,
}

impl Default for SettleDelay {
    fn default() -> Self {
        Self {
            microtask_hops: 2,
            macrotask_hops: 1,
        }
    }
}

/// Completion detector tunables.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Hard ceiling for one render.
    pub timeout: Duration,
    pub poll_interval: Duration,
    /// Marker checks before giving up.
    pub poll_limit: u32,
    pub settle_delay: SettleDelay,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            poll_interval: Duration::from_millis(10),
            poll_limit: 500,
            settle_delay: SettleDelay::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
}

impl Environment {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct SsprConfig {
    /// Site root every logical render URL is built on.
    pub origin: Url,
    /// Bundler output; resource root for sessions and destination for pages.
    pub dist_dir: PathBuf,
    /// Template HTML; defaults to `<dist_dir>/index.html`.
    pub template: Option<PathBuf>,
    pub detector: DetectorConfig,
    /// `None` renders every discovered route at once.
    pub max_concurrent_renders: Option<usize>,
    /// Bundler invocation run before `prod` pre-renders.
    pub build_command: Option<String>,
    pub environment: Environment,
    /// Per-isolate V8 heap limit in bytes.
    pub max_heap_size: Option<usize>,
    /// Origins the network resource strategy may reach (empty = any http/https).
    pub allowed_origins: Vec<String>,
    /// Path prefixes served as static assets without rendering.
    pub asset_prefixes: Vec<String>,
}

impl Default for SsprConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse("http://localhost:3000/").expect("static URL"),
            dist_dir: PathBuf::from("dist"),
            template: None,
            detector: DetectorConfig::default(),
            max_concurrent_renders: None,
            build_command: None,
            environment: Environment::Production,
            max_heap_size: Some(256 * 1024 * 1024),
            allowed_origins: Vec::new(),
            asset_prefixes: vec!["/static/".to_string(), "/assets/".to_string()],
        }
    }
}

impl SsprConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SSPR_ORIGIN` - site root URL (default: "http://localhost:3000/")
    /// - `SSPR_DIST_DIR` - bundler output directory (default: "dist")
    /// - `SSPR_TEMPLATE` - template HTML path (default: "<dist>/index.html")
    /// - `SSPR_RENDER_TIMEOUT_MS` - hard render timeout (default: 5000)
    /// - `SSPR_MAX_CONCURRENT_RENDERS` - concurrency cap (default: unbounded)
    /// - `SSPR_BUILD_COMMAND` - bundler command run by `prod`
    /// - `SSPR_ALLOWED_ORIGINS` - comma-separated network allowlist
    /// - `SSPR_ENV` - "production" (default) or anything else for development
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(origin) = get("SSPR_ORIGIN") {
            config.origin = parse_origin(&origin)?;
        }
        if let Some(dir) = get("SSPR_DIST_DIR") {
            config.dist_dir = PathBuf::from(dir);
        }
        if let Some(template) = get("SSPR_TEMPLATE") {
            config.template = Some(PathBuf::from(template));
        }
        if let Some(ms) = get("SSPR_RENDER_TIMEOUT_MS") {
            let ms: u64 = parse_number("SSPR_RENDER_TIMEOUT_MS", &ms)?;
            config.detector.timeout = Duration::from_millis(ms);
        }
        if let Some(n) = get("SSPR_MAX_CONCURRENT_RENDERS") {
            config.max_concurrent_renders = Some(parse_number("SSPR_MAX_CONCURRENT_RENDERS", &n)?);
        }
        config.build_command = get("SSPR_BUILD_COMMAND").filter(|c| !c.trim().is_empty());
        if let Some(origins) = get("SSPR_ALLOWED_ORIGINS") {
            config.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(env) = get("SSPR_ENV") {
            config.environment = Environment::parse(&env);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(invalid("origin", format!("'{}' is not http(s)", self.origin)));
        }
        if self.detector.timeout.is_zero() {
            return Err(invalid("render timeout", "must be greater than zero".into()));
        }
        if self.detector.poll_interval.is_zero() || self.detector.poll_limit == 0 {
            return Err(invalid("poll settings", "must be greater than zero".into()));
        }
        if self.max_concurrent_renders == Some(0) {
            return Err(invalid("max concurrent renders", "must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn template_path(&self) -> PathBuf {
        self.template
            .clone()
            .unwrap_or_else(|| self.dist_dir.join("index.html"))
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

pub fn parse_origin(value: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(value).map_err(|e| invalid("origin", e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("origin", format!("'{value}' is not http(s)")));
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(name, format!("'{value}': {e}")))
}

fn invalid(name: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { name, reason }
}
