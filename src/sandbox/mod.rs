//! Resource resolution for render sessions.
//!
//! Every resource a session's document references (scripts, module imports,
//! stylesheets) is resolved through a [`ResourceResolver`]: an ordered list of
//! [`ResourceStrategy`] values, each answering "present" or "absent". The
//! first present answer wins. Application-level `fetch()` never reaches this
//! layer; it stalls inside the isolate (see `src/js/sandbox.js`).

mod data;
mod local;
mod network;

pub use data::DataUrlStrategy;
pub use local::LocalFileStrategy;
pub use network::NetworkStrategy;

use crate::error::ResourceError;
use async_trait::async_trait;
use std::path::Path;
use url::Url;

/// Bytes backing a resolved resource URL.
#[derive(Debug, Clone)]
pub struct Resource {
    pub url: Url,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// One step of the resolution chain.
///
/// `Ok(None)` means "not mine, try the next strategy"; errors stop the chain.
#[async_trait]
pub trait ResourceStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(&self, url: &Url) -> Result<Option<Resource>, ResourceError>;
}

/// Ordered chain of strategies shared by all sessions of a build.
#[derive(Default)]
pub struct ResourceResolver {
    strategies: Vec<Box<dyn ResourceStrategy>>,
}

impl ResourceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a strategy to the end of the chain.
    pub fn with(mut self, strategy: impl ResourceStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// `data:` URLs, then files under `resource_root` (when set), then the network.
    pub fn standard(
        resource_root: Option<&Path>,
        network: NetworkStrategy,
    ) -> Result<Self, ResourceError> {
        let mut resolver = Self::new().with(DataUrlStrategy);
        if let Some(root) = resource_root {
            resolver = resolver.with(LocalFileStrategy::new(root)?);
        }
        Ok(resolver.with(network))
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn resolve(&self, url: &Url) -> Result<Resource, ResourceError> {
        for strategy in &self.strategies {
            if let Some(resource) = strategy.resolve(url).await? {
                tracing::debug!(
                    strategy = strategy.name(),
                    %url,
                    bytes = resource.bytes.len(),
                    "resource resolved"
                );
                return Ok(resource);
            }
        }
        Err(ResourceError::NotFound(url.to_string()))
    }
}
