//! Network delegate with an origin allowlist.
//!
//! Security model:
//! - Only http/https URLs are handled; anything else is left to other strategies
//! - When an allowlist is configured, only matching origins can be fetched
//! - Redirects are followed manually and only while they stay on the same origin

use super::{Resource, ResourceStrategy};
use crate::error::ResourceError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use url::Url;

const MAX_REDIRECTS: usize = 5;

/// Last resort for resources the local strategies did not resolve.
pub struct NetworkStrategy {
    client: Client,
    /// Allowed origins (e.g., "https://cdn.example.com").
    /// An origin is scheme + host + port; empty allows any http/https origin.
    allowed_origins: Vec<String>,
}

impl NetworkStrategy {
    pub fn new(allowed_origins: Vec<String>) -> Result<Self, ResourceError> {
        let client = Client::builder()
            // Don't follow redirects automatically - we'll handle them manually
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ResourceError::Network {
                url: String::new(),
                reason: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            allowed_origins,
        })
    }

    pub fn is_origin_allowed(&self, url: &Url) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        let origin = url.origin().ascii_serialization();
        self.allowed_origins.iter().any(|allowed| origin == *allowed)
    }

    async fn fetch(&self, mut url: Url) -> Result<Resource, ResourceError> {
        let original_origin = url.origin();

        for _ in 0..=MAX_REDIRECTS {
            if !self.is_origin_allowed(&url) {
                return Err(ResourceError::Blocked {
                    url: url.to_string(),
                    reason: format!(
                        "origin '{}' is not in the allowlist {:?}",
                        url.origin().ascii_serialization(),
                        self.allowed_origins
                    ),
                });
            }

            tracing::debug!(%url, "fetching resource from network");
            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| ResourceError::Network {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| ResourceError::Network {
                        url: url.to_string(),
                        reason: "redirect without a valid location".to_string(),
                    })?;
                let next = url.join(location).map_err(|e| ResourceError::Network {
                    url: url.to_string(),
                    reason: format!("invalid redirect URL: {e}"),
                })?;
                if next.origin() != original_origin {
                    return Err(ResourceError::Blocked {
                        url: next.to_string(),
                        reason: format!(
                            "redirect leaves origin '{}'",
                            original_origin.ascii_serialization()
                        ),
                    });
                }
                url = next;
                continue;
            }

            if !status.is_success() {
                return Err(ResourceError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            let bytes = response.bytes().await.map_err(|e| ResourceError::Network {
                url: url.to_string(),
                reason: format!("failed to read response body: {e}"),
            })?;

            return Ok(Resource {
                url,
                bytes: bytes.to_vec(),
                content_type,
            });
        }

        Err(ResourceError::Network {
            url: url.to_string(),
            reason: format!("more than {MAX_REDIRECTS} redirects"),
        })
    }
}

#[async_trait]
impl ResourceStrategy for NetworkStrategy {
    fn name(&self) -> &'static str {
        "network"
    }

    async fn resolve(&self, url: &Url) -> Result<Option<Resource>, ResourceError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Ok(None);
        }
        self.fetch(url.clone()).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_matching() {
        let strategy = NetworkStrategy::new(vec![
            "https://cdn.example.com".to_string(),
            "http://localhost:3000".to_string(),
        ])
        .unwrap();

        assert!(strategy.is_origin_allowed(&Url::parse("https://cdn.example.com/lib.js").unwrap()));
        assert!(strategy.is_origin_allowed(&Url::parse("http://localhost:3000/app.js").unwrap()));

        assert!(!strategy.is_origin_allowed(&Url::parse("https://evil.com/x.js").unwrap()));
        assert!(!strategy.is_origin_allowed(&Url::parse("http://cdn.example.com/lib.js").unwrap())); // http vs https
        assert!(!strategy.is_origin_allowed(&Url::parse("https://cdn.example.com:8080/").unwrap())); // different port
    }

    #[test]
    fn test_empty_allowlist_allows_any_origin() {
        let strategy = NetworkStrategy::new(vec![]).unwrap();
        assert!(strategy.is_origin_allowed(&Url::parse("https://anything.com").unwrap()));
    }

    #[tokio::test]
    async fn test_blocked_origin_fails_without_network() {
        let strategy = NetworkStrategy::new(vec!["https://cdn.example.com".to_string()]).unwrap();
        let err = strategy
            .resolve(&Url::parse("https://evil.com/x.js").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ResourceError::Blocked { .. }));
    }

    #[tokio::test]
    async fn test_non_http_is_not_handled() {
        let strategy = NetworkStrategy::new(vec![]).unwrap();
        let url = Url::parse("sspr-inline:1").unwrap();
        assert!(strategy.resolve(&url).await.unwrap().is_none());
    }
}
