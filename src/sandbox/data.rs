use super::{Resource, ResourceStrategy};
use crate::error::ResourceError;
use async_trait::async_trait;
use base64::Engine;
use percent_encoding::percent_decode_str;
use url::Url;

/// Decodes `data:` URLs in-process.
pub struct DataUrlStrategy;

#[async_trait]
impl ResourceStrategy for DataUrlStrategy {
    fn name(&self) -> &'static str {
        "data"
    }

    async fn resolve(&self, url: &Url) -> Result<Option<Resource>, ResourceError> {
        if url.scheme() != "data" {
            return Ok(None);
        }
        let (content_type, bytes) = decode(url.as_str())?;
        Ok(Some(Resource {
            url: url.clone(),
            bytes,
            content_type,
        }))
    }
}

fn decode(raw: &str) -> Result<(Option<String>, Vec<u8>), ResourceError> {
    let body = raw
        .strip_prefix("data:")
        .ok_or_else(|| ResourceError::DataUrl(raw.to_string()))?;
    let (meta, payload) = body
        .split_once(',')
        .ok_or_else(|| ResourceError::DataUrl(raw.to_string()))?;

    let (mime, is_base64) = match meta.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (meta, false),
    };

    let decoded: Vec<u8> = percent_decode_str(payload).collect();
    let bytes = if is_base64 {
        let compact: Vec<u8> = decoded
            .into_iter()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| ResourceError::DataUrl(e.to_string()))?
    } else {
        decoded
    };

    let content_type = (!mime.is_empty()).then(|| mime.to_string());
    Ok((content_type, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_base64_payload() {
        let url = Url::parse("data:text/javascript;base64,d2luZG93LmEgPSAxOw==").unwrap();
        let resource = DataUrlStrategy.resolve(&url).await.unwrap().unwrap();
        assert_eq!(resource.bytes, b"window.a = 1;");
        assert_eq!(resource.content_type.as_deref(), Some("text/javascript"));
    }

    #[tokio::test]
    async fn test_percent_encoded_payload() {
        let url = Url::parse("data:,a%20b%3Bc").unwrap();
        let resource = DataUrlStrategy.resolve(&url).await.unwrap().unwrap();
        assert_eq!(resource.bytes, b"a b;c");
        assert_eq!(resource.content_type, None);
    }

    #[tokio::test]
    async fn test_ignores_other_schemes() {
        let url = Url::parse("http://localhost/a.js").unwrap();
        assert!(DataUrlStrategy.resolve(&url).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bad_base64_is_an_error() {
        let url = Url::parse("data:text/plain;base64,@@@").unwrap();
        assert!(DataUrlStrategy.resolve(&url).await.is_err());
    }
}
