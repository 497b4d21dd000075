//! Module loader for `<script type="module">` and dynamic `import()` inside a
//! render session.
//!
//! Every module is fetched through the session's [`ResourceResolver`], so the
//! same local-file-first rules apply to modules as to classic scripts. Inline
//! module scripts are registered by the DOM shim under the `sspr-inline:`
//! scheme and served from the per-session [`InlineModules`] registry.

use crate::ops::{InlineModules, INLINE_MODULE_SCHEME};
use crate::sandbox::ResourceResolver;
use deno_core::{
    anyhow::{anyhow, Error},
    ModuleLoadResponse, ModuleLoader, ModuleSource, ModuleSourceCode, ModuleSpecifier,
    ModuleType, RequestedModuleType, ResolutionKind,
};
use std::sync::Arc;
use url::Url;

/// Loads ES modules for one render session.
///
/// Guarantees:
/// - Only http/https, `data:` and inline-module specifiers resolve
/// - No direct filesystem access (`file:` and `blob:` are rejected); files are
///   reached through the resolver's local strategy by URL path
/// - Bare specifiers fail, as they would in a browser without an import map
pub struct SessionLoader {
    /// Document URL; base for relative imports made by inline modules.
    document_url: Url,
    resolver: Arc<ResourceResolver>,
    inline: InlineModules,
}

impl SessionLoader {
    pub fn new(document_url: Url, resolver: Arc<ResourceResolver>, inline: InlineModules) -> Self {
        Self {
            document_url,
            resolver,
            inline,
        }
    }

    fn is_scheme_allowed(scheme: &str) -> bool {
        matches!(scheme, "http" | "https" | "data") || scheme == INLINE_MODULE_SCHEME
    }
}

fn is_relative(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/')
}

impl ModuleLoader for SessionLoader {
    fn resolve(
        &self,
        specifier: &str,
        referrer: &str,
        _kind: ResolutionKind,
    ) -> Result<ModuleSpecifier, Error> {
        let resolved = if is_relative(specifier) {
            // Inline modules have no hierarchical URL; resolve against the document
            let base = match ModuleSpecifier::parse(referrer) {
                Ok(url) if url.scheme() != INLINE_MODULE_SCHEME && !url.cannot_be_a_base() => url,
                _ => self.document_url.clone(),
            };
            base.join(specifier)
                .map_err(|e| anyhow!("Failed to resolve '{}': {}", specifier, e))?
        } else {
            ModuleSpecifier::parse(specifier).map_err(|_| {
                anyhow!(
                    "Bare import specifier '{}' is not supported (imported from {})",
                    specifier,
                    referrer
                )
            })?
        };

        if !Self::is_scheme_allowed(resolved.scheme()) {
            return Err(anyhow!(
                "Imports over '{}:' are forbidden: {}",
                resolved.scheme(),
                resolved
            ));
        }

        Ok(resolved)
    }

    fn load(
        &self,
        module_specifier: &ModuleSpecifier,
        _maybe_referrer: Option<&ModuleSpecifier>,
        _is_dyn_import: bool,
        requested_module_type: RequestedModuleType,
    ) -> ModuleLoadResponse {
        let specifier = module_specifier.clone();
        let module_type = match requested_module_type {
            RequestedModuleType::Json => ModuleType::Json,
            _ => ModuleType::JavaScript,
        };

        if specifier.scheme() == INLINE_MODULE_SCHEME {
            let code = self.inline.0.borrow().get(specifier.as_str()).cloned();
            return ModuleLoadResponse::Sync(match code {
                Some(code) => Ok(ModuleSource::new(
                    module_type,
                    ModuleSourceCode::String(code.into()),
                    &specifier,
                    None,
                )),
                None => Err(anyhow!("Unknown inline module: {}", specifier)),
            });
        }

        let resolver = self.resolver.clone();
        ModuleLoadResponse::Async(Box::pin(async move {
            let resource = resolver.resolve(&specifier).await?;
            // A server's HTML fallback page answering for a missing chunk
            if resource
                .content_type
                .as_deref()
                .is_some_and(|t| t.trim_start().starts_with("text/html"))
            {
                return Err(anyhow!("'{}' is an HTML document, not a module", specifier));
            }
            let code = String::from_utf8_lossy(&resource.bytes).into_owned();
            Ok(ModuleSource::new(
                module_type,
                ModuleSourceCode::String(code.into()),
                &specifier,
                None,
            ))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{DataUrlStrategy, LocalFileStrategy};
    use std::fs;
    use tempfile::tempdir;

    fn loader(resolver: ResourceResolver) -> SessionLoader {
        SessionLoader::new(
            Url::parse("http://localhost:3000/docs/page").unwrap(),
            Arc::new(resolver),
            InlineModules::default(),
        )
    }

    #[test]
    fn test_blocks_file_and_blob_urls() {
        let loader = loader(ResourceResolver::new());
        let result = loader.resolve("file:///etc/passwd", "http://localhost:3000/a.js", ResolutionKind::Import);
        assert!(result.unwrap_err().to_string().contains("forbidden"));
        let result = loader.resolve("blob:abc", "http://localhost:3000/a.js", ResolutionKind::Import);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_bare_specifiers() {
        let loader = loader(ResourceResolver::new());
        let result = loader.resolve("react", "http://localhost:3000/a.js", ResolutionKind::Import);
        assert!(result.unwrap_err().to_string().contains("Bare import"));
    }

    #[test]
    fn test_resolves_relative_to_referrer() {
        let loader = loader(ResourceResolver::new());
        let resolved = loader
            .resolve("./chunk.js", "http://localhost:3000/assets/main.js", ResolutionKind::Import)
            .unwrap();
        assert_eq!(resolved.as_str(), "http://localhost:3000/assets/chunk.js");
    }

    #[test]
    fn test_inline_referrer_resolves_against_document() {
        let loader = loader(ResourceResolver::new());
        let resolved = loader
            .resolve("./app.js", "sspr-inline:1", ResolutionKind::DynamicImport)
            .unwrap();
        assert_eq!(resolved.as_str(), "http://localhost:3000/docs/app.js");
    }

    #[test]
    fn test_loads_registered_inline_module() {
        let loader = loader(ResourceResolver::new());
        loader
            .inline
            .0
            .borrow_mut()
            .insert("sspr-inline:1".to_string(), "export default 1;".to_string());

        let specifier = ModuleSpecifier::parse("sspr-inline:1").unwrap();
        match loader.load(&specifier, None, true, RequestedModuleType::None) {
            ModuleLoadResponse::Sync(result) => assert!(result.is_ok()),
            ModuleLoadResponse::Async(_) => panic!("inline modules load synchronously"),
        }

        let missing = ModuleSpecifier::parse("sspr-inline:2").unwrap();
        match loader.load(&missing, None, true, RequestedModuleType::None) {
            ModuleLoadResponse::Sync(result) => assert!(result.is_err()),
            ModuleLoadResponse::Async(_) => panic!("inline modules load synchronously"),
        }
    }

    #[tokio::test]
    async fn test_loads_module_through_resolver() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("assets")).unwrap();
        fs::write(dir.path().join("assets/main.js"), "export const x = 1;").unwrap();
        let loader = loader(ResourceResolver::new().with(LocalFileStrategy::new(dir.path()).unwrap()));

        let found = ModuleSpecifier::parse("http://localhost:3000/assets/main.js").unwrap();
        match loader.load(&found, None, false, RequestedModuleType::None) {
            ModuleLoadResponse::Async(fut) => assert!(fut.await.is_ok()),
            ModuleLoadResponse::Sync(_) => panic!("resolver loads are async"),
        }

        let missing = ModuleSpecifier::parse("http://localhost:3000/assets/gone.js").unwrap();
        match loader.load(&missing, None, false, RequestedModuleType::None) {
            ModuleLoadResponse::Async(fut) => assert!(fut.await.is_err()),
            ModuleLoadResponse::Sync(_) => panic!("resolver loads are async"),
        }
    }

    #[tokio::test]
    async fn test_html_response_is_not_a_module() {
        let loader = loader(ResourceResolver::new().with(DataUrlStrategy));

        let page = ModuleSpecifier::parse("data:text/html,<p>not found</p>").unwrap();
        match loader.load(&page, None, false, RequestedModuleType::None) {
            ModuleLoadResponse::Async(fut) => {
                let err = fut.await.unwrap_err();
                assert!(err.to_string().contains("HTML document"));
            }
            ModuleLoadResponse::Sync(_) => panic!("resolver loads are async"),
        }

        let script = ModuleSpecifier::parse("data:text/javascript,export%20default%201").unwrap();
        match loader.load(&script, None, false, RequestedModuleType::None) {
            ModuleLoadResponse::Async(fut) => assert!(fut.await.is_ok()),
            ModuleLoadResponse::Sync(_) => panic!("resolver loads are async"),
        }
    }
}
