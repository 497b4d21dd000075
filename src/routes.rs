//! Route tables published by rendered applications.

use crate::error::RouteError;
use crate::sanitize::{check_route_value, is_safe_html_filename};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Filename of the root page; always rendered first and never re-rendered.
pub const INDEX_FILENAME: &str = "index.html";

/// A statically pre-renderable route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteEntry {
    pub path: String,
    pub html_filename: String,
}

/// A client-only route. `component` is opaque to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicRoute {
    pub path: String,
    #[serde(default)]
    pub component: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTable {
    #[serde(default)]
    pub dynamic_routes: Vec<DynamicRoute>,
    #[serde(default)]
    pub static_routes: Vec<RouteEntry>,
}

impl RouteTable {
    /// First static route whose pattern matches `path`.
    pub fn find_static(&self, path: &str) -> Option<&RouteEntry> {
        self.static_routes
            .iter()
            .find(|route| route_matches(&route.path, path))
    }
}

/// Parse and validate the JSON a session published.
pub fn parse_route_table(json: &str) -> Result<RouteTable, RouteError> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    check_route_value(&value)?;
    let table: RouteTable = serde_json::from_value(value)?;

    if let Some(bad) = table
        .static_routes
        .iter()
        .find(|r| !is_safe_html_filename(&r.html_filename))
    {
        return Err(RouteError::UnsafeFilename(bad.html_filename.clone()));
    }
    Ok(table)
}

/// Static routes still to render, computed before any render starts.
///
/// The first occurrence of each filename wins; `index.html` and anything in
/// `processed` are skipped.
pub fn pending_routes<'a, 'p>(
    table: &'a RouteTable,
    processed: impl IntoIterator<Item = &'p str>,
) -> Vec<&'a RouteEntry> {
    let mut seen: HashSet<&str> = processed.into_iter().collect();
    seen.insert(INDEX_FILENAME);

    table
        .static_routes
        .iter()
        .filter(|route| seen.insert(route.html_filename.as_str()))
        .collect()
}

/// Match a request path against a route pattern.
///
/// Supports literal segments, `:param` segments and a trailing `*`. Trailing
/// slashes and query strings are ignored.
pub fn route_matches(pattern: &str, path: &str) -> bool {
    let pattern = segments(pattern);
    let path = segments(path);

    for (i, expected) in pattern.iter().enumerate() {
        if *expected == "*" && i == pattern.len() - 1 {
            return true;
        }
        let Some(actual) = path.get(i) else {
            return false;
        };
        if expected.starts_with(':') {
            continue;
        }
        if expected != actual {
            return false;
        }
    }
    pattern.len() == path.len()
}

fn segments(path: &str) -> Vec<&str> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    path.split('/').filter(|s| !s.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, file: &str) -> RouteEntry {
        RouteEntry {
            path: path.to_string(),
            html_filename: file.to_string(),
        }
    }

    #[test]
    fn test_parse_published_table() {
        let table = parse_route_table(
            r#"{"staticRoutes":[{"path":"/doc","htmlFilename":"doc.html"}],
                "dynamicRoutes":[{"path":"/user/:id","component":"[function User]"}]}"#,
        )
        .unwrap();
        assert_eq!(table.static_routes, vec![entry("/doc", "doc.html")]);
        assert_eq!(table.dynamic_routes.len(), 1);
    }

    #[test]
    fn test_parse_defaults_missing_lists() {
        let table = parse_route_table("{}").unwrap();
        assert!(table.static_routes.is_empty());
        assert!(table.dynamic_routes.is_empty());
    }

    #[test]
    fn test_parse_rejects_unsafe_filenames() {
        let err = parse_route_table(
            r#"{"staticRoutes":[{"path":"/x","htmlFilename":"../../etc/x.html"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, RouteError::UnsafeFilename(_)));
    }

    #[test]
    fn test_parse_rejects_pollution() {
        let err = parse_route_table(r#"{"__proto__":{"staticRoutes":[]}}"#).unwrap_err();
        assert!(matches!(err, RouteError::ForbiddenKey(_)));
    }

    #[test]
    fn test_pending_routes_dedups_by_filename() {
        let table = RouteTable {
            static_routes: vec![
                entry("/", "index.html"),
                entry("/doc", "doc.html"),
                entry("/docs", "doc.html"),
                entry("/example", "example.html"),
                entry("/done", "done.html"),
            ],
            ..Default::default()
        };

        let pending = pending_routes(&table, ["done.html"]);
        let files: Vec<_> = pending.iter().map(|r| r.html_filename.as_str()).collect();
        assert_eq!(files, vec!["doc.html", "example.html"]);
        assert_eq!(pending[0].path, "/doc");
    }

    #[test]
    fn test_route_matching() {
        assert!(route_matches("/doc", "/doc"));
        assert!(route_matches("/doc", "/doc/"));
        assert!(route_matches("/doc", "/doc?tab=1"));
        assert!(route_matches("/", "/"));
        assert!(route_matches("/user/:id", "/user/42"));
        assert!(route_matches("/blog/*", "/blog/2024/post"));
        assert!(route_matches("/blog/*", "/blog"));

        assert!(!route_matches("/doc", "/docs"));
        assert!(!route_matches("/doc", "/doc/extra"));
        assert!(!route_matches("/user/:id", "/user"));
        assert!(!route_matches("/", "/doc"));
    }

    #[test]
    fn test_find_static() {
        let table = RouteTable {
            static_routes: vec![entry("/doc", "doc.html"), entry("/example", "example.html")],
            ..Default::default()
        };
        assert_eq!(table.find_static("/example/").unwrap().html_filename, "example.html");
        assert!(table.find_static("/missing").is_none());
    }
}
