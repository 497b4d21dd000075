//! Validation of route tables published by rendered applications.
//!
//! The table crosses from untrusted page script into the host, which uses it
//! to name files on disk. Output filenames must stay inside the output
//! directory.

use crate::error::RouteError;
use serde_json::Value;

const MAX_DEPTH: usize = 32;

/// Keys a page could use to reach `Object.prototype` through the table.
const FORBIDDEN_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Walk a published route table without copying it.
pub fn check_route_value(value: &Value) -> Result<(), RouteError> {
    check_at(value, 0)
}

fn check_at(value: &Value, depth: usize) -> Result<(), RouteError> {
    if depth > MAX_DEPTH {
        return Err(RouteError::TooDeep(MAX_DEPTH));
    }
    match value {
        Value::Object(map) => map.iter().try_for_each(|(key, child)| {
            if FORBIDDEN_KEYS.contains(&key.as_str()) {
                return Err(RouteError::ForbiddenKey(key.clone()));
            }
            check_at(child, depth + 1)
        }),
        Value::Array(items) => items.iter().try_for_each(|child| check_at(child, depth + 1)),
        _ => Ok(()),
    }
}

/// A relative `.html` path made only of normal components.
pub fn is_safe_html_filename(name: &str) -> bool {
    if name.contains('\\') || name.contains('\0') || !name.ends_with(".html") {
        return false;
    }
    let file = name.rsplit('/').next().unwrap_or_default();
    file.len() > ".html".len()
        && name
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}
