//! Shared ops module - used by both build.rs (snapshot) and the library.
//!
//! This module contains all custom ops and the extension! macro definition.
//! It must be importable by both the main crate and the build script, so it
//! may only depend on `crate::dom` (which build.rs also includes).

use crate::dom::{self, DomNode};
use deno_core::error::AnyError;
use deno_core::{op2, OpState};
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

// ============================================================================
// Console Output Capture
// ============================================================================

/// Captured console output from one render session.
#[derive(Debug, Default, Clone)]
pub struct ConsoleOutput {
    pub logs: Vec<String>,
    pub warns: Vec<String>,
    pub errors: Vec<String>,
    /// Diagnostics that were recognised as expected and dropped.
    pub ignored: usize,
}

/// URL the session renders, used to tag console events.
#[derive(Debug, Clone, Default)]
pub struct SessionLabel(pub String);

const CONSOLE_TARGET: &str = "sspr::console";

fn label(state: &OpState) -> String {
    state
        .try_borrow::<SessionLabel>()
        .map(|l| l.0.clone())
        .unwrap_or_default()
}

/// Level numbers match what `bootstrap.js` passes: 0 debug, 1 log/info, 2 warn, 3 error.
#[op2(fast)]
pub fn op_sspr_console(state: &mut OpState, level: u32, #[string] msg: &str) {
    let url = label(state);
    let msg = msg.trim_end().to_string();
    match level {
        0 => tracing::debug!(target: CONSOLE_TARGET, %url, "{}", msg),
        1 => tracing::info!(target: CONSOLE_TARGET, %url, "{}", msg),
        2 => tracing::warn!(target: CONSOLE_TARGET, %url, "{}", msg),
        _ => tracing::error!(target: CONSOLE_TARGET, %url, "{}", msg),
    }
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        match level {
            0 | 1 => output.logs.push(msg),
            2 => output.warns.push(msg),
            _ => output.errors.push(msg),
        }
    }
}

/// Whether an emulated-environment diagnostic is expected noise.
///
/// Navigation is not implemented in the virtual browser and routers poke at
/// it constantly.
pub fn is_ignorable_diagnostic(kind: &str, msg: &str) -> bool {
    kind == "not-implemented" && msg.starts_with("Not implemented: navigation")
}

/// Diagnostics raised by the virtual browser itself (not by application code).
#[op2(fast)]
pub fn op_sspr_diagnostic(state: &mut OpState, #[string] kind: &str, #[string] msg: &str) {
    let url = label(state);
    if is_ignorable_diagnostic(kind, msg) {
        tracing::trace!(target: CONSOLE_TARGET, %url, kind, "{}", msg);
        if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
            output.ignored += 1;
        }
        return;
    }
    tracing::warn!(target: CONSOLE_TARGET, %url, kind, "{}", msg);
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.warns.push(format!("[{kind}] {msg}"));
    }
}

// ============================================================================
// Network Sandbox Bridge
// ============================================================================

pub type ResourceFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, AnyError>>>>;

/// Resource loading entry point installed by the host. The indirection keeps
/// this module free of the resolver types so build.rs can compile it.
#[derive(Clone)]
pub struct ResourceBridge(pub Rc<dyn Fn(String) -> ResourceFuture>);

/// Per-session counters for sandboxed network activity.
#[derive(Debug, Default, Clone)]
pub struct SandboxStats {
    pub blocked_fetches: Vec<String>,
    pub resources_loaded: usize,
}

#[op2(async)]
#[string]
pub async fn op_sspr_load_resource(
    state: Rc<RefCell<OpState>>,
    #[string] url: String,
) -> Result<String, AnyError> {
    let bridge = {
        let state_ref = state.borrow();
        state_ref.borrow::<ResourceBridge>().clone()
    };

    let bytes = (bridge.0)(url).await?;

    if let Some(stats) = state.borrow_mut().try_borrow_mut::<SandboxStats>() {
        stats.resources_loaded += 1;
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Application-level fetch() never reaches the network; it is only recorded.
#[op2(fast)]
pub fn op_sspr_fetch_blocked(state: &mut OpState, #[string] url: &str) {
    tracing::debug!(target: CONSOLE_TARGET, session = %label(state), url, "fetch stalled in sandbox");
    if let Some(stats) = state.try_borrow_mut::<SandboxStats>() {
        stats.blocked_fetches.push(url.to_string());
    }
}

// ============================================================================
// Inline Module Registry
// ============================================================================

/// Source of `<script type="module">` elements without `src`, keyed by the
/// synthetic specifier the module loader resolves them under.
#[derive(Clone, Default)]
pub struct InlineModules(pub Rc<RefCell<HashMap<String, String>>>);

pub const INLINE_MODULE_SCHEME: &str = "sspr-inline";

#[op2(fast)]
pub fn op_sspr_register_inline_module(
    state: &mut OpState,
    #[string] specifier: &str,
    #[string] code: &str,
) {
    if let Some(modules) = state.try_borrow::<InlineModules>() {
        modules
            .0
            .borrow_mut()
            .insert(specifier.to_string(), code.to_string());
    }
}

// ============================================================================
// DOM Parsing / Serialization
// ============================================================================

#[op2]
#[serde]
pub fn op_sspr_parse_fragment(#[string] html: &str) -> Vec<DomNode> {
    dom::parse_fragment(html)
}

#[op2]
#[string]
pub fn op_sspr_serialize_nodes(
    #[serde] nodes: Vec<DomNode>,
    #[string] parent: &str,
) -> String {
    let parent = (!parent.is_empty()).then_some(parent);
    dom::serialize_nodes(&nodes, parent)
}

// ============================================================================
// Extension Definition
// ============================================================================

deno_core::extension!(
    sspr_host,
    ops = [
        op_sspr_console,
        op_sspr_diagnostic,
        op_sspr_load_resource,
        op_sspr_fetch_blocked,
        op_sspr_register_inline_module,
        op_sspr_parse_fragment,
        op_sspr_serialize_nodes,
    ],
    esm_entry_point = "ext:sspr_host/bootstrap.js",
    esm = [dir "src/js", "dom.js", "sandbox.js", "bootstrap.js"],
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigation_diagnostic_is_ignorable() {
        assert!(is_ignorable_diagnostic(
            "not-implemented",
            "Not implemented: navigation (except hash changes)"
        ));
    }

    #[test]
    fn test_other_diagnostics_are_reported() {
        assert!(!is_ignorable_diagnostic(
            "not-implemented",
            "Not implemented: window.print"
        ));
        assert!(!is_ignorable_diagnostic(
            "resource",
            "Not implemented: navigation"
        ));
    }
}
