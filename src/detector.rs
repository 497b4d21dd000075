//! Script completion detection.
//!
//! There is no framework hook that says "hydration finished", so completion is
//! inferred:
//!
//! 1. `Observing`: the scripts present in the document at entry are watched;
//!    each fires exactly one `load` or `error`. With no scripts at all, the
//!    window `load` event settles the session directly.
//! 2. `AwaitingSettle`: once every script loaded, a sentinel script is
//!    injected. After a configurable number of microtask and macrotask turns it
//!    sets a uniquely named marker on the global scope, which is polled.
//! 3. `Settled`, or one of the terminal failures `Errored` / `TimedOut`.
//!
//! A hard timer bounds the whole wait independently of the poll cap. The
//! application may also call `__SSPR__.done()` to settle immediately.

use crate::config::{DetectorConfig, SettleDelay};
use crate::error::RenderError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Script bookkeeping reported by a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptProgress {
    pub total: usize,
    pub loaded: usize,
    /// First script error, if any.
    pub error: Option<String>,
    pub document_loaded: bool,
    /// The application signalled completion explicitly.
    pub signalled: bool,
}

/// What the detector needs from a render session.
#[async_trait(?Send)]
pub trait SettleProbe {
    /// Attach load/error listeners to the current script set; returns its size.
    fn observe_scripts(&mut self) -> Result<usize, RenderError>;

    /// Begin executing the document's scripts.
    fn start(&mut self) -> Result<(), RenderError>;

    /// Let the session make progress for up to `budget`.
    async fn drive(&mut self, budget: Duration) -> Result<(), RenderError>;

    fn progress(&mut self) -> Result<ScriptProgress, RenderError>;

    fn inject_sentinel(&mut self, source: &str) -> Result<(), RenderError>;

    fn marker_set(&mut self, name: &str) -> Result<bool, RenderError>;

    fn remove_sentinel(&mut self) -> Result<(), RenderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Observing,
    AwaitingSettle,
    Settled,
    TimedOut,
    Errored,
}

impl DetectorState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DetectorState::Settled | DetectorState::TimedOut | DetectorState::Errored
        )
    }
}

/// Transition guard: once a terminal state is reached, later transitions are ignored.
#[derive(Debug)]
struct SettleGuard {
    state: DetectorState,
}

impl SettleGuard {
    fn new() -> Self {
        Self {
            state: DetectorState::Observing,
        }
    }

    /// Returns false if the guard had already settled.
    fn transition(&mut self, next: DetectorState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        tracing::trace!(from = ?self.state, to = ?next, "detector transition");
        self.state = next;
        true
    }
}

/// Summary of a successful wait.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectorReport {
    /// Marker checks performed while awaiting settle.
    pub polls: u32,
    /// Size of the observed initial script set.
    pub scripts: usize,
    pub sentinel_injected: bool,
}

/// Marker name salted with the current time and a random suffix.
pub fn marker_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("__sspr_settled_{}_{}", millis, uuid::Uuid::new_v4().simple())
}

/// JavaScript for the sentinel script that sets `marker` after `delay`.
pub fn sentinel_source(marker: &str, delay: SettleDelay) -> String {
    let name = serde_json::Value::String(marker.to_string()).to_string();
    let mut body = format!("globalThis[{name}] = true;");
    for _ in 0..delay.macrotask_hops {
        body = format!("setTimeout(() => {{ {body} }}, 0);");
    }
    if delay.microtask_hops == 0 {
        return body;
    }
    let mut chain = String::from("Promise.resolve()");
    for _ in 1..delay.microtask_hops {
        chain.push_str(".then(() => {})");
    }
    format!("{chain}.then(() => {{ {body} }});")
}

pub struct CompletionDetector {
    config: DetectorConfig,
}

impl CompletionDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Start the session's scripts and wait until it settles.
    pub async fn wait<P: SettleProbe>(&self, probe: &mut P) -> Result<DetectorReport, RenderError> {
        let timeout = self.config.timeout;
        tokio::select! {
            biased;
            result = self.run(probe) => result,
            _ = tokio::time::sleep(timeout) => {
                let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::debug!(timeout_ms = ms, "hard render timeout elapsed");
                Err(RenderError::Timeout(ms))
            }
        }
    }

    async fn run<P: SettleProbe>(&self, probe: &mut P) -> Result<DetectorReport, RenderError> {
        let mut guard = SettleGuard::new();
        let mut report = DetectorReport {
            scripts: probe.observe_scripts()?,
            ..Default::default()
        };
        let marker = marker_name();
        probe.start()?;

        loop {
            probe.drive(self.config.poll_interval).await?;
            let progress = probe.progress()?;

            if let Some(error) = progress.error {
                guard.transition(DetectorState::Errored);
                return Err(RenderError::Script(error));
            }

            match guard.state {
                DetectorState::Observing => {
                    if progress.signalled || (report.scripts == 0 && progress.document_loaded) {
                        guard.transition(DetectorState::Settled);
                        return Ok(report);
                    }
                    if report.scripts > 0 && progress.loaded >= report.scripts {
                        probe.inject_sentinel(&sentinel_source(&marker, self.config.settle_delay))?;
                        report.sentinel_injected = true;
                        guard.transition(DetectorState::AwaitingSettle);
                    }
                }
                DetectorState::AwaitingSettle => {
                    report.polls += 1;
                    if progress.signalled || probe.marker_set(&marker)? {
                        probe.remove_sentinel()?;
                        guard.transition(DetectorState::Settled);
                        return Ok(report);
                    }
                    if report.polls >= self.config.poll_limit {
                        probe.remove_sentinel()?;
                        guard.transition(DetectorState::TimedOut);
                        return Err(RenderError::SettleLimit {
                            polls: report.polls,
                        });
                    }
                }
                terminal => unreachable!("detector loop continued after {terminal:?}"),
            }
        }
    }
}
