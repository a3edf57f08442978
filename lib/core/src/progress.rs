//! Progress reporting
//!
//! The pipeline reports discrete stage transitions through a caller-supplied
//! [`ProgressSink`]. Delivery is best-effort: sinks may drop or coalesce
//! events, and nothing in the engine waits on them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

/// Pipeline stage identifiers, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Parsing,
    ExactMatching,
    Embedding,
    Scoring,
    Assigning,
    WritingOutput,
    Done,
    Error,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Parsing => "parsing",
            Stage::ExactMatching => "exact-matching",
            Stage::Embedding => "embedding",
            Stage::Scoring => "scoring",
            Stage::Assigning => "assigning",
            Stage::WritingOutput => "writing-output",
            Stage::Done => "done",
            Stage::Error => "error",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Error)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single progress notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: Stage,
    pub message: String,
    /// Overall completion hint, 0-100
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
}

impl ProgressEvent {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            percent: None,
        }
    }

    pub fn with_percent(mut self, percent: u8) -> Self {
        self.percent = Some(percent.min(100));
        self
    }
}

/// Consumer of progress events
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Forwards events to `tracing` at info level (errors at warn)
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn emit(&self, event: ProgressEvent) {
        match (event.stage, event.percent) {
            (Stage::Error, _) => tracing::warn!(stage = %event.stage, "{}", event.message),
            (stage, Some(pct)) => tracing::info!(stage = %stage, percent = pct, "{}", event.message),
            (stage, None) => tracing::info!(stage = %stage, "{}", event.message),
        }
    }
}

/// Wraps a sink and drops events that would move the stage backwards.
///
/// Repeated events for the current stage pass through (percent updates).
/// Once a terminal stage was reported nothing else is forwarded.
pub struct MonotonicProgress<'a> {
    inner: &'a dyn ProgressSink,
    last: Mutex<Option<Stage>>,
}

impl<'a> MonotonicProgress<'a> {
    pub fn new(inner: &'a dyn ProgressSink) -> Self {
        Self {
            inner,
            last: Mutex::new(None),
        }
    }

    pub fn report(&self, stage: Stage, message: impl Into<String>, percent: Option<u8>) {
        let mut event = ProgressEvent::new(stage, message);
        if let Some(pct) = percent {
            event = event.with_percent(pct);
        }
        self.emit(event);
    }

    pub fn last_stage(&self) -> Option<Stage> {
        *self.last.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ProgressSink for MonotonicProgress<'_> {
    fn emit(&self, event: ProgressEvent) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(prev) = *last {
            if prev.is_terminal() || event.stage < prev {
                return;
            }
        }
        *last = Some(event.stage);
        drop(last);
        self.inner.emit(event);
    }
}
