//! Typed progress events emitted at every pipeline transition.
//!
//! The orchestrator emits through an injected `ProgressSink` rather than an
//! arbitrary closure, so a live consumer (streaming UI endpoint) can observe
//! step-by-step progress without the pipeline knowing who is listening.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    SearchPosts,
    PickPost,
    FetchComments,
    Analyze,
    CheckRelevance,
    StoreLead,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Completed,
    Error,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub step: PipelineStep,
    pub status: StepStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    pub progress_percent: u8,
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Sink for callers that do not observe progress (dispatched background runs).
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn emit(&self, _event: ProgressEvent) {}
}
