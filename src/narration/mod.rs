// THEORY:
// The `narration` module turns accumulated motion state into human-readable
// captions, carefully rationing the one expensive resource in the system:
// model inference. Three cooperating pieces:
//
// 1.  **Orchestrator**: decides per sampling tick whether to call the model
//     at all. An unchanging scene is served from a fingerprint cache; at
//     most one inference call is ever in flight per session, and a result
//     that arrives too late is discarded rather than applied.
// 2.  **Provider**: the swappable inference backend behind a single async
//     `infer` contract. Orchestrator code never knows which model answers.
// 3.  **Guarder**: the decision layer between raw model text and the
//     narration output. It accepts, suppresses, or replaces text based on
//     confidence signals and anti-boilerplate rules, and is the only place
//     where those rules live.
// 4.  **Classifier**: asks the model what each tracked object is, at most
//     once per identity and only after the track has stabilized. Labels
//     enrich the DSL; motion detection never waits on them.
//
// Inference failure is a normal, expected condition here. Every timeout and
// provider error resolves to a deterministic, model-free fallback summary;
// nothing in this module panics or propagates an error to the analysis loop.

pub mod classifier;
pub mod fallback;
pub mod guarder;
pub mod orchestrator;
pub mod provider;

pub use classifier::BlobClassifier;
pub use guarder::{Guarder, GuarderDecision, GuarderOutcome, Severity};
pub use orchestrator::NarrationOrchestrator;
pub use provider::{InferenceProvider, OllamaProvider};

use std::time::Duration;

use crate::dsl::MotionClass;

/// Operating mode of a narration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrationMode {
    /// Describe whatever the scene is doing.
    General,
    /// Emphasize presence/absence and movement of one focus target.
    Track,
}

/// What a dispatch asks the model for. Each class carries its own timeout
/// budget, configured in `OperationTimeouts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    PresenceCheck,
    ChangeCheck,
    Summarize,
    Validate,
    Analyze,
    AnalyzeWithTracking,
}

impl OperationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::PresenceCheck => "presence_check",
            OperationClass::ChangeCheck => "change_check",
            OperationClass::Summarize => "summarize",
            OperationClass::Validate => "validate",
            OperationClass::Analyze => "analyze",
            OperationClass::AnalyzeWithTracking => "analyze_with_tracking",
        }
    }
}

/// One inference request, built fresh per dispatch and never shared across
/// concurrent dispatches.
#[derive(Debug, Clone)]
pub struct CaptionRequest {
    pub dsl_timeline: String,
    pub previous_caption: Option<String>,
    pub focus_target: String,
    pub mode: NarrationMode,
    pub operation: OperationClass,
}

/// How a dispatch resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionOutcome {
    Ok,
    Timeout,
    Error,
}

/// The raw outcome of one inference dispatch, before the guarder has seen it.
#[derive(Debug, Clone)]
pub struct CaptionResult {
    pub raw_text: String,
    pub confidence_signal: Option<f64>,
    pub latency: Duration,
    pub outcome: CaptionOutcome,
}

/// The only artifact crossing the narration output boundary.
#[derive(Debug, Clone)]
pub struct NarrationEntry {
    /// Timestamp of the originating tick's delta, so a consumer can discard
    /// an out-of-order or late caption.
    pub timestamp: f64,
    pub text: String,
    pub metadata: NarrationMetadata,
}

#[derive(Debug, Clone)]
pub struct NarrationMetadata {
    pub tick: u64,
    pub frame_num: u64,
    pub motion_class: MotionClass,
    pub outcome: GuarderOutcome,
    pub severity: Severity,
    pub cache_hit: bool,
    pub latency: Option<Duration>,
}
