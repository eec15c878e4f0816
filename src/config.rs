// THEORY:
// Every tunable in the engine lives in an explicit configuration struct that
// is handed to the owning component at construction time. There are no
// process-wide globals or module-level mutable thresholds: two sessions with
// different configs can run side by side in one process without cross-talk.
//
// The `Default` impls carry the field-tested constants; callers override only
// what they need with struct-update syntax.

use std::time::Duration;

use crate::narration::{NarrationMode, OperationClass};

/// Configuration for the motion analysis engine (frame differencing layer).
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Per-pixel absolute difference required to count as changed.
    pub motion_threshold: u8,
    /// Components smaller than this many pixels are discarded as noise.
    pub min_blob_area: u32,
    /// Bounding boxes covering more than this fraction of the frame are
    /// treated as global lighting changes, not objects.
    pub max_blob_size_ratio: f64,
    /// Normalized displacement per tick below which a blob is considered
    /// static sensor noise.
    pub min_velocity: f64,
    /// Consecutive moving detections required before a blob is established.
    pub min_moving_frames: u32,
    /// Motion percentage at or above which the whole frame is treated as a
    /// camera move: motion level is reported, blobs are not.
    pub camera_motion_threshold: f64,
    /// Gap in pixels within which nearby motion rects are merged into one.
    /// `None` derives max(20, 1% of the smaller frame dimension).
    pub merge_gap_px: Option<u32>,
    /// Upper bound on blobs reported per tick (largest first).
    pub max_blobs: usize,
    /// Longest side of the background thumbnail, in pixels.
    pub thumbnail_px: u32,
    /// Minimum wall-clock spacing between thumbnail captures.
    pub thumbnail_interval: Duration,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            motion_threshold: 20,
            min_blob_area: 500,
            max_blob_size_ratio: 0.7,
            min_velocity: 0.01,
            min_moving_frames: 2,
            camera_motion_threshold: 40.0,
            merge_gap_px: None,
            max_blobs: 20,
            thumbnail_px: 128,
            thumbnail_interval: Duration::from_secs(2),
        }
    }
}

/// Configuration for the blob tracker (identity assignment layer).
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Maximum combined match cost (centroid distance + weighted size
    /// difference) for a detection to continue an existing identity.
    pub match_cost_threshold: f64,
    /// Ticks an identity may go unmatched before it is retired (K).
    pub max_missed_ticks: u32,
    /// Normalized distance from a frame edge inside which ENTER/EXIT apply.
    pub edge_margin: f64,
    /// Displacement per tick below this is not considered movement.
    pub min_velocity: f64,
    /// Consecutive moving ticks required before MOVE events are emitted.
    pub min_moving_frames: u32,
    /// Consecutive sub-threshold ticks after which STATIONARY is emitted (M).
    pub stationary_after: u32,
    /// Ring-buffer capacity of the per-identity position window.
    pub position_window: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            match_cost_threshold: 0.8,
            max_missed_ticks: 5,
            edge_margin: 0.1,
            min_velocity: 0.01,
            min_moving_frames: 2,
            stationary_after: 3,
            position_window: 32,
        }
    }
}

/// Per-operation-class inference budgets. Each class carries its own timeout,
/// enforced independently of the others.
#[derive(Debug, Clone)]
pub struct OperationTimeouts {
    pub presence_check: Duration,
    pub change_check: Duration,
    pub summarize: Duration,
    pub validate: Duration,
    pub analyze: Duration,
    pub analyze_with_tracking: Duration,
}

impl OperationTimeouts {
    pub fn budget(&self, op: OperationClass) -> Duration {
        match op {
            OperationClass::PresenceCheck => self.presence_check,
            OperationClass::ChangeCheck => self.change_check,
            OperationClass::Summarize => self.summarize,
            OperationClass::Validate => self.validate,
            OperationClass::Analyze => self.analyze,
            OperationClass::AnalyzeWithTracking => self.analyze_with_tracking,
        }
    }
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self {
            presence_check: Duration::from_secs(10),
            change_check: Duration::from_secs(8),
            summarize: Duration::from_secs(15),
            validate: Duration::from_secs(12),
            analyze: Duration::from_secs(30),
            analyze_with_tracking: Duration::from_secs(45),
        }
    }
}

/// Configuration for the narration orchestrator (sampling layer).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Motion percent below which the scene is classified NONE.
    pub none_below: f64,
    /// Motion percent below which the scene is classified LOW.
    pub low_below: f64,
    /// Motion percent below which the scene is classified MEDIUM.
    pub medium_below: f64,
    /// Bound on the window of recent deltas kept for timeline building.
    pub delta_window: usize,
    /// A completed result older than this many sampling ticks is stale and
    /// discarded on arrival.
    pub stale_after_ticks: u64,
    /// What to ask the model for on a regular sampling tick.
    pub operation: OperationClass,
    pub timeouts: OperationTimeouts,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            none_below: 0.5,
            low_below: 10.0,
            medium_below: 50.0,
            delta_window: 30,
            stale_after_ticks: 3,
            operation: OperationClass::Analyze,
            timeouts: OperationTimeouts::default(),
        }
    }
}

/// Configuration for the guarder decision layer.
#[derive(Debug, Clone)]
pub struct GuarderConfig {
    pub mode: NarrationMode,
    /// What the session is watching for ("person", "vehicle", ...).
    pub focus_target: String,
    /// Confidence at or above which a track-mode detection is accepted
    /// verbatim, bypassing generic suppression.
    pub confident_present: f64,
    /// Confidence at or below which an explicit absence statement is accepted
    /// when tracking agrees nothing is moving.
    pub confident_absent: f64,
}

impl Default for GuarderConfig {
    fn default() -> Self {
        Self {
            mode: NarrationMode::General,
            focus_target: "person".to_string(),
            confident_present: 0.8,
            confident_absent: 0.2,
        }
    }
}

/// Configuration for the once-per-identity object classifier.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub enabled: bool,
    /// Ticks an identity must survive before the model is asked what it is.
    pub min_frames_before_classify: u32,
    /// Budget for one classification call. Classification rides alongside
    /// narration, so this is kept much tighter than the caption timeouts.
    pub timeout: Duration,
    /// Normalized padding added around the blob's bounding box when cropping.
    pub crop_padding: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_frames_before_classify: 3,
            timeout: Duration::from_secs(5),
            crop_padding: 0.1,
        }
    }
}

/// Aggregate configuration for a whole narrator session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub analyzer: AnalyzerConfig,
    pub tracker: TrackerConfig,
    pub orchestrator: OrchestratorConfig,
    pub guarder: GuarderConfig,
    pub classifier: ClassifierConfig,
    /// Per-subscriber buffer of the realtime broadcast sink.
    pub broadcast_buffer: usize,
    /// Analysis ticks between narration sampling ticks. Sampling is
    /// deliberately slower than capture.
    pub sample_every_frames: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            analyzer: AnalyzerConfig::default(),
            tracker: TrackerConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            guarder: GuarderConfig::default(),
            classifier: ClassifierConfig::default(),
            broadcast_buffer: 64,
            sample_every_frames: 10,
        }
    }
}

impl SessionConfig {
    pub fn track(focus: impl Into<String>) -> Self {
        Self {
            guarder: GuarderConfig {
                mode: NarrationMode::Track,
                focus_target: focus.into(),
                ..GuarderConfig::default()
            },
            orchestrator: OrchestratorConfig {
                operation: OperationClass::AnalyzeWithTracking,
                ..OrchestratorConfig::default()
            },
            ..Self::default()
        }
    }
}
