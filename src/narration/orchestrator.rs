//! The narration orchestrator: decides per sampling tick whether to invoke
//! the model, keeps the fingerprint cache warm, and enforces the one
//! in-flight-call-per-session contract.
//!
//! The analysis loop never waits on this module. `observe` is cheap
//! bookkeeping; `narration_tick` either answers from cache, polls an
//! outstanding dispatch, or spawns a new one and returns immediately.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::{GuarderConfig, OrchestratorConfig};
use crate::core_modules::blob::{FrameDelta, MotionBlob, TrackEvent};
use crate::dsl::{MotionClass, TimelineWindow};
use crate::narration::fallback::fallback_summary;
use crate::narration::guarder::{FilterContext, Guarder, GuarderOutcome, Severity};
use crate::narration::{
    CaptionOutcome, CaptionRequest, CaptionResult, InferenceProvider, NarrationEntry,
    NarrationMetadata,
};

/// Deltas from the tail of the window consulted for recent motion.
const RECENT_MOTION_DELTAS: usize = 5;

/// Identity of the tick a dispatch was issued for. The timestamp is the
/// originating delta's, carried onto the entry so a consumer can drop a late
/// caption.
#[derive(Clone, Copy)]
struct TickStamp {
    frame_num: u64,
    timestamp: f64,
    motion_class: MotionClass,
    fingerprint: u64,
}

/// Bookkeeping for the single outstanding dispatch.
struct InFlight {
    issued_tick: u64,
    stamp: TickStamp,
    rx: oneshot::Receiver<CaptionResult>,
}

pub struct NarrationOrchestrator {
    config: OrchestratorConfig,
    guarder_config: GuarderConfig,
    guarder: Guarder,
    provider: Arc<dyn InferenceProvider>,
    deltas: VecDeque<FrameDelta>,
    timeline: TimelineWindow,
    /// fingerprint -> last accepted caption, session lifetime.
    cache: HashMap<u64, String>,
    last_caption: Option<String>,
    tick: u64,
    in_flight: Option<InFlight>,
    /// Handle of the runtime dispatches run on, captured at construction
    /// when one is ambient.
    runtime: Option<tokio::runtime::Handle>,
}

impl NarrationOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        guarder_config: GuarderConfig,
        provider: Arc<dyn InferenceProvider>,
    ) -> Self {
        Self {
            config,
            guarder: Guarder::new(guarder_config.clone()),
            guarder_config,
            provider,
            deltas: VecDeque::new(),
            timeline: TimelineWindow::new(),
            cache: HashMap::new(),
            last_caption: None,
            tick: 0,
            in_flight: None,
            runtime: tokio::runtime::Handle::try_current().ok(),
        }
    }

    /// Folds one analysis tick into the session window. Runs on every tick
    /// and must stay cheap; no inference decisions happen here.
    pub fn observe(&mut self, delta: &FrameDelta, tracked: &[MotionBlob], events: &[TrackEvent]) {
        let class = self.classify(delta.motion_percent);
        self.timeline.push(delta.frame_num, class, tracked, events);
        self.timeline.prune(delta.frame_num.saturating_sub(100));

        // The window keeps deltas without their thumbnails; timeline building
        // never needs the pixels.
        let mut slim = delta.clone();
        slim.background_thumbnail = None;
        self.deltas.push_back(slim);
        if self.deltas.len() > self.config.delta_window {
            self.deltas.pop_front();
        }
    }

    /// One sampling tick. Returns a narration entry when one is ready this
    /// tick; `None` means quiet scene with a cold cache, or a dispatch still
    /// outstanding.
    pub fn narration_tick(&mut self) -> Option<NarrationEntry> {
        self.tick += 1;
        let latest = self.deltas.back()?.clone();
        let class = self.classify(latest.motion_percent);

        if let Some(inflight) = self.in_flight.take() {
            match self.poll_in_flight(inflight) {
                Polled::Resolved(entry) => return Some(entry),
                Polled::StillPending => return None,
                // Stale result discarded; this tick proceeds normally.
                Polled::Discarded => {}
            }
        }

        let fingerprint = self.fingerprint(class);
        if class == MotionClass::None {
            if let Some(text) = self.cache.get(&fingerprint) {
                debug!(tick = self.tick, "quiet scene, serving cached caption");
                return Some(NarrationEntry {
                    timestamp: latest.timestamp,
                    text: text.clone(),
                    metadata: NarrationMetadata {
                        tick: self.tick,
                        frame_num: latest.frame_num,
                        motion_class: class,
                        outcome: GuarderOutcome::Accept,
                        severity: Severity::Normal,
                        cache_hit: true,
                        latency: None,
                    },
                });
            }
        }

        let stamp = TickStamp {
            frame_num: latest.frame_num,
            timestamp: latest.timestamp,
            motion_class: class,
            fingerprint,
        };
        self.dispatch(stamp)
    }

    fn poll_in_flight(&mut self, mut inflight: InFlight) -> Polled {
        match inflight.rx.try_recv() {
            Ok(result) => {
                let age = self.tick - inflight.issued_tick;
                if age > self.config.stale_after_ticks {
                    debug!(age, "completed result is stale, discarding");
                    Polled::Discarded
                } else {
                    Polled::Resolved(self.resolve(inflight.stamp, result))
                }
            }
            Err(oneshot::error::TryRecvError::Empty) => {
                // One in-flight call per session; never queue a second.
                self.in_flight = Some(inflight);
                Polled::StillPending
            }
            Err(oneshot::error::TryRecvError::Closed) => {
                warn!("dispatch task dropped its result channel");
                Polled::Resolved(self.resolve(inflight.stamp, error_result()))
            }
        }
    }

    /// Runs a completed result through the guarder and produces the entry.
    fn resolve(&mut self, stamp: TickStamp, result: CaptionResult) -> NarrationEntry {
        let fallback = fallback_summary(
            &self.timeline,
            self.guarder_config.mode,
            &self.guarder_config.focus_target,
        );
        let ctx = FilterContext {
            recent_motion: self.recent_motion(),
            fallback_text: &fallback,
        };
        let decision = self.guarder.filter(&result, ctx);

        if decision.outcome == GuarderOutcome::Accept {
            self.cache.insert(stamp.fingerprint, decision.final_text.clone());
            self.last_caption = Some(decision.final_text.clone());
        }

        NarrationEntry {
            timestamp: stamp.timestamp,
            text: decision.final_text,
            metadata: NarrationMetadata {
                tick: self.tick,
                frame_num: stamp.frame_num,
                motion_class: stamp.motion_class,
                outcome: decision.outcome,
                severity: decision.severity,
                cache_hit: false,
                latency: Some(result.latency),
            },
        }
    }

    /// Spawns one bounded inference dispatch. The budget comes from the
    /// configured operation class; a provider that overruns it is abandoned,
    /// not cancelled.
    ///
    /// Without a runtime there is nothing to spawn on; the tick resolves
    /// immediately through the shared fallback path instead of panicking.
    fn dispatch(&mut self, stamp: TickStamp) -> Option<NarrationEntry> {
        let Some(handle) = self
            .runtime
            .clone()
            .or_else(|| tokio::runtime::Handle::try_current().ok())
        else {
            warn!("no async runtime available, narrating from the fallback path");
            return Some(self.resolve(stamp, error_result()));
        };

        let request = CaptionRequest {
            dsl_timeline: self.timeline.render(),
            previous_caption: self.last_caption.clone(),
            focus_target: self.guarder_config.focus_target.clone(),
            mode: self.guarder_config.mode,
            operation: self.config.operation,
        };
        let budget = self.config.timeouts.budget(self.config.operation);
        let provider = Arc::clone(&self.provider);
        let (tx, rx) = oneshot::channel();

        debug!(
            tick = self.tick,
            operation = self.config.operation.as_str(),
            budget_ms = budget.as_millis() as u64,
            "dispatching caption request"
        );
        handle.spawn(async move {
            let started = Instant::now();
            let result = match timeout(budget, provider.infer(&request)).await {
                Ok(Ok(text)) => CaptionResult {
                    raw_text: text,
                    confidence_signal: None,
                    latency: started.elapsed(),
                    outcome: CaptionOutcome::Ok,
                },
                Ok(Err(err)) => {
                    warn!(error = %err, "inference provider failed");
                    CaptionResult {
                        raw_text: String::new(),
                        confidence_signal: None,
                        latency: started.elapsed(),
                        outcome: CaptionOutcome::Error,
                    }
                }
                Err(_) => CaptionResult {
                    raw_text: String::new(),
                    confidence_signal: None,
                    latency: budget,
                    outcome: CaptionOutcome::Timeout,
                },
            };
            let _ = tx.send(result);
        });

        self.in_flight = Some(InFlight { issued_tick: self.tick, stamp, rx });
        None
    }

    /// Whether anything moved lately: a tracked identity covering real
    /// distance, or above-NONE motion anywhere in the recent delta window.
    /// The delta window catches camera-level motion that never produced a
    /// trackable blob.
    fn recent_motion(&self) -> bool {
        self.timeline.moving_count() > 0
            || self
                .deltas
                .iter()
                .rev()
                .take(RECENT_MOTION_DELTAS)
                .any(|d| d.motion_percent >= self.config.none_below)
    }

    fn classify(&self, motion_percent: f64) -> MotionClass {
        MotionClass::classify(
            motion_percent,
            self.config.none_below,
            self.config.low_below,
            self.config.medium_below,
        )
    }

    /// Cache key: the rendered compact timeline plus the motion class. An
    /// unchanged scene hashes to the same fingerprint tick after tick.
    fn fingerprint(&self, class: MotionClass) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.timeline.render().hash(&mut hasher);
        class.hash(&mut hasher);
        hasher.finish()
    }

    /// Ends the session's narration state. The fingerprint cache lives for
    /// the session lifetime and no longer.
    pub fn reset(&mut self) {
        self.deltas.clear();
        self.timeline.clear();
        self.cache.clear();
        self.last_caption = None;
        self.tick = 0;
        self.in_flight = None;
    }
}

enum Polled {
    Resolved(NarrationEntry),
    StillPending,
    Discarded,
}

/// An empty Error-outcome result; guarder rule handling turns it into the
/// deterministic fallback.
fn error_result() -> CaptionResult {
    CaptionResult {
        raw_text: String::new(),
        confidence_signal: None,
        latency: Duration::ZERO,
        outcome: CaptionOutcome::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::error::NarratorError;
    use crate::narration::NarrationMode;

    /// Counting provider with a configurable response and delay.
    struct MockProvider {
        calls: AtomicUsize,
        delay: Duration,
        response: Option<String>,
    }

    impl MockProvider {
        fn quick(text: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                response: Some(text.to_string()),
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
                response: Some("Too late.".to_string()),
            }
        }

        fn failing() -> Self {
            Self { calls: AtomicUsize::new(0), delay: Duration::ZERO, response: None }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InferenceProvider for MockProvider {
        async fn infer(&self, _request: &CaptionRequest) -> crate::error::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.response {
                Some(text) => Ok(text.clone()),
                None => Err(NarratorError::Provider("mock failure".to_string())),
            }
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    fn quiet_delta() -> FrameDelta {
        FrameDelta {
            frame_num: 10,
            timestamp: 1_700_000_000.0,
            motion_percent: 0.1,
            ..FrameDelta::default()
        }
    }

    fn orchestrator(provider: Arc<MockProvider>, timeouts_ms: u64) -> NarrationOrchestrator {
        let mut config = OrchestratorConfig::default();
        config.timeouts.analyze = Duration::from_millis(timeouts_ms);
        NarrationOrchestrator::new(config, GuarderConfig::default(), provider)
    }

    #[tokio::test]
    async fn quiet_scene_uses_cache_after_first_call() {
        let provider = Arc::new(MockProvider::quick("A quiet room."));
        let mut orch = orchestrator(Arc::clone(&provider), 1_000);
        orch.observe(&quiet_delta(), &[], &[]);

        // First tick dispatches, nothing ready yet.
        assert!(orch.narration_tick().is_none());
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Second tick resolves the dispatch and warms the cache.
        let entry = orch.narration_tick().unwrap();
        assert_eq!(entry.text, "A quiet room.");
        assert!(!entry.metadata.cache_hit);

        // Two further NONE-classified ticks: zero additional invocations.
        for _ in 0..2 {
            let entry = orch.narration_tick().unwrap();
            assert!(entry.metadata.cache_hit);
            assert_eq!(entry.text, "A quiet room.");
        }
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn timeout_resolves_through_fallback() {
        let provider = Arc::new(MockProvider::slow(Duration::from_millis(200)));
        let mut orch = orchestrator(Arc::clone(&provider), 20);
        orch.observe(&quiet_delta(), &[], &[]);

        assert!(orch.narration_tick().is_none());
        tokio::time::sleep(Duration::from_millis(60)).await;

        let entry = orch.narration_tick().unwrap();
        assert_eq!(entry.metadata.outcome, GuarderOutcome::Fallback);
        assert_eq!(entry.text, "No activity in the scene.");
        assert_eq!(entry.timestamp, 1_700_000_000.0);
    }

    #[tokio::test]
    async fn provider_error_resolves_through_fallback() {
        let provider = Arc::new(MockProvider::failing());
        let mut orch = orchestrator(Arc::clone(&provider), 1_000);
        orch.observe(&quiet_delta(), &[], &[]);

        assert!(orch.narration_tick().is_none());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let entry = orch.narration_tick().unwrap();
        assert_eq!(entry.metadata.outcome, GuarderOutcome::Fallback);
    }

    #[tokio::test]
    async fn pending_dispatch_never_queues_a_second_call() {
        let provider = Arc::new(MockProvider::slow(Duration::from_millis(100)));
        let mut orch = orchestrator(Arc::clone(&provider), 1_000);
        orch.observe(&quiet_delta(), &[], &[]);

        for _ in 0..4 {
            assert!(orch.narration_tick().is_none());
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn stale_result_is_discarded_not_applied() {
        let provider = Arc::new(MockProvider::slow(Duration::from_millis(50)));
        let mut orch = orchestrator(Arc::clone(&provider), 1_000);
        orch.observe(&quiet_delta(), &[], &[]);

        assert!(orch.narration_tick().is_none());
        // Let the result complete, then age it past stale_after_ticks while
        // it sits unclaimed.
        tokio::time::sleep(Duration::from_millis(80)).await;
        for _ in 0..3 {
            orch.tick += 1;
        }

        // The completed-but-stale result is discarded; this tick re-dispatches.
        assert!(orch.narration_tick().is_none());
        assert_eq!(provider.call_count(), 2);
    }

    #[test]
    fn no_runtime_resolves_through_fallback_without_panicking() {
        let provider = Arc::new(MockProvider::quick("Never reached."));
        let mut orch = orchestrator(Arc::clone(&provider), 1_000);
        orch.observe(&quiet_delta(), &[], &[]);

        // No Tokio runtime anywhere in this test: the tick must still
        // produce an entry instead of panicking.
        let entry = orch.narration_tick().unwrap();
        assert_eq!(entry.metadata.outcome, GuarderOutcome::Fallback);
        assert_eq!(entry.text, "No activity in the scene.");
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn delta_window_motion_blocks_the_absence_rule() {
        // The model claims absence while the recent deltas show motion that
        // never produced a trackable blob. The absence rule must not fire.
        let provider = Arc::new(MockProvider::quick("PRESENT: NO\nNobody around."));
        let guarder_config = GuarderConfig {
            mode: NarrationMode::Track,
            ..GuarderConfig::default()
        };
        let mut orch = NarrationOrchestrator::new(
            OrchestratorConfig::default(),
            guarder_config,
            Arc::clone(&provider) as Arc<dyn InferenceProvider>,
        );
        for n in 0..4 {
            let delta = FrameDelta {
                frame_num: n + 1,
                timestamp: 1_700_000_000.0 + n as f64,
                motion_percent: 5.0,
                ..FrameDelta::default()
            };
            orch.observe(&delta, &[], &[]);
        }

        assert!(orch.narration_tick().is_none());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let entry = orch.narration_tick().unwrap();
        // Accepted verbatim, not rewritten into an absence statement.
        assert_eq!(entry.metadata.outcome, GuarderOutcome::Accept);
        assert_eq!(entry.text, "PRESENT: NO\nNobody around.");
    }

    #[tokio::test]
    async fn track_mode_detection_survives_generic_suppression() {
        let provider = Arc::new(MockProvider::quick(
            "PRESENT: YES\nCONFIDENCE: HIGH\nThe person is crossing the room.",
        ));
        let mut config = OrchestratorConfig::default();
        config.operation = crate::narration::OperationClass::AnalyzeWithTracking;
        let guarder_config = GuarderConfig {
            mode: NarrationMode::Track,
            ..GuarderConfig::default()
        };
        let mut orch = NarrationOrchestrator::new(config, guarder_config, provider);
        orch.observe(&quiet_delta(), &[], &[]);

        assert!(orch.narration_tick().is_none());
        tokio::time::sleep(Duration::from_millis(20)).await;

        let entry = orch.narration_tick().unwrap();
        assert_eq!(entry.metadata.outcome, GuarderOutcome::Accept);
        assert_eq!(entry.metadata.severity, Severity::High);
        assert!(entry.text.contains("person is crossing"));
    }
}
