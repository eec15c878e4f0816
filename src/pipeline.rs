// THEORY:
// The `pipeline` module wires the layers into one session object. A
// `NarratorSession` owns the analyzer, tracker, encoder state, broadcaster,
// and orchestrator for exactly one camera; two sessions in one process share
// nothing and cannot cross-talk.
//
// The cadence contract lives here: capture, analysis, tracking, and DSL
// broadcast run synchronously on every tick and never wait on inference.
// Narration sampling runs every `sample_every_frames` ticks and only ever
// does cheap bookkeeping in this loop; the expensive call happens on a
// spawned task the orchestrator polls.

use std::sync::Arc;

use image::GrayImage;
use tracing::{debug, info};

use crate::broadcast::{DslBroadcaster, DslEnvelope};
use crate::config::SessionConfig;
use crate::core_modules::blob::{Classification, FrameDelta, TrackEvent};
use crate::core_modules::blob_tracker::BlobTracker;
use crate::core_modules::motion_analyzer::MotionAnalyzer;
use crate::dsl::encoder::encode_block;
use crate::error::Result;
use crate::narration::classifier::{crop_blob_jpeg, BlobClassifier};
use crate::narration::{InferenceProvider, NarrationEntry, NarrationOrchestrator};

/// One captured frame. The buffer is borrowed by the core for a single
/// analysis cycle; ownership stays with the capture collaborator.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: GrayImage,
    /// Epoch seconds at capture time.
    pub timestamp: f64,
}

/// Pull interface over whatever produces frames. Reconnect and buffering
/// policy belong to the implementor; an `Err` here is fatal to the session.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Everything one analysis tick produced.
#[derive(Debug, Clone)]
pub struct TickOutput {
    pub delta: FrameDelta,
    pub events: Vec<TrackEvent>,
    pub dsl_block: String,
}

pub struct NarratorSession {
    config: SessionConfig,
    analyzer: MotionAnalyzer,
    tracker: BlobTracker,
    broadcaster: DslBroadcaster,
    orchestrator: NarrationOrchestrator,
    classifier: BlobClassifier,
    provider: Arc<dyn InferenceProvider>,
    /// The one classification allowed in flight: (blob id, pending answer).
    classify_rx: Option<(u64, tokio::sync::oneshot::Receiver<Classification>)>,
    frames_processed: u64,
}

impl NarratorSession {
    pub fn new(config: SessionConfig, provider: Arc<dyn InferenceProvider>) -> Self {
        Self {
            analyzer: MotionAnalyzer::new(config.analyzer.clone()),
            tracker: BlobTracker::new(config.tracker.clone()),
            broadcaster: DslBroadcaster::new(config.broadcast_buffer),
            orchestrator: NarrationOrchestrator::new(
                config.orchestrator.clone(),
                config.guarder.clone(),
                Arc::clone(&provider),
            ),
            classifier: BlobClassifier::new(config.classifier.clone()),
            provider,
            classify_rx: None,
            config,
            frames_processed: 0,
        }
    }

    /// Registers a live DSL subscriber.
    pub fn subscribe(&mut self) -> tokio::sync::mpsc::Receiver<DslEnvelope> {
        self.broadcaster.subscribe()
    }

    /// One synchronous analysis tick: analyze, track, encode, broadcast,
    /// book-keep. Never blocks on inference.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<TickOutput> {
        self.poll_classification();

        let mut delta = self.analyzer.analyze(&frame.image, frame.timestamp)?;
        let (tracked, events) = self.tracker.update(&delta);
        delta.blobs = tracked;

        let live: Vec<u64> = self.tracker.histories().iter().map(|h| h.blob_id).collect();
        self.classifier.retain_live(&live);
        self.maybe_dispatch_classification(&frame.image, &delta);
        let classes = self.classifier.known(&delta.blobs);

        let histories = self.tracker.histories();
        let dsl_block = encode_block(&delta, &events, &histories, &classes);

        self.broadcaster.publish(DslEnvelope {
            frame_num: delta.frame_num,
            timestamp: delta.timestamp,
            dsl_block: dsl_block.clone(),
        });
        self.orchestrator.observe(&delta, &delta.blobs, &events);

        self.frames_processed += 1;
        Ok(TickOutput { delta, events, dsl_block })
    }

    /// Collects a finished classification, if one arrived since last tick.
    fn poll_classification(&mut self) {
        use tokio::sync::oneshot::error::TryRecvError;

        let Some((blob_id, rx)) = &mut self.classify_rx else {
            return;
        };
        match rx.try_recv() {
            Ok(class) => {
                let blob_id = *blob_id;
                debug!(blob_id, label = %class.label, "classification settled");
                self.classifier.record(blob_id, class);
                self.classify_rx = None;
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Closed) => self.classify_rx = None,
        }
    }

    /// Asks the model what one newly stable blob is. At most one request is
    /// in flight; without an async runtime the question is silently skipped
    /// and asked again on a later tick.
    fn maybe_dispatch_classification(&mut self, image: &GrayImage, delta: &FrameDelta) {
        if self.classify_rx.is_some() {
            return;
        }
        let eligible: Vec<u64> = delta
            .blobs
            .iter()
            .map(|b| b.id)
            .filter(|id| self.classifier.should_classify(*id))
            .collect();
        let Some(&blob_id) = eligible.first() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let Some(blob) = delta.blobs.iter().find(|b| b.id == blob_id) else {
            return;
        };

        let jpeg = match crop_blob_jpeg(image, blob, self.config.classifier.crop_padding) {
            Ok(jpeg) => jpeg,
            Err(err) => {
                debug!(blob_id, error = %err, "blob crop failed, skipping classification");
                return;
            }
        };

        let provider = Arc::clone(&self.provider);
        let budget = self.config.classifier.timeout;
        let (tx, rx) = tokio::sync::oneshot::channel();
        handle.spawn(async move {
            let class = match tokio::time::timeout(budget, provider.classify(&jpeg)).await {
                Ok(Ok(answer)) => BlobClassifier::parse_label(&answer),
                Ok(Err(err)) => {
                    debug!(blob_id, error = %err, "classification failed");
                    Classification { label: "UNKNOWN".to_string(), confidence: 0.0 }
                }
                Err(_) => {
                    debug!(blob_id, "classification timed out");
                    Classification { label: "UNKNOWN".to_string(), confidence: 0.0 }
                }
            };
            let _ = tx.send(class);
        });
        self.classify_rx = Some((blob_id, rx));
    }

    /// One narration sampling tick; forwards the orchestrator's answer.
    pub fn narration_tick(&mut self) -> Option<NarrationEntry> {
        self.orchestrator.narration_tick()
    }

    /// Drives a frame source to exhaustion, sampling narration every
    /// `sample_every_frames` ticks. Capture errors are fatal and surface to
    /// the caller; end of stream ends the session normally.
    pub fn run<F>(&mut self, source: &mut dyn FrameSource, mut on_entry: F) -> Result<()>
    where
        F: FnMut(NarrationEntry),
    {
        loop {
            let Some(frame) = source.next_frame()? else {
                info!(frames = self.frames_processed, "frame source finished");
                self.end();
                return Ok(());
            };
            self.process_frame(&frame)?;

            let every = self.config.sample_every_frames.max(1);
            if self.frames_processed % every == 0 {
                if let Some(entry) = self.narration_tick() {
                    debug!(tick = entry.metadata.tick, "narration entry produced");
                    on_entry(entry);
                }
            }
        }
    }

    /// Clears all per-session state, including the fingerprint cache.
    pub fn end(&mut self) {
        self.analyzer.reset();
        self.tracker.reset();
        self.orchestrator.reset();
        self.classifier.reset();
        self.classify_rx = None;
        self.frames_processed = 0;
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }
}
