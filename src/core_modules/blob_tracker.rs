// THEORY:
// The `blob_tracker` module assigns stable identities to the anonymous blobs
// the analyzer produces and interprets their motion as discrete events. It is
// the bridge between "a region changed here" and "object #7 moved left".
//
// Matching is greedy nearest-cost: every (track, detection) pair is scored by
// centroid distance plus a weighted relative area difference, pairs are
// consumed in ascending cost order, and anything above the cost ceiling
// starts a fresh identity instead. This is deliberately not Hungarian
// assignment; with the handful of blobs a real scene produces, greedy
// matching is indistinguishable in practice and trivially debuggable.
//
// Each identity carries a cumulative `TrackHistory` and emits at most one
// event per tick, chosen by fixed priority:
//   APPEAR > ENTER/EXIT > MOVE > STATIONARY.

use std::collections::HashMap;

use tracing::debug;

use crate::config::TrackerConfig;
use crate::core_modules::blob::{
    Direction, EventKind, FrameDelta, MotionBlob, Point2D, TrackEvent, TrackHistory,
};

/// Internal per-identity state.
#[derive(Debug, Clone)]
struct Track {
    blob: MotionBlob,
    history: TrackHistory,
    missed_ticks: u32,
    moving_streak: u32,
    still_streak: u32,
    stationary_reported: bool,
}

pub struct BlobTracker {
    config: TrackerConfig,
    tracks: HashMap<u64, Track>,
    next_id: u64,
}

impl BlobTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: HashMap::new(),
            next_id: 1,
        }
    }

    /// Matches one tick's detections against the live registry. Returns the
    /// detections with identities and velocities filled in, plus the events
    /// this tick produced.
    pub fn update(&mut self, delta: &FrameDelta) -> (Vec<MotionBlob>, Vec<TrackEvent>) {
        let detections = &delta.blobs;
        let assignments = self.match_detections(detections);

        let mut tracked = Vec::with_capacity(detections.len());
        let mut events = Vec::new();
        let mut matched_tracks: Vec<u64> = Vec::new();

        for (det_idx, detection) in detections.iter().enumerate() {
            match assignments.get(&det_idx) {
                Some(&track_id) => {
                    matched_tracks.push(track_id);
                    if let Some(blob) = self.continue_track(track_id, detection, &mut events) {
                        tracked.push(blob);
                    }
                }
                None => {
                    let blob = self.spawn_track(detection);
                    events.push(TrackEvent {
                        kind: EventKind::Appear,
                        blob_id: blob.id,
                        direction: None,
                        speed: None,
                    });
                    tracked.push(blob);
                }
            }
        }

        self.age_unmatched(&matched_tracks, &mut events);
        (tracked, events)
    }

    /// Greedy cost assignment: detection index -> track id.
    fn match_detections(&self, detections: &[MotionBlob]) -> HashMap<usize, u64> {
        let mut pairs: Vec<(f64, usize, u64)> = Vec::new();
        for (det_idx, det) in detections.iter().enumerate() {
            for (&track_id, track) in &self.tracks {
                let cost = match_cost(&track.blob, det);
                if cost <= self.config.match_cost_threshold {
                    pairs.push((cost, det_idx, track_id));
                }
            }
        }
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut assigned = HashMap::new();
        let mut used_tracks: Vec<u64> = Vec::new();
        for (_, det_idx, track_id) in pairs {
            if assigned.contains_key(&det_idx) || used_tracks.contains(&track_id) {
                continue;
            }
            assigned.insert(det_idx, track_id);
            used_tracks.push(track_id);
        }
        assigned
    }

    fn spawn_track(&mut self, detection: &MotionBlob) -> MotionBlob {
        let id = self.next_id;
        self.next_id += 1;

        let mut blob = detection.clone();
        blob.id = id;
        blob.age_frames = 1;

        self.tracks.insert(
            id,
            Track {
                blob: blob.clone(),
                history: TrackHistory::new(id, blob.center, self.config.position_window),
                missed_ticks: 0,
                moving_streak: 0,
                still_streak: 0,
                stationary_reported: false,
            },
        );
        debug!(blob_id = id, "new track");
        blob
    }

    /// Advances a matched identity and emits at most one event for it.
    fn continue_track(
        &mut self,
        track_id: u64,
        detection: &MotionBlob,
        events: &mut Vec<TrackEvent>,
    ) -> Option<MotionBlob> {
        let track = self.tracks.get_mut(&track_id)?;

        let velocity = detection.center - track.blob.center;
        let speed = velocity.magnitude();

        let mut blob = detection.clone();
        blob.id = track_id;
        blob.velocity = velocity;
        blob.age_frames = track.blob.age_frames + 1;

        track.blob = blob.clone();
        track.missed_ticks = 0;
        track.history.record(blob.center, self.config.position_window);

        if speed >= self.config.min_velocity {
            track.moving_streak += 1;
            track.still_streak = 0;
            track.stationary_reported = false;
        } else {
            track.moving_streak = 0;
            track.still_streak += 1;
        }

        let direction = Direction::from_velocity(velocity, self.config.min_velocity);

        // Border crossings outrank plain movement.
        if let Some(kind) = self.border_event(blob.center, velocity) {
            events.push(TrackEvent {
                kind,
                blob_id: track_id,
                direction: Some(direction),
                speed: Some(speed),
            });
            return Some(blob);
        }

        let track = self.tracks.get_mut(&track_id)?;
        if speed >= self.config.min_velocity {
            if track.moving_streak >= self.config.min_moving_frames {
                events.push(TrackEvent {
                    kind: EventKind::Move,
                    blob_id: track_id,
                    direction: Some(direction),
                    speed: Some(speed),
                });
            }
        } else if track.still_streak == self.config.stationary_after && !track.stationary_reported {
            track.stationary_reported = true;
            events.push(TrackEvent {
                kind: EventKind::Stationary,
                blob_id: track_id,
                direction: None,
                speed: None,
            });
        }
        Some(blob)
    }

    /// ENTER/EXIT classification for a blob sitting inside the edge margin:
    /// velocity pointing toward the nearest edge is an exit in progress,
    /// pointing away is an entry.
    fn border_event(&self, center: Point2D, velocity: Point2D) -> Option<EventKind> {
        let m = self.config.edge_margin;
        if velocity.magnitude() < self.config.min_velocity {
            return None;
        }

        let outward = if center.x < m {
            Some(velocity.x < 0.0)
        } else if center.x > 1.0 - m {
            Some(velocity.x > 0.0)
        } else if center.y < m {
            Some(velocity.y < 0.0)
        } else if center.y > 1.0 - m {
            Some(velocity.y > 0.0)
        } else {
            None
        };

        outward.map(|out| if out { EventKind::Exit } else { EventKind::Enter })
    }

    /// Ages every unmatched track, retiring those missed for too long. A
    /// track retired inside the edge margin left the frame.
    fn age_unmatched(&mut self, matched: &[u64], events: &mut Vec<TrackEvent>) {
        let m = self.config.edge_margin;
        let max_missed = self.config.max_missed_ticks;
        let mut retired = Vec::new();

        for (&id, track) in &mut self.tracks {
            if matched.contains(&id) {
                continue;
            }
            track.missed_ticks += 1;
            if track.missed_ticks > max_missed {
                retired.push(id);
            }
        }

        for id in retired {
            if let Some(track) = self.tracks.remove(&id) {
                let c = track.blob.center;
                let at_edge = c.x < m || c.x > 1.0 - m || c.y < m || c.y > 1.0 - m;
                debug!(blob_id = id, at_edge, "track retired");
                if at_edge {
                    events.push(TrackEvent {
                        kind: EventKind::Exit,
                        blob_id: id,
                        direction: None,
                        speed: None,
                    });
                }
            }
        }
    }

    /// Histories of currently live identities, for the tracking summary.
    pub fn histories(&self) -> Vec<&TrackHistory> {
        let mut out: Vec<&TrackHistory> = self.tracks.values().map(|t| &t.history).collect();
        out.sort_by_key(|h| h.blob_id);
        out
    }

    pub fn active_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = 1;
    }
}

/// Centroid distance plus weighted relative area difference.
fn match_cost(a: &MotionBlob, b: &MotionBlob) -> f64 {
    let dist = a.center.distance_to(b.center);
    let max_area = a.area_px.max(b.area_px).max(1);
    let area_diff = f64::from(a.area_px.abs_diff(b.area_px)) / f64::from(max_area);
    dist + 0.3 * area_diff
}
