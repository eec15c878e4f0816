//! Lossy multi-frame timeline used as model context. Coordinates are dropped
//! in favor of qualitative trajectory labels so a multi-second window stays
//! under a few hundred bytes of prompt.

use std::collections::{HashMap, VecDeque};

use crate::core_modules::blob::{Direction, EventKind, MotionBlob, TrackEvent};

/// Qualitative motion level of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionClass {
    None,
    Low,
    Medium,
    High,
}

impl MotionClass {
    /// Classifies a motion percentage against the configured thresholds.
    pub fn classify(motion_percent: f64, none_below: f64, low_below: f64, medium_below: f64) -> Self {
        if motion_percent < none_below {
            MotionClass::None
        } else if motion_percent < low_below {
            MotionClass::Low
        } else if motion_percent < medium_below {
            MotionClass::Medium
        } else {
            MotionClass::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MotionClass::None => "NONE",
            MotionClass::Low => "LOW",
            MotionClass::Medium => "MED",
            MotionClass::High => "HIGH",
        }
    }
}

/// Cumulative trajectory of one tracked identity within the window.
#[derive(Debug, Clone)]
struct ObjectTrace {
    first_frame: u64,
    last_frame: u64,
    /// Direction sequence with consecutive duplicates collapsed.
    path: Vec<Direction>,
    total_distance: f64,
}

/// Per-frame activity tag.
#[derive(Debug, Clone)]
struct FrameTag {
    frame_num: u64,
    class: MotionClass,
    appeared: Vec<u64>,
    moved: Vec<(u64, Direction)>,
    departed: Vec<u64>,
}

/// Distance above which a trace reads as real movement.
const MOVING_DIST: f64 = 0.1;
/// Distance above which a trace reads as slight movement.
const SLIGHT_DIST: f64 = 0.02;
/// Frame tags kept in the rendered window.
const TAG_WINDOW: usize = 6;
/// Object summaries kept, sorted by distance traveled.
const MAX_OBJECTS: usize = 5;
/// Direction legs shown per object before the path is elided.
const MAX_PATH_LEGS: usize = 4;
/// Per-frame moves shown before the list is elided.
const MAX_MOVES_SHOWN: usize = 3;

/// Sliding aggregation of recent-tick activity, rendered on demand.
pub struct TimelineWindow {
    tags: VecDeque<FrameTag>,
    traces: HashMap<u64, ObjectTrace>,
}

impl TimelineWindow {
    pub fn new() -> Self {
        Self { tags: VecDeque::new(), traces: HashMap::new() }
    }

    /// Folds one tick into the window. `blobs` must already carry tracker
    /// identities and velocities.
    pub fn push(&mut self, frame_num: u64, class: MotionClass, blobs: &[MotionBlob], events: &[TrackEvent]) {
        for blob in blobs {
            let trace = self.traces.entry(blob.id).or_insert_with(|| ObjectTrace {
                first_frame: frame_num,
                last_frame: frame_num,
                path: Vec::new(),
                total_distance: 0.0,
            });
            trace.last_frame = frame_num;
            trace.total_distance += blob.velocity.magnitude();

            let dir = Direction::from_velocity(blob.velocity, 1e-9);
            if dir != Direction::Static && trace.path.last() != Some(&dir) {
                trace.path.push(dir);
            }
        }

        let mut tag = FrameTag {
            frame_num,
            class,
            appeared: Vec::new(),
            moved: Vec::new(),
            departed: Vec::new(),
        };
        for event in events {
            match event.kind {
                EventKind::Appear | EventKind::Enter => tag.appeared.push(event.blob_id),
                EventKind::Exit => tag.departed.push(event.blob_id),
                EventKind::Move => {
                    if let Some(dir) = event.direction {
                        tag.moved.push((event.blob_id, dir));
                    }
                }
                EventKind::Stationary => {}
            }
        }

        self.tags.push_back(tag);
        if self.tags.len() > TAG_WINDOW {
            self.tags.pop_front();
        }
    }

    /// Renders the compact form: scene class, object summaries, frame tags.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(320);
        out.push_str("scene=");
        out.push_str(self.scene_class());
        out.push('\n');

        let mut traces: Vec<(&u64, &ObjectTrace)> = self.traces.iter().collect();
        traces.sort_by(|a, b| b.1.total_distance.total_cmp(&a.1.total_distance));
        for (id, trace) in traces.into_iter().take(MAX_OBJECTS) {
            let path = if trace.path.is_empty() {
                "stationary".to_string()
            } else {
                let mut legs: Vec<String> =
                    trace.path.iter().take(MAX_PATH_LEGS).map(|d| d.short().to_string()).collect();
                if trace.path.len() > MAX_PATH_LEGS {
                    legs.push("..".to_string());
                }
                legs.join("\u{2192}")
            };
            out.push_str(&format!(
                "#{id}: F{}-{}, {path}, dist={:.2}, {}\n",
                trace.first_frame,
                trace.last_frame,
                trace.total_distance,
                movement_label(trace.total_distance)
            ));
        }

        for tag in &self.tags {
            out.push_str(&format!("F{}: {}", tag.frame_num, tag.class.as_str()));
            if !tag.appeared.is_empty() {
                out.push_str(" +");
                out.push_str(&ids(&tag.appeared));
            }
            if !tag.moved.is_empty() {
                let mut moves: Vec<String> = tag
                    .moved
                    .iter()
                    .take(MAX_MOVES_SHOWN)
                    .map(|(id, d)| format!("#{id}{}", d.short()))
                    .collect();
                if tag.moved.len() > MAX_MOVES_SHOWN {
                    moves.push("..".to_string());
                }
                out.push_str(&format!(" [{}]", moves.join(" ")));
            }
            if !tag.departed.is_empty() {
                out.push_str(" -");
                out.push_str(&ids(&tag.departed));
            }
            out.push('\n');
        }
        out
    }

    /// Coarse one-word scene description derived from the window.
    pub fn scene_class(&self) -> &'static str {
        let moving = self.moving_count();
        let high_frames = self.tags.iter().filter(|t| t.class == MotionClass::High).count();

        if self.traces.is_empty() && self.tags.iter().all(|t| t.class == MotionClass::None) {
            "empty_scene"
        } else if high_frames * 2 > self.tags.len().max(1) || moving > 4 {
            "high_activity"
        } else if moving > 1 {
            "multi_activity"
        } else if moving == 1 {
            "single_traversal"
        } else if self.traces.values().any(|t| t.total_distance >= SLIGHT_DIST) {
            "low_activity"
        } else {
            "static_scene"
        }
    }

    /// Identities seen anywhere in the window.
    pub fn object_count(&self) -> usize {
        self.traces.len()
    }

    /// Identities whose cumulative distance reads as real movement.
    pub fn moving_count(&self) -> usize {
        self.traces
            .values()
            .filter(|t| t.total_distance >= MOVING_DIST)
            .count()
    }

    /// Drops traces not seen since `before_frame`, keeping the map bounded
    /// over long sessions.
    pub fn prune(&mut self, before_frame: u64) {
        self.traces.retain(|_, t| t.last_frame >= before_frame);
    }

    pub fn clear(&mut self) {
        self.tags.clear();
        self.traces.clear();
    }
}

impl Default for TimelineWindow {
    fn default() -> Self {
        Self::new()
    }
}

fn movement_label(dist: f64) -> &'static str {
    if dist >= MOVING_DIST {
        "moving"
    } else if dist >= SLIGHT_DIST {
        "slight_movement"
    } else {
        "stationary"
    }
}

fn ids(ids: &[u64]) -> String {
    ids.iter().map(|i| format!("#{i}")).collect::<Vec<_>>().join(",")
}
