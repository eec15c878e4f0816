// THEORY:
// The `blob` module defines the data vocabulary shared by every layer above
// the raw pixel level. A `MotionBlob` is a single, spatially coherent region
// of detected change in one frame; a `FrameDelta` is the complete structured
// result of comparing one frame against its predecessor; a `TrackEvent` is
// the tracker's discrete interpretation of a blob's behavior over time.
//
// Key architectural principles:
// 1.  **Normalized coordinates**: every position and size is expressed in
//     0..1 frame-relative units, so downstream layers never need to know the
//     capture resolution and sessions at different resolutions produce
//     comparable output.
// 2.  **Stateless data containers**: these structs carry no behavior beyond
//     small geometric helpers. A `FrameDelta` is created once per tick by the
//     analysis engine and is immutable afterward; a `TrackEvent` is never
//     mutated after emission.
// 3.  **Identity lives elsewhere**: the analysis engine detects position and
//     shape only and emits blobs with `id = 0`. Stable identities are the
//     tracker's job.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// A 2D point or vector in normalized frame coordinates (0..1).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: Point2D) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }
}

impl std::ops::Sub for Point2D {
    type Output = Point2D;

    fn sub(self, rhs: Point2D) -> Point2D {
        Point2D::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Dominant movement direction of a blob. Ties between the axes are broken
/// in favor of the horizontal axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
    Static,
}

impl Direction {
    /// Classifies a velocity vector. Anything below `min_velocity` is Static.
    pub fn from_velocity(velocity: Point2D, min_velocity: f64) -> Self {
        if velocity.magnitude() < min_velocity {
            return Direction::Static;
        }
        if velocity.x.abs() >= velocity.y.abs() {
            if velocity.x > 0.0 { Direction::Right } else { Direction::Left }
        } else if velocity.y > 0.0 {
            Direction::Down
        } else {
            Direction::Up
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Left => "LEFT",
            Direction::Right => "RIGHT",
            Direction::Up => "UP",
            Direction::Down => "DOWN",
            Direction::Static => "STATIC",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LEFT" => Some(Direction::Left),
            "RIGHT" => Some(Direction::Right),
            "UP" => Some(Direction::Up),
            "DOWN" => Some(Direction::Down),
            "STATIC" => Some(Direction::Static),
            _ => None,
        }
    }

    /// Single-letter form used by the compact timeline.
    pub fn short(&self) -> char {
        match self {
            Direction::Left => 'L',
            Direction::Right => 'R',
            Direction::Up => 'U',
            Direction::Down => 'D',
            Direction::Static => '\u{2022}',
        }
    }
}

/// A single detected motion region within one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionBlob {
    /// Stable identity assigned by the tracker. Zero until tracked.
    pub id: u64,
    /// Centroid in normalized coordinates.
    pub center: Point2D,
    /// Width/height in normalized units.
    pub size: Point2D,
    /// Normalized displacement per tick, filled in by the tracker.
    pub velocity: Point2D,
    /// Region area in pixels, before normalization.
    pub area_px: u32,
    /// Number of boundary points in the extracted contour.
    pub contour_points: u32,
    /// Isoperimetric shape complexity in 0..1.
    pub complexity: f64,
    /// Consecutive frames this identity has been seen.
    pub age_frames: u32,
}

impl MotionBlob {
    pub fn detected(center: Point2D, size: Point2D, area_px: u32, contour_points: u32, complexity: f64) -> Self {
        Self {
            id: 0,
            center,
            size,
            velocity: Point2D::default(),
            area_px,
            contour_points,
            complexity,
            age_frames: 1,
        }
    }
}

/// The structured difference between two consecutive frames. Created once per
/// tick by the motion analysis engine; immutable afterward.
#[derive(Debug, Clone, Default)]
pub struct FrameDelta {
    pub frame_num: u64,
    /// Epoch seconds at analysis time.
    pub timestamp: f64,
    /// Changed-pixel fraction of the frame, in [0, 100].
    pub motion_percent: f64,
    pub changed_pixels: u64,
    pub total_pixels: u64,
    pub blobs: Vec<MotionBlob>,
    /// Low-resolution JPEG snapshot, captured at a throttled rate.
    pub background_thumbnail: Option<Vec<u8>>,
}

/// Model-assigned object label, decided at most once per tracked identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Uppercase class name ("PERSON", "CAT", ...).
    pub label: String,
    pub confidence: f64,
}

/// Discrete event kinds produced by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Appear,
    Enter,
    Exit,
    Move,
    Stationary,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Appear => "APPEAR",
            EventKind::Enter => "ENTER",
            EventKind::Exit => "EXIT",
            EventKind::Move => "MOVE",
            EventKind::Stationary => "STATIONARY",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "APPEAR" => Some(EventKind::Appear),
            "ENTER" => Some(EventKind::Enter),
            "EXIT" => Some(EventKind::Exit),
            "MOVE" => Some(EventKind::Move),
            "STATIONARY" => Some(EventKind::Stationary),
            _ => None,
        }
    }
}

/// A discrete interpretation of one blob's behavior in one tick. At most one
/// event is emitted per blob per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackEvent {
    pub kind: EventKind,
    pub blob_id: u64,
    pub direction: Option<Direction>,
    pub speed: Option<f64>,
}

/// Cumulative tracking record for one identity. Owned exclusively by the
/// tracker and retired when the identity goes unmatched for K ticks.
#[derive(Debug, Clone)]
pub struct TrackHistory {
    pub blob_id: u64,
    pub frames_seen: u32,
    pub total_distance: f64,
    pub avg_speed: f64,
    /// Bounded ring buffer of recent centroid positions.
    pub positions: VecDeque<Point2D>,
}

impl TrackHistory {
    pub fn new(blob_id: u64, first_position: Point2D, window: usize) -> Self {
        let mut positions = VecDeque::with_capacity(window);
        positions.push_back(first_position);
        Self {
            blob_id,
            frames_seen: 1,
            total_distance: 0.0,
            avg_speed: 0.0,
            positions,
        }
    }

    pub fn record(&mut self, position: Point2D, window: usize) {
        if let Some(last) = self.positions.back() {
            self.total_distance += last.distance_to(position);
        }
        self.positions.push_back(position);
        if self.positions.len() > window {
            self.positions.pop_front();
        }
        self.frames_seen += 1;
        self.avg_speed = self.total_distance / f64::from(self.frames_seen);
    }
}
