//! Verbose DSL decoding. Line-prefix dispatch; anything unrecognized or
//! malformed is skipped so one bad line never poisons the rest of a block.

use tracing::debug;

use crate::core_modules::blob::{Classification, Direction, EventKind, MotionBlob, Point2D, TrackEvent};

/// One decoded FRAME block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedFrame {
    pub frame_num: u64,
    /// Wall-clock label exactly as it appeared in the header.
    pub time_label: String,
    pub motion_percent: f64,
    pub regions: usize,
    pub blobs: Vec<MotionBlob>,
    pub events: Vec<TrackEvent>,
    pub tracks: Vec<TrackSummary>,
    pub classes: Vec<(u64, Classification)>,
}

/// Decoded TRACK line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackSummary {
    pub blob_id: u64,
    pub frames: u32,
    pub dist: f64,
    pub speed: f64,
}

/// Decodes a stream of DSL text into frames. A FRAME header opens a new
/// block; lines arriving before any header are ignored.
pub fn decode(input: &str) -> Vec<DecodedFrame> {
    let mut frames: Vec<DecodedFrame> = Vec::new();

    for raw in input.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let prefix = line.split_whitespace().next().unwrap_or("");

        if prefix == "FRAME" {
            if let Some(frame) = parse_frame_header(line) {
                frames.push(frame);
            } else {
                debug!(line, "malformed FRAME header, skipped");
            }
            continue;
        }

        let Some(current) = frames.last_mut() else {
            debug!(line, "line before FRAME header, skipped");
            continue;
        };

        let parsed = match prefix {
            "DELTA" => parse_delta(line, current),
            "BLOB" => parse_blob(line, current),
            "EDGE" => parse_edge(line, current),
            "CLASS" => parse_class(line, current),
            "EVENT" => parse_event(line, current),
            "TRACK" => parse_track(line, current),
            _ => {
                debug!(line, "unknown line prefix, skipped");
                Some(())
            }
        };
        if parsed.is_none() {
            debug!(line, "malformed line, skipped");
        }
    }

    frames
}

/// `FRAME <n> @ <label>`
fn parse_frame_header(line: &str) -> Option<DecodedFrame> {
    let mut parts = line.split_whitespace();
    parts.next();
    let frame_num = parts.next()?.parse().ok()?;
    let at = parts.next()?;
    if at != "@" {
        return None;
    }
    Some(DecodedFrame {
        frame_num,
        time_label: parts.next().unwrap_or("").to_string(),
        ..DecodedFrame::default()
    })
}

fn parse_delta(line: &str, frame: &mut DecodedFrame) -> Option<()> {
    let pct = field(line, "motion_pct")?;
    frame.motion_percent = pct.strip_suffix('%')?.parse().ok()?;
    frame.regions = field(line, "regions")?.parse().ok()?;
    Some(())
}

fn parse_blob(line: &str, frame: &mut DecodedFrame) -> Option<()> {
    let id = field(line, "id")?.parse().ok()?;
    let (cx, cy) = pair(field(line, "pos")?)?;
    let (w, h) = pair(field(line, "size")?)?;
    let (vx, vy) = pair(field(line, "vel")?)?;

    let mut blob = MotionBlob::detected(Point2D::new(cx, cy), Point2D::new(w, h), 0, 0, 0.0);
    blob.id = id;
    blob.velocity = Point2D::new(vx, vy);
    frame.blobs.push(blob);
    Some(())
}

/// EDGE enriches the matching BLOB line decoded earlier in the block.
fn parse_edge(line: &str, frame: &mut DecodedFrame) -> Option<()> {
    let id: u64 = field(line, "blob")?.parse().ok()?;
    let points = field(line, "points")?.parse().ok()?;
    let area = field(line, "area")?.strip_suffix("px")?.parse().ok()?;
    let complexity = field(line, "complexity")?.parse().ok()?;

    let blob = frame.blobs.iter_mut().find(|b| b.id == id)?;
    blob.contour_points = points;
    blob.area_px = area;
    blob.complexity = complexity;
    Some(())
}

/// `CLASS blob=<id> -> <LABEL> (conf=<c>)`
fn parse_class(line: &str, frame: &mut DecodedFrame) -> Option<()> {
    let blob_id = field(line, "blob")?.parse().ok()?;
    let mut after_arrow = line.split(" -> ").nth(1)?.split_whitespace();
    let label = after_arrow.next()?.to_string();
    let confidence = after_arrow
        .next()?
        .strip_prefix("(conf=")?
        .strip_suffix(')')?
        .parse()
        .ok()?;
    frame.classes.push((blob_id, Classification { label, confidence }));
    Some(())
}

fn parse_event(line: &str, frame: &mut DecodedFrame) -> Option<()> {
    let kind = EventKind::parse(field(line, "type")?)?;
    let blob_id = field(line, "blob")?.parse().ok()?;
    let direction = field(line, "dir").and_then(Direction::parse);
    let speed = field(line, "speed").and_then(|s| s.parse().ok());
    frame.events.push(TrackEvent { kind, blob_id, direction, speed });
    Some(())
}

fn parse_track(line: &str, frame: &mut DecodedFrame) -> Option<()> {
    frame.tracks.push(TrackSummary {
        blob_id: field(line, "blob")?.parse().ok()?,
        frames: field(line, "frames")?.parse().ok()?,
        dist: field(line, "dist")?.parse().ok()?,
        speed: field(line, "speed")?.parse().ok()?,
    });
    Some(())
}

/// Finds the value of a `key=value` token within a line.
fn field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.split_whitespace()
        .find_map(|tok| tok.strip_prefix(key).and_then(|rest| rest.strip_prefix('=')))
}

/// Parses a `(a,b)` pair.
fn pair(s: &str) -> Option<(f64, f64)> {
    let inner = s.strip_prefix('(')?.strip_suffix(')')?;
    let (a, b) = inner.split_once(',')?;
    Some((a.parse().ok()?, b.parse().ok()?))
}
