//! Verbose DSL encoding. One block per tick, fixed field order per line.

use chrono::{DateTime, Utc};

use crate::core_modules::blob::{Classification, FrameDelta, TrackEvent, TrackHistory};

/// Minimum tracked lifetime before a TRACK summary line is worth emitting.
const TRACK_MIN_FRAMES: u32 = 3;

/// Encodes one tick's delta, events, live histories, and settled
/// classifications into a DSL block.
///
/// ```text
/// FRAME 12 @ 14:03:22.114
/// DELTA motion_pct=2.3% regions=3
/// BLOB id=1 pos=(0.412,0.310) size=(0.120,0.300) vel=(0.0123,-0.0040)
/// EDGE blob=1 points=84 area=5200px complexity=0.23
/// CLASS blob=1 -> PERSON (conf=0.90)
/// EVENT type=MOVE blob=1 dir=RIGHT speed=0.0129
/// TRACK blob=1 frames=14 dist=0.4312 speed=0.0308
/// ```
pub fn encode_block(
    delta: &FrameDelta,
    events: &[TrackEvent],
    histories: &[&TrackHistory],
    classes: &[(u64, Classification)],
) -> String {
    let mut out = String::with_capacity(256);

    out.push_str(&format!(
        "FRAME {} @ {}\n",
        delta.frame_num,
        format_timestamp(delta.timestamp)
    ));
    out.push_str(&format!(
        "DELTA motion_pct={:.1}% regions={}\n",
        delta.motion_percent,
        delta.blobs.len()
    ));

    for blob in &delta.blobs {
        out.push_str(&format!(
            "BLOB id={} pos=({:.3},{:.3}) size=({:.3},{:.3}) vel=({:.4},{:.4})\n",
            blob.id, blob.center.x, blob.center.y, blob.size.x, blob.size.y, blob.velocity.x, blob.velocity.y
        ));
        if blob.contour_points > 0 {
            out.push_str(&format!(
                "EDGE blob={} points={} area={}px complexity={:.2}\n",
                blob.id, blob.contour_points, blob.area_px, blob.complexity
            ));
        }
    }

    for (blob_id, class) in classes {
        out.push_str(&format!(
            "CLASS blob={} -> {} (conf={:.2})\n",
            blob_id, class.label, class.confidence
        ));
    }

    for event in events {
        out.push_str(&format!("EVENT type={} blob={}", event.kind.as_str(), event.blob_id));
        if let Some(dir) = event.direction {
            out.push_str(&format!(" dir={}", dir.as_str()));
        }
        if let Some(speed) = event.speed {
            out.push_str(&format!(" speed={speed:.4}"));
        }
        out.push('\n');
    }

    for history in histories {
        if history.frames_seen >= TRACK_MIN_FRAMES {
            out.push_str(&format!(
                "TRACK blob={} frames={} dist={:.4} speed={:.4}\n",
                history.blob_id, history.frames_seen, history.total_distance, history.avg_speed
            ));
        }
    }

    out
}

/// Wall-clock label for the FRAME header, millisecond precision.
fn format_timestamp(epoch_secs: f64) -> String {
    let secs = epoch_secs.floor() as i64;
    let nanos = ((epoch_secs - epoch_secs.floor()) * 1e9) as u32;
    match DateTime::<Utc>::from_timestamp(secs, nanos) {
        Some(dt) => dt.format("%H:%M:%S%.3f").to_string(),
        None => "00:00:00.000".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::blob::{Direction, EventKind, MotionBlob, Point2D};

    #[test]
    fn delta_line_matches_grammar() {
        let delta = FrameDelta {
            frame_num: 7,
            motion_percent: 2.3,
            blobs: vec![
                MotionBlob::detected(Point2D::new(0.1, 0.1), Point2D::new(0.05, 0.05), 600, 30, 0.1),
                MotionBlob::detected(Point2D::new(0.5, 0.5), Point2D::new(0.05, 0.05), 700, 30, 0.1),
                MotionBlob::detected(Point2D::new(0.9, 0.9), Point2D::new(0.05, 0.05), 800, 30, 0.1),
            ],
            ..FrameDelta::default()
        };
        let block = encode_block(&delta, &[], &[], &[]);
        assert!(block.lines().any(|l| l == "DELTA motion_pct=2.3% regions=3"));
    }

    #[test]
    fn event_line_carries_optional_fields() {
        let delta = FrameDelta { frame_num: 1, ..FrameDelta::default() };
        let events = vec![
            TrackEvent {
                kind: EventKind::Move,
                blob_id: 4,
                direction: Some(Direction::Left),
                speed: Some(0.0213),
            },
            TrackEvent { kind: EventKind::Appear, blob_id: 5, direction: None, speed: None },
        ];
        let block = encode_block(&delta, &events, &[], &[]);
        assert!(block.contains("EVENT type=MOVE blob=4 dir=LEFT speed=0.0213"));
        assert!(block.contains("EVENT type=APPEAR blob=5\n"));
    }

    #[test]
    fn short_lived_tracks_are_omitted() {
        let delta = FrameDelta { frame_num: 1, ..FrameDelta::default() };
        let young = TrackHistory::new(1, Point2D::new(0.5, 0.5), 32);
        let mut old = TrackHistory::new(2, Point2D::new(0.2, 0.2), 32);
        old.record(Point2D::new(0.3, 0.2), 32);
        old.record(Point2D::new(0.4, 0.2), 32);
        let block = encode_block(&delta, &[], &[&young, &old], &[]);
        assert!(!block.contains("TRACK blob=1"));
        assert!(block.contains("TRACK blob=2 frames=3"));
    }

    #[test]
    fn class_line_names_the_settled_label() {
        let delta = FrameDelta { frame_num: 3, ..FrameDelta::default() };
        let classes = vec![(4, Classification { label: "PERSON".to_string(), confidence: 0.9 })];
        let block = encode_block(&delta, &[], &[], &classes);
        assert!(block.contains("CLASS blob=4 -> PERSON (conf=0.90)"));
    }
}
