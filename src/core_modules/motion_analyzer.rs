// THEORY:
// The `motion_analyzer` module is the engine of the pixel layer. It turns a
// pair of consecutive grayscale frames into a structured `FrameDelta`:
// absolute difference, a denoising blur pass, a binary change mask, connected
// component extraction, and a filtering stage that separates real moving
// objects from sensor noise and global lighting changes.
//
// Key architectural principles:
// 1.  **No identity**: this layer detects position and shape only. Blob ids
//     here are always zero; identity assignment is the tracker's job.
// 2.  **Filtering is the product**: the raw change mask is cheap; the value
//     is in what gets discarded. Tiny components are flicker, near-full-frame
//     boxes are lighting shifts, and regions that reappear in place tick
//     after tick without displacement are static noise.
// 3.  **Per-tick statelessness, almost**: the analyzer keeps only the
//     previous frame, a small list of last-tick centroids for the
//     displacement filter, and a thumbnail throttle clock.

use std::collections::VecDeque;
use std::time::Instant;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::GrayImage;
use tracing::debug;

use crate::config::AnalyzerConfig;
use crate::core_modules::blob::{FrameDelta, MotionBlob, Point2D};
use crate::error::Result;

/// Last-tick region state used by the displacement (static-noise) filter.
#[derive(Debug, Clone, Copy)]
struct PrevRegion {
    center: Point2D,
    moving_streak: u32,
    /// True once the region has moved for `min_moving_frames` ticks; an
    /// established object momentarily slowing down stays in the output so
    /// the tracker can see it go stationary.
    established: bool,
}

/// Candidate rectangle in pixel space: (x1, y1, x2, y2, area, contour points).
type Rect = (u32, u32, u32, u32, u32, u32);

pub struct MotionAnalyzer {
    config: AnalyzerConfig,
    prev_frame: Option<GrayImage>,
    prev_regions: Vec<PrevRegion>,
    frame_count: u64,
    last_thumbnail_at: Option<Instant>,
}

impl MotionAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            prev_frame: None,
            prev_regions: Vec::new(),
            frame_count: 0,
            last_thumbnail_at: None,
        }
    }

    /// Analyzes one frame against its predecessor and returns the delta.
    ///
    /// The first tick of a session has no predecessor and always yields
    /// `motion_percent = 0` with no blobs.
    pub fn analyze(&mut self, frame: &GrayImage, timestamp: f64) -> Result<FrameDelta> {
        self.frame_count += 1;
        let (w, h) = frame.dimensions();
        let total_pixels = u64::from(w) * u64::from(h);

        let Some(prev) = self.prev_frame.take() else {
            self.prev_frame = Some(frame.clone());
            return Ok(self.empty_delta(timestamp, total_pixels));
        };

        let diff = blurred_abs_diff(&prev, frame);
        let mask: Vec<bool> = diff.iter().map(|&d| d >= self.config.motion_threshold).collect();
        let changed_pixels = mask.iter().filter(|&&m| m).count() as u64;
        let motion_percent = changed_pixels as f64 / total_pixels as f64 * 100.0;

        let mut delta = FrameDelta {
            frame_num: self.frame_count,
            timestamp,
            motion_percent,
            changed_pixels,
            total_pixels,
            blobs: Vec::new(),
            background_thumbnail: self.maybe_thumbnail(frame)?,
        };
        self.prev_frame = Some(frame.clone());

        // Global change across most of the frame reads as camera movement or
        // a lighting shift: report the motion level, not a giant blob.
        if motion_percent >= self.config.camera_motion_threshold {
            debug!(frame = self.frame_count, motion_percent, "camera-level motion, skipping blobs");
            return Ok(delta);
        }

        let rects = extract_components(&mask, w, h, self.config.min_blob_area);
        let gap = self
            .config
            .merge_gap_px
            .unwrap_or_else(|| (w.min(h) / 100).max(20));
        let merged = merge_rects(rects, gap);

        let mut blobs = Vec::new();
        let mut next_regions = Vec::new();
        for (x1, y1, x2, y2, area_px, contour_pts) in merged {
            let bw = (x2 - x1).max(1);
            let bh = (y2 - y1).max(1);

            let size_ratio = f64::from(bw) * f64::from(bh) / total_pixels as f64;
            if size_ratio > self.config.max_blob_size_ratio {
                continue;
            }

            let center = Point2D::new(
                (f64::from(x1) + f64::from(bw) / 2.0) / f64::from(w),
                (f64::from(y1) + f64::from(bh) / 2.0) / f64::from(h),
            );

            // Displacement filter: a region sitting exactly where one sat
            // last tick is sensor noise unless it already proved itself.
            // Dropped regions are still remembered so flicker stays
            // suppressed on every subsequent tick, not every other one.
            let (moving_streak, established, keep) = self.displacement_check(center);
            next_regions.push(PrevRegion { center, moving_streak, established });
            if !keep {
                continue;
            }

            let perimeter = f64::from(2 * (bw + bh));
            let complexity =
                (perimeter * perimeter / (4.0 * std::f64::consts::PI * f64::from(area_px.max(1))) / 10.0).min(1.0);

            blobs.push(MotionBlob::detected(
                center,
                Point2D::new(f64::from(bw) / f64::from(w), f64::from(bh) / f64::from(h)),
                area_px,
                contour_pts,
                complexity,
            ));
        }

        blobs.sort_by(|a, b| b.area_px.cmp(&a.area_px));
        blobs.truncate(self.config.max_blobs);
        self.prev_regions = next_regions;

        delta.blobs = blobs;
        Ok(delta)
    }

    /// Matches a centroid against last tick's regions and decides whether the
    /// region counts as moving, established, or discardable noise.
    fn displacement_check(&self, center: Point2D) -> (u32, bool, bool) {
        let nearest = self
            .prev_regions
            .iter()
            .map(|r| (r, r.center.distance_to(center)))
            .min_by(|a, b| a.1.total_cmp(&b.1));

        match nearest {
            // Nothing nearby last tick: a new detection, kept so APPEAR fires.
            None => (1, false, true),
            Some((_, dist)) if dist > 0.2 => (1, false, true),
            Some((region, dist)) => {
                if dist >= self.config.min_velocity {
                    let streak = region.moving_streak + 1;
                    let established = region.established || streak >= self.config.min_moving_frames;
                    (streak, established, true)
                } else {
                    // In place since last tick. Established objects stay
                    // visible so the tracker can emit STATIONARY.
                    (0, region.established, region.established)
                }
            }
        }
    }

    fn maybe_thumbnail(&mut self, frame: &GrayImage) -> Result<Option<Vec<u8>>> {
        let due = match self.last_thumbnail_at {
            None => true,
            Some(at) => at.elapsed() >= self.config.thumbnail_interval,
        };
        if !due {
            return Ok(None);
        }
        self.last_thumbnail_at = Some(Instant::now());

        let (w, h) = frame.dimensions();
        let max_side = self.config.thumbnail_px;
        let (tw, th) = if w >= h {
            (max_side, (u64::from(h) * u64::from(max_side) / u64::from(w.max(1))).max(1) as u32)
        } else {
            ((u64::from(w) * u64::from(max_side) / u64::from(h.max(1))).max(1) as u32, max_side)
        };
        let small = image::imageops::resize(frame, tw, th, FilterType::Triangle);

        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, 70).encode_image(&small)?;
        Ok(Some(buf))
    }

    fn empty_delta(&self, timestamp: f64, total_pixels: u64) -> FrameDelta {
        FrameDelta {
            frame_num: self.frame_count,
            timestamp,
            total_pixels,
            ..FrameDelta::default()
        }
    }

    pub fn reset(&mut self) {
        self.prev_frame = None;
        self.prev_regions.clear();
        self.frame_count = 0;
        self.last_thumbnail_at = None;
    }
}

/// Absolute per-pixel difference followed by a 3x3 box-blur denoise pass.
fn blurred_abs_diff(a: &GrayImage, b: &GrayImage) -> Vec<u8> {
    let (w, h) = a.dimensions();
    let wa = w as usize;
    let ha = h as usize;

    let raw: Vec<u8> = a
        .as_raw()
        .iter()
        .zip(b.as_raw().iter())
        .map(|(&pa, &pb)| pa.abs_diff(pb))
        .collect();

    let mut out = vec![0u8; raw.len()];
    for y in 0..ha {
        for x in 0..wa {
            let mut sum: u32 = 0;
            let mut count: u32 = 0;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let ny = y as i64 + dy;
                    let nx = x as i64 + dx;
                    if ny >= 0 && ny < ha as i64 && nx >= 0 && nx < wa as i64 {
                        sum += u32::from(raw[ny as usize * wa + nx as usize]);
                        count += 1;
                    }
                }
            }
            out[y * wa + x] = (sum / count) as u8;
        }
    }
    out
}

/// Finds connected components in the binary mask (4-neighbor flood fill) and
/// returns their bounding rects. Components below `min_area` pixels are
/// dropped as flicker.
fn extract_components(mask: &[bool], w: u32, h: u32, min_area: u32) -> Vec<Rect> {
    let wa = w as usize;
    let ha = h as usize;
    let mut visited = vec![false; mask.len()];
    let mut rects = Vec::new();

    for start in 0..mask.len() {
        if !mask[start] || visited[start] {
            continue;
        }

        let mut queue = VecDeque::from([start]);
        visited[start] = true;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (wa, ha, 0usize, 0usize);
        let mut area: u32 = 0;
        let mut boundary: u32 = 0;

        while let Some(idx) = queue.pop_front() {
            let x = idx % wa;
            let y = idx / wa;
            area += 1;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);

            let mut on_edge = false;
            for (dx, dy) in [(0i64, 1i64), (0, -1), (1, 0), (-1, 0)] {
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                if nx < 0 || nx >= wa as i64 || ny < 0 || ny >= ha as i64 {
                    on_edge = true;
                    continue;
                }
                let nidx = ny as usize * wa + nx as usize;
                if !mask[nidx] {
                    on_edge = true;
                } else if !visited[nidx] {
                    visited[nidx] = true;
                    queue.push_back(nidx);
                }
            }
            if on_edge {
                boundary += 1;
            }
        }

        if area >= min_area {
            rects.push((min_x as u32, min_y as u32, max_x as u32 + 1, max_y as u32 + 1, area, boundary));
        }
    }
    rects
}

/// Merges overlapping or nearby rects into larger motion fragments. Two rects
/// are connected when they overlap after expanding one by `gap_px`.
fn merge_rects(rects: Vec<Rect>, gap_px: u32) -> Vec<Rect> {
    let gap = i64::from(gap_px);
    let mut merged: Vec<Rect> = Vec::new();

    for (x1, y1, x2, y2, area, pts) in rects {
        let mut absorbed = false;
        for m in &mut merged {
            let ex1 = i64::from(m.0) - gap;
            let ey1 = i64::from(m.1) - gap;
            let ex2 = i64::from(m.2) + gap;
            let ey2 = i64::from(m.3) + gap;
            let disjoint =
                i64::from(x2) < ex1 || i64::from(x1) > ex2 || i64::from(y2) < ey1 || i64::from(y1) > ey2;
            if !disjoint {
                *m = (
                    m.0.min(x1),
                    m.1.min(y1),
                    m.2.max(x2),
                    m.3.max(y2),
                    m.4 + area,
                    m.5 + pts,
                );
                absorbed = true;
                break;
            }
        }
        if !absorbed {
            merged.push((x1, y1, x2, y2, area, pts));
        }
    }
    merged
}
