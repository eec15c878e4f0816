//! Object classification with deliberately minimal model usage: an identity
//! is classified at most once, and only after it has been tracked long
//! enough to be stable. Results feed the DSL's CLASS lines; pixel motion
//! detection never depends on them.

use std::collections::HashMap;

use image::codecs::jpeg::JpegEncoder;
use image::GrayImage;

use crate::config::ClassifierConfig;
use crate::core_modules::blob::{Classification, MotionBlob};
use crate::error::Result;

/// Labels the classification prompt allows. Anything else parses UNKNOWN.
const KNOWN_CLASSES: &[&str] = &["person", "bird", "cat", "dog", "car", "vehicle", "animal"];

/// Confidence assigned to a cleanly parsed class answer.
const PARSED_CONFIDENCE: f64 = 0.9;
/// Confidence assigned when the model answered but named no known class.
const UNPARSED_CONFIDENCE: f64 = 0.3;

pub struct BlobClassifier {
    config: ClassifierConfig,
    /// blob id -> settled classification. UNKNOWN answers are never cached,
    /// so an unclear object gets another attempt later.
    classified: HashMap<u64, Classification>,
    /// blob id -> ticks seen while awaiting classification.
    pending: HashMap<u64, u32>,
}

impl BlobClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config, classified: HashMap::new(), pending: HashMap::new() }
    }

    /// Gate for one identity on one tick: false while the identity is too
    /// young or already classified, true once it has been tracked for
    /// `min_frames_before_classify` ticks. Counts the tick as a sighting.
    pub fn should_classify(&mut self, blob_id: u64) -> bool {
        if !self.config.enabled || self.classified.contains_key(&blob_id) {
            return false;
        }
        let seen = self.pending.entry(blob_id).or_insert(0);
        *seen += 1;
        *seen >= self.config.min_frames_before_classify
    }

    /// Settles an identity's classification. UNKNOWN is not settled; the
    /// identity stays eligible for another attempt.
    pub fn record(&mut self, blob_id: u64, classification: Classification) {
        if classification.label == "UNKNOWN" {
            return;
        }
        self.pending.remove(&blob_id);
        self.classified.insert(blob_id, classification);
    }

    pub fn get(&self, blob_id: u64) -> Option<&Classification> {
        self.classified.get(&blob_id)
    }

    /// Settled classifications for the given blobs, in blob order.
    pub fn known(&self, blobs: &[MotionBlob]) -> Vec<(u64, Classification)> {
        blobs
            .iter()
            .filter_map(|b| self.classified.get(&b.id).map(|c| (b.id, c.clone())))
            .collect()
    }

    /// Drops state for identities the tracker has retired. Ids are never
    /// reused within a session, so classify-once survives pruning.
    pub fn retain_live(&mut self, live: &[u64]) {
        self.pending.retain(|id, _| live.contains(id));
        self.classified.retain(|id, _| live.contains(id));
    }

    pub fn reset(&mut self) {
        self.classified.clear();
        self.pending.clear();
    }

    /// Maps a raw one-word model answer onto the known class list.
    pub fn parse_label(text: &str) -> Classification {
        let lower = text.to_lowercase();
        for class in KNOWN_CLASSES {
            if lower.contains(class) {
                return Classification {
                    label: class.to_uppercase(),
                    confidence: PARSED_CONFIDENCE,
                };
            }
        }
        Classification { label: "UNKNOWN".to_string(), confidence: UNPARSED_CONFIDENCE }
    }
}

/// Cuts the blob's padded bounding box out of the frame and JPEG-encodes it
/// for the classification prompt.
pub fn crop_blob_jpeg(image: &GrayImage, blob: &MotionBlob, padding: f64) -> Result<Vec<u8>> {
    let (w, h) = image.dimensions();
    let wf = f64::from(w);
    let hf = f64::from(h);

    let x1 = ((blob.center.x - blob.size.x / 2.0 - padding) * wf).max(0.0) as u32;
    let y1 = ((blob.center.y - blob.size.y / 2.0 - padding) * hf).max(0.0) as u32;
    let x2 = (((blob.center.x + blob.size.x / 2.0 + padding) * wf) as u32).min(w);
    let y2 = (((blob.center.y + blob.size.y / 2.0 + padding) * hf) as u32).min(h);

    let crop = if x2 > x1 && y2 > y1 {
        image::imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image()
    } else {
        image.clone()
    };

    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, 70).encode_image(&crop)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::blob::Point2D;

    fn classifier() -> BlobClassifier {
        BlobClassifier::new(ClassifierConfig::default())
    }

    #[test]
    fn waits_for_a_stable_track_before_classifying() {
        let mut c = classifier();
        assert!(!c.should_classify(1));
        assert!(!c.should_classify(1));
        assert!(c.should_classify(1));
    }

    #[test]
    fn each_identity_is_classified_at_most_once() {
        let mut c = classifier();
        for _ in 0..3 {
            c.should_classify(7);
        }
        c.record(7, Classification { label: "PERSON".to_string(), confidence: 0.9 });
        assert!(!c.should_classify(7));
        assert_eq!(c.get(7).unwrap().label, "PERSON");
    }

    #[test]
    fn unknown_answers_leave_the_identity_eligible() {
        let mut c = classifier();
        for _ in 0..3 {
            c.should_classify(2);
        }
        c.record(2, BlobClassifier::parse_label("hard to say"));
        assert!(c.get(2).is_none());
        assert!(c.should_classify(2));
    }

    #[test]
    fn label_parsing_maps_onto_known_classes() {
        assert_eq!(BlobClassifier::parse_label("A person, I think").label, "PERSON");
        assert_eq!(BlobClassifier::parse_label("CAT").label, "CAT");
        let unknown = BlobClassifier::parse_label("a lamp post");
        assert_eq!(unknown.label, "UNKNOWN");
        assert!(unknown.confidence < 0.5);
    }

    #[test]
    fn disabled_classifier_never_asks() {
        let mut c = BlobClassifier::new(ClassifierConfig {
            enabled: false,
            ..ClassifierConfig::default()
        });
        for _ in 0..5 {
            assert!(!c.should_classify(1));
        }
    }

    #[test]
    fn crop_stays_within_frame_bounds() {
        let image = GrayImage::from_pixel(160, 120, image::Luma([40u8]));
        // A blob hugging the frame corner; the padded crop must clamp.
        let blob = MotionBlob::detected(
            Point2D::new(0.05, 0.05),
            Point2D::new(0.2, 0.2),
            800,
            40,
            0.2,
        );
        let jpeg = crop_blob_jpeg(&image, &blob, 0.1).unwrap();
        assert!(!jpeg.is_empty());
    }
}
