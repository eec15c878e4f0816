//! The guarder: a per-session decision layer between raw model text and the
//! narration output. Decisions are made by an ordered table of
//! (predicate, action) rules so each rule can be tested in isolation.
//!
//! Rule order is a contract. The track-mode confident-accept rule is checked
//! before any generic suppression; a generic "no significant change" rule
//! must never swallow a confident track-mode detection.

use regex::RegexSet;
use tracing::debug;

use crate::config::GuarderConfig;
use crate::narration::{CaptionOutcome, CaptionResult, NarrationMode};

/// Final disposition of one caption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuarderOutcome {
    Accept,
    Suppress,
    Fallback,
}

/// Downstream urgency hint. Never affects whether text is emitted, only how
/// a consumer ranks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuarderDecision {
    pub outcome: GuarderOutcome,
    pub final_text: String,
    pub severity: Severity,
}

/// Everything a rule predicate may look at.
struct RuleInput<'a> {
    mode: NarrationMode,
    confidence: Option<f64>,
    text: &'a str,
    outcome: CaptionOutcome,
    /// Whether tracking saw recent motion for the focus target.
    recent_motion: bool,
    is_noise: bool,
    confident_present: f64,
    confident_absent: f64,
}

/// What a fired rule does with the caption.
enum RuleAction {
    AcceptVerbatim(Severity),
    AcceptAbsence,
    Suppress,
    Fallback,
}

type Rule = (&'static str, fn(&RuleInput) -> Option<RuleAction>);

/// The ordered rule table. First match wins.
const RULES: &[Rule] = &[
    // Confident track-mode detection is accepted before anything else can
    // suppress it.
    ("track_confident_present", |i| {
        if i.outcome == CaptionOutcome::Ok
            && i.mode == NarrationMode::Track
            && i.confidence.is_some_and(|c| c >= i.confident_present)
        {
            Some(RuleAction::AcceptVerbatim(Severity::High))
        } else {
            None
        }
    }),
    // Confident absence, corroborated by quiet tracking, becomes an explicit
    // absence statement.
    ("confident_absent", |i| {
        if i.outcome == CaptionOutcome::Ok
            && !i.recent_motion
            && i.confidence.is_some_and(|c| c <= i.confident_absent)
        {
            Some(RuleAction::AcceptAbsence)
        } else {
            None
        }
    }),
    // Intermediate-band confidence: assume present, flag low confidence.
    ("assume_present_band", |i| {
        if i.outcome == CaptionOutcome::Ok
            && i.confidence.is_some_and(|c| c > i.confident_absent && c < i.confident_present)
        {
            Some(RuleAction::AcceptVerbatim(Severity::Low))
        } else {
            None
        }
    }),
    // Boilerplate and template echoes are suppressed in favor of the
    // deterministic fallback text.
    ("noise_suppression", |i| {
        if i.outcome == CaptionOutcome::Ok && i.is_noise {
            Some(RuleAction::Suppress)
        } else {
            None
        }
    }),
    // Timeouts and provider errors always resolve through the fallback.
    ("failed_dispatch", |i| {
        if i.outcome != CaptionOutcome::Ok {
            Some(RuleAction::Fallback)
        } else {
            None
        }
    }),
];

/// Boilerplate the model keeps producing regardless of what is on screen.
const NOISE_PATTERNS: &[&str] = &[
    r"(?i)^no significant (change|motion|activity)",
    r"(?i)^the (scene|image|frame) (appears|remains|is) (unchanged|static|the same)",
    r"(?i)^nothing (of note|notable|significant|interesting)",
    r"(?i)^i (cannot|can't|am unable to) (see|determine|identify)",
    r"(?i)^as an ai",
    r"(?i)\[activity\]",
    r"(?i)\[describe .*\]",
    r"(?i)^(one|two) sentences? about the",
];

/// Tracking facts the guarder corroborates rules against.
#[derive(Debug, Clone, Copy)]
pub struct FilterContext<'a> {
    /// Whether any tracked identity moved recently.
    pub recent_motion: bool,
    /// Deterministic timeline-derived text used for Suppress and Fallback.
    pub fallback_text: &'a str,
}

pub struct Guarder {
    config: GuarderConfig,
    noise: RegexSet,
}

impl Guarder {
    pub fn new(config: GuarderConfig) -> Self {
        // The pattern set is fixed at compile time; construction cannot fail.
        let noise = RegexSet::new(NOISE_PATTERNS).unwrap_or_else(|_| RegexSet::empty());
        Self { config, noise }
    }

    /// Runs the rule table over one caption result. Always produces a
    /// decision.
    pub fn filter(&self, result: &CaptionResult, ctx: FilterContext<'_>) -> GuarderDecision {
        let text = result.raw_text.trim();
        let confidence = result.confidence_signal.or_else(|| extract_confidence(text));
        let input = RuleInput {
            mode: self.config.mode,
            confidence,
            text,
            outcome: result.outcome,
            recent_motion: ctx.recent_motion,
            is_noise: self.noise.is_match(text),
            confident_present: self.config.confident_present,
            confident_absent: self.config.confident_absent,
        };

        match fire(&input) {
            Some((name, action)) => {
                debug!(rule = name, "guarder rule fired");
                self.apply(action, text, ctx.fallback_text)
            }
            // Clean text with no confidence markers: nothing to object to.
            None => GuarderDecision {
                outcome: GuarderOutcome::Accept,
                final_text: text.to_string(),
                severity: Severity::Normal,
            },
        }
    }

    fn apply(&self, action: RuleAction, text: &str, fallback_text: &str) -> GuarderDecision {
        match action {
            RuleAction::AcceptVerbatim(severity) => GuarderDecision {
                outcome: GuarderOutcome::Accept,
                final_text: text.to_string(),
                severity,
            },
            RuleAction::AcceptAbsence => GuarderDecision {
                outcome: GuarderOutcome::Accept,
                final_text: format!("No {} in view.", self.config.focus_target),
                severity: Severity::Low,
            },
            RuleAction::Suppress => GuarderDecision {
                outcome: GuarderOutcome::Suppress,
                final_text: fallback_text.to_string(),
                severity: Severity::Low,
            },
            RuleAction::Fallback => GuarderDecision {
                outcome: GuarderOutcome::Fallback,
                final_text: fallback_text.to_string(),
                severity: Severity::Normal,
            },
        }
    }
}

fn fire(input: &RuleInput<'_>) -> Option<(&'static str, RuleAction)> {
    RULES
        .iter()
        .find_map(|(name, predicate)| predicate(input).map(|action| (*name, action)))
}

/// Parses structured confidence markers out of model text. Markers are
/// demanded by the track-mode prompt; general-mode text usually has none.
pub fn extract_confidence(text: &str) -> Option<f64> {
    let upper = text.to_uppercase();

    for marker in ["PRESENT:", "VISIBLE:"] {
        if let Some(rest) = upper.split(marker).nth(1) {
            let answer = rest.split_whitespace().next()?;
            if answer.starts_with("YES") {
                // A YES qualified by a low-confidence marker drops below the
                // verbatim-accept band.
                return Some(match confidence_level(&upper) {
                    Some("LOW") => 0.5,
                    Some("MEDIUM") => 0.7,
                    _ => 0.9,
                });
            }
            if answer.starts_with("NO") {
                return Some(0.1);
            }
        }
    }

    confidence_level(&upper).map(|level| match level {
        "HIGH" => 0.9,
        "MEDIUM" => 0.5,
        _ => 0.2,
    })
}

fn confidence_level(upper: &str) -> Option<&'static str> {
    let rest = upper.split("CONFIDENCE:").nth(1)?;
    let word = rest.split_whitespace().next()?;
    ["HIGH", "MEDIUM", "LOW"].into_iter().find(|l| word.starts_with(l))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ok_result(text: &str, confidence: Option<f64>) -> CaptionResult {
        CaptionResult {
            raw_text: text.to_string(),
            confidence_signal: confidence,
            latency: Duration::from_millis(120),
            outcome: CaptionOutcome::Ok,
        }
    }

    fn ctx(recent_motion: bool) -> FilterContext<'static> {
        FilterContext { recent_motion, fallback_text: "One object moving through the scene." }
    }

    fn track_guarder() -> Guarder {
        Guarder::new(GuarderConfig { mode: NarrationMode::Track, ..GuarderConfig::default() })
    }

    #[test]
    fn confident_track_detection_beats_noise_suppression() {
        let g = track_guarder();
        // Text that would match the no-change noise pattern.
        let result = ok_result("No significant change, but the person is still there.", Some(0.92));
        let decision = g.filter(&result, ctx(false));
        assert_eq!(decision.outcome, GuarderOutcome::Accept);
        assert_eq!(decision.severity, Severity::High);
        assert!(decision.final_text.contains("person"));
    }

    #[test]
    fn confident_absence_becomes_absence_statement() {
        let g = track_guarder();
        let decision = g.filter(&ok_result("PRESENT: NO\nEmpty hallway.", None), ctx(false));
        assert_eq!(decision.outcome, GuarderOutcome::Accept);
        assert_eq!(decision.final_text, "No person in view.");
    }

    #[test]
    fn intermediate_band_is_low_confidence_accept() {
        let g = track_guarder();
        let decision =
            g.filter(&ok_result("PRESENT: YES\nCONFIDENCE: MEDIUM\nMaybe someone.", None), ctx(true));
        assert_eq!(decision.outcome, GuarderOutcome::Accept);
        assert_eq!(decision.severity, Severity::Low);
    }

    #[test]
    fn boilerplate_is_suppressed_with_fallback_text() {
        let g = Guarder::new(GuarderConfig::default());
        let decision = g.filter(&ok_result("No significant change detected.", None), ctx(true));
        assert_eq!(decision.outcome, GuarderOutcome::Suppress);
        assert_eq!(decision.final_text, "One object moving through the scene.");
    }

    #[test]
    fn timeout_always_falls_back() {
        let g = track_guarder();
        let result = CaptionResult {
            raw_text: String::new(),
            confidence_signal: None,
            latency: Duration::from_secs(10),
            outcome: CaptionOutcome::Timeout,
        };
        let decision = g.filter(&result, ctx(true));
        assert_eq!(decision.outcome, GuarderOutcome::Fallback);
        assert_eq!(decision.final_text, "One object moving through the scene.");
    }

    #[test]
    fn clean_unmarked_text_is_accepted() {
        let g = Guarder::new(GuarderConfig::default());
        let decision = g.filter(&ok_result("A dog trots across the yard.", None), ctx(true));
        assert_eq!(decision.outcome, GuarderOutcome::Accept);
        assert_eq!(decision.severity, Severity::Normal);
        assert_eq!(decision.final_text, "A dog trots across the yard.");
    }

    #[test]
    fn confidence_markers_parse() {
        assert_eq!(extract_confidence("PRESENT: YES\nCONFIDENCE: HIGH"), Some(0.9));
        assert_eq!(extract_confidence("PRESENT: NO"), Some(0.1));
        assert_eq!(extract_confidence("VISIBLE: YES"), Some(0.9));
        assert_eq!(extract_confidence("CONFIDENCE: LOW"), Some(0.2));
        assert_eq!(extract_confidence("just prose"), None);
    }
}
