//! Deterministic, model-free narration derived straight from the motion
//! timeline. One shared code path serves every operation class whenever
//! inference times out, errors, or gets suppressed.

use crate::dsl::TimelineWindow;
use crate::narration::NarrationMode;

/// Builds the fallback summary for the current window.
pub fn fallback_summary(window: &TimelineWindow, mode: NarrationMode, focus_target: &str) -> String {
    let moving = window.moving_count();
    let objects = window.object_count();

    let scene = match window.scene_class() {
        "empty_scene" => "No activity in the scene.".to_string(),
        "static_scene" => match objects {
            1 => "One object in view, not moving.".to_string(),
            n => format!("{n} objects in view, none moving."),
        },
        "low_activity" => "Slight movement in the scene.".to_string(),
        "single_traversal" => "One object moving through the scene.".to_string(),
        "multi_activity" => format!("{moving} objects moving in the scene."),
        _ => "High activity across the scene.".to_string(),
    };

    match mode {
        NarrationMode::General => scene,
        NarrationMode::Track => {
            if moving > 0 {
                format!("Motion detected, unable to confirm whether it is the {focus_target}. {scene}")
            } else {
                format!("No sign of the {focus_target}. {scene}")
            }
        }
    }
}
