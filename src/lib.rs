// THEORY:
// This file is the main entry point for the `motion_narrator` library crate.
// It follows the standard Rust convention of using `lib.rs` to define the public
// API that will be exposed to external consumers (a camera hub, a monitoring
// daemon, or any other orchestrator that owns frame acquisition).
//
// The crate is organized as a stack of layers, leaves first:
//
//   core_modules::motion_analyzer  - frame pair -> FrameDelta
//   core_modules::blob_tracker     - FrameDelta -> stable identities + events
//   dsl                            - deltas/events -> compact event language
//   narration                      - sampling, inference dispatch, filtering
//   broadcast                      - best-effort fan-out of DSL blocks
//   pipeline                       - the per-session object tying it together
//
// The `pipeline::NarratorSession` is the clean, high-level interface for the
// whole engine; the internal modules stay usable on their own for consumers
// that only need a slice of the stack (e.g. motion analysis without narration).

pub mod broadcast;
pub mod config;
pub mod core_modules;
pub mod dsl;
pub mod error;
pub mod narration;
pub mod pipeline;

pub use config::SessionConfig;
pub use error::{NarratorError, Result};
pub use pipeline::{Frame, FrameSource, NarratorSession, TickOutput};
