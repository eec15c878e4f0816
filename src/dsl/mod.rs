// THEORY:
// The `dsl` module defines the motion event language: a line-oriented text
// grammar that carries one tick of motion and tracking state. It exists in
// two forms with very different contracts:
//
// 1.  **Verbose** (`encoder` / `decoder`): bit-exact, field order fixed,
//     one block per FRAME header. This is the wire form pushed to realtime
//     subscribers, and the only form with a round-trip guarantee.
// 2.  **Compact timeline** (`timeline`): a lossy multi-frame aggregation
//     built as model context. Coordinates are dropped in favor of
//     qualitative trajectory labels so a multi-second window fits in a few
//     hundred bytes of prompt.
//
// Decoders tolerate lines they do not recognize; unknown prefixes are
// skipped, never treated as an error, so the grammar can grow without
// breaking old readers.

pub mod decoder;
pub mod encoder;
pub mod timeline;

pub use decoder::{decode, DecodedFrame, TrackSummary};
pub use encoder::encode_block;
pub use timeline::{MotionClass, TimelineWindow};
