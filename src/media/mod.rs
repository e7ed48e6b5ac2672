//! Video assembly via the external `ffmpeg` tool.
//!
//! Each submission is trimmed, captioned with its day number and
//! normalized, then all parts are concatenated into one file.

mod assembly;
mod ffmpeg;

pub use assembly::{AssembledVideo, Assembler, MediaSource, ScratchFiles};
pub use ffmpeg::{CLIP_FRAME, Encoder, MediaError};
