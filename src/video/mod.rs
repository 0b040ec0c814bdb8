pub mod ffmpeg_manager;
pub mod frame_source;
pub mod probe;

pub use ffmpeg_manager::{DecoderProcess, FFmpegManager};
pub use frame_source::*;
pub use probe::*;
