pub mod audio;
pub mod core;
pub mod playback;
pub mod video;

pub use crate::core::{EngineConfig, EngineError, EngineResult, PlaybackSnapshot, VideoFrame};
pub use crate::playback::{FfmpegBackend, MediaController, PlaybackStatus, PlayerState};
