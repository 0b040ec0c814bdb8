pub mod backend;
pub mod buffers;
pub mod clock;
pub mod media_controller;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use backend::{FfmpegBackend, MediaBackend};
pub use buffers::{lock_shared, AudioRingBuffer, PlaybackPosition, SharedPlayback, SharedState, VideoRingBuffer};
pub use clock::{PlaybackClock, PlaybackStatus};
pub use media_controller::{MediaController, PlayerState};
pub use worker::BufferingWorker;
