pub mod audio_source;
pub mod output;
pub mod renderer;

pub use audio_source::{AudioSource, FfmpegAudioSource};
pub use output::{AudioOutput, RodioOutput};
pub use renderer::AudioRenderer;
