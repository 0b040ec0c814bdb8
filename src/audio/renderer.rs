use crate::core::AudioFormat;
use crate::playback::buffers::{lock_shared, SharedPlayback, SharedState};

/// Pull side of the audio pipeline, called from the output device's thread.
///
/// Every call hands out exactly one block and never waits on a source: an
/// underrun is padded with silence. `audio_consumed_ms` is advanced from the
/// bytes handed out, never from the video clock.
#[derive(Clone)]
pub struct AudioRenderer {
    shared: SharedPlayback,
    format: AudioFormat,
    block_frames: usize,
}

impl AudioRenderer {
    pub fn new(shared: SharedPlayback, format: AudioFormat, block_frames: usize) -> Self {
        Self {
            shared,
            format,
            block_frames: block_frames.max(1),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn block_frames(&self) -> usize {
        self.block_frames
    }

    pub fn block_bytes(&self) -> usize {
        self.block_frames * self.format.bytes_per_frame()
    }

    /// Produce the next block of interleaved PCM bytes.
    pub fn render_block(&self) -> Vec<u8> {
        let mut state = lock_shared(&self.shared);
        render_into_block(&mut state, self.format, self.block_frames)
    }

    /// Produce the next block decoded to interleaved `i16` samples.
    pub fn render_samples(&self, out: &mut Vec<i16>) {
        let bytes = self.render_block();
        out.clear();
        out.extend(
            bytes
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
        );
    }
}

fn render_into_block(state: &mut SharedState, format: AudioFormat, block_frames: usize) -> Vec<u8> {
    let block_bytes = block_frames * format.bytes_per_frame();

    if !state.playing {
        return vec![0u8; block_bytes];
    }

    let nominal = format.bytes_for_ms(state.position.audio_consumed_ms);
    let leeway = 2 * block_bytes as u64;

    // Chunks more than two blocks behind the nominal position are stale
    state.audio.prune(nominal.saturating_sub(leeway));

    // Data far ahead of us belongs to a region not reached yet: hold position
    if state
        .audio
        .front_start()
        .is_some_and(|start| start > nominal + leeway)
    {
        log::trace!("Audio buffer ahead of position {}, emitting silence", nominal);
        return vec![0u8; block_bytes];
    }

    let data = state.audio.drain(block_bytes);
    state.position.audio_consumed_ms += format.ms_for_frames(block_frames);
    state.audio_clock_active = true;
    data
}
