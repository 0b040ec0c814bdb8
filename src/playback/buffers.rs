// =============================================================================
// RING BUFFERS - SHARED LOOK-AHEAD STORAGE
// =============================================================================
//
// The video and audio buffers plus both playback clocks live behind ONE mutex.
// The buffering worker touches both buffers in the same pass and the audio
// callback takes the same lock on its real-time thread: keep every critical
// section O(1) or O(chunk size), and never read a source while holding it.
//
// =============================================================================

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::{AudioChunk, EngineConfig, VideoFrame};

// =============================================================================
// VIDEO
// =============================================================================

/// Decoded frames keyed by index, strictly increasing and contiguous front to back.
pub struct VideoRingBuffer {
    frames: VecDeque<VideoFrame>,
    capacity: usize,
}

impl VideoRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            capacity,
        }
    }

    /// Append `frame` if it directly follows the tail (or the buffer is empty).
    ///
    /// Returns `false` and drops the frame otherwise.
    pub fn push(&mut self, frame: VideoFrame) -> bool {
        if let Some(last) = self.back_index() {
            if frame.index != last + 1 {
                log::warn!(
                    "Dropping out-of-order frame {} (buffer tail is {})",
                    frame.index,
                    last
                );
                return false;
            }
        }
        self.frames.push_back(frame);
        true
    }

    /// Remove and return the front frame only if it is `expected_index`.
    pub fn pop_if_due(&mut self, expected_index: u64) -> Option<VideoFrame> {
        if self.front_index() == Some(expected_index) {
            self.frames.pop_front()
        } else {
            None
        }
    }

    /// Evict frames with an index below `min_index`. Returns how many went.
    pub fn prune(&mut self, min_index: u64) -> usize {
        let mut evicted = 0;
        while self.front_index().is_some_and(|index| index < min_index) {
            self.frames.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn front_index(&self) -> Option<u64> {
        self.frames.front().map(|f| f.index)
    }

    pub fn back_index(&self) -> Option<u64> {
        self.frames.back().map(|f| f.index)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn indices(&self) -> Vec<u64> {
        self.frames.iter().map(|f| f.index).collect()
    }
}

// =============================================================================
// AUDIO
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioPush {
    Appended,
    /// The chunk did not start at the tail; the buffer was reset to it.
    Resynced { expected: u64, got: u64 },
}

/// Raw PCM chunks ordered by byte offset, contiguous and non-overlapping.
pub struct AudioRingBuffer {
    chunks: VecDeque<AudioChunk>,
    capacity: usize,
}

impl AudioRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            capacity,
        }
    }

    pub fn push(&mut self, chunk: AudioChunk) -> AudioPush {
        if chunk.data.is_empty() {
            return AudioPush::Appended;
        }

        let outcome = match self.tail_end() {
            Some(expected) if expected != chunk.start_offset => {
                log::warn!(
                    "Audio stream discontinuity: expected offset {}, got {}; resetting buffer",
                    expected,
                    chunk.start_offset
                );
                self.chunks.clear();
                AudioPush::Resynced {
                    expected,
                    got: chunk.start_offset,
                }
            }
            _ => AudioPush::Appended,
        };

        self.chunks.push_back(chunk);
        outcome
    }

    /// Remove exactly `n_bytes` from the front, zero-padding whatever is missing.
    pub fn drain(&mut self, n_bytes: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(n_bytes);

        while out.len() < n_bytes {
            let Some(front) = self.chunks.front_mut() else {
                break;
            };

            let take = (n_bytes - out.len()).min(front.data.len());
            out.extend_from_slice(&front.data[..take]);

            if take == front.data.len() {
                self.chunks.pop_front();
            } else {
                front.data.drain(..take);
                front.start_offset += take as u64;
            }
        }

        // Underrun: pad with silence
        out.resize(n_bytes, 0);
        out
    }

    /// Evict chunks that end before `min_offset`. Returns how many went.
    pub fn prune(&mut self, min_offset: u64) -> usize {
        let mut evicted = 0;
        while self
            .chunks
            .front()
            .is_some_and(|chunk| chunk.end_offset() < min_offset)
        {
            self.chunks.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn front_start(&self) -> Option<u64> {
        self.chunks.front().map(|c| c.start_offset)
    }

    pub fn tail_end(&self) -> Option<u64> {
        self.chunks.back().map(|c| c.end_offset())
    }

    pub fn buffered_bytes(&self) -> usize {
        self.chunks.iter().map(|c| c.data.len()).sum()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.chunks.len() >= self.capacity
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    pub fn chunks(&self) -> impl Iterator<Item = &AudioChunk> {
        self.chunks.iter()
    }
}

// =============================================================================
// SHARED STATE
// =============================================================================

/// The two independently advancing clocks.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlaybackPosition {
    /// Authoritative for picture and for the position reported to the UI.
    pub video_frame: u64,
    /// Advanced only by audio actually handed to the output device.
    pub audio_consumed_ms: f64,
}

pub struct SharedState {
    pub video: VideoRingBuffer,
    pub audio: AudioRingBuffer,
    pub position: PlaybackPosition,
    pub playing: bool,
    pub end_of_media: bool,
    /// Set while the audio renderer is handing blocks to a running device.
    pub audio_clock_active: bool,
    /// One past the last frame the video source delivered, once it has ended.
    pub video_end: Option<u64>,
    /// Bumped by every reset. A worker only writes while this matches the
    /// value it was started with.
    pub generation: u64,
}

impl SharedState {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            video: VideoRingBuffer::new(config.max_video_frames),
            audio: AudioRingBuffer::new(config.max_audio_chunks),
            position: PlaybackPosition::default(),
            playing: false,
            end_of_media: false,
            audio_clock_active: false,
            video_end: None,
            generation: 0,
        }
    }

    /// Empty both buffers and move both clocks to the given position.
    pub fn reset(&mut self, video_frame: u64, audio_consumed_ms: f64) {
        self.video.clear();
        self.audio.clear();
        self.position = PlaybackPosition {
            video_frame,
            audio_consumed_ms,
        };
        self.end_of_media = false;
        self.audio_clock_active = false;
        self.video_end = None;
        self.generation = self.generation.wrapping_add(1);
    }
}

pub type SharedPlayback = Arc<Mutex<SharedState>>;

/// Lock the shared state, recovering it if a holder panicked.
///
/// Every critical section leaves the state consistent, so a poisoned lock
/// still guards valid data.
pub fn lock_shared(shared: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn frame(index: u64) -> VideoFrame {
        VideoFrame::new(index, RgbImage::new(2, 2))
    }

    fn chunk(start: u64, len: usize, fill: u8) -> AudioChunk {
        AudioChunk::new(start, vec![fill; len])
    }

    #[test]
    fn test_video_push_rejects_duplicates_and_gaps() {
        let mut buffer = VideoRingBuffer::new(10);
        assert!(buffer.push(frame(5)));
        assert!(buffer.push(frame(6)));
        assert!(!buffer.push(frame(6)));
        assert!(!buffer.push(frame(4)));
        assert!(!buffer.push(frame(9)));
        assert!(buffer.push(frame(7)));
        assert_eq!(buffer.indices(), vec![5, 6, 7]);
    }

    #[test]
    fn test_video_indices_stay_strictly_increasing() {
        let mut buffer = VideoRingBuffer::new(100);
        // A misbehaving source repeating and skipping indices
        for index in [0, 1, 1, 2, 4, 3, 3, 5, 4, 6] {
            buffer.push(frame(index));
        }
        let indices = buffer.indices();
        assert!(indices.windows(2).all(|w| w[1] == w[0] + 1));
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_pop_if_due_only_takes_expected_front() {
        let mut buffer = VideoRingBuffer::new(10);
        buffer.push(frame(3));
        buffer.push(frame(4));

        assert!(buffer.pop_if_due(2).is_none());
        assert!(buffer.pop_if_due(4).is_none());
        assert_eq!(buffer.pop_if_due(3).map(|f| f.index), Some(3));
        assert_eq!(buffer.front_index(), Some(4));
    }

    #[test]
    fn test_video_prune_and_capacity() {
        let mut buffer = VideoRingBuffer::new(3);
        for index in 0..3 {
            buffer.push(frame(index));
        }
        assert!(buffer.is_full());
        assert_eq!(buffer.prune(2), 2);
        assert_eq!(buffer.indices(), vec![2]);
        assert!(!buffer.is_full());
        assert_eq!(buffer.prune(0), 0);
    }

    #[test]
    fn test_audio_push_keeps_contiguity() {
        let mut buffer = AudioRingBuffer::new(10);
        assert_eq!(buffer.push(chunk(0, 8, 1)), AudioPush::Appended);
        assert_eq!(buffer.push(chunk(8, 8, 2)), AudioPush::Appended);
        assert_eq!(buffer.tail_end(), Some(16));

        let chunks: Vec<_> = buffer.chunks().cloned().collect();
        assert!(chunks
            .windows(2)
            .all(|w| w[0].end_offset() == w[1].start_offset));
    }

    #[test]
    fn test_audio_discontinuity_resets_buffer() {
        let mut buffer = AudioRingBuffer::new(10);
        buffer.push(chunk(0, 8, 1));
        buffer.push(chunk(8, 8, 1));

        assert_eq!(
            buffer.push(chunk(40, 4, 9)),
            AudioPush::Resynced {
                expected: 16,
                got: 40
            }
        );
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.front_start(), Some(40));

        // Contiguity holds again from the reset point
        assert_eq!(buffer.push(chunk(44, 4, 9)), AudioPush::Appended);
        assert_eq!(buffer.tail_end(), Some(48));
    }

    #[test]
    fn test_drain_splits_chunks() {
        let mut buffer = AudioRingBuffer::new(10);
        buffer.push(chunk(0, 6, 1));
        buffer.push(chunk(6, 6, 2));

        assert_eq!(buffer.drain(4), vec![1, 1, 1, 1]);
        assert_eq!(buffer.front_start(), Some(4));
        assert_eq!(buffer.drain(4), vec![1, 1, 2, 2]);
        assert_eq!(buffer.front_start(), Some(8));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.tail_end(), Some(12));
    }

    #[test]
    fn test_drain_always_returns_requested_length() {
        let mut buffer = AudioRingBuffer::new(10);
        assert_eq!(buffer.drain(16), vec![0u8; 16]);

        buffer.push(chunk(0, 3, 7));
        let out = buffer.drain(8);
        assert_eq!(out.len(), 8);
        assert_eq!(&out[..3], &[7, 7, 7]);
        assert!(out[3..].iter().all(|b| *b == 0));
        assert!(buffer.is_empty());

        for n in [0usize, 1, 5, 4096] {
            assert_eq!(buffer.drain(n).len(), n);
        }
    }

    #[test]
    fn test_audio_prune_uses_chunk_end() {
        let mut buffer = AudioRingBuffer::new(10);
        buffer.push(chunk(0, 10, 1));
        buffer.push(chunk(10, 10, 1));
        buffer.push(chunk(20, 10, 1));

        // Chunk [10, 20) ends exactly at the threshold and stays
        assert_eq!(buffer.prune(20), 1);
        assert_eq!(buffer.front_start(), Some(10));
        assert_eq!(buffer.prune(21), 1);
        assert_eq!(buffer.buffered_bytes(), 10);
    }

    #[test]
    fn test_shared_state_reset() {
        let mut state = SharedState::new(&EngineConfig::default());
        state.video.push(frame(0));
        state.audio.push(chunk(0, 4, 1));
        state.end_of_media = true;
        state.audio_clock_active = true;
        state.video_end = Some(12);
        let generation = state.generation;

        state.reset(240, 8000.0);

        assert!(state.video.is_empty());
        assert!(state.audio.is_empty());
        assert_eq!(state.position.video_frame, 240);
        assert_eq!(state.position.audio_consumed_ms, 8000.0);
        assert!(!state.end_of_media);
        assert!(!state.audio_clock_active);
        assert_eq!(state.video_end, None);
        assert_ne!(state.generation, generation);
    }
}
