// =============================================================================
// BUFFERING WORKER
// =============================================================================
//
// One background thread per load/seek interval. It owns both sources, reads
// ahead of the playback position until the pre-buffer window (or a capacity
// cap) is reached, and evicts data that has fallen behind the post-unload
// window. Sources are only ever read here, never under the shared lock.
//
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::AudioSource;
use crate::core::{AudioChunk, AudioFormat, EngineConfig, VideoInfo};
use crate::playback::buffers::{lock_shared, AudioPush, SharedPlayback};
use crate::video::FrameSource;

/// Window sizes for one worker, derived from the config and the opened streams.
#[derive(Debug, Clone, Copy)]
pub struct WorkerParams {
    pub frame_count: u64,
    pub pre_buffer_frames: u64,
    pub post_unload_frames: u64,
    pub audio_format: AudioFormat,
    pub pre_buffer_bytes: u64,
    pub post_unload_bytes: u64,
    pub chunk_bytes: usize,
    pub idle: Duration,
}

impl WorkerParams {
    pub fn new(config: &EngineConfig, video: &VideoInfo, audio_format: AudioFormat) -> Self {
        Self {
            frame_count: video.frame_count,
            pre_buffer_frames: config.pre_buffer_frames(video.fps),
            post_unload_frames: config.post_unload_frames(video.fps),
            audio_format,
            pre_buffer_bytes: audio_format.bytes_for_ms(config.pre_buffer_seconds * 1000.0),
            post_unload_bytes: audio_format.bytes_for_ms(config.post_unload_seconds * 1000.0),
            chunk_bytes: config.audio_chunk_frames * audio_format.bytes_per_frame(),
            idle: config.worker_idle(),
        }
    }
}

/// The body of the worker thread, steppable on its own.
pub struct WorkerLoop {
    shared: SharedPlayback,
    video: Option<Box<dyn FrameSource>>,
    audio: Option<Box<dyn AudioSource>>,
    params: WorkerParams,
    next_frame: u64,
    next_audio_offset: u64,
    /// The `SharedState::generation` this worker fills for.
    generation: u64,
    superseded: bool,
}

impl WorkerLoop {
    pub fn new(
        shared: SharedPlayback,
        video: Box<dyn FrameSource>,
        audio: Option<Box<dyn AudioSource>>,
        params: WorkerParams,
        start_frame: u64,
        start_audio_ms: f64,
    ) -> Self {
        let generation = lock_shared(&shared).generation;
        Self {
            shared,
            video: Some(video),
            audio,
            params,
            next_frame: start_frame,
            next_audio_offset: params.audio_format.bytes_for_ms(start_audio_ms),
            generation,
            superseded: false,
        }
    }

    /// Both sources have hit end of stream (or failed).
    pub fn is_exhausted(&self) -> bool {
        self.video.is_none() && self.audio.is_none()
    }

    /// The buffers were reset after this worker started, so it must not touch them.
    pub fn is_superseded(&self) -> bool {
        self.superseded
    }

    fn supersede(&mut self) {
        if !self.superseded {
            log::debug!("Buffering worker superseded by a newer pipeline, discarding its reads");
            self.superseded = true;
        }
        self.close_sources();
    }

    /// One top-up and prune pass. Returns whether anything was read.
    pub fn step(&mut self) -> bool {
        let params = self.params;

        if self.superseded {
            return false;
        }

        if self.video.is_some() && self.next_frame >= params.frame_count {
            log::debug!("Video source delivered all {} frames", params.frame_count);
            self.retire_video();
        }

        let (want_video, skip_to, want_audio) = {
            let mut state = lock_shared(&self.shared);
            if state.generation != self.generation {
                drop(state);
                self.supersede();
                return false;
            }
            let current = state.position.video_frame;
            let consumed = params
                .audio_format
                .bytes_for_ms(state.position.audio_consumed_ms);

            state.video.prune(current.saturating_sub(params.post_unload_frames));
            state.audio.prune(consumed.saturating_sub(params.post_unload_bytes));

            // The clock jumped well past everything we have: restart the decoder there
            let skip_to = (state.video.is_empty()
                && self.next_frame + params.pre_buffer_frames < current)
                .then_some(current);

            let want_video = self.video.is_some()
                && !state.video.is_full()
                && self.next_frame < params.frame_count
                && (skip_to.is_some() || self.next_frame < current + params.pre_buffer_frames);

            let want_audio = self.audio.is_some()
                && !state.audio.is_full()
                && self.next_audio_offset < consumed + params.pre_buffer_bytes;

            (want_video, skip_to, want_audio)
        };

        let mut worked = false;
        if want_video {
            if let Some(target) = skip_to {
                log::debug!("Worker skipping video decode ahead from {} to {}", self.next_frame, target);
                self.reposition_video(target);
            }
            worked |= self.top_up_video();
        }
        if want_audio {
            worked |= self.top_up_audio();
        }
        worked
    }

    fn reposition_video(&mut self, target: u64) {
        let Some(video) = self.video.as_mut() else {
            return;
        };
        match video.seek_to(target) {
            Ok(()) => self.next_frame = target,
            Err(e) => {
                log::warn!("Video source failed to seek to {}: {}", target, e);
                self.retire_video();
            }
        }
    }

    fn top_up_video(&mut self) -> bool {
        let Some(video) = self.video.as_mut() else {
            return false;
        };

        let frame = match video.read_next() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                log::debug!("Video source exhausted at frame {}", self.next_frame);
                self.retire_video();
                return false;
            }
            Err(e) => {
                log::warn!("Video decode error at frame {}: {}", self.next_frame, e);
                self.retire_video();
                return false;
            }
        };

        let index = frame.index;
        let resume_at = {
            let mut state = lock_shared(&self.shared);
            if state.generation != self.generation {
                drop(state);
                self.supersede();
                return false;
            }
            if state.video.push(frame) {
                None
            } else {
                Some(state.video.back_index().map_or(index, |last| last + 1))
            }
        };

        match resume_at {
            None => {
                self.next_frame = index + 1;
                true
            }
            Some(target) => {
                log::debug!("Realigning video decode to buffer tail at {}", target);
                self.reposition_video(target);
                true
            }
        }
    }

    fn top_up_audio(&mut self) -> bool {
        let Some(audio) = self.audio.as_mut() else {
            return false;
        };

        match audio.read_chunk(self.params.chunk_bytes) {
            Ok(Some(data)) if !data.is_empty() => {
                let chunk = AudioChunk::new(self.next_audio_offset, data);
                self.next_audio_offset = chunk.end_offset();

                let mut state = lock_shared(&self.shared);
                if state.generation != self.generation {
                    drop(state);
                    self.supersede();
                    return false;
                }
                if let AudioPush::Resynced { expected, got } = state.audio.push(chunk) {
                    log::debug!("Audio ingestion resumed at {} (buffer expected {})", got, expected);
                }
                true
            }
            Ok(_) => {
                log::debug!("Audio source exhausted at byte {}", self.next_audio_offset);
                self.finish_audio();
                false
            }
            Err(e) => {
                log::warn!("Audio decode error at byte {}: {}", self.next_audio_offset, e);
                self.finish_audio();
                false
            }
        }
    }

    /// Close the video source and tell the clock where the stream stopped.
    fn retire_video(&mut self) {
        if self.video.is_none() {
            return;
        }
        {
            let mut state = lock_shared(&self.shared);
            if state.generation == self.generation {
                state.video_end = Some(self.next_frame);
            }
        }
        self.finish_video();
    }

    fn finish_video(&mut self) {
        if let Some(mut video) = self.video.take() {
            video.close();
        }
    }

    fn finish_audio(&mut self) {
        if let Some(mut audio) = self.audio.take() {
            audio.close();
        }
    }

    pub fn close_sources(&mut self) {
        self.finish_video();
        self.finish_audio();
    }

    fn run(mut self, running: Arc<AtomicBool>) {
        log::debug!("Buffering worker started at frame {}", self.next_frame);
        let mut idle_logged = false;

        while running.load(Ordering::SeqCst) && !self.superseded {
            if self.step() {
                continue;
            }
            if self.is_exhausted() && !idle_logged {
                log::debug!("Buffering worker idle: both sources exhausted");
                idle_logged = true;
            }
            thread::sleep(self.params.idle);
        }

        self.close_sources();
        log::debug!("Buffering worker exiting");
    }
}

/// Handle to a running buffering thread.
pub struct BufferingWorker {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BufferingWorker {
    pub fn spawn(worker: WorkerLoop) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name("buffering-worker".to_string())
            .spawn(move || worker.run(flag))?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread and wait up to `timeout` for it to exit.
    ///
    /// Returns `false` if it was still running at the deadline; the thread is
    /// then detached and releases its sources whenever it does finish.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        self.running.store(false, Ordering::SeqCst);

        let Some(handle) = self.handle.take() else {
            return true;
        };

        let start_time = Instant::now();
        while !handle.is_finished() && start_time.elapsed() < timeout {
            thread::sleep(Duration::from_millis(5));
        }

        if !handle.is_finished() {
            log::warn!(
                "Buffering worker did not terminate within {:?}; detaching it",
                timeout
            );
            return false;
        }

        if let Err(e) = handle.join() {
            log::warn!("Buffering worker panicked: {:?}", e);
        }
        true
    }
}

impl Drop for BufferingWorker {
    fn drop(&mut self) {
        self.stop(Duration::from_secs(2));
    }
}
