// =============================================================================
// MEDIA CONTROLLER - SINGLE POINT OF CONTROL FOR VIDEO AND AUDIO
// =============================================================================
//
// Owns everything for one loaded file: both sources (through the buffering
// worker), the shared ring buffers, the playback clock and the audio output.
// Every transport command goes through here so video and audio are always
// started, stopped and repositioned together.
//
// PIPELINE:
// - load/seek: open sources -> reset buffers -> start buffering worker
// - play:      start playback clock + audio output (renderer)
// - pause:     stop playback clock, pause audio output
// - seek:      tear everything down, reposition, rebuild, resume if playing
//
// =============================================================================

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::audio::{AudioOutput, AudioRenderer, AudioSource};
use crate::core::{DecodeError, EngineConfig, EngineError, EngineResult, PlaybackSnapshot, VideoFrame, VideoInfo};
use crate::playback::backend::MediaBackend;
use crate::playback::buffers::{lock_shared, SharedPlayback, SharedState};
use crate::playback::clock::{ClockParams, PlaybackClock, PlaybackStatus};
use crate::playback::worker::{BufferingWorker, WorkerLoop, WorkerParams};
use crate::video::FrameSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    /// No media loaded
    Unloaded,
    /// Loaded, buffering, clock not running
    Stopped,
    Playing,
    Paused,
    /// Pipeline is being torn down and rebuilt
    Seeking,
}

impl PlayerState {
    pub fn can_play(&self) -> bool {
        matches!(self, PlayerState::Stopped | PlayerState::Paused)
    }

    pub fn can_pause(&self) -> bool {
        matches!(self, PlayerState::Playing)
    }

    pub fn can_seek(&self) -> bool {
        matches!(
            self,
            PlayerState::Stopped | PlayerState::Playing | PlayerState::Paused
        )
    }

    /// The state a seek from `self` lands in, given whether playback restarted.
    pub fn after_seek(self, resumed: bool) -> PlayerState {
        match self {
            PlayerState::Playing if resumed => PlayerState::Playing,
            PlayerState::Stopped | PlayerState::Unloaded => PlayerState::Stopped,
            _ => PlayerState::Paused,
        }
    }

    pub fn display_text(&self) -> &'static str {
        match self {
            PlayerState::Unloaded => "No media loaded",
            PlayerState::Stopped => "Stopped",
            PlayerState::Playing => "Playing",
            PlayerState::Paused => "Paused",
            PlayerState::Seeking => "Seeking...",
        }
    }
}

pub struct MediaController {
    config: EngineConfig,
    backend: Box<dyn MediaBackend>,
    state: PlayerState,

    media_path: Option<PathBuf>,
    video_info: Option<VideoInfo>,
    has_audio: bool,
    /// The audio device could not be opened for this file
    audio_output_failed: bool,

    shared: SharedPlayback,
    worker: Option<BufferingWorker>,
    clock: Option<PlaybackClock>,
    output: Option<Box<dyn AudioOutput>>,

    frame_tx: mpsc::Sender<VideoFrame>,
    frame_rx: mpsc::Receiver<VideoFrame>,
    status_tx: mpsc::Sender<PlaybackStatus>,
    status_rx: mpsc::Receiver<PlaybackStatus>,
}

impl MediaController {
    pub fn new(config: EngineConfig, backend: Box<dyn MediaBackend>) -> Self {
        let config = config.validated();
        let (frame_tx, frame_rx) = mpsc::channel();
        let (status_tx, status_rx) = mpsc::channel();
        let shared = Arc::new(Mutex::new(SharedState::new(&config)));

        Self {
            config,
            backend,
            state: PlayerState::Unloaded,
            media_path: None,
            video_info: None,
            has_audio: false,
            audio_output_failed: false,
            shared,
            worker: None,
            clock: None,
            output: None,
            frame_tx,
            frame_rx,
            status_tx,
            status_rx,
        }
    }

    // =============================================================================
    // PUBLIC INTERFACE
    // =============================================================================

    /// Open a file and start buffering from its first frame. Playback stays stopped.
    pub fn load(&mut self, path: &Path) -> EngineResult<()> {
        log::info!("Loading media {:?}", path);
        self.close();

        let video = match self.backend.open_video(path) {
            Ok(video) => video,
            Err(e) => {
                log::error!("Failed to open {:?}: {}", path, e);
                return Err(e.into());
            }
        };
        let info = video.info();
        let audio = self.open_audio_or_none(path, 0.0);

        self.media_path = Some(path.to_path_buf());
        self.video_info = Some(info);
        lock_shared(&self.shared).reset(0, 0.0);

        if let Err(e) = self.start_buffering(video, audio, 0, 0.0) {
            self.close();
            return Err(e);
        }

        self.state = PlayerState::Stopped;
        log::info!(
            "Loaded {:?}: {} frames @ {:.2} fps ({:.2}s), audio: {}",
            path,
            info.frame_count,
            info.fps,
            info.duration_s,
            self.has_audio
        );
        Ok(())
    }

    /// Start or resume playback. At end of media this rewinds to the start first.
    pub fn play(&mut self) -> EngineResult<()> {
        // End of media reached but update() hasn't seen it yet
        if self.state == PlayerState::Playing && lock_shared(&self.shared).end_of_media {
            self.stop_playback();
            self.state = PlayerState::Stopped;
        }

        match self.state {
            PlayerState::Unloaded => return Err(EngineError::NotLoaded),
            PlayerState::Seeking => return Err(EngineError::InvalidState("seeking")),
            PlayerState::Playing => return Ok(()),
            PlayerState::Stopped | PlayerState::Paused => {}
        }

        if lock_shared(&self.shared).end_of_media {
            log::info!("Play at end of media, rewinding to start");
            self.perform_seek(0, 0.0)?;
        }

        self.start_playback()?;
        self.state = PlayerState::Playing;
        log::info!("Playback started at {:.2}s", self.current_time());
        Ok(())
    }

    pub fn pause(&mut self) -> EngineResult<()> {
        match self.state {
            PlayerState::Unloaded => return Err(EngineError::NotLoaded),
            PlayerState::Seeking => return Err(EngineError::InvalidState("seeking")),
            PlayerState::Playing => {}
            PlayerState::Stopped | PlayerState::Paused => {
                log::debug!("Pause ignored in state {:?}", self.state);
                return Ok(());
            }
        }

        self.stop_playback();
        self.state = PlayerState::Paused;
        log::info!("Playback paused at {:.2}s", self.current_time());
        Ok(())
    }

    pub fn toggle_play_pause(&mut self) -> EngineResult<()> {
        if self.state == PlayerState::Playing {
            self.pause()
        } else {
            self.play()
        }
    }

    /// Jump to `time_s`, clamped to the media duration.
    pub fn seek(&mut self, time_s: f64) -> EngineResult<()> {
        let info = self.video_info.ok_or(EngineError::NotLoaded)?;
        if !self.state.can_seek() {
            return Err(EngineError::InvalidState(self.state.display_text()));
        }

        let sanitized = if time_s.is_finite() {
            time_s.clamp(0.0, info.duration_s)
        } else {
            log::warn!("Invalid seek time {}, using 0.0", time_s);
            0.0
        };

        log::info!("Seeking to {:.2}s", sanitized);
        self.perform_seek(info.frame_for_time(sanitized), (sanitized * 1000.0).floor())
    }

    /// Seek to a percentage (0..=100) of the duration.
    pub fn seek_percent(&mut self, percent: f64) -> EngineResult<()> {
        let info = self.video_info.ok_or(EngineError::NotLoaded)?;
        let fraction = if percent.is_finite() {
            percent.clamp(0.0, 100.0) / 100.0
        } else {
            0.0
        };
        self.seek(info.duration_s * fraction)
    }

    /// Relative seek by `seconds`, negative to go back.
    pub fn skip(&mut self, seconds: f64) -> EngineResult<()> {
        if self.video_info.is_none() {
            return Err(EngineError::NotLoaded);
        }
        self.seek(self.current_time() + seconds)
    }

    pub fn skip_forward(&mut self) -> EngineResult<()> {
        self.skip(self.config.skip_seconds)
    }

    pub fn skip_backward(&mut self) -> EngineResult<()> {
        self.skip(-self.config.skip_seconds)
    }

    /// Tear the pipeline down and rebuild it at the given position.
    ///
    /// A failure to reopen the video leaves the controller unloaded.
    pub fn perform_seek(&mut self, target_frame: u64, target_audio_ms: f64) -> EngineResult<()> {
        let (Some(path), Some(info)) = (self.media_path.clone(), self.video_info) else {
            return Err(EngineError::NotLoaded);
        };
        let target_frame = target_frame.min(info.frame_count);
        let target_audio_ms = target_audio_ms.max(0.0);

        let prior_state = self.state;
        let was_playing = prior_state == PlayerState::Playing;
        self.state = PlayerState::Seeking;

        self.stop_playback();
        self.stop_buffering();

        {
            let mut state = lock_shared(&self.shared);
            state.reset(target_frame, target_audio_ms);
        }
        // Anything still queued predates the seek
        self.frame_rx.try_iter().for_each(drop);
        self.status_rx.try_iter().for_each(drop);

        let mut video = match self.backend.open_video(&path) {
            Ok(video) => video,
            Err(e) => {
                log::error!("Seek failed to reopen {:?}: {}", path, e);
                self.close();
                return Err(e.into());
            }
        };
        if let Err(e) = video.seek_to(target_frame) {
            log::error!("Seek failed to position video at frame {}: {}", target_frame, e);
            self.close();
            return Err(match e {
                DecodeError::Restart(open) => open.into(),
                _ => EngineError::InvalidState("repositioning the video source"),
            });
        }
        let audio = self.open_audio_or_none(&path, target_audio_ms / 1000.0);

        if let Err(e) = self.start_buffering(video, audio, target_frame, target_audio_ms) {
            self.close();
            return Err(e);
        }
        self.wait_for_initial_fill(self.config.settle_delay());

        let resumed = if was_playing {
            self.start_playback()
        } else {
            Ok(())
        };
        self.state = prior_state.after_seek(resumed.is_ok());
        resumed?;

        log::debug!(
            "Seek complete: frame {}, audio {:.0} ms, resumed: {}",
            target_frame,
            target_audio_ms,
            was_playing
        );
        Ok(())
    }

    /// Stop everything and release the file.
    pub fn close(&mut self) {
        if self.state == PlayerState::Unloaded && self.worker.is_none() && self.output.is_none() {
            return;
        }
        log::info!("Closing media {:?}", self.media_path);

        self.stop_playback();
        self.output = None;
        self.stop_buffering();

        lock_shared(&self.shared).reset(0, 0.0);
        self.frame_rx.try_iter().for_each(drop);
        self.status_rx.try_iter().for_each(drop);

        self.media_path = None;
        self.video_info = None;
        self.has_audio = false;
        self.audio_output_failed = false;
        self.state = PlayerState::Unloaded;
    }

    /// Drain status events from the clock thread. Call once per UI frame.
    pub fn update(&mut self) -> Vec<PlaybackStatus> {
        let events: Vec<PlaybackStatus> = self.status_rx.try_iter().collect();

        if events.contains(&PlaybackStatus::EndOfMedia) && self.state == PlayerState::Playing {
            self.stop_playback();
            self.state = PlayerState::Stopped;
            log::info!("Playback stopped at end of media");
        }
        events
    }

    /// Newest presented frame since the last call, dropping older ones.
    pub fn take_latest_frame(&mut self) -> Option<VideoFrame> {
        self.frame_rx.try_iter().last()
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        let Some(info) = self.video_info else {
            return PlaybackSnapshot::default();
        };
        let state = lock_shared(&self.shared);
        PlaybackSnapshot {
            current_time_s: info.time_for_frame(state.position.video_frame).min(info.duration_s),
            duration_s: info.duration_s,
            is_playing: self.state == PlayerState::Playing && state.playing,
            end_of_media: state.end_of_media,
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn media_path(&self) -> Option<&Path> {
        self.media_path.as_deref()
    }

    pub fn video_info(&self) -> Option<VideoInfo> {
        self.video_info
    }

    pub fn has_audio(&self) -> bool {
        self.has_audio
    }

    /// Whether an audio device stream has been opened for this file.
    pub fn has_audio_output(&self) -> bool {
        self.output.is_some()
    }

    pub fn current_frame(&self) -> u64 {
        lock_shared(&self.shared).position.video_frame
    }

    pub fn current_time(&self) -> f64 {
        self.snapshot().current_time_s
    }

    pub fn shared(&self) -> &SharedPlayback {
        &self.shared
    }

    // =============================================================================
    // PIPELINE PLUMBING
    // =============================================================================

    fn open_audio_or_none(&mut self, path: &Path, start_time_s: f64) -> Option<Box<dyn AudioSource>> {
        if self.audio_output_failed {
            self.has_audio = false;
            return None;
        }
        let audio = match self.backend.open_audio(path, start_time_s) {
            Ok(audio) => audio,
            Err(e) => {
                log::warn!("Audio unavailable for {:?}, continuing video-only: {}", path, e);
                None
            }
        };
        self.has_audio = audio.is_some();
        audio
    }

    fn start_buffering(
        &mut self,
        video: Box<dyn FrameSource>,
        audio: Option<Box<dyn AudioSource>>,
        start_frame: u64,
        start_audio_ms: f64,
    ) -> EngineResult<()> {
        let info = video.info();
        let params = WorkerParams::new(&self.config, &info, self.config.audio_format());
        let worker = WorkerLoop::new(self.shared.clone(), video, audio, params, start_frame, start_audio_ms);

        let worker = BufferingWorker::spawn(worker).map_err(EngineError::Thread)?;
        self.worker = Some(worker);
        Ok(())
    }

    fn stop_buffering(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop(self.config.worker_join_timeout());
        }
    }

    fn start_playback(&mut self) -> EngineResult<()> {
        let info = self.video_info.ok_or(EngineError::NotLoaded)?;
        lock_shared(&self.shared).playing = true;

        if self.clock.is_none() {
            let params = ClockParams::new(&self.config, &info);
            let clock = PlaybackClock::start(
                self.shared.clone(),
                params,
                self.frame_tx.clone(),
                self.status_tx.clone(),
            );
            match clock {
                Ok(clock) => self.clock = Some(clock),
                Err(e) => {
                    lock_shared(&self.shared).playing = false;
                    return Err(EngineError::Thread(e));
                }
            }
        }

        if self.has_audio {
            self.start_audio_output();
        }
        Ok(())
    }

    fn start_audio_output(&mut self) {
        if self.output.is_none() {
            let renderer = AudioRenderer::new(
                self.shared.clone(),
                self.config.audio_format(),
                self.config.audio_chunk_frames,
            );
            match self.backend.open_output(renderer) {
                Ok(output) => self.output = Some(output),
                Err(e) => {
                    log::warn!("Audio output unavailable, continuing video-only: {}", e);
                    self.has_audio = false;
                    self.audio_output_failed = true;
                    return;
                }
            }
        }

        if let Some(output) = self.output.as_mut() {
            if let Err(e) = output.play() {
                log::warn!("Failed to start audio output: {}", e);
            }
        }
    }

    fn stop_playback(&mut self) {
        lock_shared(&self.shared).playing = false;
        if let Some(mut clock) = self.clock.take() {
            clock.stop();
        }
        if let Some(output) = self.output.as_mut() {
            output.pause();
        }
    }

    fn wait_for_initial_fill(&self, settle: Duration) {
        let start_time = Instant::now();
        while start_time.elapsed() < settle {
            if !lock_shared(&self.shared).video.is_empty() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        log::debug!("No frames buffered within the {:?} settle delay", settle);
    }
}

impl Drop for MediaController {
    fn drop(&mut self) {
        log::debug!("MediaController::drop() called - current state: {:?}", self.state);
        self.close();
    }
}
