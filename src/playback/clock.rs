use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::core::{EngineConfig, VideoFrame, VideoInfo};
use crate::playback::buffers::{lock_shared, SharedPlayback, SharedState};

/// Status updates from the clock thread
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackStatus {
    /// A frame was presented; `frame` is the counter after presenting it
    PositionUpdate { frame: u64, time_s: f64 },
    EndOfMedia,
}

#[derive(Debug, Clone, Copy)]
pub struct ClockParams {
    pub fps: f64,
    pub frame_count: u64,
    pub resync_threshold_ms: Option<f64>,
}

impl ClockParams {
    pub fn new(config: &EngineConfig, video: &VideoInfo) -> Self {
        Self {
            fps: video.fps,
            frame_count: video.frame_count,
            resync_threshold_ms: config.av_resync_threshold_ms.map(|ms| ms as f64),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1.0))
    }
}

/// What one clock tick did.
pub enum TickOutcome {
    /// Not playing; nothing happens
    Idle,
    Presented(VideoFrame),
    /// No frame buffered for the current position yet
    Underrun,
    /// Video is ahead of the audio clock; wait for it
    Held,
    EndOfMedia,
}

/// Advance the video clock by at most one frame. Never blocks.
pub fn tick(state: &mut SharedState, params: &ClockParams) -> TickOutcome {
    if !state.playing || state.end_of_media {
        return TickOutcome::Idle;
    }

    let mut current = state.position.video_frame;

    if let Some(threshold) = params.resync_threshold_ms {
        if state.audio_clock_active && current < params.frame_count {
            let audio_ms = state.position.audio_consumed_ms;
            let drift_ms = audio_ms - current as f64 * 1000.0 / params.fps;

            if drift_ms > threshold {
                let target = ((audio_ms * params.fps / 1000.0).floor() as u64).min(params.frame_count);
                log::trace!("Video behind audio by {:.0} ms, jumping {} -> {}", drift_ms, current, target);
                state.position.video_frame = target;
                current = target;
            } else if drift_ms < -threshold {
                return TickOutcome::Held;
            }
        }
    }

    // The source may stop short of the probed frame count
    let end_frame = state
        .video_end
        .map_or(params.frame_count, |end| end.min(params.frame_count));

    if current >= end_frame {
        state.position.video_frame = end_frame;
        state.end_of_media = true;
        state.playing = false;
        return TickOutcome::EndOfMedia;
    }

    // Frames behind the counter can never be presented
    state.video.prune(current);

    match state.video.front_index() {
        None => return TickOutcome::Underrun,
        Some(front) if front > current => {
            log::trace!("Video clock catching up from {} to {}", current, front);
            current = front.min(params.frame_count);
            state.position.video_frame = current;
        }
        Some(_) => {}
    }

    match state.video.pop_if_due(current) {
        Some(frame) => {
            state.position.video_frame = current + 1;
            TickOutcome::Presented(frame)
        }
        None => TickOutcome::Underrun,
    }
}

/// The periodic driver: one tick every `1/fps` on a dedicated thread.
pub struct PlaybackClock {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PlaybackClock {
    pub fn start(
        shared: SharedPlayback,
        params: ClockParams,
        frame_tx: mpsc::Sender<VideoFrame>,
        status_tx: mpsc::Sender<PlaybackStatus>,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("playback-clock".to_string())
            .spawn(move || run_clock(shared, params, stop_rx, frame_tx, status_tx))?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel the tick. Returns once the thread has exited.
    pub fn stop(&mut self) {
        // Dropping the sender wakes the thread even if the send is never seen
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.join() {
                log::warn!("Playback clock panicked: {:?}", e);
            }
        }
    }
}

impl Drop for PlaybackClock {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_clock(
    shared: SharedPlayback,
    params: ClockParams,
    stop_rx: mpsc::Receiver<()>,
    frame_tx: mpsc::Sender<VideoFrame>,
    status_tx: mpsc::Sender<PlaybackStatus>,
) {
    let interval = params.interval();
    let mut next_deadline = Instant::now();
    log::debug!("Playback clock started ({:.2} fps)", params.fps);

    loop {
        let wait = next_deadline.saturating_duration_since(Instant::now());
        match stop_rx.recv_timeout(wait) {
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        next_deadline += interval;
        let now = Instant::now();
        if next_deadline < now {
            // Fell more than a frame behind; don't burst to make it up
            next_deadline = now + interval;
        }

        let outcome = {
            let mut state = lock_shared(&shared);
            tick(&mut state, &params)
        };

        match outcome {
            TickOutcome::Presented(frame) => {
                let frame_counter = frame.index + 1;
                let _ = frame_tx.send(frame);
                let _ = status_tx.send(PlaybackStatus::PositionUpdate {
                    frame: frame_counter,
                    time_s: frame_counter as f64 / params.fps,
                });
            }
            TickOutcome::EndOfMedia => {
                log::info!("Playback reached end of media");
                let _ = status_tx.send(PlaybackStatus::EndOfMedia);
                break;
            }
            TickOutcome::Idle | TickOutcome::Underrun | TickOutcome::Held => {}
        }
    }

    log::debug!("Playback clock stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use std::sync::{Arc, Mutex};

    fn params(frame_count: u64, resync: Option<f64>) -> ClockParams {
        ClockParams {
            fps: 30.0,
            frame_count,
            resync_threshold_ms: resync,
        }
    }

    fn playing_state(frames: std::ops::Range<u64>) -> SharedState {
        let mut state = SharedState::new(&EngineConfig::default());
        state.playing = true;
        for index in frames {
            state.video.push(VideoFrame::new(index, RgbImage::new(1, 1)));
        }
        state
    }

    fn presented(outcome: TickOutcome) -> Option<u64> {
        match outcome {
            TickOutcome::Presented(frame) => Some(frame.index),
            _ => None,
        }
    }

    #[test]
    fn test_ticks_present_frames_in_order() {
        let mut state = playing_state(0..3);
        let p = params(100, None);

        assert_eq!(presented(tick(&mut state, &p)), Some(0));
        assert_eq!(presented(tick(&mut state, &p)), Some(1));
        assert_eq!(presented(tick(&mut state, &p)), Some(2));
        assert_eq!(state.position.video_frame, 3);
    }

    #[test]
    fn test_paused_tick_does_nothing() {
        let mut state = playing_state(0..3);
        state.playing = false;

        assert!(matches!(tick(&mut state, &params(100, None)), TickOutcome::Idle));
        assert_eq!(state.position.video_frame, 0);
        assert_eq!(state.video.len(), 3);
    }

    #[test]
    fn test_underrun_stalls_without_advancing() {
        let mut state = playing_state(0..0);
        state.position.video_frame = 12;

        assert!(matches!(tick(&mut state, &params(100, None)), TickOutcome::Underrun));
        assert_eq!(state.position.video_frame, 12);
        assert!(!state.end_of_media);
    }

    #[test]
    fn test_front_ahead_of_counter_catches_up() {
        let mut state = playing_state(5..8);
        state.position.video_frame = 2;

        assert_eq!(presented(tick(&mut state, &params(100, None))), Some(5));
        assert_eq!(state.position.video_frame, 6);
    }

    #[test]
    fn test_stale_frames_behind_counter_are_dropped() {
        let mut state = playing_state(0..6);
        state.position.video_frame = 3;

        assert_eq!(presented(tick(&mut state, &params(100, None))), Some(3));
        assert_eq!(state.video.indices(), vec![4, 5]);
    }

    #[test]
    fn test_reaching_frame_count_signals_end_of_media() {
        let mut state = playing_state(0..2);
        let p = params(2, None);

        assert_eq!(presented(tick(&mut state, &p)), Some(0));
        assert_eq!(presented(tick(&mut state, &p)), Some(1));
        assert!(matches!(tick(&mut state, &p), TickOutcome::EndOfMedia));
        assert!(state.end_of_media);
        assert!(!state.playing);
        assert_eq!(state.position.video_frame, 2);

        // Further ticks are inert
        assert!(matches!(tick(&mut state, &p), TickOutcome::Idle));
    }

    #[test]
    fn test_counter_past_end_is_clamped() {
        let mut state = playing_state(0..0);
        state.position.video_frame = 40;

        assert!(matches!(tick(&mut state, &params(30, None)), TickOutcome::EndOfMedia));
        assert_eq!(state.position.video_frame, 30);
    }

    #[test]
    fn test_source_ending_early_signals_end_of_media() {
        let mut state = playing_state(8..10);
        state.position.video_frame = 8;
        state.video_end = Some(10);
        let p = params(300, None);

        assert_eq!(presented(tick(&mut state, &p)), Some(8));
        assert_eq!(presented(tick(&mut state, &p)), Some(9));
        assert!(matches!(tick(&mut state, &p), TickOutcome::EndOfMedia));
        assert!(state.end_of_media);
        assert!(!state.playing);
        assert_eq!(state.position.video_frame, 10);
    }

    #[test]
    fn test_underrun_before_video_end_keeps_waiting() {
        let mut state = playing_state(0..0);
        state.position.video_frame = 4;
        state.video_end = Some(10);

        // Nothing buffered yet but the stream has not ended here
        assert!(matches!(tick(&mut state, &params(300, None)), TickOutcome::Underrun));
        assert!(!state.end_of_media);
    }

    #[test]
    fn test_video_lagging_audio_jumps_forward() {
        let mut state = playing_state(0..41);
        state.audio_clock_active = true;
        state.position.audio_consumed_ms = 1000.0;

        assert_eq!(presented(tick(&mut state, &params(100, Some(250.0)))), Some(30));
        assert_eq!(state.position.video_frame, 31);
        assert_eq!(state.video.front_index(), Some(31));
    }

    #[test]
    fn test_video_leading_audio_holds() {
        let mut state = playing_state(30..35);
        state.position.video_frame = 30;
        state.audio_clock_active = true;
        state.position.audio_consumed_ms = 0.0;

        assert!(matches!(tick(&mut state, &params(100, Some(250.0))), TickOutcome::Held));
        assert_eq!(state.position.video_frame, 30);
        assert_eq!(state.video.len(), 5);
    }

    #[test]
    fn test_resync_ignored_without_active_audio() {
        let mut state = playing_state(0..5);
        state.position.audio_consumed_ms = 5000.0;

        assert_eq!(presented(tick(&mut state, &params(100, Some(250.0)))), Some(0));
    }

    #[test]
    fn test_small_drift_is_tolerated() {
        let mut state = playing_state(0..5);
        state.audio_clock_active = true;
        // 6 frames at 30 fps is 200 ms
        state.position.audio_consumed_ms = 200.0;

        assert_eq!(presented(tick(&mut state, &params(100, Some(250.0)))), Some(0));
    }

    #[test]
    fn test_clock_thread_plays_to_end() {
        let shared = Arc::new(Mutex::new(playing_state(0..5)));
        let (frame_tx, frame_rx) = mpsc::channel();
        let (status_tx, status_rx) = mpsc::channel();

        let p = ClockParams {
            fps: 200.0,
            frame_count: 5,
            resync_threshold_ms: None,
        };
        let mut clock = PlaybackClock::start(shared.clone(), p, frame_tx, status_tx).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut saw_end = false;
        while Instant::now() < deadline {
            match status_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(PlaybackStatus::EndOfMedia) => {
                    saw_end = true;
                    break;
                }
                Ok(_) | Err(_) => {}
            }
        }
        clock.stop();

        assert!(saw_end);
        let indices: Vec<u64> = frame_rx.try_iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert!(lock_shared(&shared).end_of_media);
    }

    #[test]
    fn test_clock_stop_is_prompt() {
        let shared = Arc::new(Mutex::new(playing_state(0..0)));
        let (frame_tx, _frame_rx) = mpsc::channel();
        let (status_tx, _status_rx) = mpsc::channel();

        let mut clock = PlaybackClock::start(shared, params(100, None), frame_tx, status_tx).unwrap();
        assert!(clock.is_running());

        let start = Instant::now();
        clock.stop();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(!clock.is_running());
    }
}
