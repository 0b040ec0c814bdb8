//! Generated media for exercising the pipeline without ffmpeg or a sound card.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use image::RgbImage;

use crate::audio::{AudioOutput, AudioRenderer, AudioSource};
use crate::core::{AudioFormat, AudioSourceInfo, DecodeError, SourceOpenError, VideoFrame, VideoInfo};
use crate::playback::backend::MediaBackend;
use crate::video::FrameSource;

pub fn video_info(frame_count: u64, fps: f64) -> VideoInfo {
    VideoInfo {
        fps,
        frame_count,
        duration_s: frame_count as f64 / fps,
        width: 2,
        height: 2,
    }
}

/// Frames whose red channel encodes the low byte of their index.
pub struct SyntheticFrameSource {
    info: VideoInfo,
    next_index: u64,
    fail_at: Option<u64>,
    closed: Arc<AtomicBool>,
}

impl SyntheticFrameSource {
    pub fn new(info: VideoInfo) -> Self {
        Self {
            info,
            next_index: 0,
            fail_at: None,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Return a decode error instead of frame `index`.
    pub fn failing_at(mut self, index: u64) -> Self {
        self.fail_at = Some(index);
        self
    }

    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }
}

impl FrameSource for SyntheticFrameSource {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn seek_to(&mut self, frame_index: u64) -> Result<(), DecodeError> {
        self.next_index = frame_index.min(self.info.frame_count);
        Ok(())
    }

    fn read_next(&mut self) -> Result<Option<VideoFrame>, DecodeError> {
        if self.closed.load(Ordering::SeqCst) || self.next_index >= self.info.frame_count {
            return Ok(None);
        }
        if self.fail_at == Some(self.next_index) {
            return Err(DecodeError::TruncatedFrame {
                expected: 12,
                got: 5,
            });
        }

        let shade = (self.next_index % 256) as u8;
        let pixels = RgbImage::from_pixel(self.info.width, self.info.height, image::Rgb([shade, 0, 0]));
        let frame = VideoFrame::new(self.next_index, pixels);
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// PCM where every byte is its absolute stream offset modulo 251.
pub struct SyntheticAudioSource {
    info: AudioSourceInfo,
    offset: u64,
    end: u64,
    closed: bool,
}

impl SyntheticAudioSource {
    pub fn new(format: AudioFormat, total_duration_ms: f64, start_time_s: f64) -> Self {
        Self {
            info: AudioSourceInfo {
                format,
                total_duration_ms,
            },
            offset: format.bytes_for_ms(start_time_s * 1000.0),
            end: format.bytes_for_ms(total_duration_ms),
            closed: false,
        }
    }

    pub fn byte_at(offset: u64) -> u8 {
        (offset % 251) as u8
    }
}

impl AudioSource for SyntheticAudioSource {
    fn info(&self) -> AudioSourceInfo {
        self.info
    }

    fn read_chunk(&mut self, max_bytes: usize) -> Result<Option<Vec<u8>>, DecodeError> {
        if self.closed || self.offset >= self.end {
            return Ok(None);
        }
        let bytes_per_frame = self.info.format.bytes_per_frame() as u64;
        let remaining = self.end - self.offset;
        let len = (max_bytes as u64).min(remaining);
        let len = len - len % bytes_per_frame;
        if len == 0 {
            return Ok(None);
        }

        let data = (self.offset..self.offset + len).map(Self::byte_at).collect();
        self.offset += len;
        Ok(Some(data))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// What the controller asked of a [`SyntheticBackend`].
#[derive(Debug, Default)]
pub struct BackendLog {
    pub video_opens: usize,
    pub audio_starts: Vec<f64>,
    pub outputs_opened: usize,
    pub output_playing: bool,
}

/// Records play/pause into the backend log; never pulls the renderer.
pub struct NullOutput {
    log: Arc<Mutex<BackendLog>>,
}

impl AudioOutput for NullOutput {
    fn play(&mut self) -> anyhow::Result<()> {
        self.log.lock().unwrap().output_playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.log.lock().unwrap().output_playing = false;
    }
}

#[derive(Clone)]
pub struct SyntheticBackend {
    video: VideoInfo,
    audio_format: Option<AudioFormat>,
    video_fail_at: Option<u64>,
    pub fail_video_open: Arc<AtomicBool>,
    pub fail_output_open: Arc<AtomicBool>,
    pub log: Arc<Mutex<BackendLog>>,
}

impl SyntheticBackend {
    pub fn new(video: VideoInfo, audio_format: Option<AudioFormat>) -> Self {
        Self {
            video,
            audio_format,
            video_fail_at: None,
            fail_video_open: Arc::new(AtomicBool::new(false)),
            fail_output_open: Arc::new(AtomicBool::new(false)),
            log: Arc::new(Mutex::new(BackendLog::default())),
        }
    }

    /// Every opened video source fails to decode frame `index`.
    pub fn with_video_failing_at(mut self, index: u64) -> Self {
        self.video_fail_at = Some(index);
        self
    }
}

impl MediaBackend for SyntheticBackend {
    fn open_video(&self, path: &Path) -> Result<Box<dyn FrameSource>, SourceOpenError> {
        if self.fail_video_open.load(Ordering::SeqCst) {
            return Err(SourceOpenError::Probe {
                path: path.to_path_buf(),
                reason: "synthetic failure".to_string(),
            });
        }
        self.log.lock().unwrap().video_opens += 1;
        let source = SyntheticFrameSource::new(self.video);
        Ok(Box::new(match self.video_fail_at {
            Some(index) => source.failing_at(index),
            None => source,
        }))
    }

    fn open_audio(
        &self,
        _path: &Path,
        start_time_s: f64,
    ) -> Result<Option<Box<dyn AudioSource>>, SourceOpenError> {
        let Some(format) = self.audio_format else {
            return Ok(None);
        };
        self.log.lock().unwrap().audio_starts.push(start_time_s);
        Ok(Some(Box::new(SyntheticAudioSource::new(
            format,
            self.video.duration_s * 1000.0,
            start_time_s,
        ))))
    }

    fn open_output(&self, _renderer: AudioRenderer) -> anyhow::Result<Box<dyn AudioOutput>> {
        if self.fail_output_open.load(Ordering::SeqCst) {
            anyhow::bail!("no audio device");
        }
        self.log.lock().unwrap().outputs_opened += 1;
        Ok(Box::new(NullOutput {
            log: self.log.clone(),
        }))
    }
}
