use std::path::{Path, PathBuf};
use std::process::Command;

use image::RgbImage;

use crate::core::{DecodeError, VideoFrame, VideoInfo};
use crate::video::ffmpeg_manager::{read_full, DecoderProcess, FFmpegManager};

/// Decoded picture frames in strictly increasing index order.
pub trait FrameSource: Send {
    fn info(&self) -> VideoInfo;

    /// Reposition so the next `read_next` yields `frame_index` (or the first frame after it).
    fn seek_to(&mut self, frame_index: u64) -> Result<(), DecodeError>;

    /// `Ok(None)` is end of stream.
    fn read_next(&mut self) -> Result<Option<VideoFrame>, DecodeError>;

    /// Release decode resources. Safe to call more than once.
    fn close(&mut self);
}

/// Frame source backed by an `ffmpeg` child writing raw RGB24 frames to stdout.
///
/// The child is started lazily at the position of the next requested frame,
/// and `-r` pins its output to the probed rate so frame `n` of the pipe is
/// always `start + n`.
pub struct FfmpegFrameSource {
    ffmpeg: PathBuf,
    video_path: PathBuf,
    info: VideoInfo,
    manager: FFmpegManager,
    process: Option<DecoderProcess>,
    next_index: u64,
    frame_buffer: Vec<u8>,
    closed: bool,
}

impl FfmpegFrameSource {
    pub fn new(manager: FFmpegManager, ffmpeg: PathBuf, video_path: &Path, info: VideoInfo) -> Self {
        Self {
            ffmpeg,
            video_path: video_path.to_path_buf(),
            info,
            manager,
            process: None,
            next_index: 0,
            frame_buffer: Vec::new(),
            closed: false,
        }
    }

    fn frame_size(&self) -> usize {
        self.info.width as usize * self.info.height as usize * 3
    }

    fn start_process(&mut self) -> Result<(), DecodeError> {
        let start_time = self.info.time_for_frame(self.next_index);

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-nostdin")
            .arg("-loglevel").arg("error")
            .arg("-ss").arg(format!("{:.3}", start_time))
            .arg("-i").arg(&self.video_path)
            .arg("-map").arg("0:v:0")
            .arg("-an")
            .arg("-f").arg("rawvideo")
            .arg("-pix_fmt").arg("rgb24")
            .arg("-r").arg(format!("{:.6}", self.info.fps))
            .arg("pipe:1");

        log::debug!(
            "Starting video decoder for {:?} at frame {} ({:.3}s)",
            self.video_path,
            self.next_index,
            start_time
        );
        self.process = Some(self.manager.spawn_stream(cmd)?);
        Ok(())
    }
}

impl FrameSource for FfmpegFrameSource {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn seek_to(&mut self, frame_index: u64) -> Result<(), DecodeError> {
        if let Some(mut process) = self.process.take() {
            process.terminate();
        }
        self.next_index = frame_index.min(self.info.frame_count);
        self.closed = false;
        Ok(())
    }

    fn read_next(&mut self) -> Result<Option<VideoFrame>, DecodeError> {
        if self.closed || self.next_index >= self.info.frame_count {
            return Ok(None);
        }
        if self.process.is_none() {
            self.start_process()?;
        }

        let frame_size = self.frame_size();
        self.frame_buffer.resize(frame_size, 0);

        let Some(stdout) = self.process.as_mut().and_then(|p| p.stdout()) else {
            return Ok(None);
        };
        let got = read_full(stdout, &mut self.frame_buffer)?;

        if got == 0 {
            log::debug!("Video decoder reached end of stream at frame {}", self.next_index);
            return Ok(None);
        }
        if got < frame_size {
            return Err(DecodeError::TruncatedFrame {
                expected: frame_size,
                got,
            });
        }

        let pixels = RgbImage::from_raw(self.info.width, self.info.height, self.frame_buffer.clone())
            .ok_or(DecodeError::TruncatedFrame {
                expected: frame_size,
                got,
            })?;

        let frame = VideoFrame::new(self.next_index, pixels);
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.terminate();
        }
        self.closed = true;
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        self.close();
    }
}
