use image::RgbImage;

/// A decoded picture, owned by the video ring buffer until presented once.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub index: u64,
    pub pixels: RgbImage,
}

impl VideoFrame {
    pub fn new(index: u64, pixels: RgbImage) -> Self {
        Self { index, pixels }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// Raw PCM bytes positioned in the stream by the byte offset of `data[0]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub start_offset: u64,
    pub data: Vec<u8>,
}

impl AudioChunk {
    pub fn new(start_offset: u64, data: Vec<u8>) -> Self {
        Self { start_offset, data }
    }

    /// Offset one past the last byte.
    pub fn end_offset(&self) -> u64 {
        self.start_offset + self.data.len() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Signed 16-bit little-endian.
    S16Le,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::S16Le => 2,
        }
    }

    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            SampleFormat::S16Le => "s16le",
        }
    }
}

/// Layout of the interleaved PCM stream produced by an audio source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    pub fn s16le(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            sample_format: SampleFormat::S16Le,
        }
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.sample_format.bytes_per_sample()
    }

    /// Byte offset of a millisecond position, aligned down to a whole sample frame.
    pub fn bytes_for_ms(&self, ms: f64) -> u64 {
        if ms <= 0.0 {
            return 0;
        }
        let frames = (ms * self.sample_rate as f64 / 1000.0).floor() as u64;
        frames * self.bytes_per_frame() as u64
    }

    pub fn ms_for_frames(&self, frames: usize) -> f64 {
        frames as f64 / self.sample_rate as f64 * 1000.0
    }
}

/// Stream parameters reported by a frame source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub fps: f64,
    pub frame_count: u64,
    pub duration_s: f64,
    pub width: u32,
    pub height: u32,
}

impl VideoInfo {
    pub fn frame_for_time(&self, time_s: f64) -> u64 {
        let frame = (time_s.max(0.0) * self.fps).floor() as u64;
        frame.min(self.frame_count)
    }

    pub fn time_for_frame(&self, frame: u64) -> f64 {
        if self.fps > 0.0 {
            frame as f64 / self.fps
        } else {
            0.0
        }
    }
}

/// Stream parameters reported by an audio source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioSourceInfo {
    pub format: AudioFormat,
    pub total_duration_ms: f64,
}

/// What the UI polls for its progress bar and time label.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlaybackSnapshot {
    pub current_time_s: f64,
    pub duration_s: f64,
    pub is_playing: bool,
    pub end_of_media: bool,
}

impl PlaybackSnapshot {
    pub fn progress_percent(&self) -> f64 {
        if self.duration_s > 0.0 {
            (self.current_time_s / self.duration_s * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        }
    }

    pub fn time_label(&self) -> String {
        if self.duration_s <= 0.0 {
            return "00:00 / 00:00".to_string();
        }
        format!(
            "{} / {}",
            format_time(self.current_time_s),
            format_time(self.duration_s)
        )
    }
}

/// `MM:SS`, minutes are not wrapped into hours.
pub fn format_time(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}
