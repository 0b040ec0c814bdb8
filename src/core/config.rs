use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::core::media::AudioFormat;

/// Tuning for one playback engine instance.
///
/// Every field has a default, so config files written by older versions
/// keep loading after new fields are added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds of look-ahead the buffering worker tries to keep.
    pub pre_buffer_seconds: f64,
    /// Seconds of already-played data kept before eviction.
    pub post_unload_seconds: f64,
    pub max_video_frames: usize,
    pub max_audio_chunks: usize,
    /// Sample frames per audio chunk and per renderer block.
    pub audio_chunk_frames: usize,
    pub audio_sample_rate: u32,
    pub audio_channels: u16,
    pub worker_idle_ms: u64,
    pub worker_join_timeout_ms: u64,
    pub process_kill_timeout_ms: u64,
    /// Pause after (re)starting the worker so the first frames can land.
    pub settle_delay_ms: u64,
    pub skip_seconds: f64,
    /// `None` disables drift correction between the video counter and the audio clock.
    pub av_resync_threshold_ms: Option<u64>,
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    pub output_device_name: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pre_buffer_seconds: 5.0,
            post_unload_seconds: 10.0,
            max_video_frames: 500,
            max_audio_chunks: 100,
            audio_chunk_frames: 1024,
            audio_sample_rate: 44_100,
            audio_channels: 2,
            worker_idle_ms: 5,
            worker_join_timeout_ms: 2000,
            process_kill_timeout_ms: 1000,
            settle_delay_ms: 200,
            skip_seconds: 5.0,
            av_resync_threshold_ms: Some(250),
            ffmpeg_path: None,
            ffprobe_path: None,
            output_device_name: None,
        }
    }
}

impl EngineConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if !config_path.exists() {
            log::info!("No config file found, creating default config");
            let config = Self::default();
            config
                .save()
                .map_err(|e| anyhow::anyhow!("Failed to save default config: {}", e))?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file at {}: {}", config_path.display(), e)
        })?;

        match serde_json::from_str::<Self>(&content) {
            Ok(config) => {
                log::info!("Loaded config from {}", config_path.display());
                Ok(config.validated())
            }
            Err(e) => {
                log::warn!("Config file has issues ({}), replacing it with defaults", e);
                let config = Self::default();
                config
                    .save()
                    .map_err(|save_err| anyhow::anyhow!("Failed to save new config: {}", save_err))?;
                Ok(config)
            }
        }
    }

    /// Replace values that would break the pipeline with their defaults.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();

        if self.audio_sample_rate == 0 {
            log::warn!("audio_sample_rate must be positive, using {}", defaults.audio_sample_rate);
            self.audio_sample_rate = defaults.audio_sample_rate;
        }
        if self.audio_channels == 0 {
            log::warn!("audio_channels must be positive, using {}", defaults.audio_channels);
            self.audio_channels = defaults.audio_channels;
        }
        if self.audio_chunk_frames == 0 {
            log::warn!("audio_chunk_frames must be positive, using {}", defaults.audio_chunk_frames);
            self.audio_chunk_frames = defaults.audio_chunk_frames;
        }
        if self.max_video_frames == 0 || self.max_audio_chunks == 0 {
            log::warn!("Buffer capacities must be positive, using defaults");
            self.max_video_frames = defaults.max_video_frames;
            self.max_audio_chunks = defaults.max_audio_chunks;
        }
        if !self.pre_buffer_seconds.is_finite() || self.pre_buffer_seconds <= 0.0 {
            log::warn!("pre_buffer_seconds must be positive, using {}", defaults.pre_buffer_seconds);
            self.pre_buffer_seconds = defaults.pre_buffer_seconds;
        }
        if !self.post_unload_seconds.is_finite() || self.post_unload_seconds < 0.0 {
            log::warn!("post_unload_seconds must not be negative, using {}", defaults.post_unload_seconds);
            self.post_unload_seconds = defaults.post_unload_seconds;
        }
        self
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("frame-buffer-player")
            .join("config.json")
    }

    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat::s16le(self.audio_sample_rate, self.audio_channels)
    }

    pub fn pre_buffer_frames(&self, fps: f64) -> u64 {
        (fps * self.pre_buffer_seconds).max(1.0) as u64
    }

    pub fn post_unload_frames(&self, fps: f64) -> u64 {
        (fps * self.post_unload_seconds) as u64
    }

    pub fn pre_buffer_bytes(&self) -> u64 {
        self.audio_format().bytes_for_ms(self.pre_buffer_seconds * 1000.0)
    }

    pub fn post_unload_bytes(&self) -> u64 {
        self.audio_format().bytes_for_ms(self.post_unload_seconds * 1000.0)
    }

    pub fn audio_chunk_bytes(&self) -> usize {
        self.audio_chunk_frames * self.audio_format().bytes_per_frame()
    }

    pub fn worker_idle(&self) -> Duration {
        Duration::from_millis(self.worker_idle_ms)
    }

    pub fn worker_join_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_join_timeout_ms)
    }

    pub fn process_kill_timeout(&self) -> Duration {
        Duration::from_millis(self.process_kill_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn ffmpeg_command(&self) -> PathBuf {
        self.ffmpeg_path.clone().unwrap_or_else(|| PathBuf::from("ffmpeg"))
    }

    pub fn ffprobe_command(&self) -> PathBuf {
        self.ffprobe_path.clone().unwrap_or_else(|| PathBuf::from("ffprobe"))
    }
}
