use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use lru::LruCache;

use crate::audio::{AudioOutput, AudioRenderer, AudioSource, FfmpegAudioSource, RodioOutput};
use crate::core::{EngineConfig, SourceOpenError};
use crate::video::{probe_media, FFmpegManager, FfmpegFrameSource, FrameSource, MediaInfo};

const PROBE_CACHE_ENTRIES: usize = 16;

/// Where sources and the audio device come from.
///
/// The controller only talks to this seam, so playback can run against real
/// decoders or against generated media.
pub trait MediaBackend {
    fn open_video(&self, path: &Path) -> Result<Box<dyn FrameSource>, SourceOpenError>;

    /// `Ok(None)` when the file has no audio track.
    fn open_audio(
        &self,
        path: &Path,
        start_time_s: f64,
    ) -> Result<Option<Box<dyn AudioSource>>, SourceOpenError>;

    fn open_output(&self, renderer: AudioRenderer) -> anyhow::Result<Box<dyn AudioOutput>>;
}

/// Decoding through `ffmpeg`/`ffprobe` child processes and output through rodio.
pub struct FfmpegBackend {
    config: EngineConfig,
    manager: FFmpegManager,
    probe_cache: Mutex<LruCache<PathBuf, MediaInfo>>,
}

impl FfmpegBackend {
    pub fn new(config: EngineConfig) -> Self {
        let config = config.validated();
        let manager = FFmpegManager::new(config.process_kill_timeout());
        Self {
            config,
            manager,
            probe_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(PROBE_CACHE_ENTRIES).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    pub fn manager(&self) -> &FFmpegManager {
        &self.manager
    }

    /// Probe a file, reusing the result of an earlier probe of the same path.
    pub fn media_info(&self, path: &Path) -> Result<MediaInfo, SourceOpenError> {
        {
            let mut cache = self.probe_cache.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(info) = cache.get(path) {
                return Ok(info.clone());
            }
        }

        let info = probe_media(&self.config.ffprobe_command(), path)?;
        self.probe_cache
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .put(path.to_path_buf(), info.clone());
        Ok(info)
    }
}

impl MediaBackend for FfmpegBackend {
    fn open_video(&self, path: &Path) -> Result<Box<dyn FrameSource>, SourceOpenError> {
        let info = self.media_info(path)?;
        Ok(Box::new(FfmpegFrameSource::new(
            self.manager.clone(),
            self.config.ffmpeg_command(),
            path,
            info.video,
        )))
    }

    fn open_audio(
        &self,
        path: &Path,
        start_time_s: f64,
    ) -> Result<Option<Box<dyn AudioSource>>, SourceOpenError> {
        let info = self.media_info(path)?;
        let Some(audio_duration_s) = info.audio_duration_s else {
            log::info!("No audio track in {:?}", path);
            return Ok(None);
        };

        let source = FfmpegAudioSource::open(
            &self.manager,
            &self.config.ffmpeg_command(),
            path,
            start_time_s,
            self.config.audio_format(),
            audio_duration_s * 1000.0,
        )?;
        Ok(Some(Box::new(source)))
    }

    fn open_output(&self, renderer: AudioRenderer) -> anyhow::Result<Box<dyn AudioOutput>> {
        let output = RodioOutput::open(self.config.output_device_name.as_deref(), renderer)?;
        Ok(Box::new(output))
    }
}
