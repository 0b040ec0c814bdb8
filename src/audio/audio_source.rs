use std::path::Path;
use std::process::Command;

use crate::core::{AudioFormat, AudioSourceInfo, DecodeError, SourceOpenError};
use crate::video::ffmpeg_manager::{read_full, DecoderProcess, FFmpegManager};

/// A continuous interleaved PCM byte stream starting at the source's start time.
pub trait AudioSource: Send {
    fn info(&self) -> AudioSourceInfo;

    /// Up to `max_bytes`, always whole sample frames. `Ok(None)` is end of stream.
    fn read_chunk(&mut self, max_bytes: usize) -> Result<Option<Vec<u8>>, DecodeError>;

    /// Stop the decoder. Idempotent and bounded by the kill timeout.
    fn close(&mut self);
}

/// Audio source backed by an `ffmpeg` child writing raw PCM to stdout.
///
/// `-ss` before `-i` is a fast seek, so the first sample may be slightly off
/// the requested start; the renderer's leeway absorbs that.
pub struct FfmpegAudioSource {
    info: AudioSourceInfo,
    process: Option<DecoderProcess>,
}

impl FfmpegAudioSource {
    pub fn open(
        manager: &FFmpegManager,
        ffmpeg: &Path,
        audio_path: &Path,
        start_time_s: f64,
        format: AudioFormat,
        total_duration_ms: f64,
    ) -> Result<Self, SourceOpenError> {
        let mut cmd = Command::new(ffmpeg);
        cmd.arg("-nostdin")
            .arg("-loglevel").arg("error")
            .arg("-ss").arg(format!("{:.3}", start_time_s.max(0.0)))
            .arg("-i").arg(audio_path)
            .arg("-map").arg("0:a:0")
            .arg("-vn")
            .arg("-f").arg(format.sample_format.ffmpeg_name())
            .arg("-acodec").arg(format!("pcm_{}", format.sample_format.ffmpeg_name()))
            .arg("-ac").arg(format.channels.to_string())
            .arg("-ar").arg(format.sample_rate.to_string())
            .arg("pipe:1");

        let process = manager.spawn_stream(cmd)?;
        log::debug!(
            "Audio decoder started for {:?} at {:.3}s ({} Hz, {} ch)",
            audio_path,
            start_time_s,
            format.sample_rate,
            format.channels
        );

        Ok(Self {
            info: AudioSourceInfo {
                format,
                total_duration_ms,
            },
            process: Some(process),
        })
    }
}

impl AudioSource for FfmpegAudioSource {
    fn info(&self) -> AudioSourceInfo {
        self.info
    }

    fn read_chunk(&mut self, max_bytes: usize) -> Result<Option<Vec<u8>>, DecodeError> {
        let bytes_per_frame = self.info.format.bytes_per_frame();
        let want = max_bytes - max_bytes % bytes_per_frame;
        if want == 0 {
            return Ok(Some(Vec::new()));
        }

        let Some(stdout) = self.process.as_mut().and_then(|p| p.stdout()) else {
            return Ok(None);
        };

        let mut data = vec![0u8; want];
        let got = read_full(stdout, &mut data)?;
        // A torn sample frame at EOF is dropped
        data.truncate(got - got % bytes_per_frame);

        if data.is_empty() {
            log::debug!("Audio decoder reached end of stream");
            return Ok(None);
        }
        Ok(Some(data))
    }

    fn close(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.terminate();
        }
    }
}

impl Drop for FfmpegAudioSource {
    fn drop(&mut self) {
        self.close();
    }
}
