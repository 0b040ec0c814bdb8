use std::path::{Path, PathBuf};
use std::process::Command;

use crate::core::{SourceOpenError, VideoInfo};

/// Stream layout of a media file as reported by ffprobe.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub video: VideoInfo,
    /// `None` when the file carries no audio stream.
    pub audio_duration_s: Option<f64>,
}

impl MediaInfo {
    pub fn has_audio(&self) -> bool {
        self.audio_duration_s.is_some()
    }

    /// Parse `ffprobe -print_format json -show_format -show_streams` output.
    pub fn from_ffprobe_json(path: &Path, json_str: &str) -> Result<Self, SourceOpenError> {
        let info: serde_json::Value =
            serde_json::from_str(json_str).map_err(|e| SourceOpenError::Probe {
                path: path.to_path_buf(),
                reason: format!("unreadable ffprobe output: {}", e),
            })?;

        let container_duration = parse_f64(&info["format"]["duration"]);

        let empty_vec = vec![];
        let streams = info["streams"].as_array().unwrap_or(&empty_vec);

        let video_stream = streams
            .iter()
            .find(|s| s["codec_type"].as_str() == Some("video"))
            .ok_or_else(|| SourceOpenError::NoVideoStream(path.to_path_buf()))?;

        let fps = parse_frame_rate(&video_stream["r_frame_rate"])
            .or_else(|| parse_frame_rate(&video_stream["avg_frame_rate"]))
            .ok_or_else(|| SourceOpenError::InvalidMetadata("missing video frame rate".to_string()))?
            .clamp(1.0, 1000.0);

        let duration_s = parse_f64(&video_stream["duration"])
            .or(container_duration)
            .unwrap_or(0.0);

        let frame_count = parse_f64(&video_stream["nb_frames"])
            .map(|n| n as u64)
            .filter(|n| *n > 0)
            .unwrap_or_else(|| (duration_s * fps).round() as u64);

        if frame_count == 0 {
            return Err(SourceOpenError::InvalidMetadata(format!(
                "video stream in {} has no frames",
                path.display()
            )));
        }

        let width = video_stream["width"].as_u64().unwrap_or(0) as u32;
        let height = video_stream["height"].as_u64().unwrap_or(0) as u32;
        if width == 0 || height == 0 {
            return Err(SourceOpenError::InvalidMetadata(format!(
                "invalid frame size {}x{}",
                width, height
            )));
        }

        // The reported duration is the one the frame counter will actually reach
        let duration_s = frame_count as f64 / fps;

        let audio_duration_s = streams
            .iter()
            .find(|s| s["codec_type"].as_str() == Some("audio"))
            .map(|s| {
                parse_f64(&s["duration"])
                    .or(container_duration)
                    .unwrap_or(duration_s)
            });

        Ok(Self {
            video: VideoInfo {
                fps,
                frame_count,
                duration_s,
                width,
                height,
            },
            audio_duration_s,
        })
    }
}

/// Run ffprobe on `file_path`.
pub fn probe_media(ffprobe: &Path, file_path: &Path) -> Result<MediaInfo, SourceOpenError> {
    let output = Command::new(ffprobe)
        .arg("-v").arg("quiet")
        .arg("-print_format").arg("json")
        .arg("-show_format")
        .arg("-show_streams")
        .arg(file_path)
        .output()
        .map_err(|source| SourceOpenError::Spawn {
            tool: ffprobe.display().to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(SourceOpenError::Probe {
            path: PathBuf::from(file_path),
            reason: format!("ffprobe exited with {}", output.status),
        });
    }

    let json_str = String::from_utf8_lossy(&output.stdout);
    let info = MediaInfo::from_ffprobe_json(file_path, &json_str)?;
    log::debug!(
        "Probed {:?}: {:.3} fps, {} frames, {}x{}, audio: {}",
        file_path,
        info.video.fps,
        info.video.frame_count,
        info.video.width,
        info.video.height,
        info.has_audio()
    );
    Ok(info)
}

fn parse_f64(value: &serde_json::Value) -> Option<f64> {
    let parsed = match value {
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite() && *v >= 0.0)
}

fn parse_frame_rate(value: &serde_json::Value) -> Option<f64> {
    let fps_str = value.as_str()?.trim();
    let fps = if let Some((num, den)) = fps_str.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den == 0.0 {
            return None;
        }
        num / den
    } else {
        fps_str.parse().ok()?
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}
