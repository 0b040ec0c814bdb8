use cpal::traits::{DeviceTrait, HostTrait};
use rodio::{OutputStream, Sink, Source};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::renderer::AudioRenderer;

/// A device stream fed by an [`AudioRenderer`].
///
/// `pause` stops pulling without tearing the stream down; dropping it closes
/// the device.
pub trait AudioOutput {
    fn play(&mut self) -> anyhow::Result<()>;
    fn pause(&mut self);
}

#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
}

pub fn list_output_devices() -> anyhow::Result<Vec<AudioDeviceInfo>> {
    let host = cpal::default_host();
    let default_device_name = host
        .default_output_device()
        .and_then(|device| device.name().ok());

    let devices = host
        .output_devices()
        .map_err(|e| anyhow::anyhow!("Failed to enumerate output devices: {}", e))?;

    let mut result = Vec::new();
    for device in devices {
        match device.name() {
            Ok(name) => {
                let is_default = default_device_name.as_ref() == Some(&name);
                result.push(AudioDeviceInfo { name, is_default });
            }
            Err(e) => log::warn!("Failed to get device name: {}", e),
        }
    }
    Ok(result)
}

/// The named output device, or the default one when unnamed or not found.
pub fn select_output_device(name: Option<&str>) -> anyhow::Result<cpal::Device> {
    let host = cpal::default_host();

    if let Some(name) = name {
        let devices = host
            .output_devices()
            .map_err(|e| anyhow::anyhow!("Failed to enumerate devices: {}", e))?;
        for device in devices {
            if device.name().ok().as_deref() == Some(name) {
                log::debug!("Using audio device: {}", name);
                return Ok(device);
            }
        }
        log::warn!("Audio device '{}' not found, falling back to default", name);
    }

    host.default_output_device()
        .ok_or_else(|| anyhow::anyhow!("No default audio output device available"))
}

/// rodio source that pulls one renderer block at a time.
pub struct RendererSource {
    renderer: AudioRenderer,
    stop_flag: Arc<AtomicBool>,
    block: Vec<i16>,
    pos: usize,
}

impl RendererSource {
    pub fn new(renderer: AudioRenderer, stop_flag: Arc<AtomicBool>) -> Self {
        Self {
            renderer,
            stop_flag,
            block: Vec::new(),
            pos: 0,
        }
    }
}

impl Iterator for RendererSource {
    type Item = i16;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stop_flag.load(Ordering::Relaxed) {
            return None;
        }

        if self.pos >= self.block.len() {
            self.renderer.render_samples(&mut self.block);
            self.pos = 0;
            if self.block.is_empty() {
                return Some(0);
            }
        }

        let sample = self.block[self.pos];
        self.pos += 1;
        Some(sample)
    }
}

impl Source for RendererSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.renderer.format().channels
    }

    fn sample_rate(&self) -> u32 {
        self.renderer.format().sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// Audio output through a rodio sink on a cpal device.
pub struct RodioOutput {
    _stream: OutputStream,
    sink: Sink,
    stop_flag: Arc<AtomicBool>,
}

impl RodioOutput {
    /// Open the device and attach the renderer, starting paused.
    pub fn open(device_name: Option<&str>, renderer: AudioRenderer) -> anyhow::Result<Self> {
        let device = select_output_device(device_name)?;
        let (stream, stream_handle) = OutputStream::try_from_device(&device)
            .map_err(|e| anyhow::anyhow!("Failed to create audio output stream: {}", e))?;
        let sink = Sink::try_new(&stream_handle)
            .map_err(|e| anyhow::anyhow!("Failed to create audio sink: {}", e))?;

        let stop_flag = Arc::new(AtomicBool::new(false));
        sink.pause();
        sink.append(RendererSource::new(renderer, stop_flag.clone()));

        log::info!("Audio output opened");
        Ok(Self {
            _stream: stream,
            sink,
            stop_flag,
        })
    }
}

impl AudioOutput for RodioOutput {
    fn play(&mut self) -> anyhow::Result<()> {
        self.sink.play();
        log::debug!("Audio output playing");
        Ok(())
    }

    fn pause(&mut self) {
        self.sink.pause();
        log::debug!("Audio output paused");
    }
}

impl Drop for RodioOutput {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        self.sink.stop();
        log::debug!("Audio output closed");
    }
}
