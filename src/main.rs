use std::path::Path;
use std::thread;
use std::time::Duration;

use frame_buffer_player::audio::output::list_output_devices;
use frame_buffer_player::{EngineConfig, FfmpegBackend, MediaController, PlaybackStatus};

const USAGE: &str = "Usage: frame-buffer-player <file> [start_seconds]\n       frame-buffer-player --devices";

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.first().map(String::as_str) == Some("--devices") {
        for device in list_output_devices()? {
            let marker = if device.is_default { " (default)" } else { "" };
            println!("{}{}", device.name, marker);
        }
        return Ok(());
    }

    let Some(file) = args.first() else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };
    let start_s = match args.get(1) {
        Some(arg) => arg
            .parse::<f64>()
            .map_err(|e| anyhow::anyhow!("Invalid start time '{}': {}", arg, e))?,
        None => 0.0,
    };

    let config = EngineConfig::load()?;
    let backend = FfmpegBackend::new(config.clone());
    let mut controller = MediaController::new(config, Box::new(backend));

    controller.load(Path::new(file))?;
    if start_s > 0.0 {
        controller.seek(start_s)?;
    }
    controller.play()?;

    let mut last_reported_second = None;
    loop {
        let ended = controller
            .update()
            .iter()
            .any(|status| *status == PlaybackStatus::EndOfMedia);

        if let Some(frame) = controller.take_latest_frame() {
            log::trace!("Presented frame {} ({}x{})", frame.index, frame.width(), frame.height());
        }

        let snapshot = controller.snapshot();
        let second = snapshot.current_time_s as u64;
        if last_reported_second != Some(second) {
            log::info!("{} ({:.0}%)", snapshot.time_label(), snapshot.progress_percent());
            last_reported_second = Some(second);
        }

        if ended || snapshot.end_of_media {
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }

    controller.close();
    Ok(())
}
