#[cfg(test)]
mod tests {

    use crate::core::EngineConfig;

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.pre_buffer_seconds, 5.0);
        assert_eq!(config.post_unload_seconds, 10.0);
        assert_eq!(config.max_video_frames, 500);
        assert_eq!(config.max_audio_chunks, 100);
        assert_eq!(config.audio_chunk_frames, 1024);
        assert_eq!(config.audio_sample_rate, 44_100);
        assert_eq!(config.audio_channels, 2);
        assert_eq!(config.av_resync_threshold_ms, Some(250));
        assert!(config.ffmpeg_path.is_none());
        assert!(config.output_device_name.is_none());
    }

    #[test]
    fn test_derived_windows() {
        let config = EngineConfig::default();
        assert_eq!(config.pre_buffer_frames(30.0), 150);
        assert_eq!(config.post_unload_frames(30.0), 300);
        assert_eq!(config.audio_chunk_bytes(), 4096);
        assert_eq!(config.pre_buffer_bytes(), 5 * 176_400);
        assert_eq!(config.post_unload_bytes(), 10 * 176_400);
        assert_eq!(config.ffmpeg_command().to_str(), Some("ffmpeg"));
    }

    #[test]
    fn test_engine_config_serialization() {
        let mut config = EngineConfig::default();
        config.pre_buffer_seconds = 2.5;
        config.av_resync_threshold_ms = None;
        config.output_device_name = Some("Headphones".to_string());

        let serialized = serde_json::to_string(&config).expect("Failed to serialize config");
        let deserialized: EngineConfig =
            serde_json::from_str(&serialized).expect("Failed to deserialize config");

        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_config_backward_compatibility() {
        // Files written before most tuning knobs existed
        let old_config_json = r#"{
            "pre_buffer_seconds": 3.0,
            "ffmpeg_path": "/usr/local/bin/ffmpeg"
        }"#;

        let config: EngineConfig =
            serde_json::from_str(old_config_json).expect("Failed to parse old config");

        assert_eq!(config.pre_buffer_seconds, 3.0);
        assert_eq!(config.max_video_frames, 500);
        assert_eq!(config.settle_delay_ms, 200);
        assert_eq!(
            config.ffmpeg_path.as_deref().and_then(|p| p.to_str()),
            Some("/usr/local/bin/ffmpeg")
        );
    }

    #[test]
    fn test_invalid_audio_settings_fall_back_to_defaults() {
        let json = r#"{
            "audio_sample_rate": 0,
            "audio_channels": 0,
            "audio_chunk_frames": 0,
            "pre_buffer_seconds": -1.0
        }"#;

        let config = serde_json::from_str::<EngineConfig>(json).unwrap().validated();
        let defaults = EngineConfig::default();

        assert_eq!(config.audio_sample_rate, defaults.audio_sample_rate);
        assert_eq!(config.audio_channels, defaults.audio_channels);
        assert_eq!(config.audio_chunk_frames, defaults.audio_chunk_frames);
        assert_eq!(config.pre_buffer_seconds, defaults.pre_buffer_seconds);
        assert!(config.audio_format().bytes_per_frame() > 0);
        assert!(config.audio_format().ms_for_frames(1024).is_finite());
    }

    #[test]
    fn test_valid_config_is_unchanged_by_validation() {
        let config = EngineConfig {
            audio_sample_rate: 48_000,
            audio_channels: 1,
            post_unload_seconds: 0.0,
            ..EngineConfig::default()
        };
        assert_eq!(config.clone().validated(), config);
    }
}
