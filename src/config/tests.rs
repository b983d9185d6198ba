//! Unit tests for configuration handling

use super::*;
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_default_configuration_is_valid() {
    let config = PresentConfig::default();

    assert!(config.validate().is_ok());
    assert_eq!(config.buffer_count, 3);
    assert_eq!(config.device_path, "/dev/dri/card0");
    assert!(!config.show_dropped_frames);
    assert!(!config.clear_frames);
    assert_eq!(config.post_flip_delay_us, 1000);
}

#[test]
fn test_serialization_roundtrip() {
    let original = PresentConfig {
        show_dropped_frames: true,
        nominal_refresh_hz: 61.3,
        ..PresentConfig::default()
    };

    let toml_string = toml::to_string(&original).expect("serialize");
    let parsed: PresentConfig = toml::from_str(&toml_string).expect("deserialize");

    assert_eq!(original, parsed);
}

#[test]
fn test_load_from_file() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("present.toml");
    fs::write(
        &path,
        r#"
device_path = "/dev/dri/card1"
buffer_count = 2
show_dropped_frames = true
post_flip_delay_us = 0
"#,
    )
    .expect("write config");

    let config = PresentConfig::load(&path).expect("load config");

    assert_eq!(config.device_path, "/dev/dri/card1");
    assert_eq!(config.buffer_count, 2);
    assert!(config.show_dropped_frames);
    assert_eq!(config.post_flip_delay(), Duration::ZERO);
    // Unspecified fields keep their defaults
    assert!(!config.clear_frames);
    assert_eq!(config.nominal_refresh_hz, 60.0);
}

#[test]
fn test_load_missing_file_fails() {
    let dir = tempdir().expect("tempdir");
    let result = PresentConfig::load(dir.path().join("nope.toml"));
    assert!(result.is_err());
}

#[test]
fn test_single_buffer_rejected() {
    let config = PresentConfig {
        buffer_count: 1,
        ..PresentConfig::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_load_rejects_invalid_buffer_count() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("present.toml");
    fs::write(&path, "buffer_count = 1\n").expect("write config");

    assert!(PresentConfig::load(&path).is_err());
}

#[test]
fn test_nominal_frame_period() {
    let config = PresentConfig {
        nominal_refresh_hz: 50.0,
        ..PresentConfig::default()
    };
    assert_eq!(config.nominal_frame_period(), Duration::from_millis(20));
}

#[test]
fn test_zero_refresh_rate_rejected() {
    let config = PresentConfig {
        nominal_refresh_hz: 0.0,
        ..PresentConfig::default()
    };
    assert!(config.validate().is_err());
}
