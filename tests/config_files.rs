//! Loading analysis settings from TOML files on disk

use beatscope::config::{load_config, ConfigError, FluxBaseline};
use std::io::Write;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp config");
    file.write_all(content.as_bytes()).expect("write temp config");
    file
}

#[test]
fn test_loads_overrides_from_file() {
    let file = write_config(
        r#"
        [analysis]
        fft_size = 1024
        tick_rate = 30.0
        characteristics_every = 2

        [bands]
        bass = [0.0, 60.0]
        mid = [60.0, 250.0]
        treble = [250.0, 22050.0]

        [beat]
        min_beat_interval_ms = 250.0
        pattern_periods = [3, 6]

        [features]
        flux_baseline = "previous-spectrum"

        [transitions]
        min_scene_ms = 4000.0
        "#,
    );

    let config = load_config(file.path()).expect("valid config");
    assert_eq!(config.analysis.fft_size, 1024);
    assert_eq!(config.analysis.tick_rate, 30.0);
    assert_eq!(config.analysis.characteristics_every, 2);
    assert_eq!(config.bands.bass, [0.0, 60.0]);
    assert_eq!(config.beat.min_beat_interval_ms, 250.0);
    assert_eq!(config.beat.pattern_periods, vec![3, 6]);
    assert_eq!(config.features.flux_baseline, FluxBaseline::PreviousSpectrum);
    assert_eq!(config.transitions.min_scene_ms, 4000.0);
    // Untouched keys keep their defaults.
    assert_eq!(config.beat.energy_history, 43);
    assert_eq!(config.characteristics.history, 100);
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_config(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_invalid_values_are_rejected() {
    let file = write_config("[analysis]\ntick_rate = 0.0\n");
    let err = load_config(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
    assert!(err.to_string().contains("tick_rate"));
}

#[test]
fn test_default_config_round_trips_through_toml() {
    let text = toml::to_string(&beatscope::Config::default()).unwrap();
    let file = write_config(&text);
    let config = load_config(file.path()).unwrap();
    assert_eq!(config.analysis.fft_size, 2048);
    assert_eq!(config.transitions.window, 30);
    assert_eq!(config.bands.bass, [0.0, 60.0]);
    assert_eq!(config.bands.treble, [250.0, f32::INFINITY]);
}
