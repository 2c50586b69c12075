use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub bands: BandConfig,
    #[serde(default)]
    pub beat: BeatConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub characteristics: CharacteristicsConfig,
    #[serde(default)]
    pub transitions: TransitionConfig,
}

/// Transform and tick-rate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Sample rate assumed by hosts that stream PCM without their own rate.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// FFT size; the analyser exposes `fft_size / 2` bins.
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    /// Pipeline ticks per second when replaying a decoded track.
    #[serde(default = "default_tick_rate")]
    pub tick_rate: f32,
    /// Analyser temporal smoothing constant (0.0-1.0).
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,
    #[serde(default = "default_min_decibels")]
    pub min_decibels: f32,
    #[serde(default = "default_max_decibels")]
    pub max_decibels: f32,
    /// Re-derive music characteristics every N ticks.
    #[serde(default = "default_characteristics_every")]
    pub characteristics_every: u32,
}

/// Band boundaries in Hz, `[low, high)`. Upper bounds past Nyquist stop at the last bin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandConfig {
    #[serde(default = "default_bass")]
    pub bass: [f32; 2],
    #[serde(default = "default_mid")]
    pub mid: [f32; 2],
    #[serde(default = "default_treble")]
    pub treble: [f32; 2],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeatConfig {
    #[serde(default = "default_base_threshold")]
    pub base_threshold: f32,
    #[serde(default = "default_min_beat_interval_ms")]
    pub min_beat_interval_ms: f64,
    /// Number of recent energy samples the adaptive threshold looks at.
    #[serde(default = "default_onset_window")]
    pub onset_window: usize,
    #[serde(default = "default_bass_hit_ratio")]
    pub bass_hit_ratio: f32,
    #[serde(default = "default_energy_history")]
    pub energy_history: usize,
    #[serde(default = "default_band_history")]
    pub band_history: usize,
    #[serde(default = "default_beat_history")]
    pub beat_history: usize,
    #[serde(default = "default_tempo_history")]
    pub tempo_history: usize,
    /// Weight of the previous tempo in the exponential smoother.
    #[serde(default = "default_tempo_smoothing")]
    pub tempo_smoothing: f32,
    /// Relative deviation from the median interval beyond which an interval is dropped.
    #[serde(default = "default_outlier_tolerance")]
    pub outlier_tolerance: f32,
    #[serde(default = "default_pattern_history")]
    pub pattern_history: usize,
    /// Rhythm patterns are mined once every this many ticks.
    #[serde(default = "default_pattern_interval")]
    pub pattern_interval: usize,
    #[serde(default = "default_pattern_periods")]
    pub pattern_periods: Vec<usize>,
    #[serde(default = "default_max_patterns")]
    pub max_patterns: usize,
}

/// Baseline the spectral flux is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FluxBaseline {
    /// Previous tick's cepstral vector, entries past its length read as zero.
    #[default]
    PreviousMfcc,
    /// Previous tick's magnitude spectrum, averaged over bins.
    PreviousSpectrum,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    #[serde(default = "default_feature_history")]
    pub history: usize,
    #[serde(default)]
    pub flux_baseline: FluxBaseline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacteristicsConfig {
    #[serde(default = "default_characteristics_history")]
    pub history: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionConfig {
    /// Minimum time a scene is held before another transition may fire.
    #[serde(default = "default_min_scene_ms")]
    pub min_scene_ms: f64,
    /// Number of recent characteristics ticks the rules look at.
    #[serde(default = "default_transition_window")]
    pub window: usize,
    #[serde(default = "default_energy_delta")]
    pub energy_delta: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            fft_size: default_fft_size(),
            tick_rate: default_tick_rate(),
            smoothing: default_smoothing(),
            min_decibels: default_min_decibels(),
            max_decibels: default_max_decibels(),
            characteristics_every: default_characteristics_every(),
        }
    }
}

impl Default for BandConfig {
    fn default() -> Self {
        Self {
            bass: default_bass(),
            mid: default_mid(),
            treble: default_treble(),
        }
    }
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            base_threshold: default_base_threshold(),
            min_beat_interval_ms: default_min_beat_interval_ms(),
            onset_window: default_onset_window(),
            bass_hit_ratio: default_bass_hit_ratio(),
            energy_history: default_energy_history(),
            band_history: default_band_history(),
            beat_history: default_beat_history(),
            tempo_history: default_tempo_history(),
            tempo_smoothing: default_tempo_smoothing(),
            outlier_tolerance: default_outlier_tolerance(),
            pattern_history: default_pattern_history(),
            pattern_interval: default_pattern_interval(),
            pattern_periods: default_pattern_periods(),
            max_patterns: default_max_patterns(),
        }
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            history: default_feature_history(),
            flux_baseline: FluxBaseline::default(),
        }
    }
}

impl Default for CharacteristicsConfig {
    fn default() -> Self {
        Self {
            history: default_characteristics_history(),
        }
    }
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            min_scene_ms: default_min_scene_ms(),
            window: default_transition_window(),
            energy_delta: default_energy_delta(),
        }
    }
}

fn default_sample_rate() -> u32 { 44100 }
fn default_fft_size() -> usize { 2048 }
fn default_tick_rate() -> f32 { 60.0 }
fn default_smoothing() -> f32 { 0.8 }
fn default_min_decibels() -> f32 { -100.0 }
fn default_max_decibels() -> f32 { -30.0 }
fn default_characteristics_every() -> u32 { 1 }
fn default_bass() -> [f32; 2] { [0.0, 60.0] }
fn default_mid() -> [f32; 2] { [60.0, 250.0] }
fn default_treble() -> [f32; 2] { [250.0, f32::INFINITY] }
fn default_base_threshold() -> f32 { 1.3 }
fn default_min_beat_interval_ms() -> f64 { 300.0 }
fn default_onset_window() -> usize { 10 }
fn default_bass_hit_ratio() -> f32 { 1.2 }
fn default_energy_history() -> usize { 43 }
fn default_band_history() -> usize { 20 }
fn default_beat_history() -> usize { 8 }
fn default_tempo_history() -> usize { 10 }
fn default_tempo_smoothing() -> f32 { 0.9 }
fn default_outlier_tolerance() -> f32 { 0.3 }
fn default_pattern_history() -> usize { 32 }
fn default_pattern_interval() -> usize { 16 }
fn default_pattern_periods() -> Vec<usize> { vec![4, 8, 16] }
fn default_max_patterns() -> usize { 5 }
fn default_feature_history() -> usize { 1000 }
fn default_characteristics_history() -> usize { 100 }
fn default_min_scene_ms() -> f64 { 8000.0 }
fn default_transition_window() -> usize { 30 }
fn default_energy_delta() -> f32 { 0.25 }

impl Config {
    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let a = &self.analysis;
        if a.fft_size < 32 || !a.fft_size.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "analysis.fft_size must be a power of two >= 32, got {}",
                a.fft_size
            )));
        }
        if a.sample_rate == 0 {
            return Err(ConfigError::Invalid("analysis.sample_rate must be positive".into()));
        }
        if !(a.tick_rate > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "analysis.tick_rate must be positive, got {}",
                a.tick_rate
            )));
        }
        if !(0.0..1.0).contains(&a.smoothing) {
            return Err(ConfigError::Invalid(format!(
                "analysis.smoothing must be in [0, 1), got {}",
                a.smoothing
            )));
        }
        if a.min_decibels >= a.max_decibels {
            return Err(ConfigError::Invalid(format!(
                "analysis.min_decibels ({}) must be below max_decibels ({})",
                a.min_decibels, a.max_decibels
            )));
        }
        if a.characteristics_every == 0 {
            return Err(ConfigError::Invalid("analysis.characteristics_every must be >= 1".into()));
        }

        for (name, [low, high]) in [
            ("bass", self.bands.bass),
            ("mid", self.bands.mid),
            ("treble", self.bands.treble),
        ] {
            if low < 0.0 || low >= high {
                return Err(ConfigError::Invalid(format!(
                    "bands.{} must satisfy 0 <= low < high, got [{}, {}]",
                    name, low, high
                )));
            }
        }

        let b = &self.beat;
        for (name, value) in [
            ("onset_window", b.onset_window),
            ("energy_history", b.energy_history),
            ("band_history", b.band_history),
            ("beat_history", b.beat_history),
            ("tempo_history", b.tempo_history),
            ("pattern_history", b.pattern_history),
            ("pattern_interval", b.pattern_interval),
            ("max_patterns", b.max_patterns),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("beat.{} must be >= 1", name)));
            }
        }
        if b.onset_window > b.energy_history {
            return Err(ConfigError::Invalid(format!(
                "beat.onset_window ({}) cannot exceed beat.energy_history ({})",
                b.onset_window, b.energy_history
            )));
        }
        if b.pattern_periods.iter().any(|&p| p == 0) {
            return Err(ConfigError::Invalid("beat.pattern_periods must be positive".into()));
        }
        if !(0.0..1.0).contains(&b.tempo_smoothing) {
            return Err(ConfigError::Invalid(format!(
                "beat.tempo_smoothing must be in [0, 1), got {}",
                b.tempo_smoothing
            )));
        }
        if b.min_beat_interval_ms < 0.0 {
            return Err(ConfigError::Invalid("beat.min_beat_interval_ms must not be negative".into()));
        }

        if self.features.history == 0 || self.characteristics.history == 0 {
            return Err(ConfigError::Invalid("history capacities must be >= 1".into()));
        }
        if self.transitions.window == 0 {
            return Err(ConfigError::Invalid("transitions.window must be >= 1".into()));
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Config::from_toml_str(&content, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<Config, ConfigError> {
        Config::from_toml_str(content, Path::new("test.toml"))
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.analysis.sample_rate, 44100);
        assert_eq!(config.analysis.fft_size, 2048);
        assert_eq!(config.beat.min_beat_interval_ms, 300.0);
        assert_eq!(config.beat.base_threshold, 1.3);
        assert_eq!(config.beat.pattern_periods, vec![4, 8, 16]);
        assert_eq!(config.features.flux_baseline, FluxBaseline::PreviousMfcc);
        assert_eq!(config.bands.bass, [0.0, 60.0]);
        assert_eq!(config.bands.mid, [60.0, 250.0]);
        assert_eq!(config.bands.treble, [250.0, f32::INFINITY]);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = parse(
            r#"
            [beat]
            min_beat_interval_ms = 250.0

            [features]
            flux_baseline = "previous-spectrum"
            "#,
        )
        .unwrap();
        assert_eq!(config.beat.min_beat_interval_ms, 250.0);
        assert_eq!(config.beat.energy_history, 43);
        assert_eq!(config.features.flux_baseline, FluxBaseline::PreviousSpectrum);
        assert_eq!(config.analysis.tick_rate, 60.0);
    }

    #[test]
    fn rejects_non_power_of_two_fft() {
        let err = parse("[analysis]\nfft_size = 1000\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_inverted_band() {
        let err = parse("[bands]\nmid = [2000.0, 250.0]\n").unwrap_err();
        assert!(err.to_string().contains("bands.mid"));
    }

    #[test]
    fn rejects_zero_capacity() {
        let err = parse("[beat]\ntempo_history = 0\n").unwrap_err();
        assert!(err.to_string().contains("tempo_history"));
    }

    #[test]
    fn reports_parse_errors_with_path() {
        let err = parse("[analysis\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("test.toml"));
    }
}
