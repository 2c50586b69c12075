//! Streaming beat, tempo and music-characteristics analysis.
//!
//! The core runs once per tick over a fixed-size spectral frame:
//! `SpectralFrontend` -> `BeatDetector` + `FeatureExtractor` ->
//! `CharacteristicsSynthesizer`. `AnalysisPipeline` bundles the four for one
//! audio source; `TransitionDetector` sits on top for scene-change decisions.

pub mod audio;
pub mod config;
pub mod narrative;
pub mod report;

pub use audio::analysis::{analyze_batch, analyze_track, AnalysisPipeline, TickOutput, TrackAnalysis};
pub use audio::beat::{BeatData, BeatDetector, RhythmPattern};
pub use audio::characteristics::{CharacteristicsSynthesizer, Genre, Mood, MusicCharacteristics, PitchClass};
pub use audio::features::{AdvancedAudioFeatures, FeatureExtractor};
pub use audio::spectrum::{SpectralFrame, SpectralFrontend, TransformProvider};
pub use config::Config;
