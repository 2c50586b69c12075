//! Scene-change decisions driven by the characteristics history.
//!
//! Signals only land on accepted beats and never closer together than
//! `min_scene_ms`.

use serde::Serialize;

use crate::audio::beat::BeatData;
use crate::audio::characteristics::{CharacteristicsSynthesizer, Genre, Mood};
use crate::config::TransitionConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionReason {
    MoodShift,
    GenreShift,
    EnergySurge,
    EnergyDrop,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TransitionSignal {
    pub at_ms: f64,
    pub reason: TransitionReason,
    /// Scene mood and genre after the transition
    pub mood: Mood,
    pub genre: Genre,
}

pub struct TransitionDetector {
    config: TransitionConfig,
    scene_start: Option<f64>,
    scene_mood: Option<Mood>,
    scene_genre: Genre,
}

impl TransitionDetector {
    pub fn new(config: TransitionConfig) -> Self {
        Self {
            config,
            scene_start: None,
            scene_mood: None,
            scene_genre: Genre::Unknown,
        }
    }

    pub fn scene_mood(&self) -> Option<Mood> {
        self.scene_mood
    }

    pub fn scene_genre(&self) -> Genre {
        self.scene_genre
    }

    pub fn evaluate(
        &mut self,
        now_ms: f64,
        beat: &BeatData,
        synth: &CharacteristicsSynthesizer,
    ) -> Option<TransitionSignal> {
        let window = self.config.window;
        let mood = synth.dominant_mood(window)?;
        let genre = synth.dominant_genre(window).unwrap_or(Genre::Unknown);

        // The first evaluated tick opens the initial scene.
        let Some(scene_start) = self.scene_start else {
            self.scene_start = Some(now_ms);
            self.scene_mood = Some(mood);
            self.scene_genre = genre;
            return None;
        };

        if !beat.is_beat || now_ms - scene_start < self.config.min_scene_ms {
            return None;
        }

        let trend = synth.energy_trend(window);
        let reason = if self.scene_mood != Some(mood) {
            TransitionReason::MoodShift
        } else if genre != Genre::Unknown && genre != self.scene_genre {
            TransitionReason::GenreShift
        } else if trend > self.config.energy_delta {
            TransitionReason::EnergySurge
        } else if trend < -self.config.energy_delta {
            TransitionReason::EnergyDrop
        } else {
            return None;
        };

        self.scene_start = Some(now_ms);
        self.scene_mood = Some(mood);
        if genre != Genre::Unknown {
            self.scene_genre = genre;
        }

        log::debug!(
            "Transition at {:.0}ms: {:?} (mood={}, genre={}, trend={:+.2})",
            now_ms,
            reason,
            mood,
            self.scene_genre,
            trend
        );

        Some(TransitionSignal {
            at_ms: now_ms,
            reason,
            mood,
            genre: self.scene_genre,
        })
    }

    pub fn reset(&mut self) {
        self.scene_start = None;
        self.scene_mood = None;
        self.scene_genre = Genre::Unknown;
    }
}
