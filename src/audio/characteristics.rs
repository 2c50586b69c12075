//! Fusion of beat output and spectral features into the per-tick
//! `MusicCharacteristics` descriptor handed to downstream consumers.

use serde::Serialize;
use std::fmt;

use super::beat::{BeatData, DEFAULT_TEMPO, DEFAULT_TIME_SIGNATURE};
use super::features::{AdvancedAudioFeatures, CHROMA_BINS};
use super::history::RingBuffer;
use super::spectrum::SpectralFrame;
use crate::config::CharacteristicsConfig;

/// Centroid (Hz) treated as fully bright.
const BRIGHTNESS_REFERENCE_HZ: f32 = 5000.0;
const TAG_THRESHOLD: f32 = 0.5;
const MAX_SECONDARY_GENRES: usize = 3;

/// Major scale on C: C D E F G A B.
const MAJOR_SCALE: [f32; CHROMA_BINS] = [1., 0., 1., 0., 1., 1., 0., 1., 0., 1., 0., 1.];
const MAJOR_SCALE_NOTES: f32 = 7.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Energetic,
    Calm,
    Dark,
    Uplifting,
    Mysterious,
    Romantic,
    Aggressive,
}

impl Mood {
    pub const ALL: [Mood; 7] = [
        Mood::Energetic,
        Mood::Calm,
        Mood::Dark,
        Mood::Uplifting,
        Mood::Mysterious,
        Mood::Romantic,
        Mood::Aggressive,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Mood::Energetic => "energetic",
            Mood::Calm => "calm",
            Mood::Dark => "dark",
            Mood::Uplifting => "uplifting",
            Mood::Mysterious => "mysterious",
            Mood::Romantic => "romantic",
            Mood::Aggressive => "aggressive",
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Genre {
    Electronic,
    Folk,
    Dance,
    Ambient,
    Unknown,
}

impl Genre {
    pub const ALL: [Genre; 5] = [
        Genre::Electronic,
        Genre::Folk,
        Genre::Dance,
        Genre::Ambient,
        Genre::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Genre::Electronic => "electronic",
            Genre::Folk => "folk",
            Genre::Dance => "dance",
            Genre::Ambient => "ambient",
            Genre::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Axes of the genre profile; also reported as secondary genre tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GenreTag {
    Electronic,
    Acoustic,
    Vocal,
    Instrumental,
    Rhythmic,
    Melodic,
}

impl GenreTag {
    pub fn as_str(self) -> &'static str {
        match self {
            GenreTag::Electronic => "electronic",
            GenreTag::Acoustic => "acoustic",
            GenreTag::Vocal => "vocal",
            GenreTag::Instrumental => "instrumental",
            GenreTag::Rhythmic => "rhythmic",
            GenreTag::Melodic => "melodic",
        }
    }
}

impl fmt::Display for GenreTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum PitchClass {
    #[serde(rename = "C")]
    C,
    #[serde(rename = "C#")]
    CSharp,
    #[serde(rename = "D")]
    D,
    #[serde(rename = "D#")]
    DSharp,
    #[serde(rename = "E")]
    E,
    #[serde(rename = "F")]
    F,
    #[serde(rename = "F#")]
    FSharp,
    #[serde(rename = "G")]
    G,
    #[serde(rename = "G#")]
    GSharp,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A#")]
    ASharp,
    #[serde(rename = "B")]
    B,
}

impl PitchClass {
    pub const ALL: [PitchClass; CHROMA_BINS] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    /// Pitch class for a chroma index, C = 0. Wraps modulo 12.
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % CHROMA_BINS]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        const NAMES: [&str; CHROMA_BINS] = [
            "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
        ];
        NAMES[self.index()]
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MusicCharacteristics {
    pub tempo: f32,
    pub energy: f32,
    pub valence: f32,
    pub danceability: f32,
    pub acousticness: f32,
    pub instrumentalness: f32,
    pub genre: Genre,
    pub secondary_genres: Vec<GenreTag>,
    pub mood: Mood,
    pub time_signature: u8,
    pub key: PitchClass,
}

impl Default for MusicCharacteristics {
    fn default() -> Self {
        Self {
            tempo: DEFAULT_TEMPO,
            energy: 0.0,
            valence: 0.0,
            danceability: 0.0,
            acousticness: 0.0,
            instrumentalness: 0.0,
            genre: Genre::Unknown,
            secondary_genres: Vec::new(),
            mood: Mood::Calm,
            time_signature: DEFAULT_TIME_SIGNATURE,
            key: PitchClass::C,
        }
    }
}

/// Weighted blend per genre axis, each in [0,1].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenreProfile {
    pub electronic: f32,
    pub acoustic: f32,
    pub vocal: f32,
    pub instrumental: f32,
    pub rhythmic: f32,
    pub melodic: f32,
}

impl GenreProfile {
    fn tags(&self) -> [(GenreTag, f32); 6] {
        [
            (GenreTag::Electronic, self.electronic),
            (GenreTag::Acoustic, self.acoustic),
            (GenreTag::Vocal, self.vocal),
            (GenreTag::Instrumental, self.instrumental),
            (GenreTag::Rhythmic, self.rhythmic),
            (GenreTag::Melodic, self.melodic),
        ]
    }

    /// Tags scoring above 0.5, strongest first, at most three.
    pub fn secondary_tags(&self) -> Vec<GenreTag> {
        let mut scored: Vec<(GenreTag, f32)> = self
            .tags()
            .into_iter()
            .filter(|&(_, score)| score > TAG_THRESHOLD)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored
            .into_iter()
            .take(MAX_SECONDARY_GENRES)
            .map(|(tag, _)| tag)
            .collect()
    }
}

/// Derive one tick's characteristics. Tempo and meter fall back to their
/// cold-start defaults when no beat data is available.
pub fn characterize(
    frame: &SpectralFrame,
    beat: Option<&BeatData>,
    features: &AdvancedAudioFeatures,
) -> MusicCharacteristics {
    let tempo = beat.map_or(DEFAULT_TEMPO, |b| b.tempo);
    let time_signature = beat.map_or(DEFAULT_TIME_SIGNATURE, |b| b.time_signature);
    let beat_confidence = beat.map_or(0.0, |b| b.confidence);

    let brightness = features.spectral_centroid / BRIGHTNESS_REFERENCE_HZ;
    let flux = features.spectral_flux;

    let energy = ((frame.bass + frame.mid + frame.treble) / 3.0).clamp(0.0, 1.0);
    let valence = (major_key_strength(&features.chroma) * 0.4
        + brightness * 0.3
        + features.harmonic_ratio * 0.3)
        .clamp(0.0, 1.0);
    let danceability = (beat_confidence * 0.5
        + features.percussive_ratio * 0.3
        + (1.0 - flux) * 0.2)
        .clamp(0.0, 1.0);
    let acousticness = ((1.0 - brightness) * 0.4
        + features.harmonic_ratio * 0.4
        + (1.0 - flux) * 0.2)
        .clamp(0.0, 1.0);
    let instrumentalness = ((1.0 - features.zero_crossing_rate) * 0.6
        + (1.0 - std_dev(&features.mfcc)) * 0.4)
        .clamp(0.0, 1.0);

    let profile = GenreProfile {
        electronic: (brightness * 0.4
            + features.percussive_ratio * 0.3
            + (1.0 - features.harmonic_ratio) * 0.3)
            .clamp(0.0, 1.0),
        acoustic: acousticness,
        vocal: ((1.0 - instrumentalness) * 0.7 + features.zero_crossing_rate * 0.3).clamp(0.0, 1.0),
        instrumental: instrumentalness,
        rhythmic: (beat_confidence * 0.5 + features.percussive_ratio * 0.3 + danceability * 0.2)
            .clamp(0.0, 1.0),
        melodic: (features.harmonic_ratio * 0.5
            + features.chroma.iter().copied().fold(0.0, f32::max) * 0.5)
            .clamp(0.0, 1.0),
    };

    MusicCharacteristics {
        tempo,
        energy,
        valence,
        danceability,
        acousticness,
        instrumentalness,
        genre: classify_genre(&profile, energy),
        secondary_genres: profile.secondary_tags(),
        mood: classify_mood(energy, valence, tempo, features.percussive_ratio),
        time_signature,
        key: estimate_key(&features.chroma),
    }
}

/// Share of chroma energy on the C-major scale.
fn major_key_strength(chroma: &[f32; CHROMA_BINS]) -> f32 {
    let dot: f32 = chroma.iter().zip(MAJOR_SCALE.iter()).map(|(c, t)| c * t).sum();
    dot / MAJOR_SCALE_NOTES
}

fn std_dev(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    variance.sqrt()
}

/// First matching rule wins; later rules only see inputs earlier ones let through.
pub fn classify_mood(energy: f32, valence: f32, tempo: f32, percussive: f32) -> Mood {
    if energy > 0.7 && valence > 0.6 {
        Mood::Energetic
    } else if energy < 0.3 && (0.4..=0.7).contains(&valence) {
        Mood::Calm
    } else if valence < 0.3 && energy >= 0.3 {
        Mood::Dark
    } else if valence > 0.7 && tempo > 120.0 {
        Mood::Uplifting
    } else if energy < 0.4 && valence < 0.5 && tempo < 100.0 {
        Mood::Mysterious
    } else if valence > 0.6 && energy < 0.5 {
        Mood::Romantic
    } else if energy > 0.7 && percussive > 0.6 {
        Mood::Aggressive
    } else {
        Mood::Calm
    }
}

pub fn classify_genre(profile: &GenreProfile, energy: f32) -> Genre {
    if profile.electronic > 0.6 && profile.rhythmic > 0.5 {
        Genre::Electronic
    } else if profile.acoustic > 0.6 && profile.melodic > 0.4 {
        Genre::Folk
    } else if profile.rhythmic > 0.6 && energy > 0.5 {
        Genre::Dance
    } else if energy < 0.3 && profile.instrumental > 0.6 && profile.melodic > 0.3 {
        Genre::Ambient
    } else {
        Genre::Unknown
    }
}

/// Rotation of the major-scale template best matching `chroma`. Ties keep the
/// lowest pitch class, so an empty chroma reads as C.
pub fn estimate_key(chroma: &[f32; CHROMA_BINS]) -> PitchClass {
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for root in 0..CHROMA_BINS {
        let score: f32 = (0..CHROMA_BINS)
            .map(|pc| chroma[pc] * MAJOR_SCALE[(pc + CHROMA_BINS - root) % CHROMA_BINS])
            .sum();
        if score > best_score {
            best = root;
            best_score = score;
        }
    }
    PitchClass::from_index(best)
}

/// Keeps the recent characteristics and answers trend queries over them.
pub struct CharacteristicsSynthesizer {
    history: RingBuffer<MusicCharacteristics>,
}

impl CharacteristicsSynthesizer {
    pub fn new(config: &CharacteristicsConfig) -> Self {
        Self {
            history: RingBuffer::new(config.history),
        }
    }

    pub fn synthesize(
        &mut self,
        frame: &SpectralFrame,
        beat: Option<&BeatData>,
        features: &AdvancedAudioFeatures,
    ) -> MusicCharacteristics {
        let characteristics = characterize(frame, beat, features);
        self.history.push(characteristics.clone());
        characteristics
    }

    pub fn history(&self) -> &RingBuffer<MusicCharacteristics> {
        &self.history
    }

    pub fn latest(&self) -> Option<&MusicCharacteristics> {
        self.history.last()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn average_tempo(&self) -> f32 {
        if self.history.is_empty() {
            return DEFAULT_TEMPO;
        }
        self.history.iter().map(|c| c.tempo).sum::<f32>() / self.history.len() as f32
    }

    /// Mean energy of the newer half of the last `window` entries minus that
    /// of the older half. Zero until at least two entries are available.
    pub fn energy_trend(&self, window: usize) -> f32 {
        let recent: Vec<f32> = self.history.latest(window).map(|c| c.energy).collect();
        if recent.len() < 2 {
            return 0.0;
        }
        let (older, newer) = recent.split_at(recent.len() / 2);
        mean(newer) - mean(older)
    }

    /// Most frequent mood over the last `window` entries; ties go to the newest.
    pub fn dominant_mood(&self, window: usize) -> Option<Mood> {
        dominant(self.history.latest(window).map(|c| c.mood))
    }

    pub fn dominant_genre(&self, window: usize) -> Option<Genre> {
        dominant(self.history.latest(window).map(|c| c.genre))
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

fn dominant<T: Copy + PartialEq>(items: impl Iterator<Item = T>) -> Option<T> {
    // (label, count, last position seen)
    let mut counts: Vec<(T, usize, usize)> = Vec::new();
    for (position, item) in items.enumerate() {
        match counts.iter_mut().find(|(label, _, _)| *label == item) {
            Some(entry) => {
                entry.1 += 1;
                entry.2 = position;
            }
            None => counts.push((item, 1, position)),
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)))
        .map(|(label, _, _)| label)
}
