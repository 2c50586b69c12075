//! Broad per-tick feature vector feeding the characteristics synthesizer.
//!
//! Light heuristics: a log mel energy vector stands in for MFCCs and chroma
//! folds raw bins onto pitch classes. Beat timing does not read them.

use serde::Serialize;

use super::history::RingBuffer;
use super::spectrum::SpectralFrame;
use crate::config::{FeatureConfig, FluxBaseline};

pub const MFCC_COEFFICIENTS: usize = 13;
pub const CHROMA_BINS: usize = 12;

const EPSILON: f32 = 1e-10;
const ROLLOFF_FRACTION: f32 = 0.85;
const FLUX_BINS: usize = 128;
const CHROMA_MIN_HZ: f32 = 80.0;
const CHROMA_MAX_HZ: f32 = 5000.0;
const HARMONIC_TOLERANCE_HZ: f32 = 10.0;
const HARMONIC_ORDERS: usize = 8;
/// Share of the spectrum, from the top, counted as high-frequency energy.
const HIGH_BAND_FRACTION: f32 = 0.3;

/// A1, E2, A2, D3, G3, A3, C4, E4, A4
const REFERENCE_FUNDAMENTALS: [f32; 9] = [
    55.0, 82.41, 110.0, 146.83, 196.0, 220.0, 261.63, 329.63, 440.0,
];

// Tonnetz interval templates, C at index 0.
const MAJOR_THIRDS: [f32; CHROMA_BINS] = [1., 0., 0., 0., 1., 0., 0., 0., 1., 0., 0., 0.];
const MINOR_THIRDS: [f32; CHROMA_BINS] = [1., 0., 0., 1., 0., 0., 1., 0., 0., 1., 0., 0.];
const PERFECT_FIFTHS: [f32; CHROMA_BINS] = [1., 0., 0., 0., 0., 0., 0., 1., 0., 0., 0., 0.];

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct AdvancedAudioFeatures {
    /// Energy-weighted mean frequency (Hz)
    pub spectral_centroid: f32,
    /// Frequency below which 85% of the energy lies (Hz)
    pub spectral_rolloff: f32,
    pub spectral_flux: f32,
    pub zero_crossing_rate: f32,
    pub mfcc: [f32; MFCC_COEFFICIENTS],
    /// Pitch-class distribution, C first; sums to 1 or is all zero
    pub chroma: [f32; CHROMA_BINS],
    pub tonnetz: [f32; 3],
    pub harmonic_ratio: f32,
    pub percussive_ratio: f32,
}

impl Default for AdvancedAudioFeatures {
    fn default() -> Self {
        Self {
            spectral_centroid: 0.0,
            spectral_rolloff: 0.0,
            spectral_flux: 0.0,
            zero_crossing_rate: 0.0,
            mfcc: [0.0; MFCC_COEFFICIENTS],
            chroma: [0.0; CHROMA_BINS],
            tonnetz: [0.0; 3],
            harmonic_ratio: 0.0,
            percussive_ratio: 0.0,
        }
    }
}

pub struct FeatureExtractor {
    flux_baseline: FluxBaseline,
    history: RingBuffer<AdvancedAudioFeatures>,
    previous_spectrum: Vec<f32>,
    /// Per-bin "near a reference harmonic" flags, rebuilt when the layout changes.
    harmonic_mask: Vec<bool>,
    mask_sample_rate: f32,
}

impl FeatureExtractor {
    pub fn new(config: &FeatureConfig) -> Self {
        Self {
            flux_baseline: config.flux_baseline,
            history: RingBuffer::new(config.history),
            previous_spectrum: Vec::new(),
            harmonic_mask: Vec::new(),
            mask_sample_rate: 0.0,
        }
    }

    pub fn extract(&mut self, frame: &SpectralFrame, beat_confidence: f32) -> AdvancedAudioFeatures {
        let magnitudes: Vec<f32> = frame.magnitudes().collect();
        let n = magnitudes.len();
        let nyquist = frame.nyquist();
        let freq = |i: usize| frame.bin_frequency(i);

        let spectral_flux = match self.flux_baseline {
            FluxBaseline::PreviousMfcc => match self.history.last() {
                Some(previous) => flux_against_mfcc(&magnitudes, &previous.mfcc),
                None => 0.0,
            },
            FluxBaseline::PreviousSpectrum => flux_against_spectrum(&magnitudes, &self.previous_spectrum),
        };

        if self.harmonic_mask.len() != n || self.mask_sample_rate != frame.sample_rate {
            self.harmonic_mask = harmonic_mask(n, nyquist);
            self.mask_sample_rate = frame.sample_rate;
        }

        let chroma = chroma(&magnitudes, freq);
        let beat_confidence = beat_confidence.clamp(0.0, 1.0);
        let percussive_ratio = (0.4 * spectral_flux
            + 0.4 * beat_confidence
            + 0.2 * high_frequency_ratio(&magnitudes))
        .clamp(0.0, 1.0);

        let features = AdvancedAudioFeatures {
            spectral_centroid: spectral_centroid(&magnitudes, freq),
            spectral_rolloff: spectral_rolloff(&magnitudes, freq),
            spectral_flux,
            zero_crossing_rate: zero_crossing_rate(&frame.waveform_samples),
            mfcc: mel_cepstrum(&magnitudes, nyquist),
            chroma,
            tonnetz: tonnetz(&chroma),
            harmonic_ratio: harmonic_ratio(&magnitudes, &self.harmonic_mask),
            percussive_ratio,
        };

        self.previous_spectrum = magnitudes;
        self.history.push(features);
        features
    }

    pub fn history(&self) -> &RingBuffer<AdvancedAudioFeatures> {
        &self.history
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.previous_spectrum.clear();
    }
}

pub fn spectral_centroid(magnitudes: &[f32], freq: impl Fn(usize) -> f32) -> f32 {
    let total: f32 = magnitudes.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let weighted: f32 = magnitudes
        .iter()
        .enumerate()
        .map(|(i, &m)| freq(i) * m)
        .sum();
    weighted / total
}

pub fn spectral_rolloff(magnitudes: &[f32], freq: impl Fn(usize) -> f32) -> f32 {
    let total: f32 = magnitudes.iter().map(|&m| m * m).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let threshold = total * ROLLOFF_FRACTION;
    let mut cumulative = 0.0;
    for (i, &m) in magnitudes.iter().enumerate() {
        cumulative += m * m;
        if cumulative >= threshold {
            return freq(i);
        }
    }
    freq(magnitudes.len().saturating_sub(1))
}

/// Positive difference between the low bins and the previous cepstral vector.
///
/// Bins past the end of the cepstral vector compare against zero.
fn flux_against_mfcc(magnitudes: &[f32], previous_mfcc: &[f32; MFCC_COEFFICIENTS]) -> f32 {
    magnitudes
        .iter()
        .take(FLUX_BINS)
        .enumerate()
        .map(|(i, &m)| (m - previous_mfcc.get(i).copied().unwrap_or(0.0)).max(0.0))
        .sum()
}

fn flux_against_spectrum(magnitudes: &[f32], previous: &[f32]) -> f32 {
    if previous.len() != magnitudes.len() || magnitudes.is_empty() {
        return 0.0;
    }
    let rise: f32 = magnitudes
        .iter()
        .zip(previous)
        .map(|(&cur, &prev)| (cur - prev).max(0.0))
        .sum();
    rise / magnitudes.len() as f32
}

/// Fraction of adjacent samples on opposite sides of the 128 center.
pub fn zero_crossing_rate(samples: &[u8]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 128) != (w[1] >= 128))
        .count();
    crossings as f32 / samples.len() as f32
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Log energies of triangular filters centered on mel-spaced frequencies.
pub fn mel_cepstrum(magnitudes: &[f32], nyquist: f32) -> [f32; MFCC_COEFFICIENTS] {
    let n = magnitudes.len();
    let mut coefficients = [EPSILON.ln(); MFCC_COEFFICIENTS];
    if n == 0 || nyquist <= 0.0 {
        return coefficients;
    }

    let mel_max = hz_to_mel(nyquist);
    let half_width = (n as f32 / MFCC_COEFFICIENTS as f32 / 2.0).max(1.0);

    for (i, coefficient) in coefficients.iter_mut().enumerate() {
        let center_mel = (i + 1) as f32 * mel_max / (MFCC_COEFFICIENTS + 1) as f32;
        let center_bin = mel_to_hz(center_mel) / nyquist * n as f32;

        let start = (center_bin - half_width).floor().max(0.0) as usize;
        let end = ((center_bin + half_width).ceil() as usize).min(n - 1);
        let energy: f32 = (start..=end)
            .map(|j| {
                let weight = 1.0 - (j as f32 - center_bin).abs() / half_width;
                magnitudes[j] * weight.max(0.0)
            })
            .sum();

        *coefficient = (energy + EPSILON).ln();
    }
    coefficients
}

/// Pitch class of a frequency, C = 0.
pub fn pitch_class(freq: f32) -> usize {
    let semitones_from_a = (12.0 * (freq / 440.0).log2()).round() as i32;
    (semitones_from_a + 9).rem_euclid(12) as usize
}

pub fn chroma(magnitudes: &[f32], freq: impl Fn(usize) -> f32) -> [f32; CHROMA_BINS] {
    let mut chroma = [0.0f32; CHROMA_BINS];
    for (i, &m) in magnitudes.iter().enumerate() {
        let f = freq(i);
        if f > CHROMA_MIN_HZ && f < CHROMA_MAX_HZ {
            chroma[pitch_class(f)] += m;
        }
    }

    let total: f32 = chroma.iter().sum();
    if total > 0.0 {
        chroma.iter_mut().for_each(|c| *c /= total);
    }
    chroma
}

pub fn tonnetz(chroma: &[f32; CHROMA_BINS]) -> [f32; 3] {
    let dot = |template: &[f32; CHROMA_BINS]| -> f32 {
        chroma.iter().zip(template).map(|(c, t)| c * t).sum()
    };
    [dot(&MAJOR_THIRDS), dot(&MINOR_THIRDS), dot(&PERFECT_FIFTHS)]
}

fn harmonic_mask(bin_count: usize, nyquist: f32) -> Vec<bool> {
    let harmonics: Vec<f32> = REFERENCE_FUNDAMENTALS
        .iter()
        .flat_map(|&f0| (1..=HARMONIC_ORDERS).map(move |k| f0 * k as f32))
        .collect();

    (0..bin_count)
        .map(|i| {
            let f = super::spectrum::bin_frequency(i, bin_count, nyquist);
            harmonics
                .iter()
                .any(|&h| (f - h).abs() <= HARMONIC_TOLERANCE_HZ)
        })
        .collect()
}

fn harmonic_ratio(magnitudes: &[f32], mask: &[bool]) -> f32 {
    let mut total = 0.0;
    let mut harmonic = 0.0;
    for (&m, &near_harmonic) in magnitudes.iter().zip(mask) {
        let energy = m * m;
        total += energy;
        if near_harmonic {
            harmonic += energy;
        }
    }
    (harmonic / (total + EPSILON)).clamp(0.0, 1.0)
}

fn high_frequency_ratio(magnitudes: &[f32]) -> f32 {
    let n = magnitudes.len();
    if n == 0 {
        return 0.0;
    }
    let start = ((1.0 - HIGH_BAND_FRACTION) * n as f32).floor() as usize;
    let total: f32 = magnitudes.iter().map(|&m| m * m).sum();
    let high: f32 = magnitudes[start..].iter().map(|&m| m * m).sum();
    (high / (total + EPSILON)).clamp(0.0, 1.0)
}
