//! Online beat, tempo and rhythm tracking.
//!
//! One `BeatDetector` per audio source. Every tick it consumes a
//! `SpectralFrame`, updates its rolling histories and returns `BeatData`.
//! Onsets need three things at once: an energy spike above an adaptive
//! threshold, at least `min_beat_interval_ms` since the previous beat, and a
//! bass level above its recent mean.

use serde::Serialize;

use super::history::RingBuffer;
use super::spectrum::SpectralFrame;
use crate::config::BeatConfig;

pub const DEFAULT_TEMPO: f32 = 120.0;
pub const MIN_TEMPO: f32 = 60.0;
pub const MAX_TEMPO: f32 = 200.0;
pub const DEFAULT_TIME_SIGNATURE: u8 = 4;

const EPSILON: f32 = 1e-6;

// Rhythm pattern mining
const PATTERN_MIN_SCORE: f32 = 0.6;
const PATTERN_MATCH_RATIO: f32 = 0.8;
const PATTERN_REINFORCEMENT: f32 = 0.1;
const PATTERN_PRUNE_CONFIDENCE: f32 = 0.3;
const SIGNATURE_CONFIDENCE: f32 = 0.7;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BeatData {
    pub is_beat: bool,
    /// How far energy exceeded the threshold (0.0-1.0), 0 without a beat
    pub confidence: f32,
    /// Smoothed tempo in BPM (60-200)
    pub tempo: f32,
    pub time_signature: u8,
    /// Position within the current beat period, 0.0 at the last beat
    pub beat_phase: f32,
    /// Weighted band/energy level (0.0-1.0)
    pub intensity: f32,
}

impl Default for BeatData {
    fn default() -> Self {
        Self {
            is_beat: false,
            confidence: 0.0,
            tempo: DEFAULT_TEMPO,
            time_signature: DEFAULT_TIME_SIGNATURE,
            beat_phase: 0.0,
            intensity: 0.0,
        }
    }
}

/// A repeating onset template found in the recent onset sequence.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RhythmPattern {
    pub pattern: Vec<bool>,
    pub confidence: f32,
    pub period: usize,
}

/// Read-only view of the detector's rolling histories.
pub struct DetectorHistories<'a> {
    pub energy: &'a RingBuffer<f32>,
    pub bass: &'a RingBuffer<f32>,
    pub mid: &'a RingBuffer<f32>,
    pub treble: &'a RingBuffer<f32>,
    pub beat_timestamps: &'a RingBuffer<f64>,
    pub tempo: &'a RingBuffer<f32>,
    pub onsets: &'a RingBuffer<bool>,
}

pub struct BeatDetector {
    config: BeatConfig,
    energy_history: RingBuffer<f32>,
    bass_history: RingBuffer<f32>,
    mid_history: RingBuffer<f32>,
    treble_history: RingBuffer<f32>,
    beat_timestamps: RingBuffer<f64>,
    tempo_history: RingBuffer<f32>,
    pattern_buffer: RingBuffer<bool>,
    /// Total onset flags pushed since the last reset; drives the mining cadence.
    pattern_pushes: u64,
    rhythm_patterns: Vec<RhythmPattern>,
    last_beat_time: Option<f64>,
    beat_phase: f32,
}

struct Onset {
    accepted: bool,
    energy_ratio: f32,
}

impl BeatDetector {
    pub fn new(config: BeatConfig) -> Self {
        Self {
            energy_history: RingBuffer::new(config.energy_history),
            bass_history: RingBuffer::new(config.band_history),
            mid_history: RingBuffer::new(config.band_history),
            treble_history: RingBuffer::new(config.band_history),
            beat_timestamps: RingBuffer::new(config.beat_history),
            tempo_history: RingBuffer::new(config.tempo_history),
            pattern_buffer: RingBuffer::new(config.pattern_history),
            pattern_pushes: 0,
            rhythm_patterns: Vec::with_capacity(config.max_patterns + 1),
            last_beat_time: None,
            beat_phase: 0.0,
            config,
        }
    }

    pub fn process(&mut self, frame: &SpectralFrame, now_ms: f64) -> BeatData {
        let energy = frame_energy(frame);

        self.energy_history.push(energy);
        self.bass_history.push(frame.bass);
        self.mid_history.push(frame.mid);
        self.treble_history.push(frame.treble);

        let onset = self.detect_onset(energy, now_ms);
        let confidence = if onset.accepted {
            ((onset.energy_ratio - 1.0) * 0.5).clamp(0.0, 1.0)
        } else {
            0.0
        };

        if onset.accepted {
            self.beat_timestamps.push(now_ms);
            self.last_beat_time = Some(now_ms);
            log::debug!(
                "Beat at {:.0}ms: ratio={:.2}, confidence={:.2}",
                now_ms,
                onset.energy_ratio,
                confidence
            );
        }

        let tempo = if onset.accepted {
            self.update_tempo()
        } else {
            self.tempo()
        };

        self.beat_phase = self.phase_at(now_ms, tempo);

        self.pattern_buffer.push(onset.accepted);
        self.pattern_pushes += 1;
        let interval = self.config.pattern_interval as u64;
        if self.pattern_pushes % interval == 0 && self.pattern_buffer.len() as u64 >= interval {
            self.mine_patterns();
        }

        let intensity = ((frame.bass * 0.4 + frame.mid * 0.3 + frame.treble * 0.2 + energy * 0.1)
            * 2.0)
            .clamp(0.0, 1.0);

        BeatData {
            is_beat: onset.accepted,
            confidence,
            tempo,
            time_signature: self.time_signature(),
            beat_phase: self.beat_phase,
            intensity,
        }
    }

    fn detect_onset(&self, energy: f32, now_ms: f64) -> Onset {
        let window = self.config.onset_window;
        if self.energy_history.len() < window {
            return Onset {
                accepted: false,
                energy_ratio: 0.0,
            };
        }

        let recent: Vec<f32> = self.energy_history.latest(window).copied().collect();
        let local_average = recent.iter().sum::<f32>() / window as f32;
        let variance = recent
            .iter()
            .map(|&e| (e - local_average).powi(2))
            .sum::<f32>()
            / window as f32;

        let adaptive_threshold = self.config.base_threshold + variance.sqrt();
        let energy_ratio = energy / (local_average + EPSILON);
        let is_energy_beat = energy_ratio > adaptive_threshold;

        let is_timing_valid = self
            .last_beat_time
            .map_or(true, |last| now_ms - last >= self.config.min_beat_interval_ms);

        let is_bass_hit = self
            .bass_history
            .last()
            .is_some_and(|&bass| bass > self.bass_history.mean() * self.config.bass_hit_ratio);

        Onset {
            accepted: is_energy_beat && is_timing_valid && is_bass_hit,
            energy_ratio,
        }
    }

    /// Median-filtered inter-beat interval tempo, exponentially smoothed.
    fn update_tempo(&mut self) -> f32 {
        let previous = self.tempo();
        if self.beat_timestamps.len() < 2 {
            return previous;
        }

        let stamps = self.beat_timestamps.to_vec();
        let intervals: Vec<f32> = stamps.windows(2).map(|w| (w[1] - w[0]) as f32).collect();

        let median = {
            let mut sorted = intervals.clone();
            sorted.sort_by(|a, b| a.total_cmp(b));
            sorted[sorted.len() / 2]
        };
        if median <= 0.0 {
            return previous;
        }

        let tolerance = median * self.config.outlier_tolerance;
        let survivors: Vec<f32> = intervals
            .into_iter()
            .filter(|&i| (i - median).abs() <= tolerance)
            .collect();
        if survivors.is_empty() {
            return previous;
        }

        let average = survivors.iter().sum::<f32>() / survivors.len() as f32;
        let raw_bpm = 60000.0 / average;
        let alpha = self.config.tempo_smoothing;
        let smoothed = (alpha * previous + (1.0 - alpha) * raw_bpm).clamp(MIN_TEMPO, MAX_TEMPO);

        self.tempo_history.push(smoothed);
        log::debug!(
            "Tempo update: raw={:.1} BPM from {} intervals, smoothed={:.1} BPM",
            raw_bpm,
            survivors.len(),
            smoothed
        );
        smoothed
    }

    fn phase_at(&self, now_ms: f64, tempo: f32) -> f32 {
        let Some(last) = self.last_beat_time else {
            return 0.0;
        };
        let beat_duration = 60000.0 / tempo as f64;
        let phase = ((now_ms - last).rem_euclid(beat_duration) / beat_duration) as f32;
        if phase >= 1.0 {
            0.0
        } else {
            phase
        }
    }

    fn mine_patterns(&mut self) {
        let buffer = self.pattern_buffer.to_vec();

        for &period in &self.config.pattern_periods {
            if buffer.len() < period * 2 {
                continue;
            }
            let candidate = &buffer[buffer.len() - period..];
            if !candidate.iter().any(|&onset| onset) {
                continue;
            }

            let score = self_similarity(&buffer, candidate);
            if score <= PATTERN_MIN_SCORE {
                continue;
            }

            let existing = self.rhythm_patterns.iter_mut().find(|p| {
                p.period == period && match_ratio(&p.pattern, candidate) >= PATTERN_MATCH_RATIO
            });
            match existing {
                Some(pattern) => {
                    pattern.confidence = (pattern.confidence + PATTERN_REINFORCEMENT).min(1.0);
                }
                None => {
                    log::debug!("New rhythm pattern: period={}, score={:.2}", period, score);
                    self.rhythm_patterns.push(RhythmPattern {
                        pattern: candidate.to_vec(),
                        confidence: score,
                        period,
                    });
                }
            }
        }

        self.rhythm_patterns
            .retain(|p| p.confidence > PATTERN_PRUNE_CONFIDENCE);
        self.rhythm_patterns
            .sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        self.rhythm_patterns.truncate(self.config.max_patterns);
    }

    /// Coarse meter from the periods of confident rhythm patterns.
    pub fn time_signature(&self) -> u8 {
        let periods: Vec<usize> = self
            .rhythm_patterns
            .iter()
            .filter(|p| p.confidence > SIGNATURE_CONFIDENCE)
            .map(|p| p.period)
            .collect();

        if periods.iter().any(|&p| p == 4 || p == 8) {
            4
        } else if periods.iter().any(|&p| p == 3 || p == 6) {
            3
        } else if periods.contains(&2) {
            2
        } else {
            DEFAULT_TIME_SIGNATURE
        }
    }

    /// Current smoothed tempo, `DEFAULT_TEMPO` before the first estimate.
    pub fn tempo(&self) -> f32 {
        self.tempo_history.last().copied().unwrap_or(DEFAULT_TEMPO)
    }

    pub fn beat_phase(&self) -> f32 {
        self.beat_phase
    }

    pub fn last_beat_time(&self) -> Option<f64> {
        self.last_beat_time
    }

    pub fn patterns(&self) -> &[RhythmPattern] {
        &self.rhythm_patterns
    }

    pub fn histories(&self) -> DetectorHistories<'_> {
        DetectorHistories {
            energy: &self.energy_history,
            bass: &self.bass_history,
            mid: &self.mid_history,
            treble: &self.treble_history,
            beat_timestamps: &self.beat_timestamps,
            tempo: &self.tempo_history,
            onsets: &self.pattern_buffer,
        }
    }

    /// Drop all history. Call when switching audio sources.
    pub fn reset(&mut self) {
        self.energy_history.clear();
        self.bass_history.clear();
        self.mid_history.clear();
        self.treble_history.clear();
        self.beat_timestamps.clear();
        self.tempo_history.clear();
        self.pattern_buffer.clear();
        self.pattern_pushes = 0;
        self.rhythm_patterns.clear();
        self.last_beat_time = None;
        self.beat_phase = 0.0;
    }
}

/// RMS of the normalized magnitudes over all bins.
pub fn frame_energy(frame: &SpectralFrame) -> f32 {
    let n = frame.bin_count();
    if n == 0 {
        return 0.0;
    }
    let sum_sq: f32 = frame.magnitudes().map(|m| m * m).sum();
    (sum_sq / n as f32).sqrt()
}

/// Fraction of matching bits when `candidate` is slid across `buffer` in
/// period-sized steps. Windows are aligned to the newest sample, where the
/// candidate itself was taken from.
fn self_similarity(buffer: &[bool], candidate: &[bool]) -> f32 {
    let period = candidate.len();
    let mut matches = 0usize;
    let mut comparisons = 0usize;
    for window in buffer.rchunks_exact(period) {
        matches += window.iter().zip(candidate).filter(|(a, b)| a == b).count();
        comparisons += period;
    }
    if comparisons == 0 {
        return 0.0;
    }
    matches as f32 / comparisons as f32
}

fn match_ratio(a: &[bool], b: &[bool]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b).filter(|(x, y)| x == y).count() as f32 / a.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::spectrum::BandLayout;

    const BINS: usize = 1024;
    const TICK_MS: f64 = 500.0 / 30.0;

    fn frame(level: u8) -> SpectralFrame {
        SpectralFrame::from_bytes(vec![level; BINS], vec![128; BINS], 44100.0, &BandLayout::default())
    }

    fn detector() -> BeatDetector {
        BeatDetector::new(BeatConfig::default())
    }

    #[test]
    fn cold_start_never_beats() {
        let mut d = detector();
        for tick in 0..9 {
            let level = if tick % 2 == 0 { 0 } else { 255 };
            let beat = d.process(&frame(level), tick as f64 * TICK_MS);
            assert!(!beat.is_beat, "beat during warmup at tick {}", tick);
            assert_eq!(beat.tempo, DEFAULT_TEMPO);
            assert_eq!(beat.beat_phase, 0.0);
        }
    }

    #[test]
    fn spike_after_steady_level_is_a_beat() {
        let mut d = detector();
        for tick in 0..20 {
            d.process(&frame(60), tick as f64 * TICK_MS);
        }
        let beat = d.process(&frame(120), 20.0 * TICK_MS);
        assert!(beat.is_beat);
        assert!(beat.confidence > 0.3 && beat.confidence <= 1.0);
        assert_eq!(beat.beat_phase, 0.0);
    }

    #[test]
    fn timing_gate_suppresses_close_onsets() {
        let mut d = detector();
        let mut accepted = Vec::new();
        // Spikes every 6 ticks (100 ms), far faster than the 300 ms gate.
        for tick in 0..300u32 {
            let level = if tick % 6 == 0 { 140 } else { 60 };
            let now = tick as f64 * TICK_MS;
            if d.process(&frame(level), now).is_beat {
                accepted.push(now);
            }
        }
        assert!(!accepted.is_empty());
        for pair in accepted.windows(2) {
            assert!(pair[1] - pair[0] >= 300.0 - 1e-9);
        }
    }

    #[test]
    fn loud_passage_without_bass_is_rejected() {
        let mut d = detector();
        for tick in 0..20 {
            d.process(&frame(60), tick as f64 * TICK_MS);
        }
        // Spike only above the bass band (bins 2 and up).
        let mut bytes = vec![60u8; BINS];
        for b in bytes.iter_mut().skip(2) {
            *b = 200;
        }
        let spike = SpectralFrame::from_bytes(bytes, vec![128; BINS], 44100.0, &BandLayout::default());
        assert!(!d.process(&spike, 20.0 * TICK_MS).is_beat);
    }

    #[test]
    fn phase_advances_at_tempo_rate() {
        let mut d = detector();
        for tick in 0..20 {
            d.process(&frame(60), tick as f64 * TICK_MS);
        }
        let beat_time = 20.0 * TICK_MS;
        assert!(d.process(&frame(120), beat_time).is_beat);

        // 15 ticks = 250 ms = half a beat at 120 BPM.
        let mut last = BeatData::default();
        for tick in 21..=35 {
            last = d.process(&frame(60), tick as f64 * TICK_MS);
        }
        assert!((last.beat_phase - 0.5).abs() < 1e-3, "phase {}", last.beat_phase);
    }

    #[test]
    fn tempo_rejects_outlier_intervals() {
        let mut d = detector();
        d.beat_timestamps.push(0.0);
        d.beat_timestamps.push(500.0);
        d.beat_timestamps.push(1000.0);
        d.beat_timestamps.push(1250.0); // outlier: 250 ms
        d.beat_timestamps.push(1750.0);
        let tempo = d.update_tempo();
        assert!((tempo - 120.0).abs() < 1e-3, "tempo {}", tempo);
    }

    #[test]
    fn tempo_smooths_toward_new_rate() {
        let mut d = detector();
        for i in 0..8 {
            d.beat_timestamps.push(i as f64 * 600.0); // 100 BPM
        }
        let tempo = d.update_tempo();
        assert!((tempo - 118.0).abs() < 1e-3, "tempo {}", tempo);
        assert_eq!(d.tempo(), tempo);
    }

    #[test]
    fn self_similarity_of_periodic_sequence() {
        let bar = [true, false, false, false];
        let buffer: Vec<bool> = bar.iter().cycle().take(32).copied().collect();
        assert_eq!(self_similarity(&buffer, &bar), 1.0);

        let mut noisy = buffer.clone();
        noisy[1] = true;
        noisy[2] = true;
        let score = self_similarity(&noisy, &bar);
        assert!((score - 30.0 / 32.0).abs() < 1e-6);
    }

    #[test]
    fn mined_patterns_reinforce_and_set_signature() {
        let mut d = detector();
        let bar = [true, false, false, false];
        for (i, &onset) in bar.iter().cycle().take(32).enumerate() {
            d.pattern_buffer.push(onset);
            d.pattern_pushes = i as u64 + 1;
        }
        d.mine_patterns();
        let periods: Vec<usize> = d.patterns().iter().map(|p| p.period).collect();
        assert!(periods.contains(&4));
        assert!(periods.contains(&8));
        assert!(periods.contains(&16));
        assert!(d.patterns().iter().all(|p| p.confidence == 1.0));
        assert_eq!(d.time_signature(), 4);

        d.mine_patterns();
        assert_eq!(d.patterns().len(), 3);
    }

    #[test]
    fn empty_candidates_are_not_patterns() {
        let mut d = detector();
        for _ in 0..32 {
            d.pattern_buffer.push(false);
        }
        d.mine_patterns();
        assert!(d.patterns().is_empty());
        assert_eq!(d.time_signature(), DEFAULT_TIME_SIGNATURE);
    }

    #[test]
    fn triple_meter_from_period_three() {
        let config = BeatConfig {
            pattern_periods: vec![3, 6],
            ..BeatConfig::default()
        };
        let mut d = BeatDetector::new(config);
        for onset in [true, false, false].iter().cycle().take(30) {
            d.pattern_buffer.push(*onset);
        }
        d.mine_patterns();
        assert_eq!(d.time_signature(), 3);
    }

    #[test]
    fn intensity_is_bounded() {
        let mut d = detector();
        let beat = d.process(&frame(255), 0.0);
        assert_eq!(beat.intensity, 1.0);
        let beat = d.process(&frame(0), TICK_MS);
        assert_eq!(beat.intensity, 0.0);
    }

    #[test]
    fn reset_clears_histories() {
        let mut d = detector();
        for tick in 0..100 {
            let level = if tick % 30 == 0 { 140 } else { 60 };
            d.process(&frame(level), tick as f64 * TICK_MS);
        }
        d.reset();
        let h = d.histories();
        assert!(h.energy.is_empty() && h.bass.is_empty() && h.mid.is_empty());
        assert!(h.treble.is_empty() && h.beat_timestamps.is_empty());
        assert!(h.tempo.is_empty() && h.onsets.is_empty());
        assert!(d.patterns().is_empty());
        assert_eq!(d.last_beat_time(), None);
        assert_eq!(d.beat_phase(), 0.0);
    }
}
