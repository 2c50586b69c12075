use anyhow::Result;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::analyser::FftAnalyser;
use super::beat::{BeatData, BeatDetector, RhythmPattern};
use super::characteristics::{
    estimate_key, CharacteristicsSynthesizer, Genre, Mood, MusicCharacteristics,
};
use super::clock::{Clock, FrameClock};
use super::decode::{decode_file, DecodedTrack};
use super::features::{AdvancedAudioFeatures, FeatureExtractor, CHROMA_BINS};
use super::spectrum::{BandLayout, SpectralFrame, SpectralFrontend, TransformProvider};
use crate::config::Config;
use crate::narrative::TransitionDetector;
use crate::report::{TimelineEntry, TrackSummary};

/// Everything one pipeline tick produced.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TickOutput {
    pub time_ms: f64,
    pub volume: f32,
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
    pub beat: BeatData,
    pub features: AdvancedAudioFeatures,
    pub characteristics: MusicCharacteristics,
}

/// Frontend, beat detector, feature extractor and synthesizer for one audio
/// source. Sources must not share a pipeline.
pub struct AnalysisPipeline {
    frontend: SpectralFrontend,
    beat: BeatDetector,
    features: FeatureExtractor,
    characteristics: CharacteristicsSynthesizer,
    characteristics_every: u64,
    ticks: u64,
    last_characteristics: Option<MusicCharacteristics>,
}

impl AnalysisPipeline {
    pub fn new(config: &Config) -> Self {
        Self {
            frontend: SpectralFrontend::new(BandLayout::from(&config.bands)),
            beat: BeatDetector::new(config.beat.clone()),
            features: FeatureExtractor::new(&config.features),
            characteristics: CharacteristicsSynthesizer::new(&config.characteristics),
            characteristics_every: config.analysis.characteristics_every.max(1) as u64,
            ticks: 0,
            last_characteristics: None,
        }
    }

    /// Pull one frame from `provider` and run it through every stage.
    pub fn tick<P: TransformProvider + ?Sized>(&mut self, provider: &mut P, now_ms: f64) -> TickOutput {
        let frame = self.frontend.capture(provider);
        self.process_frame(&frame, now_ms)
    }

    pub fn process_frame(&mut self, frame: &SpectralFrame, now_ms: f64) -> TickOutput {
        let beat = self.beat.process(frame, now_ms);
        let features = self.features.extract(frame, beat.confidence);

        let characteristics = match self.last_characteristics.as_ref() {
            Some(previous) if self.ticks % self.characteristics_every != 0 => {
                MusicCharacteristics {
                    tempo: beat.tempo,
                    time_signature: beat.time_signature,
                    ..previous.clone()
                }
            }
            _ => self.characteristics.synthesize(frame, Some(&beat), &features),
        };
        self.last_characteristics = Some(characteristics.clone());
        self.ticks += 1;

        TickOutput {
            time_ms: now_ms,
            volume: frame.volume,
            bass: frame.bass,
            mid: frame.mid,
            treble: frame.treble,
            beat,
            features,
            characteristics,
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn beat_detector(&self) -> &BeatDetector {
        &self.beat
    }

    pub fn feature_extractor(&self) -> &FeatureExtractor {
        &self.features
    }

    pub fn synthesizer(&self) -> &CharacteristicsSynthesizer {
        &self.characteristics
    }

    pub fn rhythm_patterns(&self) -> &[RhythmPattern] {
        self.beat.patterns()
    }

    /// Forget everything learned from the current source.
    pub fn reset(&mut self) {
        self.beat.reset();
        self.features.reset();
        self.characteristics.reset();
        self.ticks = 0;
        self.last_characteristics = None;
    }
}

pub struct TrackAnalysis {
    pub summary: TrackSummary,
    /// Per-tick entries, only collected when asked for.
    pub timeline: Option<Vec<TimelineEntry>>,
}

/// Replay a decoded track through a fresh pipeline at the configured tick rate.
pub fn analyze_track(track: &DecodedTrack, config: &Config, keep_timeline: bool) -> TrackAnalysis {
    let tick_rate = config.analysis.tick_rate as f64;
    let samples_per_tick = track.sample_rate as f64 / tick_rate;
    let total_ticks = (track.samples.len() as f64 / samples_per_tick).ceil() as usize;

    if track.sample_rate != config.analysis.sample_rate {
        log::debug!(
            "Track sample rate {}Hz differs from configured {}Hz; using the track's",
            track.sample_rate,
            config.analysis.sample_rate
        );
    }

    let mut analyser = FftAnalyser::from_config(track.sample_rate as f32, &config.analysis);
    let mut pipeline = AnalysisPipeline::new(config);
    let mut transitions = TransitionDetector::new(config.transitions.clone());
    let mut clock = FrameClock::new(tick_rate);

    log::info!(
        "Analysing {:.1}s of audio: {} ticks at {:.0}/s, FFT {}",
        track.duration_secs(),
        total_ticks,
        tick_rate,
        config.analysis.fft_size
    );

    let mut stats = TrackStats::default();
    let mut timeline = keep_timeline.then(|| Vec::with_capacity(total_ticks));
    let mut signals = Vec::new();

    for tick in 0..total_ticks {
        let start = (tick as f64 * samples_per_tick) as usize;
        let end = (((tick + 1) as f64 * samples_per_tick) as usize).min(track.samples.len());
        analyser.push_samples(&track.samples[start.min(end)..end]);

        let now_ms = clock.now_ms();
        let output = pipeline.tick(&mut analyser, now_ms);
        clock.advance();

        if let Some(signal) = transitions.evaluate(now_ms, &output.beat, pipeline.synthesizer()) {
            signals.push(signal);
        }

        stats.record(&output);
        if let Some(timeline) = timeline.as_mut() {
            timeline.push(timeline_entry(&output));
        }
    }

    let detector = pipeline.beat_detector();
    let summary = TrackSummary {
        duration_secs: track.duration_secs(),
        sample_rate: track.sample_rate,
        ticks: total_ticks,
        beats: stats.beats,
        final_tempo: detector.tempo(),
        average_tempo: stats.mean(stats.tempo_sum),
        time_signature: detector.time_signature(),
        key: estimate_key(&stats.chroma),
        dominant_mood: most_common(&stats.moods, &Mood::ALL).unwrap_or(Mood::Calm),
        dominant_genre: most_common(&stats.genres, &Genre::ALL).unwrap_or(Genre::Unknown),
        mean_energy: stats.mean(stats.energy_sum),
        mean_valence: stats.mean(stats.valence_sum),
        mean_danceability: stats.mean(stats.danceability_sum),
        rhythm_patterns: pipeline.rhythm_patterns().to_vec(),
        transitions: signals,
    };

    log::info!(
        "Analysis done: {} beats, {:.1} BPM, key {}, mood {}, {} transitions",
        summary.beats,
        summary.final_tempo,
        summary.key,
        summary.dominant_mood,
        summary.transitions.len()
    );

    TrackAnalysis { summary, timeline }
}

pub struct BatchItem {
    pub path: PathBuf,
    pub result: Result<TrackAnalysis>,
}

/// Decode and analyse every path in parallel, one pipeline per track.
/// Failures are reported per track and do not stop the batch.
pub fn analyze_batch<F>(
    paths: &[PathBuf],
    config: &Config,
    keep_timeline: bool,
    on_done: F,
) -> Vec<BatchItem>
where
    F: Fn(&Path) + Sync,
{
    paths
        .par_iter()
        .map(|path| {
            let result = decode_file(path).map(|track| analyze_track(&track, config, keep_timeline));
            if let Err(e) = &result {
                log::warn!("Skipping {}: {:#}", path.display(), e);
            }
            on_done(path);
            BatchItem {
                path: path.clone(),
                result,
            }
        })
        .collect()
}

fn timeline_entry(output: &TickOutput) -> TimelineEntry {
    TimelineEntry {
        time_ms: output.time_ms,
        volume: output.volume,
        bass: output.bass,
        mid: output.mid,
        treble: output.treble,
        is_beat: output.beat.is_beat,
        confidence: output.beat.confidence,
        tempo: output.beat.tempo,
        beat_phase: output.beat.beat_phase,
        intensity: output.beat.intensity,
        energy: output.characteristics.energy,
        valence: output.characteristics.valence,
        mood: output.characteristics.mood,
        genre: output.characteristics.genre,
    }
}

#[derive(Default)]
struct TrackStats {
    ticks: usize,
    beats: usize,
    tempo_sum: f64,
    energy_sum: f64,
    valence_sum: f64,
    danceability_sum: f64,
    chroma: [f32; CHROMA_BINS],
    moods: HashMap<Mood, usize>,
    genres: HashMap<Genre, usize>,
}

impl TrackStats {
    fn record(&mut self, output: &TickOutput) {
        let c = &output.characteristics;
        self.ticks += 1;
        if output.beat.is_beat {
            self.beats += 1;
        }
        self.tempo_sum += output.beat.tempo as f64;
        self.energy_sum += c.energy as f64;
        self.valence_sum += c.valence as f64;
        self.danceability_sum += c.danceability as f64;
        for (total, value) in self.chroma.iter_mut().zip(output.features.chroma.iter()) {
            *total += value;
        }
        *self.moods.entry(c.mood).or_default() += 1;
        *self.genres.entry(c.genre).or_default() += 1;
    }

    fn mean(&self, sum: f64) -> f32 {
        if self.ticks == 0 {
            0.0
        } else {
            (sum / self.ticks as f64) as f32
        }
    }
}

/// Label with the highest count; ties go to the one listed first in `order`.
fn most_common<T: Copy + Eq + std::hash::Hash>(counts: &HashMap<T, usize>, order: &[T]) -> Option<T> {
    let mut best: Option<(T, usize)> = None;
    for &label in order {
        let count = counts.get(&label).copied().unwrap_or(0);
        if count > 0 && best.map_or(true, |(_, c)| count > c) {
            best = Some((label, count));
        }
    }
    best.map(|(label, _)| label)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, secs: f32) -> Vec<f32> {
        let len = (sample_rate as f32 * secs) as usize;
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn silent_track_has_no_beats() {
        let track = DecodedTrack {
            samples: vec![0.0; 44100 * 2],
            sample_rate: 44100,
            channels: 1,
        };
        let analysis = analyze_track(&track, &Config::default(), true);
        assert_eq!(analysis.summary.ticks, 120);
        assert_eq!(analysis.timeline.map(|t| t.len()), Some(120));
        assert_eq!(analysis.summary.beats, 0);
        assert_eq!(analysis.summary.final_tempo, 120.0);
        assert_eq!(analysis.summary.mean_energy, 0.0);
        assert_eq!(analysis.summary.dominant_mood, Mood::Calm);
        assert!(analysis.summary.transitions.is_empty());
    }

    #[test]
    fn timeline_clock_steps_per_tick() {
        let track = DecodedTrack {
            samples: sine(440.0, 44100, 0.5),
            sample_rate: 44100,
            channels: 1,
        };
        let analysis = analyze_track(&track, &Config::default(), true);
        let timeline = analysis.timeline.unwrap();
        assert_eq!(timeline.len(), 30);
        let first = timeline[0].time_ms;
        assert_eq!(first, 0.0);
        let second = timeline[1].time_ms;
        assert!((second - first - 1000.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn tone_registers_energy() {
        let track = DecodedTrack {
            samples: sine(440.0, 44100, 1.0),
            sample_rate: 44100,
            channels: 1,
        };
        let analysis = analyze_track(&track, &Config::default(), true);
        assert_eq!(analysis.summary.ticks, 60);
        assert!(analysis.summary.mean_energy > 0.0);
        let timeline = analysis.timeline.unwrap();
        assert!(timeline.iter().all(|e| (60.0..=200.0).contains(&e.tempo)));
    }

    #[test]
    fn timeline_is_skipped_unless_requested() {
        let track = DecodedTrack {
            samples: sine(220.0, 44100, 0.5),
            sample_rate: 44100,
            channels: 1,
        };
        let without = analyze_track(&track, &Config::default(), false);
        assert!(without.timeline.is_none());
        assert_eq!(without.summary.ticks, 30);

        let with = analyze_track(&track, &Config::default(), true);
        assert_eq!(with.summary.beats, without.summary.beats);
        assert_eq!(with.summary.mean_energy, without.summary.mean_energy);
    }

    #[test]
    fn throttled_characteristics_refresh_tempo_only() {
        let mut config = Config::default();
        config.analysis.characteristics_every = 4;
        let mut pipeline = AnalysisPipeline::new(&config);
        let frame = SpectralFrame::from_bytes(vec![40; 1024], vec![128; 1024], 44100.0, &BandLayout::default());

        for i in 0..8 {
            pipeline.process_frame(&frame, i as f64 * 16.0);
        }
        assert_eq!(pipeline.ticks(), 8);
        assert_eq!(pipeline.synthesizer().len(), 2);
        // Features are still extracted on every tick.
        assert_eq!(pipeline.feature_extractor().history().len(), 8);

        pipeline.reset();
        assert!(pipeline.feature_extractor().history().is_empty());
    }

    #[test]
    fn most_common_prefers_listed_order_on_ties() {
        let mut counts = HashMap::new();
        counts.insert(Mood::Dark, 3);
        counts.insert(Mood::Calm, 3);
        assert_eq!(most_common(&counts, &Mood::ALL), Some(Mood::Calm));
        counts.insert(Mood::Dark, 4);
        assert_eq!(most_common(&counts, &Mood::ALL), Some(Mood::Dark));
        assert_eq!(most_common(&HashMap::<Mood, usize>::new(), &Mood::ALL), None);
    }

    #[test]
    fn batch_reports_missing_files_without_aborting() {
        let paths = vec![PathBuf::from("/no/such/track.mp3")];
        let done = std::sync::atomic::AtomicUsize::new(0);
        let items = analyze_batch(&paths, &Config::default(), false, |_| {
            done.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        });
        assert_eq!(items.len(), 1);
        assert!(items[0].result.is_err());
        assert_eq!(done.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}
