//! Serializable per-track results written by the CLI.

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::audio::beat::RhythmPattern;
use crate::audio::characteristics::{Genre, Mood, PitchClass};
use crate::narrative::TransitionSignal;

#[derive(Clone, Debug, Serialize)]
pub struct TrackSummary {
    pub duration_secs: f32,
    pub sample_rate: u32,
    pub ticks: usize,
    pub beats: usize,
    pub final_tempo: f32,
    pub average_tempo: f32,
    pub time_signature: u8,
    pub key: PitchClass,
    pub dominant_mood: Mood,
    pub dominant_genre: Genre,
    pub mean_energy: f32,
    pub mean_valence: f32,
    pub mean_danceability: f32,
    pub rhythm_patterns: Vec<RhythmPattern>,
    pub transitions: Vec<TransitionSignal>,
}

/// One tick of the analysis, flattened for plotting.
#[derive(Clone, Debug, Serialize)]
pub struct TimelineEntry {
    pub time_ms: f64,
    pub volume: f32,
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
    pub is_beat: bool,
    pub confidence: f32,
    pub tempo: f32,
    pub beat_phase: f32,
    pub intensity: f32,
    pub energy: f32,
    pub valence: f32,
    pub mood: Mood,
    pub genre: Genre,
}

#[derive(Clone, Debug, Serialize)]
pub struct TrackReport {
    pub path: PathBuf,
    pub summary: TrackSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeline: Option<Vec<TimelineEntry>>,
}

pub fn write_json(path: &Path, reports: &[TrackReport]) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create report file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, reports)
        .with_context(|| format!("Failed to write report: {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("Failed to write report: {}", path.display()))?;
    log::info!("Wrote {} track report(s) to {}", reports.len(), path.display());
    Ok(())
}

/// Short human-readable block for the terminal.
pub fn format_summary(path: &Path, summary: &TrackSummary) -> String {
    let scenes = summary
        .transitions
        .iter()
        .map(|t| format!("{:.1}s {:?}", t.at_ms / 1000.0, t.reason))
        .collect::<Vec<_>>();

    let mut out = format!(
        "{}\n  duration   {:.1}s ({} ticks)\n  tempo      {:.1} BPM (avg {:.1}), {}/4, {} beats\n  key        {}\n  mood       {}\n  genre      {}\n  energy     {:.2}  valence {:.2}  danceability {:.2}",
        path.display(),
        summary.duration_secs,
        summary.ticks,
        summary.final_tempo,
        summary.average_tempo,
        summary.time_signature,
        summary.beats,
        summary.key,
        summary.dominant_mood,
        summary.dominant_genre,
        summary.mean_energy,
        summary.mean_valence,
        summary.mean_danceability,
    );
    if !scenes.is_empty() {
        out.push_str(&format!("\n  scenes     {}", scenes.join(", ")));
    }
    out
}
