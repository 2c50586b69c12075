use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_TICK_RATE: f32 = 60.0;
pub const DEFAULT_FFT_SIZE: usize = 2048;
pub const DEFAULT_MIN_BEAT_INTERVAL: f64 = 300.0;

#[derive(Parser, Debug)]
#[command(name = "beatscope", about = "Beat, tempo and mood analysis for audio files")]
pub struct Cli {
    /// Input audio files (WAV, MP3, FLAC, OGG, AAC)
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Config file (defaults to ./beatscope.toml or the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Analysis ticks per second
    #[arg(long, default_value_t = DEFAULT_TICK_RATE)]
    pub tick_rate: f32,

    /// FFT size (power of two); bin count is half of this
    #[arg(long, default_value_t = DEFAULT_FFT_SIZE)]
    pub fft_size: usize,

    /// Minimum time between accepted beats in milliseconds
    #[arg(long, default_value_t = DEFAULT_MIN_BEAT_INTERVAL)]
    pub min_beat_interval: f64,

    /// Write a JSON report to this path
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Include the per-tick timeline in the JSON report
    #[arg(long)]
    pub timeline: bool,

    /// Worker threads for batch analysis (0 = one per core)
    #[arg(short, long, default_value_t = 0)]
    pub jobs: usize,
}
