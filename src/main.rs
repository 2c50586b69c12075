mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

use beatscope::audio::analysis::analyze_batch;
use beatscope::config::{self, Config};
use beatscope::report::{self, TrackReport};
use cli::{Cli, DEFAULT_FFT_SIZE, DEFAULT_MIN_BEAT_INTERVAL, DEFAULT_TICK_RATE};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref());
    apply_overrides(&mut config, &cli);
    config.validate().context("Invalid analysis settings")?;

    for input in &cli.inputs {
        if !input.exists() {
            anyhow::bail!("Input file not found: {}", input.display());
        }
    }

    log::info!("beatscope - beat, tempo and mood analysis");
    log::info!(
        "{} input(s), {:.0} ticks/s, FFT {}, min beat interval {:.0}ms",
        cli.inputs.len(),
        config.analysis.tick_rate,
        config.analysis.fft_size,
        config.beat.min_beat_interval_ms
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cli.jobs)
        .build()
        .context("Failed to start worker pool")?;

    let pb = ProgressBar::new(cli.inputs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} tracks {msg}")
            .context("Invalid progress template")?
            .progress_chars("=>-"),
    );

    let items = pool.install(|| {
        analyze_batch(&cli.inputs, &config, cli.timeline, |path| {
            pb.set_message(file_label(path));
            pb.inc(1);
        })
    });
    pb.finish_with_message("analysis complete");

    let mut reports = Vec::with_capacity(items.len());
    let mut failures = 0usize;
    for item in items {
        match item.result {
            Ok(analysis) => {
                println!("{}", report::format_summary(&item.path, &analysis.summary));
                reports.push(TrackReport {
                    path: item.path,
                    summary: analysis.summary,
                    timeline: analysis.timeline,
                });
            }
            Err(e) => {
                failures += 1;
                eprintln!("{}: {:#}", item.path.display(), e);
            }
        }
    }

    if let Some(ref json_path) = cli.json {
        report::write_json(json_path, &reports)?;
    }

    if reports.is_empty() {
        anyhow::bail!("No tracks could be analysed");
    }
    if failures > 0 {
        log::warn!("{} of {} tracks failed", failures, cli.inputs.len());
    }
    Ok(())
}

/// Explicit path, then ./beatscope.toml, then the per-user config locations.
fn discover_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from("beatscope.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("beatscope").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("beatscope").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

fn load_config(explicit: Option<&Path>) -> Config {
    let Some(path) = discover_config(explicit) else {
        return Config::default();
    };
    match config::load_config(&path) {
        Ok(cfg) => {
            log::info!("Loaded config from {}", path.display());
            cfg
        }
        Err(e) => {
            log::warn!("{}; using defaults", e);
            Config::default()
        }
    }
}

/// CLI values win only when they differ from the CLI defaults.
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if cli.tick_rate != DEFAULT_TICK_RATE {
        config.analysis.tick_rate = cli.tick_rate;
    }
    if cli.fft_size != DEFAULT_FFT_SIZE {
        config.analysis.fft_size = cli.fft_size;
    }
    if cli.min_beat_interval != DEFAULT_MIN_BEAT_INTERVAL {
        config.beat.min_beat_interval_ms = cli.min_beat_interval;
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
