//! Per-tick cost of the analysis pipeline

use beatscope::audio::analyser::FftAnalyser;
use beatscope::{AnalysisPipeline, Config};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_pipeline_tick(c: &mut Criterion) {
    let config = Config::default();
    let sample_rate = 44100u32;
    // One second of a 440 Hz tone with a 2 Hz amplitude pulse.
    let samples: Vec<f32> = (0..sample_rate)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let pulse = 0.5 + 0.5 * (2.0 * std::f32::consts::PI * 2.0 * t).sin();
            (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5 * pulse
        })
        .collect();
    let per_tick = (sample_rate as f32 / config.analysis.tick_rate) as usize;

    let mut analyser = FftAnalyser::from_config(sample_rate as f32, &config.analysis);
    let mut pipeline = AnalysisPipeline::new(&config);
    let mut offset = 0usize;
    let mut now_ms = 0.0f64;

    c.bench_function("pipeline_tick_fft2048", |b| {
        b.iter(|| {
            if offset + per_tick > samples.len() {
                offset = 0;
            }
            analyser.push_samples(&samples[offset..offset + per_tick]);
            offset += per_tick;
            now_ms += 1000.0 / config.analysis.tick_rate as f64;
            black_box(pipeline.tick(&mut analyser, black_box(now_ms)));
        });
    });
}

criterion_group!(benches, bench_pipeline_tick);
criterion_main!(benches);
