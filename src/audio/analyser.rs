use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use super::history::RingBuffer;
use super::spectrum::{TransformProvider, BYTE_CENTER, BYTE_MAX};
use crate::config::AnalysisConfig;

/// Streaming FFT analyser that hosts push mono PCM into.
///
/// Output follows the usual browser analyser-node conventions: a Hann
/// window over the last `fft_size` samples, magnitudes smoothed over time
/// and mapped from `[min_decibels, max_decibels]` onto 0-255, and the most
/// recent `fft_size / 2` samples as time-domain bytes.
pub struct FftAnalyser {
    sample_rate: f32,
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    samples: RingBuffer<f32>,
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    smoothing: f32,
    min_decibels: f32,
    max_decibels: f32,
    ready: bool,
}

impl FftAnalyser {
    pub fn new(sample_rate: f32, fft_size: usize) -> Self {
        let defaults = AnalysisConfig::default();
        Self::with_options(
            sample_rate,
            fft_size,
            defaults.smoothing,
            defaults.min_decibels,
            defaults.max_decibels,
        )
    }

    /// # Panics
    ///
    /// If `fft_size` is not a power of two of at least 2. `Config::validate`
    /// rejects such sizes before they reach here.
    pub fn with_options(
        sample_rate: f32,
        fft_size: usize,
        smoothing: f32,
        min_decibels: f32,
        max_decibels: f32,
    ) -> Self {
        assert!(
            fft_size >= 2 && fft_size.is_power_of_two(),
            "fft_size must be a power of two >= 2, got {}",
            fft_size
        );
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);

        Self {
            sample_rate,
            fft_size,
            fft,
            window: hann_window(fft_size),
            samples: RingBuffer::new(fft_size),
            smoothed: vec![0.0; fft_size / 2],
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            smoothing,
            min_decibels,
            max_decibels,
            ready: false,
        }
    }

    /// Analyser at `sample_rate` with the remaining settings taken from config.
    pub fn from_config(sample_rate: f32, config: &AnalysisConfig) -> Self {
        Self::with_options(
            sample_rate,
            config.fft_size,
            config.smoothing,
            config.min_decibels,
            config.max_decibels,
        )
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn push_samples(&mut self, samples: &[f32]) {
        for &s in samples {
            self.samples.push(s);
        }
        if !samples.is_empty() {
            self.ready = true;
        }
    }

    /// Forget buffered audio and smoothing state, e.g. when the source changes.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.smoothed.iter_mut().for_each(|s| *s = 0.0);
        self.ready = false;
    }

    fn transform(&mut self) {
        // Right-align buffered samples so a partially filled ring reads as leading silence.
        let pad = self.fft_size - self.samples.len();
        for slot in self.scratch.iter_mut().take(pad) {
            *slot = Complex::new(0.0, 0.0);
        }
        for (i, &s) in self.samples.iter().enumerate() {
            let idx = pad + i;
            self.scratch[idx] = Complex::new(s * self.window[idx], 0.0);
        }

        self.fft.process(&mut self.scratch);

        let scale = 1.0 / self.fft_size as f32;
        let tau = self.smoothing;
        for (s, c) in self.smoothed.iter_mut().zip(self.scratch.iter()) {
            let magnitude = c.norm() * scale;
            *s = tau * *s + (1.0 - tau) * magnitude;
        }
    }

    fn to_byte(&self, magnitude: f32) -> u8 {
        if magnitude <= 0.0 {
            return 0;
        }
        let db = 20.0 * magnitude.log10();
        let range = self.max_decibels - self.min_decibels;
        let scaled = (db - self.min_decibels) / range * BYTE_MAX;
        scaled.clamp(0.0, BYTE_MAX) as u8
    }
}

impl TransformProvider for FftAnalyser {
    fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn frequency_bytes(&mut self, out: &mut [u8]) {
        self.transform();
        for (byte, &s) in out.iter_mut().zip(self.smoothed.iter()) {
            *byte = self.to_byte(s);
        }
    }

    fn time_domain_bytes(&mut self, out: &mut [u8]) {
        let n = out.len().min(self.samples.len());
        // Leading slots stay silent when fewer samples are buffered than requested.
        let silent = out.len() - n;
        for byte in out.iter_mut().take(silent) {
            *byte = BYTE_CENTER as u8;
        }
        for (byte, &s) in out[silent..].iter_mut().zip(self.samples.latest(n)) {
            *byte = (BYTE_CENTER * (1.0 + s)).clamp(0.0, BYTE_MAX) as u8;
        }
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: f32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin() * amplitude)
            .collect()
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn zero_fft_size_is_rejected() {
        FftAnalyser::new(44100.0, 0);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn single_point_fft_is_rejected() {
        FftAnalyser::new(44100.0, 1);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn non_power_of_two_fft_is_rejected() {
        FftAnalyser::with_options(44100.0, 1000, 0.8, -100.0, -30.0);
    }

    #[test]
    fn smallest_fft_streams_without_underflow() {
        let mut analyser = FftAnalyser::new(44100.0, 2);
        analyser.push_samples(&[0.5, -0.5, 0.25]);
        let mut bytes = vec![0u8; analyser.bin_count()];
        analyser.frequency_bytes(&mut bytes);
        assert_eq!(bytes.len(), 1);
    }

    #[test]
    fn not_ready_before_first_push() {
        let mut analyser = FftAnalyser::new(44100.0, 2048);
        assert!(!analyser.is_ready());
        analyser.push_samples(&[0.0; 16]);
        assert!(analyser.is_ready());
        analyser.reset();
        assert!(!analyser.is_ready());
    }

    #[test]
    fn sine_peaks_in_its_bin() {
        let mut analyser = FftAnalyser::with_options(44100.0, 2048, 0.0, -100.0, -30.0);
        // Bin 40 of 1024 at 44.1 kHz is ~861 Hz.
        let freq = 40.0 * 22050.0 / 1024.0;
        analyser.push_samples(&sine(freq, 44100.0, 2048, 0.5));

        let mut bytes = vec![0u8; analyser.bin_count()];
        analyser.frequency_bytes(&mut bytes);
        let (peak, _) = bytes
            .iter()
            .enumerate()
            .max_by_key(|(_, &b)| b)
            .unwrap();
        assert!((39..=41).contains(&peak), "peak at bin {}", peak);
        assert_eq!(bytes[peak], 255);
        assert!(bytes[800] < 100);
    }

    #[test]
    fn silence_maps_to_zero_bytes() {
        let mut analyser = FftAnalyser::new(44100.0, 1024);
        analyser.push_samples(&vec![0.0; 1024]);
        let mut bytes = vec![7u8; analyser.bin_count()];
        analyser.frequency_bytes(&mut bytes);
        assert!(bytes.iter().all(|&b| b == 0));

        let mut wave = vec![0u8; analyser.bin_count()];
        analyser.time_domain_bytes(&mut wave);
        assert!(wave.iter().all(|&b| b == 128));
    }

    #[test]
    fn time_domain_uses_latest_samples() {
        let mut analyser = FftAnalyser::new(44100.0, 64);
        analyser.push_samples(&vec![-1.0; 64]);
        analyser.push_samples(&vec![0.5; 32]);
        let mut wave = vec![0u8; analyser.bin_count()];
        analyser.time_domain_bytes(&mut wave);
        assert!(wave.iter().all(|&b| b == 192));
    }

    #[test]
    fn smoothing_carries_energy_forward() {
        let mut analyser = FftAnalyser::with_options(44100.0, 1024, 0.8, -100.0, -30.0);
        analyser.push_samples(&sine(1000.0, 44100.0, 1024, 0.5));
        let mut loud = vec![0u8; 512];
        analyser.frequency_bytes(&mut loud);

        analyser.push_samples(&vec![0.0; 1024]);
        let mut after = vec![0u8; 512];
        analyser.frequency_bytes(&mut after);
        let peak = loud.iter().enumerate().max_by_key(|(_, &b)| b).map(|(i, _)| i).unwrap();
        assert!(after[peak] > 0);
        assert!(after[peak] <= loud[peak]);
    }
}
