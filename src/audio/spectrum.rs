use crate::config::BandConfig;

/// Byte value of a silent time-domain sample.
pub const BYTE_CENTER: f32 = 128.0;
/// Largest representable byte magnitude.
pub const BYTE_MAX: f32 = 255.0;

/// Source of per-tick transform data, e.g. a windowed FFT analyser.
///
/// Both arrays have the same fixed length, `bin_count()`, for the whole
/// session. Magnitudes are 0-255 from low to high frequency; time-domain
/// samples are 0-255 centered at 128.
pub trait TransformProvider {
    fn sample_rate(&self) -> f32;

    fn bin_count(&self) -> usize;

    /// False until the provider has data to transform.
    fn is_ready(&self) -> bool;

    fn frequency_bytes(&mut self, out: &mut [u8]);

    fn time_domain_bytes(&mut self, out: &mut [u8]);
}

/// One tick of spectral data plus the scalar features derived from it.
#[derive(Clone, Debug)]
pub struct SpectralFrame {
    pub frequency_magnitudes: Vec<u8>,
    pub waveform_samples: Vec<u8>,
    /// Band-average magnitudes (0.0-1.0)
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
    /// RMS of the centered waveform, nominally 0.0-1.0
    pub volume: f32,
    pub sample_rate: f32,
}

impl SpectralFrame {
    /// Frame for a provider that has nothing to report yet.
    pub fn silent(bin_count: usize, sample_rate: f32) -> Self {
        Self {
            frequency_magnitudes: vec![0; bin_count],
            waveform_samples: vec![BYTE_CENTER as u8; bin_count],
            bass: 0.0,
            mid: 0.0,
            treble: 0.0,
            volume: 0.0,
            sample_rate,
        }
    }

    /// Build a frame from raw provider arrays, deriving band levels and volume.
    pub fn from_bytes(
        frequency_magnitudes: Vec<u8>,
        waveform_samples: Vec<u8>,
        sample_rate: f32,
        bands: &BandLayout,
    ) -> Self {
        let nyquist = sample_rate / 2.0;
        let bass = band_average(&frequency_magnitudes, bands.bass, nyquist);
        let mid = band_average(&frequency_magnitudes, bands.mid, nyquist);
        let treble = band_average(&frequency_magnitudes, bands.treble, nyquist);
        let volume = centered_rms(&waveform_samples);

        Self {
            frequency_magnitudes,
            waveform_samples,
            bass,
            mid,
            treble,
            volume,
            sample_rate,
        }
    }

    pub fn bin_count(&self) -> usize {
        self.frequency_magnitudes.len()
    }

    pub fn nyquist(&self) -> f32 {
        self.sample_rate / 2.0
    }

    /// Center frequency of bin `index` in Hz.
    pub fn bin_frequency(&self, index: usize) -> f32 {
        bin_frequency(index, self.bin_count(), self.nyquist())
    }

    /// Normalized magnitudes (0.0-1.0).
    pub fn magnitudes(&self) -> impl Iterator<Item = f32> + '_ {
        self.frequency_magnitudes.iter().map(|&m| m as f32 / BYTE_MAX)
    }
}

/// Frequency ranges, in Hz, that the three bands average over.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BandLayout {
    pub bass: (f32, f32),
    pub mid: (f32, f32),
    pub treble: (f32, f32),
}

impl Default for BandLayout {
    fn default() -> Self {
        Self::from(&BandConfig::default())
    }
}

impl From<&BandConfig> for BandLayout {
    fn from(config: &BandConfig) -> Self {
        Self {
            bass: (config.bass[0], config.bass[1]),
            mid: (config.mid[0], config.mid[1]),
            treble: (config.treble[0], config.treble[1]),
        }
    }
}

pub fn bin_frequency(index: usize, bin_count: usize, nyquist: f32) -> f32 {
    if bin_count == 0 {
        return 0.0;
    }
    index as f32 * nyquist / bin_count as f32
}

/// Bin index of a frequency: `floor(freq / nyquist * N)`, clamped to `N`.
pub fn frequency_bin(freq: f32, bin_count: usize, nyquist: f32) -> usize {
    if nyquist <= 0.0 {
        return 0;
    }
    let index = (freq / nyquist * bin_count as f32).floor();
    if index <= 0.0 {
        0
    } else {
        (index as usize).min(bin_count)
    }
}

fn band_average(magnitudes: &[u8], (low_hz, high_hz): (f32, f32), nyquist: f32) -> f32 {
    let len = magnitudes.len();
    let start = frequency_bin(low_hz, len, nyquist);
    let end = frequency_bin(high_hz, len, nyquist);
    if start >= end {
        return 0.0;
    }
    let sum: u32 = magnitudes[start..end].iter().map(|&m| m as u32).sum();
    sum as f32 / (end - start) as f32 / BYTE_MAX
}

fn centered_rms(samples: &[u8]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples
        .iter()
        .map(|&s| {
            let x = (s as f32 - BYTE_CENTER) / BYTE_CENTER;
            x * x
        })
        .sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Pulls provider arrays once per tick and turns them into a `SpectralFrame`.
pub struct SpectralFrontend {
    bands: BandLayout,
}

impl SpectralFrontend {
    pub fn new(bands: BandLayout) -> Self {
        Self { bands }
    }

    pub fn bands(&self) -> &BandLayout {
        &self.bands
    }

    pub fn capture<P: TransformProvider + ?Sized>(&self, provider: &mut P) -> SpectralFrame {
        let bin_count = provider.bin_count();
        let sample_rate = provider.sample_rate();
        if !provider.is_ready() {
            return SpectralFrame::silent(bin_count, sample_rate);
        }

        let mut frequency = vec![0u8; bin_count];
        let mut waveform = vec![BYTE_CENTER as u8; bin_count];
        provider.frequency_bytes(&mut frequency);
        provider.time_domain_bytes(&mut waveform);

        SpectralFrame::from_bytes(frequency, waveform, sample_rate, &self.bands)
    }
}
