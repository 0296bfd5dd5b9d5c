use anyhow::{ensure, Result};
use rustfft::{num_complex::Complex, FftPlanner};
use serde::Serialize;

use crate::audio::spectral::hann_window;

const FFT_SIZE: usize = 2048;
const HOP_SIZE: usize = 512;

/// Tempo estimate for a whole signal.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RhythmEstimate {
    /// 0 when no tempo could be established
    pub bpm: f32,
    /// 0..1
    pub confidence: f32,
    /// Beat positions in seconds
    pub ticks: Vec<f32>,
}

/// Tempo extraction from a mono signal.
pub trait RhythmExtractor {
    fn extract(&mut self, signal: &[f32], sample_rate: u32) -> Result<RhythmEstimate>;
}

/// Spectral-flux onsets with an adaptive threshold, tempo from the median
/// inter-onset interval.
#[derive(Debug, Clone)]
pub struct SpectralFluxRhythm {
    pub min_bpm: f32,
    pub max_bpm: f32,
    /// Flux frames on each side averaged for the adaptive threshold
    pub onset_window: usize,
    /// An onset must exceed `local_mean * onset_ratio + onset_floor`
    pub onset_ratio: f32,
    pub onset_floor: f32,
    /// Seconds; closer onsets are merged into the earlier one
    pub min_onset_gap: f32,
}

impl Default for SpectralFluxRhythm {
    fn default() -> Self {
        Self {
            min_bpm: 60.0,
            max_bpm: 200.0,
            onset_window: 20,
            onset_ratio: 1.5,
            onset_floor: 0.01,
            min_onset_gap: 0.1,
        }
    }
}

impl RhythmExtractor for SpectralFluxRhythm {
    fn extract(&mut self, signal: &[f32], sample_rate: u32) -> Result<RhythmEstimate> {
        ensure!(sample_rate > 0, "sample rate must be positive");

        let flux = spectral_flux(signal, sample_rate);
        let ticks = self.pick_onsets(&flux);
        let (bpm, confidence) = estimate_tempo(&ticks, self.min_bpm, self.max_bpm);

        log::debug!(
            "Rhythm: {} onsets, tempo={:.1} BPM (confidence {:.2})",
            ticks.len(),
            bpm,
            confidence
        );

        Ok(RhythmEstimate {
            bpm,
            confidence,
            ticks,
        })
    }
}

/// (time, flux) per hop: summed positive magnitude change between frames.
fn spectral_flux(samples: &[f32], sample_rate: u32) -> Vec<(f32, f32)> {
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(FFT_SIZE);
    let hann = hann_window(FFT_SIZE);

    let mut prev_magnitudes = vec![0.0f32; FFT_SIZE / 2];
    let mut flux_values: Vec<(f32, f32)> = Vec::new();
    let mut buffer = vec![Complex::new(0.0f32, 0.0); FFT_SIZE];

    let mut pos = 0;
    while pos + FFT_SIZE <= samples.len() {
        for (i, slot) in buffer.iter_mut().enumerate() {
            *slot = Complex::new(samples[pos + i] * hann[i], 0.0);
        }
        fft.process(&mut buffer);

        let mut flux = 0.0f32;
        for (prev, c) in prev_magnitudes.iter_mut().zip(&buffer[..FFT_SIZE / 2]) {
            let mag = c.norm();
            flux += (mag - *prev).max(0.0);
            *prev = mag;
        }

        flux_values.push((pos as f32 / sample_rate as f32, flux));
        pos += HOP_SIZE;
    }

    flux_values
}

impl SpectralFluxRhythm {
    /// Local flux peaks above the adaptive threshold, at least
    /// `min_onset_gap` apart.
    fn pick_onsets(&self, flux: &[(f32, f32)]) -> Vec<f32> {
        // Prefix sums make each windowed mean O(1)
        let mut prefix = Vec::with_capacity(flux.len() + 1);
        prefix.push(0.0f32);
        for &(_, f) in flux {
            let last = prefix[prefix.len() - 1];
            prefix.push(last + f);
        }

        let mut onsets: Vec<f32> = Vec::new();
        for (i, &(time, value)) in flux.iter().enumerate() {
            let lo = i.saturating_sub(self.onset_window);
            let hi = (i + self.onset_window + 1).min(flux.len());
            let local_mean = (prefix[hi] - prefix[lo]) / (hi - lo) as f32;
            if value <= local_mean * self.onset_ratio + self.onset_floor {
                continue;
            }

            let rising = i == 0 || value >= flux[i - 1].1;
            let falling = i + 1 == flux.len() || value >= flux[i + 1].1;
            let spaced = onsets.last().map_or(true, |&prev| time - prev > self.min_onset_gap);
            if rising && falling && spaced {
                onsets.push(time);
            }
        }
        onsets
    }
}

/// Median-interval tempo and the share of intervals that agree with it.
fn estimate_tempo(beat_times: &[f32], min_bpm: f32, max_bpm: f32) -> (f32, f32) {
    if beat_times.len() < 2 {
        return (0.0, 0.0);
    }

    let intervals: Vec<f32> = beat_times.windows(2).map(|w| w[1] - w[0]).collect();

    let shortest = 60.0 / max_bpm;
    let longest = 60.0 / min_bpm;
    let mut reasonable: Vec<f32> = intervals
        .iter()
        .copied()
        .filter(|&i| i >= shortest && i <= longest)
        .collect();

    if reasonable.is_empty() {
        return (0.0, 0.0);
    }

    reasonable.sort_by(|a, b| a.total_cmp(b));
    let median_interval = reasonable[reasonable.len() / 2];

    let agreeing = intervals
        .iter()
        .filter(|&&i| (i - median_interval).abs() <= median_interval * 0.08)
        .count();

    (60.0 / median_interval, agreeing as f32 / intervals.len() as f32)
}
