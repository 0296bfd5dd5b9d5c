//! Windowing, magnitude spectrum and mel filterbank for one analysis frame.

use std::sync::Arc;

use anyhow::{ensure, Result};
use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Turns one fixed-size frame of samples into mel band energies.
///
/// Instances keep their own FFT plans and scratch space, so each analysis
/// request builds its own.
pub trait SpectralTransform {
    fn mel_bands(&mut self, frame: &[f32]) -> Result<Vec<f32>>;
}

/// Hann window -> |FFT| -> triangular mel filterbank (Slaney scale, unit area).
pub struct MelSpectrum {
    frame_size: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    spectrum: Vec<f32>,
    filterbank: Vec<MelFilter>,
}

/// Sparse triangular filter: weights for bins `start..start + weights.len()`.
struct MelFilter {
    start: usize,
    weights: Vec<f32>,
}

impl MelSpectrum {
    pub fn new(frame_size: usize, num_bands: usize, sample_rate: u32) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(frame_size);
        Self {
            frame_size,
            window: hann_window(frame_size),
            fft,
            buffer: vec![Complex::new(0.0, 0.0); frame_size],
            spectrum: vec![0.0; frame_size / 2 + 1],
            filterbank: mel_filterbank(num_bands, frame_size, sample_rate as f32),
        }
    }

    pub fn num_bands(&self) -> usize {
        self.filterbank.len()
    }
}

impl SpectralTransform for MelSpectrum {
    fn mel_bands(&mut self, frame: &[f32]) -> Result<Vec<f32>> {
        ensure!(
            frame.len() == self.frame_size,
            "frame has {} samples, expected {}",
            frame.len(),
            self.frame_size
        );

        for ((slot, &s), &w) in self.buffer.iter_mut().zip(frame).zip(&self.window) {
            *slot = Complex::new(s * w, 0.0);
        }
        self.fft.process(&mut self.buffer);

        for (mag, c) in self.spectrum.iter_mut().zip(&self.buffer) {
            *mag = c.norm();
        }

        Ok(self
            .filterbank
            .iter()
            .map(|f| {
                f.weights
                    .iter()
                    .zip(&self.spectrum[f.start..])
                    .map(|(w, m)| w * m)
                    .sum()
            })
            .collect())
    }
}

/// Non-normalized symmetric Hann window.
pub fn hann_window(size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
        })
        .collect()
}

fn mel_filterbank(num_bands: usize, frame_size: usize, sample_rate: f32) -> Vec<MelFilter> {
    let n_bins = frame_size / 2 + 1;
    let bin_hz = sample_rate / frame_size as f32;

    let mel_min = hz_to_mel(0.0);
    let mel_max = hz_to_mel(sample_rate / 2.0);
    let edges: Vec<f32> = (0..num_bands + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (num_bands + 1) as f32))
        .collect();

    (0..num_bands)
        .map(|band| {
            let (left, center, right) = (edges[band], edges[band + 1], edges[band + 2]);
            // Unit area: peak height 2 / base width
            let height = 2.0 / (right - left).max(f32::EPSILON);

            let start = ((left / bin_hz).ceil() as usize).min(n_bins);
            let end = ((right / bin_hz).floor() as usize + 1).min(n_bins);
            let weights = (start..end)
                .map(|bin| {
                    let hz = bin as f32 * bin_hz;
                    let w = if hz <= center {
                        (hz - left) / (center - left).max(f32::EPSILON)
                    } else {
                        (right - hz) / (right - center).max(f32::EPSILON)
                    };
                    w.max(0.0) * height
                })
                .collect();
            MelFilter { start, weights }
        })
        .collect()
}

// Slaney mel scale: linear below 1 kHz, logarithmic above.
const F_SP: f32 = 200.0 / 3.0;
const MIN_LOG_HZ: f32 = 1000.0;
const MIN_LOG_MEL: f32 = MIN_LOG_HZ / F_SP;

fn log_step() -> f32 {
    6.4f32.ln() / 27.0
}

fn hz_to_mel(hz: f32) -> f32 {
    if hz < MIN_LOG_HZ {
        hz / F_SP
    } else {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    }
}

fn mel_to_hz(mel: f32) -> f32 {
    if mel < MIN_LOG_MEL {
        mel * F_SP
    } else {
        MIN_LOG_HZ * ((mel - MIN_LOG_MEL) * log_step()).exp()
    }
}
