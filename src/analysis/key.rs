//! Key extraction and the fixed chromatic key-name mapping.

use anyhow::{ensure, Result};
use rustfft::{num_complex::Complex, FftPlanner};
use serde::Serialize;

use crate::audio::spectral::hann_window;

/// Canonical spelling per pitch class, C = 0.
pub const NOTE_NAMES: [&str; 12] = ["C", "C#", "D", "Eb", "E", "F", "F#", "G", "Ab", "A", "Bb", "B"];

/// Enharmonic spellings accepted in addition to [`NOTE_NAMES`].
const NOTE_ALIASES: [(&str, u8); 6] = [
    ("Db", 1),
    ("D#", 3),
    ("Gb", 6),
    ("G#", 8),
    ("A#", 10),
    ("Cb", 11),
];

/// Pitch class 0..=11 for a key name, or `None` when unresolved.
pub fn resolve_key_note(name: &str) -> Option<u8> {
    let name = name.trim();
    NOTE_NAMES
        .iter()
        .position(|&n| n == name)
        .map(|i| i as u8)
        .or_else(|| {
            NOTE_ALIASES
                .iter()
                .find(|(alias, _)| *alias == name)
                .map(|&(_, note)| note)
        })
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    #[default]
    Major,
    Minor,
}

impl Scale {
    /// "minor" is minor; anything else is major.
    pub fn from_name(name: &str) -> Self {
        if name == "minor" {
            Scale::Minor
        } else {
            Scale::Major
        }
    }

    pub fn as_i8(self) -> i8 {
        match self {
            Scale::Major => 0,
            Scale::Minor => 1,
        }
    }
}

/// A resolved key. `note` is `None` when the extractor's key name is unknown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Key {
    pub note: Option<u8>,
    pub scale: Scale,
}

impl Key {
    pub fn from_names(key: &str, scale: &str) -> Self {
        Self {
            note: resolve_key_note(key),
            scale: Scale::from_name(scale),
        }
    }

    /// -1 when unresolved, else 0..=11.
    pub fn note_index(&self) -> i8 {
        self.note.map_or(-1, |n| n as i8)
    }

    /// Short display name like "F#m" or "Eb"; "?" when unresolved.
    pub fn name(&self) -> String {
        match self.note {
            Some(n) => {
                let suffix = if self.scale == Scale::Minor { "m" } else { "" };
                format!("{}{}", NOTE_NAMES[n as usize], suffix)
            }
            None => "?".to_string(),
        }
    }
}

/// Raw key-extractor output, before name resolution.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeyEstimate {
    pub key: String,
    pub scale: String,
    /// 0..1
    pub strength: f32,
}

/// Key extraction from a mono signal.
pub trait KeyExtractor {
    fn extract(&mut self, signal: &[f32], sample_rate: u32) -> Result<KeyEstimate>;
}

// Krumhansl-Kessler probe-tone profiles, tonic first
const MAJOR_PROFILE: [f32; 12] = [6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88];
const MINOR_PROFILE: [f32; 12] = [6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17];

const CHROMA_FFT_SIZE: usize = 4096;
const CHROMA_HOP_SIZE: usize = 2048;
const MIN_PITCH_HZ: f32 = 55.0;
const MAX_PITCH_HZ: f32 = 5000.0;

/// Whole-signal chroma correlated against rotated major/minor key profiles.
#[derive(Debug, Default, Clone)]
pub struct ChromaKeyExtractor;

impl KeyExtractor for ChromaKeyExtractor {
    fn extract(&mut self, signal: &[f32], sample_rate: u32) -> Result<KeyEstimate> {
        ensure!(sample_rate > 0, "sample rate must be positive");

        let chroma = chromagram(signal, sample_rate);
        let energy: f32 = chroma.iter().sum();
        if energy <= 1e-9 {
            log::debug!("Key: no tonal content");
            return Ok(KeyEstimate {
                key: String::new(),
                scale: String::new(),
                strength: 0.0,
            });
        }

        let mut best = (0usize, Scale::Major, f32::MIN);
        for tonic in 0..12 {
            for (scale, profile) in [(Scale::Major, &MAJOR_PROFILE), (Scale::Minor, &MINOR_PROFILE)] {
                let rotated: Vec<f32> = (0..12).map(|pc| profile[(pc + 12 - tonic) % 12]).collect();
                let r = pearson(&chroma, &rotated);
                if r > best.2 {
                    best = (tonic, scale, r);
                }
            }
        }

        let (tonic, scale, r) = best;
        let estimate = KeyEstimate {
            key: NOTE_NAMES[tonic].to_string(),
            scale: match scale {
                Scale::Major => "major".to_string(),
                Scale::Minor => "minor".to_string(),
            },
            strength: r.clamp(0.0, 1.0),
        };
        log::debug!("Key: {} {} (r={:.3})", estimate.key, estimate.scale, r);
        Ok(estimate)
    }
}

/// Summed magnitude per pitch class over the whole signal.
fn chromagram(samples: &[f32], sample_rate: u32) -> [f32; 12] {
    let mut chroma = [0.0f32; 12];
    if samples.len() < CHROMA_FFT_SIZE {
        return chroma;
    }

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(CHROMA_FFT_SIZE);
    let hann = hann_window(CHROMA_FFT_SIZE);
    let bin_hz = sample_rate as f32 / CHROMA_FFT_SIZE as f32;

    // Pitch class per bin, precomputed; None outside the pitched range
    let bin_class: Vec<Option<usize>> = (0..CHROMA_FFT_SIZE / 2)
        .map(|bin| {
            let hz = bin as f32 * bin_hz;
            if !(MIN_PITCH_HZ..=MAX_PITCH_HZ).contains(&hz) {
                return None;
            }
            let midi = 69.0 + 12.0 * (hz / 440.0).log2();
            Some((midi.round() as i64).rem_euclid(12) as usize)
        })
        .collect();

    let mut buffer = vec![Complex::new(0.0f32, 0.0); CHROMA_FFT_SIZE];
    let mut pos = 0;
    while pos + CHROMA_FFT_SIZE <= samples.len() {
        for (i, slot) in buffer.iter_mut().enumerate() {
            *slot = Complex::new(samples[pos + i] * hann[i], 0.0);
        }
        fft.process(&mut buffer);

        for (c, class) in buffer.iter().zip(&bin_class) {
            if let Some(pc) = class {
                chroma[*pc] += c.norm_sqr();
            }
        }
        pos += CHROMA_HOP_SIZE;
    }

    chroma
}

fn pearson(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len() as f32;
    let mean_a = a.iter().sum::<f32>() / n;
    let mean_b = b.iter().sum::<f32>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    let denom = (var_a * var_b).sqrt();
    if denom <= f32::EPSILON {
        0.0
    } else {
        cov / denom
    }
}
