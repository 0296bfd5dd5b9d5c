use serde::{Deserialize, Serialize};

use super::decode::SampleBuffer;
use super::spectral::SpectralTransform;
use crate::cancel::CancellationToken;
use crate::error::{AnalysisError, Result};

/// Deployment-wide shape of the style feature pipeline.
///
/// Fixed for the lifetime of a runtime; nothing here varies per call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Rate the audio is decoded at for style analysis (Hz)
    pub sample_rate: u32,
    pub frame_size: usize,
    pub hop_size: usize,
    pub num_bands: usize,
    /// Consecutive frames per model input patch
    pub patch_frames: usize,
    /// Length of the model's score vector
    pub num_classes: usize,
    /// Log compression is `log10(log_shift + log_scale * x)`
    pub log_shift: f32,
    pub log_scale: f32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_size: 512,
            hop_size: 256,
            num_bands: 96,
            patch_frames: 128,
            num_classes: 400,
            log_shift: 1.0,
            log_scale: 10000.0,
        }
    }
}

impl FeatureConfig {
    /// Number of frames the cutter yields for `len` samples.
    pub fn frame_count(&self, len: usize) -> usize {
        if len < self.frame_size || self.hop_size == 0 {
            0
        } else {
            (len - self.frame_size) / self.hop_size + 1
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.sample_rate > 0, "features.sample_rate must be positive");
        anyhow::ensure!(self.frame_size >= 2, "features.frame_size must be at least 2");
        anyhow::ensure!(self.hop_size > 0, "features.hop_size must be positive");
        anyhow::ensure!(self.num_bands > 0, "features.num_bands must be positive");
        anyhow::ensure!(self.patch_frames > 0, "features.patch_frames must be positive");
        anyhow::ensure!(self.num_classes > 0, "features.num_classes must be positive");
        anyhow::ensure!(self.log_shift > 0.0, "features.log_shift must be positive");
        anyhow::ensure!(self.log_scale > 0.0, "features.log_scale must be positive");
        Ok(())
    }
}

/// Log-compressed mel energies for one hop position.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureFrame {
    bands: Vec<f32>,
}

impl FeatureFrame {
    pub fn new(bands: Vec<f32>) -> Self {
        Self { bands }
    }

    pub fn bands(&self) -> &[f32] {
        &self.bands
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }
}

/// Slices a signal into overlapping fixed-size frames.
///
/// Frames start at sample 0 and advance by `hop`; iteration ends at the first
/// position where a full frame no longer fits.
pub struct FrameCutter<'a> {
    signal: &'a [f32],
    frame_size: usize,
    hop: usize,
    pos: usize,
}

impl<'a> FrameCutter<'a> {
    pub fn new(signal: &'a [f32], frame_size: usize, hop: usize) -> Self {
        Self {
            signal,
            frame_size,
            hop,
            pos: 0,
        }
    }
}

impl<'a> Iterator for FrameCutter<'a> {
    type Item = &'a [f32];

    fn next(&mut self) -> Option<Self::Item> {
        if self.hop == 0 || self.frame_size == 0 {
            return None;
        }
        let end = self.pos.checked_add(self.frame_size)?;
        if end > self.signal.len() {
            return None;
        }
        let frame = &self.signal[self.pos..end];
        self.pos += self.hop;
        Some(frame)
    }
}

/// Turn a decoded buffer into the full sequence of log-mel frames.
///
/// Checks cancellation before every frame. A failing spectral step is an
/// analysis error. The result cannot be resumed; recompute from the buffer.
pub fn extract_frames(
    buffer: &SampleBuffer,
    config: &FeatureConfig,
    transform: &mut dyn SpectralTransform,
    token: &CancellationToken,
) -> Result<Vec<FeatureFrame>> {
    let expected = config.frame_count(buffer.len());
    let mut frames = Vec::with_capacity(expected);

    for (index, frame) in FrameCutter::new(buffer.samples(), config.frame_size, config.hop_size).enumerate() {
        token.check()?;

        let mut bands = transform
            .mel_bands(frame)
            .map_err(|e| AnalysisError::analysis(&format!("mel bands for frame {}", index), e))?;

        if bands.len() != config.num_bands {
            return Err(AnalysisError::Analysis(format!(
                "frame {} produced {} bands, expected {}",
                index,
                bands.len(),
                config.num_bands
            )));
        }

        for b in bands.iter_mut() {
            *b = (config.log_shift + config.log_scale * b.max(0.0)).log10();
        }
        frames.push(FeatureFrame::new(bands));
    }

    log::debug!(
        "Extracted {} feature frames ({} bands) from {} samples",
        frames.len(),
        config.num_bands,
        buffer.len()
    );

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns a constant energy per band and counts calls.
    struct ConstBands {
        bands: usize,
        value: f32,
        calls: usize,
        fail_at: Option<usize>,
    }

    impl SpectralTransform for ConstBands {
        fn mel_bands(&mut self, _frame: &[f32]) -> anyhow::Result<Vec<f32>> {
            if Some(self.calls) == self.fail_at {
                anyhow::bail!("filterbank exploded");
            }
            self.calls += 1;
            Ok(vec![self.value; self.bands])
        }
    }

    fn config() -> FeatureConfig {
        FeatureConfig {
            frame_size: 8,
            hop_size: 4,
            num_bands: 3,
            ..FeatureConfig::default()
        }
    }

    fn transform(value: f32) -> ConstBands {
        ConstBands { bands: 3, value, calls: 0, fail_at: None }
    }

    #[test]
    fn cutter_yields_expected_positions() {
        let signal: Vec<f32> = (0..20).map(|i| i as f32).collect();
        let frames: Vec<&[f32]> = FrameCutter::new(&signal, 8, 4).collect();
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0][0], 0.0);
        assert_eq!(frames[1][0], 4.0);
        assert_eq!(frames[3][7], 19.0);
    }

    #[test]
    fn frame_count_matches_formula() {
        let cfg = config();
        for len in [0usize, 7, 8, 11, 12, 100, 101] {
            let buffer = SampleBuffer::from_samples(vec![0.0; len], 16000);
            let mut t = transform(0.0);
            let frames = extract_frames(&buffer, &cfg, &mut t, &CancellationToken::new()).unwrap();
            let expected = if len >= 8 { (len - 8) / 4 + 1 } else { 0 };
            assert_eq!(frames.len(), expected, "len {}", len);
            assert_eq!(cfg.frame_count(len), expected);
        }
    }

    #[test]
    fn silence_compresses_to_zero() {
        let buffer = SampleBuffer::from_samples(vec![0.0; 8], 16000);
        let mut t = transform(0.0);
        let frames = extract_frames(&buffer, &config(), &mut t, &CancellationToken::new()).unwrap();
        assert_eq!(frames[0].bands(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn applies_log_compression() {
        let buffer = SampleBuffer::from_samples(vec![0.0; 8], 16000);
        let mut t = transform(0.0999);
        let frames = extract_frames(&buffer, &config(), &mut t, &CancellationToken::new()).unwrap();
        // log10(1 + 10000 * 0.0999) = log10(1000)
        assert!((frames[0].bands()[0] - 3.0).abs() < 1e-4);
    }

    #[test]
    fn non_positive_log_scale_is_rejected() {
        assert!(FeatureConfig::default().validate().is_ok());
        for log_scale in [0.0, -10000.0] {
            let cfg = FeatureConfig { log_scale, ..FeatureConfig::default() };
            assert!(cfg.validate().is_err(), "log_scale {}", log_scale);
        }
    }

    #[test]
    fn cancelled_before_first_frame() {
        let buffer = SampleBuffer::from_samples(vec![0.0; 64], 16000);
        let token = CancellationToken::new();
        token.cancel();
        let mut t = transform(1.0);
        let err = extract_frames(&buffer, &config(), &mut t, &token).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(t.calls, 0);
    }

    #[test]
    fn transform_failure_is_analysis_error() {
        let buffer = SampleBuffer::from_samples(vec![0.0; 64], 16000);
        let mut t = ConstBands { bands: 3, value: 1.0, calls: 0, fail_at: Some(2) };
        let err = extract_frames(&buffer, &config(), &mut t, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, AnalysisError::Analysis(_)));
    }

    #[test]
    fn wrong_band_count_is_analysis_error() {
        let buffer = SampleBuffer::from_samples(vec![0.0; 64], 16000);
        let mut t = ConstBands { bands: 5, value: 1.0, calls: 0, fail_at: None };
        let err = extract_frames(&buffer, &config(), &mut t, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, AnalysisError::Analysis(_)));
    }
}
