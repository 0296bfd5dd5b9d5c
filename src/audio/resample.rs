use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

use crate::error::{AnalysisError, Result};

/// Input frames handed to the sinc resampler per call.
const CHUNK_FRAMES: usize = 1024;

/// Upper bound on empty flush calls needed to drain the filter delay.
const MAX_FLUSH_ROUNDS: usize = 16;

/// Channel count assumed when a stream reports none.
pub const FALLBACK_CHANNELS: usize = 2;

/// Average interleaved frames down to mono and append them to `out`.
pub fn downmix_into(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    let channels = if channels == 0 { FALLBACK_CHANNELS } else { channels };
    if channels == 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    let scale = 1.0 / channels as f32;
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale),
    );
}

/// Incremental mono sample-rate converter.
///
/// Samples are pushed as they are decoded; converted samples are appended to
/// the caller's buffer only when a conversion yields a positive count. The
/// sinc filter's leading delay is dropped and the flush is capped at the
/// expected output length, so the result lines up with the input in time.
pub struct StreamResampler {
    inner: Option<SincFixedIn<f32>>,
    ratio: f64,
    pending: Vec<f32>,
    delay_remaining: usize,
    frames_in: u64,
    frames_out: u64,
}

impl StreamResampler {
    pub fn new(source_rate: u32, target_rate: u32) -> Result<Self> {
        if source_rate == 0 || target_rate == 0 {
            return Err(AnalysisError::Decode(format!(
                "cannot resample {} Hz to {} Hz",
                source_rate, target_rate
            )));
        }

        let ratio = target_rate as f64 / source_rate as f64;
        if source_rate == target_rate {
            return Ok(Self {
                inner: None,
                ratio,
                pending: Vec::new(),
                delay_remaining: 0,
                frames_in: 0,
                frames_out: 0,
            });
        }

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, CHUNK_FRAMES, 1)
            .map_err(|e| AnalysisError::Decode(format!("resampler setup failed: {}", e)))?;
        let delay_remaining = resampler.output_delay();

        log::debug!(
            "Resampler {} Hz -> {} Hz (ratio {:.4}, delay {} frames)",
            source_rate,
            target_rate,
            ratio,
            delay_remaining
        );

        Ok(Self {
            inner: Some(resampler),
            ratio,
            pending: Vec::with_capacity(CHUNK_FRAMES * 2),
            delay_remaining,
            frames_in: 0,
            frames_out: 0,
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Feed mono samples; returns how many converted samples were appended.
    pub fn push(&mut self, mono: &[f32], out: &mut Vec<f32>) -> usize {
        self.frames_in += mono.len() as u64;

        let Some(resampler) = self.inner.as_mut() else {
            out.extend_from_slice(mono);
            self.frames_out += mono.len() as u64;
            return mono.len();
        };

        self.pending.extend_from_slice(mono);
        let mut appended = 0;
        let mut consumed = 0;

        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() - consumed < needed {
                break;
            }
            let input = [&self.pending[consumed..consumed + needed]];
            consumed += needed;
            match resampler.process(&input[..], None) {
                Ok(mut channels) => {
                    let converted = channels.pop().unwrap_or_default();
                    appended += emit(
                        &converted,
                        &mut self.delay_remaining,
                        &mut self.frames_out,
                        None,
                        out,
                    );
                }
                Err(e) => log::warn!("Dropping {} frames, conversion failed: {}", needed, e),
            }
        }

        self.pending.drain(..consumed);
        appended
    }

    /// Drain whatever the resampler still buffers. Call once after the last push.
    pub fn flush(&mut self, out: &mut Vec<f32>) -> usize {
        let Some(resampler) = self.inner.as_mut() else {
            return 0;
        };

        let expected = (self.frames_in as f64 * self.ratio).round() as u64;
        let mut appended = 0;

        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            let input = [tail.as_slice()];
            match resampler.process_partial(Some(&input[..]), None) {
                Ok(mut channels) => {
                    let converted = channels.pop().unwrap_or_default();
                    appended += emit(
                        &converted,
                        &mut self.delay_remaining,
                        &mut self.frames_out,
                        Some(expected),
                        out,
                    );
                }
                Err(e) => log::warn!("Dropping {} tail frames, conversion failed: {}", tail.len(), e),
            }
        }

        let mut rounds = 0;
        while self.frames_out < expected && rounds < MAX_FLUSH_ROUNDS {
            rounds += 1;
            match resampler.process_partial::<&[f32]>(None, None) {
                Ok(mut channels) => {
                    let converted = channels.pop().unwrap_or_default();
                    if converted.is_empty() {
                        break;
                    }
                    appended += emit(
                        &converted,
                        &mut self.delay_remaining,
                        &mut self.frames_out,
                        Some(expected),
                        out,
                    );
                }
                Err(e) => {
                    log::warn!("Resampler flush failed: {}", e);
                    break;
                }
            }
        }

        appended
    }
}

/// Skip the remaining filter delay, respect the optional cap, append the rest.
fn emit(
    converted: &[f32],
    delay_remaining: &mut usize,
    frames_out: &mut u64,
    cap: Option<u64>,
    out: &mut Vec<f32>,
) -> usize {
    let skip = (*delay_remaining).min(converted.len());
    *delay_remaining -= skip;
    let mut usable = &converted[skip..];

    if let Some(cap) = cap {
        let room = cap.saturating_sub(*frames_out) as usize;
        usable = &usable[..usable.len().min(room)];
    }

    if usable.is_empty() {
        return 0;
    }
    out.extend_from_slice(usable);
    *frames_out += usable.len() as u64;
    usable.len()
}
