use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer as InterleavedBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::resample::{downmix_into, StreamResampler};
use crate::cancel::CancellationToken;
use crate::error::{AnalysisError, Result};

/// Mono f32 samples at a single, uniform sample rate.
///
/// Grows only while a decode is in progress; callers get it back finished and
/// can only read it.
#[derive(Clone, Debug, Default)]
pub struct SampleBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl SampleBuffer {
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Decode any supported container/codec into mono samples at `target_rate`.
///
/// Cancellation is checked before each packet is read, before each decoded
/// frame is converted, and once more before the resampler is flushed. A
/// cancelled decode discards everything decoded so far.
///
/// An `Ok` buffer may be empty; callers treat that as a decode failure.
pub fn decode_audio(path: &Path, target_rate: u32, token: &CancellationToken) -> Result<SampleBuffer> {
    token.check()?;

    let file = File::open(path).map_err(|e| {
        AnalysisError::Decode(format!("failed to open {}: {}", path.display(), e))
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AnalysisError::Decode(format!("unrecognized container: {}", e)))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AnalysisError::Decode("no audio stream found".to_string()))?;

    let track_id = track.id;
    let declared_channels = track.codec_params.channels.map_or(0, |c| c.count());
    let source_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| AnalysisError::Decode("audio stream has no sample rate".to_string()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AnalysisError::Decode(format!("unsupported codec: {}", e)))?;

    let mut resampler = StreamResampler::new(source_rate, target_rate)?;

    log::debug!(
        "Decoding {}: {} Hz, {} channel(s) -> mono {} Hz",
        path.display(),
        source_rate,
        declared_channels,
        target_rate
    );

    let mut samples: Vec<f32> = Vec::new();
    let mut mono: Vec<f32> = Vec::new();
    let mut skipped_packets = 0usize;

    loop {
        token.check()?;

        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                log::warn!("Stream reset requested in {}, stopping", path.display());
                break;
            }
            Err(e) => {
                log::warn!("Stopping at unreadable packet in {}: {}", path.display(), e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(e) => {
                skipped_packets += 1;
                log::debug!("Skipping undecodable packet: {}", e);
                continue;
            }
        };

        token.check()?;

        let spec = *decoded.spec();
        let channels = match spec.channels.count() {
            0 => declared_channels,
            n => n,
        };

        let mut interleaved = InterleavedBuffer::<f32>::new(decoded.capacity() as u64, spec);
        interleaved.copy_interleaved_ref(decoded);

        mono.clear();
        downmix_into(interleaved.samples(), channels, &mut mono);
        resampler.push(&mono, &mut samples);
    }

    token.check()?;
    resampler.flush(&mut samples);

    if skipped_packets > 0 {
        log::warn!("Skipped {} undecodable packet(s) in {}", skipped_packets, path.display());
    }

    log::info!(
        "Decoded audio: {} samples, {}Hz, {:.1}s",
        samples.len(),
        target_rate,
        samples.len() as f32 / target_rate as f32
    );

    Ok(SampleBuffer {
        samples,
        sample_rate: target_rate,
    })
}
