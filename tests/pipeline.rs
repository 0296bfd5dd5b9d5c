//! End-to-end tests for both analysis entry points with injected collaborators

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use harmonia::analysis::{KeyEstimate, KeyExtractor, RhythmEstimate, RhythmExtractor};
use harmonia::audio::SpectralTransform;
use harmonia::ffi::{HarmoniaAnalysisResult, HarmoniaStyleResult};
use harmonia::style::{Patch, StyleModel};
use harmonia::{
    AnalysisError, AnalysisSettings, CancellationToken, CollaboratorFactory, ErrorCode, FeatureConfig, Runtime,
};

const RATE: u32 = 16000;
const NUM_CLASSES: usize = 10;

#[derive(Default)]
struct Counters {
    rhythm: AtomicUsize,
    key: AtomicUsize,
    spectral_frames: AtomicUsize,
    model_loads: AtomicUsize,
    predictions: AtomicUsize,
}

#[derive(Clone, Copy, PartialEq)]
enum ModelBehavior {
    /// Score of class i is i
    Ascending,
    FailToLoad,
    WrongLength,
    /// Cancels the request's token during the first prediction
    CancelOnFirst,
}

struct FakeFactory {
    counters: Arc<Counters>,
    behavior: ModelBehavior,
    cancel_on_predict: Option<CancellationToken>,
}

struct FakeRhythm(Arc<Counters>);
struct FakeKey(Arc<Counters>);
struct FakeSpectral(Arc<Counters>, usize);
struct FakeModel {
    counters: Arc<Counters>,
    behavior: ModelBehavior,
    cancel: Option<CancellationToken>,
}

impl RhythmExtractor for FakeRhythm {
    fn extract(&mut self, _signal: &[f32], _sample_rate: u32) -> anyhow::Result<RhythmEstimate> {
        self.0.rhythm.fetch_add(1, Ordering::SeqCst);
        Ok(RhythmEstimate {
            bpm: 120.0,
            confidence: 0.8,
            ticks: vec![0.0, 0.5, 1.0],
        })
    }
}

impl KeyExtractor for FakeKey {
    fn extract(&mut self, _signal: &[f32], _sample_rate: u32) -> anyhow::Result<KeyEstimate> {
        self.0.key.fetch_add(1, Ordering::SeqCst);
        Ok(KeyEstimate {
            key: "Db".to_string(),
            scale: "minor".to_string(),
            strength: 0.6,
        })
    }
}

impl SpectralTransform for FakeSpectral {
    fn mel_bands(&mut self, _frame: &[f32]) -> anyhow::Result<Vec<f32>> {
        self.0.spectral_frames.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0.5; self.1])
    }
}

impl StyleModel for FakeModel {
    fn predict(&mut self, patch: &Patch) -> anyhow::Result<Vec<f32>> {
        assert_eq!(patch.shape(), [1, 16, 8]);
        let calls = self.counters.predictions.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            ModelBehavior::WrongLength => Ok(vec![1.0; NUM_CLASSES - 1]),
            ModelBehavior::CancelOnFirst if calls == 0 => {
                if let Some(ref token) = self.cancel {
                    token.cancel();
                }
                Ok((0..NUM_CLASSES).map(|i| i as f32).collect())
            }
            _ => Ok((0..NUM_CLASSES).map(|i| i as f32).collect()),
        }
    }
}

impl CollaboratorFactory for FakeFactory {
    fn rhythm(&self) -> Box<dyn RhythmExtractor> {
        Box::new(FakeRhythm(Arc::clone(&self.counters)))
    }

    fn key(&self) -> Box<dyn KeyExtractor> {
        Box::new(FakeKey(Arc::clone(&self.counters)))
    }

    fn spectral(&self, config: &FeatureConfig) -> Box<dyn SpectralTransform> {
        Box::new(FakeSpectral(Arc::clone(&self.counters), config.num_bands))
    }

    fn load_model(&self, path: &Path) -> anyhow::Result<Box<dyn StyleModel>> {
        self.counters.model_loads.fetch_add(1, Ordering::SeqCst);
        if self.behavior == ModelBehavior::FailToLoad {
            anyhow::bail!("cannot create session for {}", path.display());
        }
        Ok(Box::new(FakeModel {
            counters: Arc::clone(&self.counters),
            behavior: self.behavior,
            cancel: self.cancel_on_predict.clone(),
        }))
    }
}

fn settings() -> AnalysisSettings {
    AnalysisSettings {
        rhythm_sample_rate: RATE,
        top_k: 5,
        features: FeatureConfig {
            sample_rate: RATE,
            frame_size: 512,
            hop_size: 256,
            num_bands: 8,
            patch_frames: 16,
            num_classes: NUM_CLASSES,
            ..FeatureConfig::default()
        },
    }
}

fn runtime(behavior: ModelBehavior, cancel_on_predict: Option<CancellationToken>) -> (Runtime, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let factory = FakeFactory {
        counters: Arc::clone(&counters),
        behavior,
        cancel_on_predict,
    };
    let runtime = Runtime::with_collaborators(settings(), Arc::new(factory)).unwrap();
    (runtime, counters)
}

/// Mono 16-bit sine at `rate`.
fn write_wav(dir: &Path, name: &str, samples: usize, rate: u32) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..samples {
        let t = i as f32 / rate as f32;
        let s = (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5;
        writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
    path
}

fn model_path() -> PathBuf {
    PathBuf::from("fake-model.onnx")
}

#[test]
fn rhythm_and_key_happy_path() {
    let dir = tempfile::tempdir().unwrap();
    let wav = write_wav(dir.path(), "tone.wav", RATE as usize, RATE);
    let (runtime, counters) = runtime(ModelBehavior::Ascending, None);

    let report = runtime
        .analyzer()
        .analyze_rhythm_and_key(&wav, &CancellationToken::new())
        .unwrap();

    assert_eq!(report.bpm, 120.0);
    assert_eq!(report.key.note_index(), 1);
    assert_eq!(report.key.scale.as_i8(), 1);
    assert_eq!(counters.rhythm.load(Ordering::SeqCst), 1);
    assert_eq!(counters.key.load(Ordering::SeqCst), 1);

    let flat = HarmoniaAnalysisResult::from(Ok(report));
    assert_eq!(flat.error_code, 0);
    assert!((flat.key_confidence - 0.6).abs() < 1e-6);
}

#[test]
fn style_ranks_top_five_over_all_patches() {
    let dir = tempfile::tempdir().unwrap();
    // 16000 samples: 61 frames, 3 full patches, 13 leftover frames
    let wav = write_wav(dir.path(), "tone.wav", RATE as usize, RATE);
    let (runtime, counters) = runtime(ModelBehavior::Ascending, None);

    let report = runtime
        .analyzer()
        .analyze_style(&wav, &model_path(), &CancellationToken::new())
        .unwrap();

    assert_eq!(counters.spectral_frames.load(Ordering::SeqCst), 61);
    assert_eq!(counters.predictions.load(Ordering::SeqCst), 3);
    let indices: Vec<usize> = report.classes.iter().map(|c| c.index).collect();
    assert_eq!(indices, vec![9, 8, 7, 6, 5]);

    let flat = HarmoniaStyleResult::from(Ok(report));
    assert_eq!(flat.count, 5);
    assert_eq!(flat.error_code, 0);
    assert!(flat.confidences.windows(2).all(|w| w[0] > w[1]));
}

#[test]
fn pre_cancelled_token_touches_no_collaborator() {
    let dir = tempfile::tempdir().unwrap();
    let wav = write_wav(dir.path(), "tone.wav", RATE as usize, RATE);
    let (runtime, counters) = runtime(ModelBehavior::Ascending, None);
    let analyzer = runtime.analyzer();

    let token = CancellationToken::new();
    token.cancel();

    let rk = analyzer.analyze_rhythm_and_key(&wav, &token);
    let style = analyzer.analyze_style(&wav, &model_path(), &token);
    assert!(matches!(rk, Err(AnalysisError::Cancelled)));
    assert!(matches!(style, Err(AnalysisError::Cancelled)));
    assert_eq!(HarmoniaAnalysisResult::from(rk).error_code, 1);
    assert_eq!(HarmoniaStyleResult::from(style).error_code, 1);

    assert_eq!(counters.rhythm.load(Ordering::SeqCst), 0);
    assert_eq!(counters.key.load(Ordering::SeqCst), 0);
    assert_eq!(counters.spectral_frames.load(Ordering::SeqCst), 0);
    assert_eq!(counters.model_loads.load(Ordering::SeqCst), 0);
}

#[test]
fn cancel_during_inference_discards_scores() {
    let dir = tempfile::tempdir().unwrap();
    let wav = write_wav(dir.path(), "tone.wav", RATE as usize, RATE);
    let token = CancellationToken::new();
    let (runtime, counters) = runtime(ModelBehavior::CancelOnFirst, Some(token.clone()));

    let err = runtime
        .analyzer()
        .analyze_style(&wav, &model_path(), &token)
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(counters.predictions.load(Ordering::SeqCst), 1);
}

#[test]
fn non_audio_file_is_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.wav");
    std::fs::write(&path, b"these are not the samples you are looking for").unwrap();
    let (runtime, counters) = runtime(ModelBehavior::Ascending, None);
    let analyzer = runtime.analyzer();

    let rk = analyzer.analyze_rhythm_and_key(&path, &CancellationToken::new());
    let style = analyzer.analyze_style(&path, &model_path(), &CancellationToken::new());
    assert_eq!(HarmoniaAnalysisResult::from(rk).error_code, ErrorCode::Decode.as_i32());
    assert_eq!(HarmoniaStyleResult::from(style).error_code, ErrorCode::Decode.as_i32());
    assert_eq!(counters.rhythm.load(Ordering::SeqCst), 0);
}

#[test]
fn empty_wav_is_decode_error() {
    let dir = tempfile::tempdir().unwrap();
    let wav = write_wav(dir.path(), "empty.wav", 0, RATE);
    let (runtime, _) = runtime(ModelBehavior::Ascending, None);

    let err = runtime
        .analyzer()
        .analyze_rhythm_and_key(&wav, &CancellationToken::new())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Decode);
}

#[test]
fn too_short_for_a_patch_is_analysis_error() {
    let dir = tempfile::tempdir().unwrap();
    // Shorter than one frame: zero frames, zero patches
    let wav = write_wav(dir.path(), "blip.wav", 320, RATE);
    let (runtime, counters) = runtime(ModelBehavior::Ascending, None);

    let err = runtime
        .analyzer()
        .analyze_style(&wav, &model_path(), &CancellationToken::new())
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::Analysis);
    assert_eq!(counters.spectral_frames.load(Ordering::SeqCst), 0);
    assert_eq!(counters.model_loads.load(Ordering::SeqCst), 0);
}

#[test]
fn model_load_failure_is_model_error() {
    let dir = tempfile::tempdir().unwrap();
    let wav = write_wav(dir.path(), "tone.wav", RATE as usize, RATE);
    let (runtime, counters) = runtime(ModelBehavior::FailToLoad, None);

    let result = runtime
        .analyzer()
        .analyze_style(&wav, &model_path(), &CancellationToken::new());

    assert_eq!(HarmoniaStyleResult::from(result).error_code, 4);
    assert_eq!(counters.predictions.load(Ordering::SeqCst), 0);
}

#[test]
fn wrong_score_length_is_analysis_error() {
    let dir = tempfile::tempdir().unwrap();
    let wav = write_wav(dir.path(), "tone.wav", RATE as usize, RATE);
    let (runtime, _) = runtime(ModelBehavior::WrongLength, None);

    let err = runtime
        .analyzer()
        .analyze_style(&wav, &model_path(), &CancellationToken::new())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Analysis);
}

#[test]
fn concurrent_requests_use_independent_tokens() {
    let dir = tempfile::tempdir().unwrap();
    let wav = write_wav(dir.path(), "tone.wav", RATE as usize, RATE);
    let (runtime, counters) = runtime(ModelBehavior::Ascending, None);

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let live = CancellationToken::new();

    let handles: Vec<_> = [cancelled, live]
        .into_iter()
        .map(|token| {
            let analyzer = runtime.analyzer();
            let wav = wav.clone();
            std::thread::spawn(move || analyzer.analyze_rhythm_and_key(&wav, &token).is_ok())
        })
        .collect();
    let outcomes: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(outcomes, vec![false, true]);
    assert_eq!(counters.rhythm.load(Ordering::SeqCst), 1);
}

#[test]
fn default_collaborators_find_tempo_in_click_track() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clicks.wav");
    let rate = 22050u32;
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    let period = (0.5 * rate as f32) as usize;
    let click_len = rate as usize / 100;
    for i in 0..rate as usize * 8 {
        let phase = i % period;
        let s = if phase < click_len {
            (phase as f32 * 0.9).sin() * (1.0 - phase as f32 / click_len as f32)
        } else {
            0.0
        };
        let v = (s * 0.8 * i16::MAX as f32) as i16;
        writer.write_sample(v).unwrap();
        writer.write_sample(v).unwrap();
    }
    writer.finalize().unwrap();

    let runtime = Runtime::init(AnalysisSettings::default()).unwrap();
    let report = runtime
        .analyzer()
        .analyze_rhythm_and_key(&path, &CancellationToken::new())
        .unwrap();

    assert!((report.bpm - 120.0).abs() < 5.0, "bpm {}", report.bpm);
    runtime.shutdown();
}
