//! Analysis façade: sequences decode, the rhythm/key collaborators and the
//! style pipeline, and maps every failure into the closed error taxonomy.

use anyhow::Result as AnyResult;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::analysis::key::{ChromaKeyExtractor, Key, KeyExtractor};
use crate::analysis::rhythm::{RhythmExtractor, SpectralFluxRhythm};
use crate::audio::decode::{decode_audio, SampleBuffer};
use crate::audio::features::{extract_frames, FeatureConfig};
use crate::audio::spectral::{MelSpectrum, SpectralTransform};
use crate::cancel::CancellationToken;
use crate::error::{AnalysisError, Result};
use crate::style::aggregate::{classify, ClassScore};
use crate::style::model::{default_model_loader, ModelLoader, StyleModel};
use crate::style::patch::batch_patches;

/// Deployment-level analysis parameters, fixed for a runtime's lifetime.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisSettings {
    /// Decode rate for tempo and key analysis (Hz)
    pub rhythm_sample_rate: u32,
    /// Number of ranked classes in a style report
    pub top_k: usize,
    pub features: FeatureConfig,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            rhythm_sample_rate: 44100,
            top_k: 5,
            features: FeatureConfig::default(),
        }
    }
}

impl AnalysisSettings {
    pub fn validate(&self) -> AnyResult<()> {
        anyhow::ensure!(self.rhythm_sample_rate > 0, "analysis.rhythm_sample_rate must be positive");
        anyhow::ensure!(self.top_k > 0, "analysis.top_k must be positive");
        self.features.validate()?;
        anyhow::ensure!(
            self.top_k <= self.features.num_classes,
            "analysis.top_k ({}) exceeds features.num_classes ({})",
            self.top_k,
            self.features.num_classes
        );
        Ok(())
    }
}

/// Hands each request its own collaborator instances.
///
/// Collaborators are not shared between requests, so implementations need not
/// be thread-safe themselves; only the factory is.
pub trait CollaboratorFactory: Send + Sync {
    fn rhythm(&self) -> Box<dyn RhythmExtractor>;
    fn key(&self) -> Box<dyn KeyExtractor>;
    fn spectral(&self, config: &FeatureConfig) -> Box<dyn SpectralTransform>;
    fn load_model(&self, path: &Path) -> AnyResult<Box<dyn StyleModel>>;
}

/// The in-crate DSP implementations plus a model loader.
pub struct DefaultCollaborators {
    loader: Box<dyn ModelLoader>,
}

impl DefaultCollaborators {
    pub fn with_loader(loader: Box<dyn ModelLoader>) -> Self {
        Self { loader }
    }
}

impl Default for DefaultCollaborators {
    fn default() -> Self {
        Self::with_loader(default_model_loader())
    }
}

impl CollaboratorFactory for DefaultCollaborators {
    fn rhythm(&self) -> Box<dyn RhythmExtractor> {
        Box::new(SpectralFluxRhythm::default())
    }

    fn key(&self) -> Box<dyn KeyExtractor> {
        Box::new(ChromaKeyExtractor)
    }

    fn spectral(&self, config: &FeatureConfig) -> Box<dyn SpectralTransform> {
        Box::new(MelSpectrum::new(config.frame_size, config.num_bands, config.sample_rate))
    }

    fn load_model(&self, path: &Path) -> AnyResult<Box<dyn StyleModel>> {
        self.loader.load(path)
    }
}

/// Tempo and key for one file.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RhythmKeyReport {
    pub bpm: f32,
    pub bpm_confidence: f32,
    pub key: Key,
    pub key_confidence: f32,
}

/// Ranked style classes for one file, best first.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StyleReport {
    pub classes: Vec<ClassScore>,
}

/// Process-scoped analysis state.
///
/// Build it once before any analysis and shut it down after the last one
/// finishes. Requests go through [`Analyzer`]s handed out by the runtime.
#[derive(Clone)]
pub struct Runtime {
    settings: Arc<AnalysisSettings>,
    collaborators: Arc<dyn CollaboratorFactory>,
}

impl Runtime {
    pub fn init(settings: AnalysisSettings) -> AnyResult<Self> {
        Self::with_collaborators(settings, Arc::new(DefaultCollaborators::default()))
    }

    pub fn with_collaborators(
        settings: AnalysisSettings,
        collaborators: Arc<dyn CollaboratorFactory>,
    ) -> AnyResult<Self> {
        settings.validate()?;
        log::info!(
            "Analysis runtime ready: rhythm @ {} Hz, style @ {} Hz ({} bands, {} frames/patch, top {})",
            settings.rhythm_sample_rate,
            settings.features.sample_rate,
            settings.features.num_bands,
            settings.features.patch_frames,
            settings.top_k
        );
        Ok(Self {
            settings: Arc::new(settings),
            collaborators,
        })
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    pub fn analyzer(&self) -> Analyzer {
        Analyzer {
            settings: Arc::clone(&self.settings),
            collaborators: Arc::clone(&self.collaborators),
        }
    }

    /// Release the runtime. Callers must not have analyses in flight.
    pub fn shutdown(self) {
        log::info!("Analysis runtime shut down");
    }
}

/// Runs analysis requests against a runtime's settings and collaborators.
///
/// Cheap to clone and `Send`, so each worker thread can own one.
#[derive(Clone)]
pub struct Analyzer {
    settings: Arc<AnalysisSettings>,
    collaborators: Arc<dyn CollaboratorFactory>,
}

impl Analyzer {
    /// Decode at the rhythm rate, then extract tempo and key.
    ///
    /// Cancellation is checked between every step; an observed cancel or any
    /// failure discards everything computed so far.
    pub fn analyze_rhythm_and_key(&self, path: &Path, token: &CancellationToken) -> Result<RhythmKeyReport> {
        let result = self.rhythm_and_key(path, token);
        log_failure("rhythm/key", path, &result);
        result
    }

    /// Decode at the style rate, extract features, batch patches and classify
    /// them with the model at `model_path`.
    pub fn analyze_style(&self, path: &Path, model_path: &Path, token: &CancellationToken) -> Result<StyleReport> {
        let result = self.style(path, model_path, token);
        log_failure("style", path, &result);
        result
    }

    fn rhythm_and_key(&self, path: &Path, token: &CancellationToken) -> Result<RhythmKeyReport> {
        let buffer = decode_nonempty(path, self.settings.rhythm_sample_rate, token)?;
        token.check()?;

        let rhythm = self
            .collaborators
            .rhythm()
            .extract(buffer.samples(), buffer.sample_rate())
            .map_err(|e| AnalysisError::analysis("rhythm extraction failed", e))?;
        token.check()?;

        let key = self
            .collaborators
            .key()
            .extract(buffer.samples(), buffer.sample_rate())
            .map_err(|e| AnalysisError::analysis("key extraction failed", e))?;
        token.check()?;

        let report = RhythmKeyReport {
            bpm: rhythm.bpm,
            bpm_confidence: rhythm.confidence,
            key: Key::from_names(&key.key, &key.scale),
            key_confidence: key.strength,
        };
        log::info!(
            "{}: {:.1} BPM ({:.2}), key {} ({:.2})",
            path.display(),
            report.bpm,
            report.bpm_confidence,
            report.key.name(),
            report.key_confidence
        );
        Ok(report)
    }

    fn style(&self, path: &Path, model_path: &Path, token: &CancellationToken) -> Result<StyleReport> {
        let features = &self.settings.features;

        let buffer = decode_nonempty(path, features.sample_rate, token)?;
        token.check()?;

        let mut spectral = self.collaborators.spectral(features);
        let frames = extract_frames(&buffer, features, spectral.as_mut(), token)?;
        drop(buffer);

        let patches = batch_patches(&frames, features.patch_frames);
        if patches.is_empty() {
            return Err(AnalysisError::Analysis(format!(
                "not enough audio for one patch: {} frames, need {}",
                frames.len(),
                features.patch_frames
            )));
        }
        token.check()?;

        let mut model = self
            .collaborators
            .load_model(model_path)
            .map_err(|e| AnalysisError::model("model setup failed", e))?;

        let classes = classify(&patches, model.as_mut(), features.num_classes, self.settings.top_k, token)?;
        log::info!(
            "{}: {} patches classified, top class {:?}",
            path.display(),
            patches.len(),
            classes.first().map(|c| c.index)
        );
        Ok(StyleReport { classes })
    }
}

/// Decode, treating an empty buffer as a decode failure.
fn decode_nonempty(path: &Path, rate: u32, token: &CancellationToken) -> Result<SampleBuffer> {
    let buffer = decode_audio(path, rate, token)?;
    if buffer.is_empty() {
        return Err(AnalysisError::Decode(format!(
            "{} decoded to no samples",
            path.display()
        )));
    }
    Ok(buffer)
}

fn log_failure<T>(stage: &str, path: &Path, result: &Result<T>) {
    match result {
        Err(AnalysisError::Cancelled) => log::info!("{} analysis of {} cancelled", stage, path.display()),
        Err(e) => log::error!(
            "{} analysis of {} failed (code {}): {}",
            stage,
            path.display(),
            e.code().as_i32(),
            e
        ),
        Ok(_) => {}
    }
}
