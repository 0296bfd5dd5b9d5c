//! # Harmonia
//!
//! Offline tempo, key and style analysis for arbitrary audio files.
//!
//! Any container/codec symphonia can read is decoded, downmixed to mono and
//! resampled, then handed either to the tempo and key extractors or to the
//! log-mel feature pipeline whose fixed-size patches feed a style classifier.
//! Every stage polls a [`CancellationToken`] and fails into one closed
//! [`AnalysisError`] taxonomy.
//!
//! ## Quick Start
//!
//! ```no_run
//! use harmonia::{AnalysisSettings, CancellationToken, Runtime};
//! use std::path::Path;
//!
//! let runtime = Runtime::init(AnalysisSettings::default())?;
//! let token = CancellationToken::new();
//!
//! let report = runtime
//!     .analyzer()
//!     .analyze_rhythm_and_key(Path::new("track.flac"), &token)?;
//! println!("{:.1} BPM, key {}", report.bpm, report.key.name());
//!
//! runtime.shutdown();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Pipeline
//!
//! ```text
//! file → decode/downmix/resample → rhythm + key
//!                                → mel frames → patches → model → top-K
//! ```
//!
//! Host applications in other languages use the C surface in [`ffi`].

pub mod analysis;
pub mod audio;
pub mod cancel;
pub mod config;
pub mod error;
pub mod ffi;
pub mod orchestrator;
pub mod style;

pub use analysis::{Key, Scale};
pub use audio::{FeatureConfig, SampleBuffer};
pub use cancel::CancellationToken;
pub use error::{AnalysisError, ErrorCode, Result};
pub use orchestrator::{
    AnalysisSettings, Analyzer, CollaboratorFactory, DefaultCollaborators, RhythmKeyReport, Runtime,
    StyleReport,
};
pub use style::{ClassScore, Labels};
