//! Audio decoding and the style feature pipeline.

pub mod decode;
pub mod features;
pub mod resample;
pub mod spectral;

pub use decode::{decode_audio, SampleBuffer};
pub use features::{extract_frames, FeatureConfig, FeatureFrame, FrameCutter};
pub use spectral::{MelSpectrum, SpectralTransform};
