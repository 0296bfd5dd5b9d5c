//! Style classification: patch batching, model inference and score
//! aggregation.

pub mod aggregate;
pub mod labels;
pub mod model;
pub mod patch;

pub use aggregate::{classify, top_k, ClassScore, ScoreAccumulator};
pub use labels::{load_labels, Labels};
pub use model::{default_model_loader, resolve_model_path, ModelLoader, StyleModel, UnavailableModelLoader};
#[cfg(feature = "onnx")]
pub use model::{OnnxModelLoader, OnnxStyleModel};
pub use patch::{batch_patches, Patch};
