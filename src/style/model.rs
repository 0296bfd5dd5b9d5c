//! Classification-model seam: loading a model and scoring one patch.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::patch::Patch;

/// A loaded classifier. One instance serves one analysis request.
pub trait StyleModel {
    /// Score one `[1, frames, bands]` patch; one value per class.
    fn predict(&mut self, patch: &Patch) -> Result<Vec<f32>>;
}

/// Creates models from files. Failures here are model (setup) errors, not
/// analysis errors.
pub trait ModelLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn StyleModel>>;
}

/// Loader used when nothing else is injected.
pub fn default_model_loader() -> Box<dyn ModelLoader> {
    #[cfg(feature = "onnx")]
    {
        Box::new(onnx::OnnxModelLoader::default())
    }
    #[cfg(not(feature = "onnx"))]
    {
        Box::new(UnavailableModelLoader)
    }
}

/// Stand-in loader for builds without an inference engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableModelLoader;

impl ModelLoader for UnavailableModelLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn StyleModel>> {
        anyhow::bail!(
            "cannot load {}: style classification requires the 'onnx' feature. \
             Rebuild with: cargo build --features onnx",
            path.display()
        )
    }
}

/// Resolve a `--model` value to a file.
///
/// An existing path is used as is; otherwise the name is looked up in the
/// model cache directory (`<cache>/harmonia/models`), with and without an
/// `.onnx` extension.
pub fn resolve_model_path(input: &str) -> Result<PathBuf> {
    let as_path = Path::new(input);
    if as_path.exists() {
        log::info!("Using style model from path: {}", as_path.display());
        return Ok(as_path.to_path_buf());
    }

    let cache_dir = model_cache_dir()?;
    for candidate in [cache_dir.join(input), cache_dir.join(format!("{}.onnx", input))] {
        if candidate.exists() {
            log::info!("Using cached style model '{}': {}", input, candidate.display());
            return Ok(candidate);
        }
    }

    anyhow::bail!(
        "Style model '{}' not found as a file or in {}",
        input,
        cache_dir.display()
    )
}

fn model_cache_dir() -> Result<PathBuf> {
    let base = dirs::cache_dir()
        .or_else(dirs::home_dir)
        .context("Cannot determine cache directory")?;
    Ok(base.join("harmonia").join("models"))
}

#[cfg(feature = "onnx")]
pub use onnx::{OnnxModelLoader, OnnxStyleModel};

#[cfg(feature = "onnx")]
mod onnx {
    use anyhow::{anyhow, Context, Result};
    use ndarray::Array3;
    use ort::session::Session;
    use ort::value::Tensor;
    use std::path::Path;

    use super::{ModelLoader, StyleModel};
    use crate::style::patch::Patch;

    /// Builds one ONNX Runtime session per request.
    #[derive(Debug, Clone)]
    pub struct OnnxModelLoader {
        pub intra_threads: usize,
    }

    impl Default for OnnxModelLoader {
        fn default() -> Self {
            Self { intra_threads: 1 }
        }
    }

    impl ModelLoader for OnnxModelLoader {
        fn load(&self, path: &Path) -> Result<Box<dyn StyleModel>> {
            anyhow::ensure!(path.exists(), "model not found: {}", path.display());

            log::info!("Loading ONNX model: {}", path.display());
            let session = Session::builder()
                .map_err(|e| anyhow!("failed to create session builder: {}", e))?
                .with_intra_threads(self.intra_threads)
                .map_err(|e| anyhow!("failed to configure session: {}", e))?
                .commit_from_file(path)
                .map_err(|e| anyhow!("failed to load {}: {}", path.display(), e))?;

            Ok(Box::new(OnnxStyleModel { session }))
        }
    }

    pub struct OnnxStyleModel {
        session: Session,
    }

    impl StyleModel for OnnxStyleModel {
        fn predict(&mut self, patch: &Patch) -> Result<Vec<f32>> {
            let [batch, frames, bands] = patch.shape();
            let input = Array3::from_shape_vec((batch, frames, bands), patch.data().to_vec())
                .context("patch does not match its declared shape")?;

            let tensor = Tensor::from_array(input).map_err(|e| anyhow!("tensor creation error: {}", e))?;

            // Single-input model: bind positionally, read the first output
            let outputs = self
                .session
                .run(ort::inputs![tensor])
                .map_err(|e| anyhow!("inference error: {}", e))?;

            let (_, value) = outputs.iter().next().ok_or_else(|| anyhow!("model produced no output"))?;
            let (_shape, scores) = value
                .try_extract_tensor::<f32>()
                .map_err(|e| anyhow!("output extraction error: {}", e))?;

            Ok(scores.to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_path_resolves_to_itself() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let input = file.path().to_str().unwrap();
        assert_eq!(resolve_model_path(input).unwrap(), file.path());
    }

    #[test]
    fn unknown_model_is_an_error() {
        assert!(resolve_model_path("no-such-model-xyz-123").is_err());
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn default_loader_reports_missing_engine() {
        let err = default_model_loader().load(Path::new("model.onnx")).err().unwrap();
        assert!(err.to_string().contains("onnx"));
    }
}
