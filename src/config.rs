use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::audio::features::FeatureConfig;
use crate::orchestrator::AnalysisSettings;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub style: StyleConfig,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_rhythm_sample_rate")]
    pub rhythm_sample_rate: u32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct StyleConfig {
    /// Model file path, or a name looked up in the model cache
    #[serde(default)]
    pub model: Option<String>,
    /// Class-label table (JSON array or one label per line)
    #[serde(default)]
    pub labels: Option<PathBuf>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            rhythm_sample_rate: default_rhythm_sample_rate(),
            top_k: default_top_k(),
        }
    }
}

fn default_rhythm_sample_rate() -> u32 { 44100 }
fn default_top_k() -> usize { 5 }

impl Config {
    /// Runtime settings described by this config. Validated by the runtime.
    pub fn settings(&self) -> AnalysisSettings {
        AnalysisSettings {
            rhythm_sample_rate: self.analysis.rhythm_sample_rate,
            top_k: self.analysis.top_k,
            features: self.features.clone(),
        }
    }
}

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            log::warn!("Invalid config {}: {}", path.display(), e);
            None
        }
    }
}

/// Explicit path, or the first of `harmonia.toml`,
/// `~/.config/harmonia/config.toml` and the platform config dir that exists.
pub fn discover_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| {
        let local = PathBuf::from("harmonia.toml");
        if local.exists() {
            return Some(local);
        }
        if let Some(home) = dirs::home_dir() {
            let xdg = home.join(".config").join("harmonia").join("config.toml");
            if xdg.exists() {
                return Some(xdg);
            }
        }
        if let Some(config_dir) = dirs::config_dir() {
            let platform = config_dir.join("harmonia").join("config.toml");
            if platform.exists() {
                return Some(platform);
            }
        }
        None
    })
}
