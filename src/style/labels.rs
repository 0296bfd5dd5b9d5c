use anyhow::{Context, Result};
use std::path::Path;

/// Class-index to name table for a style model.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Labels {
    names: Vec<String>,
}

impl Labels {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Name for a class, `class_<idx>` when the table has no entry.
    pub fn label_for(&self, index: usize) -> String {
        self.names
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", index))
    }
}

/// Load labels from a JSON string array or a newline-separated text file.
pub fn load_labels(path: &Path) -> Result<Labels> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read labels: {}", path.display()))?;
    parse_labels(&content).with_context(|| format!("Invalid labels file: {}", path.display()))
}

fn parse_labels(content: &str) -> Result<Labels> {
    if content.trim_start().starts_with('[') {
        let names: Vec<String> = serde_json::from_str(content)?;
        return Ok(Labels::new(names));
    }

    let names = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    Ok(Labels::new(names))
}
