use serde::Serialize;
use std::cmp::Ordering;

use super::model::StyleModel;
use super::patch::Patch;
use crate::cancel::CancellationToken;
use crate::error::{AnalysisError, Result};

/// One ranked class: index into the model's score vector and its mean score.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ClassScore {
    pub index: usize,
    pub score: f32,
}

/// Running per-class sum over patches.
#[derive(Debug, Clone)]
pub struct ScoreAccumulator {
    sums: Vec<f64>,
    count: usize,
}

impl ScoreAccumulator {
    pub fn new(num_classes: usize) -> Self {
        Self {
            sums: vec![0.0; num_classes],
            count: 0,
        }
    }

    /// Add one patch's scores; the length must match the class count.
    pub fn add(&mut self, scores: &[f32]) -> anyhow::Result<()> {
        anyhow::ensure!(
            scores.len() == self.sums.len(),
            "expected {} class scores, model returned {}",
            self.sums.len(),
            scores.len()
        );
        for (sum, &s) in self.sums.iter_mut().zip(scores) {
            *sum += s as f64;
        }
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Per-class arithmetic mean. All zeros when nothing was added.
    pub fn mean(&self) -> Vec<f32> {
        if self.count == 0 {
            return vec![0.0; self.sums.len()];
        }
        let n = self.count as f64;
        self.sums.iter().map(|s| (s / n) as f32).collect()
    }
}

/// The `k` best classes, highest score first.
///
/// Equal scores keep ascending class order; NaN ranks below every number.
pub fn top_k(scores: &[f32], k: usize) -> Vec<ClassScore> {
    let mut ranked: Vec<ClassScore> = scores
        .iter()
        .enumerate()
        .map(|(index, &score)| ClassScore { index, score })
        .collect();

    ranked.sort_by(|a, b| rank_desc(a.score, b.score).then(a.index.cmp(&b.index)));
    ranked.truncate(k);
    ranked
}

fn rank_desc(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

/// Run the model over every patch in order, average the scores per class and
/// return the top `top_k` classes.
///
/// Cancellation is checked before each patch. A model failure or a score
/// vector of the wrong length aborts the whole request.
pub fn classify(
    patches: &[Patch],
    model: &mut dyn StyleModel,
    num_classes: usize,
    top_k_count: usize,
    token: &CancellationToken,
) -> Result<Vec<ClassScore>> {
    if patches.is_empty() {
        return Err(AnalysisError::Analysis("no patches to classify".to_string()));
    }

    let mut acc = ScoreAccumulator::new(num_classes);
    for (i, patch) in patches.iter().enumerate() {
        token.check()?;

        let scores = model
            .predict(patch)
            .map_err(|e| AnalysisError::analysis(&format!("inference failed on patch {}", i), e))?;
        acc.add(&scores)
            .map_err(|e| AnalysisError::analysis(&format!("patch {}", i), e))?;
    }

    log::debug!("Style: averaged {} patches over {} classes", acc.count(), num_classes);
    Ok(top_k(&acc.mean(), top_k_count))
}
