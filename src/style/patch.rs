use crate::audio::features::FeatureFrame;

/// `frames` consecutive feature frames flattened row-major into one model input.
#[derive(Clone, Debug, PartialEq)]
pub struct Patch {
    data: Vec<f32>,
    frames: usize,
    bands: usize,
}

impl Patch {
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn bands(&self) -> usize {
        self.bands
    }

    /// Tensor shape with a leading batch dimension of one.
    pub fn shape(&self) -> [usize; 3] {
        [1, self.frames, self.bands]
    }
}

/// Group frames into non-overlapping patches of exactly `patch_frames`.
///
/// A trailing group shorter than a full patch is dropped, never padded. An
/// empty result means there was not enough audio for one patch.
pub fn batch_patches(frames: &[FeatureFrame], patch_frames: usize) -> Vec<Patch> {
    if patch_frames == 0 {
        return Vec::new();
    }

    frames
        .chunks_exact(patch_frames)
        .map(|group| {
            let bands = group.first().map_or(0, FeatureFrame::len);
            let mut data = Vec::with_capacity(patch_frames * bands);
            for frame in group {
                data.extend_from_slice(frame.bands());
            }
            Patch {
                data,
                frames: patch_frames,
                bands,
            }
        })
        .collect()
}
