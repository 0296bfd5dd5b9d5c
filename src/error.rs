//! Closed failure taxonomy shared by both analysis entry points.

use serde::Serialize;

/// Numeric projection of an analysis outcome, stable across the C surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[repr(i32)]
pub enum ErrorCode {
    Success = 0,
    Cancelled = 1,
    Decode = 2,
    Analysis = 3,
    Model = 4,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Every way an analysis request can fail.
///
/// Stages map their internal failures into one of these variants and return
/// immediately; nothing is retried and no partial result travels with an error.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// Cancellation was observed at a checked boundary.
    #[error("analysis cancelled")]
    Cancelled,

    /// Container/codec open failure, missing audio stream, unsupported codec,
    /// resampler setup failure, or an empty decoded buffer.
    #[error("decode error: {0}")]
    Decode(String),

    /// A rhythm, key, feature or inference collaborator failed, or there was
    /// not enough audio for one patch.
    #[error("analysis error: {0}")]
    Analysis(String),

    /// The inference engine could not load the model or set up a session.
    #[error("model error: {0}")]
    Model(String),
}

impl AnalysisError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AnalysisError::Cancelled => ErrorCode::Cancelled,
            AnalysisError::Decode(_) => ErrorCode::Decode,
            AnalysisError::Analysis(_) => ErrorCode::Analysis,
            AnalysisError::Model(_) => ErrorCode::Model,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AnalysisError::Cancelled)
    }

    /// Wrap a collaborator failure, keeping the full context chain.
    pub(crate) fn analysis(context: &str, err: anyhow::Error) -> Self {
        AnalysisError::Analysis(format!("{}: {:#}", context, err))
    }

    pub(crate) fn model(context: &str, err: anyhow::Error) -> Self {
        AnalysisError::Model(format!("{}: {:#}", context, err))
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Code for a finished request: `Success` for `Ok`, the error's code otherwise.
pub fn code_of<T>(result: &Result<T>) -> ErrorCode {
    match result {
        Ok(_) => ErrorCode::Success,
        Err(e) => e.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorCode::Success.as_i32(), 0);
        assert_eq!(AnalysisError::Cancelled.code().as_i32(), 1);
        assert_eq!(AnalysisError::Decode("x".into()).code().as_i32(), 2);
        assert_eq!(AnalysisError::Analysis("x".into()).code().as_i32(), 3);
        assert_eq!(AnalysisError::Model("x".into()).code().as_i32(), 4);
    }

    #[test]
    fn collaborator_context_is_kept() {
        let err = anyhow::anyhow!("shape mismatch").context("run failed");
        let mapped = AnalysisError::analysis("patch 3", err);
        assert_eq!(mapped.code(), ErrorCode::Analysis);
        let text = mapped.to_string();
        assert!(text.contains("patch 3"));
        assert!(text.contains("shape mismatch"));
    }

    #[test]
    fn code_of_ok_is_success() {
        let ok: Result<u8> = Ok(1);
        let err: Result<u8> = Err(AnalysisError::Cancelled);
        assert_eq!(code_of(&ok), ErrorCode::Success);
        assert_eq!(code_of(&err), ErrorCode::Cancelled);
    }
}
