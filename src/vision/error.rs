//! Recognition error taxonomy

use serde::{Deserialize, Serialize};

/// Errors raised inside the recognition pipeline.
///
/// None of these reach the caller of [`RecognitionPipeline::recognize`]; the
/// orchestrator absorbs them into an empty result and records the
/// [`FailureKind`].
///
/// [`RecognitionPipeline::recognize`]: crate::vision::RecognitionPipeline::recognize
#[derive(Debug, Clone, thiserror::Error)]
pub enum RecognitionError {
    /// Input could not be interpreted as an image
    #[error("failed to decode input image: {0}")]
    Decode(String),

    /// The classifier engine failed to initialize
    #[error("classifier engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The classifier failed during inference
    #[error("classification failed: {0}")]
    ClassificationFailure(String),

    /// The caller-side deadline expired
    #[error("recognition timed out after {0} ms")]
    TimedOut(u64),
}

impl RecognitionError {
    /// Tag used in the outcome returned to callers
    pub fn kind(&self) -> FailureKind {
        match self {
            RecognitionError::Decode(_) => FailureKind::Decode,
            RecognitionError::EngineUnavailable(_) => FailureKind::EngineUnavailable,
            RecognitionError::ClassificationFailure(_) => FailureKind::ClassificationFailure,
            RecognitionError::TimedOut(_) => FailureKind::TimedOut,
        }
    }
}

impl From<image::ImageError> for RecognitionError {
    fn from(e: image::ImageError) -> Self {
        RecognitionError::Decode(e.to_string())
    }
}

impl From<base64::DecodeError> for RecognitionError {
    fn from(e: base64::DecodeError) -> Self {
        RecognitionError::Decode(format!("invalid base64 payload: {}", e))
    }
}

/// Why a recognition request produced an empty result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Decode,
    EngineUnavailable,
    ClassificationFailure,
    TimedOut,
}
