//! Error types for the analysis pipeline and its tools.

use std::path::PathBuf;
use thiserror::Error;

use crate::pose::PoseLandmark;

/// Result type for analysis operations.
pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Errors raised while analysing videos or images.
///
/// Tool boundaries turn every variant into human-readable text; nothing here
/// is meant to reach a caller as a structured code.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("{kind} not found at {}", path.display())]
    InputNotFound { kind: &'static str, path: PathBuf },

    #[error("Could not open {kind} at {}: {reason}", path.display())]
    DecodeFailure {
        kind: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("Missing pose landmark: {0}")]
    MissingLandmark(PoseLandmark),

    #[error("Pose detection failed: {0}")]
    PoseDetection(String),

    #[error("No frames could be processed from the video.")]
    NoFramesProcessed,

    #[error("Could not create output video file: {0}")]
    EncodingFailure(String),

    #[error("Image operation failed: {0}")]
    ImageOperation(String),

    #[error("Invalid tool arguments: {0}")]
    ToolArguments(String),

    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AnalysisError {
    pub fn video_not_found(path: impl Into<PathBuf>) -> Self {
        Self::InputNotFound {
            kind: "Video",
            path: path.into(),
        }
    }

    pub fn image_not_found(path: impl Into<PathBuf>) -> Self {
        Self::InputNotFound {
            kind: "Image",
            path: path.into(),
        }
    }

    pub fn video_decode(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::DecodeFailure {
            kind: "video",
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn image_decode(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::DecodeFailure {
            kind: "image",
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn encoding(message: impl Into<String>) -> Self {
        Self::EncodingFailure(message.into())
    }

    /// Fatal errors end the request; everything else is recovered per frame.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::MissingLandmark(_) | Self::PoseDetection(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_human_readable() {
        let err = AnalysisError::video_not_found("/tmp/missing.mp4");
        assert_eq!(err.to_string(), "Video not found at /tmp/missing.mp4");

        let err = AnalysisError::MissingLandmark(PoseLandmark::LeftAnkle);
        assert_eq!(err.to_string(), "Missing pose landmark: left_ankle");
    }

    #[test]
    fn test_fatality() {
        assert!(AnalysisError::encoding("all codecs failed").is_fatal());
        assert!(AnalysisError::Cancelled.is_fatal());
        assert!(!AnalysisError::PoseDetection("timeout".to_string()).is_fatal());
    }
}
