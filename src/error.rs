use std::path::PathBuf;
use std::time::Duration;

/// Result type for scene chaining operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error types for the scene chaining pipeline
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Plan parsing error: {0}")]
    PlanParse(#[from] PlanParseError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Scene {} generation timed out after {attempts} polls ({:.0}s)", scene + 1, elapsed.as_secs_f64())]
    GenerationTimeout {
        /// 0-based scene index
        scene: usize,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("Provider returned an empty response during {stage}")]
    EmptyResponse { stage: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure reported by a generative capability call
#[derive(thiserror::Error, Debug)]
#[error("{capability}: {message}")]
pub struct ProviderError {
    pub capability: &'static str,
    pub message: String,
}

impl ProviderError {
    pub fn new(capability: &'static str, message: impl Into<String>) -> Self {
        Self {
            capability,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        Self::new("http", e.to_string())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        Self::new("json", e.to_string())
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(e: std::io::Error) -> Self {
        Self::new("io", e.to_string())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PlanParseError {
    #[error("expected {expected} scene blocks, found {found}")]
    WrongSegmentCount { expected: usize, found: usize },

    #[error("scene block {index} is empty")]
    EmptyScene { index: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum MediaError {
    #[error("video has no frames: {}", path.display())]
    NoFrames { path: PathBuf },

    #[error("could not decode last frame of {}: {reason}", path.display())]
    DecodeFailure { path: PathBuf, reason: String },

    #[error("concatenation failed: {reason}")]
    ConcatenationFailure { reason: String },

    #[error("ffprobe failed for {}: {reason}", path.display())]
    Probe { path: PathBuf, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PipelineError::from(PlanParseError::WrongSegmentCount { expected: 3, found: 2 });
        assert_eq!(err.to_string(), "Plan parsing error: expected 3 scene blocks, found 2");

        let err = PipelineError::from(ProviderError::new("generate_video", "quota exceeded"));
        assert_eq!(err.to_string(), "Provider error: generate_video: quota exceeded");

        let err = PipelineError::GenerationTimeout {
            scene: 0,
            attempts: 90,
            elapsed: Duration::from_secs(900),
        };
        assert_eq!(err.to_string(), "Scene 1 generation timed out after 90 polls (900s)");
    }

    #[test]
    fn test_media_error_paths() {
        let err = MediaError::NoFrames {
            path: PathBuf::from("/tmp/empty.mp4"),
        };
        assert!(err.to_string().contains("/tmp/empty.mp4"));
    }
}
