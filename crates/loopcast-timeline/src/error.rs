//! Error types for timeline composition.

use loopcast_media::MediaError;
use loopcast_models::RequestError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for timeline operations.
pub type TimelineResult<T> = Result<T, TimelineError>;

/// Errors raised while composing a timeline.
#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("Source not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Unreadable source {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Backend call failed in step '{step}': {source}")]
    BackendCallFailed {
        step: String,
        #[source]
        source: MediaError,
    },

    #[error("Assembly step '{step}' failed: {message}")]
    AssemblyStepFailed { step: String, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TimelineError {
    /// Attribute a backend error to a pipeline step.
    pub fn backend(step: impl Into<String>, error: MediaError) -> Self {
        match error {
            MediaError::FileNotFound(path) => TimelineError::SourceNotFound(path),
            MediaError::Unreadable { path, reason } => TimelineError::Unreadable { path, reason },
            MediaError::Cancelled => TimelineError::Cancelled,
            other => TimelineError::BackendCallFailed {
                step: step.into(),
                source: other,
            },
        }
    }

    /// Create an assembly failure.
    pub fn assembly(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AssemblyStepFailed {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TimelineError::Cancelled)
    }
}

impl From<MediaError> for TimelineError {
    fn from(error: MediaError) -> Self {
        TimelineError::backend("backend", error)
    }
}

impl From<RequestError> for TimelineError {
    fn from(error: RequestError) -> Self {
        TimelineError::InvalidRequest(error.to_string())
    }
}

/// Tag backend results with the step they belong to.
pub trait StepContext<T> {
    fn at_step(self, step: &str) -> TimelineResult<T>;
}

impl<T> StepContext<T> for Result<T, MediaError> {
    fn at_step(self, step: &str) -> TimelineResult<T> {
        self.map_err(|e| TimelineError::backend(step, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_classification() {
        let err = TimelineError::backend("conform", MediaError::FileNotFound("a.mp4".into()));
        assert!(matches!(err, TimelineError::SourceNotFound(_)));

        let err = TimelineError::backend("blend", MediaError::Cancelled);
        assert!(err.is_cancelled());

        let err: TimelineResult<()> =
            Err(MediaError::ffmpeg_failed("boom", None, Some(1))).at_step("concat");
        match err {
            Err(TimelineError::BackendCallFailed { step, .. }) => assert_eq!(step, "concat"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_request_error_becomes_invalid_request() {
        let err: TimelineError = RequestError::NoClips.into();
        assert!(matches!(err, TimelineError::InvalidRequest(_)));
    }
}
