//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Timeline error: {0}")]
    Timeline(#[from] loopcast_timeline::TimelineError),

    #[error("Media error: {0}")]
    Media(#[from] loopcast_media::MediaError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Stream failed: {0}")]
    StreamFailed(String),

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn stream_failed(msg: impl Into<String>) -> Self {
        Self::StreamFailed(msg.into())
    }

    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    /// Whether this error is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        match self {
            WorkerError::Timeline(e) => e.is_cancelled(),
            WorkerError::Media(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

impl From<loopcast_models::RequestError> for WorkerError {
    fn from(error: loopcast_models::RequestError) -> Self {
        WorkerError::Timeline(error.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopcast_timeline::TimelineError;

    #[test]
    fn test_cancellation_is_recognized_through_layers() {
        assert!(WorkerError::from(TimelineError::Cancelled).is_cancelled());
        assert!(WorkerError::from(loopcast_media::MediaError::Cancelled).is_cancelled());
        assert!(!WorkerError::job_failed("boom").is_cancelled());
    }
}
