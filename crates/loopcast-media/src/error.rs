//! Media backend errors.

use std::path::PathBuf;
use thiserror::Error;

pub type MediaResult<T> = Result<T, MediaError>;

/// Number of stderr lines kept on an encoder failure.
const STDERR_TAIL_LINES: usize = 8;

#[derive(Debug, Error)]
pub enum MediaError {
    /// `ffmpeg` or `ffprobe` is not installed.
    #[error("{0} not found in PATH")]
    ToolNotFound(&'static str),

    #[error("FFmpeg failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// The file exists but is not usable media.
    #[error("Unreadable media {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Probe output is not valid JSON: {0}")]
    ProbeOutput(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Encoder failure; only the last lines of `stderr` are kept.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr: stderr.map(|s| tail_lines(&s, STDERR_TAIL_LINES)),
            exit_code,
        }
    }

    pub fn unreadable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Unreadable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, MediaError::Cancelled)
    }

    /// Whether running the step again with the portable encoder could help.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MediaError::FfmpegFailed { .. } | MediaError::Timeout(_))
    }

    /// Encoder stderr attached to the failure, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            MediaError::FfmpegFailed { stderr, .. } => stderr.as_deref(),
            _ => None,
        }
    }
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(MediaError::ffmpeg_failed("boom", None, Some(1)).is_retryable());
        assert!(MediaError::Timeout(5).is_retryable());
        assert!(!MediaError::Cancelled.is_retryable());
        assert!(MediaError::Cancelled.is_cancelled());
        assert!(!MediaError::FileNotFound("a.mp4".into()).is_retryable());
        assert!(!MediaError::ToolNotFound("ffmpeg").is_retryable());
    }

    #[test]
    fn test_stderr_is_truncated_to_tail() {
        let stderr: String = (0..20).map(|i| format!("line {}\n", i)).collect();
        let err = MediaError::ffmpeg_failed("exit 1", Some(stderr), Some(1));

        let kept = err.stderr().unwrap();
        assert_eq!(kept.lines().count(), STDERR_TAIL_LINES);
        assert!(kept.starts_with("line 12"));
        assert!(kept.ends_with("line 19"));
    }
}
