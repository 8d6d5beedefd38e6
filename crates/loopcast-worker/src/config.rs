//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of every job's scratch arena
    pub work_dir: PathBuf,
    /// Progress poller interval
    pub progress_poll_interval: Duration,
    /// Timeout of a single backend call; `None` disables it
    pub ffmpeg_timeout: Option<Duration>,
    /// How often stream health is sampled and reported
    pub stream_health_interval: Duration,
    /// Longest a live audio write may block before the pipe is dropped
    pub audio_write_timeout: Duration,
    /// Bytes per live audio write
    pub audio_chunk_bytes: usize,
    /// Restarts of a crashed continuous encode before the session fails
    pub stream_max_restarts: u32,
    /// Consecutive failures after which a session is flagged unstable
    pub stream_unstable_after: u32,
    /// First restart backoff; doubles up to `stream_max_backoff`
    pub stream_initial_backoff: Duration,
    pub stream_max_backoff: Duration,
    /// How long a cancelled job may take to settle
    pub cancel_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/loopcast"),
            progress_poll_interval: Duration::from_millis(500),
            ffmpeg_timeout: None,
            stream_health_interval: Duration::from_millis(1000),
            audio_write_timeout: Duration::from_millis(250),
            audio_chunk_bytes: 4096,
            stream_max_restarts: 5,
            stream_unstable_after: 3,
            stream_initial_backoff: Duration::from_secs(1),
            stream_max_backoff: Duration::from_secs(30),
            cancel_grace: Duration::from_secs(10),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl EngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            work_dir: std::env::var("LOOPCAST_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            progress_poll_interval: Duration::from_millis(
                env_parse("LOOPCAST_PROGRESS_POLL_MS").unwrap_or(500),
            ),
            ffmpeg_timeout: env_parse::<u64>("LOOPCAST_FFMPEG_TIMEOUT_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            stream_health_interval: Duration::from_millis(
                env_parse("LOOPCAST_STREAM_HEALTH_MS").unwrap_or(1000),
            ),
            audio_write_timeout: Duration::from_millis(
                env_parse("LOOPCAST_AUDIO_WRITE_TIMEOUT_MS").unwrap_or(250),
            ),
            audio_chunk_bytes: env_parse("LOOPCAST_AUDIO_CHUNK_BYTES")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.audio_chunk_bytes),
            stream_max_restarts: env_parse("LOOPCAST_STREAM_MAX_RESTARTS")
                .unwrap_or(defaults.stream_max_restarts),
            stream_unstable_after: env_parse("LOOPCAST_STREAM_UNSTABLE_AFTER")
                .unwrap_or(defaults.stream_unstable_after),
            stream_initial_backoff: defaults.stream_initial_backoff,
            stream_max_backoff: defaults.stream_max_backoff,
            cancel_grace: Duration::from_secs(
                env_parse("LOOPCAST_CANCEL_GRACE_SECS").unwrap_or(10),
            ),
        }
    }

    /// Per-call backend timeout in whole seconds, `0` for none.
    pub fn ffmpeg_timeout_secs(&self) -> u64 {
        self.ffmpeg_timeout.map(|d| d.as_secs()).unwrap_or(0)
    }

    /// Point the scratch arenas somewhere else.
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    /// Shorter stream restart backoff, mostly for tests.
    pub fn with_stream_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.stream_initial_backoff = initial;
        self.stream_max_backoff = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.progress_poll_interval, Duration::from_millis(500));
        assert_eq!(config.ffmpeg_timeout_secs(), 0);
        assert_eq!(config.stream_max_restarts, 5);
        assert_eq!(config.audio_chunk_bytes, 4096);
    }

    #[test]
    fn test_from_env_overrides() {
        std::env::set_var("LOOPCAST_PROGRESS_POLL_MS", "250");
        std::env::set_var("LOOPCAST_FFMPEG_TIMEOUT_SECS", "90");
        std::env::set_var("LOOPCAST_AUDIO_CHUNK_BYTES", "0");
        let config = EngineConfig::from_env();
        std::env::remove_var("LOOPCAST_PROGRESS_POLL_MS");
        std::env::remove_var("LOOPCAST_FFMPEG_TIMEOUT_SECS");
        std::env::remove_var("LOOPCAST_AUDIO_CHUNK_BYTES");

        assert_eq!(config.progress_poll_interval, Duration::from_millis(250));
        assert_eq!(config.ffmpeg_timeout_secs(), 90);
        assert_eq!(config.audio_chunk_bytes, 4096);
    }
}
