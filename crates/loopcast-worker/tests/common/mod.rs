//! Shared fixtures for worker integration tests.

#![allow(dead_code)]

use loopcast_media::testing::FakeBackend;
use loopcast_media::MediaInfo;
use loopcast_worker::EngineConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Scratch directory plus a backend that knows about nothing yet.
pub struct Fixture {
    pub dir: TempDir,
    pub backend: FakeBackend,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
            backend: FakeBackend::new(),
        }
    }

    /// A video source of `duration` seconds.
    pub async fn video(&self, name: &str, duration: f64) -> PathBuf {
        let path = self.dir.path().join(name);
        tokio::fs::write(&path, b"src").await.expect("Failed to write source");
        self.backend
            .register_probe(&path, MediaInfo::video(duration, 1920, 1080, 30.0));
        path
    }

    /// An audio-only source of `duration` seconds.
    pub async fn audio(&self, name: &str, duration: f64) -> PathBuf {
        let path = self.dir.path().join(name);
        tokio::fs::write(&path, b"src").await.expect("Failed to write source");
        self.backend.register_probe(&path, MediaInfo::audio(duration));
        path
    }

    pub fn work_dir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    pub fn output(&self, name: &str) -> PathBuf {
        self.dir.path().join("out").join(name)
    }

    /// Fast polling and restarts so tests finish quickly.
    pub fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::default()
            .with_work_dir(self.work_dir())
            .with_stream_backoff(Duration::from_millis(5), Duration::from_millis(20));
        config.progress_poll_interval = Duration::from_millis(10);
        config.stream_health_interval = Duration::from_millis(20);
        config.cancel_grace = Duration::from_secs(5);
        config
    }
}

/// Whether any job arena is left under `work_dir`.
pub fn arenas_left(work_dir: &Path) -> usize {
    std::fs::read_dir(work_dir)
        .map(|entries| entries.count())
        .unwrap_or(0)
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
