//! Stream health derived from the encoder's status output.

use chrono::{DateTime, Utc};
use loopcast_media::FfmpegProgress;
use serde::Serialize;

/// Latest health of a live stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamHealth {
    /// Frames sent by the current encoder process
    pub frame: u64,
    /// Encode rate reported by the encoder
    pub fps: f64,
    pub drop_frames: u64,
    pub dup_frames: u64,
    pub bitrate_kbps: Option<f64>,
    pub speed: f64,
    /// Encoder restarts over the session's lifetime
    pub restarts: u32,
    pub consecutive_failures: u32,
    pub unstable: bool,
    pub audio_connected: bool,
    /// Live audio bytes delivered to the encoder
    pub audio_bytes: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl StreamHealth {
    /// Fold one completed status block in.
    pub fn apply(&mut self, progress: &FfmpegProgress) {
        self.frame = progress.frame;
        self.fps = progress.fps;
        self.drop_frames = progress.drop_frames;
        self.dup_frames = progress.dup_frames;
        self.bitrate_kbps = progress.bitrate_kbps;
        self.speed = progress.speed;
        self.updated_at = Some(Utc::now());
    }

    /// Fraction of frames dropped so far.
    pub fn drop_ratio(&self) -> f64 {
        let total = self.frame + self.drop_frames;
        if total == 0 {
            0.0
        } else {
            self.drop_frames as f64 / total as f64
        }
    }
}
