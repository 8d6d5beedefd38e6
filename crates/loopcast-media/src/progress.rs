//! Parsing of ffmpeg's `-progress` key=value stream.
//!
//! ffmpeg writes one `key=value` per line and closes every block with
//! `progress=continue`, or `progress=end` on the last one.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Encoder counters from one completed `-progress` block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FfmpegProgress {
    pub frame: u64,
    pub fps: f64,
    /// Timestamp of the last muxed packet.
    pub out_time: Duration,
    /// Multiple of realtime; 0 while ffmpeg reports `N/A`.
    pub speed: f64,
    pub drop_frames: u64,
    pub dup_frames: u64,
    pub bitrate_kbps: Option<f64>,
    /// Set by the final `progress=end` block.
    pub finished: bool,
}

impl FfmpegProgress {
    /// Fraction of `expected_secs` written so far, clamped to `[0, 1]`.
    pub fn fraction_of(&self, expected_secs: f64) -> f64 {
        if expected_secs.is_nan() || expected_secs <= 0.0 {
            return 0.0;
        }
        (self.out_time.as_secs_f64() / expected_secs).clamp(0.0, 1.0)
    }
}

/// Accumulates lines until a block completes.
#[derive(Debug, Default)]
pub struct ProgressParser {
    current: FfmpegProgress,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `line` looks like part of the progress stream rather than a
    /// diagnostic message.
    pub fn is_progress_line(line: &str) -> bool {
        match line.split_once('=') {
            Some((key, _)) => {
                !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            None => false,
        }
    }

    /// Feed one line; returns a snapshot when it closes a block.
    pub fn feed(&mut self, line: &str) -> Option<FfmpegProgress> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();
        let p = &mut self.current;
        match key.trim() {
            // Both keys carry microseconds in current builds.
            "out_time_us" | "out_time_ms" => {
                if let Some(us) = number::<u64>(value) {
                    p.out_time = Duration::from_micros(us);
                }
            }
            "frame" => set(&mut p.frame, value),
            "fps" => set(&mut p.fps, value),
            "drop_frames" => set(&mut p.drop_frames, value),
            "dup_frames" => set(&mut p.dup_frames, value),
            "bitrate" => {
                p.bitrate_kbps = value.strip_suffix("kbits/s").and_then(number);
            }
            "speed" => {
                if let Some(speed) = value.strip_suffix('x').and_then(number) {
                    p.speed = speed;
                }
            }
            "progress" => {
                p.finished = value == "end";
                return Some(p.clone());
            }
            _ => {}
        }
        None
    }

    /// Latest values, including a partially read block.
    pub fn current(&self) -> &FfmpegProgress {
        &self.current
    }
}

fn number<T: FromStr>(value: &str) -> Option<T> {
    value.trim().parse().ok()
}

fn set<T: FromStr>(slot: &mut T, value: &str) {
    if let Some(parsed) = number(value) {
        *slot = parsed;
    }
}
