//! Render and stream requests handed over by the control layer.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::clip::{ClipDescriptor, ClipRole};
use crate::duration::sanitize_duration;
use crate::encoding::{Canvas, EncodingConfig};
use crate::overlay::OverlayDescriptor;

/// Request validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum RequestError {
    #[error("target duration must be positive")]
    InvalidTargetDuration,

    #[error("request contains no clips")]
    NoClips,

    #[error("stream request contains no loop clips")]
    NoLoopClips,

    #[error("stream destination endpoint is empty")]
    EmptyEndpoint,
}

/// Audio fade curves applied during muxing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct FadeConfig {
    #[serde(default)]
    pub fade_in: f64,
    #[serde(default)]
    pub fade_out: f64,
}

impl FadeConfig {
    pub fn new(fade_in: f64, fade_out: f64) -> Self {
        Self { fade_in, fade_out }
    }

    /// Sanitize both fades and keep them inside `target` seconds.
    pub fn clamped(&self, target: f64) -> Self {
        let target = sanitize_duration(target);
        let fade_in = sanitize_duration(self.fade_in).min(target);
        let fade_out = sanitize_duration(self.fade_out).min(target);
        Self { fade_in, fade_out }
    }
}

/// EBU R128 loudness normalization target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoudnessTarget {
    /// Integrated loudness in LUFS
    pub integrated: f64,
    /// True peak in dBTP
    pub true_peak: f64,
    /// Loudness range in LU
    pub range: f64,
}

impl Default for LoudnessTarget {
    fn default() -> Self {
        Self {
            integrated: -16.0,
            true_peak: -1.5,
            range: 11.0,
        }
    }
}

/// Precomputed audio track for a file render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTrackSpec {
    /// Audio (or media) file providing the soundtrack
    pub source: PathBuf,
    /// Loudness normalization; `None` leaves levels untouched
    #[serde(default = "default_loudness")]
    pub loudness: Option<LoudnessTarget>,
}

fn default_loudness() -> Option<LoudnessTarget> {
    Some(LoudnessTarget::default())
}

/// Everything needed to render a finite timeline to a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    /// Role-tagged clips in playback order
    pub clips: Vec<ClipDescriptor>,

    #[serde(default)]
    pub overlays: Vec<OverlayDescriptor>,

    /// Exact length of the output in seconds
    pub target_duration: f64,

    #[serde(default)]
    pub fades: FadeConfig,

    #[serde(default)]
    pub audio: Option<AudioTrackSpec>,

    /// Final output path; only written once the job completes
    pub output: PathBuf,

    #[serde(default)]
    pub encoding: EncodingConfig,

    /// Pin the canvas instead of probing the first clip
    #[serde(default)]
    pub canvas: Option<Canvas>,
}

impl RenderRequest {
    pub fn new(clips: Vec<ClipDescriptor>, target_duration: f64, output: impl Into<PathBuf>) -> Self {
        Self {
            clips,
            overlays: Vec::new(),
            target_duration,
            fades: FadeConfig::default(),
            audio: None,
            output: output.into(),
            encoding: EncodingConfig::default(),
            canvas: None,
        }
    }

    /// Sanitized clips of one role, in order.
    pub fn clips_for(&self, role: ClipRole) -> Vec<ClipDescriptor> {
        self.clips
            .iter()
            .filter(|c| c.role == role)
            .map(ClipDescriptor::sanitized)
            .collect()
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        if sanitize_duration(self.target_duration) <= 0.0 {
            return Err(RequestError::InvalidTargetDuration);
        }
        if self.clips.is_empty() {
            return Err(RequestError::NoClips);
        }
        Ok(())
    }
}

/// Live push destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDestination {
    /// Ingest endpoint, e.g. `rtmp://live.example.com/app`
    pub endpoint: String,
    /// Stream key appended to the endpoint
    #[serde(default)]
    pub key: String,
}

impl StreamDestination {
    /// Full URL the encoder pushes to.
    pub fn url(&self) -> String {
        if self.key.is_empty() {
            return self.endpoint.clone();
        }
        format!("{}/{}", self.endpoint.trim_end_matches('/'), self.key)
    }
}

/// Format of the live PCM pushed through the audio pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for StreamAudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

/// Everything needed to start an unbounded live stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub clips: Vec<ClipDescriptor>,

    pub destination: StreamDestination,

    /// Video bitrate hint for the encoder
    #[serde(default = "default_bitrate")]
    pub video_bitrate_kbps: u32,

    /// `None` streams silence
    #[serde(default = "default_stream_audio")]
    pub audio: Option<StreamAudioFormat>,

    #[serde(default)]
    pub encoding: EncodingConfig,

    #[serde(default)]
    pub canvas: Option<Canvas>,
}

fn default_bitrate() -> u32 {
    4500
}

fn default_stream_audio() -> Option<StreamAudioFormat> {
    Some(StreamAudioFormat::default())
}

impl StreamRequest {
    pub fn clips_for(&self, role: ClipRole) -> Vec<ClipDescriptor> {
        self.clips
            .iter()
            .filter(|c| c.role == role)
            .map(ClipDescriptor::sanitized)
            .collect()
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        if self.clips.is_empty() {
            return Err(RequestError::NoClips);
        }
        if !self.clips.iter().any(|c| c.role == ClipRole::Loop) {
            return Err(RequestError::NoLoopClips);
        }
        if self.destination.endpoint.trim().is_empty() {
            return Err(RequestError::EmptyEndpoint);
        }
        Ok(())
    }
}
