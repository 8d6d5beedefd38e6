//! Video encoding configuration.

use serde::{Deserialize, Serialize};

/// Software H.264 encoder, available in every ffmpeg build.
pub const PORTABLE_VIDEO_CODEC: &str = "libx264";
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
pub const DEFAULT_PRESET: &str = "fast";
/// Quality for intermediate artifacts; they are re-encoded later.
pub const DEFAULT_QUALITY: u8 = 18;
pub const DEFAULT_AUDIO_BITRATE_KBPS: u32 = 192;
pub const DEFAULT_PIXEL_FORMAT: &str = "yuv420p";

/// Canvas used when the source cannot be probed.
pub const DEFAULT_CANVAS_WIDTH: u32 = 1920;
pub const DEFAULT_CANVAS_HEIGHT: u32 = 1080;
pub const DEFAULT_CANVAS_FPS: f64 = 30.0;

/// Hardware encoder families, matched by codec name suffix.
const HARDWARE_SUFFIXES: [&str; 4] = ["_nvenc", "_qsv", "_vaapi", "_videotoolbox"];

/// Encoder settings shared by every step that re-encodes video.
///
/// Any field missing from a request falls back to the portable default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    pub codec: String,
    pub preset: String,
    /// CRF for software encoders, CQ for hardware ones. Lower is better.
    pub quality: u8,
    pub pixel_format: String,
    pub audio_codec: String,
    pub audio_bitrate_kbps: u32,
    /// Passed through verbatim after the video arguments.
    pub extra_args: Vec<String>,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            codec: PORTABLE_VIDEO_CODEC.to_string(),
            preset: DEFAULT_PRESET.to_string(),
            quality: DEFAULT_QUALITY,
            pixel_format: DEFAULT_PIXEL_FORMAT.to_string(),
            audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            audio_bitrate_kbps: DEFAULT_AUDIO_BITRATE_KBPS,
            extra_args: Vec::new(),
        }
    }
}

impl EncodingConfig {
    /// Configuration every step falls back to when the requested encoder fails.
    pub fn portable() -> Self {
        Self {
            preset: "veryfast".to_string(),
            ..Default::default()
        }
    }

    pub fn with_codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = codec.into();
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn is_hardware(&self) -> bool {
        HARDWARE_SUFFIXES.iter().any(|suffix| self.codec.ends_with(suffix))
    }

    /// Whether falling back to [`EncodingConfig::portable`] would change anything
    /// besides the preset.
    pub fn is_portable(&self) -> bool {
        self.codec == PORTABLE_VIDEO_CODEC
            && self.pixel_format == DEFAULT_PIXEL_FORMAT
            && self.extra_args.is_empty()
    }

    pub fn to_video_args(&self) -> Vec<String> {
        let quality_flag = if self.is_hardware() { "-cq" } else { "-crf" };
        let mut args: Vec<String> = [
            "-c:v",
            self.codec.as_str(),
            "-preset",
            self.preset.as_str(),
            quality_flag,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(self.quality.to_string());
        args.push("-pix_fmt".to_string());
        args.push(self.pixel_format.clone());
        args.extend(self.extra_args.iter().cloned());
        args
    }

    pub fn to_audio_args(&self) -> Vec<String> {
        vec![
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-b:a".to_string(),
            format!("{}k", self.audio_bitrate_kbps),
        ]
    }
}

/// Common frame geometry every intermediate artifact is normalized to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            width: DEFAULT_CANVAS_WIDTH,
            height: DEFAULT_CANVAS_HEIGHT,
            fps: DEFAULT_CANVAS_FPS,
        }
    }
}

impl Canvas {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self { width, height, fps }
    }

    /// Build a canvas from probed values, falling back to the default for
    /// anything unusable. Dimensions are rounded down to even for yuv420p.
    pub fn from_probe(width: u32, height: u32, fps: f64) -> Self {
        let default = Self::default();
        if width < 2 || height < 2 {
            return default;
        }
        Self {
            width: width - (width % 2),
            height: height - (height % 2),
            fps: if fps.is_finite() && fps > 0.0 { fps } else { default.fps },
        }
    }

    /// Duration of one frame in seconds.
    pub fn frame_duration(&self) -> f64 {
        1.0 / self.fps
    }

    /// Frame rate formatted for ffmpeg filters.
    pub fn fps_arg(&self) -> String {
        format!("{}", (self.fps * 1000.0).round() / 1000.0)
    }
}
