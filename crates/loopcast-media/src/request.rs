//! Declarative backend requests.
//!
//! The timeline describes *what* each call produces; the backend decides
//! how to express it (ffmpeg arguments for [`crate::FfmpegBackend`]).

use loopcast_models::{Canvas, EncodingConfig, StreamAudioFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One input of a transcode request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputSpec {
    /// A media file, optionally seeked, trimmed or looped
    File {
        path: PathBuf,
        seek: Option<f64>,
        trim: Option<f64>,
        loop_forever: bool,
    },
    /// A concat demuxer list file
    ConcatList(PathBuf),
    /// A generated libavfilter source
    Generated(String),
}

impl InputSpec {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        InputSpec::File {
            path: path.into(),
            seek: None,
            trim: None,
            loop_forever: false,
        }
    }

    /// Seek into a file input. No-op for other inputs.
    pub fn seek(mut self, seconds: f64) -> Self {
        if let InputSpec::File { seek, .. } = &mut self {
            *seek = (seconds > 0.0).then_some(seconds);
        }
        self
    }

    /// Read at most `seconds` of a file input.
    pub fn trim(mut self, seconds: f64) -> Self {
        if let InputSpec::File { trim, .. } = &mut self {
            *trim = Some(seconds);
        }
        self
    }

    /// Loop a file input without bound.
    pub fn looped(mut self) -> Self {
        if let InputSpec::File { loop_forever, .. } = &mut self {
            *loop_forever = true;
        }
        self
    }

    /// Path of a file-backed input.
    pub fn path(&self) -> Option<&Path> {
        match self {
            InputSpec::File { path, .. } | InputSpec::ConcatList(path) => Some(path),
            InputSpec::Generated(_) => None,
        }
    }
}

/// Filtering applied between inputs and output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FilterGraph {
    /// Simple chain on the first video stream
    Video(String),
    /// Simple chain on the first audio stream
    Audio(String),
    /// Labelled graph; `maps` selects what reaches the output
    Complex { graph: String, maps: Vec<String> },
}

/// How the video stream is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoOutput {
    /// Encode with the request's [`EncodingConfig`]
    Encode,
    /// Stream copy
    Copy,
    /// Lossless intermediate preserving alpha
    Alpha,
    /// No video
    Drop,
}

/// How the audio stream is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioOutput {
    /// Encode with the request's [`EncodingConfig`]
    Encode,
    /// Stream copy
    Copy,
    /// Lossless PCM intermediate
    Lossless,
    /// Raw interleaved f32 samples
    RawF32 { sample_rate: u32, channels: u16 },
    /// No audio
    Drop,
}

/// Output side of a transcode request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub path: PathBuf,
    /// Exact output length, applied as an output-side trim
    pub duration: Option<f64>,
    pub video: VideoOutput,
    pub audio: AudioOutput,
    pub encoding: EncodingConfig,
}

impl OutputSpec {
    /// Video-only output encoded with `encoding`.
    pub fn video(path: impl Into<PathBuf>, encoding: EncodingConfig) -> Self {
        Self {
            path: path.into(),
            duration: None,
            video: VideoOutput::Encode,
            audio: AudioOutput::Drop,
            encoding,
        }
    }

    /// Stream-copied output.
    pub fn copy(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            duration: None,
            video: VideoOutput::Copy,
            audio: AudioOutput::Copy,
            encoding: EncodingConfig::default(),
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    pub fn with_video(mut self, video: VideoOutput) -> Self {
        self.video = video;
        self
    }

    pub fn with_audio(mut self, audio: AudioOutput) -> Self {
        self.audio = audio;
        self
    }

    /// Whether anything in this output is encoded with the request's config.
    pub fn uses_encoder(&self) -> bool {
        self.video == VideoOutput::Encode || self.audio == AudioOutput::Encode
    }
}

/// A single declarative backend call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeRequest {
    /// Short step name used in logs, metrics and error messages
    pub step: String,
    pub inputs: Vec<InputSpec>,
    pub filter: Option<FilterGraph>,
    pub output: OutputSpec,
    /// Expected output length, used to turn backend progress into a fraction
    pub expected_duration: Option<f64>,
}

impl TranscodeRequest {
    pub fn new(step: impl Into<String>, output: OutputSpec) -> Self {
        let expected_duration = output.duration;
        Self {
            step: step.into(),
            inputs: Vec::new(),
            filter: None,
            output,
            expected_duration,
        }
    }

    pub fn input(mut self, input: InputSpec) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn filter(mut self, filter: FilterGraph) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn expect_duration(mut self, seconds: f64) -> Self {
        self.expected_duration = Some(seconds);
        self
    }

    /// The same request encoded with a different configuration.
    pub fn with_encoding(&self, encoding: EncodingConfig) -> Self {
        let mut request = self.clone();
        request.output.encoding = encoding;
        request
    }
}

/// Continuous encode of a live stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousEncodeSpec {
    /// Played once at the start
    pub intro_unit: PathBuf,
    /// Repeated without bound after the intro unit
    pub loop_unit: PathBuf,
    /// Live PCM format fed through stdin; `None` streams silence
    pub audio: Option<StreamAudioFormat>,
    /// Destination URL
    pub destination: String,
    pub video_bitrate_kbps: u32,
    pub encoding: EncodingConfig,
    pub canvas: Canvas,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_builders_only_touch_files() {
        let input = InputSpec::file("a.mp4").seek(2.0).trim(3.0).looped();
        assert_eq!(
            input,
            InputSpec::File {
                path: "a.mp4".into(),
                seek: Some(2.0),
                trim: Some(3.0),
                loop_forever: true,
            }
        );

        let generated = InputSpec::Generated("anullsrc".into()).seek(2.0);
        assert_eq!(generated, InputSpec::Generated("anullsrc".into()));
        assert!(generated.path().is_none());

        assert_eq!(InputSpec::file("a.mp4").seek(0.0), InputSpec::file("a.mp4"));
    }

    #[test]
    fn test_expected_duration_defaults_to_output_trim() {
        let request = TranscodeRequest::new(
            "trim",
            OutputSpec::copy("out.mp4").with_duration(30.0),
        );
        assert_eq!(request.expected_duration, Some(30.0));
        assert!(!request.output.uses_encoder());
    }

    #[test]
    fn test_with_encoding_keeps_everything_else() {
        let request = TranscodeRequest::new(
            "conform",
            OutputSpec::video("c.mp4", EncodingConfig::default().with_codec("h264_nvenc")),
        )
        .input(InputSpec::file("a.mp4"));
        let portable = request.with_encoding(EncodingConfig::portable());
        assert!(portable.output.encoding.is_portable());
        assert_eq!(portable.inputs, request.inputs);
        assert_eq!(portable.step, "conform");
    }
}
