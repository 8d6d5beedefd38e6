//! Media transcode backend for the loopcast timeline engine.
//!
//! This crate provides:
//! - The [`MediaBackend`] contract (probe, transcode, continuous encode)
//! - Declarative [`TranscodeRequest`]s
//! - An ffmpeg CLI implementation with progress parsing from `-progress pipe:2`,
//!   cancellation, timeouts and a portable-encoder retry
//! - Filter graph builders for dissolves, overlays and audio mastering
//! - A [`ProcessRegistry`] for shutting down live processes
//! - `testing::FakeBackend` behind the `testing` feature

pub mod backend;
pub mod command;
pub mod error;
pub mod ffmpeg;
pub mod filters;
pub mod fs_utils;
pub mod probe;
pub mod progress;
pub mod registry;
pub mod request;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::{CallContext, EncodeHandle, EncodeProcess, FractionCallback, MediaBackend};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegInput, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use ffmpeg::{FfmpegBackend, BACKEND_FALLBACKS_METRIC, INLINE_GRAPH_LIMIT};
pub use filters::OverlayPiece;
pub use fs_utils::{move_file, write_concat_list};
pub use probe::{probe_media, MediaInfo};
pub use progress::{FfmpegProgress, ProgressParser};
pub use registry::{ProcessRegistry, RegistrationId};
pub use request::{
    AudioOutput, ContinuousEncodeSpec, FilterGraph, InputSpec, OutputSpec, TranscodeRequest,
    VideoOutput,
};
