//! Shared data models for the loopcast timeline engine.
//!
//! This crate provides Serde-serializable types for:
//! - Role-tagged clip and overlay descriptors
//! - Render and stream requests
//! - Encoding and canvas configuration
//! - Render job and stream session states

pub mod clip;
pub mod duration;
pub mod encoding;
pub mod job;
pub mod overlay;
pub mod request;

// Re-export common types
pub use clip::{ClipDescriptor, ClipRole};
pub use duration::{sanitize_duration, sanitize_offset, MIN_SEGMENT_SECS};
pub use encoding::{Canvas, EncodingConfig};
pub use job::{JobId, RenderState, StreamState};
pub use overlay::OverlayDescriptor;
pub use request::{
    AudioTrackSpec, FadeConfig, LoudnessTarget, RenderRequest, RequestError, StreamAudioFormat,
    StreamDestination, StreamRequest,
};
