//! Render and stream metrics.
//!
//! Provides standardized metrics for monitoring the engine:
//! - Render job outcomes and stage durations
//! - Stream restarts and audio pipe disconnects
//!
//! No exporter is installed here; whoever embeds the engine picks one.

use loopcast_models::RenderState;
use metrics::{counter, histogram};

// =============================================================================
// Metric Names
// =============================================================================

/// Metric name constants for consistency.
pub mod names {
    /// Finished render jobs by terminal state.
    pub const RENDER_JOBS_TOTAL: &str = "loopcast_render_jobs_total";

    /// Wall time of each render stage in seconds.
    pub const STAGE_SECONDS: &str = "loopcast_stage_seconds";

    /// Restarts of a crashed continuous encode.
    pub const STREAM_RESTARTS_TOTAL: &str = "loopcast_stream_restarts_total";

    /// Live audio pipes marked disconnected.
    pub const AUDIO_PIPE_DISCONNECTS_TOTAL: &str = "loopcast_audio_pipe_disconnects_total";

    pub use loopcast_media::BACKEND_FALLBACKS_METRIC as BACKEND_FALLBACKS_TOTAL;
    pub use loopcast_timeline::DEGRADED_TRANSITIONS_METRIC as DEGRADED_TRANSITIONS_TOTAL;
}

// =============================================================================
// Recording Functions
// =============================================================================

/// Record a render job settling into `state`.
pub fn record_job(state: RenderState) {
    counter!(names::RENDER_JOBS_TOTAL, "state" => state.as_str()).increment(1);
}

/// Record how long a stage took.
pub fn record_stage(stage: RenderState, seconds: f64) {
    histogram!(names::STAGE_SECONDS, "stage" => stage.as_str()).record(seconds);
}

pub fn record_stream_restart() {
    counter!(names::STREAM_RESTARTS_TOTAL).increment(1);
}

pub fn record_audio_disconnect() {
    counter!(names::AUDIO_PIPE_DISCONNECTS_TOTAL).increment(1);
}
