//! Render job and stream session states.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a render job or stream session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, used to name scratch directories.
    pub fn short(&self) -> &str {
        let end = self.0.char_indices().nth(8).map(|(i, _)| i).unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Render job state.
///
/// Stages advance strictly in declaration order; any stage may jump
/// directly to `Failed` or `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RenderState {
    #[default]
    Idle,
    Starting,
    RenderingAudio,
    ProcessingClips,
    RenderingCrossfades,
    AssemblingTimeline,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl RenderState {
    /// Get string representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderState::Idle => "idle",
            RenderState::Starting => "starting",
            RenderState::RenderingAudio => "rendering_audio",
            RenderState::ProcessingClips => "processing_clips",
            RenderState::RenderingCrossfades => "rendering_crossfades",
            RenderState::AssemblingTimeline => "assembling_timeline",
            RenderState::Finalizing => "finalizing",
            RenderState::Completed => "completed",
            RenderState::Failed => "failed",
            RenderState::Cancelled => "cancelled",
        }
    }

    /// Human-readable stage label.
    pub fn label(&self) -> &'static str {
        match self {
            RenderState::Idle => "Idle",
            RenderState::Starting => "Starting",
            RenderState::RenderingAudio => "Rendering audio",
            RenderState::ProcessingClips => "Processing clips",
            RenderState::RenderingCrossfades => "Rendering crossfades",
            RenderState::AssemblingTimeline => "Assembling timeline",
            RenderState::Finalizing => "Finalizing",
            RenderState::Completed => "Completed",
            RenderState::Failed => "Failed",
            RenderState::Cancelled => "Cancelled",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RenderState::Completed | RenderState::Failed | RenderState::Cancelled
        )
    }

    /// The stage that follows this one on success.
    pub fn next(&self) -> Option<RenderState> {
        match self {
            RenderState::Idle => Some(RenderState::Starting),
            RenderState::Starting => Some(RenderState::RenderingAudio),
            RenderState::RenderingAudio => Some(RenderState::ProcessingClips),
            RenderState::ProcessingClips => Some(RenderState::RenderingCrossfades),
            RenderState::RenderingCrossfades => Some(RenderState::AssemblingTimeline),
            RenderState::AssemblingTimeline => Some(RenderState::Finalizing),
            RenderState::Finalizing => Some(RenderState::Completed),
            RenderState::Completed | RenderState::Failed | RenderState::Cancelled => None,
        }
    }

    /// Whether `to` is a legal transition from this state.
    pub fn can_transition_to(&self, to: RenderState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(to, RenderState::Failed | RenderState::Cancelled) {
            return *self != RenderState::Idle;
        }
        self.next() == Some(to)
    }
}

impl fmt::Display for RenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stream session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    #[default]
    Preparing,
    Live,
    Restarting,
    Stopped,
    Failed,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamState::Preparing => "preparing",
            StreamState::Live => "live",
            StreamState::Restarting => "restarting",
            StreamState::Stopped => "stopped",
            StreamState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamState::Stopped | StreamState::Failed)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
