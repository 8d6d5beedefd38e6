//! Clip descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::duration::sanitize_duration;

/// Role of a clip in the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClipRole {
    /// Plays once at the start of the timeline
    Intro,
    /// Repeats indefinitely after the intro
    #[default]
    Loop,
}

impl ClipRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipRole::Intro => "intro",
            ClipRole::Loop => "loop",
        }
    }
}

impl fmt::Display for ClipRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A source clip placed on the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipDescriptor {
    /// Source media file
    pub source: PathBuf,

    /// Seconds skipped at the start of the source
    #[serde(default)]
    pub start_offset: f64,

    /// Exact duration the clip is conformed to.
    /// `0` means "use the source's native length".
    #[serde(default)]
    pub target_duration: f64,

    /// Crossfade into the following clip (for the last clip of a role,
    /// into whatever follows the role)
    #[serde(default)]
    pub crossfade: f64,

    /// Intro or loop
    #[serde(default)]
    pub role: ClipRole,
}

impl ClipDescriptor {
    /// Create a descriptor with no start offset and no crossfade.
    pub fn new(source: impl Into<PathBuf>, role: ClipRole, target_duration: f64) -> Self {
        Self {
            source: source.into(),
            start_offset: 0.0,
            target_duration,
            crossfade: 0.0,
            role,
        }
    }

    /// Set the crossfade duration.
    pub fn with_crossfade(mut self, crossfade: f64) -> Self {
        self.crossfade = crossfade;
        self
    }

    /// Set the start offset.
    pub fn with_start_offset(mut self, offset: f64) -> Self {
        self.start_offset = offset;
        self
    }

    /// Return a copy with every duration field sanitized.
    pub fn sanitized(&self) -> Self {
        Self {
            source: self.source.clone(),
            start_offset: sanitize_duration(self.start_offset),
            target_duration: sanitize_duration(self.target_duration),
            crossfade: sanitize_duration(self.crossfade),
            role: self.role,
        }
    }

    /// Duration after conforming, given the probed source length.
    pub fn effective_duration(&self, source_duration: f64) -> f64 {
        let target = sanitize_duration(self.target_duration);
        if target > 0.0 {
            target
        } else {
            sanitize_duration(source_duration)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitized_clears_invalid_values() {
        let clip = ClipDescriptor {
            source: "a.mp4".into(),
            start_offset: -2.0,
            target_duration: f64::NAN,
            crossfade: -0.5,
            role: ClipRole::Intro,
        };
        let clean = clip.sanitized();
        assert_eq!(clean.start_offset, 0.0);
        assert_eq!(clean.target_duration, 0.0);
        assert_eq!(clean.crossfade, 0.0);
        assert_eq!(clean.role, ClipRole::Intro);
    }

    #[test]
    fn test_effective_duration_falls_back_to_source() {
        let clip = ClipDescriptor::new("a.mp4", ClipRole::Loop, 0.0);
        assert_eq!(clip.effective_duration(7.5), 7.5);

        let clip = ClipDescriptor::new("a.mp4", ClipRole::Loop, 3.0);
        assert_eq!(clip.effective_duration(7.5), 3.0);
    }

    #[test]
    fn test_role_deserialization() {
        let clip: ClipDescriptor =
            serde_json::from_str(r#"{"source":"a.mp4","target_duration":4.0,"role":"intro"}"#)
                .unwrap();
        assert_eq!(clip.role, ClipRole::Intro);
        assert_eq!(clip.crossfade, 0.0);
    }
}
