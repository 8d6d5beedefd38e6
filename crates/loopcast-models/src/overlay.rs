//! Overlay descriptors.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::duration::sanitize_duration;

/// A graphic that appears periodically over the base timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayDescriptor {
    /// Overlay media file (alpha is preserved when present)
    pub source: PathBuf,

    /// How long each appearance lasts. `0` uses the source's native length.
    #[serde(default)]
    pub appearance_duration: f64,

    /// Seconds between appearance starts. `<= 0` means a single appearance.
    #[serde(default)]
    pub period: f64,

    /// Start of the first appearance
    #[serde(default)]
    pub first_offset: f64,
}

impl OverlayDescriptor {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            appearance_duration: 0.0,
            period: 0.0,
            first_offset: 0.0,
        }
    }

    pub fn with_period(mut self, period: f64) -> Self {
        self.period = period;
        self
    }

    pub fn with_first_offset(mut self, offset: f64) -> Self {
        self.first_offset = offset;
        self
    }

    pub fn with_appearance_duration(mut self, duration: f64) -> Self {
        self.appearance_duration = duration;
        self
    }

    /// Appearance length clamped to the source length.
    pub fn effective_appearance(&self, source_duration: f64) -> f64 {
        let source_duration = sanitize_duration(source_duration);
        let requested = sanitize_duration(self.appearance_duration);
        if requested <= 0.0 {
            source_duration
        } else {
            requested.min(source_duration)
        }
    }
}
