//! Duration sanitization shared by every planner.

/// Minimum length of any body segment; shorter results are clamped up to this.
pub const MIN_SEGMENT_SECS: f64 = 0.1;

/// Sanitize a duration: non-finite or non-positive values become `0.0`.
pub fn sanitize_duration(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

/// Sanitize a start offset against a source length.
///
/// Negative or non-finite offsets become `0.0`. Offsets past the end of the
/// source wrap around, since conformed clips may loop their source.
pub fn sanitize_offset(offset: f64, source_duration: f64) -> f64 {
    let offset = sanitize_duration(offset);
    let source_duration = sanitize_duration(source_duration);
    if source_duration <= 0.0 || offset < source_duration {
        return offset;
    }
    offset % source_duration
}
