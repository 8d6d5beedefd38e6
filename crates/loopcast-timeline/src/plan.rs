//! Duration arithmetic for roles, seams and loop units.
//!
//! Clip `i`'s crossfade blends its tail into clip `i + 1`. Inside a role:
//!
//! ```text
//! body_0     = C_0[0, D_0 - x_0)
//! body_i     = C_i[x_{i-1}, D_i - x_i)
//! body_last  = C_last[x_{n-2}, D_last)          (tail kept, trimmed later)
//! raw length = sum(D) - sum(internal x)
//! ```

use loopcast_models::MIN_SEGMENT_SECS;

/// A half-open time range in clip-local seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub start: f64,
    pub end: f64,
}

impl Span {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> f64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 0.0
    }
}

/// Largest crossfade two neighbours can share, leaving each a minimal body.
pub fn clamp_crossfade(requested: f64, len_a: f64, len_b: f64) -> f64 {
    let limit = (len_a.min(len_b) - MIN_SEGMENT_SECS).max(0.0);
    requested.clamp(0.0, limit)
}

/// Body span of a clip with `head` removed at the start and `tail` at the end,
/// clamped to the minimum segment length.
fn body_span(len: f64, head: f64, tail: f64) -> Span {
    let mut span = Span::new(head, len - tail);
    if span.len() < MIN_SEGMENT_SECS {
        span.end = (span.start + MIN_SEGMENT_SECS).min(len);
        span.start = (span.end - MIN_SEGMENT_SECS).max(0.0);
    }
    span
}

/// Segment layout of one role.
#[derive(Debug, Clone, PartialEq)]
pub struct RolePlan {
    /// Conformed clip lengths
    pub durations: Vec<f64>,
    /// Clamped crossfade between clip `i` and `i + 1`
    pub crossfades: Vec<f64>,
    /// Body of each clip in clip-local time
    pub bodies: Vec<Span>,
}

impl RolePlan {
    /// Lay out a role from conformed lengths and requested crossfades
    /// (`requested[i]` belongs to clip `i`; the last entry is ignored here).
    pub fn new(durations: &[f64], requested: &[f64]) -> Self {
        let n = durations.len();
        let crossfades: Vec<f64> = (0..n.saturating_sub(1))
            .map(|i| {
                clamp_crossfade(
                    requested.get(i).copied().unwrap_or(0.0),
                    durations[i],
                    durations[i + 1],
                )
            })
            .collect();

        let bodies = (0..n)
            .map(|i| {
                let head = if i == 0 { 0.0 } else { crossfades[i - 1] };
                let tail = crossfades.get(i).copied().unwrap_or(0.0);
                body_span(durations[i], head, tail)
            })
            .collect();

        Self {
            durations: durations.to_vec(),
            crossfades,
            bodies,
        }
    }

    pub fn len(&self) -> usize {
        self.durations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }

    /// Length of the raw concatenation: all bodies plus all transitions.
    pub fn raw_duration(&self) -> f64 {
        self.bodies.iter().map(Span::len).sum::<f64>() + self.crossfades.iter().sum::<f64>()
    }

    /// Length of the last clip's body (which still carries the role tail).
    pub fn last_body(&self) -> f64 {
        self.bodies.last().map(Span::len).unwrap_or(0.0)
    }
}

/// Seams between roles and the resulting loop-unit lengths.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelinePlan {
    pub intro: Option<RolePlan>,
    pub looped: Option<RolePlan>,
    /// Crossfade from the intro's tail into the loop head
    pub intro_tail: f64,
    /// Crossfade from the loop's tail back into its own head
    pub self_seam: f64,
}

impl TimelinePlan {
    /// Build from both roles and the requested role-tail crossfades.
    ///
    /// The intro tail is only used when a loop follows; the self seam needs
    /// at least two loop clips.
    pub fn new(
        intro: Option<RolePlan>,
        looped: Option<RolePlan>,
        intro_tail_requested: f64,
        self_seam_requested: f64,
    ) -> Self {
        let mut self_seam = 0.0;
        let mut intro_tail = 0.0;

        if let Some(l) = &looped {
            if l.len() >= 2 {
                let raw = l.raw_duration();
                let limit = (l.last_body() - MIN_SEGMENT_SECS)
                    .min((raw - MIN_SEGMENT_SECS) / 2.0)
                    .max(0.0);
                self_seam = self_seam_requested.clamp(0.0, limit);
            }
            if let Some(i) = &intro {
                let limit = (i.last_body() - MIN_SEGMENT_SECS)
                    .min(l.raw_duration() - self_seam - MIN_SEGMENT_SECS)
                    .max(0.0);
                intro_tail = intro_tail_requested.clamp(0.0, limit);
            }
        }

        Self {
            intro,
            looped,
            intro_tail,
            self_seam,
        }
    }

    /// Length of the intro sequence on the timeline (tail excised).
    pub fn intro_duration(&self) -> f64 {
        self.intro
            .as_ref()
            .map(|i| i.raw_duration() - self.intro_tail)
            .unwrap_or(0.0)
    }

    /// Raw loop length `R`.
    pub fn loop_raw_duration(&self) -> f64 {
        self.looped.as_ref().map(RolePlan::raw_duration).unwrap_or(0.0)
    }

    /// `loopFromIntro` length: intro-seam head plus `raw[xi, R - xs)`.
    pub fn loop_from_intro_duration(&self) -> f64 {
        if self.looped.is_none() {
            return 0.0;
        }
        self.loop_raw_duration() - self.self_seam
    }

    /// `loopFromLoop` length: self-seam head plus `raw[xs, R - xs)`.
    pub fn loop_from_loop_duration(&self) -> f64 {
        self.loop_from_intro_duration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_role_segments_sum_to_role_duration() {
        let plan = RolePlan::new(&[4.0, 3.0, 5.0], &[1.0, 0.5, 2.0]);
        assert_eq!(plan.crossfades, vec![1.0, 0.5]);
        let emitted: f64 =
            plan.bodies.iter().map(Span::len).sum::<f64>() + plan.crossfades.iter().sum::<f64>();
        assert!((emitted - (12.0 - 1.5)).abs() < EPS);
        assert_eq!(plan.bodies[0], Span::new(0.0, 3.0));
        assert_eq!(plan.bodies[1], Span::new(1.0, 2.5));
        assert_eq!(plan.bodies[2], Span::new(0.5, 5.0));
    }

    #[test]
    fn test_crossfade_clamped_to_neighbours() {
        assert!((clamp_crossfade(5.0, 2.0, 3.0) - 1.9).abs() < EPS);
        assert_eq!(clamp_crossfade(1.0, 0.05, 3.0), 0.0);
        assert_eq!(clamp_crossfade(-1.0, 4.0, 4.0), 0.0);

        let plan = RolePlan::new(&[1.0, 1.0], &[3.0]);
        for (i, x) in plan.crossfades.iter().enumerate() {
            assert!(*x <= plan.durations[i] && *x <= plan.durations[i + 1]);
        }
    }

    #[test]
    fn test_short_interior_body_is_clamped() {
        // Both neighbours claim most of the middle clip
        let plan = RolePlan::new(&[5.0, 1.0, 5.0], &[0.9, 0.9]);
        let middle = plan.bodies[1];
        assert!((middle.len() - MIN_SEGMENT_SECS).abs() < EPS);
        assert!(middle.start >= 0.0 && middle.end <= 1.0);
    }

    #[test]
    fn test_single_clip_role() {
        let plan = RolePlan::new(&[5.0], &[1.0]);
        assert!(plan.crossfades.is_empty());
        assert_eq!(plan.raw_duration(), 5.0);
    }

    #[test]
    // The loop unit is R - xs (5 s here), not R: the seam tail only plays
    // inside the next head blend, so a unit of ~6 s would play it twice.
    fn test_example_loop_units_exclude_seam_tail() {
        let intro = RolePlan::new(&[5.0], &[1.0]);
        let looped = RolePlan::new(&[4.0, 3.0], &[1.0, 1.0]);
        let plan = TimelinePlan::new(Some(intro), Some(looped), 1.0, 1.0);

        assert_eq!(plan.intro_tail, 1.0);
        assert_eq!(plan.self_seam, 1.0);
        assert!((plan.intro_duration() - 4.0).abs() < EPS);
        assert!((plan.loop_raw_duration() - 6.0).abs() < EPS);
        assert!((plan.loop_from_intro_duration() - 5.0).abs() < EPS);
        assert!((plan.loop_from_loop_duration() - 5.0).abs() < EPS);
        assert!(
            (plan.loop_from_loop_duration() + plan.self_seam - plan.loop_raw_duration()).abs() < EPS
        );
    }

    #[test]
    fn test_single_loop_clip_has_no_self_seam() {
        let looped = RolePlan::new(&[4.0], &[1.0]);
        let plan = TimelinePlan::new(None, Some(looped), 0.0, 1.0);
        assert_eq!(plan.self_seam, 0.0);
        assert_eq!(plan.intro_tail, 0.0);
        assert_eq!(plan.loop_from_loop_duration(), 4.0);
    }

    #[test]
    fn test_intro_only_has_no_tail() {
        let intro = RolePlan::new(&[5.0], &[1.0]);
        let plan = TimelinePlan::new(Some(intro), None, 1.0, 0.0);
        assert_eq!(plan.intro_tail, 0.0);
        assert_eq!(plan.intro_duration(), 5.0);
        assert_eq!(plan.loop_from_loop_duration(), 0.0);
    }
}
