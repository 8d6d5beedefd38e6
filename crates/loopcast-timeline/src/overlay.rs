//! Periodic overlay appearances, rendered as one full-length track per
//! overlay and composited onto the base timeline in a single pass.

use loopcast_media::filters::{overlay_composite_graph, overlay_track_graph};
use loopcast_media::{FilterGraph, InputSpec, OutputSpec, OverlayPiece, TranscodeRequest, VideoOutput};
use loopcast_models::{sanitize_duration, OverlayDescriptor};
use tracing::{debug, info, warn};

use crate::context::{Artifact, TimelineContext};
use crate::error::TimelineResult;
use crate::plan::Span;

/// How far an appearance may run past the end of the timeline.
pub const APPEARANCE_TOLERANCE: f64 = 0.0005;

/// Gaps shorter than this are dropped from the track.
const MIN_FILLER_SECS: f64 = 0.001;

/// Appearance windows of an overlay lasting `appearance` seconds each.
///
/// A period shorter than the appearance truncates every appearance to the
/// period so windows never overlap. A period shorter than `min_period`
/// (one frame) is ignored and the overlay appears once.
pub fn appearance_windows(
    overlay: &OverlayDescriptor,
    appearance: f64,
    target: f64,
    min_period: f64,
) -> Vec<Span> {
    let target = sanitize_duration(target);
    let start = sanitize_duration(overlay.first_offset);
    let mut period = if overlay.period.is_finite() { overlay.period } else { 0.0 };
    if period > 0.0 && period < min_period {
        warn!(
            overlay = %overlay.source.display(),
            period,
            min_period,
            "Overlay period shorter than one frame, showing it once"
        );
        period = 0.0;
    }
    let mut duration = sanitize_duration(appearance);
    if period > 0.0 {
        duration = duration.min(period);
    }
    if duration <= 0.0 {
        return Vec::new();
    }

    let fits = |s: f64| s + duration <= target + APPEARANCE_TOLERANCE;
    let window = |s: f64| Span::new(s, (s + duration).min(target));

    if period <= 0.0 {
        return if fits(start) { vec![window(start)] } else { Vec::new() };
    }

    let mut windows = Vec::new();
    let mut k = 0u64;
    loop {
        let s = start + k as f64 * period;
        if !fits(s) {
            break;
        }
        windows.push(window(s));
        k += 1;
    }
    windows
}

/// Track layout: transparent fillers around every window, `target` long.
pub fn track_pieces(windows: &[Span], target: f64) -> Vec<OverlayPiece> {
    let mut pieces = Vec::with_capacity(windows.len() * 2 + 1);
    let mut cursor = 0.0;
    for window in windows {
        let gap = window.start - cursor;
        if gap >= MIN_FILLER_SECS {
            pieces.push(OverlayPiece::Filler(gap));
        }
        pieces.push(OverlayPiece::Appearance(window.len()));
        cursor = window.end;
    }
    let rest = target - cursor;
    if rest >= MIN_FILLER_SECS {
        pieces.push(OverlayPiece::Filler(rest));
    }
    pieces
}

/// A rendered full-length overlay track.
#[derive(Debug, Clone)]
pub struct OverlayTrack {
    pub descriptor: OverlayDescriptor,
    pub artifact: Artifact,
    pub appearances: usize,
}

/// Builds overlay tracks and composites them.
pub struct OverlayScheduler<'a> {
    ctx: &'a TimelineContext,
}

impl<'a> OverlayScheduler<'a> {
    pub fn new(ctx: &'a TimelineContext) -> Self {
        Self { ctx }
    }

    /// Render one overlay's track. `None` when no appearance fits.
    pub async fn build_track(
        &self,
        overlay: &OverlayDescriptor,
        target: f64,
    ) -> TimelineResult<Option<OverlayTrack>> {
        let info = self.ctx.probe(&overlay.source).await?;
        let appearance = overlay.effective_appearance(info.duration);
        let windows =
            appearance_windows(overlay, appearance, target, self.ctx.canvas().frame_duration());
        if windows.is_empty() {
            warn!(
                overlay = %overlay.source.display(),
                appearance,
                target,
                "Overlay has no appearance inside the timeline"
            );
            return Ok(None);
        }

        let pieces = track_pieces(&windows, target);
        debug!(
            overlay = %overlay.source.display(),
            appearances = windows.len(),
            pieces = pieces.len(),
            "Scheduling overlay"
        );

        let path = self.ctx.artifact_path("overlay-track", "mov");
        let request = TranscodeRequest::new(
            "overlay_track",
            OutputSpec::video(&path, self.ctx.encoding().clone())
                .with_video(VideoOutput::Alpha)
                .with_duration(target),
        )
        .input(InputSpec::file(&overlay.source))
        .filter(FilterGraph::Complex {
            graph: overlay_track_graph(&pieces, self.ctx.canvas()),
            maps: vec!["[v]".to_string()],
        });
        self.ctx.run(&request).await?;

        Ok(Some(OverlayTrack {
            descriptor: overlay.clone(),
            artifact: Artifact::new(path, target),
            appearances: windows.len(),
        }))
    }

    /// Composite every track onto `base` in one backend call.
    pub async fn composite(&self, base: &Artifact, tracks: &[OverlayTrack]) -> TimelineResult<Artifact> {
        if tracks.is_empty() {
            return Ok(base.clone());
        }

        let path = self.ctx.artifact_path("overlaid", "mp4");
        let mut request = TranscodeRequest::new(
            "overlay_composite",
            OutputSpec::video(&path, self.ctx.encoding().clone()).with_duration(base.duration),
        )
        .input(InputSpec::file(&base.path));
        for track in tracks {
            request = request.input(InputSpec::file(&track.artifact.path));
        }
        let request = request.filter(FilterGraph::Complex {
            graph: overlay_composite_graph(tracks.len()),
            maps: vec!["[v]".to_string()],
        });
        self.ctx.run(&request).await?;
        Ok(Artifact::new(path, base.duration))
    }

    /// Schedule and composite all overlays; returns the result and the
    /// appearance count of each overlay in request order.
    pub async fn apply(
        &self,
        base: &Artifact,
        overlays: &[OverlayDescriptor],
        target: f64,
    ) -> TimelineResult<(Artifact, Vec<usize>)> {
        let mut tracks = Vec::new();
        let mut counts = Vec::with_capacity(overlays.len());
        for overlay in overlays {
            self.ctx.check_cancelled()?;
            match self.build_track(overlay, target).await? {
                Some(track) => {
                    counts.push(track.appearances);
                    tracks.push(track);
                }
                None => counts.push(0),
            }
        }

        let result = self.composite(base, &tracks).await?;
        info!(overlays = overlays.len(), tracks = tracks.len(), "Composited overlays");
        Ok((result, counts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::*;
    use loopcast_media::{FfmpegBackend, INLINE_GRAPH_LIMIT};
    use loopcast_models::Canvas;

    fn frame() -> f64 {
        Canvas::default().frame_duration()
    }

    fn expected_count(t: f64, s: f64, d: f64, f: f64) -> usize {
        if s + d > t {
            0
        } else {
            ((t - s - d) / f).floor() as usize + 1
        }
    }

    #[test]
    fn test_periodic_count_matches_formula() {
        for (t, s, d, f) in [
            (30.0, 0.0, 2.0, 5.0),
            (30.0, 3.0, 2.0, 7.0),
            (60.0, 10.0, 4.0, 4.0),
            (10.0, 9.0, 2.0, 5.0),
            (3600.0, 1.5, 3.0, 45.0),
        ] {
            let overlay = OverlayDescriptor::new("o.mov")
                .with_first_offset(s)
                .with_period(f);
            let windows = appearance_windows(&overlay, d, t, frame());
            assert_eq!(windows.len(), expected_count(t, s, d, f), "t={} s={} d={} f={}", t, s, d, f);
            for w in &windows {
                assert!(w.end <= t + APPEARANCE_TOLERANCE);
            }
        }
    }

    #[test]
    fn test_single_appearance_without_period() {
        let overlay = OverlayDescriptor::new("o.mov").with_first_offset(4.0);
        assert_eq!(appearance_windows(&overlay, 3.0, 30.0, frame()), vec![Span::new(4.0, 7.0)]);
        assert!(appearance_windows(&overlay, 3.0, 6.0, frame()).is_empty());
    }

    #[test]
    fn test_appearance_longer_than_period_is_truncated() {
        let overlay = OverlayDescriptor::new("o.mov").with_period(2.0);
        let windows = appearance_windows(&overlay, 5.0, 10.0, frame());
        assert_eq!(windows.len(), 5);
        assert!(windows.iter().all(|w| (w.len() - 2.0).abs() < 1e-9));
    }

    #[test]
    fn test_sub_frame_period_shows_once() {
        let overlay = OverlayDescriptor::new("o.mov")
            .with_first_offset(2.0)
            .with_period(1e-3);
        let windows = appearance_windows(&overlay, 0.5, 3600.0, frame());
        assert_eq!(windows, vec![Span::new(2.0, 2.5)]);

        let one_frame = OverlayDescriptor::new("o.mov").with_period(frame());
        let windows = appearance_windows(&one_frame, 0.5, 1.0, frame());
        assert!(windows.len() > 1);
        assert!(windows.iter().all(|w| w.len() <= frame() + 1e-12));
    }

    #[test]
    fn test_pieces_cover_target() {
        let overlay = OverlayDescriptor::new("o.mov")
            .with_first_offset(1.0)
            .with_period(10.0);
        let windows = appearance_windows(&overlay, 2.0, 20.0, frame());
        let pieces = track_pieces(&windows, 20.0);
        assert_eq!(
            pieces,
            vec![
                OverlayPiece::Filler(1.0),
                OverlayPiece::Appearance(2.0),
                OverlayPiece::Filler(8.0),
                OverlayPiece::Appearance(2.0),
                OverlayPiece::Filler(7.0),
            ]
        );
        let total: f64 = pieces
            .iter()
            .map(|p| match p {
                OverlayPiece::Filler(d) | OverlayPiece::Appearance(d) => *d,
            })
            .sum();
        assert!((total - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_composite_is_one_call_for_many_appearances() {
        let (ctx, backend, dir) = fake_context().await;
        let base = artifact(&backend, &dir, "base.mp4", 60.0).await;
        let logo = source(&backend, &dir, "logo.mov", 3.0).await;
        let badge = source(&backend, &dir, "badge.mov", 1.0).await;
        let overlays = vec![
            OverlayDescriptor::new(&logo).with_period(5.0),
            OverlayDescriptor::new(&badge).with_first_offset(59.5),
        ];

        let (result, counts) = OverlayScheduler::new(&ctx)
            .apply(&base, &overlays, 60.0)
            .await
            .unwrap();

        assert_eq!(counts, vec![12, 0]);
        assert_eq!(result.duration, 60.0);
        assert_eq!(backend.requests_for("overlay_track").len(), 1);
        let composite = backend.requests_for("overlay_composite");
        assert_eq!(composite.len(), 1);
        assert_eq!(composite[0].inputs.len(), 2);

        let track = &backend.requests_for("overlay_track")[0];
        assert_eq!(track.output.video, VideoOutput::Alpha);
        assert_eq!(track.output.duration, Some(60.0));
    }

    #[tokio::test]
    async fn test_hour_long_track_graph_is_passed_as_script() {
        let (ctx, backend, dir) = fake_context().await;
        let logo = source(&backend, &dir, "logo.mov", 3.0).await;
        let overlay = OverlayDescriptor::new(&logo).with_period(5.0);

        let track = OverlayScheduler::new(&ctx)
            .build_track(&overlay, 3600.0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(track.appearances, 720);

        let requests = backend.requests_for("overlay_track");
        assert_eq!(requests.len(), 1);
        match &requests[0].filter {
            Some(FilterGraph::Complex { graph, .. }) => assert!(graph.len() > INLINE_GRAPH_LIMIT),
            other => panic!("unexpected filter {:?}", other),
        }
        assert!(FfmpegBackend::graph_script_path(&requests[0]).is_some());
        let args = FfmpegBackend::build_command(&requests[0]).build_args();
        assert!(args.iter().all(|a| a.len() < 131_072));
    }

    #[tokio::test]
    async fn test_no_overlays_returns_base() {
        let (ctx, backend, dir) = fake_context().await;
        let base = artifact(&backend, &dir, "base.mp4", 10.0).await;
        let (result, counts) = OverlayScheduler::new(&ctx)
            .apply(&base, &[], 10.0)
            .await
            .unwrap();
        assert_eq!(result, base);
        assert!(counts.is_empty());
        assert!(backend.requests().is_empty());
    }
}
