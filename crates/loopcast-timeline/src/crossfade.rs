//! Crossfade segments: transitions and the bodies around them.

use loopcast_media::filters::{crossfade_graph, fade_through_black_graph};
use loopcast_media::{FilterGraph, InputSpec, OutputSpec, TranscodeRequest};
use serde::Serialize;
use tracing::{debug, warn};

use crate::context::{Artifact, TimelineContext};
use crate::error::TimelineResult;
use crate::plan::{RolePlan, Span};

/// Counter of transitions rendered with the fade-through-black fallback.
pub const DEGRADED_TRANSITIONS_METRIC: &str = "loopcast_degraded_transitions_total";

/// How a transition was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendQuality {
    /// Direct dissolve
    Dissolve,
    /// Dissolve after forcing both inputs onto the canvas
    NormalizedDissolve,
    /// Fade to black then from black; not a dissolve
    FadeThroughBlack,
}

impl BlendQuality {
    pub fn is_degraded(&self) -> bool {
        matches!(self, BlendQuality::FadeThroughBlack)
    }
}

/// Segments derived from one adjacent pair `(A, B)`.
#[derive(Debug, Clone)]
pub struct SegmentTriple {
    /// `A`'s body; only produced for the first pair of a role
    pub body_without_tail: Option<Artifact>,
    /// Dissolve from `A`'s last `d` seconds into `B`'s first `d` seconds;
    /// absent when the pair has no crossfade
    pub transition: Option<Artifact>,
    /// `B`'s body: leading crossfade removed, trailing one too when interior
    pub body_without_head_and_tail: Artifact,
    pub quality: BlendQuality,
}

/// All segments of one role, in playback order.
#[derive(Debug, Clone, Default)]
pub struct RoleSegments {
    pub segments: Vec<Artifact>,
    pub degraded: usize,
}

impl RoleSegments {
    pub fn duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }

    fn push_triple(&mut self, triple: SegmentTriple) {
        self.segments.extend(triple.body_without_tail);
        self.segments.extend(triple.transition);
        self.segments.push(triple.body_without_head_and_tail);
        if triple.quality.is_degraded() {
            self.degraded += 1;
        }
    }
}

/// Cuts bodies and renders transitions for adjacent clip pairs.
pub struct CrossfadeSegmentBuilder<'a> {
    ctx: &'a TimelineContext,
}

impl<'a> CrossfadeSegmentBuilder<'a> {
    pub fn new(ctx: &'a TimelineContext) -> Self {
        Self { ctx }
    }

    /// Cut `span` out of `source`. A span covering the whole source is
    /// returned as-is.
    pub async fn extract(&self, source: &Artifact, span: Span, name: &str) -> TimelineResult<Artifact> {
        let tolerance = self.ctx.canvas().frame_duration() / 2.0;
        if span.start.abs() <= tolerance && (span.end - source.duration).abs() <= tolerance {
            return Ok(source.clone());
        }

        let path = self.ctx.artifact_path(name, "mp4");
        let request = TranscodeRequest::new(
            "extract",
            OutputSpec::video(&path, self.ctx.encoding().clone()).with_duration(span.len()),
        )
        .input(InputSpec::file(&source.path).seek(span.start));
        self.ctx.run(&request).await?;
        Ok(Artifact::new(path, span.len()))
    }

    /// Dissolve `outgoing` into `incoming` over `duration` seconds.
    ///
    /// A failed dissolve is retried on the normalized canvas; if that fails
    /// too, a fade through black of the same length is rendered instead.
    pub async fn blend(
        &self,
        outgoing: &Artifact,
        incoming: &Artifact,
        duration: f64,
    ) -> TimelineResult<(Artifact, BlendQuality)> {
        let canvas = *self.ctx.canvas();
        let attempts = [
            ("blend", crossfade_graph(duration, None), BlendQuality::Dissolve),
            (
                "blend_normalized",
                crossfade_graph(duration, Some(&canvas)),
                BlendQuality::NormalizedDissolve,
            ),
            (
                "fade_splice",
                fade_through_black_graph(duration, &canvas),
                BlendQuality::FadeThroughBlack,
            ),
        ];

        let mut last_error = None;
        for (step, graph, quality) in attempts {
            let path = self.ctx.artifact_path("transition", "mp4");
            let request = TranscodeRequest::new(
                step,
                OutputSpec::video(&path, self.ctx.encoding().clone()).with_duration(duration),
            )
            .input(InputSpec::file(&outgoing.path))
            .input(InputSpec::file(&incoming.path))
            .filter(FilterGraph::Complex {
                graph,
                maps: vec!["[v]".to_string()],
            });

            match self.ctx.run(&request).await {
                Ok(()) => {
                    if quality.is_degraded() {
                        warn!(
                            duration,
                            "Dissolve failed twice, substituted fade through black"
                        );
                        metrics::counter!(DEGRADED_TRANSITIONS_METRIC).increment(1);
                    }
                    return Ok((Artifact::new(path, duration), quality));
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(step, "Transition attempt failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| crate::error::TimelineError::assembly("blend", "no attempts")))
    }

    /// Segments for pair `index` of `plan` (clips `index` and `index + 1`).
    pub async fn build_pair(
        &self,
        clips: &[Artifact],
        plan: &RolePlan,
        index: usize,
    ) -> TimelineResult<SegmentTriple> {
        let a = &clips[index];
        let b = &clips[index + 1];
        let d = plan.crossfades[index];

        let body_without_tail = if index == 0 {
            Some(self.extract(a, plan.bodies[0], "body").await?)
        } else {
            None
        };

        let (transition, quality) = if d > 0.0 {
            let a_out = self
                .extract(a, Span::new(a.duration - d, a.duration), "xfade-out")
                .await?;
            let b_in = self.extract(b, Span::new(0.0, d), "xfade-in").await?;
            let (t, q) = self.blend(&a_out, &b_in, d).await?;
            (Some(t), q)
        } else {
            (None, BlendQuality::Dissolve)
        };

        let body_without_head_and_tail = self.extract(b, plan.bodies[index + 1], "body").await?;

        Ok(SegmentTriple {
            body_without_tail,
            transition,
            body_without_head_and_tail,
            quality,
        })
    }

    /// All segments of a multi-clip role.
    pub async fn build_role(&self, clips: &[Artifact], plan: &RolePlan) -> TimelineResult<RoleSegments> {
        let mut segments = RoleSegments::default();
        if clips.len() < 2 {
            segments.segments.extend(clips.iter().cloned());
            return Ok(segments);
        }

        for index in 0..clips.len() - 1 {
            self.ctx.check_cancelled()?;
            let triple = self.build_pair(clips, plan, index).await?;
            segments.push_triple(triple);
        }

        debug!(
            segments = segments.segments.len(),
            duration = segments.duration(),
            degraded = segments.degraded,
            "Built role segments"
        );
        Ok(segments)
    }
}
