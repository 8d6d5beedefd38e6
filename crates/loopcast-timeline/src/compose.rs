//! Shared front half of the render and stream paths: canvas, clips,
//! sequences and loop variants.

use loopcast_models::{Canvas, ClipDescriptor, ClipRole};
use tracing::{info, warn};

use crate::conform::{ClipConformer, ConformedClip, ResolvedClip};
use crate::context::{Artifact, TimelineContext};
use crate::error::{TimelineError, TimelineResult};
use crate::loop_variant::{LoopVariantExtractor, LoopVariants};
use crate::plan::{RolePlan, TimelinePlan};
use crate::sequence::{AssembledSequence, SequenceAssembler};

/// Probed clips of both roles.
#[derive(Debug, Clone, Default)]
pub struct ResolvedRoles {
    pub intro: Vec<ResolvedClip>,
    pub looped: Vec<ResolvedClip>,
}

impl ResolvedRoles {
    pub fn len(&self) -> usize {
        self.intro.len() + self.looped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Conformed clips of both roles and the seam layout derived from them.
#[derive(Debug, Clone)]
pub struct ConformedRoles {
    pub intro: Vec<ConformedClip>,
    pub looped: Vec<ConformedClip>,
    pub plan: TimelinePlan,
}

/// Everything the timeline is cut from.
#[derive(Debug, Clone)]
pub struct ComposedSequences {
    pub intro: Option<AssembledSequence>,
    pub looped: Option<AssembledSequence>,
    pub variants: Option<LoopVariants>,
    pub plan: TimelinePlan,
}

impl ComposedSequences {
    /// Intro as it plays on the timeline, tail excised.
    pub fn intro_artifact(&self) -> Option<&Artifact> {
        self.intro.as_ref().map(|s| &s.trimmed)
    }

    /// Transitions rendered as a fade through black.
    pub fn degraded(&self) -> usize {
        self.intro.as_ref().map(|s| s.degraded).unwrap_or(0)
            + self.looped.as_ref().map(|s| s.degraded).unwrap_or(0)
            + self.variants.as_ref().map(|v| v.degraded).unwrap_or(0)
    }
}

/// Drives conformer, assembler and extractor over both roles.
pub struct TimelineComposer<'a> {
    ctx: &'a TimelineContext,
}

impl<'a> TimelineComposer<'a> {
    pub fn new(ctx: &'a TimelineContext) -> Self {
        Self { ctx }
    }

    /// Canvas every artifact is normalized to: `pinned` when given,
    /// otherwise the first clip's geometry.
    pub async fn resolve_canvas(
        &self,
        clips: &[ClipDescriptor],
        pinned: Option<Canvas>,
    ) -> TimelineResult<Canvas> {
        if let Some(canvas) = pinned {
            return Ok(Canvas::from_probe(canvas.width, canvas.height, canvas.fps));
        }
        let Some(first) = clips.first() else {
            return Ok(Canvas::default());
        };
        let canvas = match self.ctx.probe(&first.source).await {
            Ok(info) => Canvas::from_probe(info.width, info.height, info.fps),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(source = %first.source.display(), "Canvas probe failed, using default: {}", e);
                Canvas::default()
            }
        };
        info!(width = canvas.width, height = canvas.height, fps = canvas.fps, "Resolved canvas");
        Ok(canvas)
    }

    /// Probe every clip. The first missing or unreadable source aborts.
    pub async fn resolve(
        &self,
        intro: &[ClipDescriptor],
        looped: &[ClipDescriptor],
    ) -> TimelineResult<ResolvedRoles> {
        if intro.is_empty() && looped.is_empty() {
            return Err(TimelineError::InvalidRequest("no clips".to_string()));
        }
        let conformer = ClipConformer::new(self.ctx);
        let mut roles = ResolvedRoles::default();
        for clip in intro {
            roles.intro.push(conformer.resolve(clip).await?);
        }
        for clip in looped {
            roles.looped.push(conformer.resolve(clip).await?);
        }
        Ok(roles)
    }

    /// Conform every clip and lay out crossfades and seams.
    pub async fn conform(&self, roles: &ResolvedRoles) -> TimelineResult<ConformedRoles> {
        let conformer = ClipConformer::new(self.ctx);
        let mut intro = Vec::with_capacity(roles.intro.len());
        for clip in &roles.intro {
            self.ctx.check_cancelled()?;
            intro.push(conformer.conform(clip).await?);
        }
        let mut looped = Vec::with_capacity(roles.looped.len());
        for clip in &roles.looped {
            self.ctx.check_cancelled()?;
            looped.push(conformer.conform(clip).await?);
        }

        let plan = TimelinePlan::new(
            role_plan(&intro),
            role_plan(&looped),
            last_crossfade(&intro),
            last_crossfade(&looped),
        );
        Ok(ConformedRoles { intro, looped, plan })
    }

    /// Assemble both role sequences and, when there is a loop, its variants.
    pub async fn sequences(&self, roles: &ConformedRoles) -> TimelineResult<ComposedSequences> {
        let assembler = SequenceAssembler::new(self.ctx);
        let plan = &roles.plan;

        let intro = match &plan.intro {
            Some(role) => {
                let clips = artifacts(&roles.intro);
                Some(
                    assembler
                        .assemble(ClipRole::Intro, &clips, role, plan.intro_tail)
                        .await?,
                )
            }
            None => None,
        };

        self.ctx.check_cancelled()?;
        let looped = match &plan.looped {
            Some(role) => {
                let clips = artifacts(&roles.looped);
                Some(
                    assembler
                        .assemble(ClipRole::Loop, &clips, role, plan.self_seam)
                        .await?,
                )
            }
            None => None,
        };

        self.ctx.check_cancelled()?;
        let variants = match &looped {
            Some(sequence) => {
                let intro_tail = intro.as_ref().and_then(|s| s.tail.as_ref());
                Some(
                    LoopVariantExtractor::new(self.ctx)
                        .extract(sequence, intro_tail)
                        .await?,
                )
            }
            None => None,
        };

        Ok(ComposedSequences {
            intro,
            looped,
            variants,
            plan: plan.clone(),
        })
    }
}

/// Rough number of backend calls [`TimelineComposer::sequences`] makes,
/// used to size stage progress.
pub fn estimate_sequence_steps(plan: &TimelinePlan) -> usize {
    let role_steps = |role: &Option<RolePlan>, tail: f64| match role {
        Some(r) if r.len() >= 2 => (r.len() - 1) * 4 + 2 + if tail > 0.0 { 2 } else { 0 },
        Some(_) if tail > 0.0 => 2,
        _ => 0,
    };
    let mut steps = role_steps(&plan.intro, plan.intro_tail) + role_steps(&plan.looped, plan.self_seam);
    if plan.intro_tail > 0.0 {
        steps += 4;
    }
    if plan.self_seam > 0.0 {
        steps += 4;
    }
    steps
}

fn role_plan(clips: &[ConformedClip]) -> Option<RolePlan> {
    if clips.is_empty() {
        return None;
    }
    let durations: Vec<f64> = clips.iter().map(ConformedClip::duration).collect();
    let requested: Vec<f64> = clips.iter().map(|c| c.descriptor.crossfade).collect();
    Some(RolePlan::new(&durations, &requested))
}

fn last_crossfade(clips: &[ConformedClip]) -> f64 {
    clips.last().map(|c| c.descriptor.crossfade).unwrap_or(0.0)
}

fn artifacts(clips: &[ConformedClip]) -> Vec<Artifact> {
    clips.iter().map(|c| c.artifact.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::*;
    use loopcast_media::MediaInfo;

    #[tokio::test]
    // Both loop units are 5 s (R - xs); the 1 s seam tail is only heard
    // inside the blend that opens the next repetition.
    async fn test_example_sequences_exclude_seam_tail() {
        let (mut ctx, backend, dir) = fake_context().await;
        let a = source(&backend, &dir, "a.mp4", 10.0).await;
        let b = source(&backend, &dir, "b.mp4", 10.0).await;
        let c = source(&backend, &dir, "c.mp4", 10.0).await;
        let intro = vec![ClipDescriptor::new(&a, ClipRole::Intro, 5.0).with_crossfade(1.0)];
        let looped = vec![
            ClipDescriptor::new(&b, ClipRole::Loop, 4.0).with_crossfade(1.0),
            ClipDescriptor::new(&c, ClipRole::Loop, 3.0).with_crossfade(1.0),
        ];

        let composer = TimelineComposer::new(&ctx);
        let canvas = composer.resolve_canvas(&intro, None).await.unwrap();
        ctx.set_canvas(canvas);

        let composer = TimelineComposer::new(&ctx);
        let roles = composer.resolve(&intro, &looped).await.unwrap();
        let conformed = composer.conform(&roles).await.unwrap();
        assert_eq!(backend.requests_for("conform").len(), 3);

        let sequences = composer.sequences(&conformed).await.unwrap();
        let variants = sequences.variants.as_ref().unwrap();
        assert!((sequences.intro_artifact().unwrap().duration - 4.0).abs() < 1e-9);
        assert!((sequences.looped.as_ref().unwrap().raw.duration - 6.0).abs() < 1e-9);
        assert!((variants.from_intro.duration - 5.0).abs() < 1e-9);
        assert!((variants.from_loop.duration - 5.0).abs() < 1e-9);
        assert_eq!(sequences.degraded(), 0);
    }

    #[tokio::test]
    async fn test_intro_only_has_no_variants() {
        let (ctx, backend, dir) = fake_context().await;
        let a = source(&backend, &dir, "a.mp4", 10.0).await;
        let intro = vec![ClipDescriptor::new(&a, ClipRole::Intro, 5.0).with_crossfade(1.0)];

        let composer = TimelineComposer::new(&ctx);
        let roles = composer.resolve(&intro, &[]).await.unwrap();
        let conformed = composer.conform(&roles).await.unwrap();
        let sequences = composer.sequences(&conformed).await.unwrap();

        assert!(sequences.variants.is_none());
        assert_eq!(sequences.intro_artifact().unwrap().duration, 5.0);
        assert!(backend.requests_for("extract").is_empty());
    }

    #[tokio::test]
    async fn test_canvas_from_first_clip_or_pinned() {
        let (ctx, backend, dir) = fake_context().await;
        let a = dir.path().join("a.mp4");
        tokio::fs::write(&a, b"x").await.unwrap();
        backend.register_probe(&a, MediaInfo::video(5.0, 1281, 720, 25.0));
        let clips = vec![ClipDescriptor::new(&a, ClipRole::Loop, 5.0)];

        let composer = TimelineComposer::new(&ctx);
        assert_eq!(
            composer.resolve_canvas(&clips, None).await.unwrap(),
            Canvas::new(1280, 720, 25.0)
        );
        assert_eq!(
            composer
                .resolve_canvas(&clips, Some(Canvas::new(640, 360, 24.0)))
                .await
                .unwrap(),
            Canvas::new(640, 360, 24.0)
        );

        let missing = vec![ClipDescriptor::new(dir.path().join("gone.mp4"), ClipRole::Loop, 5.0)];
        assert_eq!(composer.resolve_canvas(&missing, None).await.unwrap(), Canvas::default());
    }

    #[test]
    fn test_step_estimate_counts_seams() {
        let plan = TimelinePlan::new(
            Some(RolePlan::new(&[5.0], &[1.0])),
            Some(RolePlan::new(&[4.0, 3.0], &[1.0, 1.0])),
            1.0,
            1.0,
        );
        assert_eq!(estimate_sequence_steps(&plan), 2 + 8 + 4 + 4);
    }
}
