//! Loop variants: the loop sequence entered from the intro and from itself.
//!
//! Both variants are cut from one raw loop concatenation of length `R`:
//!
//! ```text
//! fromIntro = blend(introTail, raw[0, xi)) ++ raw[xi, R - xs)
//! fromLoop  = blend(loopTail,  raw[0, xs)) ++ raw[xs, R - xs)
//! ```
//!
//! The loop tail `raw[R - xs, R)` only ever appears inside the next head
//! blend, so repeating `fromLoop` never plays a seam region twice.

use tracing::info;

use crate::context::{Artifact, TimelineContext};
use crate::crossfade::CrossfadeSegmentBuilder;
use crate::error::{TimelineError, TimelineResult};
use crate::plan::Span;
use crate::sequence::{AssembledSequence, SequenceAssembler};

/// The two playable loop units.
#[derive(Debug, Clone)]
pub struct LoopVariants {
    /// Follows the intro sequence once
    pub from_intro: Artifact,
    /// Repeats after `from_intro`, and after itself
    pub from_loop: Artifact,
    /// Head blends that fell back to a fade through black
    pub degraded: usize,
}

/// Derives [`LoopVariants`] from an assembled loop sequence.
pub struct LoopVariantExtractor<'a> {
    ctx: &'a TimelineContext,
}

impl<'a> LoopVariantExtractor<'a> {
    pub fn new(ctx: &'a TimelineContext) -> Self {
        Self { ctx }
    }

    pub async fn extract(
        &self,
        looped: &AssembledSequence,
        intro_tail: Option<&Artifact>,
    ) -> TimelineResult<LoopVariants> {
        let builder = CrossfadeSegmentBuilder::new(self.ctx);
        let assembler = SequenceAssembler::new(self.ctx);
        let raw = &looped.raw;
        let r = raw.duration;
        let xs = looped.tail.as_ref().map(|t| t.duration).unwrap_or(0.0);
        let xi = intro_tail.map(|t| t.duration).unwrap_or(0.0);
        let mut degraded = 0;

        if xi + xs >= r {
            return Err(TimelineError::assembly(
                "loop_variants",
                format!("seams {:.3}s + {:.3}s leave no loop body in {:.3}s", xi, xs, r),
            ));
        }

        // raw[xi, R - xs)
        let intro_core = if xi > 0.0 {
            builder
                .extract(raw, Span::new(xi, r - xs), "loop-core-intro")
                .await?
        } else {
            looped.trimmed.clone()
        };

        let from_intro = match intro_tail {
            Some(tail) if xi > 0.0 => {
                let head_in = builder.extract(raw, Span::new(0.0, xi), "loop-head-intro").await?;
                let (head, quality) = builder.blend(tail, &head_in, xi).await?;
                if quality.is_degraded() {
                    degraded += 1;
                }
                assembler
                    .concat(&[head, intro_core.clone()], "loop-from-intro")
                    .await?
            }
            _ => intro_core.clone(),
        };

        let from_loop = match &looped.tail {
            Some(tail) if xs > 0.0 => {
                // Same core as the intro variant when both seams match
                let core = if (xi - xs).abs() < f64::EPSILON {
                    intro_core
                } else {
                    builder
                        .extract(raw, Span::new(xs, r - xs), "loop-core-loop")
                        .await?
                };
                let head_in = builder.extract(raw, Span::new(0.0, xs), "loop-head-loop").await?;
                let (head, quality) = builder.blend(tail, &head_in, xs).await?;
                if quality.is_degraded() {
                    degraded += 1;
                }
                assembler.concat(&[head, core], "loop-from-loop").await?
            }
            _ => looped.trimmed.clone(),
        };

        info!(
            from_intro = from_intro.duration,
            from_loop = from_loop.duration,
            "Extracted loop variants"
        );

        Ok(LoopVariants {
            from_intro,
            from_loop,
            degraded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::*;
    use crate::plan::RolePlan;
    use loopcast_models::ClipRole;

    async fn loop_sequence(
        ctx: &TimelineContext,
        backend: &loopcast_media::testing::FakeBackend,
        dir: &tempfile::TempDir,
        seam: f64,
    ) -> AssembledSequence {
        let clips = vec![
            artifact(backend, dir, "b.mp4", 4.0).await,
            artifact(backend, dir, "c.mp4", 3.0).await,
        ];
        let plan = RolePlan::new(&[4.0, 3.0], &[1.0, seam]);
        SequenceAssembler::new(ctx)
            .assemble(ClipRole::Loop, &clips, &plan, seam)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_variants_with_intro_and_self_seam() {
        let (ctx, backend, dir) = fake_context().await;
        let looped = loop_sequence(&ctx, &backend, &dir, 1.0).await;
        let intro_tail = artifact(&backend, &dir, "intro-tail.mp4", 1.0).await;

        let variants = LoopVariantExtractor::new(&ctx)
            .extract(&looped, Some(&intro_tail))
            .await
            .unwrap();

        assert!((variants.from_intro.duration - 5.0).abs() < 1e-9);
        assert!((variants.from_loop.duration - 5.0).abs() < 1e-9);
        assert_eq!(variants.degraded, 0);
        // Matching seams share one core extraction
        let cores = backend
            .requests_for("extract")
            .into_iter()
            .filter(|r| r.output.path.to_string_lossy().contains("loop-core"))
            .count();
        assert_eq!(cores, 1);
    }

    #[tokio::test]
    async fn test_no_intro_uses_trimmed_loop() {
        let (ctx, backend, dir) = fake_context().await;
        let looped = loop_sequence(&ctx, &backend, &dir, 1.0).await;

        let variants = LoopVariantExtractor::new(&ctx)
            .extract(&looped, None)
            .await
            .unwrap();
        assert_eq!(variants.from_intro, looped.trimmed);
        assert!((variants.from_loop.duration - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_no_self_seam_repeats_raw_loop() {
        let (ctx, backend, dir) = fake_context().await;
        let looped = loop_sequence(&ctx, &backend, &dir, 0.0).await;

        let variants = LoopVariantExtractor::new(&ctx)
            .extract(&looped, None)
            .await
            .unwrap();
        assert_eq!(variants.from_loop, looped.raw);
        assert!((variants.from_loop.duration - 6.0).abs() < 1e-9);
    }
}
