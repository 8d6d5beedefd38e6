//! Loop repetition: the fewest loop units that reach the target, then an
//! exact trim.

use loopcast_media::{InputSpec, OutputSpec, TranscodeRequest};
use serde::Serialize;
use tracing::info;

use crate::context::{Artifact, TimelineContext};
use crate::error::{TimelineError, TimelineResult};
use crate::loop_variant::LoopVariants;
use crate::sequence::SequenceAssembler;

/// Slack absorbing float noise in duration sums.
pub const DURATION_EPSILON: f64 = 1e-6;

/// Minimal repeat count of `from_loop` after `intro` and `from_intro`.
///
/// Zero when the intro plus the first loop unit already reach `target`.
pub fn plan_repeats(target: f64, intro: f64, from_intro: f64, from_loop: f64) -> usize {
    if from_loop <= 0.0 {
        return 0;
    }
    let missing = target - intro - from_intro;
    if missing <= DURATION_EPSILON {
        return 0;
    }
    (missing / from_loop - DURATION_EPSILON).ceil().max(0.0) as usize
}

/// How the provisional timeline was built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RepetitionPlan {
    pub repeats: usize,
    /// Length before the exact trim
    pub provisional_duration: f64,
}

impl RepetitionPlan {
    pub fn new(target: f64, intro: f64, from_intro: f64, from_loop: f64) -> Self {
        let repeats = plan_repeats(target, intro, from_intro, from_loop);
        Self {
            repeats,
            provisional_duration: intro + from_intro + from_loop * repeats as f64,
        }
    }
}

/// Builds the provisional timeline and trims it to the target.
pub struct RepetitionPlanner<'a> {
    ctx: &'a TimelineContext,
}

impl<'a> RepetitionPlanner<'a> {
    pub fn new(ctx: &'a TimelineContext) -> Self {
        Self { ctx }
    }

    /// Timeline of exactly `target` seconds.
    ///
    /// Without loop variants the intro is trimmed on its own; a target the
    /// intro cannot cover is rejected.
    pub async fn assemble(
        &self,
        target: f64,
        intro: Option<&Artifact>,
        variants: Option<&LoopVariants>,
    ) -> TimelineResult<(Artifact, RepetitionPlan)> {
        let tolerance = self.ctx.canvas().frame_duration() / 2.0;

        let Some(variants) = variants else {
            let intro = intro.ok_or_else(|| {
                TimelineError::InvalidRequest("timeline has neither intro nor loop clips".into())
            })?;
            if target > intro.duration + tolerance {
                return Err(TimelineError::InvalidRequest(format!(
                    "target {:.3}s exceeds intro {:.3}s and there are no loop clips",
                    target, intro.duration
                )));
            }
            let plan = RepetitionPlan {
                repeats: 0,
                provisional_duration: intro.duration,
            };
            let timeline = self.trim(intro, target).await?;
            return Ok((timeline, plan));
        };

        if variants.from_loop.duration <= 0.0 {
            return Err(TimelineError::assembly(
                "plan_repeats",
                "loop unit has no duration",
            ));
        }

        let intro_duration = intro.map(|i| i.duration).unwrap_or(0.0);
        let plan = RepetitionPlan::new(
            target,
            intro_duration,
            variants.from_intro.duration,
            variants.from_loop.duration,
        );
        info!(
            target,
            intro = intro_duration,
            from_intro = variants.from_intro.duration,
            from_loop = variants.from_loop.duration,
            repeats = plan.repeats,
            provisional = plan.provisional_duration,
            "Planned loop repeats"
        );

        let mut parts = Vec::with_capacity(plan.repeats + 2);
        parts.extend(intro.cloned());
        parts.push(variants.from_intro.clone());
        parts.extend(std::iter::repeat(variants.from_loop.clone()).take(plan.repeats));

        let provisional = SequenceAssembler::new(self.ctx)
            .concat_as("concat_timeline", &parts, "provisional")
            .await?;
        let timeline = self.trim(&provisional, target).await?;
        Ok((timeline, plan))
    }

    /// Stream-copy `source` down to exactly `target` seconds.
    async fn trim(&self, source: &Artifact, target: f64) -> TimelineResult<Artifact> {
        self.ctx.check_cancelled()?;
        let path = self.ctx.artifact_path("timeline", "mp4");
        let request = TranscodeRequest::new("trim", OutputSpec::copy(&path).with_duration(target))
            .input(InputSpec::file(&source.path));
        self.ctx.run(&request).await?;
        Ok(Artifact::new(path, target))
    }
}
