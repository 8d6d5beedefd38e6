//! Per-role sequence assembly.

use loopcast_media::{write_concat_list, InputSpec, OutputSpec, TranscodeRequest};
use loopcast_models::ClipRole;
use tracing::info;

use crate::context::{Artifact, TimelineContext};
use crate::crossfade::CrossfadeSegmentBuilder;
use crate::error::{TimelineError, TimelineResult};
use crate::plan::{RolePlan, Span};

/// One role's concatenated sequence.
#[derive(Debug, Clone)]
pub struct AssembledSequence {
    pub role: ClipRole,
    /// Every body and transition, tail included
    pub raw: Artifact,
    /// `raw` without the final crossfade tail; equal to `raw` when there is none
    pub trimmed: Artifact,
    /// The excised tail, reused by whatever follows the role
    pub tail: Option<Artifact>,
    /// Transitions that fell back to a fade through black
    pub degraded: usize,
}

/// Concatenates segments into role sequences.
pub struct SequenceAssembler<'a> {
    ctx: &'a TimelineContext,
}

impl<'a> SequenceAssembler<'a> {
    pub fn new(ctx: &'a TimelineContext) -> Self {
        Self { ctx }
    }

    /// Stream-copy concatenation of `parts` in order.
    pub async fn concat(&self, parts: &[Artifact], name: &str) -> TimelineResult<Artifact> {
        self.concat_as("concat", parts, name).await
    }

    /// [`Self::concat`] reported under a different step name.
    pub async fn concat_as(
        &self,
        step: &str,
        parts: &[Artifact],
        name: &str,
    ) -> TimelineResult<Artifact> {
        match parts {
            [] => Err(TimelineError::assembly(step, "nothing to concatenate")),
            [single] => Ok(single.clone()),
            _ => {
                let list = self.ctx.artifact_path(&format!("{}-list", name), "txt");
                let entries: Vec<_> = parts.iter().map(|p| p.path.clone()).collect();
                write_concat_list(&list, &entries)
                    .await
                    .map_err(|e| TimelineError::assembly(step, e.to_string()))?;

                let duration: f64 = parts.iter().map(|p| p.duration).sum();
                let path = self.ctx.artifact_path(name, "mp4");
                let request = TranscodeRequest::new(step, OutputSpec::copy(&path))
                    .input(InputSpec::ConcatList(list))
                    .expect_duration(duration);
                self.ctx.run(&request).await?;
                Ok(Artifact::new(path, duration))
            }
        }
    }

    /// Assemble one role from its conformed clips.
    ///
    /// A single-clip role uses the conformed clip directly. When `tail` is
    /// positive the last `tail` seconds are cut into a separate artifact.
    pub async fn assemble(
        &self,
        role: ClipRole,
        clips: &[Artifact],
        plan: &RolePlan,
        tail: f64,
    ) -> TimelineResult<AssembledSequence> {
        if clips.is_empty() {
            return Err(TimelineError::assembly(
                "assemble",
                format!("role {} has no clips", role),
            ));
        }

        let builder = CrossfadeSegmentBuilder::new(self.ctx);
        let (raw, degraded) = if clips.len() == 1 {
            (clips[0].clone(), 0)
        } else {
            let segments = builder.build_role(clips, plan).await?;
            let raw = self
                .concat(&segments.segments, &format!("{}-raw", role))
                .await?;
            (raw, segments.degraded)
        };

        let (trimmed, tail) = if tail > 0.0 {
            let cut = raw.duration - tail;
            let trimmed = builder
                .extract(&raw, Span::new(0.0, cut), &format!("{}-trimmed", role))
                .await?;
            let tail = builder
                .extract(&raw, Span::new(cut, raw.duration), &format!("{}-tail", role))
                .await?;
            (trimmed, Some(tail))
        } else {
            (raw.clone(), None)
        };

        info!(
            role = %role,
            raw = raw.duration,
            trimmed = trimmed.duration,
            tail = tail.as_ref().map(|t| t.duration).unwrap_or(0.0),
            "Assembled sequence"
        );

        Ok(AssembledSequence {
            role,
            raw,
            trimmed,
            tail,
            degraded,
        })
    }
}
