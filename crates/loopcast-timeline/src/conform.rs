//! Clip conforming: trim or loop-extend each source to its exact duration.

use loopcast_media::filters::canvas_normalize;
use loopcast_media::{FilterGraph, InputSpec, MediaInfo, OutputSpec, TranscodeRequest};
use loopcast_models::{sanitize_offset, ClipDescriptor};
use tracing::debug;

use crate::context::{Artifact, TimelineContext};
use crate::error::{TimelineError, TimelineResult};

/// A clip descriptor paired with its probed source.
#[derive(Debug, Clone)]
pub struct ResolvedClip {
    pub descriptor: ClipDescriptor,
    pub source: MediaInfo,
}

impl ResolvedClip {
    /// Exact length the clip is conformed to.
    pub fn target_duration(&self) -> f64 {
        self.descriptor.effective_duration(self.source.duration)
    }
}

/// A clip conformed to its exact duration; owned by the job's arena.
#[derive(Debug, Clone)]
pub struct ConformedClip {
    pub descriptor: ClipDescriptor,
    pub artifact: Artifact,
}

impl ConformedClip {
    pub fn duration(&self) -> f64 {
        self.artifact.duration
    }
}

/// How a source is read to produce the conformed clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConformPlan {
    pub seek: f64,
    pub duration: f64,
    /// The source is shorter than what must be read from it
    pub loop_source: bool,
}

/// Decide seek, length and looping for `clip` against its source length.
pub fn conform_plan(clip: &ClipDescriptor, source_duration: f64) -> ConformPlan {
    let duration = clip.effective_duration(source_duration);
    let seek = sanitize_offset(clip.start_offset, source_duration);
    ConformPlan {
        seek,
        duration,
        loop_source: seek + duration > source_duration,
    }
}

/// Trims or loop-extends source clips onto the job canvas.
pub struct ClipConformer<'a> {
    ctx: &'a TimelineContext,
}

impl<'a> ClipConformer<'a> {
    pub fn new(ctx: &'a TimelineContext) -> Self {
        Self { ctx }
    }

    /// Probe a clip's source. Missing or unreadable sources are fatal.
    pub async fn resolve(&self, clip: &ClipDescriptor) -> TimelineResult<ResolvedClip> {
        let descriptor = clip.sanitized();
        let source = self.ctx.probe(&descriptor.source).await?;
        if !source.has_video {
            return Err(TimelineError::Unreadable {
                path: descriptor.source.clone(),
                reason: "no video stream".to_string(),
            });
        }
        Ok(ResolvedClip { descriptor, source })
    }

    /// Conform a resolved clip.
    pub async fn conform(&self, clip: &ResolvedClip) -> TimelineResult<ConformedClip> {
        let plan = conform_plan(&clip.descriptor, clip.source.duration);
        debug!(
            source = %clip.descriptor.source.display(),
            seek = plan.seek,
            duration = plan.duration,
            looped = plan.loop_source,
            "Conforming clip"
        );

        let mut input = InputSpec::file(&clip.descriptor.source);
        if plan.loop_source {
            input = input.looped();
        }
        input = input.seek(plan.seek);

        let path = self
            .ctx
            .artifact_path(&format!("conform-{}", clip.descriptor.role), "mp4");
        let request = TranscodeRequest::new(
            "conform",
            OutputSpec::video(&path, self.ctx.encoding().clone()).with_duration(plan.duration),
        )
        .input(input)
        .filter(FilterGraph::Video(canvas_normalize(self.ctx.canvas())));

        self.ctx.run(&request).await?;

        Ok(ConformedClip {
            descriptor: clip.descriptor.clone(),
            artifact: Artifact::new(path, plan.duration),
        })
    }

    /// Conform an already-conformed clip to `target`.
    ///
    /// Within half a frame of the current length this is a no-op.
    pub async fn reconform(&self, clip: &ConformedClip, target: f64) -> TimelineResult<ConformedClip> {
        let tolerance = self.ctx.canvas().frame_duration() / 2.0;
        if (clip.duration() - target).abs() <= tolerance {
            return Ok(clip.clone());
        }

        let mut descriptor = clip.descriptor.clone();
        descriptor.source = clip.artifact.path.clone();
        descriptor.start_offset = 0.0;
        descriptor.target_duration = target;
        let resolved = ResolvedClip {
            descriptor,
            source: MediaInfo::video(
                clip.duration(),
                self.ctx.canvas().width,
                self.ctx.canvas().height,
                self.ctx.canvas().fps,
            ),
        };
        let mut conformed = self.conform(&resolved).await?;
        conformed.descriptor = ClipDescriptor {
            target_duration: target,
            ..clip.descriptor.clone()
        };
        Ok(conformed)
    }
}
