//! Soundtrack preparation and final muxing.

use loopcast_media::filters::audio_master_chain;
use loopcast_media::{AudioOutput, FilterGraph, InputSpec, OutputSpec, TranscodeRequest, VideoOutput};
use loopcast_models::{AudioTrackSpec, FadeConfig, LoudnessTarget};
use tracing::info;

use crate::context::{Artifact, TimelineContext};
use crate::error::{TimelineError, TimelineResult};

/// Conforms the soundtrack and muxes it under the finished video.
pub struct AudioMuxer<'a> {
    ctx: &'a TimelineContext,
}

impl<'a> AudioMuxer<'a> {
    pub fn new(ctx: &'a TimelineContext) -> Self {
        Self { ctx }
    }

    /// Loop or trim the soundtrack to exactly `target` seconds of PCM.
    pub async fn prepare_track(&self, spec: &AudioTrackSpec, target: f64) -> TimelineResult<Artifact> {
        let info = self.ctx.probe(&spec.source).await?;
        if !info.has_audio {
            return Err(TimelineError::Unreadable {
                path: spec.source.clone(),
                reason: "no audio stream".to_string(),
            });
        }

        let path = self.ctx.artifact_path("soundtrack", "wav");
        let request = TranscodeRequest::new(
            "audio_conform",
            OutputSpec::video(&path, self.ctx.encoding().clone())
                .with_video(VideoOutput::Drop)
                .with_audio(AudioOutput::Lossless)
                .with_duration(target),
        )
        .input(InputSpec::file(&spec.source).looped());
        self.ctx.run(&request).await?;

        info!(source = %spec.source.display(), source_duration = info.duration, target, "Prepared soundtrack");
        Ok(Artifact::new(path, target))
    }

    /// Mux `audio` under `video` with fades and loudness applied.
    ///
    /// Without audio the video is returned unchanged.
    pub async fn mux(
        &self,
        video: &Artifact,
        audio: Option<&Artifact>,
        fades: FadeConfig,
        loudness: Option<&LoudnessTarget>,
    ) -> TimelineResult<Artifact> {
        let Some(audio) = audio else {
            return Ok(video.clone());
        };

        let target = video.duration;
        let fades = fades.clamped(target);
        let chain = audio_master_chain(target, fades.fade_in, fades.fade_out, loudness)
            .unwrap_or_else(|| "anull".to_string());

        let path = self.ctx.artifact_path("final", "mp4");
        let request = TranscodeRequest::new(
            "mux",
            OutputSpec::video(&path, self.ctx.encoding().clone())
                .with_video(VideoOutput::Copy)
                .with_audio(AudioOutput::Encode)
                .with_duration(target),
        )
        .input(InputSpec::file(&video.path))
        .input(InputSpec::file(&audio.path))
        .filter(FilterGraph::Complex {
            graph: format!("[1:a]{}[a]", chain),
            maps: vec!["0:v".to_string(), "[a]".to_string()],
        });
        self.ctx.run(&request).await?;

        Ok(Artifact::new(path, target))
    }
}
