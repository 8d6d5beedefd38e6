//! Shared state every component runs against.

use loopcast_media::{CallContext, MediaBackend, MediaInfo, TranscodeRequest};
use loopcast_models::{Canvas, EncodingConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::arena::JobArena;
use crate::error::{StepContext, TimelineError, TimelineResult};
use crate::progress_window::StageProgress;

/// A finished intermediate file and its exact length.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub path: PathBuf,
    pub duration: f64,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>, duration: f64) -> Self {
        Self {
            path: path.into(),
            duration,
        }
    }
}

/// Backend, arena, canvas and cancellation for one job.
pub struct TimelineContext {
    backend: Arc<dyn MediaBackend>,
    arena: JobArena,
    canvas: Canvas,
    encoding: EncodingConfig,
    cancel: Option<watch::Receiver<bool>>,
    stage: Option<StageProgress>,
}

impl TimelineContext {
    pub fn new(backend: Arc<dyn MediaBackend>, arena: JobArena, encoding: EncodingConfig) -> Self {
        Self {
            backend,
            arena,
            canvas: Canvas::default(),
            encoding,
            cancel: None,
            stage: None,
        }
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn set_canvas(&mut self, canvas: Canvas) {
        self.canvas = canvas;
    }

    /// Route backend progress into `stage` until the next call. The stage
    /// being replaced is marked finished.
    pub fn set_stage(&mut self, stage: Option<StageProgress>) {
        if let Some(previous) = std::mem::replace(&mut self.stage, stage) {
            previous.finish();
        }
    }

    pub fn backend(&self) -> &dyn MediaBackend {
        self.backend.as_ref()
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn encoding(&self) -> &EncodingConfig {
        &self.encoding
    }

    pub fn arena(&self) -> &JobArena {
        &self.arena
    }

    /// Give the arena back for release.
    pub fn into_arena(self) -> JobArena {
        self.arena
    }

    /// Fresh path inside the arena.
    pub fn artifact_path(&self, name: &str, ext: &str) -> PathBuf {
        self.arena.artifact(name, ext)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Fail with `Cancelled` once cancellation was requested.
    pub fn check_cancelled(&self) -> TimelineResult<()> {
        if self.is_cancelled() {
            return Err(TimelineError::Cancelled);
        }
        Ok(())
    }

    /// Probe a media file.
    pub async fn probe(&self, path: &Path) -> TimelineResult<MediaInfo> {
        self.check_cancelled()?;
        self.backend.probe(path).await.at_step("probe")
    }

    /// Run one backend call, tagging failures with the request's step.
    pub async fn run(&self, request: &TranscodeRequest) -> TimelineResult<()> {
        self.check_cancelled()?;
        debug!(step = %request.step, output = %request.output.path.display(), "Running step");

        let mut call = CallContext::new();
        if let Some(cancel) = &self.cancel {
            call = call.with_cancel(cancel.clone());
        }
        if let Some(stage) = &self.stage {
            call = call.with_progress(stage.callback());
        }

        self.backend
            .transcode(request, &call)
            .await
            .at_step(&request.step)?;

        if let Some(stage) = &self.stage {
            stage.step_done();
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use loopcast_media::testing::FakeBackend;
    use loopcast_media::MediaInfo;
    use loopcast_models::JobId;
    use tempfile::TempDir;

    /// Context over a fake backend in a temporary work dir.
    pub async fn fake_context() -> (TimelineContext, FakeBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        let backend = FakeBackend::new();
        let arena = JobArena::create(dir.path(), &JobId::new()).await.unwrap();
        let ctx = TimelineContext::new(Arc::new(backend.clone()), arena, EncodingConfig::default());
        (ctx, backend, dir)
    }

    /// Register a source file of `duration` seconds.
    pub async fn source(backend: &FakeBackend, dir: &TempDir, name: &str, duration: f64) -> PathBuf {
        let path = dir.path().join(name);
        tokio::fs::write(&path, b"src").await.unwrap();
        backend.register_probe(&path, MediaInfo::video(duration, 1920, 1080, 30.0));
        path
    }

    /// An artifact that already exists in the backend's view.
    pub async fn artifact(backend: &FakeBackend, dir: &TempDir, name: &str, duration: f64) -> Artifact {
        Artifact::new(source(backend, dir, name, duration).await, duration)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use loopcast_media::OutputSpec;

    #[tokio::test]
    async fn test_run_tags_step_and_honours_cancel() {
        let (ctx, backend, _dir) = fake_context().await;
        backend.fail_step("concat");
        let request = TranscodeRequest::new(
            "concat",
            OutputSpec::copy(ctx.artifact_path("seq", "mp4")),
        );
        match ctx.run(&request).await {
            Err(TimelineError::BackendCallFailed { step, .. }) => assert_eq!(step, "concat"),
            other => panic!("unexpected: {:?}", other),
        }

        let (tx, rx) = watch::channel(true);
        let ctx = ctx.with_cancel(rx);
        assert!(ctx.run(&request).await.unwrap_err().is_cancelled());
        drop(tx);
    }

    #[tokio::test]
    async fn test_replacing_stage_finishes_it() {
        use crate::progress_window::ProgressWindowMapper;
        use loopcast_models::RenderState;

        let (mut ctx, _backend, _dir) = fake_context().await;
        let mapper = Arc::new(ProgressWindowMapper::new());
        ctx.set_stage(Some(StageProgress::new(mapper.clone(), RenderState::ProcessingClips, 4)));

        let request = TranscodeRequest::new("conform", OutputSpec::copy(ctx.artifact_path("c", "mp4")));
        ctx.run(&request).await.unwrap();
        assert!((mapper.current() - 0.1625).abs() < 1e-9);

        ctx.set_stage(None);
        assert!((mapper.current() - 0.35).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_probe_missing_source() {
        let (ctx, _backend, dir) = fake_context().await;
        let err = ctx.probe(&dir.path().join("nope.mp4")).await.unwrap_err();
        assert!(matches!(err, TimelineError::SourceNotFound(_)));
    }
}
