//! Render job state machine.
//!
//! A job walks `Starting → RenderingAudio → ProcessingClips →
//! RenderingCrossfades → AssemblingTimeline → Finalizing` and settles in
//! `Completed`, `Failed` or `Cancelled`. Every stage runs only after the
//! previous one succeeded; the output path is written only on completion.

use chrono::{DateTime, Utc};
use loopcast_media::{move_file, MediaBackend};
use loopcast_models::{Canvas, ClipRole, JobId, RenderRequest, RenderState};
use loopcast_timeline::{
    estimate_sequence_steps, Artifact, AudioMuxer, JobArena, OverlayScheduler,
    ProgressWindowMapper, RepetitionPlanner, ResolvedRoles, RolePlan, StageProgress,
    TimelineComposer, TimelineContext, TimelineError,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::watch;
use tracing::Instrument;

use crate::config::EngineConfig;
use crate::error::WorkerResult;
use crate::events::EventChannel;
use crate::logging::JobLogger;
use crate::metrics;

/// Point-in-time view of a job for observers.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub state: RenderState,
    pub label: String,
    pub progress: f64,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct StatusInner {
    state: RenderState,
    error: Option<String>,
}

/// State and progress shared between a job, its controller and the poller.
#[derive(Debug)]
pub struct JobStatus {
    job_id: JobId,
    inner: Mutex<StatusInner>,
    progress: Arc<ProgressWindowMapper>,
}

impl JobStatus {
    pub fn new(job_id: JobId) -> Arc<Self> {
        Arc::new(Self {
            job_id,
            inner: Mutex::new(StatusInner::default()),
            progress: Arc::new(ProgressWindowMapper::new()),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StatusInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn state(&self) -> RenderState {
        self.lock().state
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    pub fn progress(&self) -> f64 {
        self.progress.current()
    }

    pub fn mapper(&self) -> Arc<ProgressWindowMapper> {
        self.progress.clone()
    }

    /// Move to `state` if the transition is legal.
    pub fn advance(&self, state: RenderState) -> bool {
        let mut inner = self.lock();
        if !inner.state.can_transition_to(state) {
            return false;
        }
        inner.state = state;
        drop(inner);
        self.progress.enter(state);
        true
    }

    /// Force a terminal state, keeping the first one reached.
    pub fn settle(&self, state: RenderState, error: Option<String>) {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return;
        }
        // Progress first, so observers that see the terminal state also see 1.0
        if state == RenderState::Completed {
            self.progress.enter(RenderState::Completed);
        }
        inner.state = state;
        inner.error = error;
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let inner = self.lock();
        JobSnapshot {
            job_id: self.job_id.clone(),
            state: inner.state,
            label: inner.state.label().to_string(),
            progress: self.progress.current(),
            error: inner.error.clone(),
        }
    }
}

/// Summary of a completed render.
#[derive(Debug, Clone, Serialize)]
pub struct RenderReport {
    pub job_id: JobId,
    pub output: PathBuf,
    pub target_duration: f64,
    /// Timeline length before the exact trim
    pub provisional_duration: f64,
    pub repeats: usize,
    /// Appearances of each overlay, in request order
    pub overlay_appearances: Vec<usize>,
    /// Transitions rendered as a fade through black
    pub degraded_transitions: usize,
    pub canvas: Canvas,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// How a job ended.
#[derive(Debug, Clone, Serialize)]
pub struct RenderOutcome {
    pub job_id: JobId,
    pub state: RenderState,
    pub report: Option<RenderReport>,
    pub error: Option<String>,
}

impl RenderOutcome {
    pub fn is_completed(&self) -> bool {
        self.state == RenderState::Completed
    }

    pub(crate) fn failed(job_id: JobId, error: impl Into<String>) -> Self {
        Self {
            job_id,
            state: RenderState::Failed,
            report: None,
            error: Some(error.into()),
        }
    }

    pub(crate) fn cancelled(job_id: JobId) -> Self {
        Self {
            job_id,
            state: RenderState::Cancelled,
            report: None,
            error: None,
        }
    }
}

/// One render, from request to finished file.
pub struct RenderJob {
    request: RenderRequest,
    backend: Arc<dyn MediaBackend>,
    config: EngineConfig,
    status: Arc<JobStatus>,
    cancel: watch::Receiver<bool>,
    events: EventChannel,
    logger: JobLogger,
    stage_started: Instant,
}

impl RenderJob {
    pub fn new(
        request: RenderRequest,
        backend: Arc<dyn MediaBackend>,
        config: EngineConfig,
        status: Arc<JobStatus>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let logger = JobLogger::new(status.job_id(), "render");
        Self {
            request,
            backend,
            config,
            status,
            cancel,
            events: EventChannel::disabled(),
            logger,
            stage_started: Instant::now(),
        }
    }

    pub fn with_events(mut self, events: EventChannel) -> Self {
        self.events = events;
        self
    }

    pub fn job_id(&self) -> &JobId {
        self.status.job_id()
    }

    /// Run to a terminal state. Never returns an error; failures and
    /// cancellation are reported in the outcome.
    pub async fn run(mut self) -> RenderOutcome {
        let span = self.logger.create_span();
        async move {
            self.logger.log_start(&format!(
                "{} clips, {} overlays, target {:.3}s",
                self.request.clips.len(),
                self.request.overlays.len(),
                self.request.target_duration
            ));
            let started_at = Utc::now();
            let result = self.execute(started_at).await;
            self.settle(result)
        }
        .instrument(span)
        .await
    }

    fn settle(&self, result: WorkerResult<RenderReport>) -> RenderOutcome {
        let previous = self.status.state();
        if !previous.is_terminal() {
            metrics::record_stage(previous, self.stage_started.elapsed().as_secs_f64());
        }

        let cancelled = *self.cancel.borrow();
        let (state, report, error) = match result {
            Ok(report) => (RenderState::Completed, Some(report), None),
            Err(e) if e.is_cancelled() || cancelled => (RenderState::Cancelled, None, None),
            Err(e) => (RenderState::Failed, None, Some(e.to_string())),
        };

        self.status.settle(state, error.clone());
        self.events.stage(self.job_id(), state);
        metrics::record_job(state);
        match state {
            RenderState::Completed => self.logger.log_completion(&format!(
                "wrote {}",
                self.request.output.display()
            )),
            RenderState::Cancelled => self.logger.log_warning(&format!("cancelled during {}", previous)),
            _ => self.logger.log_error(&format!(
                "failed during {}: {}",
                previous,
                error.as_deref().unwrap_or("unknown error")
            )),
        }

        RenderOutcome {
            job_id: self.job_id().clone(),
            state,
            report,
            error,
        }
    }

    async fn execute(&mut self, started_at: DateTime<Utc>) -> WorkerResult<RenderReport> {
        self.advance(None, RenderState::Starting, 0)?;
        self.request.validate()?;

        let arena = JobArena::create(&self.config.work_dir, self.job_id()).await?;
        let mut ctx = TimelineContext::new(
            self.backend.clone(),
            arena,
            self.request.encoding.clone(),
        )
        .with_cancel(self.cancel.clone());

        let result = self.stages(&mut ctx, started_at).await;
        ctx.into_arena().release().await;
        result
    }

    async fn stages(
        &mut self,
        ctx: &mut TimelineContext,
        started_at: DateTime<Utc>,
    ) -> WorkerResult<RenderReport> {
        let target = self.request.target_duration;
        let intro = self.request.clips_for(ClipRole::Intro);
        let looped = self.request.clips_for(ClipRole::Loop);

        // Starting: canvas and sources
        let ordered: Vec<_> = intro.iter().chain(looped.iter()).cloned().collect();
        let canvas = TimelineComposer::new(ctx)
            .resolve_canvas(&ordered, self.request.canvas)
            .await?;
        ctx.set_canvas(canvas);
        let roles = TimelineComposer::new(ctx).resolve(&intro, &looped).await?;
        check_intro_covers_target(&roles, target, &canvas)?;

        self.advance(
            Some(&mut *ctx),
            RenderState::RenderingAudio,
            usize::from(self.request.audio.is_some()),
        )?;
        let soundtrack = match &self.request.audio {
            Some(spec) => Some(AudioMuxer::new(ctx).prepare_track(spec, target).await?),
            None => None,
        };

        self.advance(Some(&mut *ctx), RenderState::ProcessingClips, roles.len())?;
        let conformed = TimelineComposer::new(ctx).conform(&roles).await?;

        self.advance(
            Some(&mut *ctx),
            RenderState::RenderingCrossfades,
            estimate_sequence_steps(&conformed.plan),
        )?;
        let sequences = TimelineComposer::new(ctx).sequences(&conformed).await?;

        self.advance(
            Some(&mut *ctx),
            RenderState::AssemblingTimeline,
            2 + self.request.overlays.len() * 2,
        )?;
        let (timeline, repetition) = RepetitionPlanner::new(ctx)
            .assemble(target, sequences.intro_artifact(), sequences.variants.as_ref())
            .await?;
        let (timeline, overlay_appearances) = OverlayScheduler::new(ctx)
            .apply(&timeline, &self.request.overlays, target)
            .await?;

        self.advance(Some(&mut *ctx), RenderState::Finalizing, 2)?;
        let loudness = self.request.audio.as_ref().and_then(|a| a.loudness);
        let finished = AudioMuxer::new(ctx)
            .mux(&timeline, soundtrack.as_ref(), self.request.fades, loudness.as_ref())
            .await?;
        ctx.check_cancelled()?;
        self.publish(&finished, ctx.arena().root()).await?;

        let degraded = sequences.degraded();
        if degraded > 0 {
            self.logger.log_warning(&format!(
                "{} transition(s) fell back to a fade through black",
                degraded
            ));
        }

        Ok(RenderReport {
            job_id: self.job_id().clone(),
            output: self.request.output.clone(),
            target_duration: target,
            provisional_duration: repetition.provisional_duration,
            repeats: repetition.repeats,
            overlay_appearances,
            degraded_transitions: degraded,
            canvas,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Enter `state` once cancellation was not requested, and route backend
    /// progress for its `steps` calls into the global figure.
    fn advance(
        &mut self,
        ctx: Option<&mut TimelineContext>,
        state: RenderState,
        steps: usize,
    ) -> WorkerResult<()> {
        if *self.cancel.borrow() {
            return Err(TimelineError::Cancelled.into());
        }

        let previous = self.status.state();
        if previous != RenderState::Idle {
            metrics::record_stage(previous, self.stage_started.elapsed().as_secs_f64());
        }
        if !self.status.advance(state) {
            return Err(crate::error::WorkerError::job_failed(format!(
                "illegal transition {} -> {}",
                previous, state
            )));
        }
        self.stage_started = Instant::now();

        if let Some(ctx) = ctx {
            ctx.set_stage(Some(StageProgress::new(self.status.mapper(), state, steps)));
        }
        self.events.stage(self.job_id(), state);
        self.logger.log_stage(state, state.label());
        Ok(())
    }

    /// Move the finished artifact to the caller's path.
    async fn publish(&self, artifact: &Artifact, arena_root: &Path) -> WorkerResult<()> {
        let output = &self.request.output;
        if artifact.path.starts_with(arena_root) {
            move_file(&artifact.path, output).await?;
        } else {
            if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(&artifact.path, output).await?;
        }
        Ok(())
    }
}

/// Reject an intro-only request whose target the intro cannot cover,
/// before anything is rendered.
fn check_intro_covers_target(roles: &ResolvedRoles, target: f64, canvas: &Canvas) -> WorkerResult<()> {
    if !roles.looped.is_empty() || roles.intro.is_empty() {
        return Ok(());
    }
    let durations: Vec<f64> = roles.intro.iter().map(|c| c.target_duration()).collect();
    let crossfades: Vec<f64> = roles.intro.iter().map(|c| c.descriptor.crossfade).collect();
    let available = RolePlan::new(&durations, &crossfades).raw_duration();
    if target > available + canvas.frame_duration() / 2.0 {
        return Err(TimelineError::InvalidRequest(format!(
            "target {:.3}s exceeds intro {:.3}s and there are no loop clips",
            target, available
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_rejects_illegal_transitions() {
        let status = JobStatus::new(JobId::new());
        assert!(status.advance(RenderState::Starting));
        assert!(!status.advance(RenderState::Finalizing));
        assert!(status.advance(RenderState::RenderingAudio));
        assert_eq!(status.state(), RenderState::RenderingAudio);
    }

    #[test]
    fn test_settle_keeps_first_terminal_state() {
        let status = JobStatus::new(JobId::new());
        status.advance(RenderState::Starting);
        status.settle(RenderState::Cancelled, None);
        status.settle(RenderState::Failed, Some("late".into()));
        assert_eq!(status.state(), RenderState::Cancelled);
        assert!(status.error().is_none());
    }

    #[test]
    fn test_completed_snapshot_reports_full_progress() {
        let status = JobStatus::new(JobId::from_string("j"));
        status.advance(RenderState::Starting);
        status.settle(RenderState::Completed, None);
        let snapshot = status.snapshot();
        assert_eq!(snapshot.progress, 1.0);
        assert_eq!(snapshot.label, "Completed");
    }
}
