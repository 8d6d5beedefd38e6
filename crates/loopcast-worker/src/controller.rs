//! Single-active-job render controller.
//!
//! At most one render runs at a time. Starting a new job cancels the
//! active one and waits for it to settle first. A poller publishes global
//! progress on a fixed interval without touching the job itself.

use loopcast_media::MediaBackend;
use loopcast_models::{JobId, RenderRequest, RenderState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::events::{EngineEvent, EventChannel};
use crate::metrics;
use crate::render_job::{JobSnapshot, JobStatus, RenderJob, RenderOutcome};

/// How long the supervisor gets to settle a job whose task was aborted.
const ABORT_SETTLE: Duration = Duration::from_secs(1);

/// Observer handle for one submitted job.
#[derive(Clone)]
pub struct JobHandle {
    status: Arc<JobStatus>,
    outcome: watch::Receiver<Option<RenderOutcome>>,
}

impl JobHandle {
    pub fn job_id(&self) -> &JobId {
        self.status.job_id()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.status.snapshot()
    }

    /// Outcome once the job has settled, without waiting.
    pub fn try_outcome(&self) -> Option<RenderOutcome> {
        self.outcome.borrow().clone()
    }

    /// Wait for the job to settle.
    pub async fn wait(&self) -> RenderOutcome {
        let mut rx = self.outcome.clone();
        let settled = rx.wait_for(Option::is_some).await.map(|outcome| outcome.clone());
        match settled {
            Ok(outcome) => outcome.unwrap_or_else(|| self.vanished()),
            Err(_) => rx.borrow().clone().unwrap_or_else(|| self.vanished()),
        }
    }

    fn vanished(&self) -> RenderOutcome {
        RenderOutcome::failed(self.job_id().clone(), "render task ended without an outcome")
    }
}

struct ActiveJob {
    handle: JobHandle,
    cancel: watch::Sender<bool>,
    job_task: AbortHandle,
    supervisor: JoinHandle<()>,
    poller: JoinHandle<()>,
}

/// Owns the active render.
pub struct RenderController {
    backend: Arc<dyn MediaBackend>,
    config: EngineConfig,
    events: EventChannel,
    active: Mutex<Option<ActiveJob>>,
}

impl RenderController {
    pub fn new(backend: Arc<dyn MediaBackend>, config: EngineConfig) -> Self {
        Self {
            backend,
            config,
            events: EventChannel::disabled(),
            active: Mutex::new(None),
        }
    }

    pub fn with_events(mut self, events: EventChannel) -> Self {
        self.events = events;
        self
    }

    /// Submit a render, replacing any active job.
    pub async fn start(&self, request: RenderRequest) -> JobHandle {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            self.retire(previous).await;
        }

        let status = JobStatus::new(JobId::new());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let handle = JobHandle {
            status: status.clone(),
            outcome: outcome_rx,
        };

        info!(job_id = %status.job_id(), output = %request.output.display(), "Starting render job");

        let job = RenderJob::new(
            request,
            self.backend.clone(),
            self.config.clone(),
            status.clone(),
            cancel_rx,
        )
        .with_events(self.events.clone());
        let job_task = tokio::spawn(job.run());
        let job_abort = job_task.abort_handle();
        let supervisor = tokio::spawn(supervise(
            job_task,
            status.clone(),
            self.events.clone(),
            outcome_tx,
        ));
        let poller = tokio::spawn(poll_progress(
            status,
            self.events.clone(),
            self.config.progress_poll_interval,
        ));

        *active = Some(ActiveJob {
            handle: handle.clone(),
            cancel: cancel_tx,
            job_task: job_abort,
            supervisor,
            poller,
        });
        handle
    }

    /// Request cancellation of the active job. Returns whether one was running.
    pub async fn cancel(&self) -> bool {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(job) if job.handle.try_outcome().is_none() => {
                info!(job_id = %job.handle.job_id(), "Cancelling render job");
                job.cancel.send_replace(true);
                true
            }
            _ => false,
        }
    }

    /// Handle of the most recent job, settled or not.
    pub async fn current(&self) -> Option<JobHandle> {
        self.active.lock().await.as_ref().map(|job| job.handle.clone())
    }

    pub async fn snapshot(&self) -> Option<JobSnapshot> {
        self.current().await.map(|handle| handle.snapshot())
    }

    /// Cancel and wait for the active job.
    pub async fn shutdown(&self) {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            self.retire(previous).await;
        }
    }

    async fn retire(&self, job: ActiveJob) {
        if job.handle.try_outcome().is_none() {
            info!(job_id = %job.handle.job_id(), "Replacing active render job");
            job.cancel.send_replace(true);
        }
        match tokio::time::timeout(self.config.cancel_grace, job.handle.wait()).await {
            Ok(outcome) => {
                info!(job_id = %outcome.job_id, state = %outcome.state, "Previous render job settled");
            }
            Err(_) => {
                warn!(
                    job_id = %job.handle.job_id(),
                    grace_ms = self.config.cancel_grace.as_millis() as u64,
                    "Previous render job did not settle in time, aborting it"
                );
                job.job_task.abort();
                if tokio::time::timeout(ABORT_SETTLE, job.handle.wait()).await.is_err() {
                    job.supervisor.abort();
                }
            }
        }
        job.poller.abort();
    }
}

/// Await the job's own task so a panic surfaces as `Failed` and an abort
/// after a missed grace period as `Cancelled`.
async fn supervise(
    job_task: JoinHandle<RenderOutcome>,
    status: Arc<JobStatus>,
    events: EventChannel,
    outcome_tx: watch::Sender<Option<RenderOutcome>>,
) {
    let job_id = status.job_id().clone();
    let outcome = match job_task.await {
        Ok(outcome) => outcome,
        Err(e) if e.is_cancelled() => {
            warn!(job_id = %job_id, "Render job aborted after cancellation");
            status.settle(RenderState::Cancelled, None);
            metrics::record_job(RenderState::Cancelled);
            events.stage(&job_id, RenderState::Cancelled);
            RenderOutcome::cancelled(job_id)
        }
        Err(_) => {
            let message = "render job panicked".to_string();
            warn!(job_id = %job_id, "{}", message);
            status.settle(RenderState::Failed, Some(message.clone()));
            metrics::record_job(RenderState::Failed);
            events.stage(&job_id, RenderState::Failed);
            RenderOutcome::failed(job_id, message)
        }
    };
    events.publish(EngineEvent::Finished {
        outcome: outcome.clone(),
    });
    outcome_tx.send_replace(Some(outcome));
}

/// Publish progress whenever it moved, until the job settles.
async fn poll_progress(status: Arc<JobStatus>, events: EventChannel, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last = -1.0;
    loop {
        ticker.tick().await;
        let settled = status.state().is_terminal();
        let progress = status.progress();
        if progress > last {
            last = progress;
            events.progress(status.job_id(), progress);
        }
        if settled {
            break;
        }
    }
}
