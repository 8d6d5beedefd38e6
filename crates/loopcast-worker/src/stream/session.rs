//! Live stream session.
//!
//! Builds the intro and loop units once, then keeps a continuous encode
//! running that plays the intro unit once and the loop unit forever. A
//! crashed encoder is restarted with backoff until the restart budget is
//! spent. Health is sampled from the encoder's status output.

use loopcast_media::{ContinuousEncodeSpec, EncodeProcess, MediaBackend, MediaResult, ProgressParser};
use loopcast_models::{ClipRole, JobId, StreamRequest, StreamState};
use loopcast_timeline::{build_stream_units, JobArena, TimelineComposer, TimelineContext};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::AsyncBufReadExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn, Instrument};

use crate::config::EngineConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::events::{EngineEvent, EventChannel};
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::{FailureTracker, RestartPolicy};
use crate::stream::audio_pipe::{audio_pipe, AudioPipeDrain, AudioPipeWriter, PipeCounters};
use crate::stream::health::StreamHealth;

/// An encoder run at least this long resets the consecutive failure count.
const STABLE_RUN: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Shared {
    state: StreamState,
    health: StreamHealth,
    error: Option<String>,
}

/// Handle to a running live stream.
pub struct StreamSession {
    id: JobId,
    shared: Arc<Mutex<Shared>>,
    audio_counters: Option<Arc<PipeCounters>>,
    audio_writer: Option<AudioPipeWriter>,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl StreamSession {
    /// Validate `request` and start preparing and streaming in the
    /// background.
    pub fn start(
        request: StreamRequest,
        backend: Arc<dyn MediaBackend>,
        config: EngineConfig,
        events: EventChannel,
    ) -> WorkerResult<Self> {
        request.validate()?;

        let id = JobId::new();
        let shared = Arc::new(Mutex::new(Shared::default()));
        let (stop_tx, stop_rx) = watch::channel(false);

        let (audio_writer, drain) = match request.audio {
            Some(format) => {
                let (writer, drain) = audio_pipe(format, config.audio_chunk_bytes, config.audio_write_timeout);
                (Some(writer), Some(drain))
            }
            None => (None, None),
        };
        let audio_counters = drain.as_ref().map(AudioPipeDrain::counters);

        let runner = SessionRunner {
            id: id.clone(),
            request,
            backend,
            logger: JobLogger::new(&id, "stream"),
            config,
            events,
            shared: shared.clone(),
            stop: stop_rx,
            audio: audio_counters.clone(),
            drain,
        };
        let span = runner.logger.create_span();
        let task = tokio::spawn(runner.run().instrument(span));

        Ok(Self {
            id,
            shared,
            audio_counters,
            audio_writer,
            stop_tx,
            task: Some(task),
        })
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn state(&self) -> StreamState {
        self.lock().state
    }

    pub fn health(&self) -> StreamHealth {
        self.lock().health.clone()
    }

    /// Why the session failed, once it has.
    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    /// The live audio writer, for whoever owns the audio thread. Present
    /// only when the request asked for live audio, and only once.
    pub fn take_audio_writer(&mut self) -> Option<AudioPipeWriter> {
        self.audio_writer.take()
    }

    pub fn audio_counters(&self) -> Option<Arc<PipeCounters>> {
        self.audio_counters.clone()
    }

    /// Wait until the session stops or fails on its own. Safe to abandon
    /// and call again.
    pub async fn wait(&mut self) -> StreamState {
        if let Some(task) = self.task.as_mut() {
            let result = task.await;
            self.task = None;
            if let Err(e) = result {
                warn!(session_id = %self.id, "Stream task ended abnormally: {}", e);
                let mut shared = self.lock();
                shared.state = StreamState::Failed;
                shared.error.get_or_insert_with(|| "stream task panicked".to_string());
            }
        }
        self.state()
    }

    /// Stop streaming and release everything the session holds.
    pub async fn stop(mut self) -> StreamState {
        self.stop_tx.send_replace(true);
        self.wait().await
    }
}

enum RunExit {
    Stopped,
    Exited(MediaResult<()>),
}

struct SessionRunner {
    id: JobId,
    request: StreamRequest,
    backend: Arc<dyn MediaBackend>,
    config: EngineConfig,
    events: EventChannel,
    logger: JobLogger,
    shared: Arc<Mutex<Shared>>,
    stop: watch::Receiver<bool>,
    audio: Option<Arc<PipeCounters>>,
    drain: Option<AudioPipeDrain>,
}

impl SessionRunner {
    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn stopped(&self) -> bool {
        *self.stop.borrow()
    }

    fn set_state(&self, state: StreamState) {
        let changed = {
            let mut shared = self.lock();
            let changed = shared.state != state;
            shared.state = state;
            changed
        };
        if changed {
            self.logger.log_stage(state, "Stream state changed");
            self.events.publish(EngineEvent::Stream {
                session_id: self.id.clone(),
                state,
            });
        }
    }

    fn fail(&self, error: &WorkerError) {
        self.logger.log_error(&error.to_string());
        self.lock().error = Some(error.to_string());
        self.set_state(StreamState::Failed);
    }

    async fn run(mut self) {
        self.logger.log_start(&format!(
            "{} clips to {}",
            self.request.clips.len(),
            self.request.destination.endpoint
        ));
        self.logger.log_stage(StreamState::Preparing, "Stream state changed");
        self.events.publish(EngineEvent::Stream {
            session_id: self.id.clone(),
            state: StreamState::Preparing,
        });

        let arena = match JobArena::create(&self.config.work_dir, &self.id).await {
            Ok(arena) => arena,
            Err(e) => {
                self.fail(&WorkerError::from(e));
                return;
            }
        };
        let ctx = TimelineContext::new(self.backend.clone(), arena, self.request.encoding.clone())
            .with_cancel(self.stop.clone());

        let (ctx, spec) = match self.prepare(ctx).await {
            (ctx, Ok(spec)) => (ctx, spec),
            (ctx, Err(e)) => {
                if e.is_cancelled() || self.stopped() {
                    self.set_state(StreamState::Stopped);
                } else {
                    self.fail(&e);
                }
                ctx.into_arena().release().await;
                return;
            }
        };

        match self.stream(&spec).await {
            Ok(()) => {
                self.set_state(StreamState::Stopped);
                self.logger.log_completion("stream stopped");
            }
            Err(e) => self.fail(&e),
        }
        ctx.into_arena().release().await;
    }

    /// Compose the intro and loop units; the context is handed back so
    /// the arena outlives the stream.
    async fn prepare(&self, mut ctx: TimelineContext) -> (TimelineContext, WorkerResult<ContinuousEncodeSpec>) {
        let result = self.prepare_units(&mut ctx).await;
        (ctx, result)
    }

    async fn prepare_units(&self, ctx: &mut TimelineContext) -> WorkerResult<ContinuousEncodeSpec> {
        let intro = self.request.clips_for(ClipRole::Intro);
        let looped = self.request.clips_for(ClipRole::Loop);
        let ordered: Vec<_> = intro.iter().chain(looped.iter()).cloned().collect();

        let canvas = TimelineComposer::new(ctx)
            .resolve_canvas(&ordered, self.request.canvas)
            .await?;
        ctx.set_canvas(canvas);

        let composer = TimelineComposer::new(ctx);
        let roles = composer.resolve(&intro, &looped).await?;
        let conformed = composer.conform(&roles).await?;
        let sequences = composer.sequences(&conformed).await?;
        let units = build_stream_units(ctx, &sequences).await?;

        if sequences.degraded() > 0 {
            self.logger.log_warning(&format!(
                "{} transition(s) fell back to a fade through black",
                sequences.degraded()
            ));
        }
        info!(
            intro_unit = units.intro_unit.duration,
            loop_unit = units.loop_unit.duration,
            "Stream units ready"
        );

        Ok(ContinuousEncodeSpec {
            intro_unit: units.intro_unit.path.clone(),
            loop_unit: units.loop_unit.path.clone(),
            audio: self.request.audio,
            destination: self.request.destination.url(),
            video_bitrate_kbps: self.request.video_bitrate_kbps,
            encoding: self.request.encoding.clone(),
            canvas,
        })
    }

    /// Keep the encoder alive until stopped or out of restarts.
    async fn stream(&mut self, spec: &ContinuousEncodeSpec) -> WorkerResult<()> {
        let policy = RestartPolicy::new(
            self.config.stream_max_restarts,
            self.config.stream_initial_backoff,
            self.config.stream_max_backoff,
        );
        let mut tracker = FailureTracker::new(self.config.stream_unstable_after, STABLE_RUN);
        let mut restarts = 0u32;

        loop {
            if self.stopped() {
                return Ok(());
            }

            let started = Instant::now();
            let exit = match self.backend.start_continuous_encode(spec).await {
                Ok(process) => {
                    self.set_state(StreamState::Live);
                    self.drive(process).await
                }
                Err(e) => RunExit::Exited(Err(e)),
            };

            let error = match exit {
                RunExit::Stopped => return Ok(()),
                RunExit::Exited(result) => {
                    if self.stopped() {
                        return Ok(());
                    }
                    match result {
                        Ok(()) => "encoder exited".to_string(),
                        Err(e) => e.to_string(),
                    }
                }
            };

            let record = tracker.record_exit(started.elapsed());
            {
                let mut shared = self.lock();
                shared.health.consecutive_failures = record.consecutive;
                shared.health.unstable = record.unstable;
            }

            let Some(delay) = policy.next_delay(record.consecutive) else {
                return Err(WorkerError::stream_failed(format!(
                    "encoder failed {} times in a row, last error: {}",
                    record.consecutive, error
                )));
            };
            if record.log {
                self.logger.log_warning(&format!(
                    "encoder stopped ({}), restarting in {}ms",
                    error,
                    delay.as_millis()
                ));
            }
            if record.unstable {
                warn!(session_id = %self.id, failures = record.consecutive, "Stream is unstable");
            }

            self.set_state(StreamState::Restarting);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_stopped(self.stop.clone()) => return Ok(()),
            }

            restarts += 1;
            self.lock().health.restarts = restarts;
            metrics::record_stream_restart();
        }
    }

    /// Run one encoder process until it exits or the session is stopped.
    async fn drive(&mut self, process: EncodeProcess) -> RunExit {
        let EncodeProcess {
            audio_input,
            status,
            mut handle,
        } = process;

        let (drain_stop, drain_rx) = watch::channel(false);
        let drain = match (audio_input, self.drain.take()) {
            (Some(sink), Some(drain)) => Some(tokio::spawn(drain.run(sink, drain_rx))),
            (_, drain) => {
                self.drain = drain;
                None
            }
        };

        let mut parser = ProgressParser::new();
        let mut lines = status.lines();
        let mut status_open = true;
        let mut ticker = tokio::time::interval(self.config.stream_health_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stop = self.stop.clone();

        let exit = loop {
            tokio::select! {
                result = handle.wait() => break RunExit::Exited(result),
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        if let Err(e) = handle.kill().await {
                            warn!(session_id = %self.id, "Failed to stop encoder: {}", e);
                        }
                        break RunExit::Stopped;
                    }
                }
                line = lines.next_line(), if status_open => match line {
                    Ok(Some(line)) => {
                        if let Some(progress) = parser.feed(&line) {
                            self.lock().health.apply(&progress);
                        }
                    }
                    _ => status_open = false,
                },
                _ = ticker.tick() => self.publish_health(),
            }
        };

        drain_stop.send_replace(true);
        if let Some(task) = drain {
            match task.await {
                Ok(drain) => self.drain = Some(drain),
                Err(e) => warn!(session_id = %self.id, "Audio drain task failed: {}", e),
            }
        }
        self.publish_health();
        exit
    }

    fn publish_health(&self) {
        let health = {
            let mut shared = self.lock();
            if let Some(counters) = &self.audio {
                shared.health.audio_connected = counters.is_connected();
                shared.health.audio_bytes = counters.bytes_written();
            }
            shared.health.clone()
        };
        self.events.publish(EngineEvent::Health {
            session_id: self.id.clone(),
            health,
        });
    }
}

async fn wait_stopped(mut stop: watch::Receiver<bool>) {
    while !*stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}
