//! In-memory backend for tests.
//!
//! [`FakeBackend`] records every request, writes a small placeholder file for
//! each output and remembers the output's duration so later probes of the
//! artifact succeed. Steps can be scripted to fail, stall or panic.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;

use crate::backend::{CallContext, EncodeHandle, EncodeProcess, MediaBackend};
use crate::error::{MediaError, MediaResult};
use crate::probe::MediaInfo;
use crate::request::{ContinuousEncodeSpec, TranscodeRequest};

const PLACEHOLDER: &[u8] = b"loopcast-fake-artifact";

#[derive(Debug, Clone, Copy)]
enum Script {
    Fail { remaining: Option<usize> },
    Panic,
}

#[derive(Default)]
struct State {
    probes: HashMap<PathBuf, MediaInfo>,
    unreadable: Vec<PathBuf>,
    requests: Vec<TranscodeRequest>,
    scripts: HashMap<String, Script>,
    delays: HashMap<String, Duration>,
    stalls: HashMap<String, Duration>,
    encodes: Vec<ContinuousEncodeSpec>,
}

/// Recording backend that never spawns a process.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<State>>,
    encode_exit_after: Arc<Mutex<Option<Duration>>>,
    audio_bytes: Arc<AtomicU64>,
    live_encodes: Arc<AtomicUsize>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Serve `info` for `path`.
    pub fn register_probe(&self, path: impl Into<PathBuf>, info: MediaInfo) {
        self.state().probes.insert(path.into(), info);
    }

    /// Make probes of `path` fail as unreadable.
    pub fn mark_unreadable(&self, path: impl Into<PathBuf>) {
        self.state().unreadable.push(path.into());
    }

    /// Every call of `step` fails.
    pub fn fail_step(&self, step: &str) {
        self.state()
            .scripts
            .insert(step.to_string(), Script::Fail { remaining: None });
    }

    /// The next `times` calls of `step` fail.
    pub fn fail_step_times(&self, step: &str, times: usize) {
        self.state().scripts.insert(
            step.to_string(),
            Script::Fail {
                remaining: Some(times),
            },
        );
    }

    /// Calls of `step` panic.
    pub fn panic_on_step(&self, step: &str) {
        self.state().scripts.insert(step.to_string(), Script::Panic);
    }

    /// Calls of `step` take `delay` unless cancelled.
    pub fn delay_step(&self, step: &str, delay: Duration) {
        self.state().delays.insert(step.to_string(), delay);
    }

    /// The next call of `step` sleeps `stall` without watching cancellation.
    pub fn stall_step_once(&self, step: &str, stall: Duration) {
        self.state().stalls.insert(step.to_string(), stall);
    }

    /// Continuous encodes exit with an error after `after`.
    pub fn encode_exits_after(&self, after: Option<Duration>) {
        *self
            .encode_exit_after
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = after;
    }

    /// Every transcode request received so far.
    pub fn requests(&self) -> Vec<TranscodeRequest> {
        self.state().requests.clone()
    }

    /// Requests of one step, in order.
    pub fn requests_for(&self, step: &str) -> Vec<TranscodeRequest> {
        self.state()
            .requests
            .iter()
            .filter(|r| r.step == step)
            .cloned()
            .collect()
    }

    /// Every continuous encode started so far.
    pub fn encodes(&self) -> Vec<ContinuousEncodeSpec> {
        self.state().encodes.clone()
    }

    /// Bytes received on live audio inputs.
    pub fn audio_bytes(&self) -> u64 {
        self.audio_bytes.load(Ordering::Relaxed)
    }

    /// Continuous encodes currently running.
    pub fn live_encodes(&self) -> usize {
        self.live_encodes.load(Ordering::Relaxed)
    }

    fn take_script(&self, step: &str) -> Option<Script> {
        let mut state = self.state();
        let script = state.scripts.get_mut(step)?;
        match script {
            Script::Fail {
                remaining: Some(0),
            } => None,
            Script::Fail {
                remaining: Some(n),
            } => {
                *n -= 1;
                Some(Script::Fail { remaining: Some(*n) })
            }
            other => Some(*other),
        }
    }
}

async fn wait_cancelled(ctx: &CallContext) {
    match ctx.cancel.clone() {
        Some(mut rx) => loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        },
        None => std::future::pending::<()>().await,
    }
}

#[async_trait]
impl MediaBackend for FakeBackend {
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo> {
        let state = self.state();
        if state.unreadable.iter().any(|p| p == path) {
            return Err(MediaError::unreadable(path, "scripted unreadable"));
        }
        if let Some(info) = state.probes.get(path) {
            return Ok(info.clone());
        }
        if path.exists() {
            return Err(MediaError::unreadable(path, "no probe registered"));
        }
        Err(MediaError::FileNotFound(path.to_path_buf()))
    }

    async fn transcode(&self, request: &TranscodeRequest, ctx: &CallContext) -> MediaResult<()> {
        if ctx.is_cancelled() {
            return Err(MediaError::Cancelled);
        }

        let (delay, stall) = {
            let mut state = self.state();
            state.requests.push(request.clone());
            let stall = state.stalls.remove(&request.step);
            (state.delays.get(&request.step).copied(), stall)
        };

        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }

        if let Some(delay) = delay {
            ctx.report(0.5);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_cancelled(ctx) => return Err(MediaError::Cancelled),
            }
        }

        match self.take_script(&request.step) {
            Some(Script::Panic) => panic!("scripted panic in step {}", request.step),
            Some(Script::Fail { .. }) => {
                return Err(MediaError::ffmpeg_failed(
                    format!("scripted failure in step {}", request.step),
                    None,
                    Some(1),
                ))
            }
            None => {}
        }

        let path = &request.output.path;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, PLACEHOLDER).await?;

        let duration = request
            .output
            .duration
            .or(request.expected_duration)
            .unwrap_or(0.0);
        self.state()
            .probes
            .insert(path.clone(), MediaInfo::video(duration, 1920, 1080, 30.0));

        ctx.report(1.0);
        Ok(())
    }

    async fn start_continuous_encode(
        &self,
        spec: &ContinuousEncodeSpec,
    ) -> MediaResult<EncodeProcess> {
        self.state().encodes.push(spec.clone());
        let exit_after = *self
            .encode_exit_after
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        let (stop_tx, stop_rx) = watch::channel(false);

        let audio_input = if spec.audio.is_some() {
            let (writer, mut reader) = tokio::io::duplex(64 * 1024);
            let counter = self.audio_bytes.clone();
            let mut stop = stop_rx.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                loop {
                    tokio::select! {
                        read = reader.read(&mut buf) => match read {
                            Ok(0) | Err(_) => break,
                            Ok(n) => { counter.fetch_add(n as u64, Ordering::Relaxed); }
                        },
                        _ = stop.changed() => break,
                    }
                }
            });
            Some(Box::new(writer) as Box<dyn tokio::io::AsyncWrite + Send + Unpin>)
        } else {
            None
        };

        let (mut status_writer, status_reader) = tokio::io::duplex(16 * 1024);
        let mut stop = stop_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(50));
            let mut frame = 0u64;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        frame += 3;
                        let block = format!(
                            "frame={}\nfps=30.0\ndrop_frames=0\ndup_frames=0\nbitrate=4500.0kbits/s\nspeed=1.00x\nprogress=continue\n",
                            frame
                        );
                        if status_writer.write_all(block.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
        });

        self.live_encodes.fetch_add(1, Ordering::Relaxed);
        Ok(EncodeProcess {
            audio_input,
            status: Box::new(BufReader::new(status_reader)),
            handle: Box::new(FakeEncodeHandle {
                stop_tx,
                stop_rx,
                exit_after,
                live: self.live_encodes.clone(),
                finished: false,
            }),
        })
    }
}

struct FakeEncodeHandle {
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    exit_after: Option<Duration>,
    live: Arc<AtomicUsize>,
    finished: bool,
}

impl FakeEncodeHandle {
    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            let _ = self.stop_tx.send(true);
            self.live.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl EncodeHandle for FakeEncodeHandle {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> MediaResult<()> {
        let mut stop = self.stop_rx.clone();
        let exit_after = self.exit_after;
        let exit = async move {
            match exit_after {
                Some(after) => tokio::time::sleep(after).await,
                None => std::future::pending::<()>().await,
            }
        };
        let killed = async move {
            while !*stop.borrow_and_update() {
                if stop.changed().await.is_err() {
                    break;
                }
            }
        };

        tokio::select! {
            _ = killed => {
                self.finish();
                Ok(())
            }
            _ = exit => {
                self.finish();
                Err(MediaError::ffmpeg_failed("scripted encode exit", None, Some(1)))
            }
        }
    }

    async fn kill(&mut self) -> MediaResult<()> {
        self.finish();
        Ok(())
    }
}

impl Drop for FakeEncodeHandle {
    fn drop(&mut self) {
        self.finish();
    }
}
