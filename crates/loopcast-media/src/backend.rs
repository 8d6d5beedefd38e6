//! Media transcode backend contract.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::watch;

use crate::error::MediaResult;
use crate::probe::MediaInfo;
use crate::request::{ContinuousEncodeSpec, TranscodeRequest};

/// Callback receiving the fraction `[0, 1]` of the current call.
pub type FractionCallback = Arc<dyn Fn(f64) + Send + Sync + 'static>;

/// Per-call context: cancellation and progress.
#[derive(Clone, Default)]
pub struct CallContext {
    pub cancel: Option<watch::Receiver<bool>>,
    pub progress: Option<FractionCallback>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_progress(mut self, progress: FractionCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    pub fn report(&self, fraction: f64) {
        if let Some(progress) = &self.progress {
            progress(fraction.clamp(0.0, 1.0));
        }
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("cancelled", &self.is_cancelled())
            .field("has_progress", &self.progress.is_some())
            .finish()
    }
}

/// Control over a running continuous encode.
#[async_trait]
pub trait EncodeHandle: Send {
    /// OS process id, when there is one.
    fn id(&self) -> Option<u32>;

    /// Wait for the process to exit. A clean exit is `Ok(())`.
    async fn wait(&mut self) -> MediaResult<()>;

    /// Terminate the process.
    async fn kill(&mut self) -> MediaResult<()>;
}

/// A started continuous encode.
pub struct EncodeProcess {
    /// Live PCM sink, present when the encode was started with an audio format
    pub audio_input: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    /// Periodic `key=value` progress/status lines
    pub status: Box<dyn AsyncBufRead + Send + Unpin>,
    pub handle: Box<dyn EncodeHandle>,
}

/// The external transcode service every stage delegates to.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Duration and geometry of a media file.
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo>;

    /// Run one declarative transcode to completion.
    async fn transcode(&self, request: &TranscodeRequest, ctx: &CallContext) -> MediaResult<()>;

    /// Start a long-running encode pushing to a live destination.
    async fn start_continuous_encode(&self, spec: &ContinuousEncodeSpec)
        -> MediaResult<EncodeProcess>;
}
