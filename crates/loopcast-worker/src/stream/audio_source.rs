//! Live audio producers and the real-time pump that drives them.

use async_trait::async_trait;
use loopcast_media::{AudioOutput, CallContext, InputSpec, MediaBackend, OutputSpec, TranscodeRequest, VideoOutput};
use loopcast_models::{EncodingConfig, StreamAudioFormat};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{WorkerError, WorkerResult};
use crate::stream::audio_pipe::AudioPipeWriter;

/// Something that can produce interleaved f32 audio in real time.
#[async_trait]
pub trait AudioSource: Send {
    /// Get ready to produce `format`. Runs before the pump starts.
    async fn prepare(&mut self, format: StreamAudioFormat) -> WorkerResult<()>;

    /// Fill `out` with interleaved samples; returns how many were written.
    /// Called from the audio thread, must not block.
    fn produce_block(&mut self, out: &mut [f32]) -> usize;

    /// Free whatever `prepare` acquired.
    async fn release(&mut self);
}

/// Loops a media file's soundtrack, decoded up front to raw f32.
pub struct DecodedFileSource {
    source: PathBuf,
    scratch: PathBuf,
    backend: Arc<dyn MediaBackend>,
    samples: Vec<f32>,
    position: usize,
}

impl DecodedFileSource {
    /// `scratch` is where the decoded samples are written.
    pub fn new(source: impl Into<PathBuf>, scratch: impl Into<PathBuf>, backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            source: source.into(),
            scratch: scratch.into(),
            backend,
            samples: Vec::new(),
            position: 0,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Decoded sample count.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Interleaved f32le bytes to samples; a trailing partial sample is dropped.
pub fn decode_f32le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[async_trait]
impl AudioSource for DecodedFileSource {
    async fn prepare(&mut self, format: StreamAudioFormat) -> WorkerResult<()> {
        let info = self.backend.probe(&self.source).await?;
        if !info.has_audio {
            return Err(WorkerError::config(format!(
                "{} has no audio stream",
                self.source.display()
            )));
        }

        let output = OutputSpec::video(&self.scratch, EncodingConfig::default())
            .with_video(VideoOutput::Drop)
            .with_audio(AudioOutput::RawF32 {
                sample_rate: format.sample_rate,
                channels: format.channels,
            });
        let request = TranscodeRequest::new("audio_decode", output)
            .input(InputSpec::file(&self.source))
            .expect_duration(info.duration);
        self.backend.transcode(&request, &CallContext::new()).await?;

        let bytes = tokio::fs::read(&self.scratch).await?;
        self.samples = decode_f32le(&bytes);
        self.position = 0;
        if self.samples.is_empty() {
            return Err(WorkerError::config(format!(
                "{} decoded to no samples",
                self.source.display()
            )));
        }
        info!(
            source = %self.source.display(),
            samples = self.samples.len(),
            "Decoded live audio source"
        );
        Ok(())
    }

    fn produce_block(&mut self, out: &mut [f32]) -> usize {
        if self.samples.is_empty() {
            return 0;
        }
        for slot in out.iter_mut() {
            *slot = self.samples[self.position];
            self.position = (self.position + 1) % self.samples.len();
        }
        out.len()
    }

    async fn release(&mut self) {
        self.samples = Vec::new();
        if let Err(e) = tokio::fs::remove_file(&self.scratch).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.scratch.display(), "Failed to remove decoded audio: {}", e);
            }
        }
    }
}

/// Block length the pump produces per iteration.
pub const PUMP_BLOCK: Duration = Duration::from_millis(20);

/// Samples one pump iteration puts on the pipe: what the source produced,
/// or a full block of silence when it produced nothing.
fn samples_written(produced: usize, block_len: usize) -> usize {
    if produced == 0 {
        block_len
    } else {
        produced.min(block_len)
    }
}

/// Drives an [`AudioSource`] at real-time pace on a dedicated OS thread.
pub struct AudioPump {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<Box<dyn AudioSource>>>,
}

impl AudioPump {
    /// Start pumping a prepared source into `writer`.
    pub fn spawn(
        mut source: Box<dyn AudioSource>,
        mut writer: AudioPipeWriter,
        format: StreamAudioFormat,
    ) -> WorkerResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let channels = usize::from(format.channels.max(1));
        let frames_per_block = ((format.sample_rate as f64 * PUMP_BLOCK.as_secs_f64()).round() as usize).max(1);

        let thread = std::thread::Builder::new()
            .name("loopcast-audio".to_string())
            .spawn(move || {
                let mut block = vec![0.0f32; frames_per_block * channels];
                let started = Instant::now();
                let mut frames_sent = 0u64;
                while !flag.load(Ordering::Acquire) {
                    let produced = source.produce_block(&mut block);
                    if produced == 0 {
                        block.fill(0.0);
                        writer.write(&block);
                    } else {
                        writer.write(&block[..produced]);
                    }
                    frames_sent += (samples_written(produced, block.len()) / channels) as u64;

                    let due = started
                        + Duration::from_secs_f64(frames_sent as f64 / format.sample_rate.max(1) as f64);
                    let now = Instant::now();
                    if due > now {
                        std::thread::sleep(due - now);
                    }
                }
                debug!(frames_sent, "Audio pump stopped");
                source
            })?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Stop the thread and hand the source back for release.
    pub async fn stop(mut self) -> Option<Box<dyn AudioSource>> {
        self.stop.store(true, Ordering::Release);
        let thread = self.thread.take()?;
        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(source)) => Some(source),
            _ => {
                warn!("Audio pump thread panicked");
                None
            }
        }
    }
}

impl Drop for AudioPump {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}
