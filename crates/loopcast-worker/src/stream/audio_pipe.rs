//! Live audio pipe into the continuous encode.
//!
//! The writer half lives on the real-time audio thread and never blocks:
//! it converts samples to interleaved f32le, applies the connection fade-in
//! and hands fixed-size chunks to a bounded queue with `try_send`. The drain
//! half runs on the runtime and writes chunks to the encoder with a timeout.
//! The only state the two halves share is [`PipeCounters`].

use loopcast_models::StreamAudioFormat;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::metrics;

/// Length of the linear fade applied after every (re)connection.
pub const FADE_IN_SECS: f64 = 2.0;

/// Chunks queued between the audio thread and the drain.
const QUEUE_CHUNKS: usize = 64;

const BYTES_PER_SAMPLE: usize = 4;

/// Lock-free counters shared by both halves of the pipe.
#[derive(Debug, Default)]
pub struct PipeCounters {
    connected: AtomicBool,
    /// Bumped on every connect so the writer restarts its fade-in
    generation: AtomicU64,
    bytes_written: AtomicU64,
    samples_sent: AtomicU64,
    dropped_chunks: AtomicU64,
    disconnects: AtomicU64,
}

impl PipeCounters {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Bytes the encoder accepted.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Samples queued by the audio thread.
    pub fn samples_sent(&self) -> u64 {
        self.samples_sent.load(Ordering::Relaxed)
    }

    /// Chunks discarded because the queue was full.
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks.load(Ordering::Relaxed)
    }

    pub fn disconnects(&self) -> u64 {
        self.disconnects.load(Ordering::Relaxed)
    }

    fn connect(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.connected.store(true, Ordering::Release);
    }

    /// Returns whether this call flipped the flag.
    fn disconnect(&self) -> bool {
        let was = self.connected.swap(false, Ordering::AcqRel);
        if was {
            self.disconnects.fetch_add(1, Ordering::Relaxed);
        }
        was
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

/// Linear gain ramp over a fixed number of frames.
#[derive(Debug, Clone)]
struct FadeIn {
    total_frames: u64,
    done_frames: u64,
}

impl FadeIn {
    fn new(sample_rate: u32) -> Self {
        Self {
            total_frames: (sample_rate as f64 * FADE_IN_SECS).round() as u64,
            done_frames: 0,
        }
    }

    fn restart(&mut self) {
        self.done_frames = 0;
    }

    fn next_gain(&mut self) -> f32 {
        if self.done_frames >= self.total_frames {
            return 1.0;
        }
        let gain = self.done_frames as f32 / self.total_frames as f32;
        self.done_frames += 1;
        gain
    }
}

/// Audio-thread half of the pipe.
pub struct AudioPipeWriter {
    tx: mpsc::Sender<Vec<u8>>,
    counters: Arc<PipeCounters>,
    channels: usize,
    chunk_bytes: usize,
    fade: FadeIn,
    seen_generation: u64,
    pending: Vec<u8>,
}

impl AudioPipeWriter {
    /// Write interleaved samples. Never blocks; returns `false` while the
    /// pipe is disconnected and the samples were discarded.
    pub fn write(&mut self, samples: &[f32]) -> bool {
        if !self.counters.is_connected() {
            self.pending.clear();
            return false;
        }

        let generation = self.counters.generation();
        if generation != self.seen_generation {
            self.seen_generation = generation;
            self.fade.restart();
            self.pending.clear();
        }

        for frame in samples.chunks(self.channels) {
            let gain = self.fade.next_gain();
            for sample in frame {
                self.pending.extend_from_slice(&(sample * gain).to_le_bytes());
            }
        }
        self.counters
            .samples_sent
            .fetch_add(samples.len() as u64, Ordering::Relaxed);

        while self.pending.len() >= self.chunk_bytes {
            let rest = self.pending.split_off(self.chunk_bytes);
            let chunk = std::mem::replace(&mut self.pending, rest);
            match self.tx.try_send(chunk) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.counters.dropped_chunks.fetch_add(1, Ordering::Relaxed);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    if self.counters.disconnect() {
                        metrics::record_audio_disconnect();
                    }
                    self.pending.clear();
                    return false;
                }
            }
        }
        true
    }

    pub fn counters(&self) -> Arc<PipeCounters> {
        self.counters.clone()
    }
}

/// Runtime half of the pipe; reattached to each new encoder process.
pub struct AudioPipeDrain {
    rx: mpsc::Receiver<Vec<u8>>,
    counters: Arc<PipeCounters>,
    write_timeout: Duration,
}

/// Create a connected-on-attach pipe for `format`.
///
/// `chunk_bytes` is rounded down to whole frames.
pub fn audio_pipe(
    format: StreamAudioFormat,
    chunk_bytes: usize,
    write_timeout: Duration,
) -> (AudioPipeWriter, AudioPipeDrain) {
    let channels = usize::from(format.channels.max(1));
    let frame_bytes = channels * BYTES_PER_SAMPLE;
    let chunk_bytes = (chunk_bytes / frame_bytes).max(1) * frame_bytes;
    let (tx, rx) = mpsc::channel(QUEUE_CHUNKS);
    let counters = Arc::new(PipeCounters::default());

    let writer = AudioPipeWriter {
        tx,
        counters: counters.clone(),
        channels,
        chunk_bytes,
        fade: FadeIn::new(format.sample_rate),
        seen_generation: 0,
        pending: Vec::with_capacity(chunk_bytes * 2),
    };
    let drain = AudioPipeDrain {
        rx,
        counters,
        write_timeout,
    };
    (writer, drain)
}

impl AudioPipeDrain {
    pub fn counters(&self) -> Arc<PipeCounters> {
        self.counters.clone()
    }

    /// Forward queued chunks into `sink` until `stop` fires or a write
    /// fails or times out. Returns the drain for the next encoder process.
    pub async fn run(
        mut self,
        mut sink: Box<dyn AsyncWrite + Send + Unpin>,
        mut stop: watch::Receiver<bool>,
    ) -> Self {
        // Discard audio queued while nobody was listening
        while self.rx.try_recv().is_ok() {}
        self.counters.connect();
        info!("Live audio pipe connected");

        loop {
            let chunk = tokio::select! {
                chunk = self.rx.recv() => match chunk {
                    Some(chunk) => chunk,
                    None => break,
                },
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                    continue;
                }
            };

            match tokio::time::timeout(self.write_timeout, sink.write_all(&chunk)).await {
                Ok(Ok(())) => {
                    self.counters
                        .bytes_written
                        .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                }
                Ok(Err(e)) => {
                    self.mark_disconnected(&format!("write failed: {}", e));
                    return self;
                }
                Err(_) => {
                    self.mark_disconnected(&format!(
                        "write timed out after {}ms",
                        self.write_timeout.as_millis()
                    ));
                    return self;
                }
            }
        }

        let _ = sink.shutdown().await;
        if self.counters.disconnect() {
            debug!("Live audio pipe closed");
        }
        self
    }

    fn mark_disconnected(&self, reason: &str) {
        if self.counters.disconnect() {
            metrics::record_audio_disconnect();
            warn!(bytes_written = self.counters.bytes_written(), "Live audio pipe disconnected: {}", reason);
        }
    }
}
