//! Render jobs, live stream sessions and the engine around them.
//!
//! This crate provides:
//! - The render job state machine and its report
//! - A single-active-job controller with a progress poller
//! - Live stream sessions with restart policy, health and a live audio pipe
//! - Configuration, job logging, metrics and restart backoff

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod render_job;
pub mod retry;
pub mod stream;

pub use config::EngineConfig;
pub use controller::{JobHandle, RenderController};
pub use error::{WorkerError, WorkerResult};
pub use events::{EngineEvent, EventChannel};
pub use logging::JobLogger;
pub use render_job::{JobSnapshot, JobStatus, RenderJob, RenderOutcome, RenderReport};
pub use retry::{FailureRecord, FailureTracker, RestartPolicy};
pub use stream::{AudioPump, AudioSource, DecodedFileSource, StreamHealth, StreamSession};
