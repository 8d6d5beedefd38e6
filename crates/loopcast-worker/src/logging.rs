//! Structured logging for render jobs and stream sessions.
//!
//! Every line carries the job id and the operation; stage lines also carry
//! the stage name and the time since the job started.

use loopcast_models::JobId;
use std::fmt::Display;
use std::time::Instant;
use tracing::{error, info, warn, Span};

/// Logger bound to one job or session.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: &'static str,
    started: Instant,
}

impl JobLogger {
    /// `operation` is `"render"` or `"stream"`.
    pub fn new(job_id: &JobId, operation: &'static str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation,
            started: Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            "Job started: {}", message
        );
    }

    /// A stage or state transition.
    pub fn log_stage(&self, stage: impl Display, label: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            stage = %stage,
            elapsed_ms = self.elapsed_ms(),
            "{}", label
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = self.operation,
            elapsed_ms = self.elapsed_ms(),
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = self.operation,
            elapsed_ms = self.elapsed_ms(),
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Span every log line of the job is nested under.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            operation = self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopcast_models::RenderState;

    #[test]
    fn test_logger_carries_job_and_operation() {
        let job_id = JobId::from_string("render-1");
        let logger = JobLogger::new(&job_id, "render");

        assert_eq!(logger.job_id(), "render-1");
        assert_eq!(logger.operation(), "render");
        logger.log_stage(RenderState::ProcessingClips, RenderState::ProcessingClips.label());
    }
}
