//! Render and stream events delivered to observers.

use loopcast_models::{JobId, RenderState, StreamState};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::render_job::RenderOutcome;
use crate::stream::StreamHealth;

/// Event published while a job or stream runs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A render job entered a new state
    Stage {
        job_id: JobId,
        state: RenderState,
        label: String,
    },
    /// Global render progress in `[0, 1]`, never decreasing
    Progress { job_id: JobId, fraction: f64 },
    /// A render job settled
    Finished { outcome: RenderOutcome },
    /// A stream session changed state
    Stream { session_id: JobId, state: StreamState },
    /// Periodic stream health
    Health { session_id: JobId, health: StreamHealth },
}

/// Sending half handed to jobs and sessions.
///
/// Publishing never blocks; a dropped receiver silently discards events.
#[derive(Debug, Clone, Default)]
pub struct EventChannel {
    tx: Option<mpsc::UnboundedSender<EngineEvent>>,
}

impl EventChannel {
    /// Channel plus the receiver observers read from.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Channel that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn publish(&self, event: EngineEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                debug!("Event receiver dropped");
            }
        }
    }

    pub fn stage(&self, job_id: &JobId, state: RenderState) {
        self.publish(EngineEvent::Stage {
            job_id: job_id.clone(),
            state,
            label: state.label().to_string(),
        });
    }

    pub fn progress(&self, job_id: &JobId, fraction: f64) {
        self.publish(EngineEvent::Progress {
            job_id: job_id.clone(),
            fraction,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_reach_receiver() {
        let (channel, mut rx) = EventChannel::new();
        let job = JobId::from_string("job-1");
        channel.stage(&job, RenderState::ProcessingClips);
        channel.progress(&job, 0.2);

        match rx.recv().await.unwrap() {
            EngineEvent::Stage { state, label, .. } => {
                assert_eq!(state, RenderState::ProcessingClips);
                assert_eq!(label, "Processing clips");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(rx.recv().await.unwrap(), EngineEvent::Progress { .. }));
    }

    #[test]
    fn test_disabled_channel_discards() {
        EventChannel::disabled().progress(&JobId::new(), 1.0);
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = EngineEvent::Progress {
            job_id: JobId::from_string("j"),
            fraction: 0.5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["job_id"], "j");
    }
}
