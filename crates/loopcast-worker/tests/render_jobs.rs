//! Render job integration tests against the recording backend.

mod common;

use common::{arenas_left, eventually, Fixture};
use loopcast_media::{InputSpec, VideoOutput};
use loopcast_models::{
    AudioTrackSpec, ClipDescriptor, ClipRole, FadeConfig, OverlayDescriptor, RenderRequest,
    RenderState,
};
use loopcast_worker::{EngineEvent, EventChannel, RenderController};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// Intro A(5s, 1s crossfade), loops B(4s) and C(3s) with 1s crossfades.
async fn example_request(fx: &Fixture, target: f64) -> RenderRequest {
    let a = fx.video("a.mp4", 10.0).await;
    let b = fx.video("b.mp4", 10.0).await;
    let c = fx.video("c.mp4", 10.0).await;
    RenderRequest::new(
        vec![
            ClipDescriptor::new(&a, ClipRole::Intro, 5.0).with_crossfade(1.0),
            ClipDescriptor::new(&b, ClipRole::Loop, 4.0).with_crossfade(1.0),
            ClipDescriptor::new(&c, ClipRole::Loop, 3.0).with_crossfade(1.0),
        ],
        target,
        fx.output("final.mp4"),
    )
}

fn controller(fx: &Fixture) -> (RenderController, UnboundedReceiver<EngineEvent>) {
    let (events, rx) = EventChannel::new();
    let controller =
        RenderController::new(Arc::new(fx.backend.clone()), fx.config()).with_events(events);
    (controller, rx)
}

async fn drain_events(rx: &mut UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
    // Let the poller observe the terminal state
    tokio::time::sleep(Duration::from_millis(60)).await;
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Test the 30 second example end to end.
#[tokio::test]
async fn test_example_renders_exact_target() {
    let fx = Fixture::new();
    let request = example_request(&fx, 30.0).await;
    let output = request.output.clone();
    let (controller, mut rx) = controller(&fx);

    let outcome = controller.start(request).await.wait().await;
    assert_eq!(outcome.state, RenderState::Completed, "error: {:?}", outcome.error);

    let report = outcome.report.expect("completed job has a report");
    assert_eq!(report.repeats, 5);
    assert!((report.provisional_duration - 34.0).abs() < 1e-9);
    assert_eq!(report.degraded_transitions, 0);
    assert_eq!(report.target_duration, 30.0);
    assert!(output.exists());

    let concat = fx.backend.requests_for("concat_timeline");
    assert_eq!(concat.len(), 1);
    let list = match &concat[0].inputs[0] {
        InputSpec::ConcatList(path) => path.clone(),
        other => panic!("unexpected input {:?}", other),
    };
    // The list lived in the arena, which is gone now
    assert!(!list.exists());

    let trim = fx.backend.requests_for("trim");
    assert_eq!(trim.len(), 1);
    assert_eq!(trim[0].output.duration, Some(30.0));
    assert_eq!(trim[0].output.video, VideoOutput::Copy);
    assert_eq!(arenas_left(&fx.work_dir()), 0);

    let events = drain_events(&mut rx).await;
    let stages: Vec<RenderState> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Stage { state, .. } => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        stages,
        vec![
            RenderState::Starting,
            RenderState::RenderingAudio,
            RenderState::ProcessingClips,
            RenderState::RenderingCrossfades,
            RenderState::AssemblingTimeline,
            RenderState::Finalizing,
            RenderState::Completed,
        ]
    );

    let progress: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::Progress { fraction, .. } => Some(*fraction),
            _ => None,
        })
        .collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {:?}", progress);
    assert_eq!(progress.last().copied(), Some(1.0));
    assert!(events.iter().any(|e| matches!(e, EngineEvent::Finished { .. })));
}

/// Test an intro-only timeline shorter than the intro.
#[tokio::test]
async fn test_intro_only_is_trimmed() {
    let fx = Fixture::new();
    let a = fx.video("a.mp4", 10.0).await;
    let request = RenderRequest::new(
        vec![ClipDescriptor::new(&a, ClipRole::Intro, 5.0)],
        3.0,
        fx.output("intro.mp4"),
    );
    let output = request.output.clone();
    let (controller, _rx) = controller(&fx);

    let outcome = controller.start(request).await.wait().await;
    assert_eq!(outcome.state, RenderState::Completed, "error: {:?}", outcome.error);
    let report = outcome.report.expect("completed job has a report");
    assert_eq!(report.repeats, 0);
    assert!(output.exists());

    assert!(fx.backend.requests_for("extract").is_empty());
    assert!(fx.backend.requests_for("concat_timeline").is_empty());
    assert_eq!(fx.backend.requests_for("trim")[0].output.duration, Some(3.0));
}

/// Test that an intro-only target longer than the intro fails before rendering.
#[tokio::test]
async fn test_intro_only_longer_target_fails_early() {
    let fx = Fixture::new();
    let a = fx.video("a.mp4", 10.0).await;
    let request = RenderRequest::new(
        vec![ClipDescriptor::new(&a, ClipRole::Intro, 5.0)],
        30.0,
        fx.output("intro.mp4"),
    );
    let output = request.output.clone();
    let (controller, _rx) = controller(&fx);

    let outcome = controller.start(request).await.wait().await;
    assert_eq!(outcome.state, RenderState::Failed);
    assert!(outcome.error.unwrap_or_default().contains("no loop clips"));
    assert!(fx.backend.requests_for("conform").is_empty());
    assert!(!output.exists());
}

/// Test audio, fades and overlays flowing into the final mux.
#[tokio::test]
async fn test_audio_and_overlays_reach_the_mux() {
    let fx = Fixture::new();
    let mut request = example_request(&fx, 30.0).await;
    let song = fx.audio("song.mp3", 12.0).await;
    let logo = fx.video("logo.mov", 4.0).await;
    request.audio = Some(AudioTrackSpec {
        source: song,
        loudness: None,
    });
    request.fades = FadeConfig::new(2.0, 3.0);
    request.overlays = vec![OverlayDescriptor::new(&logo)
        .with_period(10.0)
        .with_appearance_duration(2.0)];
    let (controller, _rx) = controller(&fx);

    let outcome = controller.start(request).await.wait().await;
    assert_eq!(outcome.state, RenderState::Completed, "error: {:?}", outcome.error);
    let report = outcome.report.expect("completed job has a report");
    assert_eq!(report.overlay_appearances, vec![3]);

    let conform = fx.backend.requests_for("audio_conform");
    assert_eq!(conform.len(), 1);
    assert_eq!(conform[0].output.duration, Some(30.0));

    assert_eq!(fx.backend.requests_for("overlay_composite").len(), 1);

    let mux = fx.backend.requests_for("mux");
    assert_eq!(mux.len(), 1);
    assert_eq!(mux[0].output.duration, Some(30.0));
    assert_eq!(mux[0].output.video, VideoOutput::Copy);
}

/// Test that a failing step fails the job without writing the output.
#[tokio::test]
async fn test_failed_step_leaves_no_output() {
    let fx = Fixture::new();
    let mut request = example_request(&fx, 30.0).await;
    let logo = fx.video("logo.mov", 4.0).await;
    request.overlays = vec![OverlayDescriptor::new(&logo).with_period(10.0)];
    let output = request.output.clone();
    fx.backend.fail_step("overlay_composite");
    let (controller, _rx) = controller(&fx);

    let handle = controller.start(request).await;
    let outcome = handle.wait().await;
    assert_eq!(outcome.state, RenderState::Failed);
    assert!(outcome.error.unwrap_or_default().contains("overlay_composite"));
    assert!(!output.exists());
    assert!(fx.backend.requests_for("mux").is_empty());
    assert_eq!(handle.snapshot().state, RenderState::Failed);
    assert_eq!(arenas_left(&fx.work_dir()), 0);
}

/// Test that a missing source fails at the start.
#[tokio::test]
async fn test_missing_source_fails() {
    let fx = Fixture::new();
    let mut request = example_request(&fx, 30.0).await;
    request.clips.push(ClipDescriptor::new(
        fx.dir.path().join("missing.mp4"),
        ClipRole::Loop,
        3.0,
    ));
    let (controller, _rx) = controller(&fx);

    let outcome = controller.start(request).await.wait().await;
    assert_eq!(outcome.state, RenderState::Failed);
    assert!(outcome.error.unwrap_or_default().contains("missing.mp4"));
    assert!(fx.backend.requests_for("conform").is_empty());
}

/// Test that a source the backend cannot decode fails the job.
#[tokio::test]
async fn test_unreadable_source_fails() {
    let fx = Fixture::new();
    let request = example_request(&fx, 30.0).await;
    fx.backend.mark_unreadable(fx.dir.path().join("c.mp4"));
    let (controller, _rx) = controller(&fx);

    let outcome = controller.start(request).await.wait().await;
    assert!(!outcome.is_completed());
    assert_eq!(outcome.state, RenderState::Failed);
    assert!(outcome.error.unwrap_or_default().contains("c.mp4"));
    assert!(!fx.output("final.mp4").exists());
}

/// Test cooperative cancellation mid-stage.
#[tokio::test]
async fn test_cancel_settles_cancelled() {
    let fx = Fixture::new();
    let request = example_request(&fx, 30.0).await;
    let output = request.output.clone();
    fx.backend.delay_step("conform", Duration::from_secs(10));
    let (controller, _rx) = controller(&fx);

    let handle = controller.start(request).await;
    assert!(
        eventually(Duration::from_secs(5), || {
            handle.snapshot().state == RenderState::ProcessingClips
        })
        .await
    );
    assert!(controller.cancel().await);

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("cancelled job settles promptly");
    assert_eq!(outcome.state, RenderState::Cancelled);
    assert!(outcome.error.is_none());
    assert!(!output.exists());
    assert!(fx.backend.requests_for("extract").is_empty());
    assert_eq!(arenas_left(&fx.work_dir()), 0);

    // Nothing left to cancel
    assert!(!controller.cancel().await);
}

/// Stall `step`, cancel once the job is in `state` and check nothing is
/// left behind.
async fn assert_cancel_during(step: &str, state: RenderState) {
    let fx = Fixture::new();
    let mut request = example_request(&fx, 30.0).await;
    let song = fx.audio("song.mp3", 12.0).await;
    request.audio = Some(AudioTrackSpec {
        source: song,
        loudness: None,
    });
    let output = request.output.clone();
    fx.backend.delay_step(step, Duration::from_secs(10));
    let (controller, _rx) = controller(&fx);

    let handle = controller.start(request).await;
    assert!(
        eventually(Duration::from_secs(5), || {
            !fx.backend.requests_for(step).is_empty()
        })
        .await,
        "{} never ran",
        step
    );
    assert_eq!(handle.snapshot().state, state);
    assert!(controller.cancel().await);

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("cancelled job settles promptly");
    assert_eq!(outcome.state, RenderState::Cancelled, "step {}", step);
    assert!(!output.exists());
    assert_eq!(arenas_left(&fx.work_dir()), 0);
}

/// Test cancellation while crossfades render.
#[tokio::test]
async fn test_cancel_during_crossfades() {
    assert_cancel_during("blend", RenderState::RenderingCrossfades).await;
}

/// Test cancellation while the timeline is assembled.
#[tokio::test]
async fn test_cancel_during_timeline_assembly() {
    assert_cancel_during("trim", RenderState::AssemblingTimeline).await;
}

/// Test cancellation while the soundtrack is muxed.
#[tokio::test]
async fn test_cancel_during_finalizing() {
    assert_cancel_during("mux", RenderState::Finalizing).await;
}

/// Test that a panicking backend call surfaces as a failed job.
#[tokio::test]
async fn test_panic_becomes_failed() {
    let fx = Fixture::new();
    let request = example_request(&fx, 30.0).await;
    fx.backend.panic_on_step("conform");
    let (controller, mut rx) = controller(&fx);

    let handle = controller.start(request).await;
    let outcome = handle.wait().await;
    assert_eq!(outcome.state, RenderState::Failed);
    assert!(outcome.error.unwrap_or_default().contains("panicked"));
    assert_eq!(handle.snapshot().state, RenderState::Failed);

    let events = drain_events(&mut rx).await;
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::Finished { outcome } if outcome.state == RenderState::Failed
    )));
}

/// Test that starting a job replaces the active one.
#[tokio::test]
async fn test_new_job_replaces_active_job() {
    let fx = Fixture::new();
    let mut slow = example_request(&fx, 30.0).await;
    let song = fx.audio("song.mp3", 12.0).await;
    slow.audio = Some(AudioTrackSpec {
        source: song,
        loudness: None,
    });
    slow.output = fx.output("slow.mp4");
    fx.backend.delay_step("audio_conform", Duration::from_secs(10));

    let fast = example_request(&fx, 20.0).await;
    let fast_output = fast.output.clone();
    let (controller, _rx) = controller(&fx);

    let first = controller.start(slow).await;
    assert!(
        eventually(Duration::from_secs(5), || {
            first.snapshot().state == RenderState::RenderingAudio
        })
        .await
    );

    let second = controller.start(fast).await;
    // start() only returns once the previous job settled
    let replaced = first.try_outcome().expect("previous job settled");
    assert_eq!(replaced.state, RenderState::Cancelled);
    assert!(!fx.output("slow.mp4").exists());

    let outcome = second.wait().await;
    assert_eq!(outcome.state, RenderState::Completed, "error: {:?}", outcome.error);
    assert!(fast_output.exists());
    assert_eq!(
        controller.current().await.map(|h| h.job_id().clone()),
        Some(second.job_id().clone())
    );
}

/// Test that a job ignoring cancellation is aborted once the grace period
/// runs out and still reports an outcome.
#[tokio::test]
async fn test_unresponsive_job_is_aborted_on_replace() {
    let fx = Fixture::new();
    let mut stuck = example_request(&fx, 30.0).await;
    stuck.output = fx.output("stuck.mp4");
    fx.backend.stall_step_once("conform", Duration::from_millis(400));
    let fast = example_request(&fx, 20.0).await;
    let fast_output = fast.output.clone();

    let mut config = fx.config();
    config.cancel_grace = Duration::from_millis(50);
    let controller = RenderController::new(Arc::new(fx.backend.clone()), config);

    let first = controller.start(stuck).await;
    assert!(
        eventually(Duration::from_secs(5), || {
            fx.backend.requests_for("conform").len() == 1
        })
        .await
    );

    let second = controller.start(fast).await;
    let replaced = first.try_outcome().expect("aborted job still reports");
    assert_eq!(replaced.state, RenderState::Cancelled);
    assert!(replaced.error.is_none());
    assert_eq!(first.snapshot().state, RenderState::Cancelled);

    let outcome = second.wait().await;
    assert_eq!(outcome.state, RenderState::Completed, "error: {:?}", outcome.error);
    assert!(fast_output.exists());

    // The stalled call would have ended by now
    let seen = fx.backend.requests().len();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(fx.backend.requests().len(), seen);
    assert!(!fx.output("stuck.mp4").exists());
    assert_eq!(arenas_left(&fx.work_dir()), 0);
}

/// Test that an empty request is rejected.
#[tokio::test]
async fn test_empty_request_fails() {
    let fx = Fixture::new();
    let request = RenderRequest::new(Vec::new(), 10.0, fx.output("x.mp4"));
    let (controller, _rx) = controller(&fx);

    let outcome = controller.start(request).await.wait().await;
    assert_eq!(outcome.state, RenderState::Failed);
    tokio_test::assert_ok!(serde_json::to_string(&outcome));
}
