//! Mapping of per-stage progress onto one global fraction.

use loopcast_media::FractionCallback;
use loopcast_models::RenderState;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Global `[lo, hi)` window owned by each render stage.
pub fn stage_window(state: RenderState) -> Option<(f64, f64)> {
    match state {
        RenderState::Idle | RenderState::Starting => Some((0.0, 0.0)),
        RenderState::RenderingAudio => Some((0.0, 0.10)),
        RenderState::ProcessingClips => Some((0.10, 0.35)),
        RenderState::RenderingCrossfades => Some((0.35, 0.65)),
        RenderState::AssemblingTimeline => Some((0.65, 0.90)),
        RenderState::Finalizing => Some((0.90, 1.0)),
        RenderState::Completed => Some((1.0, 1.0)),
        RenderState::Failed | RenderState::Cancelled => None,
    }
}

/// Monotonic global progress shared between the worker and the poller.
///
/// Written by whatever stage is running, read lock-free by observers.
#[derive(Debug, Default)]
pub struct ProgressWindowMapper {
    bits: AtomicU64,
}

impl ProgressWindowMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `local` progress of `state`; returns the global value.
    ///
    /// Values that would move progress backwards are ignored.
    pub fn report(&self, state: RenderState, local: f64) -> f64 {
        let Some((lo, hi)) = stage_window(state) else {
            return self.current();
        };
        let local = if local.is_finite() { local.clamp(0.0, 1.0) } else { 0.0 };
        self.raise(lo + (hi - lo) * local)
    }

    /// Move progress to the start of `state`'s window.
    pub fn enter(&self, state: RenderState) -> f64 {
        self.report(state, 0.0)
    }

    pub fn current(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    fn raise(&self, value: f64) -> f64 {
        let mut current = self.bits.load(Ordering::Acquire);
        loop {
            let existing = f64::from_bits(current);
            if value <= existing {
                return existing;
            }
            match self.bits.compare_exchange_weak(
                current,
                value.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return value,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Progress of one stage made of a known number of backend calls.
#[derive(Clone)]
pub struct StageProgress {
    mapper: Arc<ProgressWindowMapper>,
    state: RenderState,
    expected_steps: usize,
    done: Arc<AtomicUsize>,
}

impl StageProgress {
    pub fn new(mapper: Arc<ProgressWindowMapper>, state: RenderState, expected_steps: usize) -> Self {
        mapper.enter(state);
        Self {
            mapper,
            state,
            expected_steps: expected_steps.max(1),
            done: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    fn local(&self, call_fraction: f64) -> f64 {
        let done = self.done.load(Ordering::Acquire) as f64;
        ((done + call_fraction) / self.expected_steps as f64).min(1.0)
    }

    /// Callback for the call currently in flight.
    pub fn callback(&self) -> FractionCallback {
        let this = self.clone();
        Arc::new(move |fraction| {
            this.mapper.report(this.state, this.local(fraction));
        })
    }

    /// Record one finished backend call.
    pub fn step_done(&self) {
        self.done.fetch_add(1, Ordering::AcqRel);
        self.mapper.report(self.state, self.local(0.0));
    }

    /// Mark the whole stage finished.
    pub fn finish(&self) {
        self.mapper.report(self.state, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_are_contiguous() {
        let order = [
            RenderState::RenderingAudio,
            RenderState::ProcessingClips,
            RenderState::RenderingCrossfades,
            RenderState::AssemblingTimeline,
            RenderState::Finalizing,
        ];
        let mut end = 0.0;
        for state in order {
            let (lo, hi) = stage_window(state).unwrap();
            assert!((lo - end).abs() < 1e-9);
            assert!(hi > lo);
            end = hi;
        }
        assert!((end - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_report_maps_into_window() {
        let mapper = ProgressWindowMapper::new();
        let global = mapper.report(RenderState::RenderingCrossfades, 0.5);
        assert!((global - 0.50).abs() < 1e-9);
    }

    #[test]
    fn test_progress_never_decreases() {
        let mapper = ProgressWindowMapper::new();
        mapper.report(RenderState::AssemblingTimeline, 0.4);
        let before = mapper.current();
        mapper.report(RenderState::ProcessingClips, 1.0);
        mapper.report(RenderState::AssemblingTimeline, 0.1);
        mapper.report(RenderState::Failed, 1.0);
        assert_eq!(mapper.current(), before);
    }

    #[test]
    fn test_stage_progress_counts_steps() {
        let mapper = Arc::new(ProgressWindowMapper::new());
        let stage = StageProgress::new(mapper.clone(), RenderState::ProcessingClips, 4);
        assert!((mapper.current() - 0.10).abs() < 1e-9);

        stage.step_done();
        stage.step_done();
        assert!((mapper.current() - 0.225).abs() < 1e-9);

        (stage.callback())(0.5);
        assert!((mapper.current() - 0.25625).abs() < 1e-9);

        stage.finish();
        assert!((mapper.current() - 0.35).abs() < 1e-9);
    }
}
