//! Looping timeline composition.
//!
//! This crate provides:
//! - Clip conforming onto a common canvas
//! - Crossfade segment extraction with dissolve fallbacks
//! - Per-role sequence assembly and loop variant extraction
//! - Minimal loop repetition with an exact stream-copy trim
//! - Periodic overlay scheduling composited in one pass
//! - Soundtrack conforming and final muxing
//! - Live stream units and stage progress mapping

pub mod arena;
pub mod audio_mux;
pub mod compose;
pub mod conform;
pub mod context;
pub mod crossfade;
pub mod error;
pub mod loop_variant;
pub mod overlay;
pub mod plan;
pub mod progress_window;
pub mod repetition;
pub mod sequence;
pub mod stream_units;

pub use arena::JobArena;
pub use audio_mux::AudioMuxer;
pub use compose::{
    estimate_sequence_steps, ComposedSequences, ConformedRoles, ResolvedRoles, TimelineComposer,
};
pub use conform::{conform_plan, ClipConformer, ConformPlan, ConformedClip, ResolvedClip};
pub use context::{Artifact, TimelineContext};
pub use crossfade::{
    BlendQuality, CrossfadeSegmentBuilder, RoleSegments, SegmentTriple,
    DEGRADED_TRANSITIONS_METRIC,
};
pub use error::{StepContext, TimelineError, TimelineResult};
pub use loop_variant::{LoopVariantExtractor, LoopVariants};
pub use overlay::{appearance_windows, track_pieces, OverlayScheduler, OverlayTrack};
pub use plan::{clamp_crossfade, RolePlan, Span, TimelinePlan};
pub use progress_window::{stage_window, ProgressWindowMapper, StageProgress};
pub use repetition::{plan_repeats, RepetitionPlan, RepetitionPlanner};
pub use sequence::{AssembledSequence, SequenceAssembler};
pub use stream_units::{build_stream_units, StreamUnits};
