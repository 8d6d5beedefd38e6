//! Units fed to a live encode: a finite intro unit played once and a loop
//! unit the encoder repeats on its own.

use tracing::info;

use crate::compose::ComposedSequences;
use crate::context::{Artifact, TimelineContext};
use crate::error::{TimelineError, TimelineResult};
use crate::sequence::SequenceAssembler;

/// The two files a continuous encode plays.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamUnits {
    /// Intro sequence followed by the intro-entered loop
    pub intro_unit: Artifact,
    /// Loop entered from itself; repeated without bound
    pub loop_unit: Artifact,
}

/// Build [`StreamUnits`] from composed sequences. A loop is required.
pub async fn build_stream_units(
    ctx: &TimelineContext,
    sequences: &ComposedSequences,
) -> TimelineResult<StreamUnits> {
    let variants = sequences.variants.as_ref().ok_or_else(|| {
        TimelineError::InvalidRequest("a live stream needs at least one loop clip".to_string())
    })?;

    let mut parts = Vec::with_capacity(2);
    parts.extend(sequences.intro_artifact().cloned());
    parts.push(variants.from_intro.clone());

    let intro_unit = SequenceAssembler::new(ctx)
        .concat_as("concat_intro_unit", &parts, "intro-unit")
        .await?;
    let loop_unit = variants.from_loop.clone();

    info!(
        intro_unit = intro_unit.duration,
        loop_unit = loop_unit.duration,
        "Built stream units"
    );
    Ok(StreamUnits {
        intro_unit,
        loop_unit,
    })
}
