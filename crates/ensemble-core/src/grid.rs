//! Step to measure/beat/group coordinates.
//!
//! Pure functions only: the playhead renderer calls [`resolve`] every
//! frame and the generator calls it for every step it fills.

use crate::timing::{Step, TimeSignature};
use serde::{Deserialize, Serialize};

/// Structural coordinates of a step inside its measure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepInfo {
    /// Offset of the step from the start of its measure.
    pub measure_step: u32,
    pub is_measure_start: bool,
    /// Zero-based beat within the measure.
    pub beat_index: u32,
    pub is_beat_start: bool,
    /// Zero-based accent group within the measure.
    pub group_index: u32,
    /// Offset of the step from the start of its group.
    pub step_in_group: u32,
    pub is_group_start: bool,
}

/// Resolve a global step against a time signature.
///
/// `grouping` overrides the signature's default accent grouping; an
/// override that does not partition the measure's beats is ignored.
/// Only the group fields depend on the grouping.
pub fn resolve(step: Step, signature: TimeSignature, grouping: Option<&[u32]>) -> StepInfo {
    let spm = u64::from(signature.steps_per_measure());
    let measure_step = (step % spm) as u32;
    resolve_measure_step(measure_step, signature, grouping)
}

/// Like [`resolve`], for a step already reduced to its measure offset.
pub fn resolve_measure_step(
    measure_step: u32,
    signature: TimeSignature,
    grouping: Option<&[u32]>,
) -> StepInfo {
    let measure_step = measure_step % signature.steps_per_measure();
    let steps_per_beat = signature.steps_per_beat();
    let grouping = effective_grouping(signature, grouping);

    let mut group_start = 0;
    let mut group_index = 0;
    let mut step_in_group = measure_step;
    for (index, beats) in grouping.iter().enumerate() {
        let width = beats * steps_per_beat;
        if measure_step < group_start + width {
            group_index = index as u32;
            step_in_group = measure_step - group_start;
            break;
        }
        group_start += width;
    }

    StepInfo {
        measure_step,
        is_measure_start: measure_step == 0,
        beat_index: measure_step / steps_per_beat,
        is_beat_start: measure_step % steps_per_beat == 0,
        group_index,
        step_in_group,
        is_group_start: step_in_group == 0,
    }
}

/// The grouping `resolve` actually walks for this signature and override.
pub fn effective_grouping(signature: TimeSignature, grouping: Option<&[u32]>) -> &[u32] {
    match grouping {
        Some(g) if signature.validate_grouping(g).is_ok() => g,
        _ => signature.default_grouping(),
    }
}
