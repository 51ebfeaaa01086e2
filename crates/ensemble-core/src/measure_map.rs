//! Per-measure time signature map for arrangements with local meters.
//!
//! The map is rebuilt wholesale whenever the arrangement structure
//! changes and is never edited in place. Lookups are binary searches, so
//! they stay cheap no matter how far the step counter has run.

use crate::error::{Error, Result};
use crate::grid::{self, StepInfo};
use crate::timing::{Step, TimeSignature};
use serde::{Deserialize, Serialize};

/// A contiguous run of steps played in one time signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureSegment {
    pub start_step: Step,
    /// Exclusive.
    pub end_step: Step,
    pub time_signature: TimeSignature,
}

impl MeasureSegment {
    pub fn contains(&self, step: Step) -> bool {
        self.start_step <= step && step < self.end_step
    }

    pub fn len(&self) -> Step {
        self.end_step - self.start_step
    }

    pub fn is_empty(&self) -> bool {
        self.end_step <= self.start_step
    }
}

/// Layout of one arrangement section, as far as the measure map cares.
#[derive(Clone, Debug, PartialEq)]
pub struct SectionLayout {
    /// Local meter; `None` uses the global one.
    pub time_signature: Option<TimeSignature>,
    /// Steps in a single pass through the section.
    pub iteration_steps: Step,
    /// Number of passes (at least one).
    pub repeat: u32,
}

/// Result of a [`MeasureMap::lookup`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeasurePosition {
    /// The owning segment. Beyond the end of the map this is a synthesized
    /// measure of the fallback signature.
    pub segment: MeasureSegment,
    /// Offset of the step inside its measure.
    pub measure_step: u32,
    /// True when the step lies past the last real segment.
    pub extrapolated: bool,
}

/// Sorted, contiguous measure segments plus a fallback signature.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasureMap {
    segments: Vec<MeasureSegment>,
    fallback: TimeSignature,
}

impl MeasureMap {
    /// An empty map: every step resolves against `fallback` from step 0.
    pub fn empty(fallback: TimeSignature) -> Self {
        Self {
            segments: Vec::new(),
            fallback,
        }
    }

    /// Lay out one segment per measure for every section iteration.
    ///
    /// A section iteration that is not a whole number of measures ends in
    /// a truncated measure; the next iteration starts a fresh one.
    pub fn build(sections: &[SectionLayout], global: TimeSignature) -> Self {
        let mut segments = Vec::new();
        let mut cursor: Step = 0;
        for section in sections {
            if section.iteration_steps == 0 {
                continue;
            }
            let signature = section.time_signature.unwrap_or(global);
            let spm = Step::from(signature.steps_per_measure());
            for _ in 0..section.repeat.max(1) {
                let mut offset = 0;
                while offset < section.iteration_steps {
                    let end = (offset + spm).min(section.iteration_steps);
                    segments.push(MeasureSegment {
                        start_step: cursor + offset,
                        end_step: cursor + end,
                        time_signature: signature,
                    });
                    offset += spm;
                }
                cursor += section.iteration_steps;
            }
        }
        log::debug!(
            "[MEASURE_MAP] built {} segments covering {} steps",
            segments.len(),
            cursor
        );
        Self {
            segments,
            fallback: global,
        }
    }

    /// Build a map from explicit segments, checking they are sorted,
    /// non-empty and contiguous.
    pub fn from_segments(segments: Vec<MeasureSegment>, fallback: TimeSignature) -> Result<Self> {
        for (index, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                return Err(Error::InvalidSegment {
                    index,
                    reason: "segment is empty",
                });
            }
            if index > 0 && segments[index - 1].end_step != segment.start_step {
                return Err(Error::InvalidSegment {
                    index,
                    reason: "segment does not start where the previous one ends",
                });
            }
        }
        Ok(Self { segments, fallback })
    }

    pub fn segments(&self) -> &[MeasureSegment] {
        &self.segments
    }

    pub fn fallback(&self) -> TimeSignature {
        self.fallback
    }

    /// First step covered by the map.
    pub fn start_step(&self) -> Step {
        self.segments.first().map_or(0, |s| s.start_step)
    }

    /// First step past the last segment.
    pub fn end_step(&self) -> Step {
        self.segments.last().map_or(0, |s| s.end_step)
    }

    /// Find the measure that owns `step`.
    ///
    /// Past the last segment the fallback signature repeats forever. Its
    /// phase is anchored at the start of the last segment when that segment
    /// already uses the fallback signature, so a trailing measure simply
    /// continues; otherwise it is anchored at the end of the map.
    pub fn lookup(&self, step: Step) -> MeasurePosition {
        let index = self.segments.partition_point(|s| s.end_step <= step);
        if let Some(segment) = self.segments.get(index) {
            if segment.contains(step) {
                let spm = Step::from(segment.time_signature.steps_per_measure());
                return MeasurePosition {
                    segment: *segment,
                    measure_step: ((step - segment.start_step) % spm) as u32,
                    extrapolated: false,
                };
            }
        }

        let anchor = match self.segments.last() {
            Some(last) if last.time_signature == self.fallback => last.start_step,
            Some(last) => last.end_step,
            None => 0,
        };
        let spm = Step::from(self.fallback.steps_per_measure());
        // Steps before the first segment only happen for hand-built maps.
        let offset = step.saturating_sub(anchor);
        let measure_start = step - offset % spm;
        MeasurePosition {
            segment: MeasureSegment {
                start_step: measure_start,
                end_step: measure_start.saturating_add(spm),
                time_signature: self.fallback,
            },
            measure_step: (offset % spm) as u32,
            extrapolated: true,
        }
    }

    /// Time signature in effect at `step`.
    pub fn time_signature_at(&self, step: Step) -> TimeSignature {
        self.lookup(step).segment.time_signature
    }

    /// Structural coordinates of `step`, honouring local meters.
    ///
    /// `grouping` only applies where it partitions the local meter; other
    /// measures use their default grouping.
    pub fn resolve(&self, step: Step, grouping: Option<&[u32]>) -> StepInfo {
        let position = self.lookup(step);
        grid::resolve_measure_step(position.measure_step, position.segment.time_signature, grouping)
    }
}

impl Default for MeasureMap {
    fn default() -> Self {
        Self::empty(TimeSignature::default())
    }
}
