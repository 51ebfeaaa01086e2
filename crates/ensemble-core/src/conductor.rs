//! Auto-intensity conductor.
//!
//! While auto intensity is on, the band intensity drifts toward a target
//! energy. A new target is picked on the first step of every measure that
//! leads into another section (or back round to the top), from:
//!
//! - the energy of the next section's label, see [`section_energy`]
//! - a slow macro arc over eight passes through the form
//! - a little seeded jitter
//!
//! The conductor runs on the transport side. Its decisions reach the
//! generator as ordinary `SET_BAND_INTENSITY` deltas.

use crate::state::Arrangement;
use crate::timing::Step;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Label keywords and their energy, matched in order.
const SECTION_ENERGY: &[(&str, f32)] = &[
    ("intro", 0.4),
    ("verse", 0.5),
    ("pre-chorus", 0.6),
    ("build", 0.7),
    ("chorus", 0.9),
    ("drop", 1.0),
    ("bridge", 0.6),
    ("solo", 0.8),
    ("outro", 0.4),
    ("breakdown", 0.3),
];

/// Intensity never ramps below this.
const FLOOR: f32 = 0.01;
/// Closer than this to the target counts as arrived.
const SETTLED: f32 = 0.001;
/// Energy drops faster than it builds.
const FALL_RATE: f32 = 2.5;

/// Baseline energy for a section label; 0.5 when no keyword matches.
pub fn section_energy(label: &str) -> f32 {
    let label = label.to_lowercase();
    SECTION_ENERGY
        .iter()
        .find(|(keyword, _)| label.contains(keyword))
        .map_or(0.5, |&(_, energy)| energy)
}

/// Energy floor and ceiling for a pass through the form.
fn macro_arc(form_iteration: u64) -> (f32, f32) {
    match form_iteration % 8 {
        0 => (0.15, 0.45),
        1 | 2 => (0.35, 0.75),
        3 | 4 => (0.60, 1.0),
        5 | 6 => (0.30, 0.60),
        _ => (0.10, 0.35),
    }
}

/// Ramps band intensity between section targets.
#[derive(Clone, Debug, PartialEq)]
pub struct Conductor {
    target: f32,
    /// Intensity change per step on the way up.
    step_size: f32,
    /// Completed passes through the arrangement.
    form_iteration: u64,
}

impl Default for Conductor {
    fn default() -> Self {
        Self {
            target: 0.5,
            step_size: 0.0005,
            form_iteration: 0,
        }
    }
}

impl Conductor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn form_iteration(&self) -> u64 {
        self.form_iteration
    }

    /// Play `step` at the given intensity and return the intensity for the
    /// next step.
    pub fn advance(&mut self, step: Step, intensity: f32, arrangement: &Arrangement) -> f32 {
        self.retarget(step, intensity, arrangement);

        let gap = self.target - intensity;
        if gap.abs() <= SETTLED {
            return intensity;
        }
        let next = if gap > 0.0 {
            (intensity + self.step_size.abs()).min(self.target)
        } else {
            (intensity - self.step_size.abs() * FALL_RATE).max(self.target)
        };
        next.clamp(FLOOR, 1.0)
    }

    /// Pick a new target when the measure starting at `step` is the last
    /// one before a section change.
    fn retarget(&mut self, step: Step, intensity: f32, arrangement: &Arrangement) {
        let total = arrangement.total_steps;
        if total == 0 {
            return;
        }
        let song_step = step % total;
        let position = arrangement.measure_map.lookup(song_step);
        if position.measure_step != 0 {
            return;
        }
        let measure_end = position.segment.end_step.min(total);
        let loop_end = measure_end >= total;
        let (Some(current), Some(next)) = (
            arrangement.section_at(measure_end - 1),
            arrangement.section_at(measure_end),
        ) else {
            return;
        };
        if !loop_end && current.start_step == next.start_step {
            return;
        }
        if loop_end {
            self.form_iteration += 1;
        }

        let mut rng = StdRng::seed_from_u64(step ^ self.form_iteration.rotate_left(32));
        let (floor, ceiling) = macro_arc(self.form_iteration);
        let mut target = section_energy(&next.label).clamp(floor, ceiling);
        target = (target + rng.random_range(-0.075..0.075)).clamp(0.1, 1.0);
        if loop_end {
            target = (target + rng.random_range(-0.1..0.1)).clamp(0.3, 0.95);
        }

        let measure_len = (measure_end - song_step).max(1);
        self.target = target;
        self.step_size = (target - intensity) / measure_len as f32;
        log::debug!(
            "[CONDUCTOR] step {}: heading for {:.2} into {:?} (pass {})",
            step,
            target,
            next.label,
            self.form_iteration
        );
    }
}
