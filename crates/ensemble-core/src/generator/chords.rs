//! Chord comping.

use super::{pitch_at_or_above, StepContext};
use crate::state::Module;
use crate::sync::NoteEvent;
use rand::rngs::StdRng;
use rand::Rng;

/// Close voicing above the module's register floor. Density trims the
/// seventh off thin voicings and doubles the root on rich ones.
fn voicing(ctx: &StepContext<'_>, root: u8, intervals: &[u8]) -> Vec<u8> {
    let base = pitch_at_or_above(root, ctx.settings.octave);
    let density = ctx.settings.density;
    let count = if density < 0.34 {
        intervals.len().min(3)
    } else {
        intervals.len()
    };
    let mut pitches: Vec<u8> = intervals[..count]
        .iter()
        .map(|i| base.saturating_add(*i))
        .collect();
    if density > 0.66 {
        pitches.push(base.saturating_add(12));
    }
    pitches
}

pub(super) fn generate(ctx: &StepContext<'_>, rng: &mut StdRng, out: &mut Vec<NoteEvent>) {
    let Some(position) = ctx.chord else {
        return;
    };
    let chord = position.chord;
    let in_chord = position.step_in_chord;
    let remaining = chord.len() - in_chord;
    let spb = ctx.signature.steps_per_beat();

    let duration = match ctx.settings.style.as_str() {
        "pad" => {
            if in_chord != 0 {
                return;
            }
            chord.len() as u32
        }
        "pulse" => {
            if !ctx.info.is_beat_start {
                return;
            }
            spb
        }
        // "smart": accent groups plus the occasional push on an offbeat.
        _ => {
            let push = !ctx.info.is_beat_start
                && ctx.info.measure_step % 2 == 0
                && rng.random::<f32>() < ctx.state.performance.complexity * 0.3;
            if !(in_chord == 0 || ctx.info.is_group_start || push) {
                return;
            }
            if push {
                2
            } else {
                spb * 2
            }
        }
    };

    let structural = ctx.info.is_group_start || in_chord == 0;
    let base = if structural {
        0.6
    } else if ctx.info.is_beat_start {
        0.5
    } else {
        0.35
    };
    let velocity = base * ctx.intensity_gain();
    let length = (duration as u64).min(remaining) as u32;
    for pitch in voicing(ctx, chord.root, chord.quality.intervals()) {
        out.push(ctx.note(Module::Chords, pitch, velocity, length));
    }
}
