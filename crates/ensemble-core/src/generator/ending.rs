//! Closing cadence for a session with a fixed length.
//!
//! Once `session_steps` is reached every part stops following its style
//! and plays a V-I cadence in the home key: the dominant on the first coda
//! step, a snare pickup one beat later, and the tonic two beats in. The
//! tonic notes ring well past the end of playback.

use super::drums::kit_pitch;
use super::{pitch_at_or_above, StepContext};
use crate::state::Module;
use crate::sync::NoteEvent;
use crate::timing::Step;

/// R 3 b7 9 over the dominant; b9 in minor.
const DOMINANT_MAJOR: &[u8] = &[0, 4, 10, 14];
const DOMINANT_MINOR: &[u8] = &[0, 4, 10, 13];
/// 6/9 tonic in major, m9 in minor.
const TONIC_MAJOR: &[u8] = &[0, 2, 4, 7, 9];
const TONIC_MINOR: &[u8] = &[0, 2, 3, 7, 10];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Beat {
    Dominant,
    Pickup,
    Tonic,
}

/// Emit `module`'s part of the cadence at `offset` steps into the coda.
pub(super) fn generate(ctx: &StepContext<'_>, module: Module, offset: Step, out: &mut Vec<NoteEvent>) {
    let spb = Step::from(ctx.signature.steps_per_beat());
    let beat = match offset {
        0 => Beat::Dominant,
        o if o == spb => Beat::Pickup,
        o if o == 2 * spb => Beat::Tonic,
        _ => return,
    };

    let arrangement = &ctx.state.arrangement;
    let minor = arrangement.is_minor;
    let tonic = arrangement.key % 12;
    let dominant = (tonic + 7) % 12;
    let beats = |n: Step| (n * spb) as u32;

    if module == Module::Drums {
        let hits: &[(&str, f32)] = match beat {
            Beat::Dominant => &[("Kick", 0.9), ("HiHat", 0.7)],
            Beat::Pickup => &[("Snare", 0.8)],
            Beat::Tonic => &[("Kick", 1.0), ("Crash", 0.95)],
        };
        out.extend(hits.iter().map(|&(name, velocity)| ctx.note(module, kit_pitch(name), velocity, 1)));
        return;
    }
    if beat == Beat::Pickup {
        return;
    }

    let octave = ctx.settings.octave;
    let on_dominant = beat == Beat::Dominant;
    match module {
        Module::Bass => {
            let root = if on_dominant { dominant } else { tonic };
            let (velocity, length) = if on_dominant { (0.9, 2) } else { (1.0, 4) };
            out.push(ctx.note(module, pitch_at_or_above(root, octave), velocity, beats(length)));
        }
        Module::Chords => {
            let (root, intervals, velocity, length, strum) = match (on_dominant, minor) {
                (true, false) => (dominant, DOMINANT_MAJOR, 0.6, 2, 0.015),
                (true, true) => (dominant, DOMINANT_MINOR, 0.6, 2, 0.015),
                (false, false) => (tonic, TONIC_MAJOR, 0.75, 6, 0.04),
                (false, true) => (tonic, TONIC_MINOR, 0.75, 6, 0.04),
            };
            let base = pitch_at_or_above(root, octave);
            let gain = 1.0 / (intervals.len() as f32).sqrt();
            for (i, interval) in intervals.iter().enumerate() {
                let mut note = ctx.note(module, base.saturating_add(*interval), velocity * gain, beats(length));
                note.timing_offset_seconds = i as f64 * strum;
                out.push(note);
            }
        }
        Module::Soloist => {
            // Guide tones: the dominant's seventh falls to the tonic's third.
            let seventh = i16::from(pitch_at_or_above(dominant, octave)) + 10;
            let third = if minor { 3 } else { 4 };
            let mut target = i16::from(pitch_at_or_above(tonic, octave)) + third;
            while target + 6 < seventh {
                target += 12;
            }
            while target - 6 > seventh {
                target -= 12;
            }
            let (pitch, velocity, length) = if on_dominant {
                (seventh, 0.7, 2)
            } else {
                (target, 0.85, 4)
            };
            out.push(ctx.note(module, pitch.clamp(0, 127) as u8, velocity, beats(length)));
        }
        Module::Harmony => {
            let (root, intervals, velocity, length): (u8, &[u8], f32, Step) = if on_dominant {
                (dominant, &[0, 7], 0.5, 2)
            } else {
                (tonic, &[0, 7, 14], 0.6, 6)
            };
            let base = pitch_at_or_above(root, octave);
            for (i, interval) in intervals.iter().enumerate() {
                let mut note = ctx.note(module, base.saturating_add(*interval), velocity, beats(length));
                if !on_dominant {
                    note.timing_offset_seconds = i as f64 * 0.02;
                }
                out.push(note);
            }
        }
        Module::Drums => {}
    }
}
