//! Drum kit playback from the groove's step patterns.

use super::StepContext;
use crate::state::Module;
use crate::sync::NoteEvent;
use rand::rngs::StdRng;
use rand::Rng;

/// General MIDI percussion note for a kit piece.
pub(crate) fn kit_pitch(name: &str) -> u8 {
    match name {
        "Kick" => 36,
        "Snare" => 38,
        "HiHat" => 42,
        "Open" => 46,
        "Crash" => 49,
        "Ride" => 51,
        _ => 37,
    }
}

/// Micro-timing shift in seconds: laid back for slow grooves, pushed
/// when the band is driving.
fn pocket(genre_feel: &str, intensity: f32) -> f64 {
    let mut offset = match genre_feel {
        "Neo-Soul" | "Hip Hop" => 0.015,
        _ => 0.0,
    };
    if intensity > 0.75 {
        offset -= 0.008;
    } else if intensity < 0.3 {
        offset += 0.010;
    }
    offset
}

pub(super) fn generate(ctx: &StepContext<'_>, rng: &mut StdRng, out: &mut Vec<NoteEvent>) {
    let groove = &ctx.state.groove;
    let global = ctx.signature == ctx.state.arrangement.time_signature;
    let offset = pocket(&groove.genre_feel, ctx.state.performance.band_intensity);

    for track in groove.tracks.iter().filter(|t| !t.muted && !t.steps.is_empty()) {
        let len = track.steps.len() as u64;
        // Multi-measure patterns run against the song clock in the home
        // meter; elsewhere they restart every measure.
        let index = if global {
            ctx.step % len
        } else {
            u64::from(ctx.info.measure_step) % len
        };
        let velocity = match track.steps[index as usize] {
            0 => continue,
            2 => 110.0 / 127.0,
            _ => 90.0 / 127.0,
        };
        // Small humanization on unaccented hats.
        let jitter = if track.name == "HiHat" && !ctx.info.is_beat_start {
            rng.random_range(-0.05f32..0.05)
        } else {
            0.0
        };
        let mut note = ctx.note(
            Module::Drums,
            kit_pitch(&track.name),
            (velocity + jitter) * ctx.intensity_gain(),
            1,
        );
        note.timing_offset_seconds = offset;
        out.push(note);
    }
}
