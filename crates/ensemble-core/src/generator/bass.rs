//! Bass lines. Monophonic: at most one note per step.

use super::{pitch_at_or_above, StepContext};
use crate::state::Module;
use crate::sync::NoteEvent;
use rand::rngs::StdRng;
use rand::Rng;

/// Concrete style for `smart`, chosen by genre feel.
fn resolve_style<'a>(style: &'a str, genre_feel: &str) -> &'a str {
    if style != "smart" {
        return style;
    }
    match genre_feel {
        "Jazz" | "Blues" => "quarter",
        "Funk" | "Afrobeat" => "funk",
        "Neo-Soul" => "neo",
        "Bossa Nova" | "Bossa" | "Latin/Clave" => "bossa",
        "Acoustic" => "half",
        _ => "rock",
    }
}

pub(super) fn generate(ctx: &StepContext<'_>, rng: &mut StdRng) -> Option<NoteEvent> {
    let position = ctx.chord?;
    let chord = position.chord;
    let in_chord = position.step_in_chord;
    let spb = u64::from(ctx.signature.steps_per_beat());
    let spm = u64::from(ctx.signature.steps_per_measure());
    let density = ctx.settings.density;

    let style = resolve_style(&ctx.settings.style, &ctx.state.groove.genre_feel);
    let (active, duration) = match style {
        "whole" => (in_chord == 0, chord.len()),
        "half" => (in_chord % 8 == 0, 8),
        "arp" => (in_chord % 4 == 0, 4),
        "rock" => (in_chord % (spb / 2).max(1) == 0, 2),
        "bossa" => ([0, 6, 8, 14].contains(&(u64::from(ctx.info.measure_step) % spm)), 3),
        "funk" => {
            let hit = ctx.info.is_beat_start || rng.random::<f32>() < density * 0.4;
            (hit, 1)
        }
        "neo" => {
            let hit = in_chord == 0 || (ctx.info.is_group_start && rng.random::<f32>() < 0.5 + density * 0.3);
            (hit, 3)
        }
        // "quarter" and anything unknown walk in quarters with the odd eighth.
        _ => {
            let hit = in_chord % spb == 0 || (in_chord % 2 == 0 && rng.random::<f32>() < density * 0.25);
            (hit, spb)
        }
    };
    if !active {
        return None;
    }

    let intervals = chord.quality.intervals();
    let root = pitch_at_or_above(chord.root, ctx.settings.octave);
    let pitch = if in_chord == 0 {
        root
    } else if style == "arp" {
        let index = (in_chord / 4) as usize % intervals.len();
        root.saturating_add(intervals[index])
    } else if style == "rock" || style == "whole" || style == "half" {
        root
    } else {
        // Approach the next chord from a semitone below on the last beat.
        let remaining = chord.len() - in_chord;
        let next_root = ctx
            .state
            .arrangement
            .progression
            .get(position.index + 1)
            .or_else(|| ctx.state.arrangement.progression.first())
            .map(|c| c.root);
        match next_root {
            Some(next) if remaining <= spb && ctx.info.is_beat_start => {
                pitch_at_or_above(next, ctx.settings.octave).saturating_sub(1).max(root)
            }
            _ => {
                // Root, fifth and third, weighted toward the root.
                let choices = [0u8, 0, 7, intervals.get(1).copied().unwrap_or(4)];
                root.saturating_add(choices[rng.random_range(0..choices.len())])
            }
        }
    };

    let accent = if ctx.info.is_measure_start {
        0.9
    } else if ctx.info.is_beat_start {
        0.75
    } else {
        0.6
    };
    let length = duration.min(chord.len() - in_chord).max(1) as u32;
    Some(ctx.note(Module::Bass, pitch, accent * ctx.intensity_gain(), length))
}
