//! Improvised lead lines.
//!
//! The soloist plays phrases separated by rests. Phrase boundaries and
//! the last played pitch are the only state the generator carries between
//! steps; a flush resets them so regenerated material is reproducible.

use super::StepContext;
use crate::state::{ChordQuality, Module};
use crate::sync::NoteEvent;
use rand::rngs::StdRng;
use rand::Rng;

const IONIAN: &[u8] = &[0, 2, 4, 5, 7, 9, 11];
const MIXOLYDIAN: &[u8] = &[0, 2, 4, 5, 7, 9, 10];
const DORIAN: &[u8] = &[0, 2, 3, 5, 7, 9, 10];
const LOCRIAN: &[u8] = &[0, 1, 3, 5, 6, 8, 10];
const BLUES: &[u8] = &[0, 3, 5, 6, 7, 10];

/// Range of the line above the module's base note.
const RANGE: u8 = 19;

/// Phrasing state carried across steps.
#[derive(Debug, Default, Clone, PartialEq)]
pub(super) struct Phrase {
    resting: bool,
    remaining: u32,
    last_pitch: Option<u8>,
}

fn chord_scale(quality: ChordQuality) -> &'static [u8] {
    match quality {
        ChordQuality::Dominant7 | ChordQuality::Sus4 => MIXOLYDIAN,
        ChordQuality::HalfDiminished | ChordQuality::Dim => LOCRIAN,
        q if q.is_minor() => DORIAN,
        _ => IONIAN,
    }
}

/// Every pitch in `[low, high]` whose class is `root + interval`.
fn ladder(root: u8, intervals: &[u8], low: u8, high: u8) -> Vec<u8> {
    (low..=high)
        .filter(|p| {
            let degree = (i16::from(*p % 12) - i16::from(root % 12)).rem_euclid(12) as u8;
            intervals.contains(&degree)
        })
        .collect()
}

/// Index of the ladder pitch nearest to `pitch`.
fn nearest(ladder: &[u8], pitch: u8) -> usize {
    ladder
        .iter()
        .enumerate()
        .min_by_key(|(_, p)| (i16::from(**p) - i16::from(pitch)).abs())
        .map(|(i, _)| i)
        .unwrap_or(0)
}

pub(super) fn generate(
    ctx: &StepContext<'_>,
    rng: &mut StdRng,
    phrase: &mut Phrase,
    out: &mut Vec<NoteEvent>,
) {
    let Some(position) = ctx.chord else {
        return;
    };
    let chord = position.chord;
    let style = ctx.settings.style.as_str();
    let slot: u32 = if style == "bird" { 1 } else { 2 };
    if ctx.info.measure_step % slot != 0 {
        return;
    }

    if phrase.remaining == 0 {
        phrase.resting = !phrase.resting;
        phrase.remaining = if phrase.resting {
            // Busier bands leave shorter gaps.
            let max_rest = 2 + ((1.0 - ctx.state.performance.band_intensity) * 6.0) as u32;
            rng.random_range(1..=max_rest)
        } else {
            rng.random_range(4..=12)
        };
        if !phrase.resting {
            phrase.last_pitch = None;
        }
    }
    phrase.remaining -= 1;
    if phrase.resting {
        return;
    }

    let low = ctx.settings.octave;
    let high = low.saturating_add(RANGE).min(127);
    let tones = chord.quality.intervals();
    let (root, scale) = match style {
        "blues" => (ctx.state.arrangement.key, BLUES),
        // Chord tones on the beat, chromatic approach in between.
        "bird" if ctx.info.is_beat_start => (chord.root, tones),
        "bird" => (chord.root, &[0u8, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11][..]),
        _ => (chord.root, chord_scale(chord.quality)),
    };
    let pitches = ladder(root, scale, low, high);
    if pitches.is_empty() {
        return;
    }

    let index = match phrase.last_pitch {
        // Open a phrase on a chord tone in the middle of the range.
        None => {
            let chord_tones = ladder(chord.root, tones, low, high);
            let target = chord_tones
                .get(chord_tones.len() / 2)
                .copied()
                .unwrap_or(low);
            nearest(&pitches, target)
        }
        Some(last) => {
            let from = nearest(&pitches, last) as i64;
            let leap = if rng.random::<f32>() < ctx.state.performance.complexity * 0.5 {
                rng.random_range(-4i64..=4)
            } else {
                rng.random_range(-2i64..=2)
            };
            (from + leap).clamp(0, pitches.len() as i64 - 1) as usize
        }
    };
    let pitch = pitches[index];
    phrase.last_pitch = Some(pitch);

    let accent = if ctx.info.is_beat_start { 0.15 } else { 0.0 };
    let velocity = (rng.random_range(0.5f32..0.65) + accent) * ctx.intensity_gain();
    let length = if phrase.remaining == 0 { slot * 2 } else { slot };
    out.push(ctx.note(Module::Soloist, pitch, velocity, length));

    if ctx.settings.double_stops && ctx.info.is_beat_start && rng.random::<f32>() < 0.3 {
        // A diatonic third or sixth below.
        let below = index.saturating_sub(if rng.random::<bool>() { 2 } else { 5 });
        if below < index {
            out.push(ctx.note(Module::Soloist, pitches[below], velocity * 0.8, length));
        }
    }
}
