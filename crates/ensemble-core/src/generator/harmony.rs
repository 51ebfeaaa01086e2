//! Background harmony: guide tones under the comping.

use super::{pitch_at_or_above, StepContext};
use crate::state::Module;
use crate::sync::NoteEvent;
use rand::rngs::StdRng;
use rand::Rng;

/// Third and seventh of the chord, or third and fifth for triads.
fn guide_tones(intervals: &[u8]) -> [u8; 2] {
    let third = intervals.get(1).copied().unwrap_or(4);
    let top = intervals.get(3).or_else(|| intervals.get(2)).copied().unwrap_or(7);
    [third, top]
}

pub(super) fn generate(ctx: &StepContext<'_>, rng: &mut StdRng, out: &mut Vec<NoteEvent>) {
    let Some(position) = ctx.chord else {
        return;
    };
    let chord = position.chord;
    let in_chord = position.step_in_chord;
    let spb = u64::from(ctx.signature.steps_per_beat());

    let (velocity, duration) = match ctx.settings.style.as_str() {
        "stabs" => {
            let offbeat_beat = ctx.info.is_beat_start && (in_chord / spb) % 2 == 1;
            if !offbeat_beat || rng.random::<f32>() >= ctx.settings.density {
                return;
            }
            (0.55, spb / 2)
        }
        // "pad"
        _ => {
            if in_chord != 0 {
                return;
            }
            (0.4, chord.len())
        }
    };

    let root = pitch_at_or_above(chord.root, ctx.settings.octave);
    let length = duration.min(chord.len() - in_chord).max(1) as u32;
    for interval in guide_tones(chord.quality.intervals()) {
        out.push(ctx.note(
            Module::Harmony,
            root.saturating_add(interval),
            velocity * ctx.intensity_gain(),
            length,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::song;
    use super::super::Generator;
    use super::*;
    use crate::state::ChordQuality;
    use crate::sync::{SyncPayload, ToGenerator};

    fn harmony(style: &str, density: f32) -> Vec<NoteEvent> {
        let mut state = song();
        state.modules.harmony.style = style.to_string();
        state.modules.harmony.density = density;
        let mut generator = Generator::new(64, false);
        generator.handle(ToGenerator::SyncState {
            generation: 0,
            payload: SyncPayload::Full(Box::new(state)),
        });
        let mut out = Vec::new();
        for step in 0..64 {
            generator.generate_into(Module::Harmony, step, &mut out);
        }
        out
    }

    #[test]
    fn test_guide_tones() {
        assert_eq!(guide_tones(ChordQuality::Dominant7.intervals()), [4, 10]);
        assert_eq!(guide_tones(ChordQuality::Major.intervals()), [4, 7]);
    }

    #[test]
    fn test_pad_plays_two_voices_per_chord() {
        let notes = harmony("pad", 0.5);
        assert_eq!(notes.len(), 8);
        // Dm7 from C4: F and C above D.
        assert_eq!((notes[0].pitch, notes[1].pitch), (65, 72));
    }

    #[test]
    fn test_stabs_follow_density() {
        assert!(harmony("stabs", 0.0).is_empty());
        let full = harmony("stabs", 1.0);
        // Beats two and four of each bar.
        assert_eq!(full.len(), 16);
        assert!(full.iter().all(|n| n.step % 8 == 4));
    }
}
