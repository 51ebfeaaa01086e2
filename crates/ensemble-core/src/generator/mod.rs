//! Note generator.
//!
//! The [`Generator`] keeps a private working copy of the song state,
//! updated only through sync messages, and turns (module, step) pairs
//! into [`NoteEvent`]s. It does no I/O and never touches the transport's
//! buffers: it answers requests with `NOTES` replies.
//!
//! Each module has a fill head. A request for `step` first catches the
//! head up to `step`, then generates forward to the end of the look-ahead
//! window, so a step is generated at most once per flush generation.
//!
//! Generation is deterministic: randomness is seeded from the module and
//! the step, and the only carried state (the soloist's phrasing) is reset
//! by a flush.

mod bass;
mod chords;
mod drums;
mod ending;
mod harmony;
mod soloist;
mod thread;

pub use thread::{GeneratorConfig, GeneratorWorker};

use crate::error::Result;
use crate::grid::StepInfo;
use crate::state::{ChordPosition, Module, ModuleSettings, SongState};
use crate::sync::{FlushScope, FromGenerator, Generation, NoteEvent, SyncPayload, Timestamp, ToGenerator};
use crate::timing::{Step, TimeSignature};
use rand::rngs::StdRng;
use rand::SeedableRng;
use soloist::Phrase;
use std::time::Instant;

/// Everything a part needs to decide what to play on one step.
pub(crate) struct StepContext<'a> {
    pub step: Step,
    pub info: StepInfo,
    pub signature: TimeSignature,
    pub chord: Option<ChordPosition<'a>>,
    pub state: &'a SongState,
    pub settings: &'a ModuleSettings,
}

impl StepContext<'_> {
    /// Conductor scaling applied to velocities.
    pub fn intensity_gain(&self) -> f32 {
        0.8 + self.state.performance.band_intensity * 0.4
    }

    pub fn note(&self, module: Module, pitch: u8, velocity: f32, duration_steps: u32) -> NoteEvent {
        NoteEvent {
            module,
            step: self.step,
            pitch: pitch.min(127),
            velocity: velocity.clamp(0.0, 1.0),
            duration_steps: duration_steps.max(1),
            timing_offset_seconds: 0.0,
        }
    }
}

/// Pitch with pitch class `pc` at or above `floor`.
pub(crate) fn pitch_at_or_above(pc: u8, floor: u8) -> u8 {
    let offset = (i16::from(pc % 12) - i16::from(floor % 12)).rem_euclid(12) as u8;
    floor.saturating_add(offset)
}

/// Per-(module, step) random source.
pub(crate) fn step_rng(module: Module, step: Step) -> StdRng {
    // SplitMix64 finalizer over the packed key.
    let mut z = step ^ ((module.index() as u64 + 1) << 56);
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    StdRng::seed_from_u64(z ^ (z >> 31))
}

/// The generator's state machine. Run it in-process for tests, or inside a
/// [`GeneratorWorker`] thread.
#[derive(Debug)]
pub struct Generator {
    state: SongState,
    heads: [Step; 5],
    generation: Generation,
    running: bool,
    lookahead: Step,
    worker_logging: bool,
    phrase: Phrase,
}

impl Generator {
    pub fn new(lookahead: Step, worker_logging: bool) -> Self {
        Self {
            state: SongState::default(),
            heads: [0; 5],
            generation: 0,
            running: false,
            lookahead: lookahead.max(1),
            worker_logging,
            phrase: Phrase::default(),
        }
    }

    /// The working copy of the song state.
    pub fn state(&self) -> &SongState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Next step that will be generated for `module`.
    pub fn head(&self, module: Module) -> Step {
        self.heads[module.index()]
    }

    /// Process one message. Returns the reply to send, if any.
    pub fn handle(&mut self, msg: ToGenerator) -> Option<FromGenerator> {
        match msg {
            ToGenerator::Start => {
                self.running = true;
                None
            }
            ToGenerator::Stop => {
                self.running = false;
                None
            }
            ToGenerator::Shutdown => {
                self.running = false;
                None
            }
            ToGenerator::SyncState {
                generation,
                payload,
            } => {
                self.observe(generation);
                self.sync(payload).err().map(|e| {
                    log::warn!("[GENERATOR] rejected sync: {}", e);
                    FromGenerator::Error {
                        generation,
                        message: e.to_string(),
                    }
                })
            }
            ToGenerator::RequestBuffer {
                generation,
                step,
                timestamp,
            } => {
                self.observe(generation);
                Some(self.fill(step, self.lookahead, timestamp, FlushScope::All))
            }
            ToGenerator::Prime {
                generation,
                steps,
                timestamp,
            } => {
                self.observe(generation);
                let from = self.heads.iter().copied().min().unwrap_or(0);
                Some(self.fill(from, steps, timestamp, FlushScope::All))
            }
            ToGenerator::Flush {
                generation,
                step,
                snapshot,
                prime_steps,
                scope,
                timestamp,
            } => {
                self.observe(generation);
                if let Err(e) = snapshot.validate() {
                    log::warn!("[GENERATOR] rejected flush snapshot: {}", e);
                    return Some(FromGenerator::Error {
                        generation,
                        message: e.to_string(),
                    });
                }
                self.state = *snapshot;
                self.reset(step, scope);
                Some(self.fill(step, prime_steps.max(self.lookahead), timestamp, scope))
            }
        }
    }

    fn observe(&mut self, generation: Generation) {
        self.generation = self.generation.max(generation);
    }

    fn sync(&mut self, payload: SyncPayload) -> Result<()> {
        let next = match payload {
            SyncPayload::Full(state) => *state,
            SyncPayload::Delta { action, patch } => {
                log::trace!("[GENERATOR] delta {}", action);
                let mut next = self.state.clone();
                patch.apply_to(&mut next);
                next
            }
        };
        next.validate()?;
        self.state = next;
        Ok(())
    }

    fn reset(&mut self, step: Step, scope: FlushScope) {
        for module in Module::ALL {
            if scope.includes(module) {
                self.heads[module.index()] = step;
            }
        }
        if scope.includes(Module::Soloist) {
            self.phrase = Phrase::default();
        }
    }

    /// Generate the modules in `scope` up to `from + count` and package
    /// the result.
    fn fill(&mut self, from: Step, count: Step, timestamp: Timestamp, scope: FlushScope) -> FromGenerator {
        let started = Instant::now();
        let end = from.saturating_add(count);
        let mut notes = Vec::new();

        for module in Module::ALL.into_iter().filter(|m| scope.includes(*m)) {
            let index = module.index();
            let mut head = self.heads[index].max(from);
            while head < end {
                self.generate_into(module, head, &mut notes);
                head += 1;
            }
            self.heads[index] = head.max(self.heads[index]);
        }

        let generator_process_ms = started.elapsed().as_secs_f64() * 1_000.0;
        if self.worker_logging {
            log::debug!(
                "[GENERATOR] gen {} filled {}..{} -> {} notes in {:.3}ms",
                self.generation,
                from,
                end,
                notes.len(),
                generator_process_ms
            );
        }
        FromGenerator::Notes {
            generation: self.generation,
            notes,
            request_timestamp: timestamp,
            generator_process_ms,
        }
    }

    /// Generate the notes of one module at one step.
    pub(crate) fn generate_into(&mut self, module: Module, step: Step, out: &mut Vec<NoteEvent>) {
        let state = &self.state;
        let settings = state.modules.get(module);
        if !settings.enabled {
            return;
        }
        let arrangement = &state.arrangement;
        let song_step = arrangement.wrap(step);
        let position = arrangement.measure_map.lookup(song_step);
        let signature = position.segment.time_signature;
        let info = crate::grid::resolve_measure_step(
            position.measure_step,
            signature,
            arrangement.grouping_at(step),
        );
        let ctx = StepContext {
            step,
            info,
            signature,
            chord: arrangement.chord_at(step),
            state,
            settings,
        };
        if let Some(start) = state.coda_start() {
            if step >= start {
                ending::generate(&ctx, module, step - start, out);
                return;
            }
        }
        let mut rng = step_rng(module, step);

        match module {
            Module::Drums => drums::generate(&ctx, &mut rng, out),
            // Pitched parts stay silent without a progression.
            _ if ctx.chord.is_none() => {}
            Module::Bass => out.extend(bass::generate(&ctx, &mut rng)),
            Module::Chords => chords::generate(&ctx, &mut rng, out),
            Module::Harmony => harmony::generate(&ctx, &mut rng, out),
            Module::Soloist => soloist::generate(&ctx, &mut rng, &mut self.phrase, out),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::song;
    use super::*;
    use crate::state::{StatePatch, SyncAction};

    fn notes_of(reply: Option<FromGenerator>) -> (Generation, Vec<NoteEvent>) {
        match reply {
            Some(FromGenerator::Notes {
                generation, notes, ..
            }) => (generation, notes),
            other => panic!("expected NOTES, got {other:?}"),
        }
    }

    fn flush(generation: Generation, step: Step, state: SongState, scope: FlushScope) -> ToGenerator {
        ToGenerator::Flush {
            generation,
            step,
            snapshot: Box::new(state),
            prime_steps: 32,
            scope,
            timestamp: 0,
        }
    }

    #[test]
    fn test_flush_primes_from_step() {
        let mut generator = Generator::new(16, false);
        let (generation, notes) = notes_of(generator.handle(flush(1, 8, song(), FlushScope::All)));
        assert_eq!(generation, 1);
        assert!(!notes.is_empty());
        assert!(notes.iter().all(|n| (8..40).contains(&n.step)));
        assert!(notes.iter().any(|n| n.module == Module::Drums));
        assert!(notes.iter().any(|n| n.module == Module::Bass));
        assert_eq!(generator.head(Module::Chords), 40);
    }

    #[test]
    fn test_requests_never_regenerate_a_step() {
        let mut generator = Generator::new(16, false);
        generator.handle(flush(1, 0, song(), FlushScope::All));
        // Inside the primed window: nothing new.
        let (_, notes) = notes_of(generator.handle(ToGenerator::RequestBuffer {
            generation: 1,
            step: 10,
            timestamp: 5,
        }));
        assert!(notes.is_empty());
        // Past it: only the new tail.
        let (_, notes) = notes_of(generator.handle(ToGenerator::RequestBuffer {
            generation: 1,
            step: 30,
            timestamp: 6,
        }));
        assert!(notes.iter().all(|n| (32..46).contains(&n.step)));
        assert_eq!(generator.head(Module::Drums), 46);
    }

    #[test]
    fn test_deterministic_across_instances() {
        let run = || {
            let mut generator = Generator::new(64, false);
            let (_, notes) = notes_of(generator.handle(flush(1, 0, song(), FlushScope::All)));
            notes
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_flush_regenerates_identically() {
        let mut generator = Generator::new(32, false);
        let (_, first) = notes_of(generator.handle(flush(1, 0, song(), FlushScope::All)));
        let (_, second) = notes_of(generator.handle(flush(2, 0, song(), FlushScope::All)));
        assert_eq!(first, second);
    }

    #[test]
    fn test_scoped_flush_only_regenerates_that_module() {
        let mut generator = Generator::new(32, false);
        generator.handle(flush(1, 0, song(), FlushScope::All));
        let (generation, notes) =
            notes_of(generator.handle(flush(2, 4, song(), FlushScope::Module(Module::Bass))));
        assert_eq!(generation, 2);
        assert!(!notes.is_empty());
        assert!(notes.iter().all(|n| n.module == Module::Bass));
    }

    #[test]
    fn test_invalid_snapshot_is_rejected_without_change() {
        let mut generator = Generator::new(16, false);
        generator.handle(flush(1, 0, song(), FlushScope::All));
        let before = generator.state().clone();

        let mut bad = song();
        bad.performance.bpm = -1.0;
        match generator.handle(flush(2, 0, bad, FlushScope::All)) {
            Some(FromGenerator::Error { generation, .. }) => assert_eq!(generation, 2),
            other => panic!("expected ERROR, got {other:?}"),
        }
        assert_eq!(generator.state(), &before);

        let reply = generator.handle(ToGenerator::SyncState {
            generation: 2,
            payload: SyncPayload::Delta {
                action: "SET_VOLUME".to_string(),
                patch: StatePatch {
                    bpm: Some(f64::NAN),
                    ..StatePatch::default()
                },
            },
        });
        assert!(matches!(reply, Some(FromGenerator::Error { .. })));
        assert_eq!(generator.state(), &before);
    }

    #[test]
    fn test_delta_sync_updates_working_copy() {
        let mut generator = Generator::new(16, false);
        generator.handle(ToGenerator::SyncState {
            generation: 0,
            payload: SyncPayload::Full(Box::new(song())),
        });
        let reply = generator.handle(ToGenerator::SyncState {
            generation: 0,
            payload: SyncPayload::Delta {
                action: "SET_BPM".to_string(),
                patch: SyncAction::SetBpm(88.0).patch(),
            },
        });
        assert!(reply.is_none());
        assert_eq!(generator.state().performance.bpm, 88.0);
    }

    #[test]
    fn test_disabled_modules_stay_silent_but_advance() {
        let mut state = song();
        state.modules.soloist.enabled = false;
        let mut generator = Generator::new(16, false);
        let (_, notes) = notes_of(generator.handle(flush(1, 0, state, FlushScope::All)));
        assert!(notes.iter().all(|n| n.module != Module::Soloist));
        assert_eq!(generator.head(Module::Soloist), 32);
    }

    #[test]
    fn test_start_stop() {
        let mut generator = Generator::new(16, false);
        assert!(generator.handle(ToGenerator::Start).is_none());
        assert!(generator.is_running());
        generator.handle(ToGenerator::Stop);
        assert!(!generator.is_running());
    }

    #[test]
    fn test_pitch_at_or_above() {
        assert_eq!(pitch_at_or_above(0, 38), 48);
        assert_eq!(pitch_at_or_above(2, 38), 38);
        assert_eq!(pitch_at_or_above(7, 60), 67);
    }
}
