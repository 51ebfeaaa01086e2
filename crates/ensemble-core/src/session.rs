//! Session facade.
//!
//! A [`Session`] is the playback side of the engine: it owns the song
//! state, the instrument buffers, the flush coordinator and the scheduler,
//! and talks to a generator over the sync channel. Call [`Session::poll`]
//! from the transport loop; it never blocks.
//!
//! Edits go through [`Session::apply`], which decides how each one reaches
//! the generator:
//!
//! - [`Edit::Param`] - delta `SYNC_STATE`, buffers untouched
//! - [`Edit::Structural`] - full flush of every module
//! - [`Edit::SetEnabled`] - flush scoped to one module
//!
//! With auto intensity on, the session's [`Conductor`] rides the band
//! intensity during playback and syncs it like any other parameter edit.
//!
//! A session with a length ends on a closing cadence; changing the length
//! while playing flushes so the cadence lands where the new length says.

use crate::buffers::InstrumentBuffers;
use crate::conductor::Conductor;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::flush::{FlushCoordinator, FlushState, FlushStatus};
use crate::generator::{Generator, GeneratorConfig, GeneratorWorker};
use crate::latency::{LatencyMonitor, LatencyStats};
use crate::presets;
use crate::scheduler::{Clock, NoteSink, PlaybackScheduler, VoiceControl};
use crate::state::{Arrangement, DrumTrack, Module, Section, SongState, StateManager, SyncAction};
use crate::sync::{
    sync_channel, FlushScope, FromGenerator, GeneratorEnd, Generation, SyncPayload,
    ToGenerator, TransportEnd,
};
use crate::timing::{Step, TimeSignature};
use std::sync::Arc;

/// An edit that rebuilds the arrangement or the groove.
#[derive(Clone, Debug, PartialEq)]
pub enum StructuralEdit {
    SetSections(Vec<Section>),
    /// Transposes the progression to the new tonic.
    SetKey { key: u8, minor: bool },
    /// Also resets the grouping to the meter's default.
    SetTimeSignature(TimeSignature),
    SetGrouping(Option<Vec<u32>>),
    /// Replaces the drum track with the same name, or adds it.
    SetDrumTrack(DrumTrack),
    LoadDrumPreset(String),
    /// Replace the whole song.
    LoadSong {
        sections: Vec<Section>,
        state: Box<SongState>,
    },
}

/// A user edit.
#[derive(Clone, Debug, PartialEq)]
pub enum Edit {
    Param(SyncAction),
    Structural(StructuralEdit),
    SetEnabled { module: Module, enabled: bool },
}

/// What one [`Session::poll`] did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PollReport {
    pub notes_accepted: usize,
    pub notes_rejected: usize,
    pub steps_rendered: usize,
    pub flush_timed_out: bool,
}

enum Backend {
    Thread(GeneratorWorker),
    /// Generator driven synchronously from `poll`.
    Inline {
        generator: Box<Generator>,
        channel: GeneratorEnd,
    },
}

/// The transport side of a running engine.
pub struct Session {
    config: EngineConfig,
    state: StateManager,
    sections: Vec<Section>,
    backend: Backend,
    transport: TransportEnd,
    buffers: InstrumentBuffers,
    flush: FlushCoordinator,
    latency: LatencyMonitor,
    scheduler: PlaybackScheduler,
    conductor: Conductor,
    clock: Arc<dyn Clock>,
    schedule_ahead: f64,
}

impl Session {
    /// Start a session with the generator on its own thread.
    pub fn new(
        config: EngineConfig,
        sections: Vec<Section>,
        state: SongState,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let (worker, transport) = GeneratorWorker::spawn(GeneratorConfig::from_engine(&config)?)?;
        Self::assemble(config, sections, state, clock, Backend::Thread(worker), transport)
    }

    /// Start a session whose generator runs inside [`Session::poll`].
    /// Deterministic; meant for tests and offline rendering.
    pub fn inline(
        config: EngineConfig,
        sections: Vec<Section>,
        state: SongState,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let (transport, channel) = sync_channel();
        let generator = Generator::new(config.lookahead_steps, config.worker_logging);
        let backend = Backend::Inline {
            generator: Box::new(generator),
            channel,
        };
        Self::assemble(config, sections, state, clock, backend, transport)
    }

    fn assemble(
        config: EngineConfig,
        sections: Vec<Section>,
        mut state: SongState,
        clock: Arc<dyn Clock>,
        backend: Backend,
        transport: TransportEnd,
    ) -> Result<Self> {
        state.arrangement = relayout(&sections, &state.arrangement)?;
        state.validate()?;

        let mut buffers = InstrumentBuffers::new();
        buffers.set_double_stops(state.modules.soloist.double_stops);

        let session = Self {
            flush: FlushCoordinator::new(config.flush_timeout()?),
            latency: LatencyMonitor::new(config.latency_window),
            schedule_ahead: config.schedule_ahead()?.as_secs_f64(),
            config,
            state: StateManager::with_state(state),
            sections,
            backend,
            transport,
            buffers,
            scheduler: PlaybackScheduler::new(),
            conductor: Conductor::new(),
            clock,
        };
        session.send(ToGenerator::SyncState {
            generation: session.flush.generation(),
            payload: SyncPayload::Full(Box::new(session.state.snapshot())),
        })?;
        Ok(session)
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn buffers(&self) -> &InstrumentBuffers {
        &self.buffers
    }

    pub fn flush_state(&self) -> FlushState {
        self.flush.state()
    }

    pub fn generation(&self) -> Generation {
        self.flush.generation()
    }

    pub fn latency(&self) -> LatencyStats {
        self.latency.stats()
    }

    pub fn is_playing(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Next step the scheduler will render.
    pub fn current_step(&self) -> Step {
        self.scheduler.current_step()
    }

    /// Begin playback from `step`: full sync, then a flush primed with
    /// `prime_loops` passes through the arrangement. With count-in on,
    /// `step` sounds one measure of clicks later.
    pub fn start(&mut self, step: Step, voices: &mut dyn VoiceControl) -> Result<Generation> {
        let snapshot = self.state.snapshot();
        let prime = (snapshot.arrangement.total_steps * self.config.prime_loops)
            .max(self.config.lookahead_steps);

        self.send(ToGenerator::SyncState {
            generation: self.flush.generation(),
            payload: SyncPayload::Full(Box::new(snapshot.clone())),
        })?;
        self.send(ToGenerator::Start)?;
        let now = self.clock.now_micros();
        let generation = self.flush.flush(
            step,
            snapshot,
            prime,
            FlushScope::All,
            &mut self.buffers,
            voices,
            &self.transport,
            now,
        )?;
        self.latency.clear();
        self.conductor = Conductor::new();
        let at = self.clock.now_seconds();
        let scheduler = &mut self.scheduler;
        self.state.with_state_read(|state| {
            if state.performance.count_in {
                scheduler.start_with_count_in(step, at, state);
            } else {
                scheduler.start(step, at);
            }
        });
        log::info!("[SESSION] playing from step {} (prime {} steps)", step, prime);
        Ok(generation)
    }

    /// Stop playback, silence every voice and drop buffered notes.
    ///
    /// Replies still in flight are retired, so buffers stay empty until
    /// the next [`Session::start`].
    pub fn stop(&mut self, voices: &mut dyn VoiceControl) -> Result<()> {
        self.scheduler.stop();
        for module in Module::ALL {
            voices.kill(module);
        }
        self.buffers.clear();
        self.flush.invalidate();
        self.send(ToGenerator::Stop)?;
        log::info!("[SESSION] stopped at step {}", self.scheduler.current_step());
        Ok(())
    }

    /// Apply an edit and propagate it to the generator.
    pub fn apply(&mut self, edit: Edit, voices: &mut dyn VoiceControl) -> Result<()> {
        match edit {
            Edit::Param(action) => {
                let moves_end = matches!(action, SyncAction::SetSessionSteps(_));
                self.apply_param(action)?;
                if moves_end && self.scheduler.is_running() {
                    self.resync(FlushScope::All, voices)?;
                }
                Ok(())
            }
            Edit::Structural(edit) => {
                self.apply_structural(edit)?;
                self.resync(FlushScope::All, voices)
            }
            Edit::SetEnabled { module, enabled } => {
                self.state.replace_with(|state| {
                    state.modules.get_mut(module).enabled = enabled;
                });
                self.resync(FlushScope::Module(module), voices)
            }
        }
    }

    /// Finish at the end of the current pass through the form, then play
    /// the closing cadence. Returns the step the cadence starts on.
    ///
    /// An earlier end that has not been reached yet is kept.
    pub fn end_after_form(&mut self, voices: &mut dyn VoiceControl) -> Result<Step> {
        let step = self.scheduler.current_step();
        let (total, pending) = self.state.with_state_read(|state| {
            let pending = state.coda_start().filter(|&start| start >= step);
            (state.arrangement.total_steps, pending)
        });
        if let Some(start) = pending {
            return Ok(start);
        }
        let end = match total {
            0 => step.max(1),
            total => step.div_ceil(total).max(1) * total,
        };
        log::info!("[SESSION] ending after the form at step {}", end);
        self.apply(Edit::Param(SyncAction::SetSessionSteps(end)), voices)?;
        Ok(end)
    }

    /// Commit a parameter edit and send its delta. A rejected edit sends
    /// nothing, so the generator's copy never drifts from ours.
    fn apply_param(&mut self, action: SyncAction) -> Result<()> {
        let patch = self.state.apply(&action)?;
        if let SyncAction::SetDoubleStops(enabled) = action {
            self.buffers.set_double_stops(enabled);
        }
        log::debug!("[SESSION] {} -> v{:?}", action.name(), patch.version);
        self.send(ToGenerator::SyncState {
            generation: self.flush.generation(),
            payload: SyncPayload::Delta {
                action: action.name().to_string(),
                patch,
            },
        })
    }

    /// Build the edited state off to the side so a failed layout leaves
    /// the session untouched.
    fn apply_structural(&mut self, edit: StructuralEdit) -> Result<()> {
        let mut next = self.state.snapshot();
        let mut sections = self.sections.clone();

        match edit {
            StructuralEdit::SetSections(new_sections) => sections = new_sections,
            StructuralEdit::SetKey { key, minor } => {
                let shift = (i16::from(key % 12) - i16::from(next.arrangement.key)).rem_euclid(12) as u8;
                for chord in sections.iter_mut().flat_map(|s| s.chords.iter_mut()) {
                    chord.root = (chord.root % 12 + shift) % 12;
                }
                next.arrangement.key = key % 12;
                next.arrangement.is_minor = minor;
            }
            StructuralEdit::SetTimeSignature(signature) => {
                next.arrangement.time_signature = signature;
                next.arrangement.grouping = None;
                if let Some(preset) = next.groove.preset.as_deref().and_then(presets::find) {
                    next.groove = preset.groove(signature, None);
                }
            }
            StructuralEdit::SetGrouping(grouping) => {
                next.arrangement.grouping = grouping;
            }
            StructuralEdit::SetDrumTrack(track) => {
                match next.groove.tracks.iter_mut().find(|t| t.name == track.name) {
                    Some(existing) => *existing = track,
                    None => next.groove.tracks.push(track),
                }
                next.groove.preset = None;
            }
            StructuralEdit::LoadDrumPreset(name) => {
                let preset = presets::find(&name).ok_or(Error::UnknownPreset(name))?;
                let arrangement = &next.arrangement;
                next.groove = preset.groove(arrangement.time_signature, arrangement.grouping.as_deref());
            }
            StructuralEdit::LoadSong {
                sections: new_sections,
                state,
            } => {
                next = *state;
                sections = new_sections;
            }
        }

        next.arrangement = relayout(&sections, &next.arrangement)?;
        next.validate()?;
        self.buffers.set_double_stops(next.modules.soloist.double_stops);
        self.state.replace_with(|state| *state = next);
        self.sections = sections;
        Ok(())
    }

    /// Push the current state to the generator: a flush while playing, a
    /// full sync otherwise.
    fn resync(&mut self, scope: FlushScope, voices: &mut dyn VoiceControl) -> Result<()> {
        let snapshot = self.state.snapshot();
        if !self.scheduler.is_running() {
            return self.send(ToGenerator::SyncState {
                generation: self.flush.generation(),
                payload: SyncPayload::Full(Box::new(snapshot)),
            });
        }
        let now = self.clock.now_micros();
        self.flush.flush(
            self.scheduler.current_step(),
            snapshot,
            self.config.lookahead_steps,
            scope,
            &mut self.buffers,
            voices,
            &self.transport,
            now,
        )?;
        Ok(())
    }

    /// One pass of the transport loop: route replies, answer ticks, check
    /// the flush timeout and render what is due.
    pub fn poll(&mut self, sink: &mut dyn NoteSink) -> Result<PollReport> {
        let mut report = PollReport::default();
        let ticked = self.receive(&mut report)?;
        if ticked && self.scheduler.is_running() {
            self.send(ToGenerator::RequestBuffer {
                generation: self.flush.generation(),
                step: self.scheduler.current_step(),
                timestamp: self.clock.now_micros(),
            })?;
            self.receive(&mut report)?;
        }

        let now = self.clock.now_micros();
        if let FlushStatus::TimedOut { .. } = self.flush.poll_timeout(now) {
            report.flush_timed_out = true;
        }

        let now_seconds = self.clock.now_seconds();
        let schedule_ahead = self.schedule_ahead;
        let from = self.scheduler.current_step();
        let scheduler = &mut self.scheduler;
        let buffers = &mut self.buffers;
        report.steps_rendered = self
            .state
            .with_state_read(|state| scheduler.render(now_seconds, schedule_ahead, state, buffers, sink));
        self.conduct(from, self.scheduler.current_step())?;
        Ok(report)
    }

    /// Run the auto-conductor over the steps just rendered.
    fn conduct(&mut self, from: Step, to: Step) -> Result<()> {
        let conductor = &mut self.conductor;
        let next = self.state.with_state_read(|state| {
            let performance = &state.performance;
            if !performance.auto_intensity || from == to {
                return None;
            }
            let intensity = (from..to).fold(performance.band_intensity, |intensity, step| {
                conductor.advance(step, intensity, &state.arrangement)
            });
            (intensity != performance.band_intensity).then_some(intensity)
        });
        match next {
            Some(intensity) => self.apply_param(SyncAction::SetBandIntensity(intensity)),
            None => Ok(()),
        }
    }

    /// Drain every pending reply. Returns whether a tick arrived.
    fn receive(&mut self, report: &mut PollReport) -> Result<bool> {
        self.pump()?;
        let mut ticked = false;
        for reply in self.transport.drain() {
            match reply {
                FromGenerator::Notes {
                    generation,
                    notes,
                    request_timestamp,
                    generator_process_ms,
                } => {
                    let routed = self.flush.route(generation, notes, &mut self.buffers);
                    report.notes_accepted += routed.accepted;
                    report.notes_rejected += routed.rejected;
                    let sample = self.latency.record(
                        request_timestamp,
                        self.clock.now_micros(),
                        generator_process_ms,
                    );
                    log::trace!(
                        "[SESSION] gen {} notes +{} -{} ({:.2}ms)",
                        generation,
                        routed.accepted,
                        routed.rejected,
                        sample.round_trip_ms
                    );
                }
                FromGenerator::Tick => ticked = true,
                FromGenerator::Error {
                    generation,
                    message,
                } => {
                    log::error!("[SESSION] generator error (gen {}): {}", generation, message);
                    self.flush.observe_reply(generation);
                }
            }
        }
        Ok(ticked)
    }

    /// Run the inline generator over everything queued for it.
    fn pump(&mut self) -> Result<()> {
        if let Backend::Inline { generator, channel } = &mut self.backend {
            while let Some(msg) = channel.try_recv()? {
                if let Some(reply) = generator.handle(msg) {
                    channel.send(reply)?;
                }
            }
            if generator.is_running() {
                channel.send(FromGenerator::Tick)?;
            }
        }
        Ok(())
    }

    fn send(&self, msg: ToGenerator) -> Result<()> {
        self.transport.send(msg)
    }

    /// Stop the generator and wait for its thread.
    pub fn shutdown(self) {
        if self.send(ToGenerator::Shutdown).is_err() {
            log::debug!("[SESSION] generator already gone");
        }
        if let Backend::Thread(worker) = self.backend {
            worker.shutdown();
        }
        let stats = self.latency.stats();
        if stats.samples > 0 {
            log::debug!(
                "[SESSION] latency over {} replies: mean {:.2}ms, max {:.2}ms",
                stats.samples,
                stats.mean_round_trip_ms,
                stats.max_round_trip_ms
            );
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("step", &self.scheduler.current_step())
            .field("playing", &self.scheduler.is_running())
            .field("generation", &self.flush.generation())
            .field("flush", &self.flush.state())
            .finish()
    }
}

/// Lay `sections` out with `current`'s key, meter and grouping.
fn relayout(sections: &[Section], current: &Arrangement) -> Result<Arrangement> {
    Arrangement::layout(
        sections,
        current.key,
        current.is_minor,
        current.time_signature,
        current.grouping.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::test_support;
    use crate::scheduler::{ManualClock, RecordingSink};
    use crate::state::{ChordEntry, ChordQuality};
    use crate::sync::NoteEvent;
    use std::time::Duration;

    /// Poll every `tick` of manual time until `total` has elapsed.
    fn run_for(
        session: &mut Session,
        clock: &ManualClock,
        total: Duration,
        tick: Duration,
        sink: &mut dyn NoteSink,
    ) -> Result<PollReport> {
        let mut summary = PollReport::default();
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            let report = session.poll(sink)?;
            summary.notes_accepted += report.notes_accepted;
            summary.notes_rejected += report.notes_rejected;
            summary.steps_rendered += report.steps_rendered;
            summary.flush_timed_out |= report.flush_timed_out;
            clock.advance(tick);
            elapsed += tick;
        }
        Ok(summary)
    }

    fn generator_state(session: &Session) -> &SongState {
        match &session.backend {
            Backend::Inline { generator, .. } => generator.state(),
            Backend::Thread(_) => unreachable!(),
        }
    }

    /// Queue a reply as if the generator had sent it earlier.
    fn queue_reply(session: &Session, generation: Generation, note: NoteEvent) {
        let Backend::Inline { channel, .. } = &session.backend else {
            unreachable!()
        };
        channel
            .send(FromGenerator::Notes {
                generation,
                notes: vec![note],
                request_timestamp: 0,
                generator_process_ms: 0.0,
            })
            .unwrap();
    }

    fn drum_note(step: Step, pitch: u8) -> NoteEvent {
        NoteEvent {
            module: Module::Drums,
            step,
            pitch,
            velocity: 0.9,
            duration_steps: 1,
            timing_offset_seconds: 0.0,
        }
    }

    fn sections() -> Vec<Section> {
        let chords = [
            (2, ChordQuality::Min7),
            (7, ChordQuality::Dominant7),
            (0, ChordQuality::Maj7),
            (9, ChordQuality::Min7),
        ]
        .into_iter()
        .map(|(root, quality)| ChordEntry {
            root,
            quality,
            beats: 4,
        })
        .collect();
        vec![Section {
            label: "A".to_string(),
            time_signature: None,
            repeat: 1,
            chords,
        }]
    }

    fn session() -> (Session, ManualClock) {
        let clock = ManualClock::new();
        let config = EngineConfig {
            lookahead_steps: 16,
            ..EngineConfig::default()
        };
        let session = Session::inline(config, sections(), test_support::song(), Arc::new(clock.clone())).unwrap();
        (session, clock)
    }

    #[test]
    fn test_start_primes_and_plays() {
        let (mut session, clock) = session();
        let mut sink = RecordingSink::default();
        let generation = session.start(0, &mut sink).unwrap();
        assert_eq!(generation, 1);
        assert!(session.flush_state() != FlushState::Idle);

        let report = session.poll(&mut sink).unwrap();
        assert!(report.notes_accepted > 0);
        assert_eq!(session.flush_state(), FlushState::Idle);
        // 100ms ahead at 100bpm covers step 0 only (150ms per step).
        assert_eq!(report.steps_rendered, 1);
        assert!(sink.triggers.iter().any(|t| t.step == 0 && t.module == Module::Drums));

        run_for(&mut session, &clock, Duration::from_secs(2), Duration::from_millis(25), &mut sink).unwrap();
        assert!(session.current_step() > 10);
        assert!(session.latency().samples > 0);
        // Rendered steps leave the buffers.
        assert!(!session.buffers().has(Module::Drums, 0));
    }

    #[test]
    fn test_param_edit_syncs_delta_without_flush() {
        let (mut session, _clock) = session();
        let mut sink = RecordingSink::default();
        session.start(0, &mut sink).unwrap();
        session.poll(&mut sink).unwrap();
        let buffered = session.buffers().len(Module::Drums);
        sink.kills.clear();

        session.apply(Edit::Param(SyncAction::SetBpm(140.0)), &mut sink).unwrap();
        assert_eq!(session.generation(), 1);
        assert_eq!(session.state().tempo(), 140.0);
        assert_eq!(session.buffers().len(Module::Drums), buffered);
        assert!(sink.kills.is_empty());

        session.poll(&mut sink).unwrap();
        assert_eq!(generator_state(&session).performance.bpm, 140.0);
    }

    #[test]
    fn test_invalid_param_edit_changes_nothing() {
        let (mut session, _clock) = session();
        let mut sink = RecordingSink::default();
        session.start(0, &mut sink).unwrap();
        session.poll(&mut sink).unwrap();
        let version = session.state().version();

        for bpm in [-5.0, 0.0, f64::NAN] {
            let result = session.apply(Edit::Param(SyncAction::SetBpm(bpm)), &mut sink);
            assert!(matches!(result, Err(Error::InvalidSnapshot(_))), "bpm {bpm}");
        }
        assert_eq!(session.state().tempo(), 100.0);
        assert_eq!(session.state().version(), version);

        session.poll(&mut sink).unwrap();
        assert_eq!(generator_state(&session).performance.bpm, 100.0);

        // The session is still editable.
        session
            .apply(Edit::Structural(StructuralEdit::SetKey { key: 5, minor: false }), &mut sink)
            .unwrap();
        assert_eq!(session.generation(), 2);
        session.apply(Edit::Param(SyncAction::SetBpm(90.0)), &mut sink).unwrap();
        session.poll(&mut sink).unwrap();
        assert_eq!(generator_state(&session).performance.bpm, 90.0);
    }

    #[test]
    fn test_stale_replies_never_reach_the_buffers() {
        let (mut session, _clock) = session();
        let mut sink = RecordingSink::default();
        session.start(0, &mut sink).unwrap();
        session.poll(&mut sink).unwrap();
        assert_eq!(session.generation(), 1);

        // Answer to a generation 1 request, still on its way back when
        // the key change flushes.
        queue_reply(&session, 1, drum_note(12, 99));
        session
            .apply(Edit::Structural(StructuralEdit::SetKey { key: 7, minor: false }), &mut sink)
            .unwrap();
        assert_eq!(session.generation(), 2);

        let report = session.poll(&mut sink).unwrap();
        assert_eq!(report.notes_rejected, 1);
        assert!(report.notes_accepted > 0);
        assert_eq!(session.flush_state(), FlushState::Idle);
        assert!(session.buffers().has(Module::Drums, 12));
        assert!(session.buffers().get(Module::Drums, 12).iter().all(|n| n.pitch != 99));
    }

    #[test]
    fn test_structural_edit_flushes_everything() {
        let (mut session, _clock) = session();
        let mut sink = RecordingSink::default();
        session.start(0, &mut sink).unwrap();
        session.poll(&mut sink).unwrap();
        sink.kills.clear();

        session
            .apply(Edit::Structural(StructuralEdit::SetKey { key: 2, minor: false }), &mut sink)
            .unwrap();
        assert_eq!(session.generation(), 2);
        assert_eq!(sink.kills.len(), Module::ALL.len());
        assert!(session.buffers().is_empty());
        // Dm7 moved up a whole tone.
        assert_eq!(session.sections()[0].chords[0].root, 4);
        assert_eq!(session.state().with_state_read(|s| s.arrangement.key), 2);

        let report = session.poll(&mut sink).unwrap();
        assert!(report.notes_accepted > 0);
    }

    #[test]
    fn test_enable_toggle_flushes_one_module() {
        let (mut session, _clock) = session();
        let mut sink = RecordingSink::default();
        session.start(0, &mut sink).unwrap();
        session.poll(&mut sink).unwrap();
        sink.kills.clear();

        session
            .apply(
                Edit::SetEnabled {
                    module: Module::Soloist,
                    enabled: false,
                },
                &mut sink,
            )
            .unwrap();
        assert_eq!(sink.kills, vec![Module::Soloist]);
        assert!(!session.buffers().has(Module::Soloist, 4));
        assert!(session.buffers().len(Module::Drums) > 0);
        assert_eq!(session.flush.module_generation(Module::Soloist), 2);
        assert_eq!(session.flush.module_generation(Module::Drums), 1);
    }

    #[test]
    fn test_failed_structural_edit_leaves_state() {
        let (mut session, _clock) = session();
        let mut sink = RecordingSink::default();
        let before = session.state().snapshot();
        let result = session.apply(
            Edit::Structural(StructuralEdit::LoadDrumPreset("Polka".to_string())),
            &mut sink,
        );
        assert!(matches!(result, Err(Error::UnknownPreset(_))));
        let result = session.apply(
            Edit::Structural(StructuralEdit::SetGrouping(Some(vec![3, 3]))),
            &mut sink,
        );
        assert!(matches!(result, Err(Error::InvalidGrouping { .. })));
        assert_eq!(session.state().snapshot(), before);
        assert_eq!(session.generation(), 0);
    }

    #[test]
    fn test_time_signature_change_refits_preset() {
        let (mut session, _clock) = session();
        let mut sink = RecordingSink::default();
        session
            .apply(
                Edit::Structural(StructuralEdit::SetTimeSignature(TimeSignature::SEVEN_EIGHT)),
                &mut sink,
            )
            .unwrap();
        session.state().with_state_read(|state| {
            assert_eq!(state.arrangement.time_signature, TimeSignature::SEVEN_EIGHT);
            // 16 beats of chords at two steps per beat.
            assert_eq!(state.arrangement.total_steps, 32);
            let kick = &state.groove.tracks[0];
            assert_eq!(kick.steps.len() % 14, 0);
        });
    }

    #[test]
    fn test_stop_silences_and_clears() {
        let (mut session, _clock) = session();
        let mut sink = RecordingSink::default();
        session.start(0, &mut sink).unwrap();
        session.poll(&mut sink).unwrap();
        sink.kills.clear();
        let generation = session.generation();
        session.stop(&mut sink).unwrap();
        assert!(!session.is_playing());
        assert!(session.buffers().is_empty());
        assert_eq!(sink.kills.len(), Module::ALL.len());
        assert_eq!(session.generation(), generation + 1);

        // A reply requested before the stop stays out of the buffers.
        queue_reply(&session, generation, drum_note(20, 42));
        let report = session.poll(&mut sink).unwrap();
        assert_eq!(report.notes_rejected, 1);
        assert!(session.buffers().is_empty());
    }

    #[test]
    fn test_auto_intensity_rides_the_band() {
        let (mut session, clock) = session();
        let mut sink = RecordingSink::default();
        let tick = Duration::from_millis(25);
        session.apply(Edit::Param(SyncAction::SetBandIntensity(0.2)), &mut sink).unwrap();
        session.start(0, &mut sink).unwrap();

        let version = session.state().version();
        run_for(&mut session, &clock, Duration::from_secs(1), tick, &mut sink).unwrap();
        assert_eq!(session.state().version(), version);
        assert_eq!(session.state().with_state_read(|s| s.performance.band_intensity), 0.2);

        session.apply(Edit::Param(SyncAction::SetAutoIntensity(true)), &mut sink).unwrap();
        // Past the top of the form at step 16.
        run_for(&mut session, &clock, Duration::from_secs(3), tick, &mut sink).unwrap();
        assert!(session.current_step() > 20);
        assert_eq!(session.conductor.form_iteration(), 1);
        let intensity = session.state().with_state_read(|s| s.performance.band_intensity);
        assert!(intensity > 0.2 && intensity <= 0.95, "{intensity}");

        session.pump().unwrap();
        assert_eq!(generator_state(&session).performance.band_intensity, intensity);
    }

    #[test]
    fn test_session_steps_end_playback() {
        let (mut session, clock) = session();
        let mut sink = RecordingSink::default();
        session.apply(Edit::Param(SyncAction::SetSessionSteps(8)), &mut sink).unwrap();
        session.start(0, &mut sink).unwrap();
        run_for(&mut session, &clock, Duration::from_secs(4), Duration::from_millis(25), &mut sink).unwrap();
        assert!(!session.is_playing());
        // Eight steps, then the nine-step cadence.
        assert_eq!(session.current_step(), 17);
        assert!(sink.triggers.iter().all(|t| t.step < 8 || [8, 12, 16].contains(&t.step)));
        assert!(sink
            .triggers
            .iter()
            .any(|t| t.step == 16 && t.module == Module::Drums && t.pitch == 49));
    }

    #[test]
    fn test_end_after_form_finishes_the_pass() {
        let (mut session, clock) = session();
        let mut sink = RecordingSink::default();
        let tick = Duration::from_millis(25);
        session.start(0, &mut sink).unwrap();
        run_for(&mut session, &clock, Duration::from_secs(1), tick, &mut sink).unwrap();
        let step = session.current_step();
        assert!(step > 0 && step < 16, "{step}");

        assert_eq!(session.end_after_form(&mut sink).unwrap(), 16);
        // Already-generated steps past the end are replaced.
        assert_eq!(session.generation(), 2);
        // Asking again keeps the pending end.
        assert_eq!(session.end_after_form(&mut sink).unwrap(), 16);
        assert_eq!(session.generation(), 2);

        run_for(&mut session, &clock, Duration::from_secs(5), tick, &mut sink).unwrap();
        assert!(!session.is_playing());
        assert_eq!(session.current_step(), 25);
        assert!(sink
            .triggers
            .iter()
            .all(|t| t.step < 16 || [16, 20, 24].contains(&t.step)));
        let tonic: Vec<u8> = sink
            .triggers
            .iter()
            .filter(|t| t.step == 24 && t.module == Module::Bass)
            .map(|t| t.pitch % 12)
            .collect();
        assert_eq!(tonic, vec![0]);
    }

    #[test]
    fn test_count_in_delays_the_downbeat() {
        let (mut session, clock) = session();
        let mut sink = RecordingSink::default();
        let tick = Duration::from_millis(25);
        session.apply(Edit::Param(SyncAction::SetCountIn(true)), &mut sink).unwrap();
        session.start(0, &mut sink).unwrap();

        // 100 bpm: clicks every 600ms, step 0 at 2.4s.
        run_for(&mut session, &clock, Duration::from_secs(2), tick, &mut sink).unwrap();
        assert_eq!(sink.clicks.len(), 4);
        assert_eq!(session.current_step(), 0);
        assert!(sink.triggers.is_empty());

        run_for(&mut session, &clock, Duration::from_millis(500), tick, &mut sink).unwrap();
        let downbeat: Vec<f64> = sink.triggers.iter().filter(|t| t.step == 0).map(|t| t.time).collect();
        assert!(!downbeat.is_empty());
        // Pocket offsets move notes by a few milliseconds at most.
        assert!(downbeat.iter().all(|time| (time - 2.4).abs() < 0.05));
    }
}
