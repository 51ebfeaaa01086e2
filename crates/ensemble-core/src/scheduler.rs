//! Step-based playback scheduler.
//!
//! The scheduler walks the transport step by step, rendering every step
//! whose start time falls inside the schedule-ahead window. Rendering a
//! step drains its buffer entries and hands them to a [`NoteSink`]; an
//! empty entry is silence. The scheduler never waits on the generator.
//!
//! Time comes from an injected [`Clock`] so tests can drive it by hand.

use crate::buffers::InstrumentBuffers;
use crate::grid;
use crate::state::{Module, SongState};
use crate::sync::Timestamp;
use crate::timing::{self, Step};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of the transport's notion of "now".
pub trait Clock: Send + Sync {
    /// Microseconds since an arbitrary, fixed origin.
    fn now_micros(&self) -> Timestamp;

    fn now_seconds(&self) -> f64 {
        self.now_micros() as f64 / 1_000_000.0
    }
}

/// Wall clock measured from construction.
#[derive(Clone, Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_micros(&self) -> Timestamp {
        self.origin.elapsed().as_micros() as Timestamp
    }
}

/// Hand-driven clock for deterministic tests and offline rendering.
///
/// Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    micros: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.micros
            .fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }

    pub fn set_micros(&self, micros: Timestamp) {
        self.micros.store(micros, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> Timestamp {
        self.micros.load(Ordering::SeqCst)
    }
}

/// A note ready for the synthesis collaborator.
#[derive(Clone, Debug, PartialEq)]
pub struct Trigger {
    pub module: Module,
    pub step: Step,
    /// Clock time in seconds at which the note starts.
    pub time: f64,
    pub pitch: u8,
    /// Final velocity after volume and polyphony compensation.
    pub velocity: f32,
    pub duration_seconds: f64,
}

/// How strongly a count-in click is accented.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClickAccent {
    Downbeat,
    /// First beat of a later beat group, e.g. beat 3 of 7/8 grouped 2+2+3.
    Group,
    Beat,
}

/// One metronome beat of a count-in.
#[derive(Clone, Debug, PartialEq)]
pub struct Click {
    /// Zero-based beat within the count-in measure.
    pub beat: u32,
    pub time: f64,
    pub accent: ClickAccent,
}

/// Receives rendered notes.
pub trait NoteSink {
    fn trigger(&mut self, trigger: Trigger);

    /// Count-in clicks; ignored unless the sink has a metronome.
    fn click(&mut self, _click: Click) {}
}

/// Silences whatever a module is currently sounding.
pub trait VoiceControl {
    fn kill(&mut self, module: Module);
}

/// Renders buffered notes at their step times.
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    running: bool,
    next_step: Step,
    /// Clock seconds at which `next_step` starts.
    next_step_time: f64,
    /// Count-in clicks not yet handed to the sink.
    count_in: VecDeque<Click>,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin rendering at `step`, starting at clock time `at`.
    pub fn start(&mut self, step: Step, at: f64) {
        self.running = true;
        self.next_step = step;
        self.next_step_time = at;
        log::debug!("[SCHEDULER] started at step {} (t={:.3}s)", step, at);
    }

    /// Begin at `step` after one measure of clicks starting at `at`.
    ///
    /// The clicks follow the meter and beat grouping in force at `step`.
    pub fn start_with_count_in(&mut self, step: Step, at: f64, state: &SongState) {
        let arrangement = &state.arrangement;
        let signature = arrangement
            .measure_map
            .time_signature_at(arrangement.wrap(step));
        let beat_seconds =
            f64::from(signature.steps_per_beat()) * timing::sixteenth_seconds(state.performance.bpm);
        let grouping = grid::effective_grouping(signature, arrangement.grouping_at(step));
        let group_starts: Vec<u32> = grouping
            .iter()
            .scan(0, |beat, len| {
                let start = *beat;
                *beat += len;
                Some(start)
            })
            .collect();

        let beats = signature.beats_per_measure();
        self.count_in = (0..beats)
            .map(|beat| Click {
                beat,
                time: at + f64::from(beat) * beat_seconds,
                accent: match beat {
                    0 => ClickAccent::Downbeat,
                    b if group_starts.contains(&b) => ClickAccent::Group,
                    _ => ClickAccent::Beat,
                },
            })
            .collect();
        log::debug!("[SCHEDULER] counting in {} beats of {}", beats, signature);
        self.start(step, at + f64::from(beats) * beat_seconds);
    }

    /// True while count-in clicks are still pending.
    pub fn is_counting_in(&self) -> bool {
        !self.count_in.is_empty()
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.count_in.clear();
        log::debug!("[SCHEDULER] stopped at step {}", self.next_step);
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The next step to render; everything before it has been played.
    pub fn current_step(&self) -> Step {
        self.next_step
    }

    pub fn next_step_time(&self) -> f64 {
        self.next_step_time
    }

    /// Render every step that starts before `now + schedule_ahead`.
    ///
    /// Returns the number of steps rendered.
    pub fn render(
        &mut self,
        now: f64,
        schedule_ahead: f64,
        state: &SongState,
        buffers: &mut InstrumentBuffers,
        sink: &mut dyn NoteSink,
    ) -> usize {
        if !self.running {
            return 0;
        }
        let horizon = now + schedule_ahead;
        while let Some(click) = self.count_in.pop_front() {
            if click.time >= horizon {
                self.count_in.push_front(click);
                break;
            }
            sink.click(click);
        }

        let mut rendered = 0;
        // The closing cadence plays past the session length.
        let end = state.coda_start().map(|start| start + state.coda_steps());

        while self.next_step_time < horizon {
            if end.is_some_and(|end| self.next_step >= end) {
                log::info!(
                    "[SCHEDULER] session finished after {} steps",
                    state.performance.session_steps
                );
                self.running = false;
                break;
            }
            self.render_step(state, buffers, sink);
            self.advance(state);
            rendered += 1;
        }

        buffers.prune_before(self.next_step);
        rendered
    }

    fn render_step(&self, state: &SongState, buffers: &mut InstrumentBuffers, sink: &mut dyn NoteSink) {
        let step = self.next_step;
        let sixteenth = timing::sixteenth_seconds(state.performance.bpm);

        for module in Module::ALL {
            let notes = buffers.take(module, step);
            let settings = state.modules.get(module);
            if notes.is_empty() || !settings.enabled {
                continue;
            }
            let gain = match module {
                Module::Soloist | Module::Harmony if notes.len() > 1 => {
                    1.0 / (notes.len() as f32).sqrt()
                }
                _ => 1.0,
            };
            for note in notes {
                let velocity = (note.velocity * gain * settings.volume).clamp(0.0, 1.0);
                sink.trigger(Trigger {
                    module,
                    step,
                    time: (self.next_step_time + note.timing_offset_seconds).max(0.0),
                    pitch: note.pitch,
                    velocity,
                    duration_seconds: f64::from(note.duration_steps) * sixteenth,
                });
            }
        }
    }

    fn advance(&mut self, state: &SongState) {
        let arrangement = &state.arrangement;
        let signature = arrangement
            .measure_map
            .time_signature_at(arrangement.wrap(self.next_step));
        self.next_step_time += timing::step_duration(
            self.next_step,
            state.performance.bpm,
            state.groove.swing,
            state.groove.swing_subdivision,
            signature,
        );
        self.next_step += 1;
    }
}

/// Sink that records everything, for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    pub triggers: Vec<Trigger>,
    pub kills: Vec<Module>,
    pub clicks: Vec<Click>,
}

#[cfg(test)]
impl NoteSink for RecordingSink {
    fn trigger(&mut self, trigger: Trigger) {
        self.triggers.push(trigger);
    }

    fn click(&mut self, click: Click) {
        self.clicks.push(click);
    }
}

#[cfg(test)]
impl VoiceControl for RecordingSink {
    fn kill(&mut self, module: Module) {
        self.kills.push(module);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measure_map::MeasureMap;
    use crate::sync::NoteEvent;
    use crate::timing::TimeSignature;

    fn note(module: Module, step: Step, pitch: u8) -> NoteEvent {
        NoteEvent {
            module,
            step,
            pitch,
            velocity: 1.0,
            duration_steps: 2,
            timing_offset_seconds: 0.0,
        }
    }

    fn state() -> SongState {
        let mut state = SongState::default();
        state.performance.bpm = 120.0;
        state.modules.soloist.enabled = true;
        state.modules.harmony.enabled = true;
        state
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        let shared = clock.clone();
        clock.advance(Duration::from_millis(25));
        assert_eq!(shared.now_micros(), 25_000);
        shared.set_micros(1_000_000);
        assert!((clock.now_seconds() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_renders_window_and_drains() {
        let state = state();
        let mut buffers = InstrumentBuffers::new();
        for step in 0..8 {
            buffers.set(note(Module::Drums, step, 36));
        }
        let mut sink = RecordingSink::default();
        let mut scheduler = PlaybackScheduler::new();
        scheduler.start(0, 0.0);

        // 120 bpm: a step is 125ms, so a 300ms window covers steps 0..=2.
        let rendered = scheduler.render(0.0, 0.3, &state, &mut buffers, &mut sink);
        assert_eq!(rendered, 3);
        assert_eq!(scheduler.current_step(), 3);
        assert_eq!(sink.triggers.len(), 3);
        assert!((sink.triggers[1].time - 0.125).abs() < 1e-9);
        assert!((sink.triggers[0].duration_seconds - 0.25).abs() < 1e-9);
        assert!(!buffers.has(Module::Drums, 0));
        assert!(buffers.has(Module::Drums, 3));

        // Nothing new until the clock moves.
        assert_eq!(scheduler.render(0.0, 0.3, &state, &mut buffers, &mut sink), 0);
    }

    #[test]
    fn test_empty_steps_are_silent() {
        let state = state();
        let mut buffers = InstrumentBuffers::new();
        buffers.set(note(Module::Bass, 2, 40));
        let mut sink = RecordingSink::default();
        let mut scheduler = PlaybackScheduler::new();
        scheduler.start(0, 0.0);
        scheduler.render(1.0, 0.0, &state, &mut buffers, &mut sink);
        assert_eq!(sink.triggers.len(), 1);
        assert_eq!(sink.triggers[0].step, 2);
    }

    #[test]
    fn test_polyphony_gain_compensation() {
        let state = state();
        let mut buffers = InstrumentBuffers::new();
        buffers.set_double_stops(true);
        buffers.set(note(Module::Soloist, 0, 72));
        buffers.set(note(Module::Soloist, 0, 76));
        buffers.set(note(Module::Chords, 0, 60));
        buffers.set(note(Module::Chords, 0, 64));
        let mut sink = RecordingSink::default();
        let mut scheduler = PlaybackScheduler::new();
        scheduler.start(0, 0.0);
        scheduler.render(0.0, 0.01, &state, &mut buffers, &mut sink);

        let soloist: Vec<f32> = sink
            .triggers
            .iter()
            .filter(|t| t.module == Module::Soloist)
            .map(|t| t.velocity)
            .collect();
        let expected = state.modules.soloist.volume / 2f32.sqrt();
        assert!(soloist.iter().all(|v| (v - expected).abs() < 1e-6));

        // Chords are not compensated.
        let chords = sink.triggers.iter().find(|t| t.module == Module::Chords).unwrap();
        assert!((chords.velocity - state.modules.chords.volume).abs() < 1e-6);
    }

    #[test]
    fn test_disabled_module_is_drained_silently() {
        let mut state = state();
        state.modules.bass.enabled = false;
        let mut buffers = InstrumentBuffers::new();
        buffers.set(note(Module::Bass, 0, 40));
        let mut sink = RecordingSink::default();
        let mut scheduler = PlaybackScheduler::new();
        scheduler.start(0, 0.0);
        scheduler.render(0.0, 0.01, &state, &mut buffers, &mut sink);
        assert!(sink.triggers.is_empty());
        assert!(buffers.is_empty());
    }

    #[test]
    fn test_swing_moves_times_not_steps() {
        let mut state = state();
        state.groove.swing = 100.0;
        let mut buffers = InstrumentBuffers::new();
        for step in 0..4 {
            buffers.set(note(Module::Drums, step, 42));
        }
        let mut sink = RecordingSink::default();
        let mut scheduler = PlaybackScheduler::new();
        scheduler.start(0, 0.0);
        scheduler.render(0.0, 0.49, &state, &mut buffers, &mut sink);

        let steps: Vec<Step> = sink.triggers.iter().map(|t| t.step).collect();
        assert_eq!(steps, vec![0, 1, 2, 3]);
        let straight = timing::sixteenth_seconds(120.0);
        assert!(sink.triggers[2].time > 2.0 * straight);
    }

    #[test]
    fn test_session_steps_stop_playback() {
        let mut state = state();
        state.performance.session_steps = 4;
        let mut buffers = InstrumentBuffers::new();
        let mut sink = RecordingSink::default();
        let mut scheduler = PlaybackScheduler::new();
        scheduler.start(0, 0.0);
        let rendered = scheduler.render(10.0, 0.1, &state, &mut buffers, &mut sink);
        // Four steps plus the nine-step closing cadence.
        assert_eq!(rendered, 4 + 9);
        assert_eq!(scheduler.current_step(), 13);
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_count_in_clicks_one_measure() {
        let state = state();
        let mut buffers = InstrumentBuffers::new();
        buffers.set(note(Module::Drums, 0, 36));
        let mut sink = RecordingSink::default();
        let mut scheduler = PlaybackScheduler::new();
        scheduler.start_with_count_in(0, 1.0, &state);
        assert!(scheduler.is_counting_in());
        // 120 bpm: four half-second beats, so step 0 lands at t=3.0.
        assert!((scheduler.next_step_time() - 3.0).abs() < 1e-9);

        assert_eq!(scheduler.render(1.0, 1.2, &state, &mut buffers, &mut sink), 0);
        let times: Vec<f64> = sink.clicks.iter().map(|c| c.time).collect();
        assert_eq!(times, vec![1.0, 1.5, 2.0]);
        assert!(sink.triggers.is_empty());

        scheduler.render(2.9, 0.2, &state, &mut buffers, &mut sink);
        assert!(!scheduler.is_counting_in());
        assert_eq!(sink.clicks.len(), 4);
        assert_eq!(sink.clicks[0].accent, ClickAccent::Downbeat);
        assert!(sink.clicks[1..].iter().all(|c| c.accent != ClickAccent::Downbeat));
        assert_eq!(sink.triggers.len(), 1);
        assert!((sink.triggers[0].time - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_count_in_follows_beat_grouping() {
        let mut state = state();
        state.arrangement.time_signature = TimeSignature::SEVEN_EIGHT;
        state.arrangement.measure_map = MeasureMap::empty(TimeSignature::SEVEN_EIGHT);
        state.arrangement.grouping = Some(vec![2, 2, 3]);
        let mut buffers = InstrumentBuffers::new();
        let mut sink = RecordingSink::default();
        let mut scheduler = PlaybackScheduler::new();
        scheduler.start_with_count_in(0, 0.0, &state);
        scheduler.render(0.0, 10.0, &state, &mut buffers, &mut sink);

        let accents: Vec<ClickAccent> = sink.clicks.iter().map(|c| c.accent).collect();
        use ClickAccent::*;
        assert_eq!(accents, vec![Downbeat, Beat, Group, Beat, Group, Beat, Beat]);
        // Eighth-note beats at 120 bpm are 250ms apart.
        assert!((sink.clicks[1].time - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_stop_drops_pending_clicks() {
        let state = state();
        let mut scheduler = PlaybackScheduler::new();
        scheduler.start_with_count_in(0, 0.0, &state);
        scheduler.stop();
        assert!(!scheduler.is_counting_in());
    }
}
