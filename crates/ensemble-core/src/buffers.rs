//! Per-instrument note buffers.
//!
//! Buffers are owned by the playback side alone. The generator fills
//! them only indirectly, through `NOTES` replies the transport routes
//! here. Each module has a write policy:
//!
//! - bass: one note per step, a later write replaces the earlier one
//! - soloist: one note per step, a later write is dropped, unless double
//!   stops are on, in which case it behaves like the polyphonic modules
//! - chords, harmony, drums: every write is kept, in arrival order

use crate::state::Module;
use crate::sync::NoteEvent;
use crate::timing::Step;
use std::collections::BTreeMap;

/// How a buffer treats a second write to an occupied step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WritePolicy {
    /// Monophonic, last writer wins.
    Replace,
    /// Monophonic, first writer wins.
    KeepFirst,
    /// Polyphonic.
    Append,
}

/// Outcome of a single [`InstrumentBuffers::set`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored,
    Replaced,
    Dropped,
}

#[derive(Clone, Debug)]
struct ModuleBuffer {
    policy: WritePolicy,
    steps: BTreeMap<Step, Vec<NoteEvent>>,
}

impl ModuleBuffer {
    fn new(policy: WritePolicy) -> Self {
        Self {
            policy,
            steps: BTreeMap::new(),
        }
    }
}

/// Step-indexed note storage for all five modules.
#[derive(Clone, Debug)]
pub struct InstrumentBuffers {
    modules: [ModuleBuffer; 5],
}

impl Default for InstrumentBuffers {
    fn default() -> Self {
        Self::new()
    }
}

impl InstrumentBuffers {
    pub fn new() -> Self {
        let modules = Module::ALL.map(|m| ModuleBuffer::new(Self::default_policy(m)));
        Self { modules }
    }

    fn default_policy(module: Module) -> WritePolicy {
        match module {
            Module::Bass => WritePolicy::Replace,
            Module::Soloist => WritePolicy::KeepFirst,
            Module::Chords | Module::Harmony | Module::Drums => WritePolicy::Append,
        }
    }

    pub fn policy(&self, module: Module) -> WritePolicy {
        self.modules[module.index()].policy
    }

    /// Switch the soloist between monophonic and double-stop storage.
    ///
    /// Steps already buffered keep what they hold.
    pub fn set_double_stops(&mut self, enabled: bool) {
        self.modules[Module::Soloist.index()].policy = if enabled {
            WritePolicy::Append
        } else {
            WritePolicy::KeepFirst
        };
    }

    /// Store `note` under its own module and step.
    pub fn set(&mut self, note: NoteEvent) -> WriteOutcome {
        let buffer = &mut self.modules[note.module.index()];
        let slot = buffer.steps.entry(note.step).or_default();
        if slot.is_empty() {
            slot.push(note);
            return WriteOutcome::Stored;
        }
        match buffer.policy {
            WritePolicy::Append => {
                slot.push(note);
                WriteOutcome::Stored
            }
            WritePolicy::Replace => {
                slot.clear();
                slot.push(note);
                WriteOutcome::Replaced
            }
            WritePolicy::KeepFirst => {
                log::trace!(
                    "[BUFFER] {} step {} occupied, dropping pitch {}",
                    note.module,
                    note.step,
                    note.pitch
                );
                WriteOutcome::Dropped
            }
        }
    }

    /// Notes buffered for `module` at `step`, in write order.
    pub fn get(&self, module: Module, step: Step) -> &[NoteEvent] {
        self.modules[module.index()]
            .steps
            .get(&step)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has(&self, module: Module, step: Step) -> bool {
        !self.get(module, step).is_empty()
    }

    /// Remove and return the notes at `step`.
    pub fn take(&mut self, module: Module, step: Step) -> Vec<NoteEvent> {
        self.modules[module.index()]
            .steps
            .remove(&step)
            .unwrap_or_default()
    }

    /// Empty every module.
    pub fn clear(&mut self) {
        for buffer in &mut self.modules {
            buffer.steps.clear();
        }
    }

    pub fn clear_module(&mut self, module: Module) {
        self.modules[module.index()].steps.clear();
    }

    /// Drop every entry strictly before `step`.
    pub fn prune_before(&mut self, step: Step) {
        for buffer in &mut self.modules {
            let keep = buffer.steps.split_off(&step);
            buffer.steps = keep;
        }
    }

    /// Number of occupied steps for `module`.
    pub fn len(&self, module: Module) -> usize {
        self.modules[module.index()].steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.iter().all(|b| b.steps.is_empty())
    }

    /// Highest buffered step across all modules.
    pub fn last_step(&self) -> Option<Step> {
        self.modules
            .iter()
            .filter_map(|b| b.steps.keys().next_back().copied())
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(module: Module, step: Step, pitch: u8) -> NoteEvent {
        NoteEvent {
            module,
            step,
            pitch,
            velocity: 0.8,
            duration_steps: 1,
            timing_offset_seconds: 0.0,
        }
    }

    #[test]
    fn test_soloist_keeps_first_write() {
        let mut buffers = InstrumentBuffers::new();
        assert_eq!(buffers.set(note(Module::Soloist, 4, 72)), WriteOutcome::Stored);
        assert_eq!(buffers.set(note(Module::Soloist, 4, 76)), WriteOutcome::Dropped);
        let notes = buffers.get(Module::Soloist, 4);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].pitch, 72);
    }

    #[test]
    fn test_bass_keeps_last_write() {
        let mut buffers = InstrumentBuffers::new();
        buffers.set(note(Module::Bass, 0, 36));
        assert_eq!(buffers.set(note(Module::Bass, 0, 43)), WriteOutcome::Replaced);
        assert_eq!(buffers.get(Module::Bass, 0)[0].pitch, 43);
        assert_eq!(buffers.get(Module::Bass, 0).len(), 1);
    }

    #[test]
    fn test_polyphonic_keeps_all_in_order() {
        let mut buffers = InstrumentBuffers::new();
        for pitch in [60, 64, 67, 71] {
            buffers.set(note(Module::Chords, 8, pitch));
        }
        let pitches: Vec<u8> = buffers.get(Module::Chords, 8).iter().map(|n| n.pitch).collect();
        assert_eq!(pitches, vec![60, 64, 67, 71]);
    }

    #[test]
    fn test_double_stops_make_soloist_polyphonic() {
        let mut buffers = InstrumentBuffers::new();
        buffers.set_double_stops(true);
        buffers.set(note(Module::Soloist, 2, 72));
        buffers.set(note(Module::Soloist, 2, 76));
        assert_eq!(buffers.get(Module::Soloist, 2).len(), 2);

        buffers.set_double_stops(false);
        assert_eq!(buffers.set(note(Module::Soloist, 2, 79)), WriteOutcome::Dropped);
        assert_eq!(buffers.policy(Module::Soloist), WritePolicy::KeepFirst);
    }

    #[test]
    fn test_take_prune_and_clear() {
        let mut buffers = InstrumentBuffers::new();
        for step in 0..10 {
            buffers.set(note(Module::Drums, step, 36));
        }
        buffers.set(note(Module::Bass, 3, 40));

        assert_eq!(buffers.take(Module::Drums, 0).len(), 1);
        assert!(!buffers.has(Module::Drums, 0));
        assert!(buffers.take(Module::Drums, 0).is_empty());

        buffers.prune_before(5);
        assert!(!buffers.has(Module::Bass, 3));
        assert!(buffers.has(Module::Drums, 5));
        assert_eq!(buffers.len(Module::Drums), 5);
        assert_eq!(buffers.last_step(), Some(9));

        // Reads never evict.
        buffers.get(Module::Drums, 6);
        assert!(buffers.has(Module::Drums, 6));

        buffers.clear();
        assert!(buffers.is_empty());
    }
}
