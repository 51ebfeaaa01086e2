//! Flush coordination and stale-reply rejection.
//!
//! A flush discards everything buffered for its scope, silences the
//! affected voices, and sends the generator one `FLUSH` carrying a full
//! snapshot. From the caller's point of view it is a single synchronous
//! call; the coordinator then stays in [`FlushState::Flushing`] until the
//! first reply of the new generation arrives or the timeout expires.
//!
//! Every flush bumps the global generation. Each module remembers the
//! generation of the last flush that covered it, and a reply is accepted
//! for a module only if it is at least that new.

use crate::buffers::InstrumentBuffers;
use crate::error::Result;
use crate::scheduler::VoiceControl;
use crate::state::{Module, SongState};
use crate::sync::{FlushScope, Generation, NoteEvent, Timestamp, ToGenerator, TransportEnd};
use crate::timing::Step;
use std::time::Duration;

/// Coordinator state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushState {
    Idle,
    Flushing {
        generation: Generation,
        step: Step,
        scope: FlushScope,
        started_at: Timestamp,
    },
}

/// Result of [`FlushCoordinator::poll_timeout`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushStatus {
    Idle,
    Pending,
    /// The generator did not answer in time. Reported once; the affected
    /// buffers stay empty.
    TimedOut { generation: Generation },
}

/// Counts from routing one `NOTES` reply.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouteReport {
    pub accepted: usize,
    pub rejected: usize,
}

/// Owns the generation counter and the flush state machine.
#[derive(Debug)]
pub struct FlushCoordinator {
    state: FlushState,
    generation: Generation,
    module_generations: [Generation; 5],
    timeout: Duration,
}

impl FlushCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: FlushState::Idle,
            generation: 0,
            module_generations: [0; 5],
            timeout,
        }
    }

    pub fn state(&self) -> FlushState {
        self.state
    }

    pub fn is_flushing(&self) -> bool {
        matches!(self.state, FlushState::Flushing { .. })
    }

    /// Generation stamped on outgoing requests.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Oldest reply generation still accepted for `module`.
    pub fn module_generation(&self, module: Module) -> Generation {
        self.module_generations[module.index()]
    }

    /// Run a flush and return its generation.
    ///
    /// Buffers and voices are cleared before the message is sent, so even
    /// if sending fails nothing stale can play.
    #[allow(clippy::too_many_arguments)]
    pub fn flush(
        &mut self,
        step: Step,
        snapshot: SongState,
        prime_steps: Step,
        scope: FlushScope,
        buffers: &mut InstrumentBuffers,
        voices: &mut dyn VoiceControl,
        channel: &TransportEnd,
        now: Timestamp,
    ) -> Result<Generation> {
        for module in Module::ALL {
            if scope.includes(module) {
                buffers.clear_module(module);
                voices.kill(module);
            }
        }
        buffers.set_double_stops(snapshot.modules.soloist.double_stops);

        self.generation += 1;
        let generation = self.generation;
        for module in Module::ALL {
            if scope.includes(module) {
                self.module_generations[module.index()] = generation;
            }
        }
        self.state = FlushState::Flushing {
            generation,
            step,
            scope,
            started_at: now,
        };
        log::debug!(
            "[FLUSH] generation {} at step {} ({:?}, prime {})",
            generation,
            step,
            scope,
            prime_steps
        );

        channel.send(ToGenerator::Flush {
            generation,
            step,
            snapshot: Box::new(snapshot),
            prime_steps,
            scope,
            timestamp: now,
        })?;
        Ok(generation)
    }

    /// Retire every outstanding request without asking for new notes.
    ///
    /// Replies already in flight become stale and a pending flush is
    /// abandoned. Used when the transport stops.
    pub fn invalidate(&mut self) -> Generation {
        self.generation += 1;
        self.module_generations = [self.generation; 5];
        self.state = FlushState::Idle;
        log::debug!("[FLUSH] generation {} retires in-flight requests", self.generation);
        self.generation
    }

    /// Whether a reply from `generation` may fill `module`'s buffer.
    pub fn accepts(&self, generation: Generation, module: Module) -> bool {
        generation >= self.module_generations[module.index()]
    }

    /// Route a `NOTES` reply into the buffers, dropping stale notes.
    pub fn route(
        &mut self,
        generation: Generation,
        notes: Vec<NoteEvent>,
        buffers: &mut InstrumentBuffers,
    ) -> RouteReport {
        let mut report = RouteReport::default();
        for note in notes {
            if self.accepts(generation, note.module) {
                buffers.set(note);
                report.accepted += 1;
            } else {
                report.rejected += 1;
            }
        }
        if report.rejected > 0 {
            log::debug!(
                "[FLUSH] discarded {} notes from stale generation {}",
                report.rejected,
                generation
            );
        }
        self.observe_reply(generation);
        report
    }

    /// Note that the generator answered with `generation`.
    pub fn observe_reply(&mut self, generation: Generation) {
        if let FlushState::Flushing {
            generation: pending,
            ..
        } = self.state
        {
            if generation >= pending {
                log::trace!("[FLUSH] generation {} acknowledged", pending);
                self.state = FlushState::Idle;
            }
        }
    }

    /// Check the pending flush against the timeout.
    pub fn poll_timeout(&mut self, now: Timestamp) -> FlushStatus {
        match self.state {
            FlushState::Idle => FlushStatus::Idle,
            FlushState::Flushing {
                generation,
                started_at,
                ..
            } => {
                let elapsed = now.saturating_sub(started_at);
                if elapsed >= self.timeout.as_micros() as u64 {
                    log::warn!(
                        "[FLUSH] generation {} unanswered after {}ms; affected instruments stay silent",
                        generation,
                        elapsed / 1_000
                    );
                    self.state = FlushState::Idle;
                    FlushStatus::TimedOut { generation }
                } else {
                    FlushStatus::Pending
                }
            }
        }
    }
}
