//! Messages exchanged between the transport and the generator.
//!
//! Both directions use closed enums with a fixed payload per kind. Every
//! message is a self-contained value: nothing crosses the boundary by
//! reference.

use crate::state::{Module, SongState, StatePatch};
use crate::timing::Step;
use serde::{Deserialize, Serialize};

/// Flush generation. Bumped by every flush; stale replies carry an older one.
pub type Generation = u64;

/// Transport clock reading in microseconds, echoed back for latency.
pub type Timestamp = u64;

/// A note produced by the generator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub module: Module,
    pub step: Step,
    /// MIDI note number.
    pub pitch: u8,
    /// In `0.0..=1.0`.
    pub velocity: f32,
    pub duration_steps: u32,
    /// Micro-timing push or pull relative to the step time.
    pub timing_offset_seconds: f64,
}

/// State carried by a `SYNC_STATE` message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SyncPayload {
    /// Replaces the generator's working copy.
    Full(Box<SongState>),
    /// Patches it.
    Delta { action: String, patch: StatePatch },
}

/// Which buffers a flush discards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlushScope {
    All,
    Module(Module),
}

impl FlushScope {
    pub fn includes(self, module: Module) -> bool {
        match self {
            FlushScope::All => true,
            FlushScope::Module(m) => m == module,
        }
    }
}

/// Transport to generator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ToGenerator {
    /// Start the periodic tick.
    Start,
    /// Stop the periodic tick.
    Stop,
    /// Exit the worker loop.
    Shutdown,
    SyncState {
        generation: Generation,
        payload: SyncPayload,
    },
    /// Fill the look-ahead window starting at `step`.
    RequestBuffer {
        generation: Generation,
        step: Step,
        timestamp: Timestamp,
    },
    /// Fill `steps` steps from the current fill position.
    Prime {
        generation: Generation,
        steps: Step,
        timestamp: Timestamp,
    },
    /// Replace state, drop everything generated for `scope`, and
    /// regenerate from `step`.
    Flush {
        generation: Generation,
        step: Step,
        snapshot: Box<SongState>,
        prime_steps: Step,
        scope: FlushScope,
        timestamp: Timestamp,
    },
}

impl ToGenerator {
    pub fn kind(&self) -> &'static str {
        match self {
            ToGenerator::Start => "START",
            ToGenerator::Stop => "STOP",
            ToGenerator::Shutdown => "SHUTDOWN",
            ToGenerator::SyncState { .. } => "SYNC_STATE",
            ToGenerator::RequestBuffer { .. } => "REQUEST_BUFFER",
            ToGenerator::Prime { .. } => "PRIME",
            ToGenerator::Flush { .. } => "FLUSH",
        }
    }
}

/// Generator to transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FromGenerator {
    Notes {
        /// Generation of the request this answers.
        generation: Generation,
        notes: Vec<NoteEvent>,
        request_timestamp: Timestamp,
        generator_process_ms: f64,
    },
    /// Timing pulse; the transport re-polls on each one.
    Tick,
    /// A request the generator could not serve. Its state is unchanged.
    Error {
        generation: Generation,
        message: String,
    },
}
