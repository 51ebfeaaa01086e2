//! Ensemble Core - step-indexed accompaniment engine.
//!
//! This crate keeps a multi-instrument performance (chords, bass, soloist,
//! harmony, drums) in step with a transport counter while notes are
//! generated off the playback thread:
//!
//! - **Timing** - Time signature catalog, step durations and swing
//! - **Grid** - Step to measure/beat/group coordinates
//! - **Measure map** - Per-section meters with binary-search lookup
//! - **State** - Versioned song state and the delta table for edits
//! - **Sync** - Message contract and channel between transport and generator
//! - **Generator** - Deterministic note generation, in-process or on a worker thread
//! - **Buffers** - Per-instrument step buffers with mono/poly write rules
//! - **Flush** - Generation-gated discard-and-regenerate for structural edits
//! - **Scheduler** - Renders buffered notes against an injectable clock
//! - **Conductor** - Auto-intensity ramps between sections
//!
//! # Architecture
//!
//! The playback side owns the [`SongState`] (through a [`StateManager`]),
//! the [`InstrumentBuffers`] and the [`FlushCoordinator`]. The generator
//! keeps its own working copy of the state, updated only through
//! [`ToGenerator`] messages, and answers with [`FromGenerator`] replies.
//! Nothing is shared between the two sides except the channel.
//!
//! [`Session`] wires everything together for a transport loop.

pub mod buffers;
pub mod conductor;
pub mod config;
pub mod error;
pub mod flush;
pub mod generator;
pub mod grid;
pub mod latency;
pub mod measure_map;
pub mod presets;
pub mod scheduler;
pub mod session;
pub mod state;
pub mod sync;
pub mod timing;

pub use buffers::{InstrumentBuffers, WriteOutcome, WritePolicy};
pub use conductor::Conductor;
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use flush::{FlushCoordinator, FlushState, FlushStatus};
pub use generator::{Generator, GeneratorConfig, GeneratorWorker};
pub use grid::StepInfo;
pub use latency::{LatencyMonitor, LatencySample, LatencyStats};
pub use measure_map::{MeasureMap, MeasureSegment};
pub use scheduler::{
    Click, ClickAccent, Clock, ManualClock, NoteSink, PlaybackScheduler, SystemClock, Trigger, VoiceControl,
};
pub use session::{Edit, PollReport, Session, StructuralEdit};
pub use state::{Module, SongState, StateManager, SyncAction};
pub use sync::{FlushScope, FromGenerator, NoteEvent, ToGenerator};
pub use timing::{Step, SwingSubdivision, TimeSignature};
