//! Song state management.
//!
//! This module provides the central song model and the delta table for
//! parameter edits.
//!
//! # Architecture
//!
//! - [`SongState`] - The complete, versioned song state
//! - [`SyncAction`] - Parameter edits that sync as deltas
//! - [`StatePatch`] - The partial state a delta carries
//! - [`StateManager`] - Thread-safe state access

mod actions;
mod manager;
mod model;

pub use actions::{ModulePatch, StatePatch, SyncAction};
pub use manager::StateManager;
pub use model::{
    Arrangement, ChordEntry, ChordPosition, ChordQuality, ChordSpan, DrumTrack, GrooveSettings,
    Module, ModuleSettings, ModuleTable, PerformanceSettings, Section, SectionSpan, SongState,
};
