//! State manager for thread-safe state access.
//!
//! The [`StateManager`] provides synchronized access to the central
//! [`SongState`]. It uses an RwLock to allow multiple readers or
//! a single writer.

use std::sync::{Arc, PoisonError, RwLock};

use super::actions::{StatePatch, SyncAction};
use crate::error::Result;
use super::model::SongState;

/// Thread-safe owner of the song state.
///
/// Clones share the same underlying state. The generator never holds
/// one; it only receives [`StateManager::snapshot`] projections and
/// delta patches.
#[derive(Clone)]
pub struct StateManager {
    state: Arc<RwLock<SongState>>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    /// Create a new state manager with default state.
    pub fn new() -> Self {
        Self::with_state(SongState::default())
    }

    /// Create a state manager with a specific initial state.
    pub fn with_state(state: SongState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Read the state with a closure.
    pub fn with_state_read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&SongState) -> R,
    {
        // A panicking writer leaves whole fields behind, never torn ones.
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Write to the state with a closure.
    pub fn with_state_write<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut SongState) -> R,
    {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Immutable projection of the current state, taken now.
    pub fn snapshot(&self) -> SongState {
        self.with_state_read(|s| s.clone())
    }

    /// Apply a parameter edit and return the patch to sync.
    ///
    /// The patch carries the new version so replicas stay in step. An edit
    /// that would leave the state invalid is rejected and changes nothing.
    pub fn apply(&self, action: &SyncAction) -> Result<StatePatch> {
        self.with_state_write(|state| {
            let mut next = state.clone();
            next.bump_version();
            let mut patch = action.patch();
            patch.version = Some(next.version);
            patch.apply_to(&mut next);
            next.validate()?;
            *state = next;
            Ok(patch)
        })
    }

    /// Replace the state wholesale (structural edits), bumping the version.
    pub fn replace_with<F>(&self, f: F) -> u64
    where
        F: FnOnce(&mut SongState),
    {
        self.with_state_write(|state| {
            let version = state.version;
            f(state);
            state.version = version + 1;
            state.version
        })
    }

    /// Get the current tempo.
    pub fn tempo(&self) -> f64 {
        self.with_state_read(|s| s.performance.bpm)
    }

    /// Get the state version.
    pub fn version(&self) -> u64 {
        self.with_state_read(|s| s.version)
    }
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Module;

    #[test]
    fn test_state_manager_creation() {
        let manager = StateManager::new();
        assert!((manager.tempo() - 100.0).abs() < 0.001);
        assert_eq!(manager.version(), 0);
    }

    #[test]
    fn test_apply_bumps_version_and_returns_patch() {
        let manager = StateManager::new();
        let patch = manager.apply(&SyncAction::SetBpm(140.0)).unwrap();
        assert!((manager.tempo() - 140.0).abs() < 0.001);
        assert_eq!(manager.version(), 1);
        assert_eq!(patch.version, Some(1));
        assert_eq!(patch.bpm, Some(140.0));
    }

    #[test]
    fn test_invalid_edit_changes_nothing() {
        let manager = StateManager::new();
        for bpm in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            assert!(manager.apply(&SyncAction::SetBpm(bpm)).is_err(), "bpm {bpm}");
        }
        assert_eq!(manager.tempo(), 100.0);
        assert_eq!(manager.version(), 0);
        assert!(manager.snapshot().validate().is_ok());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let manager = StateManager::new();
        let snapshot = manager.snapshot();
        manager.apply(&SyncAction::SetVolume {
            module: Module::Drums,
            volume: 0.1,
        })
        .unwrap();
        assert_eq!(snapshot.modules.drums.volume, 0.5);
        assert_eq!(manager.snapshot().modules.drums.volume, 0.1);
    }

    #[test]
    fn test_replace_with_bumps_once() {
        let manager = StateManager::new();
        let version = manager.replace_with(|s| {
            s.groove.measures = 2;
            s.bump_version();
        });
        assert_eq!(version, 1);
        assert_eq!(manager.snapshot().groove.measures, 2);
    }

    #[test]
    fn test_state_manager_clone() {
        let manager1 = StateManager::new();
        let manager2 = manager1.clone();
        manager1.apply(&SyncAction::SetBpm(150.0)).unwrap();
        assert!((manager2.tempo() - 150.0).abs() < 0.001);
    }
}
