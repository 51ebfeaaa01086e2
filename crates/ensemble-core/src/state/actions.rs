//! Parameter edits and the delta patches they sync as.
//!
//! Every non-structural user action maps, through [`SyncAction::patch`],
//! to a [`StatePatch`] that names only the fields the action touches.
//! Patches merge field by field with last-write-wins, so replaying the
//! same patch twice is harmless.

use super::model::{Module, SongState};
use crate::timing::{Step, SwingSubdivision};
use serde::{Deserialize, Serialize};

/// A parameter tweak that never needs a flush.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SyncAction {
    SetBpm(f64),
    SetSwing(f32),
    SetSwingSubdivision(SwingSubdivision),
    SetStyle { module: Module, style: String },
    SetVolume { module: Module, volume: f32 },
    SetOctave { module: Module, octave: u8 },
    SetDensity { module: Module, density: f32 },
    /// Genre feel carries its swing defaults along.
    SetGenreFeel {
        feel: String,
        swing: f32,
        subdivision: SwingSubdivision,
    },
    SetBandIntensity(f32),
    /// Complexity also nudges harmony density.
    SetComplexity(f32),
    SetAutoIntensity(bool),
    SetDoubleStops(bool),
    SetSessionSteps(Step),
    SetCountIn(bool),
}

impl SyncAction {
    /// Action name carried in delta messages.
    pub fn name(&self) -> &'static str {
        match self {
            SyncAction::SetBpm(_) => "SET_BPM",
            SyncAction::SetSwing(_) => "SET_SWING",
            SyncAction::SetSwingSubdivision(_) => "SET_SWING_SUB",
            SyncAction::SetStyle { .. } => "SET_STYLE",
            SyncAction::SetVolume { .. } => "SET_VOLUME",
            SyncAction::SetOctave { .. } => "SET_OCTAVE",
            SyncAction::SetDensity { .. } => "SET_PARAM",
            SyncAction::SetGenreFeel { .. } => "SET_GENRE_FEEL",
            SyncAction::SetBandIntensity(_) => "SET_BAND_INTENSITY",
            SyncAction::SetComplexity(_) => "SET_COMPLEXITY",
            SyncAction::SetAutoIntensity(_) => "SET_AUTO_INTENSITY",
            SyncAction::SetDoubleStops(_) => "SET_DOUBLE_STOPS",
            SyncAction::SetSessionSteps(_) => "SET_SESSION_STEPS",
            SyncAction::SetCountIn(_) => "SET_COUNT_IN",
        }
    }

    /// The minimal patch for this action.
    pub fn patch(&self) -> StatePatch {
        let mut patch = StatePatch::default();
        match self {
            SyncAction::SetBpm(bpm) => patch.bpm = Some(*bpm),
            SyncAction::SetSwing(swing) => patch.swing = Some(swing_amount(*swing)),
            SyncAction::SetSwingSubdivision(sub) => patch.swing_subdivision = Some(*sub),
            SyncAction::SetStyle { module, style } => {
                patch.module_mut(*module).style = Some(style.clone());
            }
            SyncAction::SetVolume { module, volume } => {
                patch.module_mut(*module).volume = Some(volume.clamp(0.0, 1.0));
            }
            SyncAction::SetOctave { module, octave } => {
                patch.module_mut(*module).octave = Some(*octave);
            }
            SyncAction::SetDensity { module, density } => {
                patch.module_mut(*module).density = Some(density.clamp(0.0, 1.0));
            }
            SyncAction::SetGenreFeel {
                feel,
                swing,
                subdivision,
            } => {
                patch.genre_feel = Some(feel.clone());
                patch.swing = Some(swing_amount(*swing));
                patch.swing_subdivision = Some(*subdivision);
            }
            SyncAction::SetBandIntensity(v) => patch.band_intensity = Some(v.clamp(0.0, 1.0)),
            SyncAction::SetComplexity(v) => {
                let v = v.clamp(0.0, 1.0);
                patch.complexity = Some(v);
                patch.module_mut(Module::Harmony).density = Some(v);
            }
            SyncAction::SetAutoIntensity(on) => patch.auto_intensity = Some(*on),
            SyncAction::SetDoubleStops(on) => {
                patch.module_mut(Module::Soloist).double_stops = Some(*on);
            }
            SyncAction::SetSessionSteps(steps) => patch.session_steps = Some(*steps),
            SyncAction::SetCountIn(on) => patch.count_in = Some(*on),
        }
        patch
    }
}

/// Swing percentage clamped to `0..=100`. NaN is passed through for
/// validation to reject.
fn swing_amount(swing: f32) -> f32 {
    swing.clamp(0.0, 100.0)
}

/// Changed module fields; `None` means unchanged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulePatch {
    pub module: Option<Module>,
    pub style: Option<String>,
    pub volume: Option<f32>,
    pub octave: Option<u8>,
    pub density: Option<f32>,
    pub double_stops: Option<bool>,
}

/// A partial song state. Absent fields leave the target unchanged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatePatch {
    pub version: Option<u64>,
    pub bpm: Option<f64>,
    pub swing: Option<f32>,
    pub swing_subdivision: Option<SwingSubdivision>,
    pub genre_feel: Option<String>,
    pub band_intensity: Option<f32>,
    pub complexity: Option<f32>,
    pub auto_intensity: Option<bool>,
    pub session_steps: Option<Step>,
    pub count_in: Option<bool>,
    pub modules: Vec<ModulePatch>,
}

impl StatePatch {
    fn module_mut(&mut self, module: Module) -> &mut ModulePatch {
        let index = match self.modules.iter().position(|m| m.module == Some(module)) {
            Some(index) => index,
            None => {
                self.modules.push(ModulePatch {
                    module: Some(module),
                    ..ModulePatch::default()
                });
                self.modules.len() - 1
            }
        };
        &mut self.modules[index]
    }

    /// Apply onto `state`, field by field.
    pub fn apply_to(&self, state: &mut SongState) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *target = v.clone();
            }
        }

        set(&mut state.version, &self.version);
        set(&mut state.performance.bpm, &self.bpm);
        set(&mut state.groove.swing, &self.swing);
        set(&mut state.groove.swing_subdivision, &self.swing_subdivision);
        set(&mut state.groove.genre_feel, &self.genre_feel);
        set(&mut state.performance.band_intensity, &self.band_intensity);
        set(&mut state.performance.complexity, &self.complexity);
        set(&mut state.performance.auto_intensity, &self.auto_intensity);
        set(&mut state.performance.session_steps, &self.session_steps);
        set(&mut state.performance.count_in, &self.count_in);

        for patch in &self.modules {
            // A module patch without a module name is malformed; skip it.
            let Some(module) = patch.module else {
                log::warn!("[SYNC] ignoring module patch without module name");
                continue;
            };
            let settings = state.modules.get_mut(module);
            set(&mut settings.style, &patch.style);
            set(&mut settings.volume, &patch.volume);
            set(&mut settings.octave, &patch.octave);
            set(&mut settings.density, &patch.density);
            set(&mut settings.double_stops, &patch.double_stops);
        }
    }
}
