//! Song files.
//!
//! A song file is TOML holding what the arrangement side of a full
//! application would hand the engine:
//!
//! ```toml
//! key = "A"
//! minor = true
//! time_signature = "4/4"
//! bpm = 96
//! genre = "Funk"
//! drum_preset = "Funk"
//!
//! [[sections]]
//! label = "Verse"
//! repeat = 2
//! chords = [
//!     { root = "A", quality = "min7", beats = 4 },
//!     { root = "D", quality = "7", beats = 4 },
//! ]
//! ```

use anyhow::{bail, Context, Result};
use ensemble_core::presets;
use ensemble_core::state::{Arrangement, ChordEntry, ChordQuality, ModuleTable, Section};
use ensemble_core::{SongState, SwingSubdivision, TimeSignature};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SongFile {
    #[serde(default = "default_key")]
    pub key: String,
    #[serde(default)]
    pub minor: bool,
    #[serde(default)]
    pub time_signature: TimeSignature,
    pub grouping: Option<Vec<u32>>,
    pub bpm: Option<f64>,
    pub genre: Option<String>,
    pub drum_preset: Option<String>,
    pub swing: Option<f32>,
    pub swing_subdivision: Option<SwingSubdivision>,
    /// Let the band intensity follow the form.
    #[serde(default)]
    pub auto_intensity: bool,
    /// Click one measure before the first note.
    #[serde(default)]
    pub count_in: bool,
    pub modules: Option<ModuleTable>,
    pub sections: Vec<SectionFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SectionFile {
    pub label: String,
    pub time_signature: Option<TimeSignature>,
    #[serde(default = "default_repeat")]
    pub repeat: u32,
    pub chords: Vec<ChordFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChordFile {
    pub root: String,
    #[serde(default)]
    pub quality: ChordQuality,
    pub beats: u32,
}

fn default_key() -> String {
    "C".to_string()
}

fn default_repeat() -> u32 {
    1
}

/// Pitch class of a note name such as `C`, `F#` or `Bb`.
pub fn pitch_class(name: &str) -> Result<u8> {
    let mut chars = name.trim().chars();
    let base = match chars.next().map(|c| c.to_ascii_uppercase()) {
        Some('C') => 0,
        Some('D') => 2,
        Some('E') => 4,
        Some('F') => 5,
        Some('G') => 7,
        Some('A') => 9,
        Some('B') => 11,
        _ => bail!("invalid note name: {:?}", name),
    };
    let shift: i16 = chars
        .map(|c| match c {
            '#' | '♯' => Ok(1),
            'b' | '♭' => Ok(-1),
            _ => Err(anyhow::anyhow!("invalid accidental in note name: {:?}", name)),
        })
        .sum::<Result<i16>>()?;
    Ok((base + shift).rem_euclid(12) as u8)
}

impl SongFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read song file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("in song file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let song: SongFile = toml::from_str(content)?;
        if song.sections.is_empty() {
            bail!("a song needs at least one section");
        }
        Ok(song)
    }

    /// Resolve note names and build the initial song state.
    pub fn into_song(self) -> Result<(Vec<Section>, SongState)> {
        let key = pitch_class(&self.key)?;
        let sections = self
            .sections
            .into_iter()
            .map(|section| {
                let chords = section
                    .chords
                    .into_iter()
                    .map(|chord| {
                        Ok(ChordEntry {
                            root: pitch_class(&chord.root)?,
                            quality: chord.quality,
                            beats: chord.beats,
                        })
                    })
                    .collect::<Result<Vec<_>>>()
                    .with_context(|| format!("in section {:?}", section.label))?;
                Ok(Section {
                    label: section.label,
                    time_signature: section.time_signature,
                    repeat: section.repeat,
                    chords,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut state = SongState {
            arrangement: Arrangement::layout(
                &sections,
                key,
                self.minor,
                self.time_signature,
                self.grouping.clone(),
            )?,
            ..SongState::default()
        };
        if let Some(modules) = self.modules {
            state.modules = modules;
        }
        if let Some(name) = &self.drum_preset {
            let preset = presets::find(name).with_context(|| format!("unknown drum preset {:?}", name))?;
            state.groove = preset.groove(self.time_signature, self.grouping.as_deref());
        } else {
            state.groove.tracks = presets::grid_pattern(self.time_signature, self.grouping.as_deref());
        }
        if let Some(genre) = self.genre {
            state.groove.genre_feel = genre;
        }
        if let Some(swing) = self.swing {
            state.groove.swing = swing;
        }
        if let Some(subdivision) = self.swing_subdivision {
            state.groove.swing_subdivision = subdivision;
        }
        if let Some(bpm) = self.bpm {
            state.performance.bpm = bpm;
        }
        state.performance.auto_intensity = self.auto_intensity;
        state.performance.count_in = self.count_in;
        state.validate()?;
        Ok((sections, state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SONG: &str = r#"
key = "A"
minor = true
bpm = 96
drum_preset = "funk"

[[sections]]
label = "Verse"
repeat = 2
chords = [
    { root = "A", quality = "min7", beats = 4 },
    { root = "D", quality = "7", beats = 4 },
]

[[sections]]
label = "Bridge"
time_signature = "7/8"
chords = [{ root = "F#", quality = "m7b5", beats = 7 }]
"#;

    #[test]
    fn test_pitch_classes() {
        assert_eq!(pitch_class("C").unwrap(), 0);
        assert_eq!(pitch_class("F#").unwrap(), 6);
        assert_eq!(pitch_class("Bb").unwrap(), 10);
        assert_eq!(pitch_class("Cb").unwrap(), 11);
        assert!(pitch_class("H").is_err());
        assert!(pitch_class("C$").is_err());
    }

    #[test]
    fn test_song_file_lays_out_sections() {
        let (sections, state) = SongFile::parse(SONG).unwrap().into_song().unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(state.arrangement.key, 9);
        assert!(state.arrangement.is_minor);
        // Two passes of 2 x 16 steps, then one 7/8 measure.
        assert_eq!(state.arrangement.total_steps, 64 + 14);
        assert_eq!(state.groove.preset.as_deref(), Some("Funk"));
        assert_eq!(state.performance.bpm, 96.0);
        assert!(!state.performance.auto_intensity);
        assert!(!state.performance.count_in);
    }

    #[test]
    fn test_demo_song_loads() {
        let demo = include_str!("../../../demos/odd_meter.toml");
        let (sections, state) = SongFile::parse(demo).unwrap().into_song().unwrap();
        assert_eq!(sections[1].time_signature, Some(TimeSignature::SEVEN_EIGHT));
        assert!(state.modules.soloist.enabled);
        assert_eq!(state.modules.soloist.style, "bird");
        assert!(state.performance.auto_intensity);
        assert!(state.performance.count_in);
        // Untouched modules keep their own defaults.
        assert_eq!(state.modules.bass.octave, 38);
        // 2 x 64 steps of 4/4, then 14 beats of 7/8.
        assert_eq!(state.arrangement.total_steps, 128 + 28);
    }

    #[test]
    fn test_rejects_bad_songs() {
        assert!(SongFile::parse("key = \"C\"\nsections = []\n").is_err());
        let unknown_preset = SONG.replace("\"funk\"", "\"polka\"");
        assert!(SongFile::parse(&unknown_preset).unwrap().into_song().is_err());
        let bad_meter = SONG.replace("7/8", "9/8");
        assert!(SongFile::parse(&bad_meter).is_err());
    }
}
