//! Song state model.
//!
//! [`SongState`] is the single source of truth for everything the
//! generator needs. It is owned by the [`super::StateManager`]; the
//! generator only ever sees cloned projections of it.

use crate::error::{Error, Result};
use crate::measure_map::{MeasureMap, SectionLayout};
use crate::timing::{Step, SwingSubdivision, TimeSignature};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the five accompaniment instruments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Module {
    Chords,
    Bass,
    Soloist,
    Harmony,
    Drums,
}

impl Module {
    pub const ALL: [Module; 5] = [
        Module::Chords,
        Module::Bass,
        Module::Soloist,
        Module::Harmony,
        Module::Drums,
    ];

    /// Dense index for per-module arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Module::Chords => "chords",
            Module::Bass => "bass",
            Module::Soloist => "soloist",
            Module::Harmony => "harmony",
            Module::Drums => "drums",
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Chord quality. Chord symbols are resolved upstream; this only carries
/// the interval set the generator voices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChordQuality {
    #[default]
    Major,
    Minor,
    #[serde(rename = "7")]
    Dominant7,
    Maj7,
    Min7,
    #[serde(rename = "m7b5")]
    HalfDiminished,
    Dim,
    Sus4,
}

impl ChordQuality {
    /// Semitone offsets from the root, ascending.
    pub fn intervals(self) -> &'static [u8] {
        match self {
            ChordQuality::Major => &[0, 4, 7],
            ChordQuality::Minor => &[0, 3, 7],
            ChordQuality::Dominant7 => &[0, 4, 7, 10],
            ChordQuality::Maj7 => &[0, 4, 7, 11],
            ChordQuality::Min7 => &[0, 3, 7, 10],
            ChordQuality::HalfDiminished => &[0, 3, 6, 10],
            ChordQuality::Dim => &[0, 3, 6, 9],
            ChordQuality::Sus4 => &[0, 5, 7],
        }
    }

    pub fn is_minor(self) -> bool {
        matches!(
            self,
            ChordQuality::Minor
                | ChordQuality::Min7
                | ChordQuality::HalfDiminished
                | ChordQuality::Dim
        )
    }
}

/// A chord as the arrangement collaborator hands it over.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChordEntry {
    /// Pitch class of the root, 0 = C.
    pub root: u8,
    #[serde(default)]
    pub quality: ChordQuality,
    /// Length in beats of the section's meter.
    pub beats: u32,
}

/// An arrangement section before layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub label: String,
    /// Local meter; `None` uses the song's.
    #[serde(default)]
    pub time_signature: Option<TimeSignature>,
    #[serde(default = "default_repeat")]
    pub repeat: u32,
    pub chords: Vec<ChordEntry>,
}

fn default_repeat() -> u32 {
    1
}

/// A laid-out chord: the step map entry for one chord occurrence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChordSpan {
    pub root: u8,
    pub quality: ChordQuality,
    pub start_step: Step,
    pub end_step: Step,
    pub section_index: usize,
}

impl ChordSpan {
    pub fn len(&self) -> Step {
        self.end_step - self.start_step
    }

    pub fn is_empty(&self) -> bool {
        self.end_step <= self.start_step
    }
}

/// The section map entry for one section (all repeats included).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SectionSpan {
    pub label: String,
    pub start_step: Step,
    pub end_step: Step,
    pub time_signature: TimeSignature,
}

/// Result of [`Arrangement::chord_at`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChordPosition<'a> {
    pub chord: &'a ChordSpan,
    pub index: usize,
    /// Offset of the (wrapped) step from the chord start.
    pub step_in_chord: Step,
    /// The step reduced modulo the arrangement length.
    pub song_step: Step,
}

/// The laid-out arrangement: step map, section map and measure map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Arrangement {
    pub progression: Vec<ChordSpan>,
    pub sections: Vec<SectionSpan>,
    pub measure_map: MeasureMap,
    pub total_steps: Step,
    /// Tonic pitch class, 0 = C.
    pub key: u8,
    pub is_minor: bool,
    pub time_signature: TimeSignature,
    /// Accent grouping override for the global meter.
    pub grouping: Option<Vec<u32>>,
}

impl Default for Arrangement {
    fn default() -> Self {
        Self {
            progression: Vec::new(),
            sections: Vec::new(),
            measure_map: MeasureMap::default(),
            total_steps: 0,
            key: 0,
            is_minor: false,
            time_signature: TimeSignature::default(),
            grouping: None,
        }
    }
}

impl Arrangement {
    /// Lay out `sections` into step, section and measure maps.
    pub fn layout(
        sections: &[Section],
        key: u8,
        is_minor: bool,
        time_signature: TimeSignature,
        grouping: Option<Vec<u32>>,
    ) -> Result<Self> {
        if let Some(g) = &grouping {
            time_signature.validate_grouping(g)?;
        }

        let mut progression = Vec::new();
        let mut spans = Vec::new();
        let mut layouts = Vec::new();
        let mut cursor: Step = 0;

        for (section_index, section) in sections.iter().enumerate() {
            let signature = section.time_signature.unwrap_or(time_signature);
            let steps_per_beat = Step::from(signature.steps_per_beat());
            let iteration_steps: Step = section
                .chords
                .iter()
                .map(|c| Step::from(c.beats) * steps_per_beat)
                .sum();
            let repeat = section.repeat.max(1);
            let section_start = cursor;

            for _ in 0..repeat {
                for chord in &section.chords {
                    let len = Step::from(chord.beats) * steps_per_beat;
                    if len == 0 {
                        continue;
                    }
                    progression.push(ChordSpan {
                        root: chord.root % 12,
                        quality: chord.quality,
                        start_step: cursor,
                        end_step: cursor + len,
                        section_index,
                    });
                    cursor += len;
                }
            }

            spans.push(SectionSpan {
                label: section.label.clone(),
                start_step: section_start,
                end_step: cursor,
                time_signature: signature,
            });
            layouts.push(SectionLayout {
                time_signature: Some(signature),
                iteration_steps,
                repeat,
            });
        }

        Ok(Self {
            progression,
            sections: spans,
            measure_map: MeasureMap::build(&layouts, time_signature),
            total_steps: cursor,
            key: key % 12,
            is_minor,
            time_signature,
            grouping,
        })
    }

    /// The chord sounding at `step`, wrapping modulo the arrangement length.
    pub fn chord_at(&self, step: Step) -> Option<ChordPosition<'_>> {
        if self.total_steps == 0 || self.progression.is_empty() {
            return None;
        }
        let song_step = step % self.total_steps;
        let index = self
            .progression
            .partition_point(|c| c.end_step <= song_step);
        let chord = self.progression.get(index)?;
        if song_step < chord.start_step {
            return None;
        }
        Some(ChordPosition {
            chord,
            index,
            step_in_chord: song_step - chord.start_step,
            song_step,
        })
    }

    /// Section containing `step`, wrapping like [`Arrangement::chord_at`].
    pub fn section_at(&self, step: Step) -> Option<&SectionSpan> {
        if self.total_steps == 0 {
            return None;
        }
        let song_step = step % self.total_steps;
        let index = self.sections.partition_point(|s| s.end_step <= song_step);
        self.sections.get(index)
    }

    /// Grouping override that applies at `step`, if its meter matches the
    /// global one.
    pub fn grouping_at(&self, step: Step) -> Option<&[u32]> {
        let signature = self.measure_map.time_signature_at(self.wrap(step));
        match &self.grouping {
            Some(g) if signature == self.time_signature => Some(g.as_slice()),
            _ => None,
        }
    }

    /// Reduce a session step to a position inside the arrangement.
    pub fn wrap(&self, step: Step) -> Step {
        if self.total_steps == 0 {
            step
        } else {
            step % self.total_steps
        }
    }
}

/// Per-instrument controls.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleSettings {
    pub enabled: bool,
    /// Output gain in `0.0..=1.0`.
    pub volume: f32,
    /// Base MIDI note of the instrument's register.
    pub octave: u8,
    pub style: String,
    /// How busy the part is, `0.0..=1.0`.
    pub density: f32,
    /// Soloist only: allow two notes per step.
    pub double_stops: bool,
}

impl Default for ModuleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            volume: 0.5,
            octave: 60,
            style: String::new(),
            density: 0.5,
            double_stops: false,
        }
    }
}

impl ModuleSettings {
    fn with(style: &str, octave: u8, volume: f32, enabled: bool) -> Self {
        Self {
            enabled,
            volume,
            octave,
            style: style.to_string(),
            ..Self::default()
        }
    }
}

/// Settings for every module, addressable by [`Module`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleTable {
    pub chords: ModuleSettings,
    pub bass: ModuleSettings,
    pub soloist: ModuleSettings,
    pub harmony: ModuleSettings,
    pub drums: ModuleSettings,
}

impl Default for ModuleTable {
    fn default() -> Self {
        Self {
            chords: ModuleSettings::with("pad", 65, 0.5, true),
            bass: ModuleSettings::with("quarter", 38, 0.45, true),
            soloist: ModuleSettings::with("scalar", 72, 0.5, false),
            harmony: ModuleSettings::with("pad", 60, 0.4, false),
            drums: ModuleSettings::with("kit", 36, 0.5, true),
        }
    }
}

impl ModuleTable {
    pub fn get(&self, module: Module) -> &ModuleSettings {
        match module {
            Module::Chords => &self.chords,
            Module::Bass => &self.bass,
            Module::Soloist => &self.soloist,
            Module::Harmony => &self.harmony,
            Module::Drums => &self.drums,
        }
    }

    pub fn get_mut(&mut self, module: Module) -> &mut ModuleSettings {
        match module {
            Module::Chords => &mut self.chords,
            Module::Bass => &mut self.bass,
            Module::Soloist => &mut self.soloist,
            Module::Harmony => &mut self.harmony,
            Module::Drums => &mut self.drums,
        }
    }
}

/// One row of the drum grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DrumTrack {
    pub name: String,
    /// 0 = off, 1 = normal hit, 2 = accent. Covers `measures` measures.
    pub steps: Vec<u8>,
    #[serde(default)]
    pub muted: bool,
}

/// Drum pattern and feel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrooveSettings {
    pub genre_feel: String,
    /// Name of the drum preset the tracks came from, if any.
    pub preset: Option<String>,
    pub measures: u32,
    /// Swing amount in percent.
    pub swing: f32,
    pub swing_subdivision: SwingSubdivision,
    pub tracks: Vec<DrumTrack>,
}

impl Default for GrooveSettings {
    fn default() -> Self {
        Self {
            genre_feel: "Rock".to_string(),
            preset: None,
            measures: 1,
            swing: 0.0,
            swing_subdivision: SwingSubdivision::Eighth,
            tracks: Vec::new(),
        }
    }
}

/// Transport and conductor controls.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceSettings {
    pub bpm: f64,
    pub band_intensity: f32,
    pub complexity: f32,
    pub auto_intensity: bool,
    /// Length of a practice session in steps; 0 means unbounded.
    pub session_steps: Step,
    /// Click one measure of beats before the first step.
    pub count_in: bool,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            bpm: 100.0,
            band_intensity: 0.5,
            complexity: 0.3,
            auto_intensity: false,
            session_steps: 0,
            count_in: false,
        }
    }
}

/// Complete, versioned song state.
///
/// Deserializing a partial document fills absent fields with defaults,
/// so a truncated full snapshot degrades instead of failing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SongState {
    /// Bumped on every applied edit.
    pub version: u64,
    pub arrangement: Arrangement,
    pub modules: ModuleTable,
    pub groove: GrooveSettings,
    pub performance: PerformanceSettings,
}

impl SongState {
    pub fn bump_version(&mut self) {
        self.version += 1;
    }

    /// First step of the closing cadence, when the session has a length.
    pub fn coda_start(&self) -> Option<Step> {
        let steps = self.performance.session_steps;
        (steps > 0).then_some(steps)
    }

    /// Steps the closing cadence needs: dominant, pickup, then the tonic
    /// two beats in.
    pub fn coda_steps(&self) -> Step {
        let Some(start) = self.coda_start() else {
            return 0;
        };
        let arrangement = &self.arrangement;
        let signature = arrangement
            .measure_map
            .lookup(arrangement.wrap(start))
            .segment
            .time_signature;
        2 * Step::from(signature.steps_per_beat()) + 1
    }

    /// Check the invariants the generator relies on.
    pub fn validate(&self) -> Result<()> {
        let bpm = self.performance.bpm;
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(Error::InvalidSnapshot(format!("bpm must be positive, got {bpm}")));
        }
        let swing = self.groove.swing;
        if !(0.0..=100.0).contains(&swing) {
            return Err(Error::InvalidSnapshot(format!("swing {swing} outside 0..=100")));
        }
        for module in Module::ALL {
            let settings = self.modules.get(module);
            if !(0.0..=1.0).contains(&settings.volume) {
                return Err(Error::InvalidSnapshot(format!(
                    "{module} volume {} outside 0..=1",
                    settings.volume
                )));
            }
        }
        let arrangement = &self.arrangement;
        if let Some(g) = &arrangement.grouping {
            arrangement
                .time_signature
                .validate_grouping(g)
                .map_err(|e| Error::InvalidSnapshot(e.to_string()))?;
        }
        // Re-validate the measure map; it may have crossed a serialization boundary.
        MeasureMap::from_segments(
            arrangement.measure_map.segments().to_vec(),
            arrangement.measure_map.fallback(),
        )
        .map_err(|e| Error::InvalidSnapshot(e.to_string()))?;
        let progression_end = arrangement.progression.last().map_or(0, |c| c.end_step);
        if progression_end != arrangement.total_steps {
            return Err(Error::InvalidSnapshot(format!(
                "progression ends at {progression_end} but total_steps is {}",
                arrangement.total_steps
            )));
        }
        if arrangement
            .progression
            .windows(2)
            .any(|w| w[0].end_step != w[1].start_step)
        {
            return Err(Error::InvalidSnapshot(
                "progression is not contiguous".to_string(),
            ));
        }
        if self.groove.measures == 0 {
            return Err(Error::InvalidSnapshot(
                "drum pattern must span at least one measure".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chord(root: u8, quality: ChordQuality, beats: u32) -> ChordEntry {
        ChordEntry {
            root,
            quality,
            beats,
        }
    }

    fn two_section_song() -> Arrangement {
        let sections = vec![
            Section {
                label: "A".to_string(),
                time_signature: None,
                repeat: 2,
                chords: vec![
                    chord(2, ChordQuality::Min7, 4),
                    chord(7, ChordQuality::Dominant7, 4),
                ],
            },
            Section {
                label: "B".to_string(),
                time_signature: Some(TimeSignature::SEVEN_EIGHT),
                repeat: 1,
                chords: vec![chord(0, ChordQuality::Maj7, 7)],
            },
        ];
        Arrangement::layout(&sections, 0, false, TimeSignature::FOUR_FOUR, None).unwrap()
    }

    #[test]
    fn test_layout_builds_step_and_section_maps() {
        let arr = two_section_song();
        // Two repeats of two 4/4 bars, then one 7/8 bar.
        assert_eq!(arr.total_steps, 64 + 14);
        assert_eq!(arr.progression.len(), 5);
        assert_eq!(arr.sections[0].end_step, 64);
        assert_eq!(arr.sections[1].start_step, 64);
        assert_eq!(arr.sections[1].time_signature, TimeSignature::SEVEN_EIGHT);
        assert_eq!(arr.measure_map.end_step(), arr.total_steps);
        assert_eq!(arr.measure_map.segments().len(), 5);
    }

    #[test]
    fn test_chord_at_wraps() {
        let arr = two_section_song();
        let pos = arr.chord_at(20).unwrap();
        assert_eq!(pos.index, 1);
        assert_eq!(pos.step_in_chord, 4);
        assert_eq!(pos.chord.root, 7);

        let wrapped = arr.chord_at(arr.total_steps + 20).unwrap();
        assert_eq!(wrapped.index, 1);
        assert_eq!(wrapped.song_step, 20);

        let last = arr.chord_at(70).unwrap();
        assert_eq!(last.chord.quality, ChordQuality::Maj7);
        assert_eq!(arr.section_at(70).unwrap().label, "B");
    }

    #[test]
    fn test_empty_arrangement_has_no_chords() {
        let arr = Arrangement::default();
        assert!(arr.chord_at(5).is_none());
        assert!(arr.section_at(5).is_none());
    }

    #[test]
    fn test_grouping_only_applies_to_global_meter() {
        let sections = vec![
            Section {
                label: "A".to_string(),
                time_signature: None,
                repeat: 1,
                chords: vec![chord(0, ChordQuality::Major, 7)],
            },
            Section {
                label: "B".to_string(),
                time_signature: Some(TimeSignature::FOUR_FOUR),
                repeat: 1,
                chords: vec![chord(5, ChordQuality::Major, 4)],
            },
        ];
        let arr = Arrangement::layout(
            &sections,
            0,
            false,
            TimeSignature::SEVEN_EIGHT,
            Some(vec![3, 2, 2]),
        )
        .unwrap();
        assert_eq!(arr.grouping_at(0), Some(&[3, 2, 2][..]));
        assert_eq!(arr.grouping_at(14), None);
    }

    #[test]
    fn test_layout_rejects_bad_grouping() {
        let result = Arrangement::layout(&[], 0, false, TimeSignature::SEVEN_EIGHT, Some(vec![4, 4]));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate() {
        let mut state = SongState {
            arrangement: two_section_song(),
            ..SongState::default()
        };
        assert!(state.validate().is_ok());

        state.performance.bpm = 0.0;
        assert!(matches!(state.validate(), Err(Error::InvalidSnapshot(_))));

        state.performance.bpm = 120.0;
        state.modules.bass.volume = 1.5;
        assert!(state.validate().is_err());

        state.modules.bass.volume = 0.5;
        state.groove.swing = f32::NAN;
        assert!(state.validate().is_err());

        state.groove.swing = 0.0;
        state.arrangement.total_steps += 1;
        assert!(state.validate().is_err());
    }

    #[test]
    fn test_coda_follows_the_meter_at_the_end() {
        let mut state = SongState {
            arrangement: two_section_song(),
            ..SongState::default()
        };
        assert_eq!(state.coda_start(), None);
        assert_eq!(state.coda_steps(), 0);

        state.performance.session_steps = 16;
        assert_eq!(state.coda_start(), Some(16));
        assert_eq!(state.coda_steps(), 9);

        // Ending going into the 7/8 section counts eighth-note beats.
        state.performance.session_steps = 64;
        assert_eq!(state.coda_steps(), 5);

        // A whole pass wraps back to the 4/4 top.
        state.performance.session_steps = 78;
        assert_eq!(state.coda_steps(), 9);
    }

    #[test]
    fn test_partial_snapshot_uses_defaults() {
        let state: SongState =
            serde_json::from_str(r#"{"performance": {"bpm": 90.0}, "modules": {"bass": {"volume": 0.9}}}"#)
                .unwrap();
        assert_eq!(state.performance.bpm, 90.0);
        assert_eq!(state.performance.complexity, PerformanceSettings::default().complexity);
        assert_eq!(state.modules.bass.volume, 0.9);
        assert!(state.modules.bass.enabled);
        assert_eq!(state.modules.chords, ModuleTable::default().chords);
    }
}
