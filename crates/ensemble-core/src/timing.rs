//! Timing primitives shared by the transport, the generator and visualizers.
//!
//! - [`TimeSignature`] - Closed catalog of supported meters
//! - [`SwingSubdivision`] - Which note value swing alternates on
//! - [`step_duration`] - Wall-clock length of a single step
//!
//! A *step* is the smallest schedulable unit: a sixteenth note in x/4
//! meters and an eighth note in x/8 meters. Steps are counted from the
//! start of the session and never go backwards.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Global step index. Monotonically increasing for a session.
pub type Step = u64;

/// (numerator, denominator, default grouping in beats).
const CATALOG: &[(u32, u32, &[u32])] = &[
    (2, 4, &[2]),
    (3, 4, &[3]),
    (4, 4, &[2, 2]),
    (5, 4, &[3, 2]),
    (6, 8, &[3, 3]),
    (7, 8, &[2, 2, 3]),
    (7, 4, &[4, 3]),
    (12, 8, &[3, 3, 3, 3]),
];

/// Musical time signature from the fixed catalog.
///
/// Fields are private so every value in circulation is a catalog entry;
/// that keeps [`crate::grid::resolve`] total.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeSignature {
    numerator: u32,
    denominator: u32,
}

impl TimeSignature {
    pub const TWO_FOUR: TimeSignature = TimeSignature::catalog_entry(2, 4);
    pub const THREE_FOUR: TimeSignature = TimeSignature::catalog_entry(3, 4);
    pub const FOUR_FOUR: TimeSignature = TimeSignature::catalog_entry(4, 4);
    pub const FIVE_FOUR: TimeSignature = TimeSignature::catalog_entry(5, 4);
    pub const SIX_EIGHT: TimeSignature = TimeSignature::catalog_entry(6, 8);
    pub const SEVEN_EIGHT: TimeSignature = TimeSignature::catalog_entry(7, 8);
    pub const SEVEN_FOUR: TimeSignature = TimeSignature::catalog_entry(7, 4);
    pub const TWELVE_EIGHT: TimeSignature = TimeSignature::catalog_entry(12, 8);

    const fn catalog_entry(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Every supported time signature, in catalog order.
    pub fn catalog() -> impl Iterator<Item = TimeSignature> {
        CATALOG
            .iter()
            .map(|&(n, d, _)| TimeSignature::catalog_entry(n, d))
    }

    /// Look up a catalog entry by numerator and denominator.
    pub fn new(numerator: u32, denominator: u32) -> Result<Self> {
        CATALOG
            .iter()
            .find(|&&(n, d, _)| n == numerator && d == denominator)
            .map(|&(n, d, _)| TimeSignature::catalog_entry(n, d))
            .ok_or_else(|| Error::UnknownTimeSignature(format!("{numerator}/{denominator}")))
    }

    pub fn numerator(&self) -> u32 {
        self.numerator
    }

    pub fn denominator(&self) -> u32 {
        self.denominator
    }

    /// Number of beats (numerator units) per measure.
    pub fn beats_per_measure(&self) -> u32 {
        self.numerator
    }

    /// Steps per beat: 4 sixteenths for quarter-note meters, 2 for eighth-note meters.
    pub fn steps_per_beat(&self) -> u32 {
        if self.denominator == 8 {
            2
        } else {
            4
        }
    }

    pub fn steps_per_measure(&self) -> u32 {
        self.beats_per_measure() * self.steps_per_beat()
    }

    /// The accent grouping used when no override is set (e.g. 7/8 = 2+2+3).
    pub fn default_grouping(&self) -> &'static [u32] {
        CATALOG
            .iter()
            .find(|&&(n, d, _)| n == self.numerator && d == self.denominator)
            .map(|&(_, _, grouping)| grouping)
            .unwrap_or(&[])
    }

    /// Check that `grouping` is an ordered partition of this meter's beats.
    pub fn validate_grouping(&self, grouping: &[u32]) -> Result<()> {
        let reason = if grouping.is_empty() {
            Some("grouping is empty")
        } else if grouping.contains(&0) {
            Some("groups must be at least one beat")
        } else if grouping.iter().sum::<u32>() != self.beats_per_measure() {
            Some("groups must sum to the beats per measure")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(Error::InvalidGrouping {
                grouping: grouping.to_vec(),
                signature: self.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::FOUR_FOUR
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl FromStr for TimeSignature {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let unknown = || Error::UnknownTimeSignature(s.to_string());
        let (num, den) = s.trim().split_once('/').ok_or_else(unknown)?;
        let num: u32 = num.trim().parse().map_err(|_| unknown())?;
        let den: u32 = den.trim().parse().map_err(|_| unknown())?;
        TimeSignature::new(num, den).map_err(|_| unknown())
    }
}

impl TryFrom<String> for TimeSignature {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TimeSignature> for String {
    fn from(value: TimeSignature) -> Self {
        value.to_string()
    }
}

/// Note value that swing alternates on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwingSubdivision {
    /// Long-short pairs of eighth notes (two steps long, two steps short).
    #[default]
    #[serde(rename = "8th")]
    Eighth,
    /// Long-short pairs of sixteenth notes.
    #[serde(rename = "16th")]
    Sixteenth,
}

/// Length of one sixteenth note in seconds at `bpm`.
pub fn sixteenth_seconds(bpm: f64) -> f64 {
    0.25 * (60.0 / bpm.max(1.0))
}

/// Wall-clock length of `step` in seconds, including swing.
///
/// Swing only applies in sixteenth-based meters; it moves step times,
/// never step indices. `swing` is a percentage in `0..=100`.
pub fn step_duration(
    step: Step,
    bpm: f64,
    swing: f32,
    subdivision: SwingSubdivision,
    signature: TimeSignature,
) -> f64 {
    let sixteenth = sixteenth_seconds(bpm);
    if swing <= 0.0 || signature.steps_per_beat() != 4 {
        return sixteenth;
    }
    let shift = (sixteenth / 3.0) * (f64::from(swing.min(100.0)) / 100.0);
    let long = match subdivision {
        SwingSubdivision::Sixteenth => step % 2 == 0,
        SwingSubdivision::Eighth => step % 4 < 2,
    };
    if long {
        sixteenth + shift
    } else {
        sixteenth - shift
    }
}
