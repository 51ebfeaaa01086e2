//! Drum preset catalog.
//!
//! Patterns are written one character per step (`0` off, `1` hit, `2`
//! accent). A preset may carry per-meter variants; meters it has no
//! variant for get a pattern derived from the meter's beat grouping.

use crate::grid;
use crate::state::{DrumTrack, GrooveSettings};
use crate::timing::{SwingSubdivision, TimeSignature};

/// Kit pieces every preset writes, in grid order.
pub const KIT: [&str; 4] = ["Kick", "Snare", "HiHat", "Open"];

type Pattern = (&'static str, &'static str);

/// A meter-specific variant. Tracks it omits keep the base pattern.
pub struct MeterVariant {
    pub time_signature: TimeSignature,
    pub measures: Option<u32>,
    pub tracks: &'static [Pattern],
}

/// A named drum groove.
pub struct DrumPreset {
    pub name: &'static str,
    pub genre_feel: &'static str,
    pub swing: f32,
    pub subdivision: SwingSubdivision,
    pub measures: u32,
    /// Patterns for 4/4.
    pub tracks: &'static [Pattern],
    pub variants: &'static [MeterVariant],
}

pub static PRESETS: &[DrumPreset] = &[
    DrumPreset {
        name: "Basic Rock",
        genre_feel: "Rock",
        swing: 0.0,
        subdivision: SwingSubdivision::Eighth,
        measures: 1,
        tracks: &[
            ("Kick", "2000000020100000"),
            ("Snare", "0000200000002000"),
            ("HiHat", "2121212121212121"),
            ("Open", "0000000000000000"),
        ],
        variants: &[
            MeterVariant {
                time_signature: TimeSignature::THREE_FOUR,
                measures: None,
                tracks: &[
                    ("Kick", "200000002000"),
                    ("Snare", "000020000000"),
                    ("HiHat", "212121212121"),
                ],
            },
            MeterVariant {
                time_signature: TimeSignature::FIVE_FOUR,
                measures: None,
                tracks: &[
                    ("Kick", "20000000200000000000"),
                    ("Snare", "00000000000020000000"),
                    ("HiHat", "21212121212121212121"),
                ],
            },
            MeterVariant {
                time_signature: TimeSignature::SIX_EIGHT,
                measures: None,
                tracks: &[
                    ("Kick", "200000200000"),
                    ("Snare", "000000200000"),
                    ("HiHat", "212121212121"),
                ],
            },
            MeterVariant {
                time_signature: TimeSignature::SEVEN_EIGHT,
                measures: None,
                tracks: &[
                    ("Kick", "20000000200000"),
                    ("Snare", "00002000000000"),
                    ("HiHat", "21212121212121"),
                ],
            },
            MeterVariant {
                time_signature: TimeSignature::SEVEN_FOUR,
                measures: None,
                tracks: &[
                    ("Kick", "2000000020000000200000000000"),
                    ("Snare", "0000200000002000000020000000"),
                    ("HiHat", "2121212121212121212121212121"),
                ],
            },
            MeterVariant {
                time_signature: TimeSignature::TWELVE_EIGHT,
                measures: None,
                tracks: &[
                    ("Kick", "200000000000200000000000"),
                    ("Snare", "000000200000000000200000"),
                    ("HiHat", "212121212121212121212121"),
                ],
            },
        ],
    },
    DrumPreset {
        name: "Jazz",
        genre_feel: "Jazz",
        swing: 60.0,
        subdivision: SwingSubdivision::Eighth,
        measures: 2,
        tracks: &[
            ("Kick", "10001000100010001000100010001000"),
            ("Snare", "00000000000000000000000001001000"),
            ("HiHat", "00002000000020000000200000002000"),
            ("Open", "20001020200010202000102020101020"),
        ],
        variants: &[
            MeterVariant {
                time_signature: TimeSignature::THREE_FOUR,
                measures: Some(1),
                tracks: &[
                    ("Kick", "100000000000"),
                    ("Snare", "000000000000"),
                    ("HiHat", "000020002000"),
                    ("Open", "200010201020"),
                ],
            },
            MeterVariant {
                time_signature: TimeSignature::FIVE_FOUR,
                measures: Some(1),
                tracks: &[
                    ("Kick", "20000000000000000000"),
                    ("Snare", "00000000000000000000"),
                    ("HiHat", "00002000200020002000"),
                    ("Open", "20001020102010201020"),
                ],
            },
            MeterVariant {
                time_signature: TimeSignature::SIX_EIGHT,
                measures: Some(1),
                tracks: &[
                    ("Kick", "100000000000"),
                    ("Snare", "000000000000"),
                    ("HiHat", "000020000020"),
                    ("Open", "200010200010"),
                ],
            },
            MeterVariant {
                time_signature: TimeSignature::SEVEN_FOUR,
                measures: Some(1),
                tracks: &[
                    ("Kick", "1000000000000000000000000000"),
                    ("Snare", "0000000000000000000000000000"),
                    ("HiHat", "0000200020002000200020002000"),
                    ("Open", "2000102010201020102010201020"),
                ],
            },
        ],
    },
    DrumPreset {
        name: "Funk",
        genre_feel: "Funk",
        swing: 15.0,
        subdivision: SwingSubdivision::Sixteenth,
        measures: 2,
        tracks: &[
            ("Kick", "20010020010000102001002001001020"),
            ("Snare", "00002000000020000000200001012000"),
            ("HiHat", "21212121212121212121212121212121"),
            ("Open", "00000000000000000000000000000000"),
        ],
        variants: &[
            MeterVariant {
                time_signature: TimeSignature::THREE_FOUR,
                measures: None,
                tracks: &[
                    ("Kick", "200100200010200100201020"),
                    ("Snare", "000020002000000020002000"),
                    ("HiHat", "212121212121212121212121"),
                ],
            },
            MeterVariant {
                time_signature: TimeSignature::SEVEN_FOUR,
                measures: Some(1),
                tracks: &[
                    ("Kick", "2001002001000010200000000000"),
                    ("Snare", "0000200000002000000020000000"),
                    ("HiHat", "2121212121212121212121212121"),
                ],
            },
        ],
    },
    DrumPreset {
        name: "Bossa Nova",
        genre_feel: "Bossa Nova",
        swing: 0.0,
        subdivision: SwingSubdivision::Sixteenth,
        measures: 2,
        tracks: &[
            ("Kick", "20000020200000202000002020000020"),
            ("Snare", "20000020000020000000200000200000"),
            ("HiHat", "11111111111111111111111111111111"),
            ("Open", "00000000000000000000000000000000"),
        ],
        variants: &[
            MeterVariant {
                time_signature: TimeSignature::FIVE_FOUR,
                measures: Some(1),
                tracks: &[
                    ("Kick", "20000020200000202000"),
                    ("Snare", "20020020002002002002"),
                ],
            },
            MeterVariant {
                time_signature: TimeSignature::SEVEN_EIGHT,
                measures: Some(1),
                tracks: &[("Kick", "20000020200000"), ("Snare", "20020020002000")],
            },
        ],
    },
    DrumPreset {
        name: "Neo-Soul",
        genre_feel: "Neo-Soul",
        swing: 45.0,
        subdivision: SwingSubdivision::Sixteenth,
        measures: 2,
        tracks: &[
            ("Kick", "20000001002000002000010000200010"),
            ("Snare", "00002000000020000000200000002000"),
            ("HiHat", "11111111111111111111111111111111"),
            ("Open", "00000000000000200000000000000020"),
        ],
        variants: &[MeterVariant {
            time_signature: TimeSignature::THREE_FOUR,
            measures: None,
            tracks: &[
                ("Kick", "200000010020200001000010"),
                ("Snare", "000020000000000020000000"),
                ("HiHat", "111111111111111111111111"),
            ],
        }],
    },
];

/// Look up a preset by name, ignoring case.
pub fn find(name: &str) -> Option<&'static DrumPreset> {
    PRESETS.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

fn parse_steps(pattern: &str) -> Vec<u8> {
    pattern
        .bytes()
        .map(|b| match b {
            b'1' => 1,
            b'2' => 2,
            _ => 0,
        })
        .collect()
}

/// Stretch or cut `steps` to exactly `len`, repeating short patterns.
fn fit(steps: Vec<u8>, len: usize) -> Vec<u8> {
    if steps.is_empty() {
        return vec![0; len];
    }
    steps.iter().copied().cycle().take(len).collect()
}

/// One measure derived from the meter's grouping: kick on group starts,
/// snare on the last beat of each multi-beat group, hats on beats and
/// eighths.
pub fn grid_pattern(signature: TimeSignature, grouping: Option<&[u32]>) -> Vec<DrumTrack> {
    let spm = signature.steps_per_measure();
    let spb = signature.steps_per_beat();
    let groups = grid::effective_grouping(signature, grouping);

    let mut backbeats = Vec::new();
    let mut beat = 0;
    for &beats in groups {
        if beats >= 2 {
            backbeats.push(beat + beats - 1);
        }
        beat += beats;
    }

    let mut kick = Vec::with_capacity(spm as usize);
    let mut snare = Vec::with_capacity(spm as usize);
    let mut hat = Vec::with_capacity(spm as usize);
    for step in 0..spm {
        let info = grid::resolve_measure_step(step, signature, grouping);
        kick.push(if info.is_measure_start {
            2
        } else if info.is_group_start {
            1
        } else {
            0
        });
        snare.push(if info.is_beat_start && backbeats.contains(&info.beat_index) {
            2
        } else {
            0
        });
        hat.push(if info.is_beat_start {
            2
        } else if spb == 4 && step % 2 == 0 {
            1
        } else {
            0
        });
    }

    vec![
        DrumTrack {
            name: "Kick".to_string(),
            steps: kick,
            muted: false,
        },
        DrumTrack {
            name: "Snare".to_string(),
            steps: snare,
            muted: false,
        },
        DrumTrack {
            name: "HiHat".to_string(),
            steps: hat,
            muted: false,
        },
        DrumTrack {
            name: "Open".to_string(),
            steps: vec![0; spm as usize],
            muted: false,
        },
    ]
}

impl DrumPreset {
    /// Groove settings for this preset in `signature`.
    pub fn groove(&self, signature: TimeSignature, grouping: Option<&[u32]>) -> GrooveSettings {
        let spm = signature.steps_per_measure() as usize;
        let variant = self.variants.iter().find(|v| v.time_signature == signature);

        let (measures, tracks) = match variant {
            Some(variant) => {
                let measures = variant.measures.unwrap_or(self.measures).max(1);
                let tracks = KIT
                    .iter()
                    .map(|&name| {
                        let pattern = variant
                            .tracks
                            .iter()
                            .chain(self.tracks.iter())
                            .find(|(n, _)| *n == name)
                            .map(|(_, p)| parse_steps(p))
                            .unwrap_or_default();
                        DrumTrack {
                            name: name.to_string(),
                            steps: fit(pattern, spm * measures as usize),
                            muted: false,
                        }
                    })
                    .collect();
                (measures, tracks)
            }
            None if signature == TimeSignature::FOUR_FOUR => {
                let tracks = KIT
                    .iter()
                    .map(|&name| DrumTrack {
                        name: name.to_string(),
                        steps: fit(
                            self.tracks
                                .iter()
                                .find(|(n, _)| *n == name)
                                .map(|(_, p)| parse_steps(p))
                                .unwrap_or_default(),
                            spm * self.measures as usize,
                        ),
                        muted: false,
                    })
                    .collect();
                (self.measures.max(1), tracks)
            }
            None => {
                log::debug!(
                    "[PRESET] '{}' has no {} variant, deriving from the grid",
                    self.name,
                    signature
                );
                (1, grid_pattern(signature, grouping))
            }
        };

        GrooveSettings {
            genre_feel: self.genre_feel.to_string(),
            preset: Some(self.name.to_string()),
            measures,
            swing: self.swing,
            swing_subdivision: self.subdivision,
            tracks,
        }
    }
}
