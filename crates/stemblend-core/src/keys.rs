//! Key and BPM arithmetic used for matching two tracks.
//!
//! Keys are identified by the pitch class of their tonic (C = 0 .. B = 11)
//! plus a major/minor quality. The canonical table holds one spelling per
//! pitch class and quality; a couple of enharmonic aliases are accepted when
//! parsing but never produced.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::adjust::{
    MAX_PITCH_SEMITONES, MAX_TEMPO_PERCENT, MIN_PITCH_SEMITONES, MIN_TEMPO_PERCENT,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Major,
    Minor,
}

const MAJOR_NAMES: [&str; 12] = [
    "C", "Db", "D", "Eb", "E", "F", "F#", "G", "Ab", "A", "Bb", "B",
];
const MINOR_NAMES: [&str; 12] = [
    "C", "C#", "D", "Eb", "E", "F", "F#", "G", "G#", "A", "Bb", "B",
];
const MAJOR_ALIASES: [(&str, u8); 2] = [("C#", 1), ("G#", 8)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key {
    pitch_class: u8,
    quality: Quality,
}

impl Key {
    #[must_use]
    pub fn new(pitch_class: u8, quality: Quality) -> Self {
        Self {
            pitch_class: pitch_class % 12,
            quality,
        }
    }

    #[must_use]
    pub const fn pitch_class(&self) -> u8 {
        self.pitch_class
    }

    #[must_use]
    pub const fn quality(&self) -> Quality {
        self.quality
    }

    #[must_use]
    pub fn transposed(self, semitones: i32) -> Self {
        let shifted = (i32::from(self.pitch_class) + semitones).rem_euclid(12);
        Self::new(u8::try_from(shifted).unwrap_or(0), self.quality)
    }

    /// Every canonical key, majors first.
    pub fn all() -> impl Iterator<Item = Self> {
        [Quality::Major, Quality::Minor]
            .into_iter()
            .flat_map(|quality| (0..12).map(move |pitch_class| Self::new(pitch_class, quality)))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let index = usize::from(self.pitch_class);
        match self.quality {
            Quality::Major => write!(f, "{} major", MAJOR_NAMES[index]),
            Quality::Minor => write!(f, "{} minor", MINOR_NAMES[index]),
        }
    }
}

impl FromStr for Key {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut parts = value.split_whitespace();
        let (Some(tonic), Some(quality), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(format!("unrecognised key name: {value}"));
        };

        let (names, quality) = match quality.to_ascii_lowercase().as_str() {
            "major" => (&MAJOR_NAMES, Quality::Major),
            "minor" => (&MINOR_NAMES, Quality::Minor),
            _ => return Err(format!("unrecognised key quality: {value}")),
        };

        if let Some(index) = names.iter().position(|name| *name == tonic) {
            return Ok(Self::new(u8::try_from(index).unwrap_or(0), quality));
        }
        if quality == Quality::Major {
            if let Some((_, pitch_class)) = MAJOR_ALIASES.iter().find(|(name, _)| *name == tonic) {
                return Ok(Self::new(*pitch_class, quality));
            }
        }
        Err(format!("unrecognised key name: {value}"))
    }
}

/// Which track is bent towards the other.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchDirection {
    #[default]
    None,
    #[serde(rename = "1to2")]
    OneToTwo,
    #[serde(rename = "2to1")]
    TwoToOne,
}

impl MatchDirection {
    #[must_use]
    pub const fn inverted(self) -> Self {
        match self {
            Self::None => Self::None,
            Self::OneToTwo => Self::TwoToOne,
            Self::TwoToOne => Self::OneToTwo,
        }
    }
}

/// Shortest signed semitone distance from `from` to `to`, in `[-6, 6]`.
///
/// Unknown key names yield 0 so a bad metadata value degrades to a no-op.
#[must_use]
pub fn key_distance(from: &str, to: &str) -> i32 {
    match (from.parse::<Key>(), to.parse::<Key>()) {
        (Ok(from), Ok(to)) => pitch_class_distance(from.pitch_class, to.pitch_class),
        _ => 0,
    }
}

fn pitch_class_distance(from: u8, to: u8) -> i32 {
    let diff = (i32::from(to) - i32::from(from)).rem_euclid(12);
    if diff > 6 { diff - 12 } else { diff }
}

#[must_use]
pub fn effective_bpm(original_bpm: f64, tempo_percent: f64) -> f64 {
    original_bpm * (1.0 + tempo_percent / 100.0)
}

/// The key a track sounds in after shifting it by `pitch_semitones`.
///
/// Quality is preserved; unknown names are returned unchanged.
#[must_use]
pub fn effective_key(original: &str, pitch_semitones: i32) -> String {
    match original.parse::<Key>() {
        Ok(key) if pitch_semitones != 0 => key.transposed(pitch_semitones).to_string(),
        _ => original.to_string(),
    }
}

/// Tempo percentage that brings `source_bpm` onto `target_bpm`.
#[must_use]
pub fn match_bpm(target_bpm: f64, source_bpm: f64) -> f64 {
    if source_bpm <= 0.0 || !source_bpm.is_finite() || !target_bpm.is_finite() {
        return 0.0;
    }
    ((target_bpm / source_bpm - 1.0) * 100.0).clamp(MIN_TEMPO_PERCENT, MAX_TEMPO_PERCENT)
}

/// Pitch shift that moves `source_key` onto `target_key`.
#[must_use]
pub fn match_key(target_key: &str, source_key: &str) -> i32 {
    key_distance(source_key, target_key).clamp(MIN_PITCH_SEMITONES, MAX_PITCH_SEMITONES)
}
