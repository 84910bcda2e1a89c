use std::{fmt, str::FromStr};

use serde::Serialize;

pub const MIN_PITCH_SEMITONES: i32 = -12;
pub const MAX_PITCH_SEMITONES: i32 = 12;
pub const MIN_TEMPO_PERCENT: f64 = -50.0;
pub const MAX_TEMPO_PERCENT: f64 = 100.0;
pub const MIN_VOLUME_PERCENT: f64 = 0.0;
pub const MAX_VOLUME_PERCENT: f64 = 200.0;
pub const DEFAULT_VOLUME_PERCENT: f64 = 100.0;

/// One of the two track positions in a blend session.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackSlot {
    One,
    Two,
}

impl TrackSlot {
    pub const BOTH: [Self; 2] = [Self::One, Self::Two];

    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::One => Self::Two,
            Self::Two => Self::One,
        }
    }

    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::One => 0,
            Self::Two => 1,
        }
    }
}

impl fmt::Display for TrackSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

impl FromStr for TrackSlot {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "1" => Ok(Self::One),
            "2" => Ok(Self::Two),
            other => Err(format!("invalid track: {other} (use 1 or 2)")),
        }
    }
}

/// One track or both, as accepted by `beat-detect` and `segment-trim`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSelection {
    Single(TrackSlot),
    Both,
}

impl TrackSelection {
    #[must_use]
    pub fn slots(self) -> Vec<TrackSlot> {
        match self {
            Self::Single(slot) => vec![slot],
            Self::Both => TrackSlot::BOTH.to_vec(),
        }
    }
}

impl FromStr for TrackSelection {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "both" | "all" => Ok(Self::Both),
            other => other
                .parse::<TrackSlot>()
                .map(Self::Single)
                .map_err(|_| format!("invalid target: {other} (use 1, 2, or both)")),
        }
    }
}

/// Pitch, tempo, volume and window state for a single track.
///
/// Fields are private so every mutation goes through a clamping setter; an
/// out-of-range value can never be observed.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct TrackAdjustment {
    pitch_semitones: i32,
    tempo_percent: f64,
    volume_percent: f64,
    window_offset_seconds: f64,
}

impl Default for TrackAdjustment {
    fn default() -> Self {
        Self {
            pitch_semitones: 0,
            tempo_percent: 0.0,
            volume_percent: DEFAULT_VOLUME_PERCENT,
            window_offset_seconds: 0.0,
        }
    }
}

impl TrackAdjustment {
    #[must_use]
    pub const fn pitch_semitones(&self) -> i32 {
        self.pitch_semitones
    }

    #[must_use]
    pub const fn tempo_percent(&self) -> f64 {
        self.tempo_percent
    }

    #[must_use]
    pub const fn volume_percent(&self) -> f64 {
        self.volume_percent
    }

    #[must_use]
    pub const fn window_offset_seconds(&self) -> f64 {
        self.window_offset_seconds
    }

    pub fn set_pitch(&mut self, semitones: i32) -> i32 {
        self.pitch_semitones = semitones.clamp(MIN_PITCH_SEMITONES, MAX_PITCH_SEMITONES);
        self.pitch_semitones
    }

    pub fn set_tempo(&mut self, percent: f64) -> f64 {
        self.tempo_percent = clamp_finite(percent, MIN_TEMPO_PERCENT, MAX_TEMPO_PERCENT, 0.0);
        self.tempo_percent
    }

    pub fn set_volume(&mut self, percent: f64) -> f64 {
        self.volume_percent = clamp_finite(
            percent,
            MIN_VOLUME_PERCENT,
            MAX_VOLUME_PERCENT,
            DEFAULT_VOLUME_PERCENT,
        );
        self.volume_percent
    }

    pub fn set_window(&mut self, offset_seconds: f64) -> f64 {
        if offset_seconds.is_finite() {
            self.window_offset_seconds = offset_seconds;
        }
        self.window_offset_seconds
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.pitch_semitones == 0
            && self.tempo_percent == 0.0
            && (self.volume_percent - DEFAULT_VOLUME_PERCENT).abs() < f64::EPSILON
    }
}

// NaN would slip through `f64::clamp`, so non-finite input keeps the fallback.
fn clamp_finite(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_nan() {
        return fallback;
    }
    value.clamp(min, max)
}
