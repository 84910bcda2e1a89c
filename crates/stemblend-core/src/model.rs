use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::adjust::TrackSlot;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Vocal,
    Instrumental,
}

impl TrackKind {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Vocal => "vocal",
            Self::Instrumental => "instrumental",
        }
    }

    /// File name of the separated stem for `id`.
    #[must_use]
    pub fn stem_file_name(self, id: &str) -> String {
        match self {
            Self::Vocal => format!("{id}_(Vocals)_UVR_MDXNET_Main.wav"),
            Self::Instrumental => format!("{id}_(Instrumental)_UVR_MDXNET_Main.wav"),
        }
    }

    #[must_use]
    pub fn stem_path(self, data_dir: &Path, id: &str) -> PathBuf {
        data_dir.join(self.stem_file_name(id))
    }
}

impl FromStr for TrackKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "vocal" | "vocals" | "v" => Ok(Self::Vocal),
            "instrumental" | "instrumentals" | "i" => Ok(Self::Instrumental),
            other => Err(format!(
                "invalid track type: {other} (use vocal or instrumental)"
            )),
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// BPM/key analysis persisted next to the stems by the extractor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisRecord {
    pub bpm: Option<f64>,
    pub key: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrackMetadata {
    pub id: String,
    pub kind: TrackKind,
    pub duration_seconds: f64,
    pub bpm: Option<f64>,
    pub key: Option<String>,
}

/// A loaded track slot: its metadata plus the stem currently feeding it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Track {
    pub metadata: TrackMetadata,
    pub input_path: PathBuf,
}

impl Track {
    #[must_use]
    pub fn usable_bpm(&self) -> Option<f64> {
        self.metadata.bpm.filter(|bpm| bpm.is_finite() && *bpm > 0.0)
    }

    #[must_use]
    pub fn duration(&self) -> f64 {
        self.metadata.duration_seconds
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EnergyCategory {
    Low,
    Medium,
    High,
}

impl EnergyCategory {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct SegmentEnergy {
    pub level: f64,
    pub category: EnergyCategory,
}

/// A sub-clip of a vocal track, placeable on the other track's timeline.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VocalSegment {
    /// 1-based, stable for the lifetime of a split.
    pub index: usize,
    /// Start of the span within the originating track.
    pub source_start: f64,
    pub source_duration: f64,
    /// Target time on the other track's timeline.
    pub placement: f64,
    pub active: bool,
    /// Clip file produced by the splitter, and the source time it begins at.
    pub clip_path: PathBuf,
    pub clip_start: f64,
    pub energy: Option<SegmentEnergy>,
}

impl VocalSegment {
    #[must_use]
    pub fn placement_end(&self) -> f64 {
        self.placement + self.source_duration
    }

    /// Seconds into the clip file where the (possibly trimmed) span begins.
    #[must_use]
    pub fn clip_offset(&self) -> f64 {
        (self.source_start - self.clip_start).max(0.0)
    }

    /// Overlap in seconds between the placed spans of two segments.
    #[must_use]
    pub fn overlap_with(&self, other: &Self) -> f64 {
        let start = self.placement.max(other.placement);
        let end = self.placement_end().min(other.placement_end());
        (end - start).max(0.0)
    }
}

/// `track:segment` reference as typed in the shell, e.g. `1:3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRef {
    pub slot: TrackSlot,
    pub index: usize,
}

impl fmt::Display for SegmentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.slot, self.index)
    }
}

impl FromStr for SegmentRef {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid =
            || format!("invalid segment reference: {value} (use track:segment, e.g. 1:3)");
        let (slot, index) = value.split_once(':').ok_or_else(invalid)?;
        let slot = slot.parse::<TrackSlot>().map_err(|_| invalid())?;
        let index = index.parse::<usize>().map_err(|_| invalid())?;
        if index == 0 {
            return Err(invalid());
        }
        Ok(Self { slot, index })
    }
}

/// A sustained low-energy window, reported as a candidate insertion point.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct VocalGap {
    pub start_time: f64,
    pub duration: f64,
    pub energy_level: f64,
    pub is_on_beat: bool,
}

impl VocalGap {
    #[must_use]
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}
