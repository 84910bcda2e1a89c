//! Segment placement onto the opposite track's timeline.
//!
//! Every function takes the segments it mutates plus whatever context it
//! reads; the random source is always passed in so results are reproducible
//! under a seeded generator.

use rand::Rng;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::{adjust::TrackSlot, model::VocalSegment};

/// Random and beat-aligned placements stay within this fraction of the target.
pub const PLACEMENT_SPAN_RATIO: f64 = 0.8;
/// Minimum silence between two vocal lines on different tracks.
pub const CROSS_TRACK_GUARD_SECONDS: f64 = 0.5;
/// Each segment may try `ATTEMPTS_PER_CANDIDATE_FACTOR * segments.len()` beats.
pub const ATTEMPTS_PER_CANDIDATE_FACTOR: usize = 10;

/// Scatter every segment uniformly over the first 80% of the target and
/// activate it. Overlaps are allowed.
pub fn random_place<R: Rng>(
    segments: &mut [VocalSegment],
    target_duration: f64,
    rng: &mut R,
) {
    let span = (target_duration * PLACEMENT_SPAN_RATIO).max(0.0);
    for segment in segments.iter_mut() {
        segment.placement = rng.random::<f64>() * span;
        segment.active = true;
    }
}

/// Half-open interval overlap.
fn intervals_overlap(start_a: f64, end_a: f64, start_b: f64, end_b: f64) -> bool {
    start_a < end_b && start_b < end_a
}

/// Whether placing `candidate` at `time` clashes with active segments.
///
/// Same-track segments (other than the candidate itself) may not overlap at
/// all. Other-track segments are only checked for a vocal/vocal pairing, with
/// a guard band on both sides of the candidate.
#[must_use]
pub fn would_conflict(
    candidate: &VocalSegment,
    time: f64,
    same_track: &[VocalSegment],
    other_track: &[VocalSegment],
    both_vocal: bool,
) -> bool {
    let end = time + candidate.source_duration;

    let same_track_clash = same_track
        .iter()
        .filter(|other| other.active && other.index != candidate.index)
        .any(|other| intervals_overlap(time, end, other.placement, other.placement_end()));
    if same_track_clash {
        return true;
    }

    both_vocal
        && other_track.iter().filter(|other| other.active).any(|other| {
            intervals_overlap(
                time - CROSS_TRACK_GUARD_SECONDS,
                end + CROSS_TRACK_GUARD_SECONDS,
                other.placement,
                other.placement_end(),
            )
        })
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct PlacedSegment {
    pub index: usize,
    pub placement: f64,
    /// 1-based position of the chosen beat in the candidate list.
    pub beat_number: usize,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct UnplacedSegment {
    pub index: usize,
    pub attempts: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SmartPlacementOutcome {
    pub usable_beats: usize,
    pub usable_window: f64,
    pub placed: Vec<PlacedSegment>,
    pub unplaced: Vec<UnplacedSegment>,
}

impl SmartPlacementOutcome {
    #[must_use]
    pub fn all_placed(&self) -> bool {
        self.unplaced.is_empty()
    }
}

/// Beat-aligned placement with collision avoidance.
///
/// All segments are reset to inactive at placement 0 first. Candidate beats
/// are those within the first 80% of the target; with none, nothing is
/// placed. Each segment then gets up to `10 * segments.len()` random beat
/// picks; the first pick that does not conflict is committed.
#[instrument(skip_all, fields(segments = segments.len(), beats = target_beats.len(), target_duration, both_vocal))]
pub fn smart_random_place<R: Rng>(
    segments: &mut [VocalSegment],
    target_beats: &[f64],
    target_duration: f64,
    other_track: &[VocalSegment],
    both_vocal: bool,
    rng: &mut R,
) -> SmartPlacementOutcome {
    for segment in segments.iter_mut() {
        segment.active = false;
        segment.placement = 0.0;
    }

    let usable_window = target_duration * PLACEMENT_SPAN_RATIO;
    let candidates = target_beats
        .iter()
        .copied()
        .filter(|beat| *beat <= usable_window)
        .collect::<Vec<_>>();
    let mut outcome = SmartPlacementOutcome {
        usable_beats: candidates.len(),
        usable_window,
        ..SmartPlacementOutcome::default()
    };
    if candidates.is_empty() {
        debug!("no usable beats in target window");
        outcome.unplaced = segments
            .iter()
            .map(|segment| UnplacedSegment {
                index: segment.index,
                attempts: 0,
            })
            .collect();
        return outcome;
    }

    let max_attempts = segments.len() * ATTEMPTS_PER_CANDIDATE_FACTOR;
    for position in 0..segments.len() {
        let candidate = segments[position].clone();
        let mut attempts = 0;
        let mut placed = None;
        while attempts < max_attempts {
            let beat_index = rng.random_range(0..candidates.len());
            let time = candidates[beat_index];
            if would_conflict(&candidate, time, segments, other_track, both_vocal) {
                attempts += 1;
                continue;
            }
            placed = Some((beat_index, time));
            break;
        }

        match placed {
            Some((beat_index, time)) => {
                let segment = &mut segments[position];
                segment.placement = time;
                segment.active = true;
                outcome.placed.push(PlacedSegment {
                    index: segment.index,
                    placement: time,
                    beat_number: beat_index + 1,
                });
            }
            None => outcome.unplaced.push(UnplacedSegment {
                index: candidate.index,
                attempts,
            }),
        }
    }
    debug!(
        placed = outcome.placed.len(),
        unplaced = outcome.unplaced.len(),
        "smart placement finished"
    );
    outcome
}

/// Explicit placement always wins: no collision check, always active.
pub fn place(segment: &mut VocalSegment, time: f64) {
    segment.placement = time;
    segment.active = true;
}

/// Move by `delta`, never before 0. Active state is untouched.
pub fn shift(segment: &mut VocalSegment, delta: f64) {
    segment.placement = (segment.placement + delta).max(0.0);
}

pub fn toggle(segment: &mut VocalSegment) -> bool {
    segment.active = !segment.active;
    segment.active
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverlapSeverity {
    Conflict,
    Warning,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct OverlapFinding {
    pub first: (TrackSlot, usize),
    pub second: (TrackSlot, usize),
    pub overlap_seconds: f64,
    pub severity: OverlapSeverity,
}

/// Every overlapping pair of active segments, each pair reported once.
///
/// Same-track overlaps are conflicts; cross-track overlaps are conflicts only
/// for a vocal/vocal pairing and warnings otherwise.
#[must_use]
pub fn find_overlaps(
    track_one: &[VocalSegment],
    track_two: &[VocalSegment],
    both_vocal: bool,
) -> Vec<OverlapFinding> {
    let mut findings = Vec::new();
    for (slot, segments) in [(TrackSlot::One, track_one), (TrackSlot::Two, track_two)] {
        let active = segments.iter().filter(|segment| segment.active).collect::<Vec<_>>();
        for (position, first) in active.iter().enumerate() {
            for second in &active[position + 1..] {
                let overlap = first.overlap_with(second);
                if overlap > 0.0 {
                    findings.push(OverlapFinding {
                        first: (slot, first.index),
                        second: (slot, second.index),
                        overlap_seconds: overlap,
                        severity: OverlapSeverity::Conflict,
                    });
                }
            }
        }
    }

    let severity = if both_vocal {
        OverlapSeverity::Conflict
    } else {
        OverlapSeverity::Warning
    };
    for first in track_one.iter().filter(|segment| segment.active) {
        for second in track_two.iter().filter(|segment| segment.active) {
            let overlap = first.overlap_with(second);
            if overlap > 0.0 {
                findings.push(OverlapFinding {
                    first: (TrackSlot::One, first.index),
                    second: (TrackSlot::Two, second.index),
                    overlap_seconds: overlap,
                    severity,
                });
            }
        }
    }
    findings
}
