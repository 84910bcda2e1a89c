use std::path::Path;

use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::tools::OnsetDetector;

/// Where a beat list came from.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BeatSource {
    Onsets,
    Synthesized,
    Unavailable,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BeatDetection {
    pub beats: Vec<f64>,
    pub source: BeatSource,
}

/// Upper bound on a synthesized grid; a day at 300 BPM fits comfortably.
pub const MAX_SYNTHESIZED_BEATS: u32 = 500_000;

/// Evenly spaced beats at `0, 60/bpm, 2*60/bpm, ...` strictly below `duration`.
///
/// Positions are computed by index rather than by accumulation so long tracks
/// do not drift.
#[must_use]
pub fn synthesize_beats(bpm: f64, duration_seconds: f64) -> Vec<f64> {
    if !(bpm.is_finite() && bpm > 0.0 && duration_seconds.is_finite() && duration_seconds > 0.0) {
        return Vec::new();
    }
    let interval = 60.0 / bpm;
    let wanted = (duration_seconds / interval).ceil().max(1.0);
    if wanted > f64::from(MAX_SYNTHESIZED_BEATS) {
        warn!(bpm, duration_seconds, wanted, "beat grid truncated");
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let count = wanted.min(f64::from(MAX_SYNTHESIZED_BEATS)) as u32;
    (0..count)
        .map(|index| f64::from(index) * interval)
        .take_while(|beat| *beat < duration_seconds)
        .collect()
}

/// Closest beat to `time`; `time` itself when there is nothing to snap to.
#[must_use]
pub fn nearest_beat(beats: &[f64], time: f64) -> f64 {
    beats
        .iter()
        .copied()
        .min_by(|left, right| (time - left).abs().total_cmp(&(time - right).abs()))
        .unwrap_or(time)
}

/// Run the onset detector when one is configured, falling back to a BPM grid.
///
/// Detector failures and empty results are not errors: the grid is
/// authoritative whenever onsets are unavailable, and no BPM means no beats.
#[instrument(skip(detector, path), fields(path = %path.display()))]
pub fn detect_beats(
    detector: Option<&dyn OnsetDetector>,
    path: &Path,
    bpm: Option<f64>,
    duration_seconds: f64,
) -> BeatDetection {
    if let Some(detector) = detector {
        match detector.detect_onsets(path) {
            Ok(mut onsets) => {
                onsets.retain(|onset| onset.is_finite() && *onset >= 0.0);
                onsets.sort_by(f64::total_cmp);
                if !onsets.is_empty() {
                    debug!(count = onsets.len(), "onsets detected");
                    return BeatDetection {
                        beats: onsets,
                        source: BeatSource::Onsets,
                    };
                }
                debug!("onset detector returned nothing");
            }
            Err(error) => warn!(error = %error, "onset detection failed, using bpm grid"),
        }
    }

    match bpm.filter(|bpm| bpm.is_finite() && *bpm > 0.0) {
        Some(bpm) => BeatDetection {
            beats: synthesize_beats(bpm, duration_seconds),
            source: BeatSource::Synthesized,
        },
        None => BeatDetection {
            beats: Vec::new(),
            source: BeatSource::Unavailable,
        },
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    struct FixedOnsets(anyhow::Result<Vec<f64>>);

    impl OnsetDetector for FixedOnsets {
        fn detect_onsets(&self, _path: &Path) -> anyhow::Result<Vec<f64>> {
            match &self.0 {
                Ok(onsets) => Ok(onsets.clone()),
                Err(error) => Err(anyhow::anyhow!("{error}")),
            }
        }
    }

    #[test]
    fn grid_stops_before_duration() {
        let beats = synthesize_beats(120.0, 2.0);
        assert_eq!(beats, vec![0.0, 0.5, 1.0, 1.5]);
        assert!(synthesize_beats(0.0, 10.0).is_empty());
        assert!(synthesize_beats(120.0, 0.0).is_empty());
    }

    #[test]
    fn oversized_grid_is_capped() {
        let beats = synthesize_beats(1.0e6, 1.0e6);
        assert_eq!(beats.len(), MAX_SYNTHESIZED_BEATS as usize);
        assert!(beats.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(synthesize_beats(1.0e-300, 10.0), vec![0.0]);
    }

    #[test]
    fn nearest_beat_snaps_or_passes_through() {
        let beats = [0.0, 0.5, 1.0, 1.5];
        assert_eq!(nearest_beat(&beats, 0.7), 0.5);
        assert_eq!(nearest_beat(&beats, 0.8), 1.0);
        assert_eq!(nearest_beat(&beats, 9.0), 1.5);
        assert_eq!(nearest_beat(&[], 3.3), 3.3);
    }

    #[test]
    fn failed_detection_falls_back_to_grid() {
        let path = PathBuf::from("track.wav");
        let detector = FixedOnsets(Err(anyhow::anyhow!("no aubio")));
        let detection = detect_beats(Some(&detector as &dyn OnsetDetector), &path, Some(60.0), 3.0);
        assert_eq!(detection.source, BeatSource::Synthesized);
        assert_eq!(detection.beats, vec![0.0, 1.0, 2.0]);

        let detection = detect_beats(None, &path, None, 3.0);
        assert_eq!(detection.source, BeatSource::Unavailable);
        assert!(detection.beats.is_empty());
    }

    #[test]
    fn detected_onsets_are_sorted() {
        let path = PathBuf::from("track.wav");
        let detector = FixedOnsets(Ok(vec![1.2, 0.4, f64::NAN, 0.9]));
        let detection = detect_beats(Some(&detector as &dyn OnsetDetector), &path, Some(120.0), 3.0);
        assert_eq!(detection.source, BeatSource::Onsets);
        assert_eq!(detection.beats, vec![0.4, 0.9, 1.2]);
    }
}
