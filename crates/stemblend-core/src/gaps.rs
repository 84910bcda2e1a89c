//! Energy-profile analysis: low-energy gaps for vocal insertion and silent
//! edges for segment trimming.

use serde::Serialize;

use crate::model::{EnergyCategory, VocalGap};

pub const GAP_WINDOW_SECONDS: f64 = 0.5;
pub const MIN_GAP_SECONDS: f64 = 2.0;
const BEAT_TOLERANCE_SECONDS: f64 = 0.1;
// Fixed placeholder grid; detected beats are not consulted here.
const GAP_BEAT_GRID_SECONDS: f64 = 0.5;
const DEFAULT_THRESHOLD: f64 = 0.2;

pub const MAX_EDGE_TRIM_SECONDS: f64 = 2.0;
pub const MIN_EDGE_TRIM_SECONDS: f64 = 0.1;
pub const MIN_TRIMMED_DURATION_SECONDS: f64 = 0.5;

/// Map a dB loudness onto `[0, 1]`: -60 dB and below is silent, 0 dB is full.
#[must_use]
pub fn db_to_energy(db: f64) -> f64 {
    if db.is_nan() || db <= -60.0 {
        0.0
    } else if db >= 0.0 {
        1.0
    } else {
        (db + 60.0) / 60.0
    }
}

/// Adaptive low-energy threshold for a profile.
///
/// 30% of the mean, raised to 15% of the peak, capped at 0.4 and floored at
/// 0.05. An empty profile uses 0.2.
#[must_use]
pub fn energy_threshold(energies: &[f64]) -> f64 {
    if energies.is_empty() {
        return DEFAULT_THRESHOLD;
    }
    #[allow(clippy::cast_precision_loss)]
    let mean = energies.iter().sum::<f64>() / energies.len() as f64;
    let peak = energies.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (mean * 0.3).max(peak * 0.15).min(0.4).max(0.05)
}

/// Whether `timestamp` is within tolerance of the fixed 0.5 s grid line at or
/// below it.
#[must_use]
pub fn is_near_grid_beat(timestamp: f64) -> bool {
    let grid_line = (timestamp / GAP_BEAT_GRID_SECONDS).trunc() * GAP_BEAT_GRID_SECONDS;
    (timestamp - grid_line).abs() <= BEAT_TOLERANCE_SECONDS
}

/// Find maximal runs of below-threshold windows lasting at least
/// [`MIN_GAP_SECONDS`]. A run still open at the last window is closed at
/// `duration_seconds`.
#[must_use]
pub fn find_gaps(energies: &[f64], duration_seconds: f64) -> Vec<VocalGap> {
    let threshold = energy_threshold(energies);
    let mut gaps = Vec::new();
    let mut open: Option<(f64, f64, u32)> = None;

    for (index, energy) in energies.iter().copied().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let timestamp = index as f64 * GAP_WINDOW_SECONDS;
        if energy < threshold {
            open = Some(match open {
                Some((start, sum, count)) => (start, sum + energy, count + 1),
                None => (timestamp, energy, 1),
            });
        } else if let Some((start, sum, count)) = open.take() {
            push_gap(&mut gaps, start, timestamp - start, sum / f64::from(count));
        }
    }
    if let Some((start, sum, count)) = open {
        push_gap(&mut gaps, start, duration_seconds - start, sum / f64::from(count));
    }
    gaps
}

fn push_gap(gaps: &mut Vec<VocalGap>, start: f64, duration: f64, energy_level: f64) {
    if duration < MIN_GAP_SECONDS {
        return;
    }
    gaps.push(VocalGap {
        start_time: start,
        duration,
        energy_level,
        is_on_beat: is_near_grid_beat(start) || is_near_grid_beat(start + duration),
    });
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GapReport {
    pub track_duration: f64,
    pub threshold: f64,
    pub gaps: Vec<VocalGap>,
}

impl GapReport {
    /// Build a report from per-window dB levels.
    #[must_use]
    pub fn from_levels_db(levels_db: &[f64], duration_seconds: f64) -> Self {
        let energies = levels_db.iter().copied().map(db_to_energy).collect::<Vec<_>>();
        Self {
            track_duration: duration_seconds,
            threshold: energy_threshold(&energies),
            gaps: find_gaps(&energies, duration_seconds),
        }
    }

    #[must_use]
    pub fn total_gap_seconds(&self) -> f64 {
        self.gaps.iter().map(|gap| gap.duration).sum()
    }

    #[must_use]
    pub fn coverage_percent(&self) -> f64 {
        if self.track_duration > 0.0 {
            self.total_gap_seconds() / self.track_duration * 100.0
        } else {
            0.0
        }
    }

    #[must_use]
    pub fn render_text(&self, label: &str) -> String {
        if self.gaps.is_empty() {
            return format!("No significant vocal gaps found in {label}");
        }
        let mut lines = vec![format!(
            "Found {} vocal gaps suitable for vocal placement in {label}:",
            self.gaps.len()
        )];
        for (number, gap) in self.gaps.iter().enumerate() {
            lines.push(format!(
                "  Gap {}: {:.2}s - {:.2}s ({:.2}s duration, energy: {:.3}{})",
                number + 1,
                gap.start_time,
                gap.end_time(),
                gap.duration,
                gap.energy_level,
                if gap.is_on_beat { ", on beat" } else { "" }
            ));
        }
        lines.push(format!(
            "Total gap time available: {:.2}s ({:.1}% of track)",
            self.total_gap_seconds(),
            self.coverage_percent()
        ));
        lines.join("\n")
    }
}

/// Leading and trailing silence of a clip in seconds, from per-window levels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeSilence {
    pub leading: f64,
    pub trailing: f64,
}

impl EdgeSilence {
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        self.leading >= MIN_EDGE_TRIM_SECONDS || self.trailing >= MIN_EDGE_TRIM_SECONDS
    }

    #[must_use]
    pub fn total(&self) -> f64 {
        self.leading + self.trailing
    }
}

/// Count quiet windows from each edge, each side capped at
/// [`MAX_EDGE_TRIM_SECONDS`]. A clip that is silent throughout reports the
/// cap on both sides.
#[must_use]
pub fn edge_silence(levels_db: &[f64], window_seconds: f64, silence_db: f64) -> EdgeSilence {
    let quiet = |level: &&f64| **level < silence_db;
    let leading_windows = levels_db.iter().take_while(quiet).count();
    let trailing_windows = if leading_windows == levels_db.len() {
        leading_windows
    } else {
        levels_db.iter().rev().take_while(quiet).count()
    };
    #[allow(clippy::cast_precision_loss)]
    let seconds = |windows: usize| (windows as f64 * window_seconds).min(MAX_EDGE_TRIM_SECONDS);
    EdgeSilence {
        leading: seconds(leading_windows),
        trailing: seconds(trailing_windows),
    }
}

/// Mean energy of a clip from its per-window dB levels.
#[must_use]
pub fn mean_energy(levels_db: &[f64]) -> Option<f64> {
    if levels_db.is_empty() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    Some(levels_db.iter().copied().map(db_to_energy).sum::<f64>() / levels_db.len() as f64)
}

/// Low/medium and medium/high boundaries at the tertiles of `values`.
#[must_use]
pub fn tertile_thresholds(values: &[f64]) -> (f64, f64) {
    if values.len() < 3 {
        return (0.33, 0.66);
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    (sorted[sorted.len() / 3], sorted[sorted.len() * 2 / 3])
}

#[must_use]
pub fn categorize_energy(level: f64, thresholds: (f64, f64)) -> EnergyCategory {
    if level <= thresholds.0 {
        EnergyCategory::Low
    } else if level <= thresholds.1 {
        EnergyCategory::Medium
    } else {
        EnergyCategory::High
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tertiles_split_sorted_values() {
        let values = [0.9, 0.1, 0.5, 0.3, 0.7, 0.2];
        let thresholds = tertile_thresholds(&values);
        assert_eq!(thresholds, (0.3, 0.7));
        assert_eq!(categorize_energy(0.2, thresholds), EnergyCategory::Low);
        assert_eq!(categorize_energy(0.5, thresholds), EnergyCategory::Medium);
        assert_eq!(categorize_energy(0.9, thresholds), EnergyCategory::High);
        assert_eq!(tertile_thresholds(&[0.5, 0.6]), (0.33, 0.66));
        assert_eq!(mean_energy(&[]), None);
        assert_eq!(mean_energy(&[-30.0, -30.0]), Some(0.5));
    }

    #[test]
    fn db_mapping_clamps_at_extremes() {
        assert_eq!(db_to_energy(-90.0), 0.0);
        assert_eq!(db_to_energy(-60.0), 0.0);
        assert_eq!(db_to_energy(3.0), 1.0);
        assert!((db_to_energy(-30.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn threshold_bounds() {
        assert_eq!(energy_threshold(&[]), 0.2);
        assert_eq!(energy_threshold(&[0.0, 0.0]), 0.05);
        assert_eq!(energy_threshold(&[1.0; 4]), 0.3);
        // mean 0.25 * 0.3 = 0.075 < peak 1.0 * 0.15
        assert!((energy_threshold(&[1.0, 0.0, 0.0, 0.0]) - 0.15).abs() < 1e-12);
    }

    #[test]
    fn grid_check_uses_the_floor_line() {
        assert!(is_near_grid_beat(1.0));
        assert!(is_near_grid_beat(1.05));
        assert!(!is_near_grid_beat(1.3));
        // 1.45 is within 0.1 of 1.5 but the check only looks down to 1.0
        assert!(!is_near_grid_beat(1.45));
    }

    #[test]
    fn gaps_need_two_seconds_of_quiet() {
        let mut energies = vec![0.8; 4];
        energies.extend([0.0; 5]);
        energies.extend([0.8; 2]);
        energies.extend([0.0; 3]);
        energies.extend([0.8; 2]);

        let gaps = find_gaps(&energies, 8.0);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].start_time, 2.0);
        assert_eq!(gaps[0].duration, 2.5);
        assert_eq!(gaps[0].energy_level, 0.0);
        assert!(gaps[0].is_on_beat);
    }

    #[test]
    fn trailing_gap_closes_at_track_end() {
        let mut energies = vec![0.9; 2];
        energies.extend([0.01; 6]);
        let gaps = find_gaps(&energies, 3.8);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].start_time, 1.0);
        assert!((gaps[0].duration - 2.8).abs() < 1e-12);
    }

    #[test]
    fn report_totals() {
        let mut levels = vec![-10.0; 2];
        levels.extend([-80.0; 6]);
        levels.extend([-10.0; 2]);
        let report = GapReport::from_levels_db(&levels, 5.0);
        assert_eq!(report.gaps.len(), 1);
        assert!((report.total_gap_seconds() - 3.0).abs() < 1e-12);
        assert!((report.coverage_percent() - 60.0).abs() < 1e-9);
        assert!(report.render_text("track 1").contains("Gap 1: 1.00s - 4.00s"));
    }

    #[test]
    fn edge_silence_counts_quiet_windows() {
        let levels = [-70.0, -55.0, -20.0, -18.0, -45.0];
        let edges = edge_silence(&levels, 0.1, -40.0);
        assert!((edges.leading - 0.2).abs() < 1e-12);
        assert!((edges.trailing - 0.1).abs() < 1e-12);
        assert!(edges.is_actionable());

        let loud = edge_silence(&[-10.0, -12.0], 0.1, -40.0);
        assert_eq!(loud.total(), 0.0);
        assert!(!loud.is_actionable());

        let capped = edge_silence(&[-90.0; 40], 0.1, -40.0);
        assert_eq!(capped.leading, MAX_EDGE_TRIM_SECONDS);
        assert_eq!(capped.trailing, MAX_EDGE_TRIM_SECONDS);
    }
}
