//! Declarative render plans built from a frozen snapshot of session state.
//!
//! Nothing here touches audio. A plan lists the streams to run (base tracks
//! and placed segments) with their seek, duration, delay and effects;
//! `playback` hands plans to a backend. Segments whose clip file is gone are
//! left out of both plans.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::{
    adjust::{DEFAULT_VOLUME_PERCENT, TrackAdjustment, TrackSlot},
    model::{TrackKind, VocalSegment},
};

const RESAMPLE_RATE: u32 = 44_100;
const MIN_TEMPO_RATIO: f64 = 0.5;
const MAX_TEMPO_RATIO: f64 = 2.0;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrackSnapshot {
    pub slot: TrackSlot,
    pub id: String,
    pub kind: TrackKind,
    pub input_path: PathBuf,
    pub duration_seconds: f64,
    pub adjustment: TrackAdjustment,
    pub segments: Vec<VocalSegment>,
}

/// Everything a render needs, copied out of the session at `Playing` entry.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionSnapshot {
    pub tracks: [TrackSnapshot; 2],
}

impl SessionSnapshot {
    #[must_use]
    pub fn track(&self, slot: TrackSlot) -> &TrackSnapshot {
        &self.tracks[slot.index()]
    }

    /// SHA-256 over the serialized snapshot, hex encoded.
    pub fn fingerprint(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self).context("failed to serialize session snapshot")?;
        Ok(format!("{:x}", Sha256::digest(&bytes)))
    }
}

/// Effects applied to one stream by the external renderer.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct EffectChain {
    pub tempo_ratio: Option<f64>,
    pub pitch_ratio: Option<f64>,
    pub volume_gain: Option<f64>,
}

impl EffectChain {
    #[must_use]
    pub fn identity() -> Self {
        Self::default()
    }

    /// Tempo is dropped when its ratio falls outside `(0.5, 2.0]`; pitch and
    /// volume are only present when they differ from neutral.
    #[must_use]
    pub fn from_adjustment(adjustment: &TrackAdjustment) -> Self {
        let tempo_ratio = (adjustment.tempo_percent() != 0.0)
            .then(|| 1.0 + adjustment.tempo_percent() / 100.0)
            .filter(|ratio| *ratio > MIN_TEMPO_RATIO && *ratio <= MAX_TEMPO_RATIO);
        let pitch_ratio = (adjustment.pitch_semitones() != 0)
            .then(|| 2_f64.powf(f64::from(adjustment.pitch_semitones()) / 12.0));
        let volume_gain = ((adjustment.volume_percent() - DEFAULT_VOLUME_PERCENT).abs()
            > f64::EPSILON)
            .then(|| adjustment.volume_percent() / 100.0);
        Self {
            tempo_ratio,
            pitch_ratio,
            volume_gain,
        }
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.tempo_ratio.is_none() && self.pitch_ratio.is_none() && self.volume_gain.is_none()
    }

    /// ffmpeg filter expression, `None` for the identity chain.
    ///
    /// Pitch is a resample to `rate * ratio` followed by a compensating
    /// `atempo`, which changes pitch without changing duration.
    #[must_use]
    pub fn filter_expression(&self) -> Option<String> {
        let mut filters = Vec::new();
        if let Some(ratio) = self.tempo_ratio {
            filters.push(format!("atempo={ratio:.6}"));
        }
        if let Some(ratio) = self.pitch_ratio {
            filters.push(format!(
                "asetrate={RESAMPLE_RATE}*{ratio:.6},aresample={RESAMPLE_RATE},atempo={:.6}",
                1.0 / ratio
            ));
        }
        if let Some(gain) = self.volume_gain {
            filters.push(format!("volume={gain:.6}"));
        }
        (!filters.is_empty()).then(|| filters.join(","))
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamSource {
    BaseTrack { slot: TrackSlot },
    /// A segment owned by `slot`, sounding on the other track's timeline.
    Segment { slot: TrackSlot, index: usize },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlannedStream {
    pub source: StreamSource,
    pub path: PathBuf,
    pub seek_seconds: f64,
    pub duration_seconds: f64,
    pub delay_seconds: f64,
    pub effects: EffectChain,
}

impl PlannedStream {
    #[must_use]
    pub fn label(&self) -> String {
        match self.source {
            StreamSource::BaseTrack { slot } => format!("track {slot}"),
            StreamSource::Segment { slot, index } => format!("segment {slot}:{index}"),
        }
    }

    /// Arguments for a live `ffplay` invocation of this stream. The delay is
    /// applied by the caller before launching.
    #[must_use]
    pub fn ffplay_args(&self) -> Vec<String> {
        let mut args = vec![
            "-ss".to_string(),
            format!("{:.3}", self.seek_seconds),
            "-t".to_string(),
            format!("{:.3}", self.duration_seconds),
            "-autoexit".to_string(),
            "-nodisp".to_string(),
            "-loglevel".to_string(),
            "quiet".to_string(),
        ];
        if let Some(filter) = self.effects.filter_expression() {
            args.push("-af".to_string());
            args.push(filter);
        }
        args.push(self.path.display().to_string());
        args
    }
}

/// Start positions and shared length of a playback.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct PlaybackWindow {
    pub starts: [f64; 2],
    pub duration_seconds: f64,
}

impl PlaybackWindow {
    #[must_use]
    pub fn start(&self, slot: TrackSlot) -> f64 {
        self.starts[slot.index()]
    }
}

/// Clamp a start position into the track: negative becomes 0, at or past the
/// end becomes one second before the end.
#[must_use]
pub fn clamp_start(position: f64, duration_seconds: f64) -> f64 {
    if position < 0.0 {
        0.0
    } else if position >= duration_seconds {
        (duration_seconds - 1.0).max(0.0)
    } else {
        position
    }
}

/// Each track starts at its midpoint (or `explicit_start`) plus its window
/// offset; both play for the shorter of the two remaining durations.
#[must_use]
pub fn playback_window(snapshot: &SessionSnapshot, explicit_start: Option<f64>) -> PlaybackWindow {
    let start_for = |track: &TrackSnapshot| {
        let reference = explicit_start.unwrap_or(track.duration_seconds / 2.0);
        clamp_start(
            reference + track.adjustment.window_offset_seconds(),
            track.duration_seconds,
        )
    };
    let starts = [start_for(&snapshot.tracks[0]), start_for(&snapshot.tracks[1])];
    let duration_seconds = snapshot
        .tracks
        .iter()
        .zip(starts)
        .map(|(track, start)| track.duration_seconds - start)
        .fold(f64::INFINITY, f64::min)
        .max(0.0);
    PlaybackWindow {
        starts,
        duration_seconds,
    }
}

/// Timing of a segment inside a playback window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentTiming {
    /// Seconds into the segment span (non-zero when it began before the window).
    pub seek_into: f64,
    pub duration: f64,
    pub delay: f64,
}

/// `None` when the placed segment lies entirely outside the window.
#[must_use]
pub fn segment_timing(
    placement: f64,
    segment_duration: f64,
    window_start: f64,
    window_duration: f64,
) -> Option<SegmentTiming> {
    let window_end = window_start + window_duration;
    let segment_end = placement + segment_duration;
    if segment_end <= window_start || placement >= window_end {
        return None;
    }
    if placement >= window_start {
        Some(SegmentTiming {
            seek_into: 0.0,
            duration: segment_duration.min(window_end - placement),
            delay: placement - window_start,
        })
    } else {
        Some(SegmentTiming {
            seek_into: window_start - placement,
            duration: segment_end.min(window_end) - window_start,
            delay: 0.0,
        })
    }
}

fn build_streams(snapshot: &SessionSnapshot, window: &PlaybackWindow) -> Vec<PlannedStream> {
    let mut streams = TrackSlot::BOTH
        .iter()
        .map(|slot| {
            let track = snapshot.track(*slot);
            PlannedStream {
                source: StreamSource::BaseTrack { slot: *slot },
                path: track.input_path.clone(),
                seek_seconds: window.start(*slot),
                duration_seconds: window.duration_seconds,
                delay_seconds: 0.0,
                effects: EffectChain::from_adjustment(&track.adjustment),
            }
        })
        .collect::<Vec<_>>();

    for slot in TrackSlot::BOTH {
        let target_start = window.start(slot.other());
        for segment in snapshot.track(slot).segments.iter().filter(|segment| segment.active) {
            let Some(timing) = segment_timing(
                segment.placement,
                segment.source_duration,
                target_start,
                window.duration_seconds,
            ) else {
                continue;
            };
            if !segment.clip_path.is_file() {
                warn!(
                    %slot,
                    segment = segment.index,
                    clip = %segment.clip_path.display(),
                    "segment clip missing, skipping"
                );
                continue;
            }
            streams.push(PlannedStream {
                source: StreamSource::Segment {
                    slot,
                    index: segment.index,
                },
                path: segment.clip_path.clone(),
                seek_seconds: segment.clip_offset() + timing.seek_into,
                duration_seconds: timing.duration,
                delay_seconds: timing.delay,
                effects: EffectChain::identity(),
            });
        }
    }
    streams
}

/// Live output: every stream plays concurrently on the output device.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RenderPlan {
    pub fingerprint: String,
    pub window: PlaybackWindow,
    pub streams: Vec<PlannedStream>,
}

/// The same streams summed into a single file.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MixdownPlan {
    pub fingerprint: String,
    pub window: PlaybackWindow,
    pub streams: Vec<PlannedStream>,
    pub output_path: PathBuf,
}

impl MixdownPlan {
    /// `ffmpeg` arguments: one seeked input per stream, a per-input effect
    /// and delay chain, and an `amix` of all of them.
    #[must_use]
    pub fn ffmpeg_args(&self) -> Vec<String> {
        let mut args = vec!["-hide_banner".to_string(), "-y".to_string()];
        let mut graph = Vec::with_capacity(self.streams.len() + 1);
        let mut mix_inputs = String::new();

        for (input, stream) in self.streams.iter().enumerate() {
            args.extend([
                "-ss".to_string(),
                format!("{:.3}", stream.seek_seconds),
                "-t".to_string(),
                format!("{:.3}", stream.duration_seconds),
                "-i".to_string(),
                stream.path.display().to_string(),
            ]);

            let mut chain = stream
                .effects
                .filter_expression()
                .unwrap_or_else(|| "anull".to_string());
            if stream.delay_seconds > 0.0 {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let millis = (stream.delay_seconds * 1000.0).round() as u64;
                chain.push_str(&format!(",adelay={millis}|{millis}"));
            }
            graph.push(format!("[{input}:a]{chain}[s{input}]"));
            mix_inputs.push_str(&format!("[s{input}]"));
        }
        graph.push(format!(
            "{mix_inputs}amix=inputs={}:duration=longest[out]",
            self.streams.len()
        ));

        args.extend([
            "-filter_complex".to_string(),
            graph.join(";"),
            "-map".to_string(),
            "[out]".to_string(),
            "-t".to_string(),
            format!("{:.3}", self.window.duration_seconds),
            self.output_path.display().to_string(),
        ]);
        args
    }
}

/// Build both sibling plans from one snapshot.
pub fn build_plans(
    snapshot: &SessionSnapshot,
    explicit_start: Option<f64>,
    output_path: PathBuf,
) -> Result<(RenderPlan, MixdownPlan)> {
    let fingerprint = snapshot.fingerprint()?;
    let window = playback_window(snapshot, explicit_start);
    let streams = build_streams(snapshot, &window);
    let live = RenderPlan {
        fingerprint: fingerprint.clone(),
        window,
        streams: streams.clone(),
    };
    let mixdown = MixdownPlan {
        fingerprint,
        window,
        streams,
        output_path,
    };
    Ok((live, mixdown))
}

/// A single segment played on its own, from its (trimmed) start.
#[must_use]
pub fn preview_plan(slot: TrackSlot, segment: &VocalSegment) -> RenderPlan {
    RenderPlan {
        fingerprint: String::new(),
        window: PlaybackWindow {
            starts: [0.0, 0.0],
            duration_seconds: segment.source_duration,
        },
        streams: vec![PlannedStream {
            source: StreamSource::Segment {
                slot,
                index: segment.index,
            },
            path: segment.clip_path.clone(),
            seek_seconds: segment.clip_offset(),
            duration_seconds: segment.source_duration,
            delay_seconds: 0.0,
            effects: EffectChain::identity(),
        }],
    }
}

/// `<dir>/blend_<id1>_<id2>_<unix seconds>.wav`
#[must_use]
pub fn mixdown_output_path(
    output_dir: &Path,
    first_id: &str,
    second_id: &str,
    now: DateTime<Utc>,
) -> PathBuf {
    output_dir.join(format!(
        "blend_{first_id}_{second_id}_{}.wav",
        now.timestamp()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_after_window_start_is_delayed() {
        let timing = segment_timing(10.0, 4.0, 8.0, 60.0).expect("segment should be in window");
        assert_eq!(timing.delay, 2.0);
        assert_eq!(timing.seek_into, 0.0);
        assert_eq!(timing.duration, 4.0);
    }

    #[test]
    fn segment_started_before_window_seeks_in() {
        let timing = segment_timing(6.0, 4.0, 8.0, 60.0).expect("segment should be in window");
        assert_eq!(timing.delay, 0.0);
        assert_eq!(timing.seek_into, 2.0);
        assert_eq!(timing.duration, 2.0);
    }

    #[test]
    fn segment_is_clipped_at_window_end_and_excluded_outside() {
        let timing = segment_timing(18.0, 4.0, 8.0, 12.0).expect("segment should be in window");
        assert_eq!(timing.duration, 2.0);
        assert!(segment_timing(2.0, 4.0, 8.0, 12.0).is_none());
        assert!(segment_timing(4.0, 4.0, 8.0, 12.0).is_none());
        assert!(segment_timing(20.0, 4.0, 8.0, 12.0).is_none());
    }

    #[test]
    fn start_clamping() {
        assert_eq!(clamp_start(-3.0, 100.0), 0.0);
        assert_eq!(clamp_start(100.0, 100.0), 99.0);
        assert_eq!(clamp_start(150.0, 100.0), 99.0);
        assert_eq!(clamp_start(0.5, 0.5), 0.0);
        assert_eq!(clamp_start(42.0, 100.0), 42.0);
    }

    #[test]
    fn effect_chain_drops_unsafe_tempo() {
        let mut adjustment = TrackAdjustment::default();
        assert!(EffectChain::from_adjustment(&adjustment).is_identity());
        assert_eq!(EffectChain::from_adjustment(&adjustment).filter_expression(), None);

        adjustment.set_tempo(-50.0);
        assert_eq!(EffectChain::from_adjustment(&adjustment).tempo_ratio, None);
        adjustment.set_tempo(100.0);
        assert_eq!(EffectChain::from_adjustment(&adjustment).tempo_ratio, Some(2.0));

        adjustment.set_tempo(0.0);
        adjustment.set_pitch(12);
        adjustment.set_volume(50.0);
        assert_eq!(
            EffectChain::from_adjustment(&adjustment).filter_expression(),
            Some(
                "asetrate=44100*2.000000,aresample=44100,atempo=0.500000,volume=0.500000"
                    .to_string()
            )
        );
    }

    #[test]
    fn ffplay_args_carry_seek_duration_and_filter() {
        let stream = PlannedStream {
            source: StreamSource::BaseTrack {
                slot: TrackSlot::One,
            },
            path: PathBuf::from("a.wav"),
            seek_seconds: 12.5,
            duration_seconds: 30.0,
            delay_seconds: 0.0,
            effects: EffectChain {
                tempo_ratio: Some(1.1),
                ..EffectChain::identity()
            },
        };
        assert_eq!(
            stream.ffplay_args(),
            [
                "-ss", "12.500", "-t", "30.000", "-autoexit", "-nodisp", "-loglevel", "quiet",
                "-af", "atempo=1.100000", "a.wav"
            ]
        );
    }

    #[test]
    fn output_path_is_timestamped() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp");
        assert_eq!(
            mixdown_output_path(Path::new("data"), "x", "y", now),
            Path::new("data").join("blend_x_y_1700000000.wav")
        );
    }
}
