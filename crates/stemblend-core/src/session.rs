//! The blend session: two tracks, their adjustments and segments, and every
//! operation the shell can run against them.
//!
//! Handlers validate their arguments and call collaborators before touching
//! state, so a failed command leaves the session exactly as it was.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::{
    adjust::{TrackAdjustment, TrackSelection, TrackSlot},
    beats::{BeatSource, detect_beats},
    config::BlendConfig,
    gaps::{
        GAP_WINDOW_SECONDS, GapReport, MIN_EDGE_TRIM_SECONDS, MIN_TRIMMED_DURATION_SECONDS,
        categorize_energy, edge_silence, mean_energy, tertile_thresholds,
    },
    keys::{self, MatchDirection, effective_bpm, effective_key, key_distance},
    model::{
        AnalysisRecord, SegmentEnergy, SegmentRef, Track, TrackKind, TrackMetadata, VocalSegment,
    },
    persistence::{
        FileMementoStore, InvertMemento, MementoStore, PairKey, analysis_record_path,
        load_analysis_record,
    },
    placement::{self, OverlapSeverity, PLACEMENT_SPAN_RATIO},
    render::{
        MixdownPlan, RenderPlan, SessionSnapshot, TrackSnapshot, build_plans,
        mixdown_output_path, preview_plan,
    },
    tools::{
        AubioOnsets, DurationProbe, FfmpegLoudness, FfmpegSplitter, LoudnessAnalyzer,
        MediaProbe, OnsetDetector, SegmentSplitter, Span,
    },
};

const BEAT_PREVIEW_COUNT: usize = 10;

#[derive(Debug, Error, PartialEq)]
pub enum SessionError {
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0}")]
    InvalidTrack(String),
    #[error("{0}")]
    InvalidSegmentRef(String),
    #[error("segment {segment} not found; track {} has {available} segments", .segment.slot)]
    UnknownSegment { segment: SegmentRef, available: usize },
    #[error("no segments found for track {0}. Run 'split {0}' first")]
    NoSegments(TrackSlot),
    #[error("no beats detected for track {0}. Run 'beat-detect {0}' first")]
    NoBeats(TrackSlot),
    #[error("track {0} is not vocal type. Switch to vocal first using 'type{0} vocal'")]
    NotVocal(TrackSlot),
    #[error("{0}")]
    MissingMetadata(String),
    #[error("input file {} does not exist", .0.display())]
    MissingInput(PathBuf),
    #[error("tool error: {0}")]
    Tool(String),
    #[error("invert state error: {0}")]
    Persistence(String),
}

impl From<anyhow::Error> for SessionError {
    fn from(value: anyhow::Error) -> Self {
        Self::Tool(format!("{value:#}"))
    }
}

fn persistence_error(error: anyhow::Error) -> SessionError {
    SessionError::Persistence(format!("{error:#}"))
}

/// External collaborators the session delegates to.
pub struct Collaborators {
    pub probe: Box<dyn DurationProbe>,
    pub splitter: Box<dyn SegmentSplitter>,
    pub loudness: Box<dyn LoudnessAnalyzer>,
    pub onsets: Option<Box<dyn OnsetDetector>>,
    pub mementos: Box<dyn MementoStore>,
}

impl Collaborators {
    /// ffmpeg/ffprobe/aubio backed tools and file-based invert markers.
    #[must_use]
    pub fn from_config(config: &BlendConfig) -> Self {
        let onsets = config
            .tools
            .onset_detector
            .as_ref()
            .map(|program| Box::new(AubioOnsets::new(program)) as Box<dyn OnsetDetector>);
        Self {
            probe: Box::new(MediaProbe::new(&config.tools.ffprobe)),
            splitter: Box::new(FfmpegSplitter::new(
                &config.tools.ffmpeg,
                config.splitter.noise_db,
                config.splitter.min_silence_seconds,
            )),
            loudness: Box::new(FfmpegLoudness::new(&config.tools.ffmpeg)),
            onsets,
            mementos: Box::new(FileMementoStore::new(&config.paths.memento_dir)),
        }
    }
}

/// Which separated stems exist for a track id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StemAvailability {
    pub vocal: bool,
    pub instrumental: bool,
}

impl StemAvailability {
    #[must_use]
    pub fn scan(data_dir: &Path, id: &str) -> Self {
        Self {
            vocal: TrackKind::Vocal.stem_path(data_dir, id).is_file(),
            instrumental: TrackKind::Instrumental.stem_path(data_dir, id).is_file(),
        }
    }

    const fn only_instrumental(self) -> bool {
        !self.vocal && self.instrumental
    }
}

/// Pick complementary stem types for a new session.
///
/// An instrumental-only track pushes the other towards vocal. Otherwise a
/// single available stem wins, track 1 defaults to vocal when it has both,
/// and track 2 takes the opposite of track 1 when it has both.
#[must_use]
pub fn choose_track_kinds(
    first: StemAvailability,
    second: StemAvailability,
) -> (TrackKind, TrackKind) {
    let vocal_if = |available: bool| {
        if available {
            TrackKind::Vocal
        } else {
            TrackKind::Instrumental
        }
    };
    if second.only_instrumental() {
        return (vocal_if(first.vocal), TrackKind::Instrumental);
    }
    if first.only_instrumental() {
        return (TrackKind::Instrumental, vocal_if(second.vocal));
    }
    let first_kind = vocal_if(first.vocal);
    let second_kind = match (second.vocal, second.instrumental) {
        (true, true) => vocal_if(first_kind == TrackKind::Instrumental),
        (vocal, _) => vocal_if(vocal),
    };
    (first_kind, second_kind)
}

#[derive(Debug, Clone)]
struct TrackState {
    track: Track,
    adjustment: TrackAdjustment,
    segments: Vec<VocalSegment>,
    segments_dir: PathBuf,
    beats: Vec<f64>,
}

impl TrackState {
    fn new(track: Track, data_dir: &Path) -> Self {
        let segments_dir = data_dir.join(&track.metadata.id);
        Self {
            track,
            adjustment: TrackAdjustment::default(),
            segments: Vec::new(),
            segments_dir,
            beats: Vec::new(),
        }
    }

    fn id(&self) -> &str {
        &self.track.metadata.id
    }

    fn active_segments(&self) -> usize {
        self.segments.iter().filter(|segment| segment.active).count()
    }
}

pub struct BlendSession {
    tracks: [TrackState; 2],
    config: BlendConfig,
    tools: Collaborators,
    rng: ChaCha8Rng,
}

impl BlendSession {
    /// Load both tracks from the data directory.
    ///
    /// Stem types are chosen from the files present; a missing stem for the
    /// chosen type is an error, missing analysis metadata is not.
    #[instrument(skip(config, tools), fields(data_dir = %config.paths.data_dir.display()))]
    pub fn open(
        first_id: &str,
        second_id: &str,
        config: BlendConfig,
        tools: Collaborators,
    ) -> Result<Self, SessionError> {
        let data_dir = config.paths.data_dir.clone();
        let (first_kind, second_kind) = choose_track_kinds(
            StemAvailability::scan(&data_dir, first_id),
            StemAvailability::scan(&data_dir, second_id),
        );
        let first = load_track(&data_dir, first_id, first_kind, tools.probe.as_ref())?;
        let second = load_track(&data_dir, second_id, second_kind, tools.probe.as_ref())?;
        info!(
            first = %first.metadata.id,
            first_kind = %first.metadata.kind,
            second = %second.metadata.id,
            second_kind = %second.metadata.kind,
            "blend session opened"
        );
        Ok(Self::from_tracks(first, second, config, tools))
    }

    /// Build a session around already-resolved tracks.
    #[must_use]
    pub fn from_tracks(
        first: Track,
        second: Track,
        config: BlendConfig,
        tools: Collaborators,
    ) -> Self {
        let rng = match config.placement.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_os_rng(),
        };
        let data_dir = config.paths.data_dir.clone();
        Self {
            tracks: [
                TrackState::new(first, &data_dir),
                TrackState::new(second, &data_dir),
            ],
            config,
            tools,
            rng,
        }
    }

    fn state(&self, slot: TrackSlot) -> &TrackState {
        &self.tracks[slot.index()]
    }

    fn state_mut(&mut self, slot: TrackSlot) -> &mut TrackState {
        &mut self.tracks[slot.index()]
    }

    #[must_use]
    pub fn track(&self, slot: TrackSlot) -> &Track {
        &self.state(slot).track
    }

    #[must_use]
    pub fn adjustment(&self, slot: TrackSlot) -> &TrackAdjustment {
        &self.state(slot).adjustment
    }

    #[must_use]
    pub fn segments(&self, slot: TrackSlot) -> &[VocalSegment] {
        &self.state(slot).segments
    }

    #[must_use]
    pub fn beats(&self, slot: TrackSlot) -> &[f64] {
        &self.state(slot).beats
    }

    #[must_use]
    pub fn config(&self) -> &BlendConfig {
        &self.config
    }

    #[must_use]
    pub fn pair_key(&self) -> PairKey {
        PairKey::new(self.tracks[0].id(), self.tracks[1].id())
    }

    #[must_use]
    pub fn both_vocal(&self) -> bool {
        self.tracks
            .iter()
            .all(|state| state.track.metadata.kind == TrackKind::Vocal)
    }

    /// Session header shown when the shell starts.
    #[must_use]
    pub fn banner(&self) -> String {
        let mut lines = vec!["=== Blend Shell ===".to_string()];
        for slot in TrackSlot::BOTH {
            let metadata = &self.track(slot).metadata;
            lines.push(format!("Track {slot}: {} ({})", metadata.id, metadata.kind));
            match (metadata.bpm, metadata.key.as_deref()) {
                (Some(bpm), Some(key)) => lines.push(format!("  {bpm:.1} BPM, {key}")),
                (None, None) => lines.push(format!("  Warning: no BPM/key metadata for {}", metadata.id)),
                (Some(bpm), None) => lines.push(format!("  {bpm:.1} BPM, key unknown")),
                (None, Some(key)) => lines.push(format!("  BPM unknown, {key}")),
            }
        }
        lines.join("\n")
    }

    #[instrument(skip(self), fields(slot = %slot))]
    pub fn set_pitch(&mut self, slot: TrackSlot, semitones: i32) -> String {
        let applied = self.state_mut(slot).adjustment.set_pitch(semitones);
        debug!(applied, "pitch set");
        format!("Track {slot} pitch: {applied:+} semitones")
    }

    #[instrument(skip(self), fields(slot = %slot))]
    pub fn set_tempo(&mut self, slot: TrackSlot, percent: f64) -> Result<String, SessionError> {
        ensure_finite("tempo", percent)?;
        let applied = self.state_mut(slot).adjustment.set_tempo(percent);
        debug!(applied, "tempo set");
        Ok(format!("Track {slot} tempo: {applied:+.1}%"))
    }

    #[instrument(skip(self), fields(slot = %slot))]
    pub fn set_volume(&mut self, slot: TrackSlot, percent: f64) -> Result<String, SessionError> {
        ensure_finite("volume", percent)?;
        let applied = self.state_mut(slot).adjustment.set_volume(percent);
        debug!(applied, "volume set");
        Ok(format!("Track {slot} volume: {applied:.0}%"))
    }

    #[instrument(skip(self))]
    pub fn set_window(&mut self, first: f64, second: f64) -> Result<String, SessionError> {
        ensure_finite("window offset", first)?;
        ensure_finite("window offset", second)?;
        let first = self.state_mut(TrackSlot::One).adjustment.set_window(first);
        let second = self.state_mut(TrackSlot::Two).adjustment.set_window(second);
        Ok(format!(
            "Window offsets: track 1 {first:+.1}s, track 2 {second:+.1}s"
        ))
    }

    fn bpm_pair(&self) -> Option<(f64, f64)> {
        Some((
            self.track(TrackSlot::One).usable_bpm()?,
            self.track(TrackSlot::Two).usable_bpm()?,
        ))
    }

    fn key_pair(&self) -> Option<(String, String)> {
        Some((
            self.track(TrackSlot::One).metadata.key.clone()?,
            self.track(TrackSlot::Two).metadata.key.clone()?,
        ))
    }

    /// Bend the source track's tempo onto the target's BPM and zero the
    /// target's tempo.
    #[instrument(skip(self))]
    pub fn match_bpm(&mut self, direction: MatchDirection) -> Result<String, SessionError> {
        let (source, target) = direction_slots(direction)?;
        let Some(bpms) = self.bpm_pair() else {
            return Err(SessionError::MissingMetadata(
                "BPM data not available for matching".to_string(),
            ));
        };
        let (source_bpm, target_bpm) = match source {
            TrackSlot::One => bpms,
            TrackSlot::Two => (bpms.1, bpms.0),
        };
        let applied = self
            .state_mut(source)
            .adjustment
            .set_tempo(keys::match_bpm(target_bpm, source_bpm));
        self.state_mut(target).adjustment.set_tempo(0.0);
        info!(source = %source, tempo = applied, "bpm matched");
        Ok(format!(
            "Matched track {source} BPM to track {target}: {source_bpm:.1} -> {target_bpm:.1} (tempo {applied:+.1}%)"
        ))
    }

    /// Shift the source track's pitch onto the target's key and zero the
    /// target's pitch.
    #[instrument(skip(self))]
    pub fn match_key(&mut self, direction: MatchDirection) -> Result<String, SessionError> {
        let (source, target) = direction_slots(direction)?;
        let Some(keys) = self.key_pair() else {
            return Err(SessionError::MissingMetadata(
                "Key data not available for matching".to_string(),
            ));
        };
        let (source_key, target_key) = match source {
            TrackSlot::One => keys,
            TrackSlot::Two => (keys.1, keys.0),
        };
        let applied = self
            .state_mut(source)
            .adjustment
            .set_pitch(keys::match_key(&target_key, &source_key));
        self.state_mut(target).adjustment.set_pitch(0);
        info!(source = %source, pitch = applied, "key matched");
        Ok(format!(
            "Matched track {source} key to track {target}: {source_key} -> {target_key} (pitch {applied:+})"
        ))
    }

    /// Apply the requested matches, collecting their output. A dimension
    /// without data reports that instead of failing the whole command.
    fn apply_matches(&mut self, bpm: MatchDirection, key: MatchDirection) -> Vec<String> {
        let mut lines = Vec::new();
        if bpm != MatchDirection::None {
            lines.push(outcome_line(self.match_bpm(bpm)));
        }
        if key != MatchDirection::None {
            lines.push(outcome_line(self.match_key(key)));
        }
        lines
    }

    /// Flip the direction of the last invert.
    ///
    /// With no marker for this pair, reset and match track 2 onto track 1,
    /// recording what was applied. With a marker, reset, apply the opposite
    /// directions and clear the marker so the next invert starts over.
    #[instrument(skip(self))]
    pub fn invert(&mut self) -> Result<String, SessionError> {
        let pair = self.pair_key();
        let previous = self.tools.mementos.load(&pair).map_err(persistence_error)?;
        let mut lines = vec!["Inverting current match state...".to_string()];

        let (bpm, key) = match previous {
            Some(memento) => {
                self.tools.mementos.clear(&pair).map_err(persistence_error)?;
                debug!(?memento, "inverting remembered directions");
                (
                    memento.bpm_match_direction.inverted(),
                    memento.key_match_direction.inverted(),
                )
            }
            None => {
                let memento = InvertMemento {
                    bpm_match_direction: self
                        .bpm_pair()
                        .map_or(MatchDirection::None, |_| MatchDirection::TwoToOne),
                    key_match_direction: self
                        .key_pair()
                        .map_or(MatchDirection::None, |_| MatchDirection::TwoToOne),
                };
                self.tools
                    .mementos
                    .save(&pair, memento)
                    .map_err(persistence_error)?;
                (memento.bpm_match_direction, memento.key_match_direction)
            }
        };

        lines.push(self.reset());
        if bpm == MatchDirection::None && key == MatchDirection::None {
            lines.push("No BPM or key data to match".to_string());
        }
        lines.extend(self.apply_matches(bpm, key));
        info!(?bpm, ?key, "match inverted");
        Ok(lines.join("\n"))
    }

    /// Reset, then match each dimension in whichever direction needs the
    /// smaller change. Ties go track 1 to track 2.
    #[instrument(skip(self))]
    pub fn auto_match(&mut self) -> String {
        let mut lines = vec!["Analyzing tracks for optimal matching...".to_string()];
        lines.push(self.reset());

        let bpm = match self.bpm_pair() {
            Some((bpm1, bpm2)) => {
                let forward = bpm2 / bpm1;
                let backward = bpm1 / bpm2;
                if (forward - 1.0).abs() <= (backward - 1.0).abs() {
                    lines.push(format!(
                        "  BPM: {bpm1:.1} -> {bpm2:.1} (ratio: {forward:.2}x, {:.1}% change)",
                        (forward - 1.0) * 100.0
                    ));
                    MatchDirection::OneToTwo
                } else {
                    lines.push(format!(
                        "  BPM: {bpm2:.1} -> {bpm1:.1} (ratio: {backward:.2}x, {:.1}% change)",
                        (backward - 1.0) * 100.0
                    ));
                    MatchDirection::TwoToOne
                }
            }
            None => {
                lines.push("  BPM: No BPM data available".to_string());
                MatchDirection::None
            }
        };

        let key = match self.key_pair() {
            Some((key1, key2)) => {
                let forward = key_distance(&key1, &key2);
                let backward = key_distance(&key2, &key1);
                if forward.abs() <= backward.abs() {
                    lines.push(format!("  Key: {key1} -> {key2} ({forward:+} semitones)"));
                    MatchDirection::OneToTwo
                } else {
                    lines.push(format!("  Key: {key2} -> {key1} ({backward:+} semitones)"));
                    MatchDirection::TwoToOne
                }
            }
            None => {
                lines.push("  Key: No key data available".to_string());
                MatchDirection::None
            }
        };

        lines.extend(self.apply_matches(bpm, key));
        lines.push("Auto-match complete!".to_string());
        lines.join("\n")
    }

    #[instrument(skip(self))]
    pub fn reset(&mut self) -> String {
        for state in &mut self.tracks {
            state.adjustment.reset();
        }
        debug!("adjustments reset");
        "All adjustments reset to defaults".to_string()
    }

    /// Switch a track to the other stem and re-probe its duration.
    #[instrument(skip(self), fields(slot = %slot, kind = %kind))]
    pub fn set_kind(&mut self, slot: TrackSlot, kind: TrackKind) -> Result<String, SessionError> {
        let input_path = kind.stem_path(&self.config.paths.data_dir, self.state(slot).id());
        if !input_path.is_file() {
            return Err(SessionError::MissingInput(input_path));
        }
        let duration = self.tools.probe.probe_duration(&input_path)?;

        let state = self.state_mut(slot);
        state.track.metadata.kind = kind;
        state.track.metadata.duration_seconds = duration;
        state.track.input_path = input_path;
        state.beats.clear();
        info!(duration, "track type changed");
        Ok(format!("Track {slot} set to {kind}"))
    }

    /// Replace the track's segments with a fresh silence split.
    ///
    /// Segments are numbered from 1 in source order, start inactive, and are
    /// initially placed at their own source time.
    #[instrument(skip(self), fields(slot = %slot))]
    pub fn split(&mut self, slot: TrackSlot) -> Result<String, SessionError> {
        let state = self.state(slot);
        if state.track.metadata.kind != TrackKind::Vocal {
            return Err(SessionError::NotVocal(slot));
        }
        let header = format!(
            "Splitting track {slot} ({}) into vocal segments...",
            state.id()
        );

        let clips = self
            .tools
            .splitter
            .split_by_silence(&state.track.input_path, &state.segments_dir)?;
        if clips.is_empty() {
            return Err(SessionError::Tool(format!(
                "splitter produced no clips for {}",
                state.track.input_path.display()
            )));
        }

        let mut segments = Vec::with_capacity(clips.len());
        let mut source_start = 0.0;
        for (position, clip_path) in clips.into_iter().enumerate() {
            let source_duration = self.tools.probe.probe_duration(&clip_path)?;
            debug!(clip = %clip_path.display(), source_start, source_duration, "segment probed");
            segments.push(VocalSegment {
                index: position + 1,
                source_start,
                source_duration,
                placement: source_start,
                active: false,
                clip_path,
                clip_start: source_start,
                energy: None,
            });
            source_start += source_duration;
        }

        let count = segments.len();
        self.state_mut(slot).segments = segments;
        info!(count, "track split into segments");
        Ok(format!(
            "{header}\nSuccessfully split track {slot} into {count} segments"
        ))
    }

    #[must_use]
    pub fn list_segments(&self, selection: Option<TrackSlot>) -> String {
        let slots = selection.map_or_else(|| TrackSlot::BOTH.to_vec(), |slot| vec![slot]);
        let mut lines = Vec::new();
        for slot in slots {
            let segments = self.segments(slot);
            lines.push(format!("Track {slot} segments: {} total", segments.len()));
            for segment in segments {
                let mut status = if segment.active {
                    format!("active at {:.2}s", segment.placement)
                } else {
                    "inactive".to_string()
                };
                if let Some(energy) = segment.energy {
                    status.push_str(&format!(", {} energy", energy.category.label()));
                }
                lines.push(format!(
                    "  {slot}:{} - {:.2}s to {:.2}s ({status})",
                    segment.index,
                    segment.source_start,
                    segment.source_start + segment.source_duration
                ));
            }
        }
        lines.join("\n")
    }

    fn segment_position(&self, segment: SegmentRef) -> Result<usize, SessionError> {
        let segments = self.segments(segment.slot);
        if segments.is_empty() {
            return Err(SessionError::NoSegments(segment.slot));
        }
        segments
            .iter()
            .position(|candidate| candidate.index == segment.index)
            .ok_or(SessionError::UnknownSegment {
                segment,
                available: segments.len(),
            })
    }

    fn segment_mut(&mut self, segment: SegmentRef) -> Result<&mut VocalSegment, SessionError> {
        let position = self.segment_position(segment)?;
        Ok(&mut self.state_mut(segment.slot).segments[position])
    }

    #[instrument(skip(self), fields(segment = %segment))]
    pub fn place(&mut self, segment: SegmentRef, time: f64) -> Result<String, SessionError> {
        ensure_finite("placement", time)?;
        if time < 0.0 {
            return Err(SessionError::InvalidArgument(format!(
                "placement must not be negative, got {time}"
            )));
        }
        placement::place(self.segment_mut(segment)?, time);
        Ok(format!("Segment {segment} placed at {time:.2}s and activated"))
    }

    #[instrument(skip(self), fields(segment = %segment))]
    pub fn shift(&mut self, segment: SegmentRef, delta: f64) -> Result<String, SessionError> {
        ensure_finite("shift", delta)?;
        let target = self.segment_mut(segment)?;
        let before = target.placement;
        placement::shift(target, delta);
        let after = target.placement;
        Ok(format!(
            "Segment {segment} shifted from {before:.2}s to {after:.2}s ({:+.2}s)",
            after - before
        ))
    }

    #[instrument(skip(self), fields(segment = %segment))]
    pub fn toggle(&mut self, segment: SegmentRef) -> Result<String, SessionError> {
        let active = placement::toggle(self.segment_mut(segment)?);
        Ok(format!(
            "Segment {segment} is now {}",
            if active { "active" } else { "inactive" }
        ))
    }

    /// Scatter the track's segments over the other track with no collision
    /// checks.
    #[instrument(skip(self), fields(slot = %slot))]
    pub fn random_place(&mut self, slot: TrackSlot) -> Result<String, SessionError> {
        if self.segments(slot).is_empty() {
            return Err(SessionError::NoSegments(slot));
        }
        let target_duration = self.track(slot.other()).duration();
        let Self { tracks, rng, .. } = self;
        let state = &mut tracks[slot.index()];
        placement::random_place(&mut state.segments, target_duration, rng);

        let mut lines = vec![format!(
            "Randomly placing {} segments from track {slot} ({}) across {:.1}s...",
            state.segments.len(),
            state.id(),
            target_duration * PLACEMENT_SPAN_RATIO
        )];
        lines.extend(state.segments.iter().map(|segment| {
            format!("  {slot}:{} placed at {:.1}s", segment.index, segment.placement)
        }));
        info!(count = state.segments.len(), "segments randomly placed");
        Ok(lines.join("\n"))
    }

    /// Beat-aligned, collision-avoiding placement onto the other track.
    #[instrument(skip(self), fields(slot = %slot))]
    pub fn smart_random_place(&mut self, slot: TrackSlot) -> Result<String, SessionError> {
        if self.segments(slot).is_empty() {
            return Err(SessionError::NoSegments(slot));
        }
        let target_slot = slot.other();
        if self.beats(target_slot).is_empty() {
            return Err(SessionError::NoBeats(target_slot));
        }
        let both_vocal = self.both_vocal();

        let Self { tracks, rng, .. } = self;
        let [one, two] = tracks;
        let (source, target) = match slot {
            TrackSlot::One => (one, &*two),
            TrackSlot::Two => (two, &*one),
        };
        let mut lines = vec![format!(
            "Smart-placing {} segments from track {slot} ({}) with beat alignment and collision avoidance...",
            source.segments.len(),
            source.id()
        )];
        let outcome = placement::smart_random_place(
            &mut source.segments,
            &target.beats,
            target.track.duration(),
            &target.segments,
            both_vocal,
            rng,
        );

        if outcome.usable_beats == 0 {
            lines.push("No usable beats found in target time range".to_string());
        } else {
            lines.push(format!(
                "Found {} usable beats in {:.1}s timeframe",
                outcome.usable_beats, outcome.usable_window
            ));
        }
        for placed in &outcome.placed {
            lines.push(format!(
                "  {slot}:{} placed at {:.2}s (beat {})",
                placed.index, placed.placement, placed.beat_number
            ));
        }
        for unplaced in &outcome.unplaced {
            lines.push(format!(
                "  {slot}:{} could not be placed after {} attempts",
                unplaced.index, unplaced.attempts
            ));
        }
        lines.push(format!(
            "Smart-random placement complete: {}/{} segments placed successfully",
            outcome.placed.len(),
            source.segments.len()
        ));
        if !outcome.all_placed() {
            lines.push(format!(
                "Tip: use 'gap-finder {target_slot}' to look for open space on track {target_slot}"
            ));
        }
        info!(
            placed = outcome.placed.len(),
            unplaced = outcome.unplaced.len(),
            "smart placement applied"
        );
        Ok(lines.join("\n"))
    }

    fn onset_detector(&self) -> Option<&dyn OnsetDetector> {
        self.tools.onsets.as_deref()
    }

    /// Detect beats for the selected tracks, falling back to the BPM grid.
    #[instrument(skip(self))]
    pub fn detect_beats(&mut self, selection: TrackSelection) -> String {
        let mut lines = Vec::new();
        for slot in selection.slots() {
            let state = self.state(slot);
            lines.push(format!("Detecting beats in track {slot} ({})...", state.id()));
            let detection = detect_beats(
                self.onset_detector(),
                &state.track.input_path,
                state.track.usable_bpm(),
                state.track.duration(),
            );
            let count = detection.beats.len();
            lines.push(match detection.source {
                BeatSource::Onsets => format!("Detected {count} beats in track {slot}"),
                BeatSource::Synthesized => format!(
                    "Generated {count} beats in track {slot} from {:.1} BPM",
                    state.track.usable_bpm().unwrap_or_default()
                ),
                BeatSource::Unavailable => {
                    warn!(slot = %slot, "no onsets and no bpm, beat list is empty");
                    format!("No beats for track {slot}: onset detection unavailable and no BPM metadata")
                }
            });
            self.state_mut(slot).beats = detection.beats;
        }
        lines.join("\n")
    }

    #[must_use]
    pub fn list_beats(&self, selection: Option<TrackSlot>) -> String {
        let mut lines = Vec::new();
        match selection {
            None => {
                for slot in TrackSlot::BOTH {
                    let beats = self.beats(slot);
                    lines.push(format!("Track {slot} beats: {} total", beats.len()));
                    if beats.is_empty() {
                        continue;
                    }
                    let preview = beats
                        .iter()
                        .take(BEAT_PREVIEW_COUNT)
                        .map(|beat| format!("{beat:.1}s"))
                        .collect::<Vec<_>>()
                        .join(" ");
                    lines.push(format!("  First {BEAT_PREVIEW_COUNT} beats: {preview}"));
                    if beats.len() > BEAT_PREVIEW_COUNT {
                        lines.push(format!(
                            "  ... and {} more",
                            beats.len() - BEAT_PREVIEW_COUNT
                        ));
                    }
                }
            }
            Some(slot) => {
                let beats = self.beats(slot);
                lines.push(format!("Track {slot} beats: {} total", beats.len()));
                lines.extend(
                    beats
                        .iter()
                        .enumerate()
                        .map(|(number, beat)| format!("  Beat {}: {beat:.2}s", number + 1)),
                );
            }
        }
        lines.join("\n")
    }

    /// Low-energy windows of a track, for choosing where vocals can go.
    #[instrument(skip(self), fields(slot = %slot))]
    pub fn gap_report(&self, slot: TrackSlot) -> Result<GapReport, SessionError> {
        let track = self.track(slot);
        let levels = self.tools.loudness.window_levels_db(
            &track.input_path,
            None,
            GAP_WINDOW_SECONDS,
        )?;
        let report = GapReport::from_levels_db(&levels, track.duration());
        info!(gaps = report.gaps.len(), threshold = report.threshold, "gap analysis finished");
        Ok(report)
    }

    pub fn find_gaps(&self, slot: TrackSlot) -> Result<String, SessionError> {
        let report = self.gap_report(slot)?;
        Ok(format!(
            "Analyzing track {slot} ({}) for vocal gaps...\n{}",
            self.state(slot).id(),
            report.render_text(&format!("track {slot}"))
        ))
    }

    /// Trim silent edges off every segment of the selected tracks.
    ///
    /// Every clip is analysed before any segment changes; a loudness failure
    /// aborts the whole command. Clips missing on disk are skipped.
    #[instrument(skip(self))]
    pub fn trim_segments(&mut self, selection: TrackSelection) -> Result<String, SessionError> {
        let slots = selection.slots();
        if let TrackSelection::Single(slot) = selection {
            if self.segments(slot).is_empty() {
                return Err(SessionError::NoSegments(slot));
            }
        }

        let window_seconds = self.config.trim.window_seconds;
        let silence_db = self.config.trim.silence_db;
        let mut lines = vec!["Auto-trimming silence from segment edges...".to_string()];
        let mut updates = Vec::new();

        for slot in &slots {
            let state = self.state(*slot);
            if state.segments.is_empty() {
                lines.push(format!(
                    "No segments found for track {slot}. Run 'split {slot}' first."
                ));
                continue;
            }
            lines.push(format!(
                "Trimming {} segments for track {slot} ({})...",
                state.segments.len(),
                state.id()
            ));

            let mut trimmed = 0_usize;
            let mut saved = 0.0;
            for (position, segment) in state.segments.iter().enumerate() {
                if !segment.clip_path.is_file() {
                    lines.push(format!("  Segment {}: File not found, skipping", segment.index));
                    continue;
                }
                let levels = self.tools.loudness.window_levels_db(
                    &segment.clip_path,
                    Some(Span {
                        start: segment.clip_offset(),
                        duration: segment.source_duration,
                    }),
                    window_seconds,
                )?;
                let edges = edge_silence(&levels, window_seconds, silence_db);
                if !edges.is_actionable() {
                    lines.push(format!(
                        "  Segment {}: No significant silence detected (< {MIN_EDGE_TRIM_SECONDS:.1}s)",
                        segment.index
                    ));
                    continue;
                }
                let new_duration = segment.source_duration - edges.total();
                if new_duration < MIN_TRIMMED_DURATION_SECONDS {
                    lines.push(format!(
                        "  Segment {}: Would be too short after trimming, skipping",
                        segment.index
                    ));
                    continue;
                }
                lines.push(format!(
                    "  Segment {}: Trimmed {:.2}s start + {:.2}s end = {:.2}s saved ({:.1}s -> {new_duration:.1}s)",
                    segment.index,
                    edges.leading,
                    edges.trailing,
                    edges.total(),
                    segment.source_duration
                ));
                updates.push((*slot, position, edges.leading, new_duration));
                trimmed += 1;
                saved += edges.total();
            }
            lines.push(format!(
                "Track {slot} trimming complete: {trimmed}/{} segments trimmed, {saved:.2}s total time saved",
                state.segments.len()
            ));
        }

        for (slot, position, leading, new_duration) in &updates {
            let segment = &mut self.state_mut(*slot).segments[*position];
            segment.source_start += leading;
            segment.source_duration = *new_duration;
        }
        info!(trimmed = updates.len(), "segment trim applied");
        Ok(lines.join("\n"))
    }

    /// Tag each segment with its mean energy and a low/medium/high category
    /// relative to the track's other segments.
    #[instrument(skip(self), fields(slot = %slot))]
    pub fn analyze_segments(&mut self, slot: TrackSlot) -> Result<String, SessionError> {
        let state = self.state(slot);
        if state.segments.is_empty() {
            return Err(SessionError::NoSegments(slot));
        }

        let mut levels = Vec::with_capacity(state.segments.len());
        for (position, segment) in state.segments.iter().enumerate() {
            if !segment.clip_path.is_file() {
                debug!(index = segment.index, "segment clip missing, not analysed");
                continue;
            }
            let windows = self.tools.loudness.window_levels_db(
                &segment.clip_path,
                Some(Span {
                    start: segment.clip_offset(),
                    duration: segment.source_duration,
                }),
                GAP_WINDOW_SECONDS,
            )?;
            if let Some(level) = mean_energy(&windows) {
                levels.push((position, level));
            }
        }

        let values = levels.iter().map(|(_, level)| *level).collect::<Vec<_>>();
        let thresholds = tertile_thresholds(&values);
        let mut lines = vec![format!(
            "Segment energy for track {slot} ({}), thresholds {:.3}/{:.3}:",
            state.id(),
            thresholds.0,
            thresholds.1
        )];
        let state = self.state_mut(slot);
        for (position, level) in levels {
            let segment = &mut state.segments[position];
            let category = categorize_energy(level, thresholds);
            segment.energy = Some(SegmentEnergy { level, category });
            lines.push(format!(
                "  {slot}:{} - energy {level:.3} ({})",
                segment.index,
                category.label()
            ));
        }
        let analysed = lines.len() - 1;
        if analysed < state.segments.len() {
            lines.push(format!(
                "{} segments skipped (clip file missing or empty)",
                state.segments.len() - analysed
            ));
        }
        Ok(lines.join("\n"))
    }

    /// Overlapping active segments, within and across tracks.
    #[must_use]
    pub fn conflict_report(&self) -> String {
        let active = self.tracks.iter().map(TrackState::active_segments).sum::<usize>();
        if active == 0 {
            return "No active segments to analyze. Use 'place' or 'random' to activate segments first."
                .to_string();
        }

        let findings = placement::find_overlaps(
            self.segments(TrackSlot::One),
            self.segments(TrackSlot::Two),
            self.both_vocal(),
        );
        let mut lines = vec![format!("Checking {active} active segments...")];
        let mut conflicts = 0;
        for finding in &findings {
            let (first_slot, first_index) = finding.first;
            let (second_slot, second_index) = finding.second;
            let label = match finding.severity {
                OverlapSeverity::Conflict => {
                    conflicts += 1;
                    "CONFLICT"
                }
                OverlapSeverity::Warning => "WARNING",
            };
            lines.push(format!(
                "  {label}: segments {first_slot}:{first_index} and {second_slot}:{second_index} overlap by {:.1}s",
                finding.overlap_seconds
            ));
        }
        let warnings = findings.len() - conflicts;

        if conflicts > 0 {
            lines.push(format!(
                "{conflicts} CONFLICTS found (segments overlap problematically)"
            ));
        } else {
            lines.push("No conflicts detected - segments are well spaced".to_string());
        }
        if warnings > 0 {
            lines.push(format!(
                "{warnings} warnings (vocal over instrumental overlaps)"
            ));
        }
        if !findings.is_empty() {
            lines.push("Suggestions:".to_string());
            lines.push("  - Use 'place' or 'shift' to reposition conflicting segments".to_string());
            lines.push("  - Use 'gap-finder' to find better placement spots".to_string());
            lines.push("  - Consider shorter segments ('segment-trim')".to_string());
        }
        lines.join("\n")
    }

    #[must_use]
    pub fn status(&self) -> String {
        let mut lines = vec!["--- Current Settings ---".to_string()];
        for slot in TrackSlot::BOTH {
            let state = self.state(slot);
            let adjustment = &state.adjustment;
            let metadata = &state.track.metadata;
            lines.push(format!(
                "Track {slot} ({} {}): pitch {:+}, tempo {:+.1}%, volume {:.0}%, window {:+.1}s",
                metadata.id,
                metadata.kind,
                adjustment.pitch_semitones(),
                adjustment.tempo_percent(),
                adjustment.volume_percent(),
                adjustment.window_offset_seconds()
            ));
            if let (Some(bpm), Some(key)) = (metadata.bpm, metadata.key.as_deref()) {
                lines.push(format!(
                    "  Effective: {:.1} BPM, {} (was {bpm:.1} BPM, {key})",
                    effective_bpm(bpm, adjustment.tempo_percent()),
                    effective_key(key, adjustment.pitch_semitones())
                ));
            }
        }
        let [one, two] = &self.tracks;
        if !one.segments.is_empty() || !two.segments.is_empty() {
            lines.push(format!(
                "Segments: Track 1: {}/{} active, Track 2: {}/{} active",
                one.active_segments(),
                one.segments.len(),
                two.active_segments(),
                two.segments.len()
            ));
        }
        lines.join("\n")
    }

    /// Frozen copy of everything a render reads.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let track_snapshot = |slot: TrackSlot| {
            let state = self.state(slot);
            TrackSnapshot {
                slot,
                id: state.id().to_string(),
                kind: state.track.metadata.kind,
                input_path: state.track.input_path.clone(),
                duration_seconds: state.track.duration(),
                adjustment: state.adjustment,
                segments: state.segments.clone(),
            }
        };
        SessionSnapshot {
            tracks: [track_snapshot(TrackSlot::One), track_snapshot(TrackSlot::Two)],
        }
    }

    /// Live and mixdown plans from a single snapshot, the mixdown writing to a
    /// fresh timestamped file.
    #[instrument(skip(self))]
    pub fn plans(&self, start: Option<f64>) -> Result<(RenderPlan, MixdownPlan), SessionError> {
        if let Some(start) = start {
            ensure_finite("start position", start)?;
            if start < 0.0 {
                return Err(SessionError::InvalidArgument(format!(
                    "start position must not be negative, got {start}"
                )));
            }
        }
        let output_path = mixdown_output_path(
            &self.config.paths.output_dir,
            self.tracks[0].id(),
            self.tracks[1].id(),
            Utc::now(),
        );
        let (live, mixdown) = build_plans(&self.snapshot(), start, output_path)?;
        debug!(
            fingerprint = %live.fingerprint,
            streams = live.streams.len(),
            "render plans built"
        );
        Ok((live, mixdown))
    }

    /// Single-stream plan for auditioning one segment.
    #[instrument(skip(self), fields(segment = %segment))]
    pub fn preview(&self, segment: SegmentRef) -> Result<RenderPlan, SessionError> {
        let position = self.segment_position(segment)?;
        let target = &self.segments(segment.slot)[position];
        if !target.clip_path.is_file() {
            return Err(SessionError::Tool(format!(
                "segment file not found: {}",
                target.clip_path.display()
            )));
        }
        Ok(preview_plan(segment.slot, target))
    }
}

fn load_track(
    data_dir: &Path,
    id: &str,
    kind: TrackKind,
    probe: &dyn DurationProbe,
) -> Result<Track, SessionError> {
    let input_path = kind.stem_path(data_dir, id);
    if !input_path.is_file() {
        return Err(SessionError::MissingInput(input_path));
    }
    let duration_seconds = probe.probe_duration(&input_path)?;
    let record = read_analysis_record(data_dir, id);
    Ok(Track {
        metadata: TrackMetadata {
            id: id.to_string(),
            kind,
            duration_seconds,
            bpm: record.bpm,
            key: record.key,
        },
        input_path,
    })
}

fn read_analysis_record(data_dir: &Path, id: &str) -> AnalysisRecord {
    let path = analysis_record_path(data_dir, id);
    match load_analysis_record(&path) {
        Ok(record) => record,
        Err(error) => {
            warn!(id, error = %error, "no usable track metadata");
            AnalysisRecord::default()
        }
    }
}

fn direction_slots(direction: MatchDirection) -> Result<(TrackSlot, TrackSlot), SessionError> {
    match direction {
        MatchDirection::OneToTwo => Ok((TrackSlot::One, TrackSlot::Two)),
        MatchDirection::TwoToOne => Ok((TrackSlot::Two, TrackSlot::One)),
        MatchDirection::None => Err(SessionError::InvalidArgument(
            "match direction is required".to_string(),
        )),
    }
}

fn outcome_line(result: Result<String, SessionError>) -> String {
    result.unwrap_or_else(|error| error.to_string())
}

fn ensure_finite(name: &str, value: f64) -> Result<(), SessionError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SessionError::InvalidArgument(format!(
            "{name} must be a finite number"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOTH: StemAvailability = StemAvailability {
        vocal: true,
        instrumental: true,
    };
    const VOCAL_ONLY: StemAvailability = StemAvailability {
        vocal: true,
        instrumental: false,
    };
    const INSTRUMENTAL_ONLY: StemAvailability = StemAvailability {
        vocal: false,
        instrumental: true,
    };
    const NEITHER: StemAvailability = StemAvailability {
        vocal: false,
        instrumental: false,
    };

    #[test]
    fn instrumental_only_track_pushes_partner_to_vocal() {
        assert_eq!(
            choose_track_kinds(BOTH, INSTRUMENTAL_ONLY),
            (TrackKind::Vocal, TrackKind::Instrumental)
        );
        assert_eq!(
            choose_track_kinds(INSTRUMENTAL_ONLY, BOTH),
            (TrackKind::Instrumental, TrackKind::Vocal)
        );
        assert_eq!(
            choose_track_kinds(INSTRUMENTAL_ONLY, INSTRUMENTAL_ONLY),
            (TrackKind::Instrumental, TrackKind::Instrumental)
        );
    }

    #[test]
    fn both_stems_default_to_complementary_types() {
        assert_eq!(
            choose_track_kinds(BOTH, BOTH),
            (TrackKind::Vocal, TrackKind::Instrumental)
        );
        assert_eq!(
            choose_track_kinds(NEITHER, BOTH),
            (TrackKind::Instrumental, TrackKind::Vocal)
        );
        assert_eq!(
            choose_track_kinds(VOCAL_ONLY, VOCAL_ONLY),
            (TrackKind::Vocal, TrackKind::Vocal)
        );
        assert_eq!(
            choose_track_kinds(NEITHER, NEITHER),
            (TrackKind::Instrumental, TrackKind::Instrumental)
        );
    }

    #[test]
    fn direction_none_is_rejected() {
        assert!(matches!(
            direction_slots(MatchDirection::None),
            Err(SessionError::InvalidArgument(_))
        ));
        assert_eq!(
            direction_slots(MatchDirection::TwoToOne),
            Ok((TrackSlot::Two, TrackSlot::One))
        );
    }

    #[test]
    fn error_messages_name_the_fix() {
        assert_eq!(
            SessionError::NotVocal(TrackSlot::Two).to_string(),
            "track 2 is not vocal type. Switch to vocal first using 'type2 vocal'"
        );
        let unknown = SessionError::UnknownSegment {
            segment: SegmentRef {
                slot: TrackSlot::One,
                index: 9,
            },
            available: 4,
        };
        assert_eq!(
            unknown.to_string(),
            "segment 1:9 not found; track 1 has 4 segments"
        );
    }
}
