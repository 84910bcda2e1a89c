//! Deterministic tracks and in-memory collaborators for tests and dry runs.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use anyhow::{Result, anyhow, bail};
use tokio::time::sleep;

use crate::{
    config::BlendConfig,
    model::{Track, TrackKind, TrackMetadata},
    persistence::MemoryMementoStore,
    playback::{CancelToken, RenderBackend},
    render::{MixdownPlan, PlannedStream},
    session::{BlendSession, Collaborators},
    tools::{
        DurationProbe, LoudnessAnalyzer, OnsetDetector, SegmentSplitter, Span, part_file_name,
    },
};

pub const FIXTURE_SEED: u64 = 0x5eed;

#[must_use]
pub fn fixture_track(
    id: &str,
    kind: TrackKind,
    duration_seconds: f64,
    bpm: Option<f64>,
    key: Option<&str>,
) -> Track {
    Track {
        metadata: TrackMetadata {
            id: id.to_string(),
            kind,
            duration_seconds,
            bpm,
            key: key.map(str::to_string),
        },
        input_path: kind.stem_path(Path::new("data"), id),
    }
}

/// A 180 s, 120 BPM vocal in C major against a 200 s, 128 BPM instrumental
/// in G major.
#[must_use]
pub fn demo_tracks() -> (Track, Track) {
    (
        fixture_track("alpha", TrackKind::Vocal, 180.0, Some(120.0), Some("C major")),
        fixture_track(
            "beta",
            TrackKind::Instrumental,
            200.0,
            Some(128.0),
            Some("G major"),
        ),
    )
}

#[must_use]
pub fn demo_config() -> BlendConfig {
    let mut config = BlendConfig::default();
    config.placement.seed = Some(FIXTURE_SEED);
    config
}

/// Fixture tools: every clip probes as 4 s, the splitter yields three
/// clips, loudness is a flat -20 dB, no onset detector.
#[must_use]
pub fn fixture_collaborators() -> Collaborators {
    Collaborators {
        probe: Box::new(FixtureProbe::default().with_fallback(4.0)),
        splitter: Box::new(FixtureSplitter::new(3)),
        loudness: Box::new(FixtureLoudness::flat(-20.0)),
        onsets: None,
        mementos: Box::new(MemoryMementoStore::default()),
    }
}

#[must_use]
pub fn demo_session() -> BlendSession {
    let (first, second) = demo_tracks();
    BlendSession::from_tracks(first, second, demo_config(), fixture_collaborators())
}

/// Durations keyed by file name.
#[derive(Debug, Default)]
pub struct FixtureProbe {
    durations: HashMap<String, f64>,
    fallback: Option<f64>,
}

impl FixtureProbe {
    #[must_use]
    pub fn with_duration(mut self, file_name: &str, seconds: f64) -> Self {
        self.durations.insert(file_name.to_string(), seconds);
        self
    }

    #[must_use]
    pub fn with_fallback(mut self, seconds: f64) -> Self {
        self.fallback = Some(seconds);
        self
    }
}

impl DurationProbe for FixtureProbe {
    fn probe_duration(&self, path: &Path) -> Result<f64> {
        let name = file_name(path);
        match self.durations.get(&name).copied().or(self.fallback) {
            Some(seconds) => Ok(seconds),
            None => bail!("no fixture duration for {name}"),
        }
    }
}

/// Produces `part_NNN.wav` paths without touching audio.
#[derive(Debug)]
pub struct FixtureSplitter {
    clips: usize,
    write_files: bool,
    fail: bool,
}

impl FixtureSplitter {
    #[must_use]
    pub fn new(clips: usize) -> Self {
        Self {
            clips,
            write_files: false,
            fail: false,
        }
    }

    /// Also create empty clip files so on-disk checks pass.
    #[must_use]
    pub fn writing_files(mut self) -> Self {
        self.write_files = true;
        self
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            clips: 0,
            write_files: false,
            fail: true,
        }
    }
}

impl SegmentSplitter for FixtureSplitter {
    fn split_by_silence(&self, input: &Path, output_dir: &Path) -> Result<Vec<PathBuf>> {
        if self.fail {
            bail!("fixture splitter refused {}", input.display());
        }
        if self.write_files {
            fs::create_dir_all(output_dir)?;
        }
        (0..self.clips)
            .map(|index| {
                let path = output_dir.join(part_file_name(index));
                if self.write_files {
                    fs::write(&path, b"")?;
                }
                Ok(path)
            })
            .collect()
    }
}

/// Window levels keyed by file name, with a default profile.
#[derive(Debug, Default)]
pub struct FixtureLoudness {
    levels: HashMap<String, Vec<f64>>,
    default_levels: Vec<f64>,
    fail: bool,
}

impl FixtureLoudness {
    #[must_use]
    pub fn flat(level_db: f64) -> Self {
        Self {
            default_levels: vec![level_db; 8],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_levels(mut self, file_name: &str, levels_db: Vec<f64>) -> Self {
        self.levels.insert(file_name.to_string(), levels_db);
        self
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

impl LoudnessAnalyzer for FixtureLoudness {
    fn window_levels_db(
        &self,
        path: &Path,
        _span: Option<Span>,
        _window_seconds: f64,
    ) -> Result<Vec<f64>> {
        if self.fail {
            bail!("fixture loudness refused {}", path.display());
        }
        Ok(self
            .levels
            .get(&file_name(path))
            .unwrap_or(&self.default_levels)
            .clone())
    }
}

#[derive(Debug)]
pub struct FixtureOnsets(pub Option<Vec<f64>>);

impl OnsetDetector for FixtureOnsets {
    fn detect_onsets(&self, path: &Path) -> Result<Vec<f64>> {
        self.0
            .clone()
            .ok_or_else(|| anyhow!("fixture onset detector has nothing for {}", path.display()))
    }
}

/// Records what it was asked to play. Streams run for their duration (or
/// until cancelled); the recorder runs until cancelled.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    started: Mutex<Vec<String>>,
    recorded: Mutex<Vec<PathBuf>>,
}

impl RecordingBackend {
    #[must_use]
    pub fn started(&self) -> Vec<String> {
        self.started
            .lock()
            .expect("fixture backend lock should not be poisoned")
            .clone()
    }

    #[must_use]
    pub fn recorded(&self) -> Vec<PathBuf> {
        self.recorded
            .lock()
            .expect("fixture backend lock should not be poisoned")
            .clone()
    }
}

impl RenderBackend for RecordingBackend {
    async fn play_stream(&self, stream: PlannedStream, cancel: CancelToken) -> Result<()> {
        self.started
            .lock()
            .expect("fixture backend lock should not be poisoned")
            .push(stream.label());
        let length = Duration::try_from_secs_f64(stream.duration_seconds).unwrap_or_default();
        tokio::select! {
            () = sleep(length) => {}
            () = cancel.cancelled() => {}
        }
        Ok(())
    }

    async fn record_mixdown(&self, plan: MixdownPlan, cancel: CancelToken) -> Result<()> {
        self.recorded
            .lock()
            .expect("fixture backend lock should not be poisoned")
            .push(plan.output_path.clone());
        cancel.cancelled().await;
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
