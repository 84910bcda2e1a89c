//! Collaborator contracts for the external media tools and their default
//! implementations.
//!
//! The session only talks to these traits; tests substitute in-memory fakes.
//! The defaults shell out to `ffmpeg`/`ffprobe`/`aubioonset` and use
//! symphonia for container-level duration probing.

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    process::{Command, Output},
};

use anyhow::{Context, Result, anyhow, bail};
use symphonia::core::{
    formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

const ANALYSIS_SAMPLE_RATE: u32 = 44_100;
/// Level reported by astats for digital silence.
pub const SILENCE_FLOOR_DB: f64 = -120.0;

pub trait DurationProbe: Send + Sync {
    fn probe_duration(&self, path: &Path) -> Result<f64>;
}

pub trait SegmentSplitter: Send + Sync {
    /// Split `input` at silence gaps into numbered, contiguous clip files under
    /// `output_dir`, returned in source order. No silence yields one clip.
    fn split_by_silence(&self, input: &Path, output_dir: &Path) -> Result<Vec<PathBuf>>;
}

/// Sub-range of a file to analyse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub start: f64,
    pub duration: f64,
}

pub trait LoudnessAnalyzer: Send + Sync {
    /// RMS level in dB for each consecutive window of `window_seconds`.
    fn window_levels_db(&self, path: &Path, span: Option<Span>, window_seconds: f64)
    -> Result<Vec<f64>>;
}

pub trait OnsetDetector: Send + Sync {
    fn detect_onsets(&self, path: &Path) -> Result<Vec<f64>>;
}

/// Symphonia first (no decoding, container metadata only), `ffprobe` second.
#[derive(Debug, Clone)]
pub struct MediaProbe {
    ffprobe: PathBuf,
}

impl MediaProbe {
    #[must_use]
    pub fn new(ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
        }
    }

    fn probe_with_ffprobe(&self, path: &Path) -> Result<f64> {
        let output = run_tool(
            Command::new(&self.ffprobe)
                .args(["-v", "quiet", "-show_entries", "format=duration", "-of", "csv=p=0"])
                .arg(path),
        )?;
        let text = String::from_utf8_lossy(&output.stdout);
        let duration = text
            .trim()
            .parse::<f64>()
            .with_context(|| format!("ffprobe returned no duration for {}", path.display()))?;
        if !duration.is_finite() || duration < 0.0 {
            bail!("ffprobe returned an invalid duration for {}", path.display());
        }
        Ok(duration)
    }
}

impl DurationProbe for MediaProbe {
    #[instrument(skip(self), fields(path = %path.display()))]
    fn probe_duration(&self, path: &Path) -> Result<f64> {
        match probe_duration_with_symphonia(path) {
            Ok(duration) => Ok(duration),
            Err(error) => {
                debug!(error = %error, "container probe failed, asking ffprobe");
                self.probe_with_ffprobe(path)
            }
        }
    }
}

/// Duration from the default track's frame count and sample rate.
pub fn probe_duration_with_symphonia(path: &Path) -> Result<f64> {
    let file = File::open(path)
        .with_context(|| format!("failed to open audio file: {}", path.display()))?;
    let source = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|value| value.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("unrecognised audio container: {}", path.display()))?;
    let track = probed
        .format
        .default_track()
        .ok_or_else(|| anyhow!("no default audio track found in {}", path.display()))?;

    let frames = track
        .codec_params
        .n_frames
        .ok_or_else(|| anyhow!("frame count unknown for {}", path.display()))?;
    let sample_rate = track
        .codec_params
        .sample_rate
        .filter(|rate| *rate > 0)
        .ok_or_else(|| anyhow!("sample rate unknown for {}", path.display()))?;

    #[allow(clippy::cast_precision_loss)]
    Ok(frames as f64 / f64::from(sample_rate))
}

#[derive(Debug, Clone)]
pub struct FfmpegSplitter {
    ffmpeg: PathBuf,
    noise_db: f64,
    min_silence_seconds: f64,
}

impl FfmpegSplitter {
    #[must_use]
    pub fn new(ffmpeg: impl Into<PathBuf>, noise_db: f64, min_silence_seconds: f64) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            noise_db,
            min_silence_seconds,
        }
    }
}

impl SegmentSplitter for FfmpegSplitter {
    #[instrument(skip(self), fields(input = %input.display(), output_dir = %output_dir.display()))]
    fn split_by_silence(&self, input: &Path, output_dir: &Path) -> Result<Vec<PathBuf>> {
        if !input.is_file() {
            bail!("input file not found: {}", input.display());
        }
        fs::create_dir_all(output_dir).with_context(|| {
            format!("failed to create segment directory: {}", output_dir.display())
        })?;
        // Existing clips stay in place until the new set is complete.
        let staging = tempfile::Builder::new()
            .prefix(".split-")
            .tempdir_in(output_dir)
            .with_context(|| {
                format!("failed to create staging directory in {}", output_dir.display())
            })?;
        let staged = self.split_into(input, staging.path())?;

        remove_part_files(output_dir)?;
        let mut parts = Vec::with_capacity(staged.len());
        for source in staged {
            let target = output_dir.join(source.file_name().ok_or_else(|| {
                anyhow!("staged clip has no file name: {}", source.display())
            })?);
            fs::rename(&source, &target).with_context(|| {
                format!("failed to move {} to {}", source.display(), target.display())
            })?;
            parts.push(target);
        }
        debug!(clips = parts.len(), "segment clips replaced");
        Ok(parts)
    }
}

impl FfmpegSplitter {
    fn split_into(&self, input: &Path, staging: &Path) -> Result<Vec<PathBuf>> {
        let detect = run_tool(
            Command::new(&self.ffmpeg)
                .arg("-hide_banner")
                .arg("-i")
                .arg(input)
                .arg("-af")
                .arg(format!(
                    "silencedetect=noise={}dB:d={}",
                    self.noise_db, self.min_silence_seconds
                ))
                .args(["-f", "null", "-"]),
        )?;
        let split_points = parse_silence_ends(&String::from_utf8_lossy(&detect.stderr));
        debug!(count = split_points.len(), "silence boundaries detected");

        if split_points.is_empty() {
            let target = staging.join(part_file_name(0));
            fs::copy(input, &target).with_context(|| {
                format!(
                    "failed to copy {} to {}",
                    input.display(),
                    target.display()
                )
            })?;
            return Ok(vec![target]);
        }

        let times = split_points
            .iter()
            .map(|time| format!("{time:.3}"))
            .collect::<Vec<_>>()
            .join(",");
        run_tool(
            Command::new(&self.ffmpeg)
                .args(["-hide_banner", "-y", "-i"])
                .arg(input)
                .args(["-f", "segment", "-segment_times"])
                .arg(times)
                .args(["-reset_timestamps", "1"])
                .arg(staging.join("part_%03d.wav")),
        )?;

        let parts = list_part_files(staging)?;
        if parts.is_empty() {
            bail!("splitter produced no clips in {}", staging.display());
        }
        Ok(parts)
    }
}

#[must_use]
pub fn part_file_name(index: usize) -> String {
    format!("part_{index:03}.wav")
}

/// `part_*.wav` files directly inside `directory`, sorted by name.
pub fn list_part_files(directory: &Path) -> Result<Vec<PathBuf>> {
    let mut parts = Vec::new();
    for entry in WalkDir::new(directory).max_depth(1) {
        let entry = entry
            .with_context(|| format!("failed to list segment directory: {}", directory.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with("part_") && name.ends_with(".wav") {
            parts.push(entry.into_path());
        }
    }
    parts.sort();
    Ok(parts)
}

fn remove_part_files(directory: &Path) -> Result<()> {
    for path in list_part_files(directory)? {
        fs::remove_file(&path)
            .with_context(|| format!("failed to remove stale clip: {}", path.display()))?;
    }
    Ok(())
}

pub(crate) fn parse_silence_ends(log: &str) -> Vec<f64> {
    log.lines()
        .filter_map(|line| line.split_once("silence_end:"))
        .filter_map(|(_, rest)| rest.split_whitespace().next())
        .filter_map(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value > 0.0)
        .collect()
}

#[derive(Debug, Clone)]
pub struct FfmpegLoudness {
    ffmpeg: PathBuf,
}

impl FfmpegLoudness {
    #[must_use]
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }
}

impl LoudnessAnalyzer for FfmpegLoudness {
    #[instrument(skip(self), fields(path = %path.display()))]
    fn window_levels_db(
        &self,
        path: &Path,
        span: Option<Span>,
        window_seconds: f64,
    ) -> Result<Vec<f64>> {
        if !(window_seconds.is_finite() && window_seconds > 0.0) {
            bail!("analysis window must be positive, got {window_seconds}");
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let samples_per_window =
            ((window_seconds * f64::from(ANALYSIS_SAMPLE_RATE)).round() as u64).max(1);

        let mut command = Command::new(&self.ffmpeg);
        command.args(["-hide_banner", "-v", "error"]);
        if let Some(span) = span {
            command.arg("-ss").arg(format!("{:.3}", span.start.max(0.0)));
        }
        command.arg("-i").arg(path);
        if let Some(span) = span {
            command.arg("-t").arg(format!("{:.3}", span.duration.max(0.0)));
        }
        command.arg("-af").arg(format!(
            "aresample={ANALYSIS_SAMPLE_RATE},asetnsamples=n={samples_per_window}:p=0,\
             astats=metadata=1:reset=1,\
             ametadata=mode=print:key=lavfi.astats.Overall.RMS_level:file=-"
        ));
        command.args(["-f", "null", "-"]);

        let output = run_tool(&mut command)?;
        let levels = parse_rms_levels(&String::from_utf8_lossy(&output.stdout));
        if levels.is_empty() {
            warn!("loudness analysis produced no windows");
        }
        Ok(levels)
    }
}

pub(crate) fn parse_rms_levels(log: &str) -> Vec<f64> {
    log.lines()
        .filter_map(|line| line.trim().strip_prefix("lavfi.astats.Overall.RMS_level="))
        .map(|value| match value.trim() {
            "-inf" | "nan" => SILENCE_FLOOR_DB,
            other => other
                .parse::<f64>()
                .ok()
                .filter(|level| level.is_finite())
                .unwrap_or(SILENCE_FLOOR_DB),
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct AubioOnsets {
    program: PathBuf,
}

impl AubioOnsets {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl OnsetDetector for AubioOnsets {
    #[instrument(skip(self), fields(path = %path.display()))]
    fn detect_onsets(&self, path: &Path) -> Result<Vec<f64>> {
        let output = run_tool(Command::new(&self.program).arg("-i").arg(path))?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse::<f64>().ok())
            .collect())
    }
}

fn run_tool(command: &mut Command) -> Result<Output> {
    let program = command.get_program().to_string_lossy().into_owned();
    let output = command
        .output()
        .with_context(|| format!("failed to launch {program}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail = stderr.lines().rev().take(3).collect::<Vec<_>>();
        bail!(
            "{program} exited with {}: {}",
            output.status,
            tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
        );
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_log_yields_split_points() {
        let log = "\
[silencedetect @ 0x1] silence_start: 3.2
[silencedetect @ 0x1] silence_end: 4.01 | silence_duration: 0.81
size=N/A time=00:00:10.00
[silencedetect @ 0x1] silence_end: 7.5 | silence_duration: 0.6
";
        assert_eq!(parse_silence_ends(log), vec![4.01, 7.5]);
        assert!(parse_silence_ends("no silence here").is_empty());
    }

    #[test]
    fn rms_log_maps_infinite_levels_to_floor() {
        let log = "\
frame:0    pts:0       pts_time:0
lavfi.astats.Overall.RMS_level=-23.5
frame:1    pts:4410    pts_time:0.1
lavfi.astats.Overall.RMS_level=-inf
";
        assert_eq!(parse_rms_levels(log), vec![-23.5, SILENCE_FLOOR_DB]);
    }

    #[cfg(unix)]
    #[test]
    fn failed_split_keeps_existing_clips() {
        let temp = tempfile::tempdir().expect("tempdir should be creatable");
        let input = temp.path().join("alpha.wav");
        fs::write(&input, b"audio").expect("input should be writable");
        let segments = temp.path().join("segments");
        fs::create_dir_all(&segments).expect("segment dir should be creatable");
        let existing = segments.join(part_file_name(0));
        fs::write(&existing, b"clip").expect("clip should be writable");

        let splitter = FfmpegSplitter::new("false", -30.0, 0.5);
        assert!(splitter.split_by_silence(&input, &segments).is_err());

        assert!(existing.is_file());
        assert_eq!(
            list_part_files(&segments).expect("segment dir should list"),
            vec![existing]
        );
        let leftovers = fs::read_dir(&segments)
            .expect("segment dir should read")
            .count();
        assert_eq!(leftovers, 1, "staging directory should be cleaned up");
    }

    #[test]
    fn part_names_are_zero_padded() {
        assert_eq!(part_file_name(7), "part_007.wav");
    }
}
