//! Interactive command loop around a [`BlendSession`].
//!
//! The loop is `Idle` while it waits for a line and runs each command to
//! completion before reading the next. `play` and `preview` enter `Playing`
//! until the next input line, an interrupt, a preview timeout, or the end of
//! every stream.

use std::{
    io::{self, BufRead, Write},
    sync::Arc,
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use tokio::{signal, sync::mpsc};
use tracing::{info, instrument, warn};

use crate::{
    adjust::TrackSlot,
    command::{Command, MatchDimension, parse_command},
    model::SegmentRef,
    playback::{PlaybackReport, RenderBackend, StopReason, run_playing},
    session::{BlendSession, SessionError},
};

const PROMPT: &str = "blend> ";
const INPUT_BUFFER: usize = 64;

pub const HELP_TEXT: &str = "\
Commands:
  play [start]                 Play current blend from start (default: middle); Enter stops
  pitch1|pitch2 <n>            Track pitch in semitones (-12 to +12)
  tempo1|tempo2 <n>            Track tempo change in percent (-50 to +100)
  volume1|volume2 <n>          Track volume in percent (0 to 200)
  window <n1> <n2>             Start offsets from the reference point (seconds)
  match <bpm1to2|bpm2to1|key1to2|key2to1>
                               Match one track's BPM or key to the other
  invert                       Flip the last match direction
  auto-match                   Match BPM and key in the cheaper direction
  type1|type2 <vocal|instrumental>
                               Switch the stem feeding a track
  split <1|2>                  Split a vocal track into segments at silences
  segments [1|2]               List segments
  place <t:s> at <time>        Place a segment on the other track and activate it
  shift <t:s> <+/-time>        Move a placed segment
  toggle <t:s>                 Enable or disable a segment
  preview <t:s>                Play one segment on its own
  random <1|2>                 Scatter segments over the other track
  smart-random <1|2>           Beat-aligned placement without collisions
  beat-detect <1|2|both>       Detect beats (falls back to the BPM grid)
  beats [1|2]                  List detected beats
  gap-finder <1|2>             Find low-energy windows for vocal placement
  segment-trim <1|2|all>       Trim silent edges off segments
  analyze-segments <1|2>       Rate segment energy as low/medium/high
  conflict-detect              Report overlapping active segments
  reset                        Reset all adjustments
  status                       Show current settings
  help                         Show this help
  exit                         Leave the shell";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Feed stdin lines into a channel from a dedicated thread.
pub fn spawn_stdin_reader() -> Result<mpsc::Receiver<String>> {
    let (sender, receiver) = mpsc::channel(INPUT_BUFFER);
    thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if sender.blocking_send(line).is_err() {
                    break;
                }
            }
        })
        .context("failed to spawn stdin reader")?;
    Ok(receiver)
}

pub struct SessionController<B, W> {
    session: BlendSession,
    backend: Arc<B>,
    input: mpsc::Receiver<String>,
    output: W,
}

impl<B, W> SessionController<B, W>
where
    B: RenderBackend,
    W: Write,
{
    pub fn new(
        session: BlendSession,
        backend: Arc<B>,
        input: mpsc::Receiver<String>,
        output: W,
    ) -> Self {
        Self {
            session,
            backend,
            input,
            output,
        }
    }

    #[must_use]
    pub fn session(&self) -> &BlendSession {
        &self.session
    }

    #[must_use]
    pub fn output(&self) -> &W {
        &self.output
    }

    /// Read and execute lines until `exit` or end of input.
    pub async fn run(&mut self) -> Result<()> {
        let intro = format!(
            "{}\n\n{HELP_TEXT}\n\n{}",
            self.session.banner(),
            self.session.status()
        );
        self.emit(&intro)?;
        loop {
            write!(self.output, "{PROMPT}").context("failed to write prompt")?;
            self.output.flush().context("failed to flush output")?;
            let Some(line) = self.input.recv().await else {
                info!("input closed");
                break;
            };
            if self.execute_line(&line).await? == Flow::Exit {
                break;
            }
        }
        self.emit("Exiting blend shell...")
    }

    /// Parse and run one line. Command failures are reported and leave the
    /// loop running; only output errors are returned.
    pub async fn execute_line(&mut self, line: &str) -> Result<Flow> {
        let command = match parse_command(line) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(Flow::Continue),
            Err(error) => {
                self.emit(&format!("Error: {error}"))?;
                return Ok(Flow::Continue);
            }
        };
        if command == Command::Exit {
            return Ok(Flow::Exit);
        }
        match self.dispatch(command).await {
            Ok(text) => self.emit(&text)?,
            Err(error) => {
                warn!(error = %error, "command failed");
                self.emit(&format!("Error: {error}"))?;
            }
        }
        Ok(Flow::Continue)
    }

    #[instrument(skip(self))]
    async fn dispatch(&mut self, command: Command) -> Result<String, SessionError> {
        match command {
            Command::Play { start } => return self.play(start).await,
            Command::Preview(segment) => return self.preview(segment).await,
            _ => {}
        }

        let session = &mut self.session;
        match command {
            Command::Play { .. } | Command::Preview(_) | Command::Exit => Ok(String::new()),
            Command::Pitch { slot, semitones } => Ok(session.set_pitch(slot, semitones)),
            Command::Tempo { slot, percent } => session.set_tempo(slot, percent),
            Command::Volume { slot, percent } => session.set_volume(slot, percent),
            Command::Window { first, second } => session.set_window(first, second),
            Command::Match {
                dimension: MatchDimension::Bpm,
                direction,
            } => session.match_bpm(direction),
            Command::Match {
                dimension: MatchDimension::Key,
                direction,
            } => session.match_key(direction),
            Command::Invert => session.invert(),
            Command::AutoMatch => Ok(session.auto_match()),
            Command::SetType { slot, kind } => session.set_kind(slot, kind),
            Command::Split(slot) => session.split(slot),
            Command::Segments(selection) => Ok(session.list_segments(selection)),
            Command::Place { segment, time } => session.place(segment, time),
            Command::Shift { segment, delta } => session.shift(segment, delta),
            Command::Toggle(segment) => session.toggle(segment),
            Command::Random(slot) => session.random_place(slot),
            Command::SmartRandom(slot) => session.smart_random_place(slot),
            Command::BeatDetect(selection) => Ok(session.detect_beats(selection)),
            Command::Beats(selection) => Ok(session.list_beats(selection)),
            Command::GapFinder(slot) => session.find_gaps(slot),
            Command::SegmentTrim(selection) => session.trim_segments(selection),
            Command::AnalyzeSegments(slot) => session.analyze_segments(slot),
            Command::ConflictDetect => Ok(session.conflict_report()),
            Command::Reset => Ok(session.reset()),
            Command::Status => Ok(session.status()),
            Command::Help => Ok(HELP_TEXT.to_string()),
            Command::Unknown(word) => Ok(format!(
                "Unknown command: {word}. Type 'help' for available commands."
            )),
        }
    }

    async fn play(&mut self, start: Option<f64>) -> Result<String, SessionError> {
        let (live, mixdown) = self.session.plans(start)?;
        let active = TrackSlot::BOTH.map(|slot| {
            self.session
                .segments(slot)
                .iter()
                .filter(|segment| segment.active)
                .count()
        });
        self.announce(&format!(
            "Playing blend with {}+{} active segments from {:.1}s/{:.1}s for {:.1}s... Press Enter to stop.",
            active[0],
            active[1],
            live.window.starts[0],
            live.window.starts[1],
            live.window.duration_seconds
        ))?;

        info!(fingerprint = %live.fingerprint, "entering playing state");
        let report = run_playing(
            Arc::clone(&self.backend),
            live,
            Some(mixdown),
            None,
            wait_for_stop(&mut self.input),
        )
        .await;
        info!(reason = ?report.reason, "back to idle");
        Ok(report.render_text())
    }

    async fn preview(&mut self, segment: SegmentRef) -> Result<String, SessionError> {
        let plan = self.session.preview(segment)?;
        let duration = plan.window.duration_seconds;
        self.announce(&format!(
            "Previewing segment {segment} ({duration:.1}s duration)..."
        ))?;

        let report = run_playing(
            Arc::clone(&self.backend),
            plan,
            None,
            Some(Duration::try_from_secs_f64(duration).unwrap_or_default()),
            wait_for_stop(&mut self.input),
        )
        .await;
        Ok(preview_summary(&report))
    }

    // Printed before a playback blocks the loop, so it goes out immediately.
    fn announce(&mut self, text: &str) -> Result<(), SessionError> {
        self.emit(text)
            .map_err(|error| SessionError::Tool(format!("{error:#}")))
    }

    fn emit(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        writeln!(self.output, "{text}").context("failed to write shell output")?;
        self.output.flush().context("failed to flush shell output")
    }
}

fn preview_summary(report: &PlaybackReport) -> String {
    match report.reason {
        StopReason::Timeout | StopReason::Finished if report.failures.is_empty() => {
            "Preview completed.".to_string()
        }
        _ => report.render_text(),
    }
}

/// Resolves on the next input line (or closed input) or on Ctrl-C.
async fn wait_for_stop(input: &mut mpsc::Receiver<String>) -> StopReason {
    let interrupt = async {
        if let Err(error) = signal::ctrl_c().await {
            warn!(error = %error, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };
    tokio::select! {
        _ = input.recv() => StopReason::Input,
        () = interrupt => StopReason::Interrupted,
    }
}
