//! The `Playing` state: one task per planned stream plus the mixdown
//! recorder, all sharing a cancellation token and joined before returning.

use std::{
    future::Future,
    path::PathBuf,
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tokio::{
    io::AsyncWriteExt,
    process::{Child, Command},
    sync::watch,
    task::JoinSet,
    time::sleep,
};
use tracing::{debug, info, instrument, warn};

use crate::render::{MixdownPlan, PlannedStream, RenderPlan};

const RECORDER_GRACE: Duration = Duration::from_secs(2);

/// Broadcast cancellation shared by every task of one playback.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as any token clone, so an error cannot
        // outlive a pending wait.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

/// Executes plans. Implementations must return promptly once `cancel` fires.
pub trait RenderBackend: Send + Sync + 'static {
    fn play_stream(
        &self,
        stream: PlannedStream,
        cancel: CancelToken,
    ) -> impl Future<Output = Result<()>> + Send;

    fn record_mixdown(
        &self,
        plan: MixdownPlan,
        cancel: CancelToken,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// `ffplay` for live streams, `ffmpeg` for the mixdown.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffplay: PathBuf,
    ffmpeg: PathBuf,
}

impl FfmpegBackend {
    #[must_use]
    pub fn new(ffplay: impl Into<PathBuf>, ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffplay: ffplay.into(),
            ffmpeg: ffmpeg.into(),
        }
    }
}

impl RenderBackend for FfmpegBackend {
    async fn play_stream(&self, stream: PlannedStream, cancel: CancelToken) -> Result<()> {
        let mut child = Command::new(&self.ffplay)
            .args(stream.ffplay_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to launch {}", self.ffplay.display()))?;

        tokio::select! {
            status = child.wait() => {
                let status = status.context("ffplay did not exit cleanly")?;
                if !status.success() {
                    bail!("ffplay exited with {status} for {}", stream.label());
                }
                Ok(())
            }
            () = cancel.cancelled() => {
                child.kill().await.context("failed to stop ffplay")?;
                Ok(())
            }
        }
    }

    async fn record_mixdown(&self, plan: MixdownPlan, cancel: CancelToken) -> Result<()> {
        if let Some(parent) = plan.output_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create output directory: {}", parent.display()))?;
        }
        let mut child = Command::new(&self.ffmpeg)
            .args(plan.ffmpeg_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to launch {}", self.ffmpeg.display()))?;

        tokio::select! {
            status = child.wait() => {
                let status = status.context("ffmpeg did not exit cleanly")?;
                if !status.success() {
                    bail!("ffmpeg exited with {status} writing {}", plan.output_path.display());
                }
                Ok(())
            }
            () = cancel.cancelled() => finish_recording(&mut child).await,
        }
    }
}

// `q` on stdin lets ffmpeg finalise the file header; kill if it lingers.
async fn finish_recording(child: &mut Child) -> Result<()> {
    if let Some(mut stdin) = child.stdin.take() {
        if let Err(error) = stdin.write_all(b"q").await {
            debug!(error = %error, "recorder stdin already closed");
        }
    }
    if tokio::time::timeout(RECORDER_GRACE, child.wait()).await.is_err() {
        warn!("recorder did not stop in time, killing it");
        child.kill().await.context("failed to stop ffmpeg")?;
    }
    Ok(())
}

/// What ended a playback.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Input,
    Interrupted,
    Timeout,
    Finished,
}

impl StopReason {
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::Input => "stopped",
            Self::Interrupted => "interrupted",
            Self::Timeout => "preview finished",
            Self::Finished => "playback finished",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Played,
    /// Cancelled while still waiting for its delay.
    Skipped,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlaybackReport {
    pub reason: StopReason,
    pub played: usize,
    pub skipped: usize,
    pub failures: Vec<String>,
    pub output_path: Option<PathBuf>,
}

impl PlaybackReport {
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut lines = vec![format!("Playback {}.", self.reason.describe())];
        for failure in &self.failures {
            lines.push(format!("  warning: {failure}"));
        }
        if let Some(path) = &self.output_path {
            lines.push(format!("Mix saved to {}", path.display()));
        }
        lines.join("\n")
    }
}

/// Run the `Playing` state until `stop` resolves, `timeout` elapses, or every
/// task finishes. All tasks are cancelled and joined before returning.
#[instrument(skip_all, fields(streams = live.streams.len(), mixdown = mixdown.is_some(), timeout = ?timeout))]
pub async fn run_playing<B, S>(
    backend: Arc<B>,
    live: RenderPlan,
    mixdown: Option<MixdownPlan>,
    timeout: Option<Duration>,
    stop: S,
) -> PlaybackReport
where
    B: RenderBackend,
    S: Future<Output = StopReason>,
{
    let cancel = CancelToken::new();
    let mut tasks: JoinSet<(String, Result<TaskOutcome>)> = JoinSet::new();
    let output_path = mixdown.as_ref().map(|plan| plan.output_path.clone());

    for stream in live.streams {
        let backend = Arc::clone(&backend);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let label = stream.label();
            let outcome = play_after_delay(backend.as_ref(), stream, cancel).await;
            (label, outcome)
        });
    }
    if let Some(plan) = mixdown {
        let backend = Arc::clone(&backend);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let outcome = backend
                .record_mixdown(plan, cancel)
                .await
                .map(|()| TaskOutcome::Played);
            ("mixdown".to_string(), outcome)
        });
    }
    info!(tasks = tasks.len(), "playing");

    let mut report = PlaybackReport {
        reason: StopReason::Finished,
        played: 0,
        skipped: 0,
        failures: Vec::new(),
        output_path,
    };

    let deadline = async {
        match timeout {
            Some(duration) => sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(stop);
    tokio::pin!(deadline);

    let reason = loop {
        tokio::select! {
            reason = &mut stop => break reason,
            () = &mut deadline => break StopReason::Timeout,
            joined = tasks.join_next() => match joined {
                Some(joined) => record_outcome(&mut report, joined),
                None => break StopReason::Finished,
            },
        }
    };
    report.reason = reason;

    cancel.cancel();
    while let Some(joined) = tasks.join_next().await {
        record_outcome(&mut report, joined);
    }
    info!(
        reason = ?report.reason,
        played = report.played,
        skipped = report.skipped,
        failures = report.failures.len(),
        "playback stopped"
    );
    report
}

async fn play_after_delay<B: RenderBackend>(
    backend: &B,
    stream: PlannedStream,
    cancel: CancelToken,
) -> Result<TaskOutcome> {
    if stream.delay_seconds > 0.0 {
        tokio::select! {
            () = sleep(Duration::try_from_secs_f64(stream.delay_seconds).unwrap_or_default()) => {}
            () = cancel.cancelled() => return Ok(TaskOutcome::Skipped),
        }
    }
    if cancel.is_cancelled() {
        return Ok(TaskOutcome::Skipped);
    }
    debug!(stream = %stream.label(), "stream starting");
    backend.play_stream(stream, cancel).await?;
    Ok(TaskOutcome::Played)
}

fn record_outcome(
    report: &mut PlaybackReport,
    joined: Result<(String, Result<TaskOutcome>), tokio::task::JoinError>,
) {
    match joined {
        Ok((_, Ok(TaskOutcome::Played))) => report.played += 1,
        Ok((_, Ok(TaskOutcome::Skipped))) => report.skipped += 1,
        Ok((label, Err(error))) => {
            warn!(stream = %label, error = %error, "stream failed");
            report.failures.push(format!("{label}: {error:#}"));
        }
        Err(error) => {
            warn!(error = %error, "stream task aborted");
            report.failures.push(format!("task aborted: {error}"));
        }
    }
}
