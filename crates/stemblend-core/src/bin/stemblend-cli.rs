use std::{io, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use stemblend_core::{
    BlendConfig, BlendSession, Collaborators, FfmpegBackend, GapReport, SessionController,
    diagnostics::init_tracing_with_options,
    gaps::GAP_WINDOW_SECONDS,
    spawn_stdin_reader,
    tools::{DurationProbe, FfmpegLoudness, LoudnessAnalyzer, MediaProbe},
};

#[derive(Debug, Parser)]
#[command(name = "stemblend-cli")]
#[command(about = "Interactive two-track stem blending and offline blend analysis")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Defaults to `paths.logs_dir` from the config.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Config file; otherwise `STEMBLEND_CONFIG_PATH` or ./stemblend.config.toml.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Open the blend shell for two track ids.
    Shell { first_id: String, second_id: String },
    /// Print low-energy windows of an audio file.
    Gaps { path: PathBuf },
    /// Print the render plans for the untouched blend as JSON.
    Plan {
        first_id: String,
        second_id: String,

        #[arg(long)]
        start: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => BlendConfig::load_from(path)?,
        None => BlendConfig::load_or_default()?,
    };
    let log_dir = cli
        .log_dir
        .clone()
        .unwrap_or_else(|| config.paths.logs_dir.clone());
    let _telemetry = init_tracing_with_options(&log_dir, &config.diagnostics)?;

    match cli.command {
        Commands::Shell {
            first_id,
            second_id,
        } => {
            let backend = Arc::new(FfmpegBackend::new(
                &config.tools.ffplay,
                &config.tools.ffmpeg,
            ));
            let tools = Collaborators::from_config(&config);
            let session = BlendSession::open(&first_id, &second_id, config, tools)?;
            let input = spawn_stdin_reader()?;
            let mut controller = SessionController::new(session, backend, input, io::stdout());
            controller.run().await?;
        }
        Commands::Gaps { path } => {
            let duration = MediaProbe::new(&config.tools.ffprobe).probe_duration(&path)?;
            let levels = FfmpegLoudness::new(&config.tools.ffmpeg).window_levels_db(
                &path,
                None,
                GAP_WINDOW_SECONDS,
            )?;
            let report = GapReport::from_levels_db(&levels, duration);
            println!("{}", report.render_text(&path.display().to_string()));
        }
        Commands::Plan {
            first_id,
            second_id,
            start,
        } => {
            let tools = Collaborators::from_config(&config);
            let session = BlendSession::open(&first_id, &second_id, config, tools)?;
            let (live, mixdown) = session.plans(start)?;
            let json = serde_json::to_string_pretty(&serde_json::json!({
                "live": &live,
                "mixdown": &mixdown,
            }))
            .context("failed to serialize render plans")?;
            println!("{json}");
            tracing::info!(fingerprint = %live.fingerprint, "render plans printed");
        }
    }

    Ok(())
}
