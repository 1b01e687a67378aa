//! Dialog TTS - batch synthesis of multi-speaker conversational audio.
//!
//! Reads a dialogue dataset, groups its rows into conversations, and synthesizes every turn with
//! a pretrained text-to-speech model (Kokoro through sherpa-onnx, or an external inference program
//! such as the F5-TTS CLI), writing one WAV file per utterance.

mod audio;
mod config;
mod conversation;
mod dataset;
mod fetch;
mod pipeline;
mod tts;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;

use config::{Cli, Settings};
use pipeline::RunSummary;

/// Dispatcher stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    ParsingArgs,
    ValidatingConfig,
    Running,
    Success,
    Failed,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunStatus {
    Success,        // Every utterance written
    PartialFailure, // Some utterances failed
    Failed,         // Usage, configuration or fatal pipeline error
}

impl RunStatus {
    fn code(self) -> u8 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Failed => 1,
            RunStatus::PartialFailure => 2,
        }
    }
}

fn enter(stage: Stage) {
    debug!("Stage: {:?}", stage);
}

/// Initialize logging with time-only format.
/// Respects RUST_LOG, falls back to the verbose flag, defaults to info.
fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| if verbose { EnvFilter::try_new("debug") } else { EnvFilter::try_new("info") })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(LocalTime::new(time::macros::format_description!("[hour]:[minute]:[second]")))
        .init();
}

/// Load the configuration, refusing early when the file does not exist.
fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        bail!("configuration file not found: {} (pass one with -c/--config)", path.display());
    }
    Settings::load(path).with_context(|| format!("invalid configuration in {}", path.display()))
}

/// Output directory: the command line wins over the configuration.
fn output_dir(cli: &Cli, settings: &Settings) -> PathBuf {
    cli.output.clone().unwrap_or_else(|| settings.output.directory.clone())
}

fn report(summary: &RunSummary, elapsed: std::time::Duration) {
    info!(
        "📊 {} conversation(s), {} utterance(s): {} written, {} failed, {} combined file(s) in {:.1?}",
        summary.conversations, summary.attempted, summary.written, summary.failed, summary.combined, elapsed
    );
    if summary.combine_failed > 0 {
        warn!("{} combined file(s) could not be written", summary.combine_failed);
    }
}

/// Validate the configuration and run the batch.
async fn dispatch(cli: &Cli) -> RunStatus {
    enter(Stage::ValidatingConfig);
    let settings = match load_settings(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            error!("❌ Configuration error: {:#}", e);
            enter(Stage::Failed);
            return RunStatus::Failed;
        }
    };
    settings.log_config();

    enter(Stage::Running);
    let output = output_dir(cli, &settings);
    let started = Instant::now();

    let status = match pipeline::run(&settings, &output).await {
        Ok(summary) => {
            report(&summary, started.elapsed());
            if summary.is_success() {
                info!("✅ Done. Audio written to {}", output.display());
                RunStatus::Success
            } else {
                warn!("⚠️  Finished with failures. Audio written to {}", output.display());
                RunStatus::PartialFailure
            }
        }
        Err(e) => {
            error!("❌ Run failed: {}", e);
            RunStatus::Failed
        }
    };

    enter(if status == RunStatus::Failed { Stage::Failed } else { Stage::Success });
    status
}

#[tokio::main]
async fn main() -> ExitCode {
    // --help and unknown flags end up here too: all of them exit 1
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(RunStatus::Failed.code());
        }
    };

    init_logging(cli.verbose);
    enter(Stage::ParsingArgs);
    info!("🎙️  Dialog TTS v{}", env!("CARGO_PKG_VERSION"));

    ExitCode::from(dispatch(&cli).await.code())
}
