//! Command line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Dialogue synthesizer command line.
///
/// `--help` and unknown flags are reported as usage errors by the dispatcher,
/// so every non-run path exits non-zero.
#[derive(Parser, Debug, Clone)]
#[command(name = "run_tts")]
#[command(author, about = "Synthesize multi-speaker conversational audio from a dialogue dataset", long_about = None)]
#[command(disable_version_flag = true)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, short = 'c', default_value = "config.yaml")]
    pub config: PathBuf,

    /// Directory for generated audio (overrides `output.directory`, defaults to generated_audio)
    #[arg(long, short = 'o', visible_alias = "output-dir")]
    pub output: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}
