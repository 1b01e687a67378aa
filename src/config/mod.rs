//! Configuration module for the dialogue synthesizer.
//!
//! Provides CLI argument parsing, the YAML settings document, and speaker voice assignment.

mod cli;
mod settings;
mod voices;

pub use cli::Cli;
pub use settings::{
    AudioSettings, Backend, ColumnSettings, CommandSettings, ConfigError, DatasetFormat, DatasetSettings, KokoroSettings, ModelSettings, OutputSettings,
    Provider, SampleFormat, Settings,
};
pub use voices::{SpeakerVoice, VoiceBook, VoiceReference, VoiceSettings};
