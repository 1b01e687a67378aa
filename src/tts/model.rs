//! The speech model seam.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::VoiceReference;

/// Errors raised by speech synthesis.
///
/// `ModelLoad` is fatal to a run; every other variant concerns a single utterance.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("failed to load model '{model}': {reason}")]
    ModelLoad { model: String, reason: String },

    #[error("utterance text is empty")]
    EmptyText,

    #[error("no voice reference for speaker '{0}'")]
    NoVoice(String),

    #[error("unknown voice '{0}'")]
    UnknownVoice(String),

    #[error("reference audio not found: {}", .0.display())]
    MissingReference(PathBuf),

    #[error("synthesis timed out after {0:?}")]
    Timeout(Duration),

    #[error("model produced no audio")]
    NoAudio,

    #[error("synthesis failed: {0}")]
    Failed(String),
}

/// One utterance to synthesize.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    pub speaker: String,
    pub voice: Option<VoiceReference>,
}

/// Mono audio returned by a model.
#[derive(Debug, Clone, PartialEq)]
pub struct Audio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// A loaded speech synthesis model.
#[async_trait]
pub trait SpeechModel: Send {
    /// Human readable model name for logs.
    fn name(&self) -> &str;

    /// Synthesize one utterance. Must not write into the output directory.
    async fn synthesize(&mut self, request: &SynthesisRequest) -> Result<Audio, SynthesisError>;

    /// Release runtime resources. Called once by [`super::Synthesizer::shutdown`].
    fn release(&mut self) {}
}
