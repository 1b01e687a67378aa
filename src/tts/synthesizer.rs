//! Synthesis invoker: validates utterances and bounds every model call.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::model::{SpeechModel, SynthesisError, SynthesisRequest};
use crate::config::VoiceReference;
use crate::conversation::Turn;

/// Audio for one turn, consumed once by the output writer.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedClip {
    pub conversation_id: String,
    pub turn: u32,
    pub speaker: String,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl SynthesizedClip {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 { 0.0 } else { self.samples.len() as f32 / self.sample_rate as f32 }
    }
}

/// Drives a loaded speech model, one utterance at a time.
pub struct Synthesizer {
    model: Box<dyn SpeechModel>, // Owned model handle
    timeout: Duration,           // Upper bound per call
    delay: Duration,             // Pause after each call
}

impl Synthesizer {
    /// Take ownership of a loaded model.
    ///
    /// # Arguments
    /// * `model` - Loaded model handle
    /// * `timeout` - Upper bound for a single synthesis call
    pub fn new(model: Box<dyn SpeechModel>, timeout: Duration) -> Self {
        Self { model, timeout, delay: Duration::ZERO }
    }

    /// Pause after every call (rate limiting for shared GPUs or remote runtimes).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Synthesize one turn.
    ///
    /// # Arguments
    /// * `conversation_id` - Conversation the turn belongs to
    /// * `turn` - The turn to synthesize
    /// * `voice` - Voice reference assigned to the turn's speaker
    ///
    /// # Errors
    /// Returns `EmptyText` for blank text, `Timeout` if the model exceeds the time bound,
    /// `NoAudio` if it returns no samples, or whatever the model reports.
    pub async fn synthesize(&mut self, conversation_id: &str, turn: &Turn, voice: Option<&VoiceReference>) -> Result<SynthesizedClip, SynthesisError> {
        let text = turn.row.text.trim();
        if text.is_empty() {
            return Err(SynthesisError::EmptyText);
        }

        let request = SynthesisRequest { text: text.to_string(), speaker: turn.row.speaker.clone(), voice: voice.cloned() };
        debug!("Synthesizing \"{}\"", request.text);

        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.model.synthesize(&request)).await;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let audio = result.map_err(|_| SynthesisError::Timeout(self.timeout))??;
        if audio.samples.is_empty() {
            return Err(SynthesisError::NoAudio);
        }

        debug!("🎵 Generated speech ({} samples in {:.2?})", audio.samples.len(), started.elapsed());
        Ok(SynthesizedClip {
            conversation_id: conversation_id.to_string(),
            turn: turn.index,
            speaker: request.speaker,
            samples: audio.samples,
            sample_rate: audio.sample_rate,
        })
    }

    /// Release the model.
    pub fn shutdown(mut self) {
        self.model.release();
        info!("Model {} released", self.model.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DialogueRow;
    use crate::tts::Audio;
    use async_trait::async_trait;

    /// One sample per byte of text; "slow" never finishes, "silent" returns nothing.
    struct EchoModel;

    #[async_trait]
    impl SpeechModel for EchoModel {
        fn name(&self) -> &str {
            "echo"
        }

        async fn synthesize(&mut self, request: &SynthesisRequest) -> Result<Audio, SynthesisError> {
            if request.text == "slow" {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if request.text == "silent" {
                return Ok(Audio { samples: Vec::new(), sample_rate: 16000 });
            }
            Ok(Audio { samples: vec![0.25; request.text.len()], sample_rate: 16000 })
        }
    }

    fn turn(text: &str) -> Turn {
        Turn { index: 4, row: DialogueRow::new("Ana", text) }
    }

    #[tokio::test]
    async fn test_clip_carries_turn_identity() {
        let mut synth = Synthesizer::new(Box::new(EchoModel), Duration::from_secs(5));
        let clip = synth.synthesize("12", &turn("  hello  "), None).await.unwrap();
        assert_eq!(clip.conversation_id, "12");
        assert_eq!(clip.turn, 4);
        assert_eq!(clip.speaker, "Ana");
        assert_eq!(clip.samples.len(), 5);
        assert_eq!(clip.sample_rate, 16000);
        assert!((clip.duration_secs() - 5.0 / 16000.0).abs() < f32::EPSILON);
        assert_eq!(synth.model_name(), "echo");
        synth.shutdown();
    }

    #[tokio::test]
    async fn test_empty_text_is_rejected() {
        let mut synth = Synthesizer::new(Box::new(EchoModel), Duration::from_secs(5));
        assert!(matches!(synth.synthesize("1", &turn("   "), None).await, Err(SynthesisError::EmptyText)));
    }

    #[tokio::test]
    async fn test_empty_audio_is_rejected() {
        let mut synth = Synthesizer::new(Box::new(EchoModel), Duration::from_secs(5));
        assert!(matches!(synth.synthesize("1", &turn("silent"), None).await, Err(SynthesisError::NoAudio)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let mut synth = Synthesizer::new(Box::new(EchoModel), Duration::from_millis(100));
        let result = synth.synthesize("1", &turn("slow"), None).await;
        assert!(matches!(result, Err(SynthesisError::Timeout(d)) if d == Duration::from_millis(100)));
    }
}
