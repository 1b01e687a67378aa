//! Speaker voice references and their assignment to dataset speakers.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::fetch::{self, Caches, FetchError, Location};

/// What conditions synthesis toward one target voice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceReference {
    /// Reference recording for voice-cloning models
    #[serde(default)]
    pub audio: Option<PathBuf>,
    /// Transcript of the reference recording (empty lets the model transcribe it)
    #[serde(default)]
    pub text: String,
    /// Named voice of a built-in voice model (e.g. Kokoro `af_bella`)
    #[serde(default)]
    pub voice: Option<String>,
}

/// A speaker's voice, optionally with per-emotion variants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerVoice {
    #[serde(flatten)]
    pub reference: VoiceReference,
    #[serde(default)]
    pub emotions: BTreeMap<String, VoiceReference>,
}

/// `voices` section of the configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    /// Fallback for speakers that get nothing else
    pub default: Option<VoiceReference>,
    /// Pool handed out round robin to speakers without an explicit entry
    pub references: Vec<VoiceReference>,
    /// Explicit per-speaker voices
    pub speakers: BTreeMap<String, SpeakerVoice>,
}

impl VoiceSettings {
    /// Every reference in the section, emotion variants included.
    fn all_references_mut(&mut self) -> Vec<&mut VoiceReference> {
        let mut all: Vec<&mut VoiceReference> = self.default.iter_mut().chain(self.references.iter_mut()).collect();
        for speaker in self.speakers.values_mut() {
            all.push(&mut speaker.reference);
            all.extend(speaker.emotions.values_mut());
        }
        all
    }

    /// Replace remote reference recordings (`http(s)://`, `hf://`) with local copies.
    ///
    /// Local paths are left as they are; the backend checks them when it uses them.
    ///
    /// # Errors
    /// Returns the first download failure.
    pub async fn localize(mut self, caches: &Caches) -> Result<Self, FetchError> {
        for reference in self.all_references_mut() {
            let Some(audio) = reference.audio.as_mut() else {
                continue;
            };
            let Some(uri) = audio.to_str().map(str::to_string) else {
                continue;
            };
            if matches!(Location::parse(&uri), Ok(location) if location.is_remote()) {
                *audio = fetch::fetch_with(&uri, caches).await?;
                debug!("Reference {} is at {}", uri, audio.display());
            }
        }
        Ok(self)
    }
}

/// Speaker → voice assignment for one run.
#[derive(Debug, Clone, Default)]
pub struct VoiceBook {
    voices: HashMap<String, SpeakerVoice>,
}

impl VoiceBook {
    /// Assign a voice to every speaker.
    ///
    /// Explicit `speakers` entries win. The remaining speakers take the reference pool in round
    /// robin, in the order given (first appearance in the dataset), so the same dataset always
    /// gets the same assignment. Without a pool they fall back to `default`.
    ///
    /// # Arguments
    /// * `settings` - Voice section of the configuration
    /// * `speakers` - Distinct speakers in order of first appearance
    pub fn assign<'a>(settings: &VoiceSettings, speakers: impl IntoIterator<Item = &'a str>) -> Self {
        let mut voices = HashMap::new();
        let mut pooled = 0usize;

        for speaker in speakers {
            if voices.contains_key(speaker) {
                continue;
            }

            let voice = if let Some(explicit) = settings.speakers.get(speaker) {
                debug!("Speaker '{}' uses its configured voice", speaker);
                Some(explicit.clone())
            } else if !settings.references.is_empty() {
                let reference = settings.references[pooled % settings.references.len()].clone();
                debug!("Speaker '{}' gets pooled reference #{}", speaker, pooled % settings.references.len());
                pooled += 1;
                Some(SpeakerVoice { reference, emotions: BTreeMap::new() })
            } else {
                settings.default.clone().map(|reference| SpeakerVoice { reference, emotions: BTreeMap::new() })
            };

            match voice {
                Some(voice) => {
                    voices.insert(speaker.to_string(), voice);
                }
                None => warn!("No voice reference available for speaker '{}'", speaker),
            }
        }

        info!("Assigned voices to {} speaker(s)", voices.len());
        Self { voices }
    }

    /// Voice for a speaker, preferring the emotion variant when one is configured.
    pub fn lookup(&self, speaker: &str, emotion: Option<&str>) -> Option<&VoiceReference> {
        let voice = self.voices.get(speaker)?;
        emotion.and_then(|e| voice.emotions.get(e)).or(Some(&voice.reference))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.voices.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }
}
