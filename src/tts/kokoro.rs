//! Kokoro v1.0 speech model through sherpa-rs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use sherpa_rs::OnnxConfig;
use sherpa_rs::tts::{CommonTtsConfig, KokoroTts, KokoroTtsConfig};
use tracing::{debug, info};

use super::model::{Audio, SpeechModel, SynthesisError, SynthesisRequest};
use crate::config::ModelSettings;

/// Kokoro output sample rate.
const KOKORO_SAMPLE_RATE: u32 = 24000;

/// Kokoro v1.0 voices, sorted by name. A voice's speaker id is its index.
const KOKORO_VOICES: [&str; 53] = [
    "af_alloy", "af_aoede", "af_bella", "af_heart", "af_jessica", "af_kore", "af_nicole", "af_nova", "af_river", "af_sarah", "af_sky", "am_adam",
    "am_echo", "am_eric", "am_fenrir", "am_liam", "am_michael", "am_onyx", "am_puck", "am_santa", "bf_alice", "bf_emma", "bf_isabella", "bf_lily",
    "bm_daniel", "bm_fable", "bm_george", "bm_lewis", "ef_dora", "em_alex", "ff_siwis", "hf_alpha", "hf_beta", "hm_omega", "hm_psi", "if_sara",
    "im_nicola", "jf_alpha", "jf_gongitsune", "jf_nezumi", "jf_tebukuro", "jm_kumo", "pf_dora", "pm_alex", "pm_santa", "zf_xiaobei", "zf_xiaoni",
    "zf_xiaoxiao", "zf_xiaoyi", "zm_yunjian", "zm_yunxi", "zm_yunxia", "zm_yunyang",
];

/// Resolve a voice name (or a numeric speaker id) to a Kokoro speaker id.
pub fn speaker_id(voice: &str) -> Option<i32> {
    let voice = voice.trim();
    if let Ok(id) = voice.parse::<i32>() {
        return usize::try_from(id).ok().filter(|&i| i < KOKORO_VOICES.len()).map(|_| id);
    }
    KOKORO_VOICES.binary_search(&voice).ok().map(|i| i as i32)
}

/// espeak-ng language for voices without a lexicon file; empty for English and Chinese.
fn language(voice: &str) -> &'static str {
    match voice.get(..2) {
        Some("ef" | "em") => "es",
        Some("ff") => "fr",
        Some("hf" | "hm") => "hi",
        Some("if" | "im") => "it",
        Some("jf" | "jm") => "ja",
        Some("pf" | "pm") => "pt-br",
        _ => "",
    }
}

/// Lexicon file list for a voice; empty when the language comes from espeak-ng instead.
fn lexicon(model_dir: &Path, voice: &str) -> String {
    let file = |name: &str| model_dir.join(name).to_string_lossy().to_string();
    match voice.get(..2) {
        Some("af" | "am") | None => file("lexicon-us-en.txt"),
        Some("bf" | "bm") => file("lexicon-gb-en.txt"),
        Some("zf" | "zm") => format!("{},{}", file("lexicon-us-en.txt"), file("lexicon-zh.txt")),
        _ => String::new(),
    }
}

/// Take the engine lock, waiting at most `wait`.
///
/// A request abandoned by the synthesis timeout keeps its blocking thread and the lock until the
/// engine returns, so later requests fail after `wait` instead of queueing behind it.
fn acquire<T>(engine: &Mutex<T>, wait: Duration) -> Result<MutexGuard<'_, T>, SynthesisError> {
    engine.try_lock_for(wait).ok_or_else(|| SynthesisError::Failed(format!("engine still busy after {:.1?}", wait)))
}

/// Kokoro model handle.
///
/// Lexicon and language are fixed at load time from the default voice, so every speaker of a
/// run should use voices of that language.
pub struct KokoroModel {
    tts: Arc<Mutex<KokoroTts>>, // Engine, shared with the blocking worker
    name: String,               // Model name for logs
    default_voice: String,      // Voice for speakers without one
    speed: f32,                 // Speech speed multiplier
    lock_wait: Duration,        // Longest wait for an engine held by an abandoned request
}

impl KokoroModel {
    /// Load the model from `{kokoro.model_dir}/tts/{name}/`.
    ///
    /// # Errors
    /// Returns `SynthesisError::ModelLoad` if required model files are missing or the default voice is unknown.
    pub fn load(settings: &ModelSettings) -> Result<Self, SynthesisError> {
        let kokoro = &settings.kokoro;
        let model_dir = kokoro.model_dir.join("tts").join(&settings.name);
        let load_error = |reason: String| SynthesisError::ModelLoad { model: settings.name.clone(), reason };

        let required = [model_dir.join("model.onnx"), model_dir.join("voices.bin"), model_dir.join("tokens.txt")];
        if let Some(missing) = required.iter().find(|p| !p.exists()) {
            return Err(load_error(format!("required model file not found: {}", missing.display())));
        }
        if speaker_id(&kokoro.voice).is_none() {
            return Err(load_error(format!("unknown default voice '{}'", kokoro.voice)));
        }

        info!("Initializing Kokoro TTS with {} provider ({} threads)", kokoro.provider, kokoro.effective_threads());
        info!("Default voice: {} (speaker ID: {:?})", kokoro.voice, speaker_id(&kokoro.voice));

        let path = |p: PathBuf| p.to_string_lossy().to_string();
        let tts_config = KokoroTtsConfig {
            model: path(model_dir.join("model.onnx")),
            voices: path(model_dir.join("voices.bin")),
            tokens: path(model_dir.join("tokens.txt")),
            data_dir: path(model_dir.join("espeak-ng-data")),
            dict_dir: path(model_dir.join("dict")),
            lexicon: lexicon(&model_dir, &kokoro.voice),
            lang: language(&kokoro.voice).to_string(),
            length_scale: 1.0 / kokoro.speed, // length_scale is inverse of speed
            onnx_config: OnnxConfig {
                provider: kokoro.provider.as_sherpa_provider().to_string(),
                num_threads: kokoro.effective_threads().try_into().unwrap_or(2),
                debug: false,
            },
            common_config: CommonTtsConfig { max_num_sentences: 1, ..Default::default() }, // Kokoro only supports 1
        };

        let tts = KokoroTts::new(tts_config);
        info!("TTS sample rate: {} Hz", KOKORO_SAMPLE_RATE);

        Ok(Self {
            tts: Arc::new(Mutex::new(tts)),
            name: settings.name.clone(),
            default_voice: kokoro.voice.clone(),
            speed: kokoro.speed,
            lock_wait: settings.timeout(),
        })
    }

    /// Speaker id for a request: the reference's named voice, else the default voice.
    fn resolve_voice(&self, request: &SynthesisRequest) -> Result<i32, SynthesisError> {
        let voice = request.voice.as_ref().and_then(|v| v.voice.as_deref()).unwrap_or(self.default_voice.as_str());
        speaker_id(voice).ok_or_else(|| SynthesisError::UnknownVoice(voice.to_string()))
    }
}

#[async_trait]
impl SpeechModel for KokoroModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn synthesize(&mut self, request: &SynthesisRequest) -> Result<Audio, SynthesisError> {
        let sid = self.resolve_voice(request)?;
        let tts = Arc::clone(&self.tts);
        let text = request.text.clone();
        let speed = self.speed;
        let lock_wait = self.lock_wait;

        debug!("Kokoro speaker {} for '{}'", sid, request.speaker);

        // Inference is CPU/GPU bound; keep it off the async workers
        let samples = tokio::task::spawn_blocking(move || {
            let mut tts = acquire(&*tts, lock_wait)?;
            tts.create(&text, sid, speed).map(|audio| audio.samples).map_err(|e| SynthesisError::Failed(format!("TTS generation failed: {}", e)))
        })
        .await
        .map_err(|e| SynthesisError::Failed(format!("synthesis worker failed: {}", e)))??;

        Ok(Audio { samples, sample_rate: KOKORO_SAMPLE_RATE })
    }

    fn release(&mut self) {
        debug!("Releasing Kokoro engine {}", self.name);
    }
}
