//! Settings document loaded from the YAML configuration file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use super::voices::VoiceSettings;

/// Errors raised while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Speech model backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// External inference program invoked once per utterance (F5-TTS CLI by default)
    #[default]
    Command,
    /// In-process Kokoro model through sherpa-rs
    Kokoro,
}

/// Hardware acceleration provider for ONNX models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Cpu,
    Cuda,
    #[serde(rename = "coreml")]
    CoreMl,
}

impl Provider {
    /// Convert to sherpa-rs provider string.
    pub fn as_sherpa_provider(&self) -> &'static str {
        match self {
            Provider::Cpu => "cpu",
            Provider::Cuda => "cuda",
            Provider::CoreMl => "coreml",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sherpa_provider())
    }
}

/// On-disk dataset format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetFormat {
    /// One JSON object per line
    #[serde(alias = "ndjson")]
    Jsonl,
    /// A single JSON array of objects
    Json,
    /// Comma separated values with a header row
    Csv,
    /// Apache Parquet, read one row group at a time
    Parquet,
}

/// Sample encoding of written WAV files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    #[default]
    Pcm16,
    Float32,
}

/// Fully validated settings for one batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub dataset: DatasetSettings,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub voices: VoiceSettings,
    #[serde(default)]
    pub audio: AudioSettings,
    #[serde(default)]
    pub output: OutputSettings,
}

/// Where dialogue rows come from and how they map onto turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSettings {
    /// Local path, http(s) URL or hf:// URI of the dialogue data
    #[serde(default, alias = "path")]
    pub dialog_data_path: String,

    /// Explicit format; inferred from the file extension when omitted
    #[serde(default)]
    pub format: Option<DatasetFormat>,

    #[serde(default)]
    pub columns: ColumnSettings,

    /// Turns per conversation for rows without a conversation id
    #[serde(default = "default_turns_per_conversation")]
    pub turns_per_conversation: usize,

    /// Stop after this many rows
    #[serde(default)]
    pub max_utterances: Option<usize>,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            dialog_data_path: String::new(),
            format: None,
            columns: ColumnSettings::default(),
            turns_per_conversation: default_turns_per_conversation(),
            max_utterances: None,
        }
    }
}

/// Column names in the dialogue dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnSettings {
    pub conversation: String,
    pub turn: String,
    pub speaker: String,
    pub text: String,
    pub emotion: String,
}

impl Default for ColumnSettings {
    fn default() -> Self {
        Self {
            conversation: "Dialog".to_string(),
            turn: "Turn".to_string(),
            speaker: "Speaker".to_string(),
            text: "Translated_Sentence".to_string(),
            emotion: "Emotion".to_string(),
        }
    }
}

/// Speech model identity and backend parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Model (experiment) name, e.g. F5TTS_Base or kokoro-multi-lang-v1_0
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub backend: Backend,

    /// Repository holding the checkpoints
    #[serde(default = "default_repo")]
    pub repo: String,

    /// Hugging Face organization owning `repo`
    #[serde(default = "default_organization")]
    pub organization: String,

    #[serde(default)]
    pub checkpoint_step: Option<u64>,

    /// Explicit checkpoint path or URI; wins over the derived one
    #[serde(default)]
    pub checkpoint: Option<String>,

    /// Upper bound for a single synthesis call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub command: CommandSettings,

    #[serde(default)]
    pub kokoro: KokoroSettings,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            backend: Backend::default(),
            repo: default_repo(),
            organization: default_organization(),
            checkpoint_step: None,
            checkpoint: None,
            timeout_secs: default_timeout_secs(),
            command: CommandSettings::default(),
            kokoro: KokoroSettings::default(),
        }
    }
}

impl ModelSettings {
    /// Checkpoint location: the explicit one, else derived from repo, name and step.
    pub fn checkpoint_uri(&self) -> Option<String> {
        if let Some(ref checkpoint) = self.checkpoint {
            return Some(checkpoint.clone());
        }
        self.checkpoint_step
            .map(|step| format!("hf://{}/{}/{}/model_{}.safetensors", self.organization, self.repo, self.name, step))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// External inference program settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    pub program: String,
    /// Argument template; see `tts::command` for placeholders
    pub args: Vec<String>,
}

impl Default for CommandSettings {
    fn default() -> Self {
        let args = [
            "--model",
            "{model}",
            "--ckpt_file",
            "{checkpoint}",
            "--ref_audio",
            "{ref_audio}",
            "--ref_text",
            "{ref_text}",
            "--gen_text",
            "{text}",
            "--output_dir",
            "{output_dir}",
            "--output_file",
            "{output_file}",
        ];
        Self { program: "f5-tts_infer-cli".to_string(), args: args.iter().map(|a| a.to_string()).collect() }
    }
}

/// Kokoro (sherpa-rs) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KokoroSettings {
    /// Directory containing `tts/<model name>/`
    pub model_dir: PathBuf,
    /// Voice for speakers without a voice reference
    pub voice: String,
    /// Speech speed multiplier
    pub speed: f32,
    /// Inference threads (0 = auto-detect)
    pub threads: usize,
    pub provider: Provider,
}

impl Default for KokoroSettings {
    fn default() -> Self {
        Self { model_dir: default_model_dir(), voice: "af_bella".to_string(), speed: 1.0, threads: 0, provider: Provider::default() }
    }
}

impl KokoroSettings {
    /// Thread count with auto-detection applied.
    ///
    /// GPU inference gets a single thread; on CPU a third of the cores leaves headroom for the writer.
    pub fn effective_threads(&self) -> usize {
        match (self.threads, self.provider) {
            (0, Provider::Cuda) => 1,
            (0, _) => (num_cpus::get() / 3).max(1),
            (n, _) => n,
        }
    }
}

/// Output audio settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AudioSettings {
    /// Resample every clip to this rate; model native rate when omitted
    pub sample_rate: Option<u32>,
    pub sample_format: SampleFormat,
    /// Also write one combined file per conversation
    pub concatenate: bool,
    /// Silence between turns in combined files (ms)
    pub pause_ms: u64,
    /// Pause after every synthesis call (ms)
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub directory: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self { directory: PathBuf::from("generated_audio") }
    }
}

impl Settings {
    /// Load and validate settings from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError::Read` if the file cannot be read, `ConfigError::Parse` if it is not
    /// valid YAML for this schema, and `ConfigError::Invalid` if a required key is missing.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading config from: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_yaml(&content, path)
    }

    /// Parse and validate settings from YAML text. `origin` is only used in error messages.
    pub fn from_yaml(yaml: &str, origin: &Path) -> Result<Self, ConfigError> {
        let settings: Settings = serde_yaml::from_str(yaml).map_err(|source| ConfigError::Parse { path: origin.to_path_buf(), source })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate required keys and numeric ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dataset.dialog_data_path.trim().is_empty() {
            return Err(ConfigError::Invalid("missing required key dataset.dialog_data_path".to_string()));
        }
        if self.model.name.trim().is_empty() {
            return Err(ConfigError::Invalid("missing required key model.name".to_string()));
        }
        if self.dataset.turns_per_conversation == 0 {
            return Err(ConfigError::Invalid("dataset.turns_per_conversation must be at least 1".to_string()));
        }
        if self.model.timeout_secs == 0 {
            return Err(ConfigError::Invalid("model.timeout_secs must be positive".to_string()));
        }
        if self.audio.sample_rate == Some(0) {
            return Err(ConfigError::Invalid("audio.sample_rate must be positive".to_string()));
        }
        match self.model.backend {
            Backend::Command if self.model.command.program.trim().is_empty() => {
                return Err(ConfigError::Invalid("model.command.program must not be empty".to_string()));
            }
            Backend::Kokoro if self.model.kokoro.speed <= 0.0 => {
                return Err(ConfigError::Invalid("model.kokoro.speed must be positive".to_string()));
            }
            _ => {}
        }
        Ok(())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        info!("Configuration:");
        info!("  Dataset: {}", self.dataset.dialog_data_path);
        if let Some(format) = self.dataset.format {
            info!("  Dataset format: {:?}", format);
        }
        info!("  Turns per conversation (no id): {}", self.dataset.turns_per_conversation);
        if let Some(max) = self.dataset.max_utterances {
            info!("  Max utterances: {}", max);
        }
        info!("  Model: {} ({:?} backend)", self.model.name, self.model.backend);
        if let Some(checkpoint) = self.model.checkpoint_uri() {
            info!("  Checkpoint: {}", checkpoint);
        }
        info!("  Synthesis timeout: {}s", self.model.timeout_secs);
        if self.model.backend == Backend::Kokoro {
            info!("  Kokoro voice: {} (speed {}, {} provider)", self.model.kokoro.voice, self.model.kokoro.speed, self.model.kokoro.provider);
        }
        info!("  Voice references: {} pooled, {} per speaker", self.voices.references.len(), self.voices.speakers.len());
        match self.audio.sample_rate {
            Some(rate) => info!("  Output sample rate: {} Hz", rate),
            None => info!("  Output sample rate: model native"),
        }
        info!("  Concatenate conversations: {}", self.audio.concatenate);
    }
}

fn default_turns_per_conversation() -> usize {
    10
}

fn default_repo() -> String {
    "F5-TTS".to_string()
}

fn default_organization() -> String {
    "SWivid".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

/// Get the default model directory (~/.dialog-tts/models).
fn default_model_dir() -> PathBuf {
    if let Some(home_dir) = dirs::home_dir() {
        home_dir.join(".dialog-tts").join("models")
    } else {
        PathBuf::from("models")
    }
}
