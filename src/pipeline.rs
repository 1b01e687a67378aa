//! The batch run: dataset → conversations → voices → synthesis → files.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::audio::{OutputError, OutputWriter};
use crate::config::{Settings, VoiceBook};
use crate::conversation::{self, Conversation, ConversationBuilder};
use crate::dataset::{self, DatasetError};
use crate::fetch::{Caches, FetchError};
use crate::tts::{self, SpeechModel, SynthesisError, Synthesizer};

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error("voice reference unreachable: {0}")]
    VoiceReference(#[from] FetchError),

    #[error(transparent)]
    Model(#[from] SynthesisError),
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub conversations: usize,   // Conversations processed
    pub attempted: usize,       // Utterances sent to the model
    pub written: usize,         // Utterance files written
    pub failed: usize,          // Utterances skipped after an error
    pub combined: usize,        // Combined conversation files written
    pub combine_failed: usize,  // Conversations whose combined file could not be written
}

impl RunSummary {
    /// True when every utterance (and every combined file) made it to disk.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.combine_failed == 0
    }
}

/// Everything a run needs besides the model.
struct Plan {
    conversations: Vec<Conversation>,
    voices: VoiceBook,
    writer: OutputWriter,
}

/// Output directory first, then the dataset, then the voices.
async fn prepare(settings: &Settings, output_dir: &Path, caches: &Caches) -> Result<Plan, PipelineError> {
    let writer = OutputWriter::new(output_dir, &settings.audio)?;

    let rows = dataset::open(&settings.dataset).await?;
    let conversations = ConversationBuilder::from_settings(&settings.dataset).build(rows)?;

    let voice_settings = settings.voices.clone().localize(caches).await?;
    let voices = VoiceBook::assign(&voice_settings, conversation::speakers(&conversations));

    Ok(Plan { conversations, voices, writer })
}

/// Run the whole batch with the configured model.
///
/// # Arguments
/// * `settings` - Validated settings
/// * `output_dir` - Directory receiving the audio files
///
/// # Returns
/// Counters for the run; per-utterance failures are counted, not returned.
///
/// # Errors
/// Returns an error if the output directory cannot be created, the dataset or a remote voice
/// reference cannot be read, or the model cannot be loaded.
pub async fn run(settings: &Settings, output_dir: &Path) -> Result<RunSummary, PipelineError> {
    let plan = prepare(settings, output_dir, &Caches::from_env()).await?;
    let model = tts::load_model(&settings.model).await?;
    Ok(execute(settings, plan, model).await)
}

/// Run the whole batch with an already loaded model.
pub async fn run_with_model(settings: &Settings, output_dir: &Path, model: Box<dyn SpeechModel>) -> Result<RunSummary, PipelineError> {
    let plan = prepare(settings, output_dir, &Caches::from_env()).await?;
    Ok(execute(settings, plan, model).await)
}

async fn execute(settings: &Settings, plan: Plan, model: Box<dyn SpeechModel>) -> RunSummary {
    let Plan { conversations, voices, mut writer } = plan;
    let mut synthesizer = Synthesizer::new(model, settings.model.timeout()).with_delay(Duration::from_millis(settings.audio.delay_ms));
    let mut summary = RunSummary { conversations: conversations.len(), ..Default::default() };
    let total: usize = conversations.iter().map(Conversation::len).sum();
    let started = Instant::now();

    info!("🚀 Synthesizing {} utterance(s) in {} conversation(s) with {}", total, conversations.len(), synthesizer.model_name());

    for conversation in &conversations {
        info!("💬 Conversation {} ({} turns)", conversation.id, conversation.len());
        let mut files: Vec<PathBuf> = Vec::with_capacity(conversation.len());

        for turn in &conversation.turns {
            summary.attempted += 1;
            let voice = voices.lookup(&turn.row.speaker, turn.row.emotion.as_deref());
            info!("🗣️  [{}/{}] {}: {}", summary.attempted, total, turn.row.speaker, turn.row.text);

            let clip = match synthesizer.synthesize(&conversation.id, turn, voice).await {
                Ok(clip) => clip,
                Err(e) => {
                    error!("❌ Conversation {} turn {} (record {}): {}", conversation.id, turn.index, turn.row.record, e);
                    summary.failed += 1;
                    continue;
                }
            };

            match writer.write_clip(&clip) {
                Ok(path) => {
                    summary.written += 1;
                    files.push(path);
                }
                Err(e) => {
                    error!("❌ Conversation {} turn {}: {}", conversation.id, turn.index, e);
                    summary.failed += 1;
                }
            }
        }

        if settings.audio.concatenate {
            if files.is_empty() {
                warn!("Conversation {} produced no audio, nothing to combine", conversation.id);
                continue;
            }
            match writer.combine(&conversation.id, &files) {
                Ok(_) => summary.combined += 1,
                Err(e) => {
                    error!("❌ Conversation {}: {}", conversation.id, e);
                    summary.combine_failed += 1;
                }
            }
        }
    }

    synthesizer.shutdown();
    debug!("Run finished in {:.2?}: {:?}", started.elapsed(), summary);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::{Audio, SynthesisRequest};
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::io::Write;

    /// Returns a short clip per utterance and fails on any text containing "FAIL".
    struct ScriptedModel {
        calls: usize,
    }

    #[async_trait]
    impl SpeechModel for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn synthesize(&mut self, request: &SynthesisRequest) -> Result<Audio, SynthesisError> {
            self.calls += 1;
            if request.text.contains("FAIL") {
                return Err(SynthesisError::Failed("scripted failure".to_string()));
            }
            Ok(Audio { samples: vec![0.1; 160 * request.text.len()], sample_rate: 16000 })
        }
    }

    fn scripted() -> Box<dyn SpeechModel> {
        Box::new(ScriptedModel { calls: 0 })
    }

    /// Write a JSONL dataset and settings pointing at it.
    fn fixture(dir: &Path, lines: &[&str], concatenate: bool) -> Settings {
        let path = dir.join("dialogs.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }

        let yaml = format!(
            "dataset:\n  dialog_data_path: {}\nmodel:\n  name: scripted\naudio:\n  concatenate: {}\n",
            path.display(),
            concatenate
        );
        Settings::from_yaml(&yaml, Path::new("test.yaml")).unwrap()
    }

    fn three_by_two(fail: Option<(u32, u32)>) -> Vec<String> {
        let mut lines = Vec::new();
        for dialog in 1..=3u32 {
            for turn in 1..=2u32 {
                let speaker = if turn == 1 { "Ana" } else { "Bruno" };
                let text = if fail == Some((dialog, turn)) { "FAIL here".to_string() } else { format!("line {dialog}.{turn}") };
                lines.push(format!(r#"{{"Dialog": {dialog}, "Turn": {turn}, "Speaker": "{speaker}", "Translated_Sentence": "{text}"}}"#));
            }
        }
        lines
    }

    fn file_names(dir: &Path) -> BTreeSet<String> {
        std::fs::read_dir(dir).unwrap().map(|e| e.unwrap().file_name().to_string_lossy().to_string()).collect()
    }

    #[tokio::test]
    async fn test_three_conversations_two_turns() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let lines = three_by_two(None);
        let settings = fixture(data.path(), &lines.iter().map(String::as_str).collect::<Vec<_>>(), true);

        let summary = run_with_model(&settings, out.path(), scripted()).await.unwrap();
        assert_eq!(summary, RunSummary { conversations: 3, attempted: 6, written: 6, failed: 0, combined: 3, combine_failed: 0 });
        assert!(summary.is_success());

        let names = file_names(out.path());
        assert_eq!(names.len(), 9);
        assert!(names.contains("dialog_1_turn_1_Ana.wav"));
        assert!(names.contains("dialog_3_turn_2_Bruno.wav"));
        assert_eq!(names.iter().filter(|n| !n.contains("_turn_")).count(), 3);
    }

    #[tokio::test]
    async fn test_failed_turn_is_skipped() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let lines = three_by_two(Some((1, 2)));
        let settings = fixture(data.path(), &lines.iter().map(String::as_str).collect::<Vec<_>>(), false);

        let summary = run_with_model(&settings, out.path(), scripted()).await.unwrap();
        assert_eq!(summary.attempted, 6);
        assert_eq!(summary.written, 5);
        assert_eq!(summary.failed, 1);
        assert!(!summary.is_success());

        let names = file_names(out.path());
        assert!(names.contains("dialog_1_turn_1_Ana.wav"));
        assert!(!names.contains("dialog_1_turn_2_Bruno.wav"));
        assert!(names.contains("dialog_2_turn_1_Ana.wav"));
        assert!(names.contains("dialog_2_turn_2_Bruno.wav"));
    }

    #[tokio::test]
    async fn test_rerun_overwrites() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let lines = three_by_two(None);
        let settings = fixture(data.path(), &lines.iter().map(String::as_str).collect::<Vec<_>>(), true);

        run_with_model(&settings, out.path(), scripted()).await.unwrap();
        let first = file_names(out.path());
        run_with_model(&settings, out.path(), scripted()).await.unwrap();
        assert_eq!(file_names(out.path()), first);
    }

    #[tokio::test]
    async fn test_clashing_file_names_do_not_overwrite() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let lines = [
            r#"{"Dialog": "c", "Turn": 2, "Speaker": "Ana", "Translated_Sentence": "explicit turn two"}"#,
            r#"{"Dialog": "c", "Speaker": "Ana", "Translated_Sentence": "second row of c"}"#,
            r#"{"Dialog": "a/b", "Turn": 1, "Speaker": "Bruno", "Translated_Sentence": "slash"}"#,
            r#"{"Dialog": "a b", "Turn": 1, "Speaker": "Bruno", "Translated_Sentence": "space"}"#,
        ];
        let settings = fixture(data.path(), &lines, false);

        let summary = run_with_model(&settings, out.path(), scripted()).await.unwrap();
        assert_eq!(summary.written, 4);
        assert_eq!(
            file_names(out.path()),
            BTreeSet::from(
                ["dialog_c_turn_2_Ana.wav", "dialog_c_turn_2_Ana_2.wav", "dialog_a_b_turn_1_Bruno.wav", "dialog_a_b_turn_1_Bruno_2.wav"]
                    .map(String::from)
            )
        );
    }

    #[tokio::test]
    async fn test_missing_dataset_is_fatal() {
        let data = tempfile::tempdir().unwrap();
        let out = data.path().join("out");
        let mut settings = fixture(data.path(), &[], false);
        settings.dataset.dialog_data_path = data.path().join("missing.jsonl").to_string_lossy().to_string();

        let result = run_with_model(&settings, &out, scripted()).await;
        assert!(matches!(result, Err(PipelineError::Dataset(_))));
        // The output directory is prepared before the dataset is read
        assert!(out.is_dir());
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unwritable_output_fails_before_dataset() {
        let data = tempfile::tempdir().unwrap();
        let blocker = data.path().join("file");
        std::fs::write(&blocker, "not a directory").unwrap();
        let mut settings = fixture(data.path(), &[], false);
        settings.dataset.dialog_data_path = data.path().join("missing.jsonl").to_string_lossy().to_string();

        let result = run_with_model(&settings, &blocker.join("out"), scripted()).await;
        assert!(matches!(result, Err(PipelineError::Output(OutputError::CreateDir { .. }))));
    }

    #[tokio::test]
    async fn test_remote_voice_reference_is_localized() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let caches = Caches { http: data.path().join("cache"), hub: hf_hub::Cache::new(data.path().join("hub")) };
        let url = "https://example.invalid/refs/ana.wav";
        std::fs::create_dir_all(&caches.http).unwrap();
        let cached = caches.http.join(crate::fetch::cache_file_name(url));
        std::fs::write(&cached, b"RIFF").unwrap();

        let mut settings = fixture(data.path(), &[r#"{"Speaker": "Ana", "Translated_Sentence": "Oi"}"#], false);
        settings.voices.references = vec![crate::config::VoiceReference { audio: Some(PathBuf::from(url)), ..Default::default() }];

        let plan = prepare(&settings, out.path(), &caches).await.unwrap();
        assert_eq!(plan.voices.lookup("Ana", None).unwrap().audio, Some(cached));
    }

    #[tokio::test]
    async fn test_model_load_failure_is_fatal() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let mut settings = fixture(data.path(), &[r#"{"Speaker": "Ana", "Translated_Sentence": "Oi"}"#], false);
        settings.model.backend = crate::config::Backend::Kokoro;
        settings.model.kokoro.model_dir = data.path().to_path_buf();

        let result = run(&settings, out.path()).await;
        assert!(matches!(result, Err(PipelineError::Model(SynthesisError::ModelLoad { .. }))));
    }
}
