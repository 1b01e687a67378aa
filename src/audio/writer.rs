//! Output writer: one WAV per utterance, plus optional per-conversation files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::{resampler, wav};
use crate::config::{AudioSettings, SampleFormat};
use crate::tts::SynthesizedClip;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to create output directory {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: std::io::Error },

    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: hound::Error },

    #[error("failed to read back {}: {source}", path.display())]
    Read { path: PathBuf, source: hound::Error },

    #[error("sample rate mismatch in {}: expected {expected} Hz, found {found} Hz", path.display())]
    SampleRateMismatch { path: PathBuf, expected: u32, found: u32 },

    #[error("resampling failed: {0}")]
    Resample(String),

    #[error("conversation '{0}' has no audio to combine")]
    NothingToCombine(String),
}

/// Make a name component safe for file names: ASCII alphanumerics, `-`, `_` and `.` are
/// kept, anything else becomes `_`.
pub fn sanitize(component: &str) -> String {
    let cleaned: String = component.chars().map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' }).collect();
    if cleaned.is_empty() { "_".to_string() } else { cleaned }
}

/// Writes synthesized clips under a single output directory.
///
/// Names are derived from the conversation id, turn and speaker. Distinct inputs can sanitize to
/// the same name (`a/b` and `a b`, or two rows claiming the same turn), so the writer remembers
/// every file it wrote in this run and gives a later clash a `_2`, `_3`, ... suffix instead of
/// overwriting. Files left by earlier runs are still overwritten.
pub struct OutputWriter {
    directory: PathBuf,
    sample_rate: Option<u32>,
    sample_format: SampleFormat,
    pause_ms: u64,
    claimed: HashSet<PathBuf>,
}

impl OutputWriter {
    /// Create the writer, creating the output directory and its parents.
    ///
    /// # Errors
    /// Returns `OutputError::CreateDir` if the directory cannot be created.
    pub fn new(directory: &Path, audio: &AudioSettings) -> Result<Self, OutputError> {
        std::fs::create_dir_all(directory).map_err(|source| OutputError::CreateDir { path: directory.to_path_buf(), source })?;
        info!("📁 Writing audio to {}", directory.display());

        Ok(Self {
            directory: directory.to_path_buf(),
            sample_rate: audio.sample_rate,
            sample_format: audio.sample_format,
            pause_ms: audio.pause_ms,
            claimed: HashSet::new(),
        })
    }

    /// Preferred path of the file for one turn.
    fn clip_path(&self, conversation_id: &str, turn: u32, speaker: &str) -> PathBuf {
        self.directory.join(format!("dialog_{}_turn_{}_{}.wav", sanitize(conversation_id), turn, sanitize(speaker)))
    }

    /// Preferred path of the combined file for one conversation.
    fn conversation_path(&self, conversation_id: &str) -> PathBuf {
        self.directory.join(format!("dialog_{}.wav", sanitize(conversation_id)))
    }

    /// Reserve `path` for this run, or the first free `{stem}_{n}.wav` when it is taken.
    fn claim(&mut self, path: PathBuf) -> PathBuf {
        if self.claimed.insert(path.clone()) {
            return path;
        }

        let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let mut n = 2u32;
        loop {
            let candidate = path.with_file_name(format!("{}_{}.wav", stem, n));
            if self.claimed.insert(candidate.clone()) {
                warn!("⚠️  {} was already written in this run, using {}", path.display(), candidate.display());
                return candidate;
            }
            n += 1;
        }
    }

    /// Write one clip, resampled to the configured rate.
    ///
    /// # Returns
    /// Path of the written file
    pub fn write_clip(&mut self, clip: &SynthesizedClip) -> Result<PathBuf, OutputError> {
        let path = self.claim(self.clip_path(&clip.conversation_id, clip.turn, &clip.speaker));

        let (samples, rate) = match self.sample_rate {
            Some(rate) if rate != clip.sample_rate => {
                debug!("Resampling {} Hz -> {} Hz", clip.sample_rate, rate);
                let resampled = resampler::resample(&clip.samples, clip.sample_rate, rate).map_err(|e| OutputError::Resample(format!("{:#}", e)))?;
                (resampled, rate)
            }
            _ => (clip.samples.clone(), clip.sample_rate),
        };

        wav::write(&path, &samples, rate, self.sample_format).map_err(|source| OutputError::Write { path: path.clone(), source })?;
        debug!("💾 Saved {} ({:.2}s)", path.display(), clip.duration_secs());
        Ok(path)
    }

    /// Join the turn files of a conversation into one file, with `pause_ms` of silence between turns.
    ///
    /// # Arguments
    /// * `conversation_id` - Conversation the files belong to
    /// * `clips` - Turn files in turn order
    ///
    /// # Errors
    /// Returns `SampleRateMismatch` when the files do not share one sample rate.
    pub fn combine(&mut self, conversation_id: &str, clips: &[PathBuf]) -> Result<PathBuf, OutputError> {
        if clips.is_empty() {
            return Err(OutputError::NothingToCombine(conversation_id.to_string()));
        }

        let mut combined: Vec<f32> = Vec::new();
        let mut rate: Option<u32> = None;

        for (i, clip) in clips.iter().enumerate() {
            let (samples, clip_rate) = wav::read_mono(clip).map_err(|source| OutputError::Read { path: clip.clone(), source })?;
            let expected = *rate.get_or_insert(clip_rate);
            if clip_rate != expected {
                return Err(OutputError::SampleRateMismatch { path: clip.clone(), expected, found: clip_rate });
            }

            if i > 0 && self.pause_ms > 0 {
                let gap = (expected as u64 * self.pause_ms / 1000) as usize;
                combined.resize(combined.len() + gap, 0.0);
            }
            combined.extend_from_slice(&samples);
        }

        let rate = rate.unwrap_or_default();
        let path = self.claim(self.conversation_path(conversation_id));
        wav::write(&path, &combined, rate, self.sample_format).map_err(|source| OutputError::Write { path: path.clone(), source })?;

        info!("🔗 Combined {} turn(s) into {}", clips.len(), path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(conversation: &str, turn: u32, speaker: &str, samples: Vec<f32>, sample_rate: u32) -> SynthesizedClip {
        SynthesizedClip { conversation_id: conversation.to_string(), turn, speaker: speaker.to_string(), samples, sample_rate }
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("Ana Maria"), "Ana_Maria");
        assert_eq!(sanitize("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize("José"), "Jos_");
        assert_eq!(sanitize("speaker-1.v2"), "speaker-1.v2");
        assert_eq!(sanitize(""), "_");
    }

    #[test]
    fn test_creates_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("a/b/c");
        OutputWriter::new(&out, &AudioSettings::default()).unwrap();
        assert!(out.is_dir());
    }

    #[test]
    fn test_later_run_overwrites() {
        let dir = tempfile::tempdir().unwrap();

        let first = OutputWriter::new(dir.path(), &AudioSettings::default()).unwrap().write_clip(&clip("7", 2, "Bruno", vec![0.1; 100], 16000)).unwrap();
        let second = OutputWriter::new(dir.path(), &AudioSettings::default()).unwrap().write_clip(&clip("7", 2, "Bruno", vec![0.2; 50], 16000)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.file_name().unwrap(), "dialog_7_turn_2_Bruno.wav");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        // Overwritten, not appended
        let (samples, _) = wav::read_mono(&second).unwrap();
        assert_eq!(samples.len(), 50);
    }

    #[test]
    fn test_clashing_names_in_one_run_get_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = OutputWriter::new(dir.path(), &AudioSettings::default()).unwrap();

        let slash = writer.write_clip(&clip("a/b", 1, "Ana", vec![0.1; 10], 16000)).unwrap();
        let space = writer.write_clip(&clip("a b", 1, "Ana", vec![0.2; 20], 16000)).unwrap();
        let again = writer.write_clip(&clip("a_b", 1, "Ana", vec![0.3; 30], 16000)).unwrap();
        assert_eq!(slash.file_name().unwrap(), "dialog_a_b_turn_1_Ana.wav");
        assert_eq!(space.file_name().unwrap(), "dialog_a_b_turn_1_Ana_2.wav");
        assert_eq!(again.file_name().unwrap(), "dialog_a_b_turn_1_Ana_3.wav");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);

        // Every clip keeps its own samples
        assert_eq!(wav::read_mono(&slash).unwrap().0.len(), 10);
        assert_eq!(wav::read_mono(&space).unwrap().0.len(), 20);

        // A combined file never replaces a clip written earlier in the run
        let combined = writer.combine("a_b_turn_1_Ana", &[slash.clone()]).unwrap();
        assert_eq!(combined.file_name().unwrap(), "dialog_a_b_turn_1_Ana_4.wav");
        assert_eq!(wav::read_mono(&slash).unwrap().0.len(), 10);
    }

    #[test]
    fn test_write_resamples() {
        let dir = tempfile::tempdir().unwrap();
        let audio = AudioSettings { sample_rate: Some(16000), ..Default::default() };
        let mut writer = OutputWriter::new(dir.path(), &audio).unwrap();

        let path = writer.write_clip(&clip("1", 1, "Ana", vec![0.0; 24000], 24000)).unwrap();
        let (samples, rate) = wav::read_mono(&path).unwrap();
        assert_eq!(rate, 16000);
        assert_eq!(samples.len(), 16000);
    }

    #[test]
    fn test_combine_inserts_pauses() {
        let dir = tempfile::tempdir().unwrap();
        let audio = AudioSettings { pause_ms: 100, sample_format: SampleFormat::Float32, ..Default::default() };
        let mut writer = OutputWriter::new(dir.path(), &audio).unwrap();

        let a = writer.write_clip(&clip("c", 1, "Ana", vec![0.5; 1000], 10000)).unwrap();
        let b = writer.write_clip(&clip("c", 2, "Bruno", vec![-0.5; 500], 10000)).unwrap();
        let combined = writer.combine("c", &[a, b]).unwrap();
        assert_eq!(combined.file_name().unwrap(), "dialog_c.wav");

        let (samples, rate) = wav::read_mono(&combined).unwrap();
        assert_eq!(rate, 10000);
        assert_eq!(samples.len(), 1000 + 1000 + 500);
        assert_eq!(samples[999], 0.5);
        assert_eq!(samples[1000], 0.0);
        assert_eq!(samples[2000], -0.5);
    }

    #[test]
    fn test_combine_rejects_mixed_rates() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = OutputWriter::new(dir.path(), &AudioSettings::default()).unwrap();

        let a = writer.write_clip(&clip("c", 1, "Ana", vec![0.1; 10], 16000)).unwrap();
        let b = writer.write_clip(&clip("c", 2, "Ana", vec![0.1; 10], 24000)).unwrap();
        assert!(matches!(writer.combine("c", &[a, b]), Err(OutputError::SampleRateMismatch { expected: 16000, found: 24000, .. })));
        assert!(matches!(writer.combine("c", &[]), Err(OutputError::NothingToCombine(_))));
    }
}
