//! External inference program backend.
//!
//! The program runs once per utterance with its arguments rendered from a template. Recognized
//! placeholders:
//!
//! | placeholder     | value                                                  |
//! |-----------------|--------------------------------------------------------|
//! | `{model}`       | model name                                             |
//! | `{checkpoint}`  | local checkpoint path                                  |
//! | `{ref_audio}`   | speaker reference recording                            |
//! | `{ref_text}`    | transcript of the reference recording (may be empty)   |
//! | `{text}`        | utterance text                                         |
//! | `{output_dir}`  | scratch directory the program must write into          |
//! | `{output_file}` | file name expected inside `{output_dir}`               |
//! | `{output}`      | full path of the expected WAV file                     |
//!
//! An argument whose placeholder has no value (e.g. no checkpoint configured) is dropped
//! together with the flag right before it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::model::{Audio, SpeechModel, SynthesisError, SynthesisRequest};
use crate::audio::wav;
use crate::config::ModelSettings;

/// File name the program is asked to write.
const OUTPUT_FILE: &str = "utterance.wav";

/// Speech model living in an external program.
pub struct CommandModel {
    program: String,
    args: Vec<String>,
    model: String,
    checkpoint: Option<PathBuf>,
}

impl CommandModel {
    /// # Arguments
    /// * `settings` - Model section of the configuration
    /// * `checkpoint` - Local checkpoint path, already fetched
    pub fn new(settings: &ModelSettings, checkpoint: Option<PathBuf>) -> Self {
        Self { program: settings.command.program.clone(), args: settings.command.args.clone(), model: settings.name.clone(), checkpoint }
    }

    fn uses(&self, placeholder: &str) -> bool {
        let token = format!("{{{}}}", placeholder);
        self.args.iter().any(|a| a.contains(&token))
    }

    /// Render the argument template, dropping arguments whose placeholders have no value.
    fn render_args(&self, vars: &HashMap<&str, Option<String>>) -> Vec<String> {
        let mut rendered: Vec<String> = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            match expand(arg, vars) {
                Some(value) => rendered.push(value),
                None => {
                    if rendered.last().is_some_and(|prev| prev.starts_with('-')) {
                        rendered.pop();
                    }
                }
            }
        }
        rendered
    }
}

/// Substitute `{name}` placeholders in one pass. `None` when a referenced placeholder has no value.
/// Braces that do not name a known placeholder are kept verbatim.
fn expand(template: &str, vars: &HashMap<&str, Option<String>>) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}').and_then(|end| vars.get(&after[..end]).map(|value| (end, value))) {
            Some((end, value)) => {
                out.push_str(value.as_deref()?);
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    Some(out)
}

#[async_trait]
impl SpeechModel for CommandModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn synthesize(&mut self, request: &SynthesisRequest) -> Result<Audio, SynthesisError> {
        let reference = request.voice.as_ref();
        let ref_audio = reference.and_then(|v| v.audio.clone());

        if self.uses("ref_audio") {
            match ref_audio {
                None => return Err(SynthesisError::NoVoice(request.speaker.clone())),
                Some(ref path) if !path.exists() => return Err(SynthesisError::MissingReference(path.clone())),
                Some(_) => {}
            }
        }

        // Scratch space is removed when `scratch` drops, success or not
        let scratch = tempfile::Builder::new()
            .prefix("dialog-tts-")
            .tempdir()
            .map_err(|e| SynthesisError::Failed(format!("failed to create scratch directory: {}", e)))?;
        let output = scratch.path().join(OUTPUT_FILE);

        let display = |p: &PathBuf| p.to_string_lossy().to_string();
        let vars: HashMap<&str, Option<String>> = HashMap::from([
            ("model", Some(self.model.clone())),
            ("checkpoint", self.checkpoint.as_ref().map(display)),
            ("ref_audio", ref_audio.as_ref().map(display)),
            ("ref_text", Some(reference.map(|v| v.text.clone()).unwrap_or_default())),
            ("text", Some(request.text.clone())),
            ("output_dir", Some(scratch.path().to_string_lossy().to_string())),
            ("output_file", Some(OUTPUT_FILE.to_string())),
            ("output", Some(display(&output))),
        ]);
        let args = self.render_args(&vars);

        debug!("Running {} {:?}", self.program, args);
        // kill_on_drop: a timed-out call drops this future and takes the child with it
        let result = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SynthesisError::Failed(format!("failed to run {}: {}", self.program, e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let detail = stderr.lines().rev().map(str::trim).find(|l| !l.is_empty()).unwrap_or("no error output");
            return Err(SynthesisError::Failed(format!("{} exited with {}: {}", self.program, result.status, detail)));
        }

        if !output.exists() {
            return Err(SynthesisError::Failed(format!("{} did not write {}", self.program, output.display())));
        }

        let (samples, sample_rate) = wav::read_mono(&output).map_err(|e| SynthesisError::Failed(format!("unreadable model output: {}", e)))?;
        Ok(Audio { samples, sample_rate })
    }
}
