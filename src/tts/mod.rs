//! Speech synthesis.
//!
//! The loaded model is an explicitly owned [`SpeechModel`] handle: [`load_model`] creates it,
//! a [`Synthesizer`] drives it with a per-call timeout, and [`Synthesizer::shutdown`] releases it.

mod command;
mod kokoro;
mod model;
mod synthesizer;

use tracing::info;

use crate::config::{Backend, ModelSettings};
use crate::fetch;

pub use command::CommandModel;
pub use kokoro::KokoroModel;
pub use model::{Audio, SpeechModel, SynthesisError, SynthesisRequest};
pub use synthesizer::{SynthesizedClip, Synthesizer};

/// Load the configured speech model.
///
/// For the command backend, a remote checkpoint is downloaded into the cache first.
///
/// # Errors
/// Returns `SynthesisError::ModelLoad` if the model or its checkpoint cannot be made available.
pub async fn load_model(settings: &ModelSettings) -> Result<Box<dyn SpeechModel>, SynthesisError> {
    info!("🧠 Loading model {} ({:?} backend)", settings.name, settings.backend);

    match settings.backend {
        Backend::Kokoro => Ok(Box::new(KokoroModel::load(settings)?)),
        Backend::Command => {
            let checkpoint = match settings.checkpoint_uri() {
                Some(uri) => {
                    info!("Loading model from checkpoint: {}", uri);
                    let path = fetch::fetch(&uri).await.map_err(|e| SynthesisError::ModelLoad { model: settings.name.clone(), reason: e.to_string() })?;
                    Some(path)
                }
                None => None,
            };
            Ok(Box::new(CommandModel::new(settings, checkpoint)))
        }
    }
}
