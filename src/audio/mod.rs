//! Audio output: WAV files, resampling, and per-conversation concatenation.

pub mod resampler;
pub mod wav;
mod writer;

pub use writer::{OutputError, OutputWriter};
