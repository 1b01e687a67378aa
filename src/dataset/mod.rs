//! Dialogue dataset provider.
//!
//! Resolves the configured dataset location and exposes its records as a lazy, single-pass
//! sequence of [`DialogueRow`]s.

mod reader;
mod row;

use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

use crate::config::DatasetSettings;
use crate::fetch::{self, FetchError};

pub use reader::{Rows, detect_format, open_file};
pub use row::{ColumnMap, DialogueRow};

/// Errors raised while resolving or reading the dialogue dataset. All of them are fatal to a run.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("dataset source unreachable: {0}")]
    Unreachable(#[from] FetchError),

    #[error("unsupported dataset format for '{0}' (expected .jsonl, .json, .csv or .parquet, or set dataset.format)")]
    UnsupportedFormat(String),

    #[error("failed to read dataset {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed dataset {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("malformed record {record}: {reason}")]
    MalformedRow { record: usize, reason: String },
}

/// Resolve the dataset location (downloading it if remote) and open it.
///
/// # Arguments
/// * `settings` - Dataset section of the configuration
///
/// # Returns
/// A lazy iterator over the dataset records.
///
/// # Errors
/// Returns an error if the source is unreachable, its format is unknown, or it cannot be opened.
pub async fn open(settings: &DatasetSettings) -> Result<Rows, DatasetError> {
    let uri = settings.dialog_data_path.as_str();
    let format = match settings.format {
        Some(format) => format,
        None => detect_format(uri).ok_or_else(|| DatasetError::UnsupportedFormat(uri.to_string()))?,
    };

    info!("📚 Loading dialog data from: {}", uri);
    let path = fetch::fetch(uri).await?;

    open_file(&path, format, ColumnMap::from(&settings.columns))
}
