//! Record readers for the supported dataset formats.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use parquet::file::reader::{FileReader, SerializedFileReader};
use serde_json::{Map, Value};
use tracing::debug;

use super::DatasetError;
use super::row::{ColumnMap, DialogueRow};
use crate::config::DatasetFormat;

/// Lazy, single-pass sequence of dataset rows.
pub type Rows = Box<dyn Iterator<Item = Result<DialogueRow, DatasetError>> + Send>;

/// Infer the format from the extension of a path or URL (query strings ignored).
pub fn detect_format(location: &str) -> Option<DatasetFormat> {
    let without_query = location.split(['?', '#']).next().unwrap_or(location);
    let extension = Path::new(without_query).extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "jsonl" | "ndjson" => Some(DatasetFormat::Jsonl),
        "json" => Some(DatasetFormat::Json),
        "csv" => Some(DatasetFormat::Csv),
        "parquet" => Some(DatasetFormat::Parquet),
        _ => None,
    }
}

/// Open a local dataset file.
///
/// JSON Lines, CSV and Parquet files are read one record at a time; a JSON array is parsed whole.
///
/// # Errors
/// Returns an error if the file cannot be opened, or its JSON array or Parquet footer cannot be parsed.
pub fn open_file(path: &Path, format: DatasetFormat, columns: ColumnMap) -> Result<Rows, DatasetError> {
    let file = File::open(path).map_err(|source| DatasetError::Io { path: path.to_path_buf(), source })?;
    debug!("Opened {} as {:?}", path.display(), format);

    match format {
        DatasetFormat::Jsonl => Ok(jsonl_rows(BufReader::new(file), columns)),
        DatasetFormat::Json => json_rows(BufReader::new(file), path, columns),
        DatasetFormat::Csv => Ok(csv_rows(file, columns)),
        DatasetFormat::Parquet => parquet_rows(file, path, columns),
    }
}

fn jsonl_rows<R: BufRead + Send + 'static>(reader: R, columns: ColumnMap) -> Rows {
    let rows = reader.lines().enumerate().filter_map(move |(index, line)| {
        let record = index + 1;
        let line = match line {
            Ok(line) => line,
            Err(e) => return Some(Err(DatasetError::MalformedRow { record, reason: e.to_string() })),
        };
        if line.trim().is_empty() {
            return None;
        }
        Some(
            serde_json::from_str::<Map<String, Value>>(&line)
                .map_err(|e| DatasetError::MalformedRow { record, reason: e.to_string() })
                .and_then(|fields| columns.row_from(record, &fields)),
        )
    });
    Box::new(rows)
}

fn json_rows<R: BufRead>(reader: R, path: &Path, columns: ColumnMap) -> Result<Rows, DatasetError> {
    let records: Vec<Map<String, Value>> =
        serde_json::from_reader(reader).map_err(|e| DatasetError::Malformed { path: path.to_path_buf(), reason: e.to_string() })?;
    let rows = records.into_iter().enumerate().map(move |(index, fields)| columns.row_from(index + 1, &fields));
    Ok(Box::new(rows))
}

fn csv_rows<R: std::io::Read + Send + 'static>(reader: R, columns: ColumnMap) -> Rows {
    let records = csv::Reader::from_reader(reader).into_deserialize::<HashMap<String, String>>();
    let rows = records.enumerate().map(move |(index, record)| {
        let number = index + 1;
        let record = record.map_err(|e| DatasetError::MalformedRow { record: number, reason: e.to_string() })?;
        let fields: Map<String, Value> = record.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
        columns.row_from(number, &fields)
    });
    Box::new(rows)
}

/// Rows of a Parquet file in file order. Row groups are decoded as the iterator reaches them.
fn parquet_rows(file: File, path: &Path, columns: ColumnMap) -> Result<Rows, DatasetError> {
    let reader = SerializedFileReader::new(file).map_err(|e| DatasetError::Malformed { path: path.to_path_buf(), reason: e.to_string() })?;
    let metadata = reader.metadata();
    debug!("Parquet file with {} row group(s), {} row(s)", metadata.num_row_groups(), metadata.file_metadata().num_rows());

    let rows = reader.into_iter().enumerate().map(move |(index, row)| {
        let record = index + 1;
        let row = row.map_err(|e| DatasetError::MalformedRow { record, reason: e.to_string() })?;
        match row.to_json_value() {
            Value::Object(fields) => columns.row_from(record, &fields),
            other => Err(DatasetError::MalformedRow { record, reason: format!("expected a record, found {}", other) }),
        }
    });
    Ok(Box::new(rows))
}
