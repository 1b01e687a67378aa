//! Dialogue rows and the mapping from raw records onto them.

use serde_json::{Map, Value};

use super::DatasetError;
use crate::config::ColumnSettings;

/// Speaker used when a record names none.
pub const DEFAULT_SPEAKER: &str = "speaker1";

/// One dataset record: a single utterance with its attribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueRow {
    pub speaker: String,
    pub text: String,
    pub conversation_id: Option<String>,
    pub turn: Option<u32>,
    pub emotion: Option<String>,
    /// 1-based position of the record in the source (line number for JSON Lines)
    pub record: usize,
}

impl DialogueRow {
    /// A row with only speaker and text set.
    #[cfg(test)]
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self { speaker: speaker.into(), text: text.into(), conversation_id: None, turn: None, emotion: None, record: 0 }
    }

    #[cfg(test)]
    pub fn in_conversation(mut self, id: impl Into<String>, turn: u32) -> Self {
        self.conversation_id = Some(id.into());
        self.turn = Some(turn);
        self
    }
}

/// Column names used to pull fields out of a record.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    conversation: String,
    turn: String,
    speaker: String,
    text: String,
    emotion: String,
}

impl From<&ColumnSettings> for ColumnMap {
    fn from(columns: &ColumnSettings) -> Self {
        Self {
            conversation: columns.conversation.clone(),
            turn: columns.turn.clone(),
            speaker: columns.speaker.clone(),
            text: columns.text.clone(),
            emotion: columns.emotion.clone(),
        }
    }
}

impl ColumnMap {
    /// Build a row from a JSON object (CSV records are converted to string-valued objects first).
    ///
    /// # Errors
    /// Returns `DatasetError::MalformedRow` when the text is missing or a field has the wrong type.
    pub fn row_from(&self, record: usize, fields: &Map<String, Value>) -> Result<DialogueRow, DatasetError> {
        let malformed = |reason: String| DatasetError::MalformedRow { record, reason };

        let text = match fields.get(&self.text) {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(other) => return Err(malformed(format!("column '{}' must be a string, got {}", self.text, other))),
            None => return Err(malformed(format!("missing text column '{}'", self.text))),
        };

        let speaker = label(fields.get(&self.speaker)).map_err(|v| malformed(format!("column '{}' has unsupported value {}", self.speaker, v)))?;
        let conversation_id =
            label(fields.get(&self.conversation)).map_err(|v| malformed(format!("column '{}' has unsupported value {}", self.conversation, v)))?;
        let emotion = label(fields.get(&self.emotion)).map_err(|v| malformed(format!("column '{}' has unsupported value {}", self.emotion, v)))?;
        let turn = turn_index(fields.get(&self.turn)).map_err(|v| malformed(format!("column '{}' is not a turn index: {}", self.turn, v)))?;

        Ok(DialogueRow { speaker: speaker.unwrap_or_else(|| DEFAULT_SPEAKER.to_string()), text, conversation_id, turn, emotion, record })
    }
}

/// Integer value of a number, accepting whole floats such as `3.0` (pandas exports integer
/// columns with missing values as floats).
fn whole(n: &serde_json::Number) -> Option<i64> {
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    let f = n.as_f64()?;
    (f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64).then_some(f as i64)
}

/// String or integer label; empty strings and nulls count as absent.
fn label(value: Option<&Value>) -> Result<Option<String>, &Value> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(Value::Number(n)) if n.is_u64() => Ok(Some(n.to_string())),
        Some(v @ Value::Number(n)) => whole(n).map(|i| Some(i.to_string())).ok_or(v),
        Some(other) => Err(other),
    }
}

/// Non-negative integer, possibly written as a string or a whole float.
fn turn_index(value: Option<&Value>) -> Result<Option<u32>, &Value> {
    let Some(value) = value else {
        return Ok(None);
    };
    let index = match value {
        Value::Null => return Ok(None),
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| s.parse::<serde_json::Number>().ok().as_ref().and_then(whole))
        }
        Value::Number(n) => whole(n),
        _ => None,
    };
    index.and_then(|i| u32::try_from(i).ok()).map(Some).ok_or(value)
}
