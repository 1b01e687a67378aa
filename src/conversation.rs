//! Grouping of dialogue rows into ordered conversations.
//!
//! Rows carrying a conversation id are grouped by that id, in order of first appearance.
//! Rows without one are cut into contiguous chunks of `turns_per_conversation` rows, each chunk
//! becoming a conversation with the synthetic id `auto{n}`.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::config::DatasetSettings;
use crate::dataset::{DatasetError, DialogueRow};

/// Inline attribution tag, e.g. `[speaker:Ana, emotion:happy]` or `[speaker:Ana]`.
static SPEAKER_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[speaker:\s*([^,\]]*?)\s*(?:,\s*emotion:\s*([^\]]*?)\s*)?\]\s*").expect("speaker tag pattern is valid")
});

/// One utterance at its position in a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    /// The row's own turn number, or its 1-based position in the conversation
    pub index: u32,
    pub row: DialogueRow,
}

/// Ordered utterances sharing one dialogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: String,
    pub turns: Vec<Turn>,
}

impl Conversation {
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Groups a single pass over the dataset into conversations.
#[derive(Debug, Clone)]
pub struct ConversationBuilder {
    turns_per_conversation: usize,
    max_utterances: Option<usize>,
}

impl ConversationBuilder {
    /// # Arguments
    /// * `turns_per_conversation` - Chunk size for rows without a conversation id (at least 1)
    pub fn new(turns_per_conversation: usize) -> Self {
        Self { turns_per_conversation: turns_per_conversation.max(1), max_utterances: None }
    }

    pub fn from_settings(settings: &DatasetSettings) -> Self {
        Self { turns_per_conversation: settings.turns_per_conversation.max(1), max_utterances: settings.max_utterances }
    }

    /// Stop consuming rows after `max` of them.
    pub fn with_limit(mut self, max: usize) -> Self {
        self.max_utterances = Some(max);
        self
    }

    /// Consume the rows and group them.
    ///
    /// # Returns
    /// Conversations in order of first appearance; empty ones are dropped.
    ///
    /// # Errors
    /// The first dataset error in the sequence aborts grouping.
    pub fn build<I>(&self, rows: I) -> Result<Vec<Conversation>, DatasetError>
    where
        I: IntoIterator<Item = Result<DialogueRow, DatasetError>>,
    {
        let limit = self.max_utterances.unwrap_or(usize::MAX);
        let mut conversations: Vec<Conversation> = Vec::new();
        let mut by_id: HashMap<String, usize> = HashMap::new();
        // (slot index, rows so far) of the chunk currently collecting id-less rows
        let mut open_chunk: Option<(usize, usize)> = None;
        let mut chunks = 0usize;
        let mut consumed = 0usize;

        for row in rows.into_iter().take(limit) {
            let mut row = row?;
            consumed += 1;
            apply_speaker_tag(&mut row);

            let slot = match row.conversation_id.clone() {
                Some(id) => *by_id.entry(id.clone()).or_insert_with(|| {
                    conversations.push(Conversation { id, turns: Vec::new() });
                    conversations.len() - 1
                }),
                None => match open_chunk {
                    Some((slot, filled)) if filled < self.turns_per_conversation => {
                        open_chunk = Some((slot, filled + 1));
                        slot
                    }
                    _ => {
                        chunks += 1;
                        conversations.push(Conversation { id: format!("auto{}", chunks), turns: Vec::new() });
                        let slot = conversations.len() - 1;
                        open_chunk = Some((slot, 1));
                        slot
                    }
                },
            };

            let conversation = &mut conversations[slot];
            let index = row.turn.unwrap_or(conversation.turns.len() as u32 + 1);
            conversation.turns.push(Turn { index, row });
        }

        let before = conversations.len();
        conversations.retain(|c| !c.is_empty());
        if conversations.len() < before {
            debug!("Dropped {} empty conversation(s)", before - conversations.len());
        }

        info!("Grouped {} utterance(s) into {} conversation(s)", consumed, conversations.len());
        Ok(conversations)
    }
}

/// Move an inline `[speaker:…, emotion:…]` tag out of the text and into the row's fields.
pub fn apply_speaker_tag(row: &mut DialogueRow) {
    let Some(captures) = SPEAKER_TAG.captures(&row.text) else {
        return;
    };

    if let Some(speaker) = captures.get(1).map(|m| m.as_str().trim()).filter(|s| !s.is_empty()) {
        row.speaker = speaker.to_string();
    }
    if let Some(emotion) = captures.get(2).map(|m| m.as_str().trim()).filter(|s| !s.is_empty()) {
        row.emotion = Some(emotion.to_string());
    }

    row.text = SPEAKER_TAG.replace_all(&row.text, "").trim().to_string();
}

/// Distinct speakers in order of first appearance in the dataset.
///
/// Conversations interleave in the source, so order comes from each speaker's earliest record
/// number rather than from the grouped conversations.
pub fn speakers(conversations: &[Conversation]) -> Vec<&str> {
    let mut seen: Vec<(&str, usize)> = Vec::new();
    for turn in conversations.iter().flat_map(|c| c.turns.iter()) {
        let speaker = turn.row.speaker.as_str();
        match seen.iter_mut().find(|(s, _)| *s == speaker) {
            Some((_, first)) => *first = (*first).min(turn.row.record),
            None => seen.push((speaker, turn.row.record)),
        }
    }
    seen.sort_by_key(|&(_, first)| first);
    seen.into_iter().map(|(speaker, _)| speaker).collect()
}
