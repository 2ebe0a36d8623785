//! On-disk shape of a saved conversation.

use std::fmt;

use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::conversation::Message;

/// ISO-8601 local timestamp with a fixed width, so string order is time order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
/// Compact stamp appended to the slug in file names.
pub const FILE_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

const UNKNOWN_QUESTION: &str = "Unknown Question";

/// Stable identifier of a saved conversation: its file stem.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Accept a file stem, rejecting anything that could leave the history directory.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && raw != "."
            && !raw.contains("..")
            && !raw.contains(['/', '\\', '\0']);
        valid.then(|| Self(raw.to_string()))
    }

    /// Borrow the stem.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name on disk.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.json", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A persisted conversation as returned by the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SavedHistoryRecord {
    /// File-derived identity; never changes.
    pub id: RecordId,
    /// First user question; never changes.
    pub question: String,
    /// User-editable label.
    pub display_name: String,
    /// Creation instant, ISO-8601.
    pub timestamp: String,
    /// Saved turns in order.
    pub messages: Vec<Message>,
}

impl SavedHistoryRecord {
    /// Creation instant, if the stored timestamp is well formed.
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Local>> {
        parse_timestamp(&self.timestamp)
    }

    /// Display name cut to `max_chars` characters, with `...` when shortened.
    #[must_use]
    pub fn short_label(&self, max_chars: usize) -> String {
        if self.display_name.chars().count() <= max_chars {
            return self.display_name.clone();
        }
        let head: String = self.display_name.chars().take(max_chars).collect();
        format!("{head}...")
    }
}

/// Document written by `save`.
#[derive(Serialize)]
pub(crate) struct RecordDocument<'a> {
    pub question: &'a str,
    pub display_name: &'a str,
    pub timestamp: &'a str,
    pub chat_history: &'a [Message],
}

/// Tolerant view used when reading: older or hand-edited files may lack keys.
#[derive(Deserialize)]
pub(crate) struct StoredDocument {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    chat_history: Vec<Message>,
}

impl StoredDocument {
    pub(crate) fn into_record(self, id: RecordId) -> SavedHistoryRecord {
        let question = self.question.unwrap_or_else(|| UNKNOWN_QUESTION.to_string());
        let display_name = self.display_name.unwrap_or_else(|| question.clone());
        SavedHistoryRecord {
            id,
            question,
            display_name,
            timestamp: self.timestamp.unwrap_or_default(),
            messages: self.chat_history,
        }
    }
}

/// Format an instant the way records store it.
#[must_use]
pub fn format_timestamp(instant: &DateTime<Local>) -> String {
    instant.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp back into local time.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Local>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()?
        .and_local_timezone(Local)
        .earliest()
}
