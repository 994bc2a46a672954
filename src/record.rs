//! Row normalization for the destination table
//!
//! A [`NoteRow`] is the flat shape bound to the five-column insert:
//! path, capture timestamp, file metadata, custom metadata, content.
//! The capture timestamp is assigned at upload time and is not the
//! note's own modification time.

use crate::vault::{VaultNote, RESERVED_KEYS};
use anyhow::Result;
use chrono::{DateTime, Local};
use serde_json::Value;

/// Capture-timestamp format: date, 24-hour time, explicit UTC offset.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

/// A normalized row bound for `obsidian.file`.
#[derive(Debug, Clone)]
pub struct NoteRow {
    pub path: String,
    /// Capture time in [`TIMESTAMP_FORMAT`], local wall clock.
    pub timestamp: String,
    pub file_metadata: Value,
    pub custom_metadata: Value,
    pub content: String,
}

impl NoteRow {
    /// Build a row from a note, stamping it with `captured_at`.
    ///
    /// Identity fields go into `file_metadata` only; the custom map is
    /// persisted as-is apart from a second pass over the reserved keys,
    /// which guards callers that build [`VaultNote`] values by hand.
    pub fn from_note(note: &VaultNote, captured_at: DateTime<Local>) -> Result<Self> {
        let file_metadata = serde_json::to_value(&note.identity)?;

        let mut custom = note.custom.clone();
        for key in RESERVED_KEYS {
            custom.remove(*key);
        }

        Ok(Self {
            path: note.path.clone(),
            timestamp: captured_at.format(TIMESTAMP_FORMAT).to_string(),
            file_metadata,
            custom_metadata: Value::Object(custom),
            content: note.content.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::note_fixture;
    use chrono::TimeZone;

    #[test]
    fn test_identity_fields_live_in_file_metadata_only() {
        let mut note = note_fixture("journal/day.md", Local::now());
        note.custom
            .insert("file".to_string(), Value::from("shadow"));
        note.custom
            .insert("position".to_string(), Value::from(7));
        note.custom
            .insert("project".to_string(), Value::from("alpha"));

        let row = NoteRow::from_note(&note, Local::now()).unwrap();

        let custom = row.custom_metadata.as_object().unwrap();
        assert!(!custom.contains_key("file"));
        assert!(!custom.contains_key("position"));
        assert_eq!(custom.get("project"), Some(&Value::from("alpha")));

        let identity = row.file_metadata.as_object().unwrap();
        assert_eq!(identity.get("path"), Some(&Value::from("journal/day.md")));
        assert!(identity.contains_key("mtime"));
        assert!(identity.contains_key("size"));
        assert_eq!(row.path, "journal/day.md");
    }

    #[test]
    fn test_timestamp_has_explicit_offset() {
        let note = note_fixture("a.md", Local::now());
        let captured_at = Local.with_ymd_and_hms(2024, 3, 9, 14, 30, 5).unwrap();

        let row = NoteRow::from_note(&note, captured_at).unwrap();

        assert!(row.timestamp.starts_with("2024-03-09 14:30:05"));
        let parsed = DateTime::parse_from_str(&row.timestamp, TIMESTAMP_FORMAT).unwrap();
        assert_eq!(parsed.naive_local(), captured_at.naive_local());
    }
}
