//! Test support: in-memory sink and note fixtures

use crate::record::{NoteRow, TIMESTAMP_FORMAT};
use crate::sink::NoteSink;
use crate::vault::{FileIdentity, VaultNote};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime};
use serde_json::Map;

/// In-memory [`NoteSink`] that records inserted rows and derives the
/// watermark the same way the real store does, by aggregating over the
/// persisted capture timestamps. Can be told to fail on a specific path
/// to exercise fail-fast behavior.
#[derive(Default)]
pub struct MemorySink {
    pub rows: Vec<NoteRow>,
    pub schema_calls: usize,
    pub fail_on_path: Option<String>,
    /// Every path an insert was attempted for, in order.
    pub insert_attempts: Vec<String>,
}

#[async_trait]
impl NoteSink for MemorySink {
    async fn ensure_schema(&mut self) -> Result<()> {
        self.schema_calls += 1;
        Ok(())
    }

    async fn watermark(&mut self) -> Result<Option<NaiveDateTime>> {
        Ok(self
            .rows
            .iter()
            .filter_map(|row| DateTime::parse_from_str(&row.timestamp, TIMESTAMP_FORMAT).ok())
            .map(|ts| ts.naive_local())
            .max())
    }

    async fn insert_note(&mut self, row: &NoteRow) -> Result<()> {
        self.insert_attempts.push(row.path.clone());
        if self.fail_on_path.as_deref() == Some(row.path.as_str()) {
            anyhow::bail!("simulated insert failure for {}", row.path);
        }
        self.rows.push(row.clone());
        Ok(())
    }
}

/// A minimal in-memory note with a controlled modification time.
pub fn note_fixture(path: &str, mtime: DateTime<Local>) -> VaultNote {
    let name = path
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .trim_end_matches(".md")
        .to_string();
    let folder = path.rsplit_once('/').map(|(dir, _)| dir.to_string());

    VaultNote {
        path: path.to_string(),
        identity: FileIdentity {
            name,
            path: path.to_string(),
            folder: folder.unwrap_or_default(),
            extension: "md".to_string(),
            size: 0,
            ctime: None,
            mtime,
            tags: Vec::new(),
        },
        custom: Map::new(),
        content: String::new(),
    }
}
