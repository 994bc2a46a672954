//! Change selection and upload orchestration
//!
//! The selector is a pure filter over a snapshot of the vault: given the
//! watermark (the max capture timestamp already persisted), it picks the
//! notes whose modification time is at or after it. The boundary is
//! inclusive so a crash between selecting and persisting can only cause
//! a duplicate row in the append-only log, never a missed update.
//!
//! Uploads go one row at a time and halt at the first failed insert.
//! The outcome of a pass is a [`SyncReport`] rather than an error, so a
//! partially-completed batch stays inspectable; the CLI layer turns the
//! report into operator-visible messages.

use crate::record::NoteRow;
use crate::sink::NoteSink;
use crate::vault::{Vault, VaultNote};
use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use tracing::{debug, info};

/// Outcome of one batch upload pass.
#[derive(Debug)]
pub struct SyncReport {
    /// Candidates selected by the watermark filter.
    pub selected: usize,
    /// Rows inserted (or, under dry-run, that would have been) before
    /// any failure.
    pub inserted: usize,
    /// The first failure, if the pass halted early.
    pub failure: Option<SyncFailure>,
}

/// The record a pass halted on, with the underlying cause.
#[derive(Debug)]
pub struct SyncFailure {
    pub path: String,
    pub error: anyhow::Error,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Read-only view of the archive relative to the vault.
#[derive(Debug)]
pub struct SyncStatus {
    pub watermark: Option<NaiveDateTime>,
    pub total: usize,
    /// Notes a sync pass would select right now.
    pub pending: usize,
}

/// Select the notes modified at or after the watermark.
///
/// An absent watermark means the store is empty and everything is
/// selected.
pub fn select_modified<'a>(
    notes: &'a [VaultNote],
    watermark: Option<NaiveDateTime>,
) -> Vec<&'a VaultNote> {
    match watermark {
        None => notes.iter().collect(),
        Some(mark) => notes
            .iter()
            .filter(|note| note.identity.mtime.naive_local() >= mark)
            .collect(),
    }
}

/// Upload a single note (the `upload-file` command).
pub async fn upload_note<S: NoteSink>(sink: &mut S, note: &VaultNote, dry_run: bool) -> Result<()> {
    let row = NoteRow::from_note(note, Local::now())?;
    if dry_run {
        info!("Dry-run: would insert note {}", row.path);
        return Ok(());
    }
    sink.insert_note(&row)
        .await
        .with_context(|| format!("Failed to insert note {}", note.path))
}

/// Upload every note modified since the watermark.
///
/// Insert failures are folded into the report and halt the pass;
/// failures establishing the watermark or the vault snapshot abort with
/// an error instead, since no per-record outcome exists yet.
pub async fn run_modified_upload<S: NoteSink>(
    sink: &mut S,
    vault: &Vault,
    dry_run: bool,
) -> Result<SyncReport> {
    let watermark = sink
        .watermark()
        .await
        .context("Failed to query the sync watermark")?;
    match watermark {
        Some(mark) => info!("Syncing notes modified at or after {mark}"),
        None => info!("Archive is empty, syncing all notes"),
    }

    let notes = vault.notes().await?;
    let candidates = select_modified(&notes, watermark);
    info!(
        "Selected {} of {} notes for upload",
        candidates.len(),
        notes.len()
    );

    Ok(upload_candidates(sink, &candidates, dry_run).await)
}

/// Upload an already-selected candidate set, fail-fast.
pub async fn upload_candidates<S: NoteSink>(
    sink: &mut S,
    candidates: &[&VaultNote],
    dry_run: bool,
) -> SyncReport {
    let mut report = SyncReport {
        selected: candidates.len(),
        inserted: 0,
        failure: None,
    };

    for note in candidates {
        let row = match NoteRow::from_note(note, Local::now()) {
            Ok(row) => row,
            Err(error) => {
                report.failure = Some(SyncFailure {
                    path: note.path.clone(),
                    error,
                });
                break;
            }
        };

        if dry_run {
            debug!("Dry-run: would insert note {}", row.path);
            report.inserted += 1;
            continue;
        }

        match sink.insert_note(&row).await {
            Ok(()) => {
                debug!("Inserted note {}", row.path);
                report.inserted += 1;
            }
            Err(error) => {
                report.failure = Some(SyncFailure {
                    path: note.path.clone(),
                    error,
                });
                break;
            }
        }
    }

    report
}

/// Compute the watermark and pending-candidate count without writing
/// anything (the `status` command).
pub async fn check_status<S: NoteSink>(sink: &mut S, vault: &Vault) -> Result<SyncStatus> {
    let watermark = sink
        .watermark()
        .await
        .context("Failed to query the sync watermark")?;
    let notes = vault.notes().await?;
    let pending = select_modified(&notes, watermark).len();

    Ok(SyncStatus {
        watermark,
        total: notes.len(),
        pending,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{note_fixture, MemorySink};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn local(h: u32, m: u32, s: u32) -> chrono::DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_select_all_when_store_is_empty() {
        let notes = vec![
            note_fixture("a.md", local(10, 0, 0)),
            note_fixture("b.md", local(11, 0, 0)),
        ];

        let selected = select_modified(&notes, None);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_select_boundary_is_inclusive() {
        let mark = local(12, 0, 0);
        let notes = vec![
            note_fixture("at-mark.md", mark),
            note_fixture("before-mark.md", local(11, 59, 59)),
            note_fixture("after-mark.md", local(12, 0, 1)),
        ];

        let selected = select_modified(&notes, Some(mark.naive_local()));
        let paths: Vec<_> = selected.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["at-mark.md", "after-mark.md"]);
    }

    #[tokio::test]
    async fn test_upload_halts_on_first_failure() {
        let notes = vec![
            note_fixture("first.md", local(10, 0, 0)),
            note_fixture("second.md", local(10, 0, 1)),
            note_fixture("third.md", local(10, 0, 2)),
        ];
        let candidates: Vec<_> = notes.iter().collect();

        let mut sink = MemorySink {
            fail_on_path: Some("second.md".to_string()),
            ..MemorySink::default()
        };

        let report = upload_candidates(&mut sink, &candidates, false).await;

        assert_eq!(report.selected, 3);
        assert_eq!(report.inserted, 1);
        let failure = report.failure.expect("pass should halt on second note");
        assert_eq!(failure.path, "second.md");
        // the third candidate is never attempted
        assert_eq!(sink.insert_attempts, vec!["first.md", "second.md"]);
        assert_eq!(sink.rows.len(), 1);
        assert_eq!(sink.rows[0].path, "first.md");
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let notes = vec![note_fixture("a.md", local(9, 0, 0))];
        let candidates: Vec<_> = notes.iter().collect();

        let mut sink = MemorySink::default();
        let report = upload_candidates(&mut sink, &candidates, true).await;

        assert!(report.is_success());
        assert_eq!(report.inserted, 1);
        assert!(sink.rows.is_empty());
        assert!(sink.insert_attempts.is_empty());
    }

    #[tokio::test]
    async fn test_modified_upload_against_empty_store_takes_everything() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.md"), "---\nkind: note\n---\nbody").unwrap();
        std::fs::write(temp_dir.path().join("b.md"), "plain body").unwrap();
        let vault = Vault::new(temp_dir.path());

        let mut sink = MemorySink::default();
        let report = run_modified_upload(&mut sink, &vault, false).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.selected, 2);
        assert_eq!(report.inserted, 2);
        assert_eq!(sink.rows[0].path, "a.md");
        let custom = sink.rows[0].custom_metadata.as_object().unwrap();
        assert_eq!(custom.get("kind"), Some(&serde_json::Value::from("note")));
        let identity = sink.rows[0].file_metadata.as_object().unwrap();
        assert!(identity.contains_key("mtime"));

        // watermark now derives from what was persisted
        let mark = sink.watermark().await.unwrap();
        assert!(mark.is_some());
    }

    #[tokio::test]
    async fn test_status_reports_pending_without_writing() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.md"), "body").unwrap();
        let vault = Vault::new(temp_dir.path());

        let mut sink = MemorySink::default();
        let status = check_status(&mut sink, &vault).await.unwrap();

        assert!(status.watermark.is_none());
        assert_eq!(status.total, 1);
        assert_eq!(status.pending, 1);
        assert!(sink.rows.is_empty());
    }

    #[tokio::test]
    async fn test_upload_note_single() {
        let note = note_fixture("single.md", local(8, 0, 0));
        let mut sink = MemorySink::default();

        upload_note(&mut sink, &note, false).await.unwrap();

        assert_eq!(sink.rows.len(), 1);
        assert_eq!(sink.rows[0].path, "single.md");
    }
}
