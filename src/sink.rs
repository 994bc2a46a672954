//! Destination abstraction for normalized note rows

use crate::record::NoteRow;
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDateTime;

/// A destination store for note rows.
///
/// The store is an append-only log: rows are inserted once and never
/// updated or deleted, and the watermark is derived by aggregation over
/// what was persisted. Methods take `&mut self` so that one sink can
/// only ever run a single operation at a time; sync passes are
/// serialized by ownership rather than by locking.
#[async_trait]
pub trait NoteSink {
    /// Idempotently create the destination namespace and table.
    async fn ensure_schema(&mut self) -> Result<()>;

    /// The maximum capture timestamp across persisted rows, or `None`
    /// for an empty store.
    async fn watermark(&mut self) -> Result<Option<NaiveDateTime>>;

    /// Persist one row. A single statement under its own implicit
    /// transaction; there is no batching across rows.
    async fn insert_note(&mut self, row: &NoteRow) -> Result<()>;
}
