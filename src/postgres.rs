//! PostgreSQL destination sink
//!
//! Owns a single connection per sink instance. Each CLI invocation
//! builds its own [`PostgresSink`], so two sync operations can never
//! interleave on one connection; teardown is explicit via
//! [`PostgresSink::close`].

use crate::record::NoteRow;
use crate::sink::NoteSink;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::time::Duration;
use tokio_postgres::{Client, Config, NoTls};
use tracing::{info, warn};

/// Destination namespace and table. Idempotent to re-run.
const BOOTSTRAP_SQL: &str = "\
CREATE SCHEMA IF NOT EXISTS obsidian;
CREATE TABLE IF NOT EXISTS obsidian.file (
    path text,
    timestamp timestamp,
    file_metadata json,
    dataview_metadata json,
    file_content text
);";

/// One row per upload event; the table is an append-only log.
///
/// The capture timestamp is bound as text carrying an explicit UTC
/// offset and cast server-side, which drops the offset and stores the
/// local wall clock, the same thing the watermark query hands back.
const INSERT_SQL: &str = "\
INSERT INTO obsidian.file (path, timestamp, file_metadata, dataview_metadata, file_content)
VALUES ($1::text, $2::text::timestamp, $3::json, $4::json, $5::text)";

const WATERMARK_SQL: &str = "SELECT max(timestamp) FROM obsidian.file";

/// A connected PostgreSQL sink owning its client and the spawned
/// connection driver task.
pub struct PostgresSink {
    client: Client,
    driver: tokio::task::JoinHandle<()>,
}

impl PostgresSink {
    /// Connect with the given timeout and bootstrap the destination
    /// schema.
    pub async fn connect(connection_string: &str, connect_timeout: Duration) -> Result<Self> {
        let mut config: Config = connection_string
            .parse()
            .context("Invalid PostgreSQL connection string")?;
        config.connect_timeout(connect_timeout);

        let (client, connection) = config
            .connect(NoTls)
            .await
            .context("Failed to connect to PostgreSQL")?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("PostgreSQL connection error: {e}");
            }
        });

        info!("Connected to PostgreSQL");

        let mut sink = Self { client, driver };
        sink.ensure_schema().await?;
        Ok(sink)
    }

    /// Release the connection and wait for the driver task to finish.
    pub async fn close(self) -> Result<()> {
        drop(self.client);
        self.driver
            .await
            .context("PostgreSQL connection driver panicked")?;
        Ok(())
    }
}

#[async_trait]
impl NoteSink for PostgresSink {
    async fn ensure_schema(&mut self) -> Result<()> {
        self.client
            .batch_execute(BOOTSTRAP_SQL)
            .await
            .context("Failed to create the destination schema")
    }

    async fn watermark(&mut self) -> Result<Option<NaiveDateTime>> {
        let row = self
            .client
            .query_one(WATERMARK_SQL, &[])
            .await
            .context("Failed to query max(timestamp)")?;
        Ok(row.get(0))
    }

    async fn insert_note(&mut self, row: &NoteRow) -> Result<()> {
        self.client
            .execute(
                INSERT_SQL,
                &[
                    &row.path,
                    &row.timestamp,
                    &row.file_metadata,
                    &row.custom_metadata,
                    &row.content,
                ],
            )
            .await
            .with_context(|| format!("Failed to insert row for {}", row.path))?;
        Ok(())
    }
}
