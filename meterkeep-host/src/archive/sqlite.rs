use std::path::Path;

use async_trait::async_trait;
use meterkeep_core::{DeviceId, NormalizedReading};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

use crate::archive::ArchiveWriter;

#[derive(Debug, thiserror::Error)]
pub enum SqliteArchiveError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// SQLite-backed archival store.
///
/// Deliberately a separate database (and pool) from the journal: it models
/// the long-term relational store the readings are off-loaded to. Rows are
/// keyed by (device, timestamp), so re-archiving a batch after a lost
/// acknowledgment replaces rather than duplicates.
#[derive(Clone)]
pub struct SqliteArchive {
    pool: SqlitePool,
}

impl SqliteArchive {
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, SqliteArchiveError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn new_in_memory() -> Result<Self, SqliteArchiveError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), SqliteArchiveError> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS archived_readings (
                device_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                value REAL NOT NULL,
                PRIMARY KEY (device_id, timestamp)
            );
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Number of archived rows for a device.
    pub async fn row_count(&self, device_id: DeviceId) -> Result<u64, SqliteArchiveError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM archived_readings WHERE device_id = ?")
                .bind(device_id.0.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl ArchiveWriter for SqliteArchive {
    type Error = SqliteArchiveError;

    async fn write_batch(
        &self,
        device_id: DeviceId,
        readings: &[NormalizedReading],
    ) -> Result<Option<jiff::Timestamp>, Self::Error> {
        if readings.is_empty() {
            return Ok(None);
        }

        let device = device_id.0.to_string();
        let mut tx = self.pool.begin().await?;

        let mut max_ts = None;
        for reading in readings {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO archived_readings (device_id, timestamp, value)
                VALUES (?, ?, ?)
                "#,
            )
            .bind(&device)
            .bind(reading.timestamp.as_millisecond())
            .bind(reading.value)
            .execute(&mut *tx)
            .await?;

            max_ts = max_ts.max(Some(reading.timestamp));
        }

        tx.commit().await?;

        Ok(max_ts)
    }
}
