use std::path::Path;

use async_trait::async_trait;
use meterkeep_core::{DeviceEvent, DeviceId, PersistenceState};
use sqlx::{
    Row, SqlitePool,
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

use crate::storage::{EventJournal, SnapshotLoad, SnapshotStore};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, thiserror::Error)]
pub enum SqliteStoreError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// SQLite-backed journal and snapshot store.
///
/// Events and snapshots are stored as JSON blobs keyed by device id and
/// per-device sequence number. One pool serves both tables.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the journal database at the given path.
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, SqliteStoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }

    /// Open a private in-memory database. Test use only; a single
    /// connection keeps every query on the same database.
    pub async fn new_in_memory() -> Result<Self, SqliteStoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl EventJournal for SqliteStore {
    type Error = SqliteStoreError;

    async fn append(&self, device_id: DeviceId, event: &DeviceEvent) -> Result<u64, Self::Error> {
        let payload = serde_json::to_string(event)?;
        let device = device_id.0.to_string();

        // The state machine is the only writer for its device, so reading
        // the high-water mark and inserting in one transaction is race-free.
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT COALESCE(MAX(seq), 0) FROM journal WHERE device_id = ?")
            .bind(&device)
            .fetch_one(&mut *tx)
            .await?;
        let seq: i64 = row.get::<i64, _>(0) + 1;

        sqlx::query("INSERT INTO journal (device_id, seq, event_json) VALUES (?, ?, ?)")
            .bind(&device)
            .bind(seq)
            .bind(payload)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(seq as u64)
    }

    async fn replay(
        &self,
        device_id: DeviceId,
        after: u64,
    ) -> Result<Vec<(u64, DeviceEvent)>, Self::Error> {
        let rows = sqlx::query(
            "SELECT seq, event_json FROM journal WHERE device_id = ? AND seq > ? ORDER BY seq",
        )
        .bind(device_id.0.to_string())
        .bind(after as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let seq: i64 = row.get(0);
            let payload: String = row.get(1);
            let event = serde_json::from_str(&payload)?;
            events.push((seq as u64, event));
        }

        Ok(events)
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    type Error = SqliteStoreError;

    async fn save(
        &self,
        device_id: DeviceId,
        state: &PersistenceState,
        at_seq: u64,
    ) -> Result<(), Self::Error> {
        let payload = serde_json::to_string(state)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO snapshots (device_id, at_seq, state_json, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(device_id.0.to_string())
        .bind(at_seq as i64)
        .bind(payload)
        .bind(jiff::Timestamp::now().as_second())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_latest(&self, device_id: DeviceId) -> Result<SnapshotLoad, Self::Error> {
        let row = sqlx::query(
            r#"
            SELECT at_seq, state_json FROM snapshots
            WHERE device_id = ?
            ORDER BY at_seq DESC
            LIMIT 1
            "#,
        )
        .bind(device_id.0.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(SnapshotLoad::Missing);
        };

        let at_seq = row.get::<i64, _>(0) as u64;
        let payload: String = row.get(1);

        // A snapshot that fails the shape check is reported, not fatal:
        // the machine falls back to a full replay.
        match serde_json::from_str(&payload) {
            Ok(state) => Ok(SnapshotLoad::Snapshot { state, at_seq }),
            Err(_) => Ok(SnapshotLoad::Corrupt { at_seq }),
        }
    }
}
