use std::collections::HashMap;
use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use meterkeep_core::{DeviceId, NormalizedReading};

use crate::archive::ArchiveWriter;

/// In-memory archive for tests.
///
/// Keeps rows keyed by (device, timestamp) like the relational store, and
/// carries a failure toggle so tests can exercise the lost-acknowledgment
/// path.
#[derive(Clone, Default)]
pub struct MemoryArchive {
    rows: Arc<Mutex<HashMap<DeviceId, HashMap<i64, f64>>>>,
    fail_writes: Arc<AtomicBool>,
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryArchiveError {
    #[error("mutex poisoned: {0}")]
    MutexPoisoned(String),
    #[error("archive store unavailable")]
    Unavailable,
}

impl<T> From<PoisonError<T>> for MemoryArchiveError {
    fn from(err: PoisonError<T>) -> Self {
        MemoryArchiveError::MutexPoisoned(err.to_string())
    }
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail until cleared.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of archived rows for a device.
    pub fn row_count(&self, device_id: DeviceId) -> usize {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        rows.get(&device_id).map(HashMap::len).unwrap_or(0)
    }
}

#[async_trait]
impl ArchiveWriter for MemoryArchive {
    type Error = MemoryArchiveError;

    async fn write_batch(
        &self,
        device_id: DeviceId,
        readings: &[NormalizedReading],
    ) -> Result<Option<jiff::Timestamp>, Self::Error> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(MemoryArchiveError::Unavailable);
        }

        let mut rows = self.rows.lock()?;
        let device_rows = rows.entry(device_id).or_default();

        let mut max_ts = None;
        for reading in readings {
            device_rows.insert(reading.timestamp.as_millisecond(), reading.value);
            max_ts = max_ts.max(Some(reading.timestamp));
        }

        Ok(max_ts)
    }
}
