use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use meterkeep_core::{DeviceEvent, DeviceId, PersistenceState};

use crate::storage::{EventJournal, SnapshotLoad, SnapshotStore};

/// In-memory journal and snapshot store.
///
/// Primarily intended for testing and as a reference implementation of the
/// storage traits. Not durable: everything is gone when the process exits.
#[derive(Clone, Default)]
pub struct MemoryStore {
    events: Arc<Mutex<HashMap<DeviceId, Vec<DeviceEvent>>>>,
    // snapshots kept serialized, like the sqlite store, so decode failures
    // are reachable here too
    snapshots: Arc<Mutex<HashMap<DeviceId, Vec<(u64, String)>>>>,
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryStoreError {
    #[error("mutex poisoned: {0}")]
    MutexPoisoned(String),
    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl<T> From<PoisonError<T>> for MemoryStoreError {
    fn from(err: PoisonError<T>) -> Self {
        MemoryStoreError::MutexPoisoned(err.to_string())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a snapshot row verbatim, bypassing serialization.
    ///
    /// Lets tests plant undecodable snapshots to exercise the corrupt
    /// snapshot fallback.
    pub fn insert_raw_snapshot(&self, device_id: DeviceId, at_seq: u64, payload: &str) {
        let mut map = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(device_id)
            .or_default()
            .push((at_seq, payload.to_owned()));
    }

    /// Number of journal entries for a device.
    pub fn event_count(&self, device_id: DeviceId) -> usize {
        let map = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        map.get(&device_id).map(Vec::len).unwrap_or(0)
    }

    /// Number of snapshots taken for a device.
    pub fn snapshot_count(&self, device_id: DeviceId) -> usize {
        let map = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        map.get(&device_id).map(Vec::len).unwrap_or(0)
    }
}

#[async_trait]
impl EventJournal for MemoryStore {
    type Error = MemoryStoreError;

    async fn append(&self, device_id: DeviceId, event: &DeviceEvent) -> Result<u64, Self::Error> {
        let mut map = self.events.lock()?;
        let log = map.entry(device_id).or_default();
        log.push(event.clone());
        Ok(log.len() as u64)
    }

    async fn replay(
        &self,
        device_id: DeviceId,
        after: u64,
    ) -> Result<Vec<(u64, DeviceEvent)>, Self::Error> {
        let map = self.events.lock()?;
        let Some(log) = map.get(&device_id) else {
            return Ok(Vec::new());
        };

        Ok(log
            .iter()
            .enumerate()
            .map(|(idx, event)| (idx as u64 + 1, event.clone()))
            .filter(|(seq, _)| *seq > after)
            .collect())
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    type Error = MemoryStoreError;

    async fn save(
        &self,
        device_id: DeviceId,
        state: &PersistenceState,
        at_seq: u64,
    ) -> Result<(), Self::Error> {
        let payload = serde_json::to_string(state)?;
        let mut map = self.snapshots.lock()?;
        map.entry(device_id).or_default().push((at_seq, payload));
        Ok(())
    }

    async fn load_latest(&self, device_id: DeviceId) -> Result<SnapshotLoad, Self::Error> {
        let map = self.snapshots.lock()?;
        let Some((at_seq, payload)) = map.get(&device_id).and_then(|rows| rows.last()) else {
            return Ok(SnapshotLoad::Missing);
        };

        match serde_json::from_str(payload) {
            Ok(state) => Ok(SnapshotLoad::Snapshot {
                state,
                at_seq: *at_seq,
            }),
            Err(_) => Ok(SnapshotLoad::Corrupt { at_seq: *at_seq }),
        }
    }
}
