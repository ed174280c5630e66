pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use meterkeep_core::{DeviceEvent, DeviceId, PersistenceState};

/// Outcome of loading the newest snapshot for a device.
///
/// A snapshot that exists but fails the shape check comes back as
/// [`Corrupt`](SnapshotLoad::Corrupt) rather than an error, so the state
/// machine can log what it is discarding and fall back to a full replay.
#[derive(Debug)]
pub enum SnapshotLoad {
    /// The newest snapshot and the journal sequence it was taken at.
    Snapshot {
        state: PersistenceState,
        at_seq: u64,
    },
    /// A snapshot row exists but could not be decoded.
    Corrupt { at_seq: u64 },
    /// No snapshot has ever been taken for this device.
    Missing,
}

/// Durable, append-only, per-device ordered journal of domain events.
///
/// Appends are acknowledged only once durable; sequence numbers are
/// per-device, contiguous and strictly increasing. Each device has a single
/// writer (its state machine), so implementations never see concurrent
/// appends for the same device.
#[async_trait]
pub trait EventJournal: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Durably append one event, returning its sequence number.
    async fn append(&self, device_id: DeviceId, event: &DeviceEvent) -> Result<u64, Self::Error>;

    /// All events with sequence number greater than `after`, in order.
    async fn replay(
        &self,
        device_id: DeviceId,
        after: u64,
    ) -> Result<Vec<(u64, DeviceEvent)>, Self::Error>;
}

/// Durable point-in-time copies of [`PersistenceState`], used to bound
/// replay cost on recovery.
#[async_trait]
pub trait SnapshotStore: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Persist a snapshot tagged with the journal sequence it covers.
    async fn save(
        &self,
        device_id: DeviceId,
        state: &PersistenceState,
        at_seq: u64,
    ) -> Result<(), Self::Error>;

    /// Load the newest snapshot for a device, if any.
    async fn load_latest(&self, device_id: DeviceId) -> Result<SnapshotLoad, Self::Error>;
}
