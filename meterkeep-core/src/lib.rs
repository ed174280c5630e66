pub mod state;

pub use state::{PersistenceState, ReadingRecord, RETENTION_WINDOW};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable unique identifier for one physical sensor device.
///
/// Keys the event journal, the snapshot store and the per-device state
/// machine. Identities are never reused once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub Uuid);

impl DeviceId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A reading as it arrives from a device, before normalization.
///
/// Only exists to type the [`Normalizer`] seam; the persistence machinery
/// never sees one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawReading {
    /// Source device.
    pub device_id: DeviceId,
    /// Instant the device captured the value.
    pub captured_at: jiff::Timestamp,
    /// Vendor-unit value, meaning depends on the device model.
    pub raw_value: f64,
}

/// A sensor measurement in canonical units. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedReading {
    /// Source device.
    pub device_id: DeviceId,
    /// UTC instant of the measurement.
    pub timestamp: jiff::Timestamp,
    /// Measured value in canonical units.
    pub value: f64,
}

/// Domain events recorded in the per-device journal.
///
/// These are the only things that mutate [`PersistenceState`]; both the live
/// command path and recovery replay go through
/// [`PersistenceState::apply`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEvent {
    /// A normalized reading was durably accepted.
    ReadingIngested { reading: NormalizedReading },
    /// The archive store acknowledged everything up to this instant.
    ArchiveWindowAcknowledged { up_to: jiff::Timestamp },
}

/// Converts raw device output into canonical readings.
///
/// Pure and deterministic; runs upstream of ingestion and is out of scope
/// for the persistence core.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, raw: &RawReading) -> NormalizedReading;
}

/// An alert raised against a reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub device_id: DeviceId,
    pub timestamp: jiff::Timestamp,
    pub message: Box<str>,
}

/// Evaluates readings against configured thresholds.
///
/// May emit any number of alerts; never affects the persistence machine.
pub trait AlertEvaluator: Send + Sync {
    fn evaluate(&self, reading: &NormalizedReading) -> Vec<Alert>;
}
