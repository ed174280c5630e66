pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use meterkeep_core::{DeviceId, NormalizedReading};

/// Long-term archival store for readings.
///
/// Stateless from the state machine's point of view: it either commits the
/// whole batch atomically and reports the newest timestamp written, or
/// fails without partial effect. The returned timestamp becomes the
/// `up_to` bound of the archive acknowledgment event.
#[async_trait]
pub trait ArchiveWriter: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Write the batch in one transaction; all rows commit or none do.
    ///
    /// Returns the maximum timestamp among the written rows, or `None` for
    /// an empty batch.
    async fn write_batch(
        &self,
        device_id: DeviceId,
        readings: &[NormalizedReading],
    ) -> Result<Option<jiff::Timestamp>, Self::Error>;
}
