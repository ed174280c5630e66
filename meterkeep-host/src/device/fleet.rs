use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use meterkeep_core::{DeviceId, NormalizedReading};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::archive::ArchiveWriter;
use crate::device::machine::{self, DeviceError, DeviceHandle};
use crate::device::scheduler;
use crate::storage::{EventJournal, SnapshotStore};

/// Supervises one state machine (plus its snapshot timer) per device.
///
/// Machines are created implicitly on the first message addressed to a
/// device identity; the identity and its journal outlive any process run.
pub struct DeviceFleet<J, S, A> {
    inner: Arc<Inner<J, S, A>>,
}

struct Inner<J, S, A> {
    journal: Arc<J>,
    snapshots: Arc<S>,
    archive: Arc<A>,
    snapshot_period: Duration,
    devices: Mutex<HashMap<DeviceId, DeviceHandle>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl<J, S, A> Clone for DeviceFleet<J, S, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<J, S, A> DeviceFleet<J, S, A>
where
    J: EventJournal,
    S: SnapshotStore,
    A: ArchiveWriter,
{
    pub fn new(journal: J, snapshots: S, archive: A, snapshot_period: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                journal: Arc::new(journal),
                snapshots: Arc::new(snapshots),
                archive: Arc::new(archive),
                snapshot_period,
                devices: Mutex::new(HashMap::new()),
                tasks: Mutex::new(Vec::new()),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// The handle for a device, starting its state machine and snapshot
    /// timer on first use.
    pub async fn handle(&self, device_id: DeviceId) -> DeviceHandle {
        let mut devices = self.inner.devices.lock().await;
        if let Some(handle) = devices.get(&device_id) {
            return handle.clone();
        }

        info!(device_id = %device_id, "starting device state machine");
        let (handle, machine_task) = machine::spawn(
            device_id,
            Arc::clone(&self.inner.journal),
            Arc::clone(&self.inner.snapshots),
            Arc::clone(&self.inner.archive),
            self.inner.cancel.child_token(),
        );
        let timer_task = scheduler::spawn_snapshot_timer(
            handle.clone(),
            self.inner.snapshot_period,
            self.inner.cancel.child_token(),
        );

        self.inner
            .tasks
            .lock()
            .await
            .extend([machine_task, timer_task]);
        devices.insert(device_id, handle.clone());
        handle
    }

    /// Route a reading to its device's state machine. Resolves once the
    /// reading is durably journaled.
    pub async fn ingest(&self, reading: NormalizedReading) -> Result<(), DeviceError> {
        self.handle(reading.device_id).await.ingest(reading).await
    }

    /// The `min(count, available)` latest readings for a device, ascending
    /// by timestamp.
    pub async fn recent_readings(
        &self,
        device_id: DeviceId,
        count: i64,
    ) -> Result<Vec<NormalizedReading>, DeviceError> {
        self.handle(device_id).await.recent_readings(count).await
    }

    /// Number of running device machines.
    pub async fn device_count(&self) -> usize {
        self.inner.devices.lock().await.len()
    }

    /// Stop every machine and timer. In-flight appends may be abandoned;
    /// that is safe because the journal, not in-memory state, is the
    /// authoritative record.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let tasks = std::mem::take(&mut *self.inner.tasks.lock().await);
        for task in tasks {
            let _ = task.await;
        }
        self.inner.devices.lock().await.clear();

        info!("device fleet shut down");
    }
}
