use std::sync::Arc;

use meterkeep_core::{DeviceEvent, DeviceId, NormalizedReading, PersistenceState};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::archive::ArchiveWriter;
use crate::storage::{EventJournal, SnapshotLoad, SnapshotStore};

/// Inbox depth per device. Senders back off once the machine falls this far
/// behind; scheduler ticks are simply dropped.
const COMMAND_BUFFER: usize = 64;

/// Caller-visible failures of the device command API.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("reading count must be non-negative, got {0}")]
    InvalidArgument(i64),
    #[error("durable append failed: {0}")]
    Journal(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("device state machine is not running")]
    Unavailable,
}

/// Commands processed by the per-device state machine, one at a time.
enum Command {
    /// Durably journal a reading, then apply it to in-memory state.
    Ingest {
        reading: NormalizedReading,
        ack: oneshot::Sender<Result<(), DeviceError>>,
    },
    /// Pure read of the most recent readings; journals nothing.
    RecentReadings {
        count: i64,
        reply: oneshot::Sender<Result<Vec<NormalizedReading>, DeviceError>>,
    },
    /// Scheduler tick: snapshot the current state and dispatch unsaved
    /// readings to the archive. Never journaled, never replayed.
    SnapshotTick,
    /// The archive committed a batch; everything up to `up_to` is durable
    /// there.
    ArchiveDone { up_to: jiff::Timestamp },
    /// The archive write failed or wrote nothing; clears the in-flight
    /// marker so the next tick retries.
    ArchiveFailed,
}

/// Cloneable sender half of a device's command channel.
#[derive(Clone)]
pub struct DeviceHandle {
    device_id: DeviceId,
    tx: mpsc::Sender<Command>,
}

impl DeviceHandle {
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Ingest one normalized reading.
    ///
    /// Resolves once the journal append has been durably acknowledged and
    /// the in-memory state updated. An append failure leaves no trace of
    /// the reading and is returned here.
    pub async fn ingest(&self, reading: NormalizedReading) -> Result<(), DeviceError> {
        let (ack, ack_rx) = oneshot::channel();
        self.tx
            .send(Command::Ingest { reading, ack })
            .await
            .map_err(|_| DeviceError::Unavailable)?;
        ack_rx.await.map_err(|_| DeviceError::Unavailable)?
    }

    /// The `min(count, len)` chronologically latest readings, ascending by
    /// timestamp. Negative counts are rejected.
    pub async fn recent_readings(&self, count: i64) -> Result<Vec<NormalizedReading>, DeviceError> {
        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::RecentReadings { count, reply })
            .await
            .map_err(|_| DeviceError::Unavailable)?;
        reply_rx.await.map_err(|_| DeviceError::Unavailable)?
    }

    /// Deliver a snapshot tick. Lossy: if the machine's inbox is full the
    /// tick is dropped rather than queued behind a backlog.
    pub fn snapshot_tick(&self) {
        let _ = self.tx.try_send(Command::SnapshotTick);
    }
}

/// The per-device event-sourced state machine.
///
/// Owns its [`PersistenceState`] exclusively; all mutation happens inside
/// this task, so no locking is needed. The persist-before-apply rule holds
/// everywhere: state changes only after the journal has acknowledged the
/// corresponding event, and recovery replays those same events through the
/// same reducer.
struct DeviceMachine<J, S, A> {
    device_id: DeviceId,
    journal: Arc<J>,
    snapshots: Arc<S>,
    archive: Arc<A>,
    state: PersistenceState,
    /// Journal sequence of the last event applied to `state`.
    last_seq: u64,
    /// One archive batch outstanding at most; a tick while this is set
    /// dispatches nothing.
    archive_in_flight: bool,
    self_tx: mpsc::Sender<Command>,
}

/// Start the state machine and its command channel for one device.
///
/// The task recovers from the snapshot store and journal before processing
/// its first command, and runs until the token is cancelled or every handle
/// is dropped.
pub fn spawn<J, S, A>(
    device_id: DeviceId,
    journal: Arc<J>,
    snapshots: Arc<S>,
    archive: Arc<A>,
    cancel: CancellationToken,
) -> (DeviceHandle, JoinHandle<()>)
where
    J: EventJournal,
    S: SnapshotStore,
    A: ArchiveWriter,
{
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);

    let machine = DeviceMachine {
        device_id,
        journal,
        snapshots,
        archive,
        state: PersistenceState::new(),
        last_seq: 0,
        archive_in_flight: false,
        self_tx: tx.clone(),
    };

    let task = tokio::spawn(machine.run(rx, cancel));

    (DeviceHandle { device_id, tx }, task)
}

impl<J, S, A> DeviceMachine<J, S, A>
where
    J: EventJournal,
    S: SnapshotStore,
    A: ArchiveWriter,
{
    async fn run(mut self, mut rx: mpsc::Receiver<Command>, cancel: CancellationToken) {
        if self.recover().await.is_err() {
            // Without a recovered state we must not accept commands; the
            // journal is the authoritative record and we could not read it.
            return;
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(device_id = %self.device_id, "device state machine shutting down");
                    break;
                }
                cmd = rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    self.handle(cmd).await;
                }
            }
        }
    }

    /// Rebuild in-memory state: newest snapshot first, then replay every
    /// journaled event past it through the live reducer. No side effects;
    /// archive dispatch only happens on live ticks.
    async fn recover(&mut self) -> Result<(), ()> {
        match self.snapshots.load_latest(self.device_id).await {
            Ok(SnapshotLoad::Snapshot { state, at_seq }) => {
                self.state = state;
                self.last_seq = at_seq;
            }
            Ok(SnapshotLoad::Corrupt { at_seq }) => {
                warn!(
                    device_id = %self.device_id,
                    at_seq,
                    "discarding corrupt snapshot, replaying full journal"
                );
            }
            Ok(SnapshotLoad::Missing) => {}
            Err(e) => {
                error!(device_id = %self.device_id, error = %e, "failed to load snapshot");
                return Err(());
            }
        }

        let events = match self.journal.replay(self.device_id, self.last_seq).await {
            Ok(events) => events,
            Err(e) => {
                error!(device_id = %self.device_id, error = %e, "failed to replay journal");
                return Err(());
            }
        };

        let replayed = events.len();
        for (seq, event) in events {
            self.state.apply(&event);
            self.last_seq = seq;
        }

        info!(
            device_id = %self.device_id,
            replayed,
            records = self.state.len(),
            "device state machine recovered"
        );
        Ok(())
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Ingest { reading, ack } => {
                let _ = ack.send(self.ingest(reading).await);
            }
            Command::RecentReadings { count, reply } => {
                let _ = reply.send(self.recent_readings(count));
            }
            Command::SnapshotTick => self.snapshot_tick().await,
            Command::ArchiveDone { up_to } => self.archive_done(up_to).await,
            Command::ArchiveFailed => {
                self.archive_in_flight = false;
            }
        }
    }

    async fn ingest(&mut self, reading: NormalizedReading) -> Result<(), DeviceError> {
        let event = DeviceEvent::ReadingIngested { reading };

        // Persist before apply: nothing is observable until the append is
        // durably acknowledged.
        match self.journal.append(self.device_id, &event).await {
            Ok(seq) => {
                self.state.apply(&event);
                self.last_seq = seq;
                Ok(())
            }
            Err(e) => {
                error!(device_id = %self.device_id, error = %e, "journal append failed");
                Err(DeviceError::Journal(Box::new(e)))
            }
        }
    }

    fn recent_readings(&self, count: i64) -> Result<Vec<NormalizedReading>, DeviceError> {
        if count < 0 {
            return Err(DeviceError::InvalidArgument(count));
        }
        Ok(self.state.last_readings(count as usize))
    }

    /// Live tick: snapshot the current state, then hand every unsaved
    /// reading to the archive writer as one batch. Failures here have no
    /// caller to report to; they are logged and deferred to the next tick.
    async fn snapshot_tick(&mut self) {
        if self.archive_in_flight {
            debug!(device_id = %self.device_id, "archive batch still outstanding, skipping tick");
            return;
        }

        if let Err(e) = self
            .snapshots
            .save(self.device_id, &self.state, self.last_seq)
            .await
        {
            warn!(device_id = %self.device_id, error = %e, "snapshot save failed");
        }

        let batch = self.state.unsaved_readings();
        if batch.is_empty() {
            debug!(device_id = %self.device_id, "no unsaved readings to archive");
            return;
        }

        debug!(
            device_id = %self.device_id,
            batch_len = batch.len(),
            "dispatching archive batch"
        );
        self.archive_in_flight = true;

        // The writer reports back through our own inbox so that all state
        // mutation stays in this task.
        let archive = Arc::clone(&self.archive);
        let device_id = self.device_id;
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let done = match archive.write_batch(device_id, &batch).await {
                Ok(Some(up_to)) => Command::ArchiveDone { up_to },
                Ok(None) => Command::ArchiveFailed,
                Err(e) => {
                    warn!(device_id = %device_id, error = %e, "archive batch write failed");
                    Command::ArchiveFailed
                }
            };
            let _ = tx.send(done).await;
        });
    }

    async fn archive_done(&mut self, up_to: jiff::Timestamp) {
        self.archive_in_flight = false;

        let event = DeviceEvent::ArchiveWindowAcknowledged { up_to };
        match self.journal.append(self.device_id, &event).await {
            Ok(seq) => {
                self.state.apply(&event);
                self.last_seq = seq;
                info!(
                    device_id = %self.device_id,
                    up_to = %up_to,
                    records = self.state.len(),
                    "archive window acknowledged"
                );
            }
            Err(e) => {
                // The archive has the rows but the acknowledgment is not
                // durable, so the records stay unsaved and the next tick
                // re-archives them. Rows are keyed by (device, timestamp),
                // so the retry replaces rather than duplicates.
                warn!(
                    device_id = %self.device_id,
                    error = %e,
                    "failed to journal archive acknowledgment"
                );
            }
        }
    }
}
