use jiff::SignedDuration;
use meterkeep_core::{DeviceEvent, DeviceId, NormalizedReading, PersistenceState};
use meterkeep_host::storage::memory::{MemoryStore, MemoryStoreError};
use meterkeep_host::storage::sqlite::{SqliteStore, SqliteStoreError};
use meterkeep_host::storage::{EventJournal, SnapshotLoad, SnapshotStore};
use tempfile::NamedTempFile;

fn reading(device_id: DeviceId, hour: i64, value: f64) -> NormalizedReading {
    NormalizedReading {
        device_id,
        timestamp: jiff::Timestamp::UNIX_EPOCH + SignedDuration::from_hours(hour),
        value,
    }
}

fn ingested(device_id: DeviceId, hour: i64, value: f64) -> DeviceEvent {
    DeviceEvent::ReadingIngested {
        reading: reading(device_id, hour, value),
    }
}

#[tokio::test]
async fn memory_journal_appends_and_replays_in_order() -> Result<(), MemoryStoreError> {
    let store = MemoryStore::new();
    let device_id = DeviceId::random();

    for hour in 0..5 {
        let seq = store.append(device_id, &ingested(device_id, hour, hour as f64)).await?;
        assert_eq!(seq, hour as u64 + 1);
    }

    let events = store.replay(device_id, 0).await?;
    assert_eq!(events.len(), 5);
    assert!(events.windows(2).all(|w| w[0].0 + 1 == w[1].0));

    let tail = store.replay(device_id, 3).await?;
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].0, 4);

    Ok(())
}

#[tokio::test]
async fn memory_journal_isolates_devices() -> Result<(), MemoryStoreError> {
    let store = MemoryStore::new();
    let a = DeviceId::random();
    let b = DeviceId::random();

    store.append(a, &ingested(a, 0, 1.0)).await?;
    assert_eq!(store.append(b, &ingested(b, 0, 2.0)).await?, 1);

    assert_eq!(store.replay(a, 0).await?.len(), 1);
    assert_eq!(store.replay(b, 0).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn memory_snapshot_roundtrip() -> Result<(), MemoryStoreError> {
    let store = MemoryStore::new();
    let device_id = DeviceId::random();

    let mut state = PersistenceState::new();
    state.apply(&ingested(device_id, 1, 7.5));

    store.save(device_id, &state, 3).await?;

    match store.load_latest(device_id).await? {
        SnapshotLoad::Snapshot { state, at_seq } => {
            assert_eq!(at_seq, 3);
            assert_eq!(state.len(), 1);
        }
        other => panic!("expected snapshot, got {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn memory_snapshot_missing_for_unknown_device() -> Result<(), MemoryStoreError> {
    let store = MemoryStore::new();

    assert!(matches!(
        store.load_latest(DeviceId::random()).await?,
        SnapshotLoad::Missing
    ));

    Ok(())
}

#[tokio::test]
async fn memory_snapshot_shape_check_reports_corruption() -> Result<(), MemoryStoreError> {
    let store = MemoryStore::new();
    let device_id = DeviceId::random();

    store.insert_raw_snapshot(device_id, 9, "{\"not\": \"a state\"}");

    assert!(matches!(
        store.load_latest(device_id).await?,
        SnapshotLoad::Corrupt { at_seq: 9 }
    ));

    Ok(())
}

#[tokio::test]
async fn sqlite_journal_appends_and_replays_in_order() -> Result<(), SqliteStoreError> {
    let temp_file = NamedTempFile::new().unwrap();
    let store = SqliteStore::new(temp_file.path()).await?;
    let device_id = DeviceId::random();

    for hour in 0..5 {
        let seq = store.append(device_id, &ingested(device_id, hour, hour as f64)).await?;
        assert_eq!(seq, hour as u64 + 1);
    }

    let events = store.replay(device_id, 2).await?;
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].0, 3);

    let DeviceEvent::ReadingIngested { reading } = &events[0].1 else {
        panic!("expected ReadingIngested");
    };
    assert_eq!(reading.value, 2.0);

    Ok(())
}

#[tokio::test]
async fn sqlite_journal_survives_reopen() -> Result<(), SqliteStoreError> {
    let temp_file = NamedTempFile::new().unwrap();
    let device_id = DeviceId::random();

    {
        let store = SqliteStore::new(temp_file.path()).await?;
        for hour in 0..3 {
            store.append(device_id, &ingested(device_id, hour, hour as f64)).await?;
        }
    }

    let store = SqliteStore::new(temp_file.path()).await?;
    let events = store.replay(device_id, 0).await?;
    assert_eq!(events.len(), 3);
    assert_eq!(store.append(device_id, &ingested(device_id, 3, 3.0)).await?, 4);

    Ok(())
}

#[tokio::test]
async fn sqlite_snapshot_latest_wins() -> Result<(), SqliteStoreError> {
    let store = SqliteStore::new_in_memory().await?;
    let device_id = DeviceId::random();

    let mut state = PersistenceState::new();
    store.save(device_id, &state, 1).await?;

    state.apply(&ingested(device_id, 1, 1.0));
    state.apply(&ingested(device_id, 2, 2.0));
    store.save(device_id, &state, 3).await?;

    match store.load_latest(device_id).await? {
        SnapshotLoad::Snapshot { state, at_seq } => {
            assert_eq!(at_seq, 3);
            assert_eq!(state.len(), 2);
        }
        other => panic!("expected snapshot, got {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn sqlite_snapshot_missing_for_unknown_device() -> Result<(), SqliteStoreError> {
    let store = SqliteStore::new_in_memory().await?;

    assert!(matches!(
        store.load_latest(DeviceId::random()).await?,
        SnapshotLoad::Missing
    ));

    Ok(())
}
