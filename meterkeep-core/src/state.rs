use jiff::SignedDuration;
use serde::{Deserialize, Serialize};

use crate::{DeviceEvent, NormalizedReading};

/// How far behind the most recent record archived history is kept in memory.
pub const RETENTION_WINDOW: SignedDuration = SignedDuration::from_hours(12);

/// A reading held in memory together with its archive status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingRecord {
    pub reading: NormalizedReading,
    /// True once the archive store has durably persisted this reading.
    /// Transitions false -> true exactly once, never back.
    pub saved: bool,
}

/// In-memory history of one device, ordered by arrival.
///
/// This is the value the journal events fold into. All mutation goes
/// through [`apply`](Self::apply) so that live commands and recovery replay
/// produce identical state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistenceState {
    records: Vec<ReadingRecord>,
}

impl PersistenceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one journal event into the state.
    pub fn apply(&mut self, event: &DeviceEvent) {
        match event {
            DeviceEvent::ReadingIngested { reading } => self.add(reading.clone()),
            DeviceEvent::ArchiveWindowAcknowledged { up_to } => {
                self.mark_saved_until(*up_to);
                self.truncate();
            }
        }
    }

    fn add(&mut self, reading: NormalizedReading) {
        self.records.push(ReadingRecord {
            reading,
            saved: false,
        });
    }

    fn mark_saved_until(&mut self, up_to: jiff::Timestamp) {
        for record in &mut self.records {
            if record.reading.timestamp <= up_to {
                record.saved = true;
            }
        }
    }

    /// Drop archived records that have aged out of the retention window.
    ///
    /// The window is anchored on the most recently *appended* record, which
    /// assumes arrival order tracks chronological order; a late out-of-order
    /// append would skew the threshold. Records that have not been archived
    /// are kept regardless of age.
    fn truncate(&mut self) {
        let Some(last) = self.records.last() else {
            return;
        };
        let threshold = last.reading.timestamp - RETENTION_WINDOW;
        self.records
            .retain(|r| !(r.reading.timestamp < threshold && r.saved));
    }

    /// Readings not yet acknowledged by the archive store, in arrival order.
    pub fn unsaved_readings(&self) -> Vec<NormalizedReading> {
        self.records
            .iter()
            .filter(|r| !r.saved)
            .map(|r| r.reading.clone())
            .collect()
    }

    /// The `min(n, len)` chronologically latest readings, ascending by
    /// timestamp. Ties keep their arrival order.
    pub fn last_readings(&self, n: usize) -> Vec<NormalizedReading> {
        let count = n.min(self.records.len());
        if count == 0 {
            return Vec::new();
        }

        let mut by_time: Vec<&NormalizedReading> =
            self.records.iter().map(|r| &r.reading).collect();
        // stable sort keeps arrival order among equal timestamps
        by_time.sort_by_key(|r| r.timestamp);
        by_time[by_time.len() - count..]
            .iter()
            .map(|r| (*r).clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ReadingRecord] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeviceId;

    fn reading(device_id: DeviceId, hour: i64, value: f64) -> NormalizedReading {
        NormalizedReading {
            device_id,
            timestamp: jiff::Timestamp::UNIX_EPOCH + SignedDuration::from_hours(hour),
            value,
        }
    }

    fn state_with_hours(device_id: DeviceId, hours: std::ops::RangeInclusive<i64>) -> PersistenceState {
        let mut state = PersistenceState::new();
        for hour in hours {
            state.apply(&DeviceEvent::ReadingIngested {
                reading: reading(device_id, hour, hour as f64),
            });
        }
        state
    }

    #[test]
    fn ingest_appends_unsaved_records_in_order() {
        let device_id = DeviceId::random();
        let state = state_with_hours(device_id, 0..=4);

        assert_eq!(state.len(), 5);
        assert!(state.records().iter().all(|r| !r.saved));
        let values: Vec<f64> = state.records().iter().map(|r| r.reading.value).collect();
        assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn acknowledgment_marks_saved_up_to_timestamp() {
        let device_id = DeviceId::random();
        let mut state = state_with_hours(device_id, 0..=4);

        state.apply(&DeviceEvent::ArchiveWindowAcknowledged {
            up_to: jiff::Timestamp::UNIX_EPOCH + SignedDuration::from_hours(2),
        });

        let saved: Vec<bool> = state.records().iter().map(|r| r.saved).collect();
        assert_eq!(saved, vec![true, true, true, false, false]);
    }

    #[test]
    fn truncation_worked_example() {
        // records at t=0..=14h, archived through t=5; threshold is 14-12=2,
        // so only t=0 and t=1 (archived and aged out) go away.
        let device_id = DeviceId::random();
        let mut state = state_with_hours(device_id, 0..=14);

        state.apply(&DeviceEvent::ArchiveWindowAcknowledged {
            up_to: jiff::Timestamp::UNIX_EPOCH + SignedDuration::from_hours(5),
        });

        assert_eq!(state.len(), 13);
        let first = state.records().first().unwrap();
        assert_eq!(first.reading.value, 2.0);
        // unsaved records beyond t=5 survive untouched
        assert!(state.records().iter().skip(4).all(|r| !r.saved));
    }

    #[test]
    fn truncation_never_drops_unsaved_records() {
        let device_id = DeviceId::random();
        // 30 hours of history, nothing archived: everything is older than
        // the window except the tail, but nothing may be dropped.
        let mut state = state_with_hours(device_id, 0..=30);

        state.apply(&DeviceEvent::ArchiveWindowAcknowledged {
            up_to: jiff::Timestamp::UNIX_EPOCH - SignedDuration::from_hours(1),
        });

        assert_eq!(state.len(), 31);
    }

    #[test]
    fn last_readings_returns_latest_ascending() {
        let device_id = DeviceId::random();
        let state = state_with_hours(device_id, 0..=9);

        let last = state.last_readings(3);
        let values: Vec<f64> = last.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn last_readings_caps_at_available_count() {
        let device_id = DeviceId::random();
        let state = state_with_hours(device_id, 0..=2);

        assert_eq!(state.last_readings(100).len(), 3);
        assert!(state.last_readings(0).is_empty());
        assert!(PersistenceState::new().last_readings(5).is_empty());
    }

    #[test]
    fn last_readings_keeps_arrival_order_among_ties() {
        let device_id = DeviceId::random();
        let mut state = PersistenceState::new();
        let ts = jiff::Timestamp::UNIX_EPOCH + SignedDuration::from_hours(1);
        for value in [10.0, 20.0, 30.0] {
            state.apply(&DeviceEvent::ReadingIngested {
                reading: NormalizedReading {
                    device_id,
                    timestamp: ts,
                    value,
                },
            });
        }

        let values: Vec<f64> = state.last_readings(3).iter().map(|r| r.value).collect();
        assert_eq!(values, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn unsaved_readings_skips_archived_records() {
        let device_id = DeviceId::random();
        let mut state = state_with_hours(device_id, 0..=4);

        state.apply(&DeviceEvent::ArchiveWindowAcknowledged {
            up_to: jiff::Timestamp::UNIX_EPOCH + SignedDuration::from_hours(1),
        });

        let unsaved = state.unsaved_readings();
        let values: Vec<f64> = unsaved.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
    }
}
