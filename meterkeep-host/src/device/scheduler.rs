use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::device::machine::DeviceHandle;

/// Start the per-device snapshot timer.
///
/// First tick after a uniformly random delay in `[0, period)`, then every
/// `period`, so that snapshot and archive I/O from a large fleet spreads
/// across the hour instead of spiking at one minute. Runs until cancelled.
pub fn spawn_snapshot_timer(
    handle: DeviceHandle,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let initial = random_initial_delay(period);
        debug!(
            device_id = %handle.device_id(),
            initial_delay_ms = initial.as_millis() as u64,
            period_secs = period.as_secs(),
            "snapshot timer armed"
        );

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(initial) => {}
        }

        // First interval tick completes immediately, ending the initial
        // delay; subsequent ticks are one period apart.
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => handle.snapshot_tick(),
            }
        }
    })
}

fn random_initial_delay(period: Duration) -> Duration {
    let period_ms = (period.as_millis() as u64).max(1);
    let mut rng = rand::rng();
    Duration::from_millis(rng.random_range(0..period_ms))
}
