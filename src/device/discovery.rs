//! Periodic device search feeding the hot-swap coordinator.
//!
//! Discovery failures are logged and retried on the next interval; they
//! never escalate. Each discovered handle is handed over via the swap
//! rendezvous and run to completion before the next handle or scan, so at
//! most one device session is active at any time.

use crate::device::{DeviceDriver, DeviceHandle, EventSinks};
use crate::swap::{SwapCoordinator, SwapError, SwapIntent};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Settings for the discovery loop.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    /// Fixed scan cadence. Scans never happen more often than this, even
    /// after a failed search.
    pub interval: Duration,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

/// Spawns the discovery loop as a background task.
pub struct DiscoveryHandle;

impl DiscoveryHandle {
    pub fn spawn(
        driver: Box<dyn DeviceDriver>,
        sinks: EventSinks,
        intent_tx: mpsc::Sender<SwapIntent>,
        settings: Option<DiscoverySettings>,
    ) -> JoinHandle<()> {
        let settings = settings.unwrap_or_default();
        info!(interval_ms = settings.interval.as_millis() as u64, "starting device discovery");
        tokio::spawn(run_search_loop(driver, sinks, intent_tx, settings))
    }
}

async fn run_search_loop(
    mut driver: Box<dyn DeviceDriver>,
    sinks: EventSinks,
    intent_tx: mpsc::Sender<SwapIntent>,
    settings: DiscoverySettings,
) {
    // First scan after one full interval; a long-lived session must not
    // cause a burst of catch-up scans afterwards.
    let mut scan = interval_at(Instant::now() + settings.interval, settings.interval);
    scan.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        scan.tick().await;

        let handles = match driver.discover() {
            Ok(handles) => handles,
            Err(e) => {
                warn!("device search failed: {e}");
                continue;
            }
        };
        if handles.is_empty() {
            debug!("no input devices present");
            continue;
        }

        info!(count = handles.len(), "input devices found");
        for handle in handles {
            if let Err(e) = hand_over(handle, &sinks, &intent_tx).await {
                // Only a vanished aggregator ends up here; nothing left to
                // feed, so the loop ends with it.
                warn!("device handoff failed, stopping discovery: {e}");
                return;
            }
        }
    }
}

/// Runs one full swap cycle: rendezvous, installation, then service until
/// the device disconnects.
async fn hand_over(
    handle: Box<dyn DeviceHandle>,
    sinks: &EventSinks,
    intent_tx: &mpsc::Sender<SwapIntent>,
) -> Result<(), SwapError> {
    let coordinator = SwapCoordinator::create(intent_tx.clone());
    let coordinator = coordinator.request().await?;
    let coordinator = coordinator.await_release().await?;
    let coordinator = coordinator.install(handle, sinks.clone())?;
    coordinator.wait_disconnect().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testkit::{ScriptedDriver, ScriptedEvent, ScriptedHandle};
    use crate::device::{event_channels, AxisKind, ButtonKind, DiscoveryError, TouchPoint};
    use crate::uplink::Aggregator;
    use std::sync::atomic::Ordering;

    #[tokio::test(start_paused = true)]
    async fn search_failures_retry_until_a_device_appears() {
        let (sinks, streams) = event_channels();
        let (intent_tx, swap_rx) = mpsc::channel(1);
        let (snapshot_tx, mut snapshot_rx) = mpsc::channel(8);
        let aggregator = tokio::spawn(Aggregator::new(streams, swap_rx, snapshot_tx, None).run());

        let handle = ScriptedHandle::new(
            "late-pad",
            vec![
                ScriptedEvent::Button(ButtonKind::LightToggle, true),
                ScriptedEvent::Touch(vec![TouchPoint { x: 1.0, y: 0.0 }]),
                ScriptedEvent::Axis(AxisKind::LeftStickX, 0.42),
            ],
        );
        let runs = handle.runs.clone();
        let driver = ScriptedDriver::new(vec![
            Err(DiscoveryError::Backend("bus unavailable".into())),
            Ok(Vec::new()),
            Ok(vec![Box::new(handle) as Box<dyn DeviceHandle>]),
        ]);
        let calls = driver.calls.clone();

        let discovery = DiscoveryHandle::spawn(Box::new(driver), sinks, intent_tx, None);

        // The script only lands after two failed scan rounds; the loop and
        // the sinks apply events in select order, so wait for a snapshot
        // that reflects the full script.
        let mut settled = None;
        for _ in 0..50 {
            let snapshot = snapshot_rx.recv().await.expect("snapshot");
            if snapshot.light && snapshot.turn == 0.42 && snapshot.tilt_x != 0.0 {
                settled = Some(snapshot);
                break;
            }
        }
        let snapshot = settled.expect("scripted events never reached the state");
        assert_eq!(snapshot.turn, 0.42);
        assert!(snapshot.light);
        assert!(calls.load(Ordering::SeqCst) >= 3);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        discovery.abort();
        aggregator.abort();
    }
}
