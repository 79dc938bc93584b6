//! Swap coordinator with statum state machine for session installation.
//!
//! One coordinator instance is created per discovered device and consumed
//! over a single swap cycle. The state transitions mirror the rendezvous
//! with the aggregator:
//!
//! ```text
//! Idle ──request──► SwapRequested ──await_release──► Swapping
//!                                                       │
//!            (session run task)  Active ◄───install─────┘
//! ```
//!
//! `request` publishes the swap intent, `await_release` waits for the
//! aggregator to stop draining event sinks, `install` signals completion
//! and starts the new session's run task. At most one swap is in flight:
//! the intent channel holds a single slot and the discovery loop drives
//! coordinators strictly one at a time.

use crate::device::{DeviceHandle, EventSinks};
use crate::swap::SwapIntent;
use statum::{machine, state};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Rendezvous failures. Every variant means the aggregator side of the
/// handshake is gone, which the caller treats as end of service.
#[derive(Debug, Error)]
pub enum SwapError {
    #[error("aggregator no longer accepts swap intents")]
    IntentRejected,

    #[error("aggregator dropped the swap acknowledgement")]
    AckLost,

    #[error("aggregator stopped waiting for swap completion")]
    CompletionRejected,
}

/// Coordinator lifecycle states.
#[state]
#[derive(Debug, Clone)]
pub enum SwapState {
    Idle,
    SwapRequested,
    Swapping,
    Active,
}

/// Drives one device handoff through the rendezvous protocol.
#[machine]
pub struct SwapCoordinator<S: SwapState> {
    intent_tx: mpsc::Sender<SwapIntent>,
    ack_rx: Option<oneshot::Receiver<()>>,
    complete_tx: Option<oneshot::Sender<()>>,
    session: Option<JoinHandle<()>>,
}

impl SwapCoordinator<Idle> {
    pub fn create(intent_tx: mpsc::Sender<SwapIntent>) -> Self {
        Self::new(intent_tx, None, None, None)
    }

    /// Signals swap-intent to the aggregator.
    pub async fn request(mut self) -> Result<SwapCoordinator<SwapRequested>, SwapError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let (complete_tx, complete_rx) = oneshot::channel();

        debug!("signalling swap intent");
        self.intent_tx
            .send(SwapIntent {
                ack: ack_tx,
                complete: complete_rx,
            })
            .await
            .map_err(|_| SwapError::IntentRejected)?;

        self.ack_rx = Some(ack_rx);
        self.complete_tx = Some(complete_tx);
        Ok(self.transition())
    }
}

impl SwapCoordinator<SwapRequested> {
    /// Waits until the aggregator has released the guard, i.e. stopped
    /// reading from the outgoing session's event sinks.
    pub async fn await_release(mut self) -> Result<SwapCoordinator<Swapping>, SwapError> {
        let ack_rx = self.ack_rx.take().ok_or(SwapError::AckLost)?;
        ack_rx.await.map_err(|_| SwapError::AckLost)?;
        debug!("aggregator paused, installing new session");
        Ok(self.transition())
    }
}

impl SwapCoordinator<Swapping> {
    /// Installs `handle` as the active session: signals swap-complete and
    /// starts the session's run task.
    pub fn install(
        mut self,
        handle: Box<dyn DeviceHandle>,
        sinks: EventSinks,
    ) -> Result<SwapCoordinator<Active>, SwapError> {
        let name = handle.name();

        let complete_tx = self.complete_tx.take().ok_or(SwapError::CompletionRejected)?;
        complete_tx
            .send(())
            .map_err(|_| SwapError::CompletionRejected)?;

        info!(device = %name, "device session installed");
        self.session = Some(tokio::spawn(async move {
            handle.run(sinks).await;
        }));
        Ok(self.transition())
    }
}

impl SwapCoordinator<Active> {
    /// Waits for the session's run task to return, which marks a device
    /// disconnect. Discovery supplies the next handle afterwards.
    pub async fn wait_disconnect(mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.await {
                warn!("device session task aborted: {e}");
            }
        }
        info!("device session ended, awaiting replacement");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::testkit::{ScriptedEvent, ScriptedHandle};
    use crate::device::{event_channels, AxisKind};

    #[tokio::test]
    async fn handshake_walks_the_full_state_machine() {
        let (sinks, mut streams) = event_channels();
        let (intent_tx, mut intent_rx) = mpsc::channel(1);

        // Stand in for the aggregator's swap arm.
        let aggregator = tokio::spawn(async move {
            let intent: SwapIntent = intent_rx.recv().await.expect("intent");
            intent.ack.send(()).expect("ack");
            intent.complete.await.expect("complete");
            streams.axes.recv().await.expect("event from new session")
        });

        let handle = Box::new(ScriptedHandle::new(
            "scripted-pad",
            vec![ScriptedEvent::Axis(AxisKind::LeftStickY, -0.4)],
        ));
        let runs = handle.runs.clone();

        let coordinator = SwapCoordinator::create(intent_tx);
        let coordinator = coordinator.request().await.expect("request");
        let coordinator = coordinator.await_release().await.expect("release");
        let coordinator = coordinator.install(handle, sinks).expect("install");
        coordinator.wait_disconnect().await;

        let event = aggregator.await.expect("aggregator");
        assert_eq!(event.axis, AxisKind::LeftStickY);
        assert_eq!(event.value, -0.4);
        assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn request_fails_once_the_aggregator_is_gone() {
        let (intent_tx, intent_rx) = mpsc::channel(1);
        drop(intent_rx);

        let coordinator = SwapCoordinator::create(intent_tx);
        let err = coordinator.request().await.err().expect("closed channel");
        assert!(matches!(err, SwapError::IntentRejected));
    }

    #[tokio::test]
    async fn release_fails_when_the_ack_is_dropped() {
        let (intent_tx, mut intent_rx) = mpsc::channel(1);

        let coordinator = SwapCoordinator::create(intent_tx);
        let coordinator = coordinator.request().await.expect("request");

        // Aggregator drops the intent without acking.
        let intent = intent_rx.recv().await.expect("intent");
        drop(intent);

        let err = coordinator.await_release().await.err().expect("lost ack");
        assert!(matches!(err, SwapError::AckLost));
    }
}
