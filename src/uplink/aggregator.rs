//! State aggregator: the single sequential event loop of the uplink.
//!
//! Merges device events, the two fixed-cadence timers and swap signals into
//! ordered mutations of the actuation aggregate:
//!
//! ```text
//!  axes ──┐
//!  buttons ├──► select ──► ActuationState / LatchState
//!  touch ──┘      ▲               │ (value copy per publish tick)
//!  swap intent ───┤               ▼
//!  publish tick ──┤          control link
//!  claw tick ─────┘
//! ```
//!
//! Exactly one arm runs per iteration, so no locking is needed around the
//! state aggregates. While a swap is in flight the loop parks inside the
//! swap arm and nothing else — events or ticks — is processed.

use crate::device::{AxisEvent, AxisKind, ButtonEvent, ButtonKind, EventStreams, TouchEvent};
use crate::swap::SwapIntent;
use crate::uplink::{map_range, ActuationState, ClawIntent, LatchState, UplinkSettings};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Conditions that end the aggregator loop. All of them mean a peer task
/// is gone, which the process supervisor treats as fatal.
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("swap intent channel closed")]
    SwapChannelClosed,

    #[error("device event sinks closed")]
    EventSinksClosed,

    #[error("control link dropped the snapshot channel")]
    LinkClosed,
}

/// Owns the actuation and latch aggregates and applies every mutation.
pub struct Aggregator {
    state: ActuationState,
    latch: LatchState,
    settings: UplinkSettings,
    events: EventStreams,
    swap_rx: mpsc::Receiver<SwapIntent>,
    snapshot_tx: mpsc::Sender<ActuationState>,
}

impl Aggregator {
    pub fn new(
        events: EventStreams,
        swap_rx: mpsc::Receiver<SwapIntent>,
        snapshot_tx: mpsc::Sender<ActuationState>,
        settings: Option<UplinkSettings>,
    ) -> Self {
        Self {
            state: ActuationState::default(),
            latch: LatchState::default(),
            settings: settings.unwrap_or_default(),
            events,
            swap_rx,
            snapshot_tx,
        }
    }

    /// Runs the select loop until a peer task disappears.
    pub async fn run(mut self) -> Result<(), AggregatorError> {
        info!(
            publish_ms = self.settings.publish_interval.as_millis() as u64,
            integrate_ms = self.settings.integrator_interval.as_millis() as u64,
            "aggregator loop started"
        );

        // First firing after one full period, like a plain ticker; skipped
        // ticks (e.g. during a swap window) are dropped, not replayed.
        let now = Instant::now();
        let mut publish = interval_at(now + self.settings.publish_interval, self.settings.publish_interval);
        let mut integrate = interval_at(
            now + self.settings.integrator_interval,
            self.settings.integrator_interval,
        );
        publish.set_missed_tick_behavior(MissedTickBehavior::Skip);
        integrate.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                intent = self.swap_rx.recv() => match intent {
                    Some(intent) => self.pause_for_swap(intent).await,
                    None => return Err(AggregatorError::SwapChannelClosed),
                },
                _ = publish.tick() => self.publish()?,
                _ = integrate.tick() => self.integrate_claw(),
                event = self.events.axes.recv() => match event {
                    Some(event) => self.apply_axis(event),
                    None => return Err(AggregatorError::EventSinksClosed),
                },
                event = self.events.buttons.recv() => match event {
                    Some(event) => self.apply_button(event),
                    None => return Err(AggregatorError::EventSinksClosed),
                },
                event = self.events.touch.recv() => match event {
                    Some(event) => self.apply_touch(event),
                    None => return Err(AggregatorError::EventSinksClosed),
                },
            }
        }
    }

    /// Swap rendezvous, aggregator side: release the guard, then block until
    /// the coordinator reports completion. Blocking here is the whole point:
    /// no sink is drained and no tick fires until the new session is in.
    async fn pause_for_swap(&mut self, intent: SwapIntent) {
        debug!("swap intent received, pausing event intake");
        if intent.ack.send(()).is_err() {
            warn!("swap requester vanished before acknowledgement");
            return;
        }
        if intent.complete.await.is_err() {
            warn!("swap requester vanished mid-swap, resuming");
            return;
        }
        info!("device swap complete, resuming event intake");
    }

    fn apply_axis(&mut self, event: AxisEvent) {
        trace!(?event.axis, event.value, ts = %event.timestamp.format("%H:%M:%S%.3f"), "axis event");
        match event.axis {
            AxisKind::LeftStickX => self.state.turn = event.value,
            AxisKind::LeftStickY => self.state.forward = event.value,
            AxisKind::RightStickX => {
                // Policy drop: claw setpoints only move while unlocked.
                if !self.latch.claw_locked {
                    self.state.claw_horizontal = event.value;
                }
            }
            AxisKind::RightStickY => {
                if !self.latch.claw_locked {
                    self.state.claw_vertical = map_range(event.value, -1.0, 1.0, 0.0, 180.0) as u8;
                }
            }
            // Whichever trigger reports later owns the vertical axis.
            AxisKind::LeftTrigger => {
                self.state.vertical = event.value * self.settings.vertical_limit;
            }
            AxisKind::RightTrigger => {
                self.state.vertical = -event.value * self.settings.vertical_limit;
            }
        }
    }

    fn apply_button(&mut self, event: ButtonEvent) {
        trace!(?event.button, event.pressed, "button event");
        match event.button {
            ButtonKind::StickLock => self.latch.claw_locked = !event.pressed,
            ButtonKind::ClawOpen => {
                self.latch.claw_intent = if event.pressed {
                    ClawIntent::Opening
                } else {
                    ClawIntent::Hold
                };
            }
            ButtonKind::ClawClose => {
                self.latch.claw_intent = if event.pressed {
                    ClawIntent::Closing
                } else {
                    ClawIntent::Hold
                };
            }
            ButtonKind::LightToggle => {
                if event.pressed {
                    self.state.light = !self.state.light;
                    debug!(light = self.state.light, "headlight toggled");
                }
            }
        }
    }

    /// Exactly one contact point steers the tilt; anything else is an
    /// invalid gesture and resets both offsets.
    fn apply_touch(&mut self, event: TouchEvent) {
        if let [point] = event.points[..] {
            self.state.tilt_x = point.x * self.settings.tilt_limit;
            self.state.tilt_y = point.y * self.settings.tilt_limit;
        } else {
            self.state.tilt_x = 0.0;
            self.state.tilt_y = 0.0;
        }
    }

    /// Claw integrator tick: advance the bounded position accumulator by the
    /// latched intent, saturating at the servo range.
    fn integrate_claw(&mut self) {
        let next = i32::from(self.state.claw_position) + self.latch.claw_intent.delta();
        self.state.claw_position = next.clamp(0, 180) as u8;
    }

    /// Publish tick: stamp the sequence number and hand a value copy to the
    /// control link. A full channel means the link is mid-reconnect; that
    /// frame is dropped so stale actuation never stalls the loop.
    fn publish(&mut self) -> Result<(), AggregatorError> {
        self.state.update_count += 1;
        match self.snapshot_tx.try_send(self.state.clone()) {
            Ok(()) => {
                trace!(seq = self.state.update_count, "snapshot queued");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                debug!(seq = self.state.update_count, "link busy, dropping snapshot");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(AggregatorError::LinkClosed),
        }
    }
}
