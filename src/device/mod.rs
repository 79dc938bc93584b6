//! Input-device layer: typed events, the sink bundle a session pushes them
//! into, and the driver seam that hides the concrete backend.
//!
//! ```text
//! DeviceDriver::discover() ──► DeviceHandle ──► run(EventSinks)
//!                                                     │
//!                              Aggregator ◄── axes / buttons / touch
//! ```
//!
//! Sinks are capacity-1 channels: a producing session parks on `send` until
//! the aggregator drains the slot. During a device swap the aggregator stops
//! draining, so in-flight events are delayed rather than dropped.

pub mod discovery;
pub mod gilrs_driver;

pub use discovery::{DiscoveryHandle, DiscoverySettings};
pub use gilrs_driver::{GilrsDriver, GilrsDriverSettings};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::sync::mpsc;

/// Continuous input axis identifiers.
///
/// Stick values are normalized to [-1, 1], trigger values to [0, 1];
/// drivers clamp before pushing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisKind {
    LeftStickX,
    LeftStickY,
    RightStickX,
    RightStickY,
    LeftTrigger,
    RightTrigger,
}

/// A single normalized axis reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisEvent {
    pub axis: AxisKind,
    pub value: f64,
    pub timestamp: DateTime<Local>,
}

/// Discrete controls the uplink reacts to. Anything else a backend offers
/// is filtered out at the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonKind {
    /// Held: drive the claw open.
    ClawOpen,
    /// Held: drive the claw closed.
    ClawClose,
    /// Right-stick thumb button; held: unlock the claw setpoint axes.
    StickLock,
    /// Press toggles the headlight latch.
    LightToggle,
}

/// A button state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    pub button: ButtonKind,
    pub pressed: bool,
    pub timestamp: DateTime<Local>,
}

/// One contact point on a touch surface, both coordinates in [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchPoint {
    pub x: f64,
    pub y: f64,
}

/// A full touch-surface reading; `points` is empty when the last finger
/// lifts off.
#[derive(Debug, Clone, PartialEq)]
pub struct TouchEvent {
    pub points: Vec<TouchPoint>,
    pub timestamp: DateTime<Local>,
}

/// Sender half of the event channels, handed to every device session.
#[derive(Debug, Clone)]
pub struct EventSinks {
    pub axes: mpsc::Sender<AxisEvent>,
    pub buttons: mpsc::Sender<ButtonEvent>,
    pub touch: mpsc::Sender<TouchEvent>,
}

/// Receiver half of the event channels, owned by the aggregator.
#[derive(Debug)]
pub struct EventStreams {
    pub axes: mpsc::Receiver<AxisEvent>,
    pub buttons: mpsc::Receiver<ButtonEvent>,
    pub touch: mpsc::Receiver<TouchEvent>,
}

/// Creates the sink/stream pair shared by all device sessions.
pub fn event_channels() -> (EventSinks, EventStreams) {
    let (axes_tx, axes_rx) = mpsc::channel(1);
    let (buttons_tx, buttons_rx) = mpsc::channel(1);
    let (touch_tx, touch_rx) = mpsc::channel(1);
    (
        EventSinks {
            axes: axes_tx,
            buttons: buttons_tx,
            touch: touch_tx,
        },
        EventStreams {
            axes: axes_rx,
            buttons: buttons_rx,
            touch: touch_rx,
        },
    )
}

/// Transient device-search failures. Logged and retried on the next
/// discovery interval, never fatal.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("input backend unavailable: {0}")]
    Backend(String),

    #[error("device enumeration failed: {0}")]
    Enumeration(String),
}

/// A live binding to one physical input device.
///
/// Created by a [`DeviceDriver`], owned by the hot-swap coordinator during
/// installation, then consumed by its own run task.
#[async_trait]
pub trait DeviceHandle: Send {
    /// Human-readable device name for logging.
    fn name(&self) -> String;

    /// Pumps typed events into `sinks` until the device disconnects or the
    /// aggregator goes away.
    async fn run(self: Box<Self>, sinks: EventSinks);
}

/// Backend seam for finding input devices.
pub trait DeviceDriver: Send {
    /// Searches for currently available devices. An empty result is a
    /// normal outcome, not an error.
    fn discover(&mut self) -> Result<Vec<Box<dyn DeviceHandle>>, DiscoveryError>;
}

#[cfg(test)]
pub(crate) mod testkit {
    //! Scripted drivers and handles for exercising the swap protocol and
    //! the discovery loop without hardware.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Events a [`ScriptedHandle`] replays into the sinks, in order.
    #[derive(Debug, Clone)]
    pub enum ScriptedEvent {
        Axis(AxisKind, f64),
        Button(ButtonKind, bool),
        Touch(Vec<TouchPoint>),
    }

    /// Replays a fixed event script, then returns (simulated disconnect).
    pub struct ScriptedHandle {
        pub name: String,
        pub script: Vec<ScriptedEvent>,
        pub runs: Arc<AtomicUsize>,
    }

    impl ScriptedHandle {
        pub fn new(name: &str, script: Vec<ScriptedEvent>) -> Self {
            Self {
                name: name.to_string(),
                script,
                runs: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl DeviceHandle for ScriptedHandle {
        fn name(&self) -> String {
            self.name.clone()
        }

        async fn run(self: Box<Self>, sinks: EventSinks) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let now = Local::now();
            for event in self.script {
                let pushed = match event {
                    ScriptedEvent::Axis(axis, value) => sinks
                        .axes
                        .send(AxisEvent {
                            axis,
                            value,
                            timestamp: now,
                        })
                        .await
                        .is_ok(),
                    ScriptedEvent::Button(button, pressed) => sinks
                        .buttons
                        .send(ButtonEvent {
                            button,
                            pressed,
                            timestamp: now,
                        })
                        .await
                        .is_ok(),
                    ScriptedEvent::Touch(points) => sinks
                        .touch
                        .send(TouchEvent {
                            points,
                            timestamp: now,
                        })
                        .await
                        .is_ok(),
                };
                if !pushed {
                    return;
                }
            }
        }
    }

    /// Yields one scripted outcome per `discover` call, then keeps
    /// reporting no devices.
    pub struct ScriptedDriver {
        pub outcomes: VecDeque<Result<Vec<Box<dyn DeviceHandle>>, DiscoveryError>>,
        pub calls: Arc<AtomicUsize>,
    }

    impl ScriptedDriver {
        pub fn new(
            outcomes: Vec<Result<Vec<Box<dyn DeviceHandle>>, DiscoveryError>>,
        ) -> Self {
            Self {
                outcomes: outcomes.into(),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl DeviceDriver for ScriptedDriver {
        fn discover(&mut self) -> Result<Vec<Box<dyn DeviceHandle>>, DiscoveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes.pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }
    }
}
