//! Gamepad backend over gilrs.
//!
//! Discovery enumerates currently connected gamepads; each handle runs its
//! own session that pumps gilrs events, normalizes them and pushes them
//! into the shared sinks until the pad disconnects.
//!
//! gilrs has no touch-surface support, so this backend emits axis and
//! button events only; touch events come from backends that expose one.

use crate::device::{
    AxisEvent, AxisKind, ButtonEvent, ButtonKind, DeviceDriver, DeviceHandle, DiscoveryError,
    EventSinks,
};
use async_trait::async_trait;
use chrono::Local;
use gilrs::{Axis, Button, Event, EventType, GamepadId, Gilrs};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Settings for the gilrs backend.
#[derive(Debug, Clone)]
pub struct GilrsDriverSettings {
    /// Analog stick deadzone as a fraction (0.0-1.0). Prevents stick drift
    /// near the center position.
    pub joystick_deadzone: f32,
}

impl Default for GilrsDriverSettings {
    fn default() -> Self {
        Self {
            joystick_deadzone: 0.05,
        }
    }
}

/// Device driver backed by the gilrs gamepad library.
pub struct GilrsDriver {
    settings: GilrsDriverSettings,
}

impl GilrsDriver {
    pub fn new(settings: Option<GilrsDriverSettings>) -> Self {
        Self {
            settings: settings.unwrap_or_default(),
        }
    }
}

impl DeviceDriver for GilrsDriver {
    fn discover(&mut self) -> Result<Vec<Box<dyn DeviceHandle>>, DiscoveryError> {
        let gilrs = Gilrs::new().map_err(|e| DiscoveryError::Backend(e.to_string()))?;

        let handles: Vec<Box<dyn DeviceHandle>> = gilrs
            .gamepads()
            .map(|(id, gamepad)| {
                debug!(%id, name = gamepad.name(), "gamepad found");
                Box::new(GilrsHandle {
                    id,
                    name: gamepad.name().to_string(),
                    deadzone: self.settings.joystick_deadzone,
                }) as Box<dyn DeviceHandle>
            })
            .collect();

        Ok(handles)
    }
}

/// One discovered gamepad. The session owns its own gilrs context so the
/// driver can keep scanning independently.
struct GilrsHandle {
    id: GamepadId,
    name: String,
    deadzone: f32,
}

/// Normalized session event, before fan-out to the typed sinks.
enum SessionEvent {
    Axis(AxisKind, f64),
    Button(ButtonKind, bool),
}

#[async_trait]
impl DeviceHandle for GilrsHandle {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn run(self: Box<Self>, sinks: EventSinks) {
        let mut gilrs = match Gilrs::new() {
            Ok(g) => g,
            Err(e) => {
                warn!(device = %self.name, "gilrs context failed, ending session: {e}");
                return;
            }
        };
        if gilrs.connected_gamepad(self.id).is_none() {
            warn!(device = %self.name, "gamepad vanished before the session started");
            return;
        }
        info!(device = %self.name, "device session running");

        loop {
            while let Some(Event { id, event, .. }) = gilrs.next_event() {
                if id != self.id {
                    continue;
                }
                if matches!(event, EventType::Disconnected) {
                    info!(device = %self.name, "gamepad disconnected");
                    return;
                }
                if let Some(session_event) = self.convert(event) {
                    if !push(&sinks, session_event).await {
                        debug!(device = %self.name, "event sinks closed, ending session");
                        return;
                    }
                }
            }
            // gilrs is poll-based; a short sleep keeps the pump from
            // spinning while staying well under human reaction time.
            tokio::time::sleep(Duration::from_micros(500)).await;
        }
    }
}

impl GilrsHandle {
    fn convert(&self, event: EventType) -> Option<SessionEvent> {
        match event {
            EventType::AxisChanged(axis, value, _) => {
                let kind = match axis {
                    Axis::LeftStickX => AxisKind::LeftStickX,
                    Axis::LeftStickY => AxisKind::LeftStickY,
                    Axis::RightStickX => AxisKind::RightStickX,
                    Axis::RightStickY => AxisKind::RightStickY,
                    Axis::LeftZ => AxisKind::LeftTrigger,
                    Axis::RightZ => AxisKind::RightTrigger,
                    _ => return None,
                };
                let value = match kind {
                    AxisKind::LeftTrigger | AxisKind::RightTrigger => {
                        f64::from(value.clamp(0.0, 1.0))
                    }
                    _ => f64::from(apply_deadzone(value, self.deadzone).clamp(-1.0, 1.0)),
                };
                Some(SessionEvent::Axis(kind, value))
            }
            EventType::ButtonPressed(button, _) => {
                map_button(button).map(|b| SessionEvent::Button(b, true))
            }
            EventType::ButtonReleased(button, _) => {
                map_button(button).map(|b| SessionEvent::Button(b, false))
            }
            _ => None,
        }
    }
}

async fn push(sinks: &EventSinks, event: SessionEvent) -> bool {
    let now = Local::now();
    match event {
        SessionEvent::Axis(axis, value) => sinks
            .axes
            .send(AxisEvent {
                axis,
                value,
                timestamp: now,
            })
            .await
            .is_ok(),
        SessionEvent::Button(button, pressed) => sinks
            .buttons
            .send(ButtonEvent {
                button,
                pressed,
                timestamp: now,
            })
            .await
            .is_ok(),
    }
}

fn map_button(button: Button) -> Option<ButtonKind> {
    match button {
        Button::South => Some(ButtonKind::ClawOpen),
        Button::East => Some(ButtonKind::ClawClose),
        Button::RightThumb => Some(ButtonKind::StickLock),
        Button::Mode => Some(ButtonKind::LightToggle),
        _ => None,
    }
}

/// Rescales a stick value so the range outside the deadzone maps back onto
/// the full [-1, 1] span.
fn apply_deadzone(value: f32, deadzone: f32) -> f32 {
    if value.abs() < deadzone {
        0.0
    } else {
        let sign = if value < 0.0 { -1.0 } else { 1.0 };
        sign * (value.abs() - deadzone) / (1.0 - deadzone)
    }
}
