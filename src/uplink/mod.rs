//! Uplink core: the actuation-state aggregate, its event loop and the
//! control link that carries snapshots to the bottom side.
//!
//! `ActuationState` is owned exclusively by the [`Aggregator`]; every other
//! task only ever sees value copies taken at publish time.

pub mod aggregator;
pub mod link;

pub use aggregator::{Aggregator, AggregatorError};
pub use link::{ControlLink, LinkError, LinkSettings};

use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_3;
use std::time::Duration;
use thiserror::Error;

/// Snapshot of the desired robot actuation, published once per publish tick.
///
/// All bounded fields stay inside their declared range at all times: the
/// aggregator only writes values that already satisfy the invariants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActuationState {
    /// Drive axis along the robot's forward direction, in [-1, 1].
    pub forward: f64,
    /// Drive axis around the vertical, in [-1, 1].
    pub turn: f64,
    /// Signed vertical thrust, in [-limit, limit].
    pub vertical: f64,
    /// Orientation offset around X in radians, magnitude <= tilt limit.
    pub tilt_x: f64,
    /// Orientation offset around Y in radians, magnitude <= tilt limit.
    pub tilt_y: f64,
    /// Integrated claw open/close servo position, 0..=180.
    pub claw_position: u8,
    /// Claw tilt setpoint, 0..=180.
    pub claw_vertical: u8,
    /// Claw horizontal setpoint, in [-1, 1].
    pub claw_horizontal: f64,
    /// Sequence number, incremented once per publish tick.
    pub update_count: u64,
    /// Headlight latch, toggled by discrete press events.
    pub light: bool,
    /// Reserved latch for a secondary toggle, never set in this revision.
    pub aux_signal: bool,
}

/// Directional claw intent latched from the open/close buttons.
///
/// This is a velocity-like value the integrator tick turns into
/// [`ActuationState::claw_position`]; the two are deliberately distinct.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClawIntent {
    Opening,
    #[default]
    Hold,
    Closing,
}

impl ClawIntent {
    /// Servo-degree step applied per integrator tick.
    pub fn delta(self) -> i32 {
        match self {
            ClawIntent::Opening => 1,
            ClawIntent::Hold => 0,
            ClawIntent::Closing => -1,
        }
    }
}

/// Latch flags local to the aggregator loop, never published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatchState {
    /// Gates the right-stick claw setpoints. Locked by default; holding the
    /// stick button unlocks.
    pub claw_locked: bool,
    /// Directional intent driving the claw integrator tick.
    pub claw_intent: ClawIntent,
}

impl Default for LatchState {
    fn default() -> Self {
        Self {
            claw_locked: true,
            claw_intent: ClawIntent::Hold,
        }
    }
}

/// Timing and limit configuration for the uplink core.
#[derive(Debug, Clone)]
pub struct UplinkSettings {
    /// Cadence of snapshot publication over the control link.
    pub publish_interval: Duration,
    /// Cadence of the claw position integrator.
    pub integrator_interval: Duration,
    /// Maximum tilt offset in radians.
    pub tilt_limit: f64,
    /// Scale factor for the trigger-driven vertical thrust.
    pub vertical_limit: f64,
}

impl Default for UplinkSettings {
    fn default() -> Self {
        Self {
            publish_interval: Duration::from_millis(40), // 25 Hz
            integrator_interval: Duration::from_millis(10), // 100 Hz
            tilt_limit: FRAC_PI_3,
            vertical_limit: 1.0,
        }
    }
}

/// Unrecoverable conditions reported to the supervisor loop in `main`.
///
/// Everything that reaches this type terminates the process; recoverable
/// conditions (discovery failures, single lost frames) are handled where
/// they occur and never escalate.
#[derive(Debug, Error)]
pub enum UplinkFailure {
    #[error("control link failed: {0}")]
    Link(#[from] LinkError),

    #[error("aggregator stopped: {0}")]
    Aggregator(#[from] AggregatorError),
}

/// Linearly rescales `x` from `[in_min, in_max]` to `[out_min, out_max]`,
/// clamping the result to the output range.
pub fn map_range(x: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64) -> f64 {
    let y = (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min;
    y.clamp(out_min, out_max)
}
