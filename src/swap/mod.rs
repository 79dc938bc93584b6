//! Hot-swap rendezvous between device discovery and the aggregator loop.
//!
//! Replacing the active device must not race the event loop: the aggregator
//! first stops draining the event sinks, then the new session is installed,
//! then the loop resumes. [`SwapIntent`] carries the two single-slot signals
//! that order those steps; [`coordinator::SwapCoordinator`] drives them as
//! an explicit state machine.

pub mod coordinator;

pub use coordinator::{SwapCoordinator, SwapError};

use tokio::sync::oneshot;

/// One swap request, sent to the aggregator over a capacity-1 channel.
///
/// The aggregator fires `ack` once it has stopped reading the event sinks,
/// then parks on `complete` until the coordinator has installed the new
/// session. No event is processed in between.
#[derive(Debug)]
pub struct SwapIntent {
    pub ack: oneshot::Sender<()>,
    pub complete: oneshot::Receiver<()>,
}
