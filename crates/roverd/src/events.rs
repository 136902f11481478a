//! Internal event channel.
//!
//! State machines report transitions here; the session forwards whatever
//! arrives to the control plane. Sends never wait: when the channel is full
//! the new event is dropped.

use rover_core::RoverEvent;
use tokio::sync::mpsc;
use tracing::trace;

/// Capacity of the event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Cloneable producer side of the event channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<RoverEvent>,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<RoverEvent>) -> Self {
        Self { tx }
    }

    /// Queues `event`, dropping it if the channel is full or closed.
    pub fn emit(&self, event: RoverEvent) {
        let name = event.event.clone();
        if let Err(e) = self.tx.try_send(event) {
            trace!(event = %name, error = %e, "Event dropped");
        }
    }
}

/// Creates the event channel with the standard capacity.
pub fn channel() -> (EventSender, mpsc::Receiver<RoverEvent>) {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    (EventSender::new(tx), rx)
}
