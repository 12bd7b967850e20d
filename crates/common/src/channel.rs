//! Event channel from the host USB layer to the connection manager
//!
//! Permission decisions and detach notifications arrive on whatever thread
//! the host layer happens to use. They are funnelled through a single
//! unbounded channel so that one consumer applies them in arrival order.

use crate::types::DeviceId;
use async_channel::{Receiver, Sender, unbounded};
use tracing::debug;

/// Asynchronous notification raised by the host USB layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// The user/OS answered a permission prompt
    PermissionDecision {
        /// Device the prompt was issued for
        device: DeviceId,
        /// Whether access was granted
        granted: bool,
    },

    /// A device was physically removed
    Detached {
        /// Identifier of the removed device
        device: DeviceId,
    },
}

/// Producer side, handed to the host layer
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<HostEvent>,
}

impl EventSink {
    /// Post an event without blocking
    ///
    /// Host callbacks must never block, so this only fails when the consumer
    /// is gone (manager released). That case is logged and otherwise ignored.
    pub fn send(&self, event: HostEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                debug!("Dropping host event, manager no longer listening: {:?}", e.into_inner());
                false
            }
        }
    }

    /// Whether the consumer side has been closed
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side, owned by the manager's event driver
#[derive(Debug, Clone)]
pub struct EventStream {
    rx: Receiver<HostEvent>,
}

impl EventStream {
    /// Wait for the next event (blocking)
    pub fn recv_blocking(&self) -> crate::Result<HostEvent> {
        self.rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Wait for the next event
    pub async fn recv(&self) -> crate::Result<HostEvent> {
        self.rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&self) -> Option<HostEvent> {
        self.rx.try_recv().ok()
    }

    /// Close the channel; queued events can still be received, new sends fail
    pub fn close(&self) -> bool {
        self.rx.close()
    }

    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }
}

/// Create the host event channel
///
/// Returns (EventSink for the host layer, EventStream for the manager)
pub fn create_event_channel() -> (EventSink, EventStream) {
    let (tx, rx) = unbounded();
    (EventSink { tx }, EventStream { rx })
}
