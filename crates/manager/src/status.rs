//! Observable connection status
//!
//! Observers get the latest status and the "is connected" flag through
//! `watch` channels, and every transition in order through a `broadcast`
//! channel. Publishing never fails: nobody listening is fine.

use crate::error::ConnectError;
use common::DeviceId;
use std::fmt;
use tokio::sync::{broadcast, watch};

/// Capacity of the transition log; slow subscribers see `Lagged`
const TRANSITION_CAPACITY: usize = 64;

/// How the manager came to be disconnected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Never connected
    Idle,
    /// `disconnect()` was called
    Requested,
    /// The device was unplugged
    Detached,
    /// The manager was released
    Released,
}

/// Read-only view of the connection state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected { reason: DisconnectReason },
    PermissionPending { device: DeviceId },
    Connecting { device: DeviceId },
    Connected { device: DeviceId, interface: u8 },
    Error { error: ConnectError },
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected { .. })
    }

    /// Device the status refers to, if any
    pub fn device(&self) -> Option<&DeviceId> {
        match self {
            ConnectionStatus::PermissionPending { device }
            | ConnectionStatus::Connecting { device }
            | ConnectionStatus::Connected { device, .. } => Some(device),
            ConnectionStatus::Disconnected { .. } | ConnectionStatus::Error { .. } => None,
        }
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        ConnectionStatus::Disconnected {
            reason: DisconnectReason::Idle,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Disconnected { reason } => match reason {
                DisconnectReason::Detached => write!(f, "Disconnected: Device detached"),
                DisconnectReason::Released => write!(f, "Disconnected: Released"),
                DisconnectReason::Idle | DisconnectReason::Requested => write!(f, "Disconnected"),
            },
            ConnectionStatus::PermissionPending { device } => {
                write!(f, "Waiting for permission for {}", device)
            }
            ConnectionStatus::Connecting { device } => write!(f, "Connecting to {}", device),
            ConnectionStatus::Connected { device, .. } => write!(f, "Connected to {}", device),
            ConnectionStatus::Error { error } => write!(f, "Error: {}", error),
        }
    }
}

/// Writer side, owned by the lifecycle
#[derive(Debug)]
pub(crate) struct StatusPublisher {
    status: watch::Sender<ConnectionStatus>,
    connected: watch::Sender<bool>,
    transitions: broadcast::Sender<ConnectionStatus>,
}

impl StatusPublisher {
    pub(crate) fn new() -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());
        let (connected, _) = watch::channel(false);
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            status,
            connected,
            transitions,
        }
    }

    /// Log first, latest value last: whoever sees the new status in the
    /// watch channel finds the transition already queued.
    pub(crate) fn publish(&self, status: ConnectionStatus) {
        // No subscribers is not an error
        let _ = self.transitions.send(status.clone());

        let connected = status.is_connected();
        self.connected.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
        self.status.send_replace(status);
    }

    pub(crate) fn current(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub(crate) fn subscribe_connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    pub(crate) fn subscribe_transitions(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.transitions.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceId {
        DeviceId::new("/dev/bus/usb/001/004")
    }

    #[test]
    fn test_status_text() {
        assert_eq!(ConnectionStatus::default().to_string(), "Disconnected");
        assert_eq!(
            ConnectionStatus::Disconnected {
                reason: DisconnectReason::Detached
            }
            .to_string(),
            "Disconnected: Device detached"
        );
        assert_eq!(
            ConnectionStatus::Connected {
                device: device(),
                interface: 1
            }
            .to_string(),
            "Connected to /dev/bus/usb/001/004"
        );
        assert_eq!(
            ConnectionStatus::Error {
                error: ConnectError::PermissionDenied { device: device() }
            }
            .to_string(),
            "Error: permission denied for device /dev/bus/usb/001/004"
        );
    }

    #[test]
    fn test_publish_updates_observers() {
        let publisher = StatusPublisher::new();
        let status = publisher.subscribe();
        let connected = publisher.subscribe_connected();
        let mut transitions = publisher.subscribe_transitions();

        publisher.publish(ConnectionStatus::Connecting { device: device() });
        publisher.publish(ConnectionStatus::Connected {
            device: device(),
            interface: 1,
        });

        assert!(status.borrow().is_connected());
        assert!(*connected.borrow());
        assert_eq!(
            transitions.try_recv().unwrap(),
            ConnectionStatus::Connecting { device: device() }
        );
        assert!(transitions.try_recv().unwrap().is_connected());
        assert!(transitions.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_observers() {
        let publisher = StatusPublisher::new();
        publisher.publish(ConnectionStatus::Connecting { device: device() });
        assert_eq!(
            publisher.current(),
            ConnectionStatus::Connecting { device: device() }
        );
    }

    #[test]
    fn test_status_device() {
        assert_eq!(
            ConnectionStatus::PermissionPending { device: device() }.device(),
            Some(&device())
        );
        assert_eq!(ConnectionStatus::default().device(), None);
    }
}
