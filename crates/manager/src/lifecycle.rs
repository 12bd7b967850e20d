//! Connection lifecycle state machine
//!
//! Single owner of the connection state. Every transition, whether caused by
//! a direct call or by a host event, runs through `&mut self` while the
//! manager's mutex is held, so permission decisions, detaches, connects and
//! disconnects are strictly ordered.
//!
//! ```text
//! Disconnected ──connect──► PermissionPending ──granted──► Connecting ──claimed──► Connected
//!      ▲    │                     │ denied                    │ failed               │
//!      │    └──(already held)─────┼──────────────────────────►│                      │
//!      │                          ▼                           ▼                      │
//!      │                        Error ◄───────────────────────┘                      │
//!      └──────────────────── disconnect / detach / release ◄─────────────────────────┘
//! ```

use crate::connection::OpenConnection;
use crate::enumerator;
use crate::error::ConnectError;
use crate::host::{DeviceConnection, UsbHost};
use crate::permission::{Decision, PermissionCoordinator, PermissionRequest};
use crate::selector;
use crate::status::{ConnectionStatus, DisconnectReason, StatusPublisher};
use common::{DeviceDescriptor, DeviceId, EventSink, HostError, HostEvent};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a successful `connect` call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Interface claimed, now connected
    Connected,
    /// Already connected to this device; nothing changed
    AlreadyConnected,
    /// A permission prompt is out; the result arrives as a host event
    PermissionPending,
}

pub(crate) enum ConnectionState<C: DeviceConnection> {
    Disconnected(DisconnectReason),
    PermissionPending(DeviceDescriptor),
    Connecting(DeviceDescriptor),
    Connected(OpenConnection<C>),
    Error(ConnectError),
}

impl<C: DeviceConnection> ConnectionState<C> {
    /// Device of an attempt in flight or an established connection
    fn active_device(&self) -> Option<&DeviceId> {
        match self {
            ConnectionState::PermissionPending(device) | ConnectionState::Connecting(device) => {
                Some(&device.id)
            }
            ConnectionState::Connected(conn) => Some(conn.device_id()),
            ConnectionState::Disconnected(_) | ConnectionState::Error(_) => None,
        }
    }

    fn status(&self) -> ConnectionStatus {
        match self {
            ConnectionState::Disconnected(reason) => {
                ConnectionStatus::Disconnected { reason: *reason }
            }
            ConnectionState::PermissionPending(device) => ConnectionStatus::PermissionPending {
                device: device.id.clone(),
            },
            ConnectionState::Connecting(device) => ConnectionStatus::Connecting {
                device: device.id.clone(),
            },
            ConnectionState::Connected(conn) => ConnectionStatus::Connected {
                device: conn.device_id().clone(),
                interface: conn.interface().number,
            },
            ConnectionState::Error(error) => ConnectionStatus::Error {
                error: error.clone(),
            },
        }
    }
}

pub(crate) struct Lifecycle<H: UsbHost> {
    host: Arc<H>,
    state: ConnectionState<H::Connection>,
    permissions: PermissionCoordinator,
    status: StatusPublisher,
    /// Handed to the host with every permission request
    events: EventSink,
    /// Dropped on release to stop detach notifications
    detach_subscription: Option<H::DetachSubscription>,
    released: bool,
}

impl<H: UsbHost> Lifecycle<H> {
    pub(crate) fn new(
        host: Arc<H>,
        events: EventSink,
        detach_subscription: H::DetachSubscription,
    ) -> Self {
        Self {
            host,
            state: ConnectionState::Disconnected(DisconnectReason::Idle),
            permissions: PermissionCoordinator::new(),
            status: StatusPublisher::new(),
            events,
            detach_subscription: Some(detach_subscription),
            released: false,
        }
    }

    pub(crate) fn status(&self) -> &StatusPublisher {
        &self.status
    }

    pub(crate) fn current_device(&self) -> Option<&DeviceId> {
        self.state.active_device()
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released
    }

    pub(crate) fn list(&self) -> Result<Vec<DeviceDescriptor>, HostError> {
        enumerator::list(&*self.host)
    }

    pub(crate) fn find(&self, id: &DeviceId) -> Result<Option<DeviceDescriptor>, HostError> {
        enumerator::find(&*self.host, id)
    }

    pub(crate) fn connection_mut(&mut self) -> Option<&mut OpenConnection<H::Connection>> {
        match &mut self.state {
            ConnectionState::Connected(conn) => Some(conn),
            _ => None,
        }
    }

    pub(crate) fn connect(
        &mut self,
        device: &DeviceDescriptor,
    ) -> Result<ConnectOutcome, ConnectError> {
        if self.released {
            return Err(ConnectError::Released);
        }

        match &self.state {
            ConnectionState::Connected(conn) if conn.device_id() == &device.id => {
                debug!("Already connected to {}", device.id);
                return Ok(ConnectOutcome::AlreadyConnected);
            }
            ConnectionState::PermissionPending(pending) if pending.id == device.id => {
                info!("Restarting permission request for {}", device.id);
            }
            state => {
                if let Some(current) = state.active_device() {
                    warn!("Rejecting connect to {}: busy with {}", device.id, current);
                    return Err(ConnectError::Busy {
                        current: current.clone(),
                    });
                }
            }
        }

        match self.permissions.request(&*self.host, device, &self.events) {
            PermissionRequest::Granted => self.establish(device.clone()),
            PermissionRequest::Pending => {
                self.transition(ConnectionState::PermissionPending(device.clone()));
                Ok(ConnectOutcome::PermissionPending)
            }
        }
    }

    pub(crate) fn disconnect(&mut self) -> Result<(), ConnectError> {
        if let ConnectionState::Disconnected(_) = self.state {
            debug!("Disconnect requested with nothing connected");
            return Err(ConnectError::NotConnected);
        }

        info!("Disconnecting");
        self.transition(ConnectionState::Disconnected(DisconnectReason::Requested));
        Ok(())
    }

    /// Stop listening for host events and tear everything down
    ///
    /// Idempotent.
    pub(crate) fn release(&mut self) {
        if self.released {
            debug!("Connection manager already released");
            return;
        }

        self.released = true;
        self.detach_subscription = None;
        self.transition(ConnectionState::Disconnected(DisconnectReason::Released));
        info!("Connection manager released");
    }

    pub(crate) fn handle_event(&mut self, event: HostEvent) {
        if self.released {
            debug!("Ignoring {:?} after release", event);
            return;
        }

        match event {
            HostEvent::PermissionDecision { device, granted } => {
                self.on_permission_decision(&device, granted)
            }
            HostEvent::Detached { device } => self.on_detached(&device),
        }
    }

    fn on_permission_decision(&mut self, device: &DeviceId, granted: bool) {
        match self.permissions.on_decision(device, granted) {
            None => {}
            Some(Decision::Granted) => {
                let ConnectionState::PermissionPending(pending) = &self.state else {
                    warn!("Permission granted for {} outside a pending attempt", device);
                    return;
                };
                info!("Permission granted for {}", device);

                let pending = pending.clone();
                if let Err(e) = self.establish(pending) {
                    debug!("Connection attempt after grant failed: {}", e);
                }
            }
            Some(Decision::Denied) => {
                self.fail(ConnectError::PermissionDenied {
                    device: device.clone(),
                });
            }
        }
    }

    fn on_detached(&mut self, device: &DeviceId) {
        if self.state.active_device() != Some(device) {
            debug!("Ignoring detach of {}, not the active device", device);
            return;
        }

        info!("Active device {} detached", device);
        self.transition(ConnectionState::Disconnected(DisconnectReason::Detached));
    }

    /// Select, open and claim; permission is already held
    fn establish(&mut self, device: DeviceDescriptor) -> Result<ConnectOutcome, ConnectError> {
        self.transition(ConnectionState::Connecting(device.clone()));

        let result = selector::select_interface(&device)
            .ok_or_else(|| ConnectError::NoSuitableInterface {
                device: device.id.clone(),
            })
            .and_then(|interface| selector::claim(&*self.host, &device, interface));

        match result {
            Ok(conn) => {
                info!(
                    "Connected to {} ({}), interface {}",
                    device.id,
                    device.label(),
                    conn.interface().number
                );
                self.transition(ConnectionState::Connected(conn));
                Ok(ConnectOutcome::Connected)
            }
            Err(error) => Err(self.fail(error)),
        }
    }

    fn fail(&mut self, error: ConnectError) -> ConnectError {
        warn!("Connection attempt failed: {}", error);
        self.transition(ConnectionState::Error(error.clone()));
        error
    }

    /// Replace the state, tearing down whatever the old one held
    ///
    /// The old connection is closed before the new status is published, so
    /// observers never see a disconnected status while a handle is open.
    fn transition(&mut self, next: ConnectionState<H::Connection>) {
        if !matches!(next, ConnectionState::PermissionPending(_))
            && let Some(abandoned) = self.permissions.abandon()
        {
            debug!("Abandoned permission request for {}", abandoned);
        }

        let previous = std::mem::replace(&mut self.state, next);
        if let ConnectionState::Connected(mut conn) = previous {
            conn.close();
        }

        self.status.publish(self.state.status());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockHost;
    use common::create_event_channel;
    use common::test_utils::{create_hid_device, create_vendor_device, mock_device_id};

    fn lifecycle(host: &MockHost) -> Lifecycle<MockHost> {
        let (sink, _stream) = create_event_channel();
        let subscription = host.subscribe_detach(sink.clone()).unwrap();
        Lifecycle::new(Arc::new(host.clone()), sink, subscription)
    }

    #[test]
    fn test_initial_state() {
        let host = MockHost::new();
        let lifecycle = lifecycle(&host);
        assert_eq!(lifecycle.status().current(), ConnectionStatus::default());
        assert!(lifecycle.current_device().is_none());
    }

    #[test]
    fn test_connect_with_permission_held() {
        let device = create_vendor_device(1);
        let host = MockHost::with_devices(vec![device.clone()]);
        host.grant(&device.id);
        let mut lifecycle = lifecycle(&host);

        assert_eq!(lifecycle.connect(&device), Ok(ConnectOutcome::Connected));
        assert!(lifecycle.connection_mut().is_some());
        assert!(lifecycle.permissions.outstanding().is_none());
    }

    #[test]
    fn test_permission_flow() {
        let device = create_vendor_device(1);
        let host = MockHost::with_devices(vec![device.clone()]);
        let mut lifecycle = lifecycle(&host);

        assert_eq!(
            lifecycle.connect(&device),
            Ok(ConnectOutcome::PermissionPending)
        );
        assert_eq!(lifecycle.permissions.outstanding(), Some(&device.id));

        lifecycle.handle_event(HostEvent::PermissionDecision {
            device: device.id.clone(),
            granted: true,
        });
        assert!(lifecycle.status().current().is_connected());
        assert!(lifecycle.permissions.outstanding().is_none());
    }

    #[test]
    fn test_denied() {
        let device = create_vendor_device(1);
        let host = MockHost::with_devices(vec![device.clone()]);
        let mut lifecycle = lifecycle(&host);

        lifecycle.connect(&device).unwrap();
        lifecycle.handle_event(HostEvent::PermissionDecision {
            device: device.id.clone(),
            granted: false,
        });
        assert_eq!(
            lifecycle.status().current(),
            ConnectionStatus::Error {
                error: ConnectError::PermissionDenied {
                    device: device.id.clone()
                }
            }
        );
        assert_eq!(host.ledger().opens, 0);
    }

    #[test]
    fn test_no_suitable_interface() {
        let device = create_hid_device(1);
        let host = MockHost::with_devices(vec![device.clone()]);
        host.grant(&device.id);
        let mut lifecycle = lifecycle(&host);

        assert_eq!(
            lifecycle.connect(&device),
            Err(ConnectError::NoSuitableInterface {
                device: device.id.clone()
            })
        );
        assert_eq!(host.ledger().opens, 0);
    }

    #[test]
    fn test_disconnect_from_error_clears_it() {
        let device = create_hid_device(1);
        let host = MockHost::with_devices(vec![device.clone()]);
        host.grant(&device.id);
        let mut lifecycle = lifecycle(&host);

        let _ = lifecycle.connect(&device);
        assert_eq!(lifecycle.disconnect(), Ok(()));
        assert_eq!(
            lifecycle.status().current(),
            ConnectionStatus::Disconnected {
                reason: DisconnectReason::Requested
            }
        );
        assert_eq!(lifecycle.disconnect(), Err(ConnectError::NotConnected));
    }

    #[test]
    fn test_disconnect_abandons_pending_request() {
        let device = create_vendor_device(1);
        let host = MockHost::with_devices(vec![device.clone()]);
        let mut lifecycle = lifecycle(&host);

        lifecycle.connect(&device).unwrap();
        lifecycle.disconnect().unwrap();
        assert!(lifecycle.permissions.outstanding().is_none());

        // Late grant for the abandoned prompt
        lifecycle.handle_event(HostEvent::PermissionDecision {
            device: device.id.clone(),
            granted: true,
        });
        assert!(!lifecycle.status().current().is_connected());
        assert_eq!(host.ledger().opens, 0);
    }

    #[test]
    fn test_detach_while_pending() {
        let device = create_vendor_device(1);
        let host = MockHost::with_devices(vec![device.clone()]);
        let mut lifecycle = lifecycle(&host);

        lifecycle.connect(&device).unwrap();
        lifecycle.handle_event(HostEvent::Detached {
            device: device.id.clone(),
        });
        assert_eq!(
            lifecycle.status().current(),
            ConnectionStatus::Disconnected {
                reason: DisconnectReason::Detached
            }
        );
        assert!(lifecycle.permissions.outstanding().is_none());
    }

    #[test]
    fn test_release_is_idempotent() {
        let device = create_vendor_device(1);
        let host = MockHost::with_devices(vec![device.clone()]);
        host.grant(&device.id);
        let mut lifecycle = lifecycle(&host);
        lifecycle.connect(&device).unwrap();

        lifecycle.release();
        lifecycle.release();
        assert!(lifecycle.is_released());
        assert_eq!(host.active_subscriptions(), 0);
        assert_eq!(host.ledger().closes, 1);
        assert_eq!(
            lifecycle.connect(&create_vendor_device(2)),
            Err(ConnectError::Released)
        );
    }

    #[test]
    fn test_events_ignored_after_release() {
        let host = MockHost::with_devices(vec![create_vendor_device(1)]);
        let mut lifecycle = lifecycle(&host);
        lifecycle.release();

        lifecycle.handle_event(HostEvent::Detached {
            device: mock_device_id(1),
        });
        assert_eq!(
            lifecycle.status().current(),
            ConnectionStatus::Disconnected {
                reason: DisconnectReason::Released
            }
        );
    }
}
