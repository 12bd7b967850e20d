//! Connection manager
//!
//! Public face of the crate. Owns the lifecycle behind a mutex and a
//! dedicated event driver thread that drains host notifications into it.
//! Direct calls (`connect`, `disconnect`, `list`, `release`) and host events
//! take the same lock, which is the only ordering guarantee anybody needs.

use crate::connection::OpenConnection;
use crate::error::ConnectError;
use crate::host::UsbHost;
use crate::lifecycle::{ConnectOutcome, Lifecycle};
use crate::status::ConnectionStatus;
use common::{DeviceDescriptor, DeviceId, EventStream, HostError, HostEvent, create_event_channel};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info};

/// Manages one connection to one USB peripheral at a time
pub struct ConnectionManager<H: UsbHost> {
    lifecycle: Arc<Mutex<Lifecycle<H>>>,
    /// Closed on release so the driver thread exits
    events: EventStream,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl<H: UsbHost> ConnectionManager<H> {
    /// Create a manager and start listening for host events
    pub fn new(host: H) -> common::Result<Self> {
        let host = Arc::new(host);
        let (sink, stream) = create_event_channel();

        let subscription = host.subscribe_detach(sink.clone())?;
        let lifecycle = Arc::new(Mutex::new(Lifecycle::new(host, sink, subscription)));
        let driver = spawn_event_driver(Arc::clone(&lifecycle), stream.clone())?;

        debug!("Connection manager created");
        Ok(Self {
            lifecycle,
            events: stream,
            driver: Mutex::new(Some(driver)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle<H>> {
        lock_lifecycle(&self.lifecycle)
    }

    /// Devices attached right now
    pub fn list(&self) -> Result<Vec<DeviceDescriptor>, HostError> {
        self.lock().list()
    }

    /// Look up an attached device by identifier
    pub fn find(&self, id: &DeviceId) -> Result<Option<DeviceDescriptor>, HostError> {
        self.lock().find(id)
    }

    /// Start connecting to `device`
    ///
    /// Returns as soon as the attempt is either complete or waiting on a
    /// permission prompt. Failures are also published as the `Error` status.
    pub fn connect(&self, device: &DeviceDescriptor) -> Result<ConnectOutcome, ConnectError> {
        self.lock().connect(device)
    }

    /// Tear down the current connection or attempt, if any
    pub fn disconnect(&self) {
        if let Err(e) = self.try_disconnect() {
            debug!("Disconnect was a no-op: {}", e);
        }
    }

    /// Like `disconnect`, but reports `NotConnected` when there was nothing
    /// to tear down
    pub fn try_disconnect(&self) -> Result<(), ConnectError> {
        self.lock().disconnect()
    }

    /// Apply a host event synchronously
    ///
    /// Hosts normally post events through the sink they were given; this is
    /// for integrations that already run on a serialized callback context.
    pub fn handle_event(&self, event: HostEvent) {
        self.lock().handle_event(event);
    }

    /// Disconnect, stop listening for host events and stop the driver
    ///
    /// Idempotent, and safe from any state.
    pub fn release(&self) {
        self.lock().release();
        self.events.close();

        let driver = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = driver {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("Event driver thread panicked");
            }
        }
    }

    pub fn is_released(&self) -> bool {
        self.lock().is_released()
    }

    /// Latest status
    pub fn status(&self) -> ConnectionStatus {
        self.lock().status().current()
    }

    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Device of the attempt in flight or the established connection
    pub fn current_device(&self) -> Option<DeviceId> {
        self.lock().current_device().cloned()
    }

    /// Watch the latest status
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.lock().status().subscribe()
    }

    /// Watch the "is connected" flag
    pub fn subscribe_connected(&self) -> watch::Receiver<bool> {
        self.lock().status().subscribe_connected()
    }

    /// Receive every status transition in order
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.lock().status().subscribe_transitions()
    }

    /// Run `f` against the open connection while holding the state lock
    ///
    /// The borrow cannot outlive the call, so nothing outside the manager
    /// ever keeps a handle. Returns `None` when not connected.
    ///
    /// `f` must not call back into the manager: the lock is not reentrant
    /// and any such call deadlocks.
    pub fn with_connection<R>(
        &self,
        f: impl FnOnce(&mut OpenConnection<H::Connection>) -> R,
    ) -> Option<R> {
        self.lock().connection_mut().map(f)
    }
}

impl<H: UsbHost> Drop for ConnectionManager<H> {
    fn drop(&mut self) {
        self.release();
    }
}

fn lock_lifecycle<H: UsbHost>(lifecycle: &Mutex<Lifecycle<H>>) -> MutexGuard<'_, Lifecycle<H>> {
    // A panic mid-transition leaves the state as it was last assigned
    lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Spawn the thread that applies host events to the lifecycle
///
/// The thread runs until the event stream is closed by `release`.
fn spawn_event_driver<H: UsbHost>(
    lifecycle: Arc<Mutex<Lifecycle<H>>>,
    events: EventStream,
) -> common::Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("usb-link-events".to_string())
        .spawn(move || run_event_driver(lifecycle, events))?;
    Ok(handle)
}

fn run_event_driver<H: UsbHost>(lifecycle: Arc<Mutex<Lifecycle<H>>>, events: EventStream) {
    info!("Event driver started");

    while let Ok(event) = events.recv_blocking() {
        debug!("Host event: {:?}", event);

        // Keep the driver alive if a host implementation panics inside a
        // callback we make while handling the event.
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            lock_lifecycle(&lifecycle).handle_event(event)
        }));

        if let Err(e) = result {
            error!("Panic while handling host event: {:?}", e);
        }
    }

    info!("Event driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockHost;
    use common::test_utils::create_vendor_device;

    #[test]
    fn test_new_subscribes_to_detach() {
        let host = MockHost::new();
        let manager = ConnectionManager::new(host.clone()).unwrap();
        assert_eq!(host.active_subscriptions(), 1);

        manager.release();
        assert_eq!(host.active_subscriptions(), 0);
        assert!(manager.is_released());
    }

    #[test]
    fn test_drop_releases() {
        let device = create_vendor_device(1);
        let host = MockHost::with_devices(vec![device.clone()]);
        host.grant(&device.id);

        let manager = ConnectionManager::new(host.clone()).unwrap();
        manager.connect(&device).unwrap();
        drop(manager);

        let ledger = host.ledger();
        assert_eq!(ledger.closes, 1);
        assert_eq!(ledger.open_handles(), 0);
        assert_eq!(host.active_subscriptions(), 0);
    }

    #[test]
    fn test_with_connection() {
        let device = create_vendor_device(1);
        let host = MockHost::with_devices(vec![device.clone()]);
        host.grant(&device.id);
        let manager = ConnectionManager::new(host).unwrap();

        assert_eq!(manager.with_connection(|c| c.interface().number), None);
        manager.connect(&device).unwrap();
        assert_eq!(manager.with_connection(|c| c.interface().number), Some(1));
    }
}
