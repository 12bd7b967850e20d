//! Open connection composite
//!
//! A device handle and the interface claimed on it, acquired together and
//! released together. There is no way to hold one without the other.

use crate::host::DeviceConnection;
use common::{DeviceDescriptor, DeviceId, InterfaceDescriptor};
use tracing::{debug, info, warn};

/// An opened device with one claimed interface
pub struct OpenConnection<C: DeviceConnection> {
    device: DeviceDescriptor,
    interface: InterfaceDescriptor,
    /// `None` once closed
    handle: Option<C>,
}

impl<C: DeviceConnection> OpenConnection<C> {
    /// Wrap a handle whose interface has just been claimed
    pub(crate) fn new(device: DeviceDescriptor, interface: InterfaceDescriptor, handle: C) -> Self {
        Self {
            device,
            interface,
            handle: Some(handle),
        }
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device.id
    }

    pub fn interface(&self) -> &InterfaceDescriptor {
        &self.interface
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Borrow the handle for I/O
    pub fn handle_mut(&mut self) -> Option<&mut C> {
        self.handle.as_mut()
    }

    /// Release the interface, then close the handle
    ///
    /// Idempotent: only the first call touches the device.
    pub fn close(&mut self) {
        let Some(mut handle) = self.handle.take() else {
            debug!("Connection to {} already closed", self.device.id);
            return;
        };

        // The device may already be gone (detach), so release can fail.
        if let Err(e) = handle.release_interface(&self.interface) {
            warn!(
                "Failed to release interface {} on {}: {}",
                self.interface.number, self.device.id, e
            );
        }
        handle.close();

        info!(
            "Closed {} (interface {} released)",
            self.device.id, self.interface.number
        );
    }
}

impl<C: DeviceConnection> Drop for OpenConnection<C> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<C: DeviceConnection> std::fmt::Debug for OpenConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenConnection")
            .field("device", &self.device.id)
            .field("interface", &self.interface.number)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::UsbHost;
    use crate::mock::MockHost;
    use common::test_utils::create_vendor_device;

    fn open(host: &MockHost) -> OpenConnection<<MockHost as UsbHost>::Connection> {
        let device = create_vendor_device(1);
        let interface = device.interfaces[1];
        let mut handle = host.open(&device).unwrap();
        handle.claim_interface(&interface, true).unwrap();
        OpenConnection::new(device, interface, handle)
    }

    #[test]
    fn test_close_releases_then_closes_once() {
        let host = MockHost::with_devices(vec![create_vendor_device(1)]);
        let mut conn = open(&host);
        assert!(conn.is_open());

        conn.close();
        conn.close();
        assert!(!conn.is_open());

        let ledger = host.ledger();
        assert_eq!(ledger.opens, 1);
        assert_eq!(ledger.claims, 1);
        assert_eq!(ledger.releases, 1);
        assert_eq!(ledger.closes, 1);
        assert_eq!(ledger.double_releases, 0);
    }

    #[test]
    fn test_drop_closes() {
        let host = MockHost::with_devices(vec![create_vendor_device(1)]);
        drop(open(&host));

        let ledger = host.ledger();
        assert_eq!(ledger.closes, 1);
        assert_eq!(ledger.leaks, 0);
    }

    #[test]
    fn test_close_after_unplug_still_closes() {
        let host = MockHost::with_devices(vec![create_vendor_device(1)]);
        let mut conn = open(&host);
        host.unplug(conn.device_id());

        conn.close();
        let ledger = host.ledger();
        assert_eq!(ledger.releases, 0);
        assert_eq!(ledger.closes, 1);
    }
}
