//! Interface selection and claiming

use crate::connection::OpenConnection;
use crate::error::ConnectError;
use crate::host::{DeviceConnection, UsbHost};
use common::{DeviceDescriptor, InterfaceDescriptor};
use tracing::{debug, warn};

/// First vendor-specific interface in descriptor order
pub fn select_interface(device: &DeviceDescriptor) -> Option<InterfaceDescriptor> {
    device
        .interfaces
        .iter()
        .find(|iface| iface.is_vendor_specific())
        .copied()
}

/// Open `device` and claim `interface` with forced takeover
///
/// On a failed claim the freshly opened handle is closed before the error is
/// returned.
pub fn claim<H: UsbHost>(
    host: &H,
    device: &DeviceDescriptor,
    interface: InterfaceDescriptor,
) -> Result<OpenConnection<H::Connection>, ConnectError> {
    let mut handle = host.open(device).map_err(|reason| {
        warn!("Failed to open {}: {}", device.id, reason);
        ConnectError::OpenFailed {
            device: device.id.clone(),
            reason,
        }
    })?;
    debug!("Opened {}", device.id);

    if let Err(reason) = handle.claim_interface(&interface, true) {
        warn!(
            "Failed to claim interface {} on {}: {}",
            interface.number, device.id, reason
        );
        handle.close();
        return Err(ConnectError::ClaimFailed {
            device: device.id.clone(),
            interface: interface.number,
            reason,
        });
    }
    debug!("Claimed interface {} on {}", interface.number, device.id);

    Ok(OpenConnection::new(device.clone(), interface, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockHost;
    use common::HostError;
    use common::test_utils::{
        create_device, create_hid_device, create_interface, create_vendor_device,
    };

    #[test]
    fn test_select_first_vendor_interface() {
        let device = create_device(
            1,
            vec![
                create_interface(0, 0x02),
                create_interface(1, 0xff),
                create_interface(2, 0xff),
            ],
        );
        assert_eq!(select_interface(&device).map(|i| i.number), Some(1));
    }

    #[test]
    fn test_select_none() {
        assert!(select_interface(&create_hid_device(1)).is_none());
        assert!(select_interface(&create_device(1, Vec::new())).is_none());
    }

    #[test]
    fn test_claim_success() {
        let device = create_vendor_device(1);
        let host = MockHost::with_devices(vec![device.clone()]);

        let conn = claim(&host, &device, device.interfaces[1]).unwrap();
        assert_eq!(conn.interface().number, 1);
        assert!(conn.is_open());

        let ledger = host.ledger();
        assert_eq!(ledger.opens, 1);
        assert_eq!(ledger.claims, 1);
        assert_eq!(ledger.forced_claims, 1);
    }

    #[test]
    fn test_open_failure() {
        let device = create_vendor_device(1);
        let host = MockHost::with_devices(vec![device.clone()]);
        host.fail_open(&device.id, HostError::Access);

        let err = claim(&host, &device, device.interfaces[1]).unwrap_err();
        assert_eq!(
            err,
            ConnectError::OpenFailed {
                device: device.id.clone(),
                reason: HostError::Access,
            }
        );
        assert_eq!(host.ledger().opens, 0);
    }

    #[test]
    fn test_claim_failure_closes_handle() {
        let device = create_vendor_device(1);
        let host = MockHost::with_devices(vec![device.clone()]);
        host.fail_claim(&device.id, HostError::Busy);

        let err = claim(&host, &device, device.interfaces[1]).unwrap_err();
        assert!(matches!(err, ConnectError::ClaimFailed { interface: 1, .. }));

        let ledger = host.ledger();
        assert_eq!(ledger.opens, 1);
        assert_eq!(ledger.claims, 0);
        assert_eq!(ledger.closes, 1);
        assert_eq!(ledger.leaks, 0);
    }
}
