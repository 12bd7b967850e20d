//! Descriptor snapshots of libusb devices

use crate::error::map_rusb_error;
use common::{DeviceDescriptor, DeviceId, HostError, InterfaceDescriptor};
use rusb::{Device, UsbContext};
use tracing::debug;

/// Vendor ID of the Linux Foundation root hubs
const ROOT_HUB_VENDOR: u16 = 0x1d6b;
const HUB_CLASS: u8 = 9;

/// Root hubs are never candidates for a connection
pub fn is_root_hub(vendor_id: u16, class_code: u8) -> bool {
    vendor_id == ROOT_HUB_VENDOR && class_code == HUB_CLASS
}

pub fn device_id<T: UsbContext>(device: &Device<T>) -> DeviceId {
    DeviceId::from_bus_address(device.bus_number(), device.address())
}

/// Recover bus number and address from a `/dev/bus/usb/BBB/AAA` identifier
pub fn parse_bus_address(id: &DeviceId) -> Option<(u8, u8)> {
    let rest = id.as_str().strip_prefix("/dev/bus/usb/")?;
    let (bus, address) = rest.split_once('/')?;
    Some((bus.parse().ok()?, address.parse().ok()?))
}

/// Look up the libusb device behind an identifier
pub fn find_device<T: UsbContext>(context: &T, id: &DeviceId) -> Result<Device<T>, HostError> {
    let (bus, address) = parse_bus_address(id).ok_or(HostError::NoDevice)?;
    context
        .devices()
        .map_err(map_rusb_error)?
        .iter()
        .find(|d| d.bus_number() == bus && d.address() == address)
        .ok_or(HostError::NoDevice)
}

/// Snapshot a device, reading string descriptors when the OS lets us open it
pub fn describe<T: UsbContext>(
    device: &Device<T>,
    desc: &rusb::DeviceDescriptor,
) -> DeviceDescriptor {
    let id = device_id(device);

    let (manufacturer, product) = match device.open() {
        Ok(handle) => (
            desc.manufacturer_string_index()
                .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok()),
            desc.product_string_index()
                .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok()),
        ),
        Err(e) => {
            debug!("Cannot read strings of {}: {}", id, e);
            (None, None)
        }
    };

    DeviceDescriptor {
        id,
        vendor_id: desc.vendor_id(),
        product_id: desc.product_id(),
        manufacturer,
        product,
        interfaces: interfaces(device),
    }
}

/// Every alternate setting of every interface in the active configuration
fn interfaces<T: UsbContext>(device: &Device<T>) -> Vec<InterfaceDescriptor> {
    let config = match device.active_config_descriptor() {
        Ok(config) => config,
        Err(e) => {
            debug!(
                "No active configuration on bus={}, addr={}: {}",
                device.bus_number(),
                device.address(),
                e
            );
            return Vec::new();
        }
    };

    config
        .interfaces()
        .flat_map(|interface| interface.descriptors())
        .map(|alt| InterfaceDescriptor {
            number: alt.interface_number(),
            alternate_setting: alt.setting_number(),
            class_code: alt.class_code(),
            sub_class_code: alt.sub_class_code(),
            protocol_code: alt.protocol_code(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_hub_detection() {
        assert!(is_root_hub(0x1d6b, 9));
        assert!(!is_root_hub(0x1d6b, 0));
        assert!(!is_root_hub(0x2fe3, 9));
    }

    #[test]
    fn test_bus_address_roundtrip() {
        let id = DeviceId::from_bus_address(3, 17);
        assert_eq!(id.as_str(), "/dev/bus/usb/003/017");
        assert_eq!(parse_bus_address(&id), Some((3, 17)));
    }

    #[test]
    fn test_parse_bus_address_rejects_foreign_ids() {
        assert_eq!(parse_bus_address(&DeviceId::new("COM3")), None);
        assert_eq!(parse_bus_address(&DeviceId::new("/dev/bus/usb/001")), None);
        assert_eq!(parse_bus_address(&DeviceId::new("/dev/bus/usb/999/001")), None);
    }
}
