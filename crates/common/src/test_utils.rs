//! Test utilities for usb-link
//!
//! Descriptor builders shared by the unit and integration tests of every
//! crate in the workspace.
//!
//! # Example
//!
//! ```
//! use common::test_utils::create_vendor_device;
//!
//! let device = create_vendor_device(1);
//! assert_eq!(device.interfaces.len(), 2);
//! assert!(device.interfaces[1].is_vendor_specific());
//! ```

use crate::types::{DeviceDescriptor, DeviceId, InterfaceDescriptor, VENDOR_SPECIFIC_CLASS};
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// USB class codes used by the builders
pub const CLASS_CDC: u8 = 0x02;
pub const CLASS_HID: u8 = 0x03;
pub const CLASS_MASS_STORAGE: u8 = 0x08;

/// Identifier of the n-th mock device on bus 1
pub fn mock_device_id(n: u8) -> DeviceId {
    DeviceId::from_bus_address(1, n)
}

/// Create an interface descriptor with the given number and class
pub fn create_interface(number: u8, class_code: u8) -> InterfaceDescriptor {
    InterfaceDescriptor {
        number,
        alternate_setting: 0,
        class_code,
        sub_class_code: 0x00,
        protocol_code: 0x00,
    }
}

/// Create a device descriptor with the given interfaces
pub fn create_device(n: u8, interfaces: Vec<InterfaceDescriptor>) -> DeviceDescriptor {
    DeviceDescriptor {
        id: mock_device_id(n),
        vendor_id: 0x2fe3,
        product_id: 0x0100 + n as u16,
        manufacturer: Some(format!("Test Manufacturer {}", n)),
        product: Some(format!("Test Product {}", n)),
        interfaces,
    }
}

/// A WebUSB-style peripheral: a CDC control interface followed by the
/// vendor-specific data interface
pub fn create_vendor_device(n: u8) -> DeviceDescriptor {
    create_device(
        n,
        vec![
            create_interface(0, CLASS_CDC),
            create_interface(1, VENDOR_SPECIFIC_CLASS),
        ],
    )
}

/// A keyboard: a single HID interface, nothing to claim
pub fn create_hid_device(n: u8) -> DeviceDescriptor {
    create_device(n, vec![create_interface(0, CLASS_HID)])
}

/// A flash drive: a single mass storage interface
pub fn create_mass_storage_device(n: u8) -> DeviceDescriptor {
    create_device(n, vec![create_interface(0, CLASS_MASS_STORAGE)])
}
