//! Device and interface descriptors
//!
//! Immutable snapshots of what the host USB layer reports at enumeration
//! time. The manager never owns the devices they describe; it only uses the
//! descriptors to pick an interface and to correlate asynchronous events.

use std::fmt;

/// Interface class code for vendor-specific interfaces
pub const VENDOR_SPECIFIC_CLASS: u8 = 0xff;

/// Stable identifier of an attached device
///
/// On Linux hosts this is the device node name (`/dev/bus/usb/001/004`).
/// Permission decisions and detach notifications are matched against it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Identifier derived from a bus number and device address
    pub fn from_bus_address(bus: u8, address: u8) -> Self {
        Self(format!("/dev/bus/usb/{:03}/{:03}", bus, address))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// One interface (alternate setting) of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    /// bInterfaceNumber
    pub number: u8,
    /// bAlternateSetting
    pub alternate_setting: u8,
    pub class_code: u8,
    pub sub_class_code: u8,
    pub protocol_code: u8,
}

impl InterfaceDescriptor {
    pub fn is_vendor_specific(&self) -> bool {
        self.class_code == VENDOR_SPECIFIC_CLASS
    }
}

/// Snapshot of an attached device as reported by enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    /// Interfaces in descriptor order
    pub interfaces: Vec<InterfaceDescriptor>,
}

impl DeviceDescriptor {
    /// Short human-readable label, e.g. `2fe3:0100 Acme Widget`
    pub fn label(&self) -> String {
        let name = match (&self.manufacturer, &self.product) {
            (Some(m), Some(p)) => format!(" {} {}", m, p),
            (None, Some(p)) => format!(" {}", p),
            (Some(m), None) => format!(" {}", m),
            (None, None) => String::new(),
        };
        format!("{:04x}:{:04x}{}", self.vendor_id, self.product_id, name)
    }
}
