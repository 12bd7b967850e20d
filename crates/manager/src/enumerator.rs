//! Device enumeration
//!
//! Stateless pass-through to the host layer: every call reflects what is
//! attached right now.

use crate::host::UsbHost;
use common::{DeviceDescriptor, DeviceId, HostError};
use tracing::debug;

/// List currently attached devices
///
/// An empty list is a valid answer, not an error.
pub fn list<H: UsbHost>(host: &H) -> Result<Vec<DeviceDescriptor>, HostError> {
    let devices = host.enumerate()?;
    debug!("Enumerated {} devices", devices.len());
    Ok(devices)
}

/// Look up one attached device by identifier
pub fn find<H: UsbHost>(host: &H, id: &DeviceId) -> Result<Option<DeviceDescriptor>, HostError> {
    Ok(list(host)?.into_iter().find(|d| &d.id == id))
}
