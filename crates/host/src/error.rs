//! libusb error mapping

use common::HostError;

/// Map a libusb error onto the host error vocabulary
pub fn map_rusb_error(e: rusb::Error) -> HostError {
    match e {
        rusb::Error::NoDevice | rusb::Error::NotFound => HostError::NoDevice,
        rusb::Error::Access => HostError::Access,
        rusb::Error::Busy => HostError::Busy,
        rusb::Error::NotSupported => HostError::NotSupported,
        other => HostError::Other(other.to_string()),
    }
}
