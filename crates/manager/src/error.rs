//! Connection attempt errors

use common::{DeviceId, HostError};
use thiserror::Error;

/// Why a connection attempt (or a disconnect) did not go through
///
/// Every variant ends the current attempt only. Failures are also published
/// as the `Error` status; `Busy`, `NotConnected` and `Released` leave the
/// state untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("permission denied for device {device}")]
    PermissionDenied { device: DeviceId },

    #[error("no suitable interface found on {device}")]
    NoSuitableInterface { device: DeviceId },

    #[error("could not open {device}: {reason}")]
    OpenFailed { device: DeviceId, reason: HostError },

    #[error("could not claim interface {interface} on {device}: {reason}")]
    ClaimFailed {
        device: DeviceId,
        interface: u8,
        reason: HostError,
    },

    /// Another device is pending, connecting or connected
    #[error("busy with {current}")]
    Busy { current: DeviceId },

    #[error("not connected")]
    NotConnected,

    #[error("connection manager has been released")]
    Released,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConnectError::PermissionDenied {
            device: DeviceId::new("/dev/bus/usb/001/004"),
        };
        assert_eq!(
            err.to_string(),
            "permission denied for device /dev/bus/usb/001/004"
        );

        let err = ConnectError::ClaimFailed {
            device: DeviceId::new("d"),
            interface: 2,
            reason: HostError::Busy,
        };
        assert_eq!(
            err.to_string(),
            "could not claim interface 2 on d: resource busy"
        );
    }
}
