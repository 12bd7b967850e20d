//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by the host USB layer
///
/// Cloneable so that it can travel inside connection status values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// The device is gone (unplugged, or never existed)
    #[error("no such device")]
    NoDevice,

    /// The OS refused access to the device node
    #[error("access denied")]
    Access,

    /// Another process or driver holds the device or interface
    #[error("resource busy")]
    Busy,

    #[error("operation not supported")]
    NotSupported,

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_error_display() {
        assert_eq!(HostError::NoDevice.to_string(), "no such device");
        assert_eq!(HostError::Other("pipe".into()).to_string(), "pipe");
    }

    #[test]
    fn test_host_error_converts() {
        let err: Error = HostError::Busy.into();
        assert_eq!(err.to_string(), "Host error: resource busy");
    }
}
