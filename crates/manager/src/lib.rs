//! USB peripheral connection manager
//!
//! Discovers attached devices, negotiates permission to use one, claims its
//! vendor-specific interface and tears the connection down again, whether
//! the user asks for it or the device is unplugged.
//!
//! The platform is abstracted behind [`UsbHost`]; asynchronous permission
//! decisions and detach notifications flow back as [`HostEvent`]s and are
//! applied in order with direct calls.
//!
//! # Example
//!
//! ```
//! use common::test_utils::create_vendor_device;
//! use manager::mock::MockHost;
//! use manager::{ConnectOutcome, ConnectionManager, HostEvent};
//!
//! let device = create_vendor_device(1);
//! let host = MockHost::with_devices(vec![device.clone()]);
//! let manager = ConnectionManager::new(host).unwrap();
//!
//! assert_eq!(manager.connect(&device), Ok(ConnectOutcome::PermissionPending));
//! manager.handle_event(HostEvent::PermissionDecision {
//!     device: device.id.clone(),
//!     granted: true,
//! });
//! assert!(manager.is_connected());
//!
//! manager.release();
//! ```

pub mod connection;
pub mod enumerator;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod manager;
pub mod mock;
pub mod permission;
pub mod selector;
pub mod status;

pub use common::{DeviceDescriptor, DeviceId, EventSink, HostError, HostEvent, InterfaceDescriptor};
pub use connection::OpenConnection;
pub use error::ConnectError;
pub use host::{DeviceConnection, UsbHost};
pub use lifecycle::ConnectOutcome;
pub use manager::ConnectionManager;
pub use status::{ConnectionStatus, DisconnectReason};
