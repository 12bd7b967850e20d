//! libusb host layer for the connection manager
//!
//! Implements `manager::UsbHost` on top of `rusb`: enumeration with VID:PID
//! filters, permission prompts with per-process grants, kernel driver
//! preemption on forced claims, and detach notifications from libusb
//! hot-plug (or polling where hot-plug is unavailable).

pub mod connection;
pub mod device;
pub mod error;
pub mod filter;
pub mod host;
pub mod hotplug;
pub mod prompt;

pub use connection::RusbConnection;
pub use error::map_rusb_error;
pub use filter::{UsbFilter, parse_filters};
pub use host::{HostOptions, RusbHost};
pub use hotplug::DetachSubscription;
pub use prompt::{AccessProbe, AllowAll, PermissionPrompt};
