//! Common types for usb-link
//!
//! This crate provides what the manager, the host layer and the CLI share:
//! device and interface descriptors, the host event channel, error types
//! and logging setup.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;
pub mod types;

pub use channel::{EventSink, EventStream, HostEvent, create_event_channel};
pub use error::{Error, HostError, Result};
pub use logging::setup_logging;
pub use types::{DeviceDescriptor, DeviceId, InterfaceDescriptor, VENDOR_SPECIFIC_CLASS};
