//! Host USB layer interface
//!
//! The connection manager never talks to a USB stack directly. Everything it
//! needs from the platform (enumeration, permission prompts, opening devices,
//! claiming interfaces, unplug notifications) goes through these two traits.

use common::{DeviceDescriptor, EventSink, HostError, InterfaceDescriptor};

/// The platform USB subsystem
pub trait UsbHost: Send + Sync + 'static {
    /// Open channel to a device
    type Connection: DeviceConnection;
    /// Keeps detach notifications flowing while alive
    type DetachSubscription: Send + 'static;

    /// Devices attached right now, in host order
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, HostError>;

    /// Whether access to `device` has already been granted
    fn has_permission(&self, device: &DeviceDescriptor) -> bool;

    /// Ask the user/OS for access to `device`
    ///
    /// Must return immediately. The answer is posted later as
    /// `HostEvent::PermissionDecision` through `events`.
    fn request_permission(&self, device: &DeviceDescriptor, events: EventSink);

    /// Open a handle to `device`
    fn open(&self, device: &DeviceDescriptor) -> Result<Self::Connection, HostError>;

    /// Start posting `HostEvent::Detached` through `events`
    ///
    /// Delivery stops when the returned subscription is dropped.
    fn subscribe_detach(&self, events: EventSink) -> Result<Self::DetachSubscription, HostError>;
}

/// An opened device handle
pub trait DeviceConnection: Send + 'static {
    /// Claim exclusive use of `interface`
    ///
    /// With `force`, any other claimant (typically a kernel driver) is
    /// preempted first.
    fn claim_interface(
        &mut self,
        interface: &InterfaceDescriptor,
        force: bool,
    ) -> Result<(), HostError>;

    /// Give a previously claimed interface back
    fn release_interface(&mut self, interface: &InterfaceDescriptor) -> Result<(), HostError>;

    /// Close the handle
    fn close(self);
}
