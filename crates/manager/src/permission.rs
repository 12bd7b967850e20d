//! Permission coordination
//!
//! Tracks the one device currently waiting on a permission prompt and
//! correlates asynchronous decisions with it. Lives inside the lifecycle's
//! critical section, so it needs no locking of its own.

use crate::host::UsbHost;
use common::{DeviceDescriptor, DeviceId, EventSink};
use tracing::{debug, info};

/// Result of asking for permission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionRequest {
    /// Access is already held, go ahead
    Granted,
    /// A prompt was issued; the decision will arrive as an event
    Pending,
}

/// A decision that matched the outstanding request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Granted,
    Denied,
}

#[derive(Debug, Default)]
pub struct PermissionCoordinator {
    outstanding: Option<DeviceId>,
}

impl PermissionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for access to `device`
    ///
    /// Replaces any outstanding target; a decision for the old target will
    /// then be treated as stale.
    pub fn request<H: UsbHost>(
        &mut self,
        host: &H,
        device: &DeviceDescriptor,
        events: &EventSink,
    ) -> PermissionRequest {
        if host.has_permission(device) {
            debug!("Permission already held for {}", device.id);
            return PermissionRequest::Granted;
        }

        if let Some(previous) = self.outstanding.replace(device.id.clone()) {
            debug!("Abandoning permission request for {}", previous);
        }

        info!("Requesting permission for {}", device.id);
        host.request_permission(device, events.clone());
        PermissionRequest::Pending
    }

    /// Correlate a decision with the outstanding request
    ///
    /// Returns `None` for a stale decision (no request, or a different
    /// device), leaving the outstanding target untouched.
    pub fn on_decision(&mut self, device: &DeviceId, granted: bool) -> Option<Decision> {
        if self.outstanding.as_ref() != Some(device) {
            debug!(
                "Ignoring stale permission decision for {} (outstanding: {:?})",
                device, self.outstanding
            );
            return None;
        }

        self.outstanding = None;
        if granted {
            Some(Decision::Granted)
        } else {
            Some(Decision::Denied)
        }
    }

    /// Forget the outstanding request, if any
    pub fn abandon(&mut self) -> Option<DeviceId> {
        self.outstanding.take()
    }

    pub fn outstanding(&self) -> Option<&DeviceId> {
        self.outstanding.as_ref()
    }
}
