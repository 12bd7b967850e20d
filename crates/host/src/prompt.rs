//! Permission prompts
//!
//! Decide whether the user lets us use a device. Called on a short-lived
//! thread per request, so implementations may block.

use crate::device::find_device;
use crate::error::map_rusb_error;
use common::DeviceDescriptor;
use rusb::Context;
use tracing::debug;

pub trait PermissionPrompt: Send + Sync + 'static {
    fn decide(&self, device: &DeviceDescriptor) -> bool;
}

/// Grants everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionPrompt for AllowAll {
    fn decide(&self, _device: &DeviceDescriptor) -> bool {
        true
    }
}

/// Grants a device iff the OS lets this process open it
#[derive(Clone)]
pub struct AccessProbe {
    context: Context,
}

impl AccessProbe {
    pub fn new(context: Context) -> Self {
        Self { context }
    }
}

impl PermissionPrompt for AccessProbe {
    fn decide(&self, device: &DeviceDescriptor) -> bool {
        let opened = find_device(&self.context, &device.id)
            .and_then(|d| d.open().map_err(map_rusb_error));
        match opened {
            Ok(_) => true,
            Err(e) => {
                debug!("Access probe for {} failed: {}", device.id, e);
                false
            }
        }
    }
}

impl<F> PermissionPrompt for F
where
    F: Fn(&DeviceDescriptor) -> bool + Send + Sync + 'static,
{
    fn decide(&self, device: &DeviceDescriptor) -> bool {
        self(device)
    }
}
