//! libusb-backed host USB layer

use crate::connection::RusbConnection;
use crate::device::{describe, find_device, is_root_hub};
use crate::error::map_rusb_error;
use crate::filter::{UsbFilter, is_allowed, matches_any};
use crate::hotplug::{DetachSubscription, Grants};
use crate::prompt::{AccessProbe, PermissionPrompt};
use common::{DeviceDescriptor, EventSink, HostError, HostEvent};
use manager::UsbHost;
use rusb::{Context, UsbContext};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct HostOptions {
    /// Devices we enumerate; empty = all
    pub filters: Vec<UsbFilter>,
    /// Devices that hold permission without a prompt
    pub auto_grant: Vec<UsbFilter>,
    /// Poll interval when libusb has no hot-plug support
    pub hotplug_poll: Duration,
    /// Take interfaces away from kernel drivers on forced claims
    pub detach_kernel_driver: bool,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            auto_grant: Vec::new(),
            hotplug_poll: Duration::from_millis(1000),
            detach_kernel_driver: true,
        }
    }
}

pub struct RusbHost {
    context: Context,
    options: HostOptions,
    prompt: Arc<dyn PermissionPrompt>,
    /// Granted in this process, forgotten on detach
    grants: Grants,
}

impl RusbHost {
    pub fn new(options: HostOptions, prompt: impl PermissionPrompt) -> Result<Self, HostError> {
        let context = Context::new().map_err(map_rusb_error)?;
        Ok(Self::with_context(context, options, prompt))
    }

    /// Host whose prompt grants whatever the OS lets us open
    pub fn with_access_probe(options: HostOptions) -> Result<Self, HostError> {
        let context = Context::new().map_err(map_rusb_error)?;
        let probe = AccessProbe::new(context.clone());
        Ok(Self::with_context(context, options, probe))
    }

    pub fn with_context(
        context: Context,
        options: HostOptions,
        prompt: impl PermissionPrompt,
    ) -> Self {
        info!(
            "USB host ready ({} filters, hot-plug {})",
            options.filters.len(),
            if rusb::has_hotplug() {
                "supported"
            } else {
                "polled"
            }
        );
        Self {
            context,
            options,
            prompt: Arc::new(prompt),
            grants: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

impl UsbHost for RusbHost {
    type Connection = RusbConnection;
    type DetachSubscription = DetachSubscription;

    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, HostError> {
        let devices = self.context.devices().map_err(map_rusb_error)?;
        let mut found = Vec::new();

        for device in devices.iter() {
            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(e) => {
                    warn!(
                        "Failed to read descriptor of bus={}, addr={}: {}",
                        device.bus_number(),
                        device.address(),
                        e
                    );
                    continue;
                }
            };

            if is_root_hub(desc.vendor_id(), desc.class_code()) {
                continue;
            }
            if !is_allowed(&self.options.filters, desc.vendor_id(), desc.product_id()) {
                debug!(
                    "Device ignored by filter: vid={:#x}, pid={:#x}",
                    desc.vendor_id(),
                    desc.product_id()
                );
                continue;
            }

            found.push(describe(&device, &desc));
        }

        Ok(found)
    }

    fn has_permission(&self, device: &DeviceDescriptor) -> bool {
        matches_any(&self.options.auto_grant, device.vendor_id, device.product_id)
            || self
                .grants
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&device.id)
    }

    fn request_permission(&self, device: &DeviceDescriptor, events: EventSink) {
        let prompt = Arc::clone(&self.prompt);
        let grants = Arc::clone(&self.grants);
        let device = device.clone();
        let id = device.id.clone();
        let fallback = events.clone();

        let spawned = std::thread::Builder::new()
            .name("usb-link-prompt".to_string())
            .spawn(move || {
                let granted = prompt.decide(&device);
                if granted {
                    grants
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(device.id.clone());
                }
                info!(
                    "Permission for {} {}",
                    device.id,
                    if granted { "granted" } else { "denied" }
                );
                events.send(HostEvent::PermissionDecision {
                    device: device.id,
                    granted,
                });
            });

        if let Err(e) = spawned {
            warn!("Failed to spawn permission prompt for {}: {}", id, e);
            fallback.send(HostEvent::PermissionDecision {
                device: id,
                granted: false,
            });
        }
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<RusbConnection, HostError> {
        let handle = find_device(&self.context, &device.id)?
            .open()
            .map_err(map_rusb_error)?;
        debug!("Opened {}", device.id);

        Ok(RusbConnection::new(
            device.id.clone(),
            handle,
            self.options.detach_kernel_driver,
        ))
    }

    fn subscribe_detach(&self, events: EventSink) -> Result<DetachSubscription, HostError> {
        DetachSubscription::start(
            self.context.clone(),
            events,
            Arc::clone(&self.grants),
            self.options.hotplug_poll,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = HostOptions::default();
        assert!(options.filters.is_empty());
        assert!(options.auto_grant.is_empty());
        assert!(options.detach_kernel_driver);
        assert_eq!(options.hotplug_poll, Duration::from_secs(1));
    }
}
