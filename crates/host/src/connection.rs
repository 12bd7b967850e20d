//! Open libusb device handle
//!
//! Tracks interfaces whose kernel driver we detached so release and close
//! can hand them back to the kernel.

use crate::error::map_rusb_error;
use common::{DeviceId, HostError, InterfaceDescriptor};
use manager::DeviceConnection;
use rusb::{Context, DeviceHandle};
use tracing::{debug, warn};

pub struct RusbConnection {
    device: DeviceId,
    handle: DeviceHandle<Context>,
    detach_kernel_driver: bool,
    /// Interfaces whose kernel driver we detached
    detached: Vec<u8>,
}

impl RusbConnection {
    pub(crate) fn new(
        device: DeviceId,
        handle: DeviceHandle<Context>,
        detach_kernel_driver: bool,
    ) -> Self {
        Self {
            device,
            handle,
            detach_kernel_driver,
            detached: Vec::new(),
        }
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// Raw handle for transfers on the claimed interface
    pub fn handle_mut(&mut self) -> &mut DeviceHandle<Context> {
        &mut self.handle
    }

    /// Take the interface away from its kernel driver
    fn preempt_kernel_driver(&mut self, number: u8) {
        match self.handle.kernel_driver_active(number) {
            Ok(true) => match self.handle.detach_kernel_driver(number) {
                Ok(()) => {
                    debug!(
                        "Detached kernel driver from interface {} on {}",
                        number, self.device
                    );
                    self.detached.push(number);
                }
                // Claiming will most likely fail next and report the reason
                Err(e) => warn!(
                    "Failed to detach kernel driver from interface {}: {}",
                    number, e
                ),
            },
            Ok(false) => {}
            Err(e) => debug!(
                "Could not check kernel driver status for interface {}: {}",
                number, e
            ),
        }
    }

    fn reattach_kernel_driver(&mut self, number: u8) {
        let Some(pos) = self.detached.iter().position(|n| *n == number) else {
            return;
        };
        self.detached.remove(pos);

        if let Err(e) = self.handle.attach_kernel_driver(number) {
            debug!(
                "Could not reattach kernel driver to interface {}: {}",
                number, e
            );
        } else {
            debug!(
                "Reattached kernel driver to interface {} on {}",
                number, self.device
            );
        }
    }
}

impl DeviceConnection for RusbConnection {
    fn claim_interface(
        &mut self,
        interface: &InterfaceDescriptor,
        force: bool,
    ) -> Result<(), HostError> {
        let number = interface.number;
        if force && self.detach_kernel_driver {
            self.preempt_kernel_driver(number);
        }

        if let Err(e) = self.handle.claim_interface(number) {
            self.reattach_kernel_driver(number);
            return Err(map_rusb_error(e));
        }

        if interface.alternate_setting != 0
            && let Err(e) = self
                .handle
                .set_alternate_setting(number, interface.alternate_setting)
        {
            warn!(
                "Failed to select alternate setting {} on interface {}: {}",
                interface.alternate_setting, number, e
            );
            if let Err(e) = self.handle.release_interface(number) {
                warn!(
                    "Failed to release interface {} on {}: {}",
                    number, self.device, e
                );
            }
            self.reattach_kernel_driver(number);
            return Err(map_rusb_error(e));
        }

        debug!("Claimed interface {} on {}", number, self.device);
        Ok(())
    }

    fn release_interface(&mut self, interface: &InterfaceDescriptor) -> Result<(), HostError> {
        let result = self.handle.release_interface(interface.number);
        self.reattach_kernel_driver(interface.number);

        result.map_err(map_rusb_error)?;
        debug!("Released interface {} on {}", interface.number, self.device);
        Ok(())
    }

    fn close(mut self) {
        for number in self.detached.clone() {
            self.reattach_kernel_driver(number);
        }
        debug!("Closed {}", self.device);
        // libusb_close runs when the handle drops
    }
}
