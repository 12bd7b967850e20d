//! Detach notifications
//!
//! With libusb hot-plug support a callback posts `HostEvent::Detached` and a
//! pump thread drives `handle_events`. Without it the pump polls the device
//! list and reports identifiers that vanished between two polls.

use crate::device::device_id;
use crate::error::map_rusb_error;
use common::{DeviceId, EventSink, HostError, HostEvent};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

const EVENT_TIMEOUT: Duration = Duration::from_millis(100);

pub(crate) type Grants = Arc<Mutex<HashSet<DeviceId>>>;

/// Live detach subscription; dropping it stops notifications
pub struct DetachSubscription {
    stop: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
    registration: Option<Registration<Context>>,
}

impl DetachSubscription {
    pub(crate) fn start(
        context: Context,
        events: EventSink,
        grants: Grants,
        poll_interval: Duration,
    ) -> Result<Self, HostError> {
        let notifier = DetachNotifier { events, grants };
        let stop = Arc::new(AtomicBool::new(false));

        let (registration, pump) = if rusb::has_hotplug() {
            let registration: Registration<Context> = HotplugBuilder::new()
                .enumerate(false)
                .register(&context, Box::new(HotplugCallback { notifier }))
                .map_err(map_rusb_error)?;

            let stop = Arc::clone(&stop);
            let pump = spawn("usb-link-hotplug", move || run_event_pump(context, stop))?;
            debug!("Hot-plug callbacks registered");
            (Some(registration), pump)
        } else {
            info!(
                "libusb hot-plug unsupported, polling every {:?}",
                poll_interval
            );
            let stop = Arc::clone(&stop);
            let pump = spawn("usb-link-poll", move || {
                run_poller(context, notifier, stop, poll_interval)
            })?;
            (None, pump)
        };

        Ok(Self {
            stop,
            pump: Some(pump),
            registration,
        })
    }
}

impl Drop for DetachSubscription {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.registration = None;
        if let Some(pump) = self.pump.take()
            && pump.join().is_err()
        {
            warn!("Detach pump thread panicked");
        }
        debug!("Detach subscription dropped");
    }
}

fn spawn(
    name: &str,
    f: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>, HostError> {
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|e| HostError::Other(format!("Failed to spawn {}: {}", name, e)))
}

/// Forgets the grant and posts the event
struct DetachNotifier {
    events: EventSink,
    grants: Grants,
}

impl DetachNotifier {
    fn detached(&self, device: DeviceId) {
        self.grants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&device);
        debug!("Device {} left", device);
        self.events.send(HostEvent::Detached { device });
    }
}

struct HotplugCallback {
    notifier: DetachNotifier,
}

impl<T: UsbContext> Hotplug<T> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<T>) {
        debug!(
            "Hot-plug callback: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
    }

    fn device_left(&mut self, device: Device<T>) {
        self.notifier.detached(device_id(&device));
    }
}

fn run_event_pump(context: Context, stop: Arc<AtomicBool>) {
    debug!("Hot-plug pump started");

    while !stop.load(Ordering::SeqCst) {
        match context.handle_events(Some(EVENT_TIMEOUT)) {
            Ok(()) => {}
            Err(rusb::Error::Interrupted) => debug!("USB event handling interrupted"),
            Err(e) => {
                warn!("Error handling USB events: {}", e);
                std::thread::sleep(EVENT_TIMEOUT);
            }
        }
    }

    debug!("Hot-plug pump stopped");
}

fn run_poller(
    context: Context,
    notifier: DetachNotifier,
    stop: Arc<AtomicBool>,
    interval: Duration,
) {
    let mut known = attached_ids(&context).unwrap_or_default();

    while !stop.load(Ordering::SeqCst) {
        sleep_unless_stopped(&stop, interval);
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let current = match attached_ids(&context) {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Device poll failed: {}", e);
                continue;
            }
        };

        for gone in vanished(&known, &current) {
            notifier.detached(gone);
        }
        known = current;
    }

    debug!("Device poller stopped");
}

/// Sleep in short slices so a stop request is seen promptly
fn sleep_unless_stopped(stop: &AtomicBool, total: Duration) {
    let mut left = total;
    while !left.is_zero() && !stop.load(Ordering::SeqCst) {
        let slice = left.min(EVENT_TIMEOUT);
        std::thread::sleep(slice);
        left -= slice;
    }
}

fn attached_ids(context: &Context) -> Result<HashSet<DeviceId>, HostError> {
    Ok(context
        .devices()
        .map_err(map_rusb_error)?
        .iter()
        .map(|d| device_id(&d))
        .collect())
}

/// Identifiers in `before` but not in `after`, sorted
fn vanished(before: &HashSet<DeviceId>, after: &HashSet<DeviceId>) -> Vec<DeviceId> {
    let mut gone: Vec<_> = before.difference(after).cloned().collect();
    gone.sort();
    gone
}
