//! In-memory host USB layer for tests
//!
//! `MockHost` keeps a device list, a permission table and a per-device
//! ledger of every open/claim/release/close so tests can assert that no
//! handle leaks and nothing is released or closed twice. It is cheaply
//! cloneable; clones share state, so a test can keep one copy while the
//! manager owns another.
//!
//! Prompts and detach notifications are only delivered when the test says
//! so (`answer`, `unplug`), which keeps every scenario deterministic.

use crate::host::{DeviceConnection, UsbHost};
use common::{DeviceDescriptor, DeviceId, EventSink, HostError, HostEvent, InterfaceDescriptor};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Counters for one device (or summed over all devices)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ledger {
    /// Successful opens
    pub opens: usize,
    /// Successful claims
    pub claims: usize,
    /// Successful claims that asked for forced takeover
    pub forced_claims: usize,
    /// Successful releases
    pub releases: usize,
    /// Releases of an interface that was not claimed
    pub double_releases: usize,
    pub closes: usize,
    /// Handles dropped without `close`
    pub leaks: usize,
}

impl Ledger {
    /// Handles opened and not yet closed
    pub fn open_handles(&self) -> usize {
        self.opens - self.closes - self.leaks
    }

    fn add(mut self, other: &Ledger) -> Ledger {
        self.opens += other.opens;
        self.claims += other.claims;
        self.forced_claims += other.forced_claims;
        self.releases += other.releases;
        self.double_releases += other.double_releases;
        self.closes += other.closes;
        self.leaks += other.leaks;
        self
    }
}

#[derive(Default)]
struct MockState {
    devices: Vec<DeviceDescriptor>,
    granted: HashSet<DeviceId>,
    permission_requests: Vec<DeviceId>,
    prompts: Vec<(DeviceId, EventSink)>,
    open_failures: HashMap<DeviceId, HostError>,
    claim_failures: HashMap<DeviceId, HostError>,
    ledgers: HashMap<DeviceId, Ledger>,
    detach_sinks: HashMap<u64, EventSink>,
    next_subscription: u64,
}

impl MockState {
    fn is_attached(&self, id: &DeviceId) -> bool {
        self.devices.iter().any(|d| &d.id == id)
    }

    fn ledger_mut(&mut self, id: &DeviceId) -> &mut Ledger {
        self.ledgers.entry(id.clone()).or_default()
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct MockHost {
    state: Arc<Mutex<MockState>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: Vec<DeviceDescriptor>) -> Self {
        let host = Self::new();
        lock(&host.state).devices = devices;
        host
    }

    /// Attach a device
    pub fn plug(&self, device: DeviceDescriptor) {
        lock(&self.state).devices.push(device);
    }

    /// Remove a device and notify detach subscribers
    ///
    /// Returns false if the device was not attached.
    pub fn unplug(&self, id: &DeviceId) -> bool {
        let sinks: Vec<EventSink> = {
            let mut state = lock(&self.state);
            let before = state.devices.len();
            state.devices.retain(|d| &d.id != id);
            if state.devices.len() == before {
                return false;
            }
            state.granted.remove(id);
            state.detach_sinks.values().cloned().collect()
        };

        for sink in sinks {
            sink.send(HostEvent::Detached { device: id.clone() });
        }
        true
    }

    /// Mark a device as already permitted
    pub fn grant(&self, id: &DeviceId) {
        lock(&self.state).granted.insert(id.clone());
    }

    /// Make `open` fail for a device
    pub fn fail_open(&self, id: &DeviceId, error: HostError) {
        lock(&self.state).open_failures.insert(id.clone(), error);
    }

    /// Make `claim_interface` fail for a device
    pub fn fail_claim(&self, id: &DeviceId, error: HostError) {
        lock(&self.state).claim_failures.insert(id.clone(), error);
    }

    pub fn clear_failures(&self) {
        let mut state = lock(&self.state);
        state.open_failures.clear();
        state.claim_failures.clear();
    }

    /// Every permission prompt issued so far, in order
    pub fn permission_requests(&self) -> Vec<DeviceId> {
        lock(&self.state).permission_requests.clone()
    }

    /// Answer the oldest open prompt for `id`
    ///
    /// A grant is remembered like the real platform does. Returns false if
    /// no prompt for `id` is open.
    pub fn answer(&self, id: &DeviceId, granted: bool) -> bool {
        let sink = {
            let mut state = lock(&self.state);
            let Some(pos) = state.prompts.iter().position(|(d, _)| d == id) else {
                return false;
            };
            if granted {
                state.granted.insert(id.clone());
            }
            state.prompts.remove(pos).1
        };

        sink.send(HostEvent::PermissionDecision {
            device: id.clone(),
            granted,
        });
        true
    }

    /// Counters summed over all devices
    pub fn ledger(&self) -> Ledger {
        lock(&self.state)
            .ledgers
            .values()
            .fold(Ledger::default(), |acc, l| acc.add(l))
    }

    /// Counters for one device
    pub fn device_ledger(&self, id: &DeviceId) -> Ledger {
        lock(&self.state)
            .ledgers
            .get(id)
            .copied()
            .unwrap_or_default()
    }

    /// Detach subscriptions currently alive
    pub fn active_subscriptions(&self) -> usize {
        lock(&self.state).detach_sinks.len()
    }
}

impl UsbHost for MockHost {
    type Connection = MockConnection;
    type DetachSubscription = MockSubscription;

    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, HostError> {
        Ok(lock(&self.state).devices.clone())
    }

    fn has_permission(&self, device: &DeviceDescriptor) -> bool {
        lock(&self.state).granted.contains(&device.id)
    }

    fn request_permission(&self, device: &DeviceDescriptor, events: EventSink) {
        let mut state = lock(&self.state);
        state.permission_requests.push(device.id.clone());
        state.prompts.push((device.id.clone(), events));
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<MockConnection, HostError> {
        let mut state = lock(&self.state);
        if !state.is_attached(&device.id) {
            return Err(HostError::NoDevice);
        }
        if let Some(error) = state.open_failures.get(&device.id) {
            return Err(error.clone());
        }

        state.ledger_mut(&device.id).opens += 1;
        Ok(MockConnection {
            device: device.id.clone(),
            state: Arc::clone(&self.state),
            claimed: None,
            closed: false,
        })
    }

    fn subscribe_detach(&self, events: EventSink) -> Result<MockSubscription, HostError> {
        let mut state = lock(&self.state);
        let id = state.next_subscription;
        state.next_subscription += 1;
        state.detach_sinks.insert(id, events);

        Ok(MockSubscription {
            id,
            state: Arc::clone(&self.state),
        })
    }
}

/// Handle returned by `MockHost::open`
pub struct MockConnection {
    device: DeviceId,
    state: Arc<Mutex<MockState>>,
    claimed: Option<u8>,
    closed: bool,
}

impl DeviceConnection for MockConnection {
    fn claim_interface(
        &mut self,
        interface: &InterfaceDescriptor,
        force: bool,
    ) -> Result<(), HostError> {
        let mut state = lock(&self.state);
        if !state.is_attached(&self.device) {
            return Err(HostError::NoDevice);
        }
        if let Some(error) = state.claim_failures.get(&self.device) {
            return Err(error.clone());
        }

        self.claimed = Some(interface.number);
        let ledger = state.ledger_mut(&self.device);
        ledger.claims += 1;
        if force {
            ledger.forced_claims += 1;
        }
        Ok(())
    }

    fn release_interface(&mut self, interface: &InterfaceDescriptor) -> Result<(), HostError> {
        let mut state = lock(&self.state);
        if !state.is_attached(&self.device) {
            self.claimed = None;
            return Err(HostError::NoDevice);
        }
        if self.claimed != Some(interface.number) {
            state.ledger_mut(&self.device).double_releases += 1;
            return Err(HostError::Other("interface not claimed".to_string()));
        }

        self.claimed = None;
        state.ledger_mut(&self.device).releases += 1;
        Ok(())
    }

    fn close(mut self) {
        self.closed = true;
        lock(&self.state).ledger_mut(&self.device).closes += 1;
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        if !self.closed {
            lock(&self.state).ledger_mut(&self.device).leaks += 1;
        }
    }
}

/// Detach subscription returned by `MockHost::subscribe_detach`
pub struct MockSubscription {
    id: u64,
    state: Arc<Mutex<MockState>>,
}

impl Drop for MockSubscription {
    fn drop(&mut self) {
        lock(&self.state).detach_sinks.remove(&self.id);
    }
}
