//! Event driver integration tests
//!
//! Host events here travel the real path: the mock host posts them through
//! the sink it was handed, the driver thread drains the channel and applies
//! them to the lifecycle. Observers wait on the status watch channels.
//!
//! Run with: `cargo test -p manager --test driver_tests`

use common::test_utils::{DEFAULT_TEST_TIMEOUT, create_hid_device, create_vendor_device};
use manager::mock::MockHost;
use manager::{
    ConnectError, ConnectOutcome, ConnectionManager, ConnectionStatus, DisconnectReason,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::timeout;

async fn wait_for_status(
    rx: &mut watch::Receiver<ConnectionStatus>,
    predicate: impl FnMut(&ConnectionStatus) -> bool,
) -> ConnectionStatus {
    timeout(DEFAULT_TEST_TIMEOUT, rx.wait_for(predicate))
        .await
        .expect("Timed out waiting for status")
        .expect("Status channel closed")
        .clone()
}

#[tokio::test]
async fn test_grant_through_driver() {
    let d1 = create_vendor_device(1);
    let host = MockHost::with_devices(vec![d1.clone()]);
    let manager = ConnectionManager::new(host.clone()).unwrap();
    let mut status = manager.subscribe();
    let mut connected = manager.subscribe_connected();

    assert_eq!(manager.connect(&d1), Ok(ConnectOutcome::PermissionPending));
    assert!(host.answer(&d1.id, true));

    let reached = wait_for_status(&mut status, |s| s.is_connected()).await;
    assert_eq!(
        reached,
        ConnectionStatus::Connected {
            device: d1.id.clone(),
            interface: 1
        }
    );
    timeout(DEFAULT_TEST_TIMEOUT, connected.wait_for(|c| *c))
        .await
        .expect("Timed out waiting for connected flag")
        .unwrap();

    manager.release();
    assert_eq!(host.ledger().open_handles(), 0);
}

#[tokio::test]
async fn test_denial_through_driver() {
    let d1 = create_vendor_device(1);
    let host = MockHost::with_devices(vec![d1.clone()]);
    let manager = ConnectionManager::new(host.clone()).unwrap();
    let mut status = manager.subscribe();

    manager.connect(&d1).unwrap();
    host.answer(&d1.id, false);

    let reached =
        wait_for_status(&mut status, |s| matches!(s, ConnectionStatus::Error { .. })).await;
    assert_eq!(
        reached,
        ConnectionStatus::Error {
            error: ConnectError::PermissionDenied {
                device: d1.id.clone()
            }
        }
    );
}

#[tokio::test]
async fn test_unplug_through_driver() {
    let d1 = create_vendor_device(1);
    let d2 = create_hid_device(2);
    let host = MockHost::with_devices(vec![d1.clone(), d2.clone()]);
    host.grant(&d1.id);
    let manager = ConnectionManager::new(host.clone()).unwrap();
    let mut status = manager.subscribe();
    let mut transitions = manager.subscribe_transitions();

    manager.connect(&d1).unwrap();

    // Unrelated device first; only the second unplug may disconnect us
    host.unplug(&d2.id);
    host.unplug(&d1.id);

    let reached = wait_for_status(&mut status, |s| !s.is_connected()).await;
    assert_eq!(
        reached,
        ConnectionStatus::Disconnected {
            reason: DisconnectReason::Detached
        }
    );

    let mut seen = Vec::new();
    while let Ok(status) = transitions.try_recv() {
        seen.push(status);
    }
    assert_eq!(
        seen.last(),
        Some(&ConnectionStatus::Disconnected {
            reason: DisconnectReason::Detached
        })
    );
    // Connecting, Connected, Disconnected: the unrelated unplug changed nothing
    assert_eq!(seen.len(), 3);

    let ledger = host.device_ledger(&d1.id);
    assert_eq!(ledger.opens, 1);
    assert_eq!(ledger.closes, 1);
    assert_eq!(ledger.leaks, 0);
}

#[tokio::test]
async fn test_release_stops_listening() {
    let d1 = create_vendor_device(1);
    let host = MockHost::with_devices(vec![d1.clone()]);
    let manager = ConnectionManager::new(host.clone()).unwrap();

    manager.connect(&d1).unwrap();
    manager.release();
    assert_eq!(host.active_subscriptions(), 0);

    // The prompt is still up on the host; answering it must not reconnect
    assert!(host.answer(&d1.id, true));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(
        manager.status(),
        ConnectionStatus::Disconnected {
            reason: DisconnectReason::Released
        }
    );
    assert_eq!(host.ledger().opens, 0);
}

#[test]
fn test_concurrent_callers_and_events() {
    let devices: Vec<_> = (1..=4).map(create_vendor_device).collect();
    let host = MockHost::with_devices(devices.clone());
    for d in &devices {
        host.grant(&d.id);
    }
    let manager = Arc::new(ConnectionManager::new(host.clone()).unwrap());

    let workers: Vec<_> = devices
        .iter()
        .cloned()
        .map(|device| {
            let manager = Arc::clone(&manager);
            let host = host.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let _ = manager.connect(&device);
                    manager.disconnect();
                    host.unplug(&device.id);
                    host.plug(device.clone());
                    host.grant(&device.id);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    manager.release();

    let ledger = host.ledger();
    assert_eq!(ledger.open_handles(), 0);
    assert_eq!(ledger.leaks, 0);
    assert_eq!(ledger.double_releases, 0);
    assert!(ledger.claims <= ledger.opens);
}
