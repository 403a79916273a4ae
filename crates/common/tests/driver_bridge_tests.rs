//! Driver Bridge Integration Tests
//!
//! Tests for the async channel bridge between Tokio runtime and USB thread.
//!
//! # Test Scenarios
//! - Command/response round trip through a simulated worker thread
//! - Event ordering from the worker to the runtime
//! - Shutdown detection when the runtime side goes away
//!
//! Run with: `cargo test -p common --test driver_bridge_tests`

use common::{
    AttachedPeripheral, DeviceIdentity, DriverCommand, DriverEvent, DriverWorker,
    PeripheralHandle, RejectReason, Slot, create_driver_bridge,
};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Poll the way the USB worker loop does
fn wait_for_command(worker: &DriverWorker) -> DriverCommand {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(cmd) = worker.try_recv_command() {
            return cmd;
        }
        assert!(Instant::now() < deadline, "no command received");
        thread::sleep(Duration::from_millis(1));
    }
}

fn servo_v2(address: u8, slot: u32) -> AttachedPeripheral {
    AttachedPeripheral {
        handle: PeripheralHandle::new(1, address, 0),
        identity: DeviceIdentity::new(0x18d1, 0x5002),
        slot: Slot(slot),
        minor: 160 + slot,
        name: format!("google-servo{}", slot),
        node: PathBuf::from(format!("usb/google-servo{}", slot)),
    }
}

#[tokio::test]
async fn test_list_attached_round_trip() {
    let (bridge, worker) = create_driver_bridge();

    let worker_thread = thread::spawn(move || {
        match wait_for_command(&worker) {
            DriverCommand::ListAttached { response } => {
                response.send(vec![servo_v2(4, 0), servo_v2(7, 1)]).unwrap();
            }
            other => panic!("unexpected command: {:?}", other),
        }
    });

    let (tx, rx) = oneshot::channel();
    bridge
        .send_command(DriverCommand::ListAttached { response: tx })
        .await
        .unwrap();

    let attached = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("worker did not answer")
        .unwrap();
    assert_eq!(attached.len(), 2);
    assert_eq!(attached[1].node, PathBuf::from("usb/google-servo1"));

    worker_thread.join().unwrap();
}

#[tokio::test]
async fn test_events_arrive_in_order() {
    let (bridge, worker) = create_driver_bridge();
    let claimed = servo_v2(4, 0);
    let secondary = PeripheralHandle::new(1, 4, 1);

    let expected_handle = claimed.handle;
    thread::spawn(move || {
        worker
            .send_event(DriverEvent::Claimed { peripheral: claimed })
            .unwrap();
        worker
            .send_event(DriverEvent::Ignored {
                identity: DeviceIdentity::new(0x18d1, 0x5002),
                handle: secondary,
                reason: RejectReason::UnknownInterface,
            })
            .unwrap();
        worker
            .send_event(DriverEvent::Released {
                handle: expected_handle,
            })
            .unwrap();
    })
    .join()
    .unwrap();

    assert!(matches!(
        bridge.recv_event().await.unwrap(),
        DriverEvent::Claimed { .. }
    ));
    assert!(matches!(
        bridge.recv_event().await.unwrap(),
        DriverEvent::Ignored {
            reason: RejectReason::UnknownInterface,
            ..
        }
    ));
    match bridge.recv_event().await.unwrap() {
        DriverEvent::Released { handle } => assert_eq!(handle, expected_handle),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test]
fn test_worker_sees_closed_bridge() {
    let (bridge, worker) = create_driver_bridge();
    assert!(!worker.is_closed());

    drop(bridge);
    assert!(worker.is_closed());
    assert!(worker.try_recv_command().is_none());
}

#[tokio::test]
async fn test_recv_after_worker_dropped() {
    let (bridge, worker) = create_driver_bridge();
    drop(worker);

    assert!(bridge.recv_event().await.is_err());
}
