//! Session teardown guarantees: no zombie sessions, waiters failed with
//! DISCONNECTED, and wire-level sequence monotonicity.

mod support;

use stand_protocol::PacketType;
use stand_server::DispatchError;
use stand_server::bus::DeviceEvent;
use stand_test_utils::MockDevice;
use std::time::Duration;
use support::{DEVICE_JSON, TestServer, fast_tunables};

#[tokio::test]
async fn peer_disconnect_unregisters_and_emits_offline() {
    let server = TestServer::start(fast_tunables()).await;
    let mut device_rx = server.bus.subscribe_device();
    let device = MockDevice::connect_and_handshake(server.addr, DEVICE_JSON)
        .await
        .unwrap();
    server.wait_registered("EngineStand").await;
    assert!(matches!(
        device_rx.recv().await.unwrap(),
        DeviceEvent::Online { .. }
    ));

    drop(device);

    let elapsed = server
        .wait_unregistered("EngineStand", Duration::from_secs(1))
        .await;
    assert!(
        elapsed < Duration::from_millis(500),
        "removal took {elapsed:?}"
    );
    assert!(matches!(
        device_rx.recv().await.unwrap(),
        DeviceEvent::Offline { .. }
    ));
}

#[tokio::test]
async fn eviction_removes_the_session_promptly() {
    let server = TestServer::start(fast_tunables()).await;
    let mut device = MockDevice::connect_and_handshake(server.addr, DEVICE_JSON)
        .await
        .unwrap();
    server.wait_registered("EngineStand").await;
    let addr = server
        .registry
        .get_by_name("EngineStand")
        .await
        .unwrap()
        .addr;

    server.registry.evict(addr).await.expect("device present");

    // No zombie: the slot frees and lookups miss within 100 ms.
    let elapsed = server
        .wait_unregistered("EngineStand", Duration::from_millis(100))
        .await;
    assert!(elapsed <= Duration::from_millis(100));
    assert!(server.registry.get_by_address(addr).await.is_none());
    assert!(device.wait_closed().await, "socket should close on eviction");
}

#[tokio::test]
async fn disconnect_fails_in_flight_waiters_with_disconnected() {
    let server = TestServer::start(fast_tunables()).await;
    let mut device = MockDevice::connect_and_handshake(server.addr, DEVICE_JSON)
        .await
        .unwrap();
    server.wait_registered("EngineStand").await;

    let dispatcher = server.dispatcher.clone();
    let status = tokio::spawn(async move { dispatcher.status("EngineStand").await });

    // The request reaches the wire, then the device dies without answering.
    device
        .recv_matching(|p| p.packet_type() == PacketType::StatusRequest)
        .await
        .unwrap();
    drop(device);

    assert_eq!(
        status.await.unwrap().unwrap_err(),
        DispatchError::Disconnected
    );
    server
        .wait_unregistered("EngineStand", Duration::from_secs(1))
        .await;
}

#[tokio::test]
async fn server_sequences_advance_strictly_mod_256() {
    let server = TestServer::start(fast_tunables()).await;
    let mut device = MockDevice::connect_and_handshake(server.addr, DEVICE_JSON)
        .await
        .unwrap();
    server.wait_registered("EngineStand").await;

    // Generate traffic across several packet types.
    for i in 0..3u16 {
        let dispatcher = server.dispatcher.clone();
        let start =
            tokio::spawn(
                async move { dispatcher.start_stream("EngineStand", 10 + i).await },
            );
        let request = device
            .recv_matching(|p| p.packet_type() == PacketType::StreamStart)
            .await
            .unwrap();
        device.ack(&request).await.unwrap();
        start.await.unwrap().unwrap();
    }

    let sequences = device.received_sequences();
    assert!(sequences.len() >= 5, "handshake plus three commands");
    for pair in sequences.windows(2) {
        assert_eq!(
            pair[1],
            pair[0].wrapping_add(1),
            "sequence must advance by exactly one per packet: {sequences:?}"
        );
    }
}

#[tokio::test]
async fn reconnect_after_disconnect_registers_again() {
    let server = TestServer::start(fast_tunables()).await;
    let device = MockDevice::connect_and_handshake(server.addr, DEVICE_JSON)
        .await
        .unwrap();
    server.wait_registered("EngineStand").await;
    drop(device);
    server
        .wait_unregistered("EngineStand", Duration::from_secs(1))
        .await;

    let _device = MockDevice::connect_and_handshake(server.addr, DEVICE_JSON)
        .await
        .unwrap();
    server.wait_registered("EngineStand").await;
    assert_eq!(server.registry.len().await, 1);
}
