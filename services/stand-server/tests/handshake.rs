//! CONFIG/TIMESYNC handshake scenarios.
//!
//! 1. the full handshake registers the device
//! 2. a non-CONFIG first packet closes the connection without registering
//! 3. invalid CONFIG JSON closes the connection without an ACK
//! 4. a missing TIMESYNC ACK closes the connection
//! 5. a framing violation is fatal

mod support;

use stand_protocol::{Body, PacketType};
use stand_test_utils::MockDevice;
use std::time::Duration;
use support::{DEVICE_JSON, TestServer, fast_tunables};

#[tokio::test]
async fn full_handshake_registers_the_device() {
    let server = TestServer::start(fast_tunables()).await;
    let device = MockDevice::connect_and_handshake(server.addr, DEVICE_JSON)
        .await
        .expect("handshake");
    server.wait_registered("EngineStand").await;

    let handle = server.registry.get_by_name("EngineStand").await.unwrap();
    assert_eq!(handle.kind, "Sensor Monitor");
    assert_eq!(server.registry.len().await, 1);

    // Server side of S1 on the wire: ACK(CONFIG) first, then TIMESYNC, with
    // consecutive sequence numbers starting at 0.
    assert_eq!(device.received[0].packet_type(), PacketType::Ack);
    assert_eq!(device.received[0].sequence, 0);
    assert_eq!(device.received[1].packet_type(), PacketType::TimeSync);
    assert_eq!(device.received[1].sequence, 1);
}

#[tokio::test]
async fn non_config_first_packet_is_rejected() {
    let server = TestServer::start(fast_tunables()).await;
    let mut device = MockDevice::connect(server.addr).await.unwrap();
    device.send_packet(Body::Heartbeat).await.unwrap();

    assert!(device.wait_closed().await, "server should drop the connection");
    assert!(server.registry.is_empty().await);
    // No ACK was ever sent.
    assert!(device.received.is_empty());
}

#[tokio::test]
async fn invalid_config_json_closes_without_ack() {
    let server = TestServer::start(fast_tunables()).await;
    let mut device = MockDevice::connect(server.addr).await.unwrap();
    device.send_config("this is not json").await.unwrap();

    assert!(device.wait_closed().await);
    assert!(device.received.is_empty(), "no ACK for a failed handshake");
    assert!(server.registry.is_empty().await);
}

#[tokio::test]
async fn config_missing_device_name_closes_without_ack() {
    let server = TestServer::start(fast_tunables()).await;
    let mut device = MockDevice::connect(server.addr).await.unwrap();
    device
        .send_config(r#"{"deviceType":"Sensor Monitor"}"#)
        .await
        .unwrap();

    assert!(device.wait_closed().await);
    assert!(device.received.is_empty());
    assert!(server.registry.is_empty().await);
}

#[tokio::test]
async fn missing_timesync_ack_closes_the_session() {
    let server = TestServer::start(fast_tunables()).await;
    let mut device = MockDevice::connect(server.addr).await.unwrap();
    device.auto_ack_keepalive = false;
    device.send_config(DEVICE_JSON).await.unwrap();

    // ACK(CONFIG) and TIMESYNC arrive, but the device never answers.
    let ack = device.recv_packet().await.unwrap();
    assert_eq!(ack.packet_type(), PacketType::Ack);
    let sync = device.recv_packet().await.unwrap();
    assert_eq!(sync.packet_type(), PacketType::TimeSync);

    assert!(device.wait_closed().await, "sync timeout should close");
    assert!(server.registry.is_empty().await);
}

#[tokio::test]
async fn framing_violation_is_fatal() {
    let server = TestServer::start(fast_tunables()).await;
    let mut device = MockDevice::connect_and_handshake(server.addr, DEVICE_JSON)
        .await
        .unwrap();
    server.wait_registered("EngineStand").await;

    // A header whose length field is below the 9-byte minimum.
    device
        .send_raw(&[0x02, 0x11, 0x00, 0x00, 0x03, 0, 0, 0, 0])
        .await
        .unwrap();

    assert!(device.wait_closed().await);
    server
        .wait_unregistered("EngineStand", Duration::from_secs(2))
        .await;
}
