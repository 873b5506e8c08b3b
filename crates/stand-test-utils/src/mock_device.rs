//! A mock embedded device for integration tests.
//!
//! Connects to the server like real firmware would: sends CONFIG, answers
//! the TIMESYNC round trip, then follows whatever script the test drives.
//! Heartbeats and resyncs can be auto-acknowledged so long-running tests
//! don't trip the liveness timers.
//!
//! The device clock starts at a configurable offset so tests exercise real
//! (non-zero) sync anchors.

use stand_protocol::{
    Body, DeviceStatus, ErrorCode, FrameBuffer, Packet, PacketType, Reading, Unit, decode, encode,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Default guard on every receive; a stuck test fails fast instead of
/// hanging the suite.
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MockDevice {
    stream: TcpStream,
    frames: FrameBuffer,
    /// Device-local clock origin; `device_ms()` counts from here.
    boot: Instant,
    /// Fixed offset so device timestamps never start near zero.
    boot_offset_ms: u32,
    next_seq: u8,
    /// When set, `recv_packet` transparently ACKs HEARTBEAT and TIMESYNC.
    pub auto_ack_keepalive: bool,
    /// Every server packet seen, in arrival order (for wire-property asserts).
    pub received: Vec<Packet>,
}

impl MockDevice {
    /// Connect without handshaking; the test sends the first packet itself.
    pub async fn connect(addr: SocketAddr) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(MockDevice {
            stream,
            frames: FrameBuffer::new(),
            boot: Instant::now(),
            boot_offset_ms: 50_000,
            next_seq: 0,
            auto_ack_keepalive: true,
            received: Vec::new(),
        })
    }

    /// Connect and complete the CONFIG + TIMESYNC handshake.
    ///
    /// Panics on any deviation from the expected flow -- handshake bugs
    /// should fail tests loudly.
    pub async fn connect_and_handshake(
        addr: SocketAddr,
        config_json: &str,
    ) -> std::io::Result<Self> {
        let mut device = Self::connect(addr).await?;
        device.send_config(config_json).await?;

        let ack = device.recv_packet().await?;
        match ack.body {
            Body::Ack {
                ack_type: PacketType::Config,
                error: ErrorCode::None,
                ..
            } => {}
            other => panic!("expected ACK(CONFIG), got {other:?}"),
        }

        let sync = device.recv_packet().await?;
        assert!(
            matches!(sync.body, Body::TimeSync),
            "expected TIMESYNC after CONFIG ACK, got {:?}",
            sync.body
        );
        device.ack(&sync).await?;
        Ok(device)
    }

    /// Milliseconds since (mock) device boot, the DATA/ACK header timestamp.
    pub fn device_ms(&self) -> u32 {
        (self.boot.elapsed().as_millis() as u32).wrapping_add(self.boot_offset_ms)
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    pub async fn send_packet(&mut self, body: Body) -> std::io::Result<()> {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        let packet = Packet::new(seq, self.device_ms(), body);
        self.stream.write_all(&encode(&packet)).await
    }

    /// Send arbitrary bytes, bypassing the codec (for malformed-input tests).
    pub async fn send_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(bytes).await
    }

    pub async fn send_config(&mut self, json: &str) -> std::io::Result<()> {
        self.send_packet(Body::Config {
            json: json.as_bytes().to_vec(),
        })
        .await
    }

    /// ACK a server request, echoing its type and sequence.
    pub async fn ack(&mut self, request: &Packet) -> std::io::Result<()> {
        self.send_packet(Body::Ack {
            ack_type: request.packet_type(),
            ack_seq: request.sequence,
            error: ErrorCode::None,
        })
        .await
    }

    /// NACK a server request with the given error code.
    pub async fn nack(&mut self, request: &Packet, error: ErrorCode) -> std::io::Result<()> {
        self.send_packet(Body::Nack {
            nack_type: request.packet_type(),
            nack_seq: request.sequence,
            error,
        })
        .await
    }

    pub async fn send_data(&mut self, readings: Vec<Reading>) -> std::io::Result<()> {
        self.send_packet(Body::Data { readings }).await
    }

    pub async fn send_status(&mut self, status: DeviceStatus) -> std::io::Result<()> {
        self.send_packet(Body::Status { status }).await
    }

    /// Convenience: a single PSI reading.
    pub fn psi(sensor_id: u8, value: f32) -> Reading {
        Reading {
            sensor_id,
            unit: Unit::Psi,
            value,
        }
    }

    // -----------------------------------------------------------------------
    // Receiving
    // -----------------------------------------------------------------------

    /// Receive the next server packet, auto-acking keepalives if enabled.
    pub async fn recv_packet(&mut self) -> std::io::Result<Packet> {
        loop {
            let packet = self.recv_any().await?;
            if self.auto_ack_keepalive
                && matches!(packet.body, Body::Heartbeat | Body::TimeSync)
            {
                self.ack(&packet).await?;
                continue;
            }
            return Ok(packet);
        }
    }

    /// Receive the next packet matching `pred`, auto-acking keepalives and
    /// discarding everything else.
    pub async fn recv_matching(
        &mut self,
        mut pred: impl FnMut(&Packet) -> bool,
    ) -> std::io::Result<Packet> {
        loop {
            let packet = self.recv_packet().await?;
            if pred(&packet) {
                return Ok(packet);
            }
        }
    }

    /// True if the server sends nothing for `window` (keepalives excluded).
    pub async fn assert_silent(&mut self, window: Duration) -> bool {
        matches!(
            tokio::time::timeout(window, self.recv_packet()).await,
            Err(_)
        )
    }

    /// Wait for the server to close the connection.
    pub async fn wait_closed(&mut self) -> bool {
        loop {
            match timeout(RECV_TIMEOUT, self.recv_any()).await {
                Ok(Ok(packet)) => {
                    // Keepalives may still be in flight while closing.
                    let _ = packet;
                }
                Ok(Err(_)) => return true,
                Err(_) => return false,
            }
        }
    }

    async fn recv_any(&mut self) -> std::io::Result<Packet> {
        loop {
            match self.frames.next_frame() {
                Ok(Some(frame)) => {
                    let packet = decode(&frame).expect("server sent an undecodable packet");
                    self.received.push(packet.clone());
                    return Ok(packet);
                }
                Ok(None) => {}
                Err(e) => panic!("server sent an unframeable byte stream: {e}"),
            }
            let mut chunk = [0u8; 4096];
            let n = timeout(RECV_TIMEOUT, self.stream.read(&mut chunk))
                .await
                .map_err(|_| {
                    std::io::Error::new(std::io::ErrorKind::TimedOut, "mock device recv timeout")
                })??;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "server closed the connection",
                ));
            }
            self.frames.push(&chunk[..n]);
        }
    }

    /// Sequence numbers of every server packet seen so far.
    pub fn received_sequences(&self) -> Vec<u8> {
        self.received.iter().map(|p| p.sequence).collect()
    }
}
