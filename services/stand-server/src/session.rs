//! Per-device session: the connection state machine.
//!
//! One session per accepted TCP connection, running
//! `AwaitingConfig → AwaitingSync → Ready → Closed`. The session owns the
//! device model exclusively; the rest of the process talks to it through a
//! [`Submit`] channel and gets answers over oneshot waiters, so there is no
//! shared mutable device state anywhere.
//!
//! Task layout per session: this reader/timer task plus one writer task.
//! Outbound packets are serialized through the writer channel in submission
//! order; sequence numbers are allocated at submission, so they advance
//! strictly (mod 256) on the wire.

use crate::bus::{DataEvent, DeviceEvent, EventBus, LogLevel};
use crate::config::Tunables;
use crate::device::{Device, DeviceSnapshot, SampleDump, StreamState};
use crate::registry::{Registry, SessionHandle};
use crate::timesync::{ProjectOutcome, ServerClock};
use stand_protocol::{
    Body, CodecError, ControlState, DeviceConfig, DeviceStatus, ErrorCode, FrameBuffer,
    FrameError, Packet, PacketType, decode, encode,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Cadence of the pending-deadline sweep.
const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// Outbound submission queue depth.
const SUBMIT_QUEUE: usize = 64;

// ---------------------------------------------------------------------------
// Command surface
// ---------------------------------------------------------------------------

/// Failure of one submitted command. The session stays open for all of these
/// except `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("no control with that name")]
    NoSuchName,
    #[error("device NACK({0})")]
    Nack(ErrorCode),
    #[error("timed out waiting for device response")]
    Timeout,
    #[error("device disconnected")]
    Disconnected,
}

/// A request submitted to the session task.
#[derive(Debug)]
pub enum Submit {
    Control {
        name: String,
        state: ControlState,
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    StreamStart {
        freq_hz: u16,
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    StreamStop {
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    StatusRequest {
        reply: oneshot::Sender<Result<DeviceStatus, CommandError>>,
    },
    GetSingle {
        reply: oneshot::Sender<Result<Vec<DataEvent>, CommandError>>,
    },
    /// Fire-and-forget by design: completes once the packet is queued to the
    /// wire, never waits for any device response.
    Estop {
        done: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<DeviceSnapshot>,
    },
    SampleDump {
        reply: oneshot::Sender<SampleDump>,
    },
}

// ---------------------------------------------------------------------------
// Pending-ACK table
// ---------------------------------------------------------------------------

/// Side effect applied to the device model when an ACK arrives.
#[derive(Debug, Clone, Copy)]
enum Effect {
    ControlCommanded { cmd_id: u8, state: ControlState },
    StreamStarted { freq_hz: u16 },
    StreamStopped,
}

#[derive(Debug)]
enum Waiter {
    Command {
        reply: oneshot::Sender<Result<(), CommandError>>,
        effect: Option<Effect>,
    },
    /// Tracked by the heartbeat tick, not the sweep.
    Heartbeat,
    /// Periodic TIMESYNC; the ACK re-anchors the device clock.
    Resync,
}

#[derive(Debug)]
struct Pending {
    packet_type: PacketType,
    deadline: Instant,
    waiter: Waiter,
}

/// Outstanding ACK-bearing requests, indexed by sequence number. The
/// sequence domain is 256 wide, so a fixed array replaces a map and the
/// wrap is natural; at most one entry per (type, seq) can exist.
struct PendingTable {
    slots: [Option<Pending>; 256],
}

impl PendingTable {
    fn new() -> Self {
        PendingTable {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Insert a waiter for `seq`. A still-occupied slot means the counter
    /// lapped an unanswered request; the stale waiter times out now.
    fn insert(&mut self, seq: u8, pending: Pending) {
        if let Some(stale) = self.slots[seq as usize].replace(pending) {
            warn!(seq, stale_type = ?stale.packet_type, "sequence lapped an unanswered request");
            fail_waiter(stale.waiter, CommandError::Timeout);
        }
    }

    /// Remove and return the entry matching `(acked_type, seq)`.
    fn complete(&mut self, acked_type: PacketType, seq: u8) -> Option<Pending> {
        match &self.slots[seq as usize] {
            Some(p) if p.packet_type == acked_type => self.slots[seq as usize].take(),
            _ => None,
        }
    }

    /// Remove the outstanding heartbeat entry, if any.
    fn take_heartbeat(&mut self) -> Option<Pending> {
        for slot in &mut self.slots {
            if matches!(
                slot,
                Some(Pending {
                    waiter: Waiter::Heartbeat,
                    ..
                })
            ) {
                return slot.take();
            }
        }
        None
    }

    /// Remove entries past their deadline. Heartbeat entries are exempt:
    /// the heartbeat tick owns their lifecycle.
    fn sweep(&mut self, now: Instant) -> Vec<Pending> {
        let mut expired = Vec::new();
        for slot in &mut self.slots {
            let is_expired = matches!(
                slot,
                Some(p) if p.deadline <= now && !matches!(p.waiter, Waiter::Heartbeat)
            );
            if is_expired
                && let Some(p) = slot.take()
            {
                expired.push(p);
            }
        }
        expired
    }

    fn drain(&mut self) -> Vec<Pending> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }
}

fn fail_waiter(waiter: Waiter, error: CommandError) {
    if let Waiter::Command { reply, .. } = waiter {
        let _ = reply.send(Err(error));
    }
}

// ---------------------------------------------------------------------------
// Session context and entry point
// ---------------------------------------------------------------------------

/// Shared collaborators handed to every session task.
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Registry,
    pub bus: EventBus,
    pub clock: ServerClock,
    pub tunables: Arc<Tunables>,
}

/// Why a session ended; logged once at close.
#[derive(Debug)]
enum CloseReason {
    PeerClosed,
    ReadError(std::io::Error),
    Framing(FrameError),
    Codec(CodecError),
    HeartbeatLoss,
    WriterFailed,
    Evicted,
    Shutdown,
}

/// Drive one device connection from accept to close.
///
/// Handshake failures never reach the registry; after registration every
/// exit path unregisters, fails outstanding waiters with `Disconnected`,
/// and emits the `device.offline` terminator.
pub async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: SessionContext,
    shutdown: watch::Receiver<bool>,
) {
    let (read_half, write_half) = stream.into_split();

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let cancel_tx = Arc::new(cancel_tx);
    let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(SUBMIT_QUEUE);
    let writer = tokio::spawn(writer_task(write_half, out_rx, cancel_rx.clone()));

    let mut session = Session {
        peer,
        frames: FrameBuffer::with_max_packet(ctx.tunables.max_packet),
        ctx,
        read_half,
        out_tx,
        next_seq: 0,
        pending: PendingTable::new(),
        status_waiters: Vec::new(),
        data_waiters: Vec::new(),
        heartbeat_misses: 0,
    };

    let device = match session.handshake(shutdown.clone()).await {
        Ok(device) => device,
        Err(reason) => {
            info!(peer = %peer, reason, "handshake failed, closing");
            cancel_tx.send_replace(true);
            let _ = writer.await;
            return;
        }
    };

    let name = device.name.clone();
    info!(peer = %peer, device = %name, kind = %device.kind, "device registered");
    session.ctx.bus.publish_log(
        LogLevel::System,
        Some(&name),
        format!("device '{name}' online at {peer}"),
    );
    session.ctx.bus.publish_device(DeviceEvent::Online {
        name: name.clone(),
        addr: peer,
    });

    let (submit_tx, submit_rx) = mpsc::channel(SUBMIT_QUEUE);
    let handle = SessionHandle::new(
        peer,
        name.clone(),
        device.kind.clone(),
        submit_tx,
        cancel_tx.clone(),
    );
    session.ctx.registry.add(handle).await;

    let reason = session
        .ready_loop(device, submit_rx, shutdown, cancel_rx)
        .await;

    // Closed: unblock everything promptly, then unregister and terminate
    // the device's event stream.
    cancel_tx.send_replace(true);
    for pending in session.pending.drain() {
        fail_waiter(pending.waiter, CommandError::Disconnected);
    }
    for (_, reply) in session.status_waiters.drain(..) {
        let _ = reply.send(Err(CommandError::Disconnected));
    }
    for (_, reply) in session.data_waiters.drain(..) {
        let _ = reply.send(Err(CommandError::Disconnected));
    }
    session.ctx.registry.remove(peer).await;
    let _ = writer.await;

    info!(peer = %peer, device = %name, reason = ?reason, "session closed");
    session.ctx.bus.publish_log(
        LogLevel::System,
        Some(&name),
        format!("device '{name}' offline ({reason:?})"),
    );
    session
        .ctx
        .bus
        .publish_device(DeviceEvent::Offline { name, addr: peer });
}

// ---------------------------------------------------------------------------
// Writer task
// ---------------------------------------------------------------------------

/// Serialized writer: drains encoded packets to the socket in channel order.
/// Ends on write failure, channel close, or session cancel.
async fn writer_task(
    mut write_half: OwnedWriteHalf,
    mut out_rx: mpsc::Receiver<Vec<u8>>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
            }
            bytes = out_rx.recv() => {
                let Some(bytes) = bytes else { break };
                // The write itself honours cancellation too: a peer that
                // stalls its receive window must not wedge session teardown.
                tokio::select! {
                    biased;
                    changed = cancel.changed() => {
                        if changed.is_err() || *cancel.borrow() {
                            break;
                        }
                    }
                    result = write_half.write_all(&bytes) => {
                        if result.is_err() {
                            // Dropping out_rx makes the session's next send
                            // fail, which closes it.
                            break;
                        }
                    }
                }
            }
        }
    }
    let _ = write_half.shutdown().await;
}

// ---------------------------------------------------------------------------
// Session internals
// ---------------------------------------------------------------------------

struct Session {
    peer: SocketAddr,
    ctx: SessionContext,
    frames: FrameBuffer,
    read_half: OwnedReadHalf,
    out_tx: mpsc::Sender<Vec<u8>>,
    next_seq: u8,
    pending: PendingTable,
    status_waiters: Vec<(Instant, oneshot::Sender<Result<DeviceStatus, CommandError>>)>,
    data_waiters: Vec<(Instant, oneshot::Sender<Result<Vec<DataEvent>, CommandError>>)>,
    heartbeat_misses: u32,
}

impl Session {
    /// Queue one packet to the writer, allocating its sequence number and
    /// stamping the server monotonic timestamp.
    async fn send(&mut self, body: Body) -> Result<u8, CloseReason> {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        let packet = Packet::new(seq, self.ctx.clock.now_ms(), body);
        self.out_tx
            .send(encode(&packet))
            .await
            .map_err(|_| CloseReason::WriterFailed)?;
        Ok(seq)
    }

    /// Read socket bytes into the frame buffer; `Ok(false)` means EOF.
    async fn read_chunk(&mut self) -> Result<bool, CloseReason> {
        let mut chunk = [0u8; 4096];
        match self.read_half.read(&mut chunk).await {
            Ok(0) => Ok(false),
            Ok(n) => {
                self.frames.push(&chunk[..n]);
                Ok(true)
            }
            Err(e) => Err(CloseReason::ReadError(e)),
        }
    }

    // -----------------------------------------------------------------------
    // AwaitingConfig → AwaitingSync
    // -----------------------------------------------------------------------

    /// Run the CONFIG + TIMESYNC handshake. Any failure is fatal to the
    /// connection and leaves no registry trace.
    async fn handshake(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<Device, &'static str> {
        let tunables = self.ctx.tunables.clone();

        // AwaitingConfig: the first packet must be CONFIG.
        let first = tokio::time::timeout(
            tunables.config_timeout,
            self.read_frame(&mut shutdown),
        )
        .await
        .map_err(|_| "no CONFIG before deadline")?
        .ok_or("connection lost before CONFIG")?;
        let packet = decode(&first).map_err(|_| "undecodable first packet")?;
        let Body::Config { json } = packet.body else {
            return Err("first packet was not CONFIG");
        };
        let config = match DeviceConfig::parse(&json) {
            Ok(config) => config,
            Err(e) => {
                warn!(peer = %self.peer, error = %e, "invalid CONFIG JSON");
                return Err("invalid CONFIG JSON");
            }
        };
        let mut device = Device::from_config(
            self.peer,
            config,
            tunables.sample_buffer_capacity,
            tunables.strict_timestamps,
        );

        self.send(Body::Ack {
            ack_type: PacketType::Config,
            ack_seq: packet.sequence,
            error: ErrorCode::None,
        })
        .await
        .map_err(|_| "socket write failed")?;

        // AwaitingSync: one TIMESYNC round trip anchors the device clock.
        let sync_seq = self
            .send(Body::TimeSync)
            .await
            .map_err(|_| "socket write failed")?;
        let deadline = Instant::now() + tunables.sync_timeout;
        loop {
            let frame = tokio::time::timeout_at(deadline, self.read_frame(&mut shutdown))
                .await
                .map_err(|_| "TIMESYNC ACK missing")?
                .ok_or("connection lost during TIMESYNC")?;
            let reply = decode(&frame).map_err(|_| "undecodable packet during TIMESYNC")?;
            match reply.body {
                Body::Ack {
                    ack_type: PacketType::TimeSync,
                    ack_seq,
                    ..
                } if ack_seq == sync_seq => {
                    // The ACK header timestamp is the device clock at ACK
                    // send; pairing it with the receive instant forms the
                    // sync anchor.
                    device
                        .sync
                        .establish(reply.timestamp, self.ctx.clock.now_seconds());
                    return Ok(device);
                }
                other => {
                    debug!(peer = %self.peer, body = ?other, "ignoring packet while awaiting sync");
                }
            }
        }
    }

    /// Pop the next complete frame, reading as needed. `None` on EOF or any
    /// pre-registration read/framing problem.
    async fn read_frame(&mut self, shutdown: &mut watch::Receiver<bool>) -> Option<Vec<u8>> {
        loop {
            match self.frames.next_frame() {
                Ok(Some(frame)) => return Some(frame),
                Ok(None) => {}
                Err(_) => return None,
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return None;
                    }
                }
                more = self.read_chunk() => {
                    match more {
                        Ok(true) => {}
                        Ok(false) | Err(_) => return None,
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Ready
    // -----------------------------------------------------------------------

    async fn ready_loop(
        &mut self,
        mut device: Device,
        mut submit_rx: mpsc::Receiver<Submit>,
        mut shutdown: watch::Receiver<bool>,
        mut cancel: watch::Receiver<bool>,
    ) -> CloseReason {
        let tunables = self.ctx.tunables.clone();
        let mut heartbeat = tokio::time::interval_at(
            Instant::now() + tunables.heartbeat_interval,
            tunables.heartbeat_interval,
        );
        let mut resync = tokio::time::interval_at(
            Instant::now() + tunables.resync_interval,
            tunables.resync_interval,
        );
        let mut sweep = tokio::time::interval_at(Instant::now() + SWEEP_INTERVAL, SWEEP_INTERVAL);

        loop {
            // Drain complete frames before sleeping on the socket again.
            loop {
                match self.frames.next_frame() {
                    Ok(Some(frame)) => {
                        if let Err(reason) = self.handle_frame(&mut device, &frame) {
                            return reason;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => return CloseReason::Framing(e),
                }
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return CloseReason::Shutdown;
                    }
                }
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        return CloseReason::Evicted;
                    }
                }
                more = self.read_chunk() => {
                    match more {
                        Ok(true) => {}
                        Ok(false) => return CloseReason::PeerClosed,
                        Err(reason) => return reason,
                    }
                }
                submit = submit_rx.recv() => {
                    let Some(submit) = submit else {
                        return CloseReason::Evicted;
                    };
                    if let Err(reason) = self.handle_submit(&mut device, submit).await {
                        return reason;
                    }
                }
                _ = heartbeat.tick() => {
                    if let Err(reason) = self.heartbeat_tick(&device).await {
                        return reason;
                    }
                    if self.heartbeat_misses >= tunables.heartbeat_miss_limit {
                        return CloseReason::HeartbeatLoss;
                    }
                }
                _ = resync.tick() => {
                    let seq = match self.send(Body::TimeSync).await {
                        Ok(seq) => seq,
                        Err(reason) => return reason,
                    };
                    self.pending.insert(seq, Pending {
                        packet_type: PacketType::TimeSync,
                        deadline: Instant::now() + tunables.ack_timeout,
                        waiter: Waiter::Resync,
                    });
                }
                _ = sweep.tick() => {
                    self.sweep_deadlines();
                }
            }
        }
    }

    /// Classify one inbound packet. The server never NACKs: unexpected or
    /// unknown traffic is logged and dropped, never answered.
    fn handle_frame(&mut self, device: &mut Device, frame: &[u8]) -> Result<(), CloseReason> {
        let packet = match decode(frame) {
            Ok(packet) => packet,
            Err(e) => return Err(CloseReason::Codec(e)),
        };
        match packet.body {
            Body::Data { readings } => {
                let now = self.ctx.clock.now_seconds();
                let (t_server, approx) = match device.sync.project(packet.timestamp, now) {
                    ProjectOutcome::Accepted {
                        t_server_seconds,
                        approx,
                    } => (t_server_seconds, approx),
                    ProjectOutcome::RejectedOutOfOrder {
                        t_server_seconds,
                        last_accepted,
                    } => {
                        warn!(
                            device = %device.name,
                            t_server_seconds,
                            last_accepted,
                            "out-of-order DATA batch rejected"
                        );
                        return Ok(());
                    }
                };
                device.last_data_at = Some(t_server);
                let device_name = device.name.clone();
                let mut events = Vec::with_capacity(readings.len());
                for reading in &readings {
                    let Some(def) = device.record_reading(reading, t_server) else {
                        warn!(
                            device = %device_name,
                            sensor_id = reading.sensor_id,
                            "DATA for unknown sensor id"
                        );
                        continue;
                    };
                    let event = DataEvent {
                        device_name: device_name.clone(),
                        sensor_name: def.name.clone(),
                        units: reading.unit.label().to_owned(),
                        value: reading.value,
                        t_server_seconds: t_server,
                        approx,
                    };
                    self.ctx.bus.publish_data(event.clone());
                    events.push(event);
                }
                if let Some((_, reply)) = pop_front(&mut self.data_waiters) {
                    let _ = reply.send(Ok(events));
                }
            }
            Body::Status { status } => {
                device.status = Some(status);
                if let Some((_, reply)) = pop_front(&mut self.status_waiters) {
                    let _ = reply.send(Ok(status));
                } else {
                    debug!(device = %device.name, %status, "unsolicited STATUS");
                }
            }
            Body::Ack {
                ack_type,
                ack_seq,
                error,
            } => self.handle_ack(device, ack_type, ack_seq, Ok(error), packet.timestamp),
            Body::Nack {
                nack_type,
                nack_seq,
                error,
            } => self.handle_ack(device, nack_type, nack_seq, Err(error), packet.timestamp),
            Body::Config { .. } => {
                warn!(device = %device.name, "unexpected CONFIG after handshake, ignoring");
            }
            other => {
                debug!(device = %device.name, body = ?other, "ignoring inbound packet");
            }
        }
        Ok(())
    }

    /// Correlate an ACK (`outcome = Ok`) or NACK (`outcome = Err`) with its
    /// pending waiter.
    fn handle_ack(
        &mut self,
        device: &mut Device,
        acked_type: PacketType,
        acked_seq: u8,
        outcome: Result<ErrorCode, ErrorCode>,
        device_timestamp: u32,
    ) {
        let Some(pending) = self.pending.complete(acked_type, acked_seq) else {
            warn!(
                device = %device.name,
                ?acked_type,
                seq = acked_seq,
                "ACK/NACK matches no pending request"
            );
            return;
        };
        match pending.waiter {
            Waiter::Command { reply, effect } => match outcome {
                Ok(_) => {
                    if let Some(effect) = effect {
                        apply_effect(device, effect);
                    }
                    let _ = reply.send(Ok(()));
                }
                Err(code) => {
                    let _ = reply.send(Err(CommandError::Nack(code)));
                }
            },
            Waiter::Heartbeat => {
                self.heartbeat_misses = 0;
                device.last_heartbeat_reply = Some(self.ctx.clock.now_seconds());
                if outcome.is_err() {
                    warn!(device = %device.name, "heartbeat NACKed");
                }
            }
            Waiter::Resync => match outcome {
                Ok(_) => {
                    device
                        .sync
                        .establish(device_timestamp, self.ctx.clock.now_seconds());
                    debug!(device = %device.name, "time sync re-anchored");
                }
                Err(code) => {
                    warn!(device = %device.name, %code, "TIMESYNC NACKed, keeping old anchor");
                }
            },
        }
    }

    async fn handle_submit(
        &mut self,
        device: &mut Device,
        submit: Submit,
    ) -> Result<(), CloseReason> {
        let deadline = Instant::now() + self.ctx.tunables.ack_timeout;
        match submit {
            Submit::Control { name, state, reply } => {
                let Some(cmd_id) = device.control_id(&name) else {
                    let _ = reply.send(Err(CommandError::NoSuchName));
                    return Ok(());
                };
                let seq = self.send(Body::Control { cmd_id, state }).await?;
                self.pending.insert(
                    seq,
                    Pending {
                        packet_type: PacketType::Control,
                        deadline,
                        waiter: Waiter::Command {
                            reply,
                            effect: Some(Effect::ControlCommanded { cmd_id, state }),
                        },
                    },
                );
            }
            Submit::StreamStart { freq_hz, reply } => {
                let seq = self.send(Body::StreamStart { freq_hz }).await?;
                self.pending.insert(
                    seq,
                    Pending {
                        packet_type: PacketType::StreamStart,
                        deadline,
                        waiter: Waiter::Command {
                            reply,
                            effect: Some(Effect::StreamStarted { freq_hz }),
                        },
                    },
                );
            }
            Submit::StreamStop { reply } => {
                let seq = self.send(Body::StreamStop).await?;
                self.pending.insert(
                    seq,
                    Pending {
                        packet_type: PacketType::StreamStop,
                        deadline,
                        waiter: Waiter::Command {
                            reply,
                            effect: Some(Effect::StreamStopped),
                        },
                    },
                );
            }
            Submit::StatusRequest { reply } => {
                self.send(Body::StatusRequest).await?;
                self.status_waiters.push((deadline, reply));
            }
            Submit::GetSingle { reply } => {
                self.send(Body::GetSingle).await?;
                self.data_waiters.push((deadline, reply));
            }
            Submit::Estop { done } => {
                self.send(Body::Estop).await?;
                device.mark_controls_default();
                self.ctx.bus.publish_log(
                    LogLevel::System,
                    Some(&device.name),
                    format!("ESTOP sent to '{}'", device.name),
                );
                let _ = done.send(());
            }
            Submit::Snapshot { reply } => {
                let _ = reply.send(device.snapshot());
            }
            Submit::SampleDump { reply } => {
                let _ = reply.send(device.sample_dump());
            }
        }
        Ok(())
    }

    /// One heartbeat period: count the previous round as missed if its ACK
    /// never arrived, then send the next HEARTBEAT.
    async fn heartbeat_tick(&mut self, device: &Device) -> Result<(), CloseReason> {
        if let Some(_stale) = self.pending.take_heartbeat() {
            self.heartbeat_misses += 1;
            warn!(
                device = %device.name,
                misses = self.heartbeat_misses,
                "heartbeat ACK missed"
            );
        } else {
            self.heartbeat_misses = 0;
        }
        if self.heartbeat_misses >= self.ctx.tunables.heartbeat_miss_limit {
            return Ok(());
        }
        let seq = self.send(Body::Heartbeat).await?;
        self.pending.insert(
            seq,
            Pending {
                packet_type: PacketType::Heartbeat,
                // Nominal; the heartbeat tick, not the sweep, judges this.
                deadline: Instant::now() + self.ctx.tunables.heartbeat_interval,
                waiter: Waiter::Heartbeat,
            },
        );
        Ok(())
    }

    /// Expire pending command/status/data waiters. A timeout fails the
    /// waiter but never the connection: a busy device on a healthy link
    /// looks exactly like this.
    fn sweep_deadlines(&mut self) {
        let now = Instant::now();
        for pending in self.pending.sweep(now) {
            match pending.waiter {
                Waiter::Command { reply, .. } => {
                    let _ = reply.send(Err(CommandError::Timeout));
                }
                Waiter::Resync => {
                    warn!(peer = %self.peer, "TIMESYNC ACK timed out, keeping old anchor");
                }
                Waiter::Heartbeat => unreachable!("sweep exempts heartbeats"),
            }
        }
        expire_waiters(&mut self.status_waiters, now);
        expire_waiters(&mut self.data_waiters, now);
    }
}

fn apply_effect(device: &mut Device, effect: Effect) {
    match effect {
        Effect::ControlCommanded { cmd_id, state } => {
            if let Some(control) = device.controls.get_mut(cmd_id as usize) {
                control.last_commanded = state;
            }
        }
        Effect::StreamStarted { freq_hz } => {
            device.stream = StreamState::Streaming { freq_hz };
        }
        Effect::StreamStopped => {
            device.stream = StreamState::Off;
        }
    }
}

fn pop_front<T>(waiters: &mut Vec<(Instant, T)>) -> Option<(Instant, T)> {
    if waiters.is_empty() {
        None
    } else {
        Some(waiters.remove(0))
    }
}

fn expire_waiters<T>(
    waiters: &mut Vec<(Instant, oneshot::Sender<Result<T, CommandError>>)>,
    now: Instant,
) {
    let mut i = 0;
    while i < waiters.len() {
        if waiters[i].0 <= now {
            let (_, reply) = waiters.remove(i);
            let _ = reply.send(Err(CommandError::Timeout));
        } else {
            i += 1;
        }
    }
}
