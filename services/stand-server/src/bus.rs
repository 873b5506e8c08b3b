//! In-process event bus.
//!
//! Three typed broadcast channels: sensor data, structured log lines, and
//! device lifecycle. External sidecars (redis log relay, CSV archiver, UI)
//! subscribe with [`EventBus::subscribe_data`] etc. and consume at their own
//! pace; a subscriber that cannot keep up lags and loses events rather than
//! back-pressuring a device's read loop.
//!
//! Delivery is at-most-once, FIFO per producer.

use std::net::SocketAddr;
use tokio::sync::broadcast;

/// Queue capacity per subscriber before overrun.
const DATA_CAPACITY: usize = 4096;
const LOG_CAPACITY: usize = 1024;
const DEVICE_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// One sensor reading, projected into the server time frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DataEvent {
    pub device_name: String,
    pub sensor_name: String,
    /// Display label, e.g. "psi".
    pub units: String,
    pub value: f32,
    pub t_server_seconds: f64,
    /// True when no time sync was established and the receive time was used.
    pub approx: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Debug,
    Error,
    System,
}

/// A structured log line for the aggregation sidecar.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub level: LogLevel,
    pub message: String,
    pub device: Option<String>,
}

/// Device lifecycle notifications. `Offline` terminates a device's data
/// stream: no further `DataEvent` for that device follows it.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Online { name: String, addr: SocketAddr },
    Offline { name: String, addr: SocketAddr },
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EventBus {
    data_tx: broadcast::Sender<DataEvent>,
    log_tx: broadcast::Sender<LogEvent>,
    device_tx: broadcast::Sender<DeviceEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (data_tx, _) = broadcast::channel(DATA_CAPACITY);
        let (log_tx, _) = broadcast::channel(LOG_CAPACITY);
        let (device_tx, _) = broadcast::channel(DEVICE_CAPACITY);
        EventBus {
            data_tx,
            log_tx,
            device_tx,
        }
    }

    pub fn subscribe_data(&self) -> broadcast::Receiver<DataEvent> {
        self.data_tx.subscribe()
    }

    pub fn subscribe_log(&self) -> broadcast::Receiver<LogEvent> {
        self.log_tx.subscribe()
    }

    pub fn subscribe_device(&self) -> broadcast::Receiver<DeviceEvent> {
        self.device_tx.subscribe()
    }

    /// Publish a data event. Zero subscribers is not an error.
    pub fn publish_data(&self, event: DataEvent) {
        let _ = self.data_tx.send(event);
    }

    pub fn publish_log(&self, level: LogLevel, device: Option<&str>, message: impl Into<String>) {
        let _ = self.log_tx.send(LogEvent {
            level,
            message: message.into(),
            device: device.map(str::to_owned),
        });
    }

    pub fn publish_device(&self, event: DeviceEvent) {
        let _ = self.device_tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
