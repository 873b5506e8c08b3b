//! Command dispatcher.
//!
//! The request-oriented surface the REST/CLI adapters call into. Every
//! method resolves a device by name through the registry, enqueues on the
//! session's outbound channel, and awaits the correlated completion. The
//! session enforces the per-request deadline; the dispatcher adds a slightly
//! longer outer timeout so a wedged session can never hang a caller.

use crate::bus::DataEvent;
use crate::device::{DeviceSnapshot, SampleDump};
use crate::registry::Registry;
use crate::session::{CommandError, Submit};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use stand_protocol::{ControlState, DeviceStatus, ErrorCode};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("no such device")]
    NoSuchDevice,
    #[error("no control with that name")]
    NoSuchName,
    #[error("timed out waiting for device response")]
    Timeout,
    #[error("device NACK({0})")]
    Nack(ErrorCode),
    #[error("device disconnected")]
    Disconnected,
}

impl From<CommandError> for DispatchError {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::NoSuchName => DispatchError::NoSuchName,
            CommandError::Nack(code) => DispatchError::Nack(code),
            CommandError::Timeout => DispatchError::Timeout,
            CommandError::Disconnected => DispatchError::Disconnected,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("writing CSV: {0}")]
    Io(String),
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Dispatcher {
    registry: Registry,
    discovery_tx: mpsc::Sender<()>,
    /// Outer guard on waiter completion; the session's own deadline fires
    /// first on a live session.
    reply_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Registry, discovery_tx: mpsc::Sender<()>, ack_timeout: Duration) -> Self {
        Dispatcher {
            registry,
            discovery_tx,
            reply_timeout: ack_timeout + Duration::from_secs(1),
        }
    }

    /// Trigger one SSDP discovery burst.
    pub fn discover(&self) {
        // A full trigger queue already has a burst coming; dropping is fine.
        let _ = self.discovery_tx.try_send(());
    }

    /// Snapshot every registered device.
    pub async fn list(&self) -> Vec<DeviceSnapshot> {
        let mut snapshots = Vec::new();
        for handle in self.registry.snapshot_list().await {
            let (reply, rx) = oneshot::channel();
            if handle.submit(Submit::Snapshot { reply }).await.is_err() {
                continue;
            }
            if let Ok(Ok(snapshot)) = tokio::time::timeout(self.reply_timeout, rx).await {
                snapshots.push(snapshot);
            }
        }
        snapshots
    }

    pub async fn status(&self, device: &str) -> Result<DeviceStatus, DispatchError> {
        let handle = self.resolve(device).await?;
        let (reply, rx) = oneshot::channel();
        handle.submit(Submit::StatusRequest { reply }).await?;
        self.await_reply(rx).await
    }

    /// One-shot sample from every sensor on the device.
    pub async fn get_single(&self, device: &str) -> Result<Vec<DataEvent>, DispatchError> {
        let handle = self.resolve(device).await?;
        let (reply, rx) = oneshot::channel();
        handle.submit(Submit::GetSingle { reply }).await?;
        self.await_reply(rx).await
    }

    pub async fn start_stream(&self, device: &str, freq_hz: u16) -> Result<(), DispatchError> {
        if freq_hz == 0 {
            // The device would NACK this; save the round trip.
            return Err(DispatchError::Nack(ErrorCode::InvalidParam));
        }
        let handle = self.resolve(device).await?;
        let (reply, rx) = oneshot::channel();
        handle.submit(Submit::StreamStart { freq_hz, reply }).await?;
        self.await_reply(rx).await
    }

    pub async fn stop_stream(&self, device: &str) -> Result<(), DispatchError> {
        let handle = self.resolve(device).await?;
        let (reply, rx) = oneshot::channel();
        handle.submit(Submit::StreamStop { reply }).await?;
        self.await_reply(rx).await
    }

    pub async fn control(
        &self,
        device: &str,
        control: &str,
        state: ControlState,
    ) -> Result<(), DispatchError> {
        let handle = self.resolve(device).await?;
        let (reply, rx) = oneshot::channel();
        handle
            .submit(Submit::Control {
                name: control.to_owned(),
                state,
                reply,
            })
            .await?;
        self.await_reply(rx).await
    }

    /// Write ESTOP to every registered device. Returns once every write is
    /// queued; no ACK is awaited. Returns the number of devices reached.
    pub async fn estop_all(&self) -> usize {
        let handles = self.registry.snapshot_list().await;
        info!(devices = handles.len(), "ESTOP broadcast");
        let mut waits = Vec::new();
        for handle in handles {
            let (done, rx) = oneshot::channel();
            if handle.submit(Submit::Estop { done }).await.is_ok() {
                waits.push(rx);
            }
        }
        let results = futures_util::future::join_all(waits).await;
        results.into_iter().filter(Result::is_ok).count()
    }

    /// Dump a device's sample buffers to a CSV file in `dir`.
    pub async fn dump_csv(&self, device: &str, dir: &Path) -> Result<PathBuf, DumpError> {
        let dump = self.sample_dump(device).await?;
        crate::export::write_csv(&dump, dir).map_err(|e| DumpError::Io(e.to_string()))
    }

    pub async fn sample_dump(&self, device: &str) -> Result<SampleDump, DispatchError> {
        let handle = self.resolve(device).await?;
        let (reply, rx) = oneshot::channel();
        handle.submit(Submit::SampleDump { reply }).await?;
        tokio::time::timeout(self.reply_timeout, rx)
            .await
            .map_err(|_| DispatchError::Timeout)?
            .map_err(|_| DispatchError::Disconnected)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn resolve(&self, device: &str) -> Result<crate::registry::SessionHandle, DispatchError> {
        self.registry
            .get_by_name(device)
            .await
            .ok_or(DispatchError::NoSuchDevice)
    }

    async fn await_reply<T>(
        &self,
        rx: oneshot::Receiver<Result<T, CommandError>>,
    ) -> Result<T, DispatchError> {
        let outcome = tokio::time::timeout(self.reply_timeout, rx)
            .await
            .map_err(|_| DispatchError::Timeout)?
            .map_err(|_| DispatchError::Disconnected)?;
        outcome.map_err(DispatchError::from)
    }
}
