//! Live device registry.
//!
//! Maps a device's connection address to its session handle. A device is
//! present exactly while its connection is open and its CONFIG was accepted:
//! the session adds itself after the handshake and removes itself on every
//! close path, so the map never holds a dead session.
//!
//! All mutation goes through one async mutex; readers get consistent
//! snapshots, never references into the map.

use crate::session::{CommandError, Submit};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::info;

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Cheap clone-able handle to one live session task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub addr: SocketAddr,
    pub name: String,
    pub kind: String,
    submit_tx: mpsc::Sender<Submit>,
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl SessionHandle {
    pub fn new(
        addr: SocketAddr,
        name: String,
        kind: String,
        submit_tx: mpsc::Sender<Submit>,
        cancel_tx: Arc<watch::Sender<bool>>,
    ) -> Self {
        SessionHandle {
            addr,
            name,
            kind,
            submit_tx,
            cancel_tx,
        }
    }

    /// Enqueue a request on the session's outbound channel.
    ///
    /// Fails with `Disconnected` when the session is already gone.
    pub async fn submit(&self, submit: Submit) -> Result<(), CommandError> {
        self.submit_tx
            .send(submit)
            .await
            .map_err(|_| CommandError::Disconnected)
    }

    /// Ask the session to close. Idempotent; the session unregisters itself.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<HashMap<SocketAddr, SessionHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, handle: SessionHandle) {
        let mut map = self.inner.lock().await;
        if let Some(previous) = map.insert(handle.addr, handle) {
            // Same peer address reconnecting before the old session fully
            // unwound; make sure the stale task dies.
            info!(addr = %previous.addr, "replacing stale session for address");
            previous.cancel();
        }
    }

    /// Free the slot for `addr`. Called by the closing session itself, after
    /// it has failed its waiters, so a successful lookup always yields a
    /// session that can still answer.
    pub async fn remove(&self, addr: SocketAddr) -> Option<SessionHandle> {
        self.inner.lock().await.remove(&addr)
    }

    pub async fn get_by_address(&self, addr: SocketAddr) -> Option<SessionHandle> {
        self.inner.lock().await.get(&addr).cloned()
    }

    pub async fn get_by_name(&self, name: &str) -> Option<SessionHandle> {
        self.inner
            .lock()
            .await
            .values()
            .find(|h| h.name == name)
            .cloned()
    }

    /// Consistent point-in-time listing, sorted by device name.
    pub async fn snapshot_list(&self) -> Vec<SessionHandle> {
        let mut handles: Vec<SessionHandle> = self.inner.lock().await.values().cloned().collect();
        handles.sort_by(|a, b| a.name.cmp(&b.name));
        handles
    }

    /// Cancel a session by address. Removal happens when the session task
    /// unwinds; `None` means the address was not registered.
    pub async fn evict(&self, addr: SocketAddr) -> Option<()> {
        let handle = self.get_by_address(addr).await?;
        handle.cancel();
        Some(())
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
