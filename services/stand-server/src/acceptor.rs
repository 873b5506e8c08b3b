//! TCP acceptor for device connections.
//!
//! One listener, one spawned session task per accept. Per-connection
//! failures (handshake rejects, socket errors) end their own task; the
//! accept loop itself only stops on shutdown.

use crate::session::{SessionContext, run_session};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

/// Bind the device listener.
pub async fn bind(addr: &str) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "device listener bound");
    Ok(listener)
}

/// Accept loop: runs until shutdown.
pub async fn run(
    listener: TcpListener,
    ctx: SessionContext,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        spawn_session(stream, peer, ctx.clone(), shutdown.clone());
                    }
                    Err(e) => {
                        // Transient accept errors (EMFILE, resets) must not
                        // kill the listener.
                        warn!(error = %e, "accept failed");
                    }
                }
            }
        }
    }
}

fn spawn_session(
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    ctx: SessionContext,
    shutdown: watch::Receiver<bool>,
) {
    info!(peer = %peer, "device connected");
    if let Err(e) = stream.set_nodelay(true) {
        warn!(peer = %peer, error = %e, "could not set TCP_NODELAY");
    }
    tokio::spawn(run_session(stream, peer, ctx, shutdown));
}
