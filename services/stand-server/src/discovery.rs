//! SSDP device discovery.
//!
//! The server advertises nothing and parses no replies: it multicasts an
//! `M-SEARCH` and devices answer by opening a TCP connection to the
//! datagram's source address. That keeps discovery one-way and idempotent --
//! a burst while every device is already connected is a no-op.
//!
//! Bursts fire at startup, on operator trigger, and optionally on a timer.

use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Standard SSDP multicast group.
pub const SSDP_ADDR: &str = "239.255.255.250:1900";

/// Search target answered by the stand's embedded devices.
pub const SEARCH_TARGET: &str = "urn:qretprop:espdevice:1";

const USER_AGENT: &str = "QRET/1.0";

/// Datagrams per burst; SSDP is UDP, repetition covers loss.
const BURST_COUNT: u32 = 3;
const BURST_SPACING: Duration = Duration::from_millis(100);

/// Build the M-SEARCH datagram.
///
/// The HOST header always names the multicast group, per SSDP.
fn build_msearch() -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: 239.255.255.250:1900\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: 2\r\n\
         ST: {SEARCH_TARGET}\r\n\
         USER-AGENT: {USER_AGENT}\r\n\
         \r\n"
    )
}

/// Send one burst of M-SEARCH datagrams.
///
/// Send failures are logged and swallowed: discovery must never take the
/// server down, and the devices will retry on their own heartbeat schedule.
pub async fn send_burst() {
    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(socket) => socket,
        Err(e) => {
            warn!(error = %e, "could not open discovery socket");
            return;
        }
    };
    let message = build_msearch();
    for i in 0..BURST_COUNT {
        if i > 0 {
            tokio::time::sleep(BURST_SPACING).await;
        }
        match socket.send_to(message.as_bytes(), SSDP_ADDR).await {
            Ok(_) => debug!(datagram = i + 1, "M-SEARCH sent"),
            Err(e) => warn!(error = %e, "M-SEARCH send failed"),
        }
    }
}

/// Run the discovery loop: one burst now, one per trigger, and optionally
/// one every `periodic` interval.
pub async fn run(
    mut trigger_rx: mpsc::Receiver<()>,
    periodic: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
) {
    send_burst().await;
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            trigger = trigger_rx.recv() => {
                match trigger {
                    Some(()) => send_burst().await,
                    None => return,
                }
            }
            () = sleep_or_forever(periodic) => {
                send_burst().await;
            }
        }
    }
}

async fn sleep_or_forever(period: Option<Duration>) {
    match period {
        Some(period) => tokio::time::sleep(period).await,
        None => std::future::pending().await,
    }
}
