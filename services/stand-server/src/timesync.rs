//! Device-clock reconciliation.
//!
//! DATA timestamps are device-local milliseconds since boot. Network delivery
//! jitter would corrupt inter-sample timing, so instead of stamping samples
//! at receipt the session anchors the device clock to the server clock once
//! per TIMESYNC round trip and projects every subsequent device timestamp
//! through that anchor. The device crystal drifts ~20 ppm, so re-anchoring
//! every 10 minutes keeps the projection within ~12 ms.
//!
//! Both clocks wrap at 32 bits; all deltas are signed differences modulo 2³².

use std::time::Instant;

/// Server monotonic reference frame, anchored at process start.
#[derive(Debug, Clone, Copy)]
pub struct ServerClock {
    origin: Instant,
}

impl ServerClock {
    pub fn start() -> Self {
        ServerClock {
            origin: Instant::now(),
        }
    }

    /// Milliseconds since server start, wrapping at 32 bits. This is the
    /// header timestamp of every server→device packet.
    pub fn now_ms(&self) -> u32 {
        self.origin.elapsed().as_millis() as u32
    }

    /// Seconds since server start, unwrapped. This is the `t_server_seconds`
    /// frame of data events and sample buffers.
    pub fn now_seconds(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Signed difference `t - anchor` modulo 2³², in milliseconds.
fn signed_delta_ms(t: u32, anchor: u32) -> i64 {
    i64::from(t.wrapping_sub(anchor) as i32)
}

// ---------------------------------------------------------------------------
// TimeSync
// ---------------------------------------------------------------------------

/// Outcome of projecting one device timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProjectOutcome {
    Accepted {
        t_server_seconds: f64,
        /// True when the receive-time fallback was used (no anchor yet).
        approx: bool,
    },
    /// Strict mode only: the projected time ran backwards.
    RejectedOutOfOrder {
        t_server_seconds: f64,
        last_accepted: f64,
    },
}

/// Per-device sync state: the current anchor plus ordering bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct TimeSync {
    anchor: Option<(u32, f64)>,
    last_accepted: Option<f64>,
    /// Reject samples whose projected time runs backwards.
    strict: bool,
}

impl TimeSync {
    pub fn new(strict: bool) -> Self {
        TimeSync {
            anchor: None,
            last_accepted: None,
            strict,
        }
    }

    pub fn established(&self) -> bool {
        self.anchor.is_some()
    }

    /// Record a sync anchor: the device timestamp carried in the TIMESYNC
    /// ACK header paired with the server time at ACK receipt.
    pub fn establish(&mut self, device_ms: u32, server_seconds: f64) {
        self.anchor = Some((device_ms, server_seconds));
    }

    /// Project a device timestamp into the server frame.
    ///
    /// Without an anchor the sample falls back to `fallback_now_seconds`
    /// (the receive time) and is flagged approximate.
    pub fn project(&mut self, device_ms: u32, fallback_now_seconds: f64) -> ProjectOutcome {
        let (t, approx) = match self.anchor {
            Some((anchor_device_ms, anchor_seconds)) => {
                let delta = signed_delta_ms(device_ms, anchor_device_ms);
                (anchor_seconds + delta as f64 / 1000.0, false)
            }
            None => (fallback_now_seconds, true),
        };

        if self.strict
            && let Some(last) = self.last_accepted
            && t < last
        {
            return ProjectOutcome::RejectedOutOfOrder {
                t_server_seconds: t,
                last_accepted: last,
            };
        }
        self.last_accepted = Some(t);
        ProjectOutcome::Accepted {
            t_server_seconds: t,
            approx,
        }
    }
}
