//! Leading-edge message-rate limiter.
//!
//! The first message passes immediately; messages arriving inside the
//! minimum gap are dropped. Forwarding never reorders. Built on the tokio
//! clock so paused-time tests are deterministic.

use std::time::Duration;

use tokio::time::Instant;

pub struct Throttle {
    min_gap: Duration,
    last_emit: Option<Instant>,
}

impl Throttle {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last_emit: None,
        }
    }

    /// True when the message may be forwarded; records the emit time.
    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.min_gap => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }
}
