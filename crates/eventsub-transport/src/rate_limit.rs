//! Outbound send pacing.
//!
//! Every chat send goes through one [`SendThrottle`], whatever channel or
//! command produced it. Completed sends are never closer together than the
//! configured minimum interval.

use std::{future::Future, time::Duration};

use tokio::{
    sync::Mutex,
    time::{Instant, sleep_until},
};
use tracing::debug;

/// A single global minimum-interval gate.
#[derive(Debug)]
pub struct SendThrottle {
    min_interval: Duration,
    // Held across the wait and the send so callers are served in FIFO order.
    last_send: Mutex<Option<Instant>>,
}

impl Default for SendThrottle {
    fn default() -> Self {
        Self::new(Duration::from_millis(1200))
    }
}

impl SendThrottle {
    /// Create a throttle with the given minimum interval between sends.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_send: Mutex::new(None),
        }
    }

    /// Run `send` once the interval since the previous completed send has
    /// elapsed, then record its completion time.
    ///
    /// The completion time is recorded whether or not `send` succeeded: a
    /// failed request still reached the remote API.
    pub async fn run<F, Fut, T>(&self, send: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut last_send = self.last_send.lock().await;

        if let Some(last) = *last_send {
            let ready_at = last + self.min_interval;
            if ready_at > Instant::now() {
                debug!(wait = ?(ready_at - Instant::now()), "Pacing outbound send");
                sleep_until(ready_at).await;
            }
        }

        let output = send().await;
        *last_send = Some(Instant::now());
        output
    }
}
