//! Process driver: runs one relay in a loop until shutdown
//!
//! Waits between cycles are slept in short slices so a shutdown request is
//! seen within one slice. Transient errors back off with jitter; fatal
//! errors stop the relay and are returned to the caller.

use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::metrics;
use crate::relay::Relay;
use crate::retry::RetryConfig;

/// Default length of one sleep slice.
pub const SLEEP_SLICE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct Driver {
    retry: RetryConfig,
    slice: Duration,
}

impl Default for Driver {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl Driver {
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            retry,
            slice: SLEEP_SLICE,
        }
    }

    pub fn with_slice(mut self, slice: Duration) -> Self {
        self.slice = slice;
        self
    }

    /// Sleep for `duration` in slices. Returns true if shutdown was requested.
    pub async fn sleep(&self, duration: Duration, shutdown: &watch::Receiver<bool>) -> bool {
        let mut remaining = duration;
        while !remaining.is_zero() {
            if *shutdown.borrow() {
                return true;
            }
            let step = remaining.min(self.slice);
            tokio::time::sleep(step).await;
            remaining = remaining.saturating_sub(step);
        }
        *shutdown.borrow()
    }

    /// Run `relay` until shutdown or a fatal error.
    pub async fn run<R: Relay>(&self, mut relay: R, shutdown: watch::Receiver<bool>) -> Result<()> {
        let name = relay.name();
        info!(relay = name, "Relay started");
        let mut failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let wait = match relay.run_once().await {
                Ok(outcome) => {
                    failures = 0;
                    if !outcome.next_poll.is_zero() {
                        debug!(relay = name, wait_secs = outcome.next_poll.as_secs(), "Waiting");
                    }
                    outcome.next_poll
                }
                Err(e) if e.is_fatal() => {
                    error!(relay = name, error = %e, "Fatal error, stopping relay");
                    metrics::record_error(name, e.kind());
                    return Err(e);
                }
                Err(e) => {
                    let backoff = self.retry.jittered_backoff(failures);
                    failures = failures.saturating_add(1);
                    warn!(
                        relay = name,
                        error = %e,
                        failures,
                        backoff_ms = backoff.as_millis() as u64,
                        "Cycle failed, backing off"
                    );
                    metrics::record_error(name, e.kind());
                    backoff
                }
            };

            if self.sleep(wait, &shutdown).await {
                break;
            }
        }

        info!(relay = name, "Relay stopped");
        Ok(())
    }
}
