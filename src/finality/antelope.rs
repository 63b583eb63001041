//! Account chain irreversibility, tracked as a time horizon
//!
//! Each update asks `verifications` distinct endpoints for their last
//! irreversible block time and keeps the minimum. An endpoint that reports a
//! time older than the horizon already seen in this process is treated as a
//! failed endpoint, so the horizon never moves backwards.

use tracing::{debug, warn};

use crate::antelope::{parse_block_time, AccountChainApi};
use crate::endpoints::EndpointPool;
use crate::error::{OracleError, Result};
use crate::metrics;

#[derive(Debug, Clone)]
pub struct IrreversibleTimeTracker {
    verifications: usize,
    /// Last irreversible time in seconds since epoch
    horizon: Option<u64>,
}

impl IrreversibleTimeTracker {
    pub fn new(verifications: usize) -> Self {
        Self {
            verifications: verifications.max(1),
            horizon: None,
        }
    }

    pub fn horizon(&self) -> Option<u64> {
        self.horizon
    }

    /// Fails with `TimeRegression` if `reported` is older than the known
    /// horizon.
    pub fn check_monotonic(&self, endpoint: &str, reported: u64) -> Result<()> {
        match self.horizon {
            Some(known) if reported < known => Err(OracleError::TimeRegression {
                endpoint: endpoint.to_string(),
                known,
                reported,
            }),
            _ => Ok(()),
        }
    }

    /// Irreversible time reported by one endpoint, floored to seconds.
    pub async fn irreversible_time<C: AccountChainApi>(client: &C) -> Result<u64> {
        let info = client.get_info().await?;
        let raw = match info.last_irreversible_block_time {
            Some(t) if !t.is_empty() => t,
            _ => {
                client
                    .get_block_timestamp(info.last_irreversible_block_num)
                    .await?
            }
        };
        let time = parse_block_time(&raw)?;
        u64::try_from(time.timestamp()).map_err(|_| {
            OracleError::Serialization(format!("Irreversible time {} before epoch", raw))
        })
    }

    /// Recompute the horizon from a quorum of endpoints.
    ///
    /// Starts at the pool's current endpoint and rotates after every query.
    /// Fails with `NoQuorumForFinality` if the rotation returns to the first
    /// endpoint before enough endpoints answered.
    pub async fn update<C: AccountChainApi>(&mut self, pool: &mut EndpointPool<C>) -> Result<u64> {
        let start = pool.ensure_current().await?.url;
        let mut times: Vec<u64> = Vec::with_capacity(self.verifications);

        loop {
            let client = pool.client()?;
            let endpoint = client.endpoint().to_string();

            let result = match Self::irreversible_time(client.as_ref()).await {
                Ok(t) => self.check_monotonic(&endpoint, t).map(|_| t),
                Err(e) => Err(e),
            };
            match result {
                Ok(t) => {
                    debug!(endpoint = %endpoint, irreversible_time = t, "Irreversible time");
                    times.push(t);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "Failed to get irreversible time");
                }
            }

            // Rotate even after the last answer so the next caller starts
            // on a fresh endpoint.
            let next = pool.advance().await?;
            if times.len() >= self.verifications {
                break;
            }
            if next.url == start {
                return Err(OracleError::NoQuorumForFinality);
            }
        }

        let min = times.iter().copied().min().unwrap_or_default();
        let horizon = self.horizon.map_or(min, |known| known.max(min));
        self.horizon = Some(horizon);
        metrics::set_finality_horizon(pool.chain(), horizon);
        Ok(horizon)
    }
}
