//! EVM finality by block depth, plus per-event quorum confirmation

use alloy::primitives::Address;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::endpoints::EndpointPool;
use crate::error::{OracleError, Result};
use crate::evm::events::{InboundEvent, InboundKind, CLAIMED_TOPIC, TELEPORT_TOPIC};
use crate::evm::EvmApi;
use crate::metrics;

/// Result of confirming one event against a quorum of endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Included, successful and below the safe horizon on every endpoint asked
    Confirmed,
    /// Not deep enough yet, or some endpoint has no receipt
    Pending,
    /// Reported removed, reverted or moved by at least one endpoint
    Removed,
}

#[derive(Debug, Clone)]
pub struct EvmFinality {
    blocks_to_wait: u64,
    verifications: usize,
    horizon: Option<u64>,
}

impl EvmFinality {
    pub fn new(blocks_to_wait: u64, verifications: usize) -> Self {
        Self {
            blocks_to_wait,
            verifications: verifications.max(1),
            horizon: None,
        }
    }

    pub fn horizon(&self) -> Option<u64> {
        self.horizon
    }

    /// Safe horizon for a given head: `latest - blocks_to_wait`, never lower
    /// than a horizon already returned.
    pub fn horizon_for(&mut self, latest: u64) -> u64 {
        let candidate = latest.saturating_sub(self.blocks_to_wait);
        let horizon = self.horizon.map_or(candidate, |known| known.max(candidate));
        self.horizon = Some(horizon);
        horizon
    }

    /// Latest block and safe horizon from the current endpoint.
    pub async fn refresh<C: EvmApi>(&mut self, pool: &mut EndpointPool<C>) -> Result<(u64, u64)> {
        pool.ensure_current().await?;
        let client = pool.client()?;
        let latest = client.block_number().await?;
        let horizon = self.horizon_for(latest);
        metrics::set_finality_horizon(pool.chain(), horizon);
        Ok((latest, horizon))
    }

    /// Check one endpoint's view of `event`.
    async fn confirm_on<C: EvmApi>(
        &self,
        client: &C,
        contract: Address,
        event: &InboundEvent,
        horizon: u64,
    ) -> Result<Confirmation> {
        let Some(receipt) = client.transaction_receipt(event.tx_hash).await? else {
            return Ok(Confirmation::Pending);
        };
        if !receipt.success || receipt.block_number != event.block_number {
            return Ok(Confirmation::Removed);
        }
        if receipt.block_number > horizon {
            return Ok(Confirmation::Pending);
        }

        let topic = match event.kind {
            InboundKind::Teleport(_) => TELEPORT_TOPIC,
            InboundKind::Claimed(_) => CLAIMED_TOPIC,
        };
        let logs = client
            .get_logs(contract, topic, event.block_number, event.block_number)
            .await?;
        let present = logs.iter().any(|l| {
            l.tx_hash == event.tx_hash && l.log_index == event.log_index && !l.removed
        });
        Ok(if present {
            Confirmation::Confirmed
        } else {
            Confirmation::Removed
        })
    }

    /// Confirm `event` on `verifications` distinct endpoints, starting at the
    /// current one.
    ///
    /// Any `Removed` answer wins, then any `Pending`. Endpoint errors rotate to
    /// the next endpoint; a full rotation without enough answers is a
    /// transient `EndpointUnavailable`.
    pub async fn confirm<C: EvmApi>(
        &self,
        pool: &mut EndpointPool<C>,
        contract: Address,
        event: &InboundEvent,
        horizon: u64,
    ) -> Result<Confirmation> {
        if pool.len() < self.verifications {
            return Err(OracleError::NotEnoughEndpoints {
                required: self.verifications,
            });
        }

        let start = pool.ensure_current().await?.url;
        let mut answered: HashSet<String> = HashSet::new();
        let mut pending = false;

        loop {
            let client = pool.client()?;
            let endpoint = client.endpoint().to_string();
            if !answered.contains(&endpoint) {
                match self.confirm_on(client.as_ref(), contract, event, horizon).await {
                    Ok(Confirmation::Removed) => {
                        warn!(
                            endpoint = %endpoint,
                            tx_hash = %event.tx_hash,
                            block = event.block_number,
                            "Log reported removed"
                        );
                        return Ok(Confirmation::Removed);
                    }
                    Ok(c) => {
                        pending |= c == Confirmation::Pending;
                        answered.insert(endpoint);
                    }
                    Err(e) => {
                        warn!(endpoint = %endpoint, error = %e, "Failed to confirm event");
                    }
                }
            }

            if answered.len() >= self.verifications {
                break;
            }
            let next = pool.advance().await?;
            if next.url == start {
                return Err(OracleError::EndpointUnavailable {
                    endpoint: start,
                    reason: format!(
                        "only {} of {} endpoints confirmed {}",
                        answered.len(),
                        self.verifications,
                        event.tx_hash
                    ),
                });
            }
        }

        debug!(tx_hash = %event.tx_hash, pending, "Event confirmation");
        Ok(if pending {
            Confirmation::Pending
        } else {
            Confirmation::Confirmed
        })
    }
}
