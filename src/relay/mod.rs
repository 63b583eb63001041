//! Relays between the two chains
//!
//! - `sign`: account chain teleports are signed for the EVM contract and the
//!   signature is pushed back to the account chain as a vote
//! - `receipt`: EVM `Teleport` and `Claimed` logs are reported to the
//!   account chain contract

pub mod receipt;
pub mod sign;

use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

use crate::antelope::transaction::Action;
use crate::antelope::AccountChainApi;
use crate::endpoints::EndpointPool;
use crate::error::{OracleError, Result};
use crate::metrics;
use crate::rejection::{classify_submission_error, RejectionKind};

pub use receipt::ReceiptRelay;
pub use sign::SignRelay;

/// What a relay cycle asks of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Delay before the next cycle; zero to continue immediately
    pub next_poll: Duration,
}

impl CycleOutcome {
    pub fn after(next_poll: Duration) -> Self {
        Self { next_poll }
    }

    pub fn immediately() -> Self {
        Self {
            next_poll: Duration::ZERO,
        }
    }
}

/// One relay direction as driven by the process loop.
#[async_trait]
pub trait Relay: Send {
    /// Name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Run one polling cycle.
    async fn run_once(&mut self) -> Result<CycleOutcome>;
}

/// Result of submitting one action.
#[derive(Debug)]
pub enum Submission {
    /// Pushed; carries the transaction id
    Submitted(String),
    /// The contract already applied this action
    AlreadyHandled,
    /// The contract will never accept this action
    Rejected(String),
    /// Every attempt failed with a retryable error
    GaveUp(OracleError),
}

/// Push `action`, rotating endpoints between attempts.
///
/// Makes one attempt per endpoint in the pool. Authorization failures are
/// returned as errors so the caller stops; every other outcome is a
/// `Submission`.
pub async fn submit_action<C: AccountChainApi>(
    pool: &mut EndpointPool<C>,
    action: &Action,
    direction: &str,
) -> Result<Submission> {
    pool.ensure_current().await?;
    let attempts = pool.len().max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        let client = pool.client()?;
        match client.push_action(action.clone()).await {
            Ok(tx_id) => {
                info!(
                    direction,
                    action = %action.name,
                    endpoint = %client.endpoint(),
                    tx_id = %tx_id,
                    "Action submitted"
                );
                metrics::record_vote(direction, "success");
                return Ok(Submission::Submitted(tx_id));
            }
            Err(e) => match classify_submission_error(&e) {
                RejectionKind::AlreadyHandled => {
                    info!(direction, action = %action.name, reason = %e, "Already handled");
                    metrics::record_vote(direction, "already_handled");
                    return Ok(Submission::AlreadyHandled);
                }
                RejectionKind::Unauthorized => {
                    metrics::record_vote(direction, "unauthorized");
                    return Err(match e {
                        OracleError::Unauthorized(_) => e,
                        other => OracleError::Unauthorized(other.to_string()),
                    });
                }
                RejectionKind::Permanent => {
                    warn!(direction, action = %action.name, reason = %e, "Action rejected");
                    metrics::record_vote(direction, "rejected");
                    return Ok(Submission::Rejected(e.to_string()));
                }
                RejectionKind::Retryable => {
                    warn!(
                        direction,
                        action = %action.name,
                        endpoint = %client.endpoint(),
                        attempt,
                        attempts,
                        error = %e,
                        "Submission failed, trying next endpoint"
                    );
                    metrics::record_error(direction, e.kind());
                    last_error = Some(e);
                    if attempt < attempts {
                        pool.advance().await?;
                    }
                }
            },
        }
    }

    metrics::record_vote(direction, "failed");
    Ok(Submission::GaveUp(last_error.unwrap_or_else(|| {
        OracleError::Transport("No submission attempt made".to_string())
    })))
}
