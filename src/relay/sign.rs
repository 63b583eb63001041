//! Account chain to EVM: sign teleports and submit the signatures as votes
//!
//! Teleports are handled in ascending id order. A teleport that is not yet
//! irreversible stops the batch; teleports that fail verification or
//! submission are retried next cycle and hold the cursor at their id while
//! later teleports in the batch are still processed.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{submit_action, CycleOutcome, Relay, Submission};
use crate::antelope::serializer::{encode_sign_action, serialize_transfer};
use crate::antelope::transaction::Action;
use crate::antelope::AccountChainApi;
use crate::checkpoint::CheckpointFile;
use crate::endpoints::EndpointPool;
use crate::error::Result;
use crate::finality::IrreversibleTimeTracker;
use crate::metrics;
use crate::signer::AttestationSigner;
use crate::types::TransferEvent;
use crate::verification::CrossValidator;

const DIRECTION: &str = "sign";

/// Settings of the sign relay.
#[derive(Debug, Clone)]
pub struct SignSettings {
    pub contract: String,
    pub oracle: String,
    pub permission: String,
    /// Votes after which a teleport needs no further signatures
    pub confirmations: usize,
    pub batch_size: u32,
    /// Idle wait when nothing is pending
    pub wait_cycle: Duration,
    /// Upper bound of a wait for irreversibility
    pub max_finality_wait: Duration,
    pub dry_run: bool,
}

/// Decision for one teleport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    AlreadyClaimed,
    ThresholdReached,
    AlreadySigned,
    /// Created after the irreversible horizon; seconds until it should pass
    NotYetFinal { wait_secs: u64 },
    Actionable,
}

impl Classification {
    pub fn reason(&self) -> &'static str {
        match self {
            Classification::AlreadyClaimed => "already_claimed",
            Classification::ThresholdReached => "threshold_reached",
            Classification::AlreadySigned => "already_signed",
            Classification::NotYetFinal { .. } => "not_final",
            Classification::Actionable => "actionable",
        }
    }
}

/// Classify a teleport against this oracle and the irreversible horizon
/// (seconds since epoch).
pub fn classify(
    event: &TransferEvent,
    oracle: &str,
    confirmations: usize,
    horizon: u64,
) -> Classification {
    if event.claimed {
        Classification::AlreadyClaimed
    } else if event.oracles.len() >= confirmations {
        Classification::ThresholdReached
    } else if event.has_vote_from(oracle) {
        Classification::AlreadySigned
    } else if u64::from(event.time) > horizon {
        Classification::NotYetFinal {
            wait_secs: u64::from(event.time) - horizon,
        }
    } else {
        Classification::Actionable
    }
}

pub struct SignRelay<C: AccountChainApi> {
    pool: EndpointPool<C>,
    validator: CrossValidator,
    finality: IrreversibleTimeTracker,
    signer: AttestationSigner,
    checkpoint: CheckpointFile,
    settings: SignSettings,
    next_id: u64,
}

impl<C: AccountChainApi> SignRelay<C> {
    /// Create the relay. The start id is `start_id` if given, else the
    /// checkpoint file, else 0.
    pub fn new(
        pool: EndpointPool<C>,
        verifications: usize,
        signer: AttestationSigner,
        checkpoint: CheckpointFile,
        settings: SignSettings,
        start_id: Option<u64>,
    ) -> Result<Self> {
        let next_id = match start_id {
            Some(id) => id,
            None => checkpoint.load()?.unwrap_or(0),
        };
        info!(
            contract = %settings.contract,
            oracle = %settings.oracle,
            signer = %signer.address(),
            next_id,
            dry_run = settings.dry_run,
            "Sign relay initialized"
        );
        metrics::set_checkpoint(DIRECTION, next_id);
        Ok(Self {
            pool,
            validator: CrossValidator::new(&settings.contract, verifications),
            finality: IrreversibleTimeTracker::new(verifications),
            signer,
            checkpoint,
            settings,
            next_id,
        })
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    fn sign_action(&self, event: &TransferEvent, signature: &str) -> Result<Action> {
        let data = encode_sign_action(&self.settings.oracle, event.id, signature)?;
        Ok(Action::new(
            &self.settings.contract,
            "sign",
            &self.settings.oracle,
            &self.settings.permission,
            data,
        ))
    }

    /// Serialize, verify, sign and submit one actionable teleport.
    /// Returns true once the teleport needs no further work from this oracle.
    async fn process(&mut self, event: &TransferEvent, verified: bool, serialized: &[u8]) -> Result<bool> {
        if !verified {
            warn!(
                id = event.id,
                reason = "verification_failed",
                "Serialized teleport does not match verification endpoints, not signing"
            );
            metrics::record_skip(DIRECTION, "verification_failed");
            return Ok(false);
        }

        let signature = self.signer.sign(serialized)?;
        let action = self.sign_action(event, &signature)?;
        debug!(
            id = event.id,
            data = %hex::encode(serialized),
            signature = %signature,
            "Signed teleport"
        );

        if self.settings.dry_run {
            info!(id = event.id, signature = %signature, "Dry run, not submitting sign action");
            metrics::record_vote(DIRECTION, "dry_run");
            return Ok(true);
        }

        match submit_action(&mut self.pool, &action, DIRECTION).await? {
            Submission::Submitted(_) | Submission::AlreadyHandled => Ok(true),
            Submission::Rejected(reason) => {
                error!(id = event.id, reason = %reason, "Sign action rejected by contract");
                Ok(true)
            }
            Submission::GaveUp(e) => {
                warn!(id = event.id, error = %e, "Giving up on teleport for this cycle");
                Ok(false)
            }
        }
    }

    fn advance_cursor(&mut self, next_id: u64) -> Result<()> {
        if next_id == self.next_id {
            return Ok(());
        }
        self.next_id = next_id;
        self.checkpoint.save(next_id)?;
        metrics::set_checkpoint(DIRECTION, next_id);
        Ok(())
    }
}

#[async_trait]
impl<C: AccountChainApi + 'static> Relay for SignRelay<C> {
    fn name(&self) -> &'static str {
        DIRECTION
    }

    async fn run_once(&mut self) -> Result<CycleOutcome> {
        let horizon = self.finality.update(&mut self.pool).await?;
        let batch = self
            .validator
            .fetch(&mut self.pool, self.next_id, self.settings.batch_size)
            .await?;

        debug!(
            from_id = self.next_id,
            rows = batch.events.len(),
            more = batch.more,
            irreversible_time = horizon,
            "Fetched teleports"
        );

        let mut cursor = self.next_id;
        let mut blocked = false;
        let mut finality_wait: Option<u64> = None;

        for (index, event) in batch.events.iter().enumerate() {
            let class = classify(event, &self.settings.oracle, self.settings.confirmations, horizon);
            let resolved = match class {
                Classification::AlreadyClaimed
                | Classification::ThresholdReached
                | Classification::AlreadySigned => {
                    debug!(id = event.id, reason = class.reason(), "Skipping teleport");
                    metrics::record_skip(DIRECTION, class.reason());
                    true
                }
                Classification::NotYetFinal { wait_secs } => {
                    info!(
                        id = event.id,
                        reason = class.reason(),
                        wait_secs,
                        "Teleport not irreversible yet"
                    );
                    metrics::record_skip(DIRECTION, class.reason());
                    finality_wait = Some(wait_secs);
                    break;
                }
                Classification::Actionable => match serialize_transfer(event) {
                    Ok(serialized) => {
                        let verified = batch.verify(index, &serialized);
                        self.process(event, verified, &serialized).await?
                    }
                    Err(e) => {
                        warn!(id = event.id, error = %e, "Could not serialize teleport");
                        metrics::record_skip(DIRECTION, "verification_failed");
                        false
                    }
                },
            };

            if !resolved {
                blocked = true;
            }
            if !blocked {
                cursor = event.id + 1;
            }
        }

        self.advance_cursor(cursor)?;

        let next_poll = match finality_wait {
            Some(secs) => Duration::from_secs(secs).min(self.settings.max_finality_wait),
            None if batch.more && !blocked => Duration::ZERO,
            None => self.settings.wait_cycle,
        };
        Ok(CycleOutcome::after(next_poll))
    }
}
