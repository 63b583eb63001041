//! EVM to account chain: report `Teleport` and `Claimed` logs
//!
//! Scans block ranges from a persisted checkpoint. Every log in a range is
//! handled on its own; one failing log never blocks the others. Logs that
//! are not final yet, that some endpoint reports removed, or whose
//! submission gave up are retried by holding the checkpoint below their
//! block. A log really dropped by a reorg is gone from the rescan.

use alloy::primitives::Address;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{submit_action, CycleOutcome, Relay, Submission};
use crate::antelope::{AccountChainApi, TableQuery};
use crate::checkpoint::{resume_block, CheckpointFile};
use crate::config::TokenConfig;
use crate::endpoints::EndpointPool;
use crate::error::Result;
use crate::evm::events::{decode_log, InboundEvent, InboundKind, CLAIMED_TOPIC, TELEPORT_TOPIC};
use crate::evm::EvmApi;
use crate::finality::{Confirmation, EvmFinality};
use crate::metrics;
use crate::types::{Checksum256, ReceiptEvent};
use crate::verification::read_table_rows;

const DIRECTION: &str = "receipt";

/// Settings of the receipt relay.
#[derive(Debug, Clone)]
pub struct ReceiptSettings {
    /// Account chain teleport contract
    pub contract: String,
    pub oracle: String,
    pub permission: String,
    /// EVM teleport contract
    pub evm_contract: Address,
    pub token: TokenConfig,
    pub max_block_range: u64,
    pub genesis_block: u64,
    pub rewind_margin: u64,
    /// Blocks behind head to start from without a checkpoint
    pub initial_lookback: u64,
    pub catch_up_threshold: u64,
    pub idle_poll: Duration,
    pub dry_run: bool,
}

/// What happened to one log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogOutcome {
    /// Reported, already reported, or never reportable
    Done,
    /// Retry on a later cycle
    Deferred,
}

pub struct ReceiptRelay<A: AccountChainApi, E: EvmApi> {
    antelope: EndpointPool<A>,
    evm: EndpointPool<E>,
    finality: EvmFinality,
    checkpoint: CheckpointFile,
    settings: ReceiptSettings,
    start_block: Option<u64>,
    next_block: Option<u64>,
}

impl<A: AccountChainApi, E: EvmApi> ReceiptRelay<A, E> {
    pub fn new(
        antelope: EndpointPool<A>,
        evm: EndpointPool<E>,
        finality: EvmFinality,
        checkpoint: CheckpointFile,
        settings: ReceiptSettings,
        start_block: Option<u64>,
    ) -> Self {
        info!(
            evm_contract = %settings.evm_contract,
            contract = %settings.contract,
            oracle = %settings.oracle,
            dry_run = settings.dry_run,
            "Receipt relay initialized"
        );
        Self {
            antelope,
            evm,
            finality,
            checkpoint,
            settings,
            start_block,
            next_block: None,
        }
    }

    pub fn next_block(&self) -> Option<u64> {
        self.next_block
    }

    /// First block to scan: the override, else the checkpoint rewound by the
    /// safety margin, else a fixed lookback from the head.
    fn initial_block(&self, latest: u64) -> Result<u64> {
        let genesis = self.settings.genesis_block;
        if let Some(block) = self.start_block {
            info!(block, "Starting from configured block");
            return Ok(block.max(genesis));
        }
        match self.checkpoint.load()? {
            Some(saved) => {
                let from = resume_block(saved, self.settings.rewind_margin, genesis);
                info!(saved, from, "Resuming from saved block with safety margin");
                Ok(from)
            }
            None => {
                let from = latest
                    .saturating_sub(self.settings.initial_lookback)
                    .max(genesis);
                info!(from, "No saved block, starting behind head");
                Ok(from)
            }
        }
    }

    /// Decoded events in `[from, to]`, plus the earliest block of a log the
    /// endpoint flagged removed.
    async fn fetch_events(&mut self, from: u64, to: u64) -> Result<(Vec<InboundEvent>, Option<u64>)> {
        let client = self.evm.client()?;
        let mut events = Vec::new();
        let mut held: Option<u64> = None;
        // Claims first so a claim and a teleport in one range keep that order
        for topic in [CLAIMED_TOPIC, TELEPORT_TOPIC] {
            let mut logs = client
                .get_logs(self.settings.evm_contract, topic, from, to)
                .await?;
            logs.sort_by_key(|l| (l.block_number, l.log_index));
            for log in logs {
                if log.removed {
                    warn!(
                        tx_hash = %log.tx_hash,
                        block = log.block_number,
                        reason = "removed",
                        "Log flagged removed, holding checkpoint"
                    );
                    metrics::record_skip(DIRECTION, "removed");
                    held = Some(held.map_or(log.block_number, |b| b.min(log.block_number)));
                    continue;
                }
                match decode_log(&log, &self.settings.token) {
                    Ok(event) => events.push(event),
                    Err(e) => {
                        warn!(
                            tx_hash = %log.tx_hash,
                            block = log.block_number,
                            reason = "invalid_event",
                            error = %e,
                            "Skipping undecodable log"
                        );
                        metrics::record_skip(DIRECTION, "invalid_event");
                    }
                }
            }
        }
        Ok((events, held))
    }

    /// Look up an existing receipt for `source_ref`. Only a shortcut; the
    /// contract still rejects duplicate approvals.
    async fn existing_receipt(&mut self, source_ref: &Checksum256) -> Result<Option<ReceiptEvent>> {
        let key = source_ref.to_hex();
        let query = TableQuery {
            json: true,
            code: self.settings.contract.clone(),
            scope: self.settings.contract.clone(),
            table: "receipts".to_string(),
            lower_bound: Some(key.clone()),
            upper_bound: Some(key),
            limit: 1,
            index_position: Some("2".to_string()),
            key_type: Some("sha256".to_string()),
        };
        let rows = read_table_rows(&mut self.antelope, &query).await?;
        for row in rows.rows {
            let receipt: ReceiptEvent = serde_json::from_value(row)?;
            if receipt.source_ref == *source_ref {
                return Ok(Some(receipt));
            }
        }
        Ok(None)
    }

    async fn handle(&mut self, event: &InboundEvent, horizon: u64) -> Result<LogOutcome> {
        let label = event.label();
        match self
            .finality
            .confirm(&mut self.evm, self.settings.evm_contract, event, horizon)
            .await
        {
            Ok(Confirmation::Confirmed) => {}
            Ok(Confirmation::Pending) => {
                debug!(event = label, tx_hash = %event.tx_hash, reason = "not_final", "Waiting for confirmations");
                metrics::record_skip(DIRECTION, "not_final");
                return Ok(LogOutcome::Deferred);
            }
            Ok(Confirmation::Removed) => {
                warn!(
                    event = label,
                    tx_hash = %event.tx_hash,
                    reason = "removed",
                    "Log reported removed, retrying next cycle"
                );
                metrics::record_skip(DIRECTION, "removed");
                return Ok(LogOutcome::Deferred);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(event = label, tx_hash = %event.tx_hash, error = %e, "Could not confirm log");
                return Ok(LogOutcome::Deferred);
            }
        }

        if let InboundKind::Teleport(teleport) = &event.kind {
            match self.existing_receipt(&teleport.source_ref).await {
                Ok(Some(receipt)) if receipt.completed || receipt.approved_by(&self.settings.oracle) => {
                    let reason = if receipt.completed {
                        "already_completed"
                    } else {
                        "already_approved"
                    };
                    debug!(tx_hash = %event.tx_hash, reason, "Receipt needs no vote");
                    metrics::record_skip(DIRECTION, reason);
                    return Ok(LogOutcome::Done);
                }
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    debug!(tx_hash = %event.tx_hash, error = %e, "Receipt lookup failed, submitting anyway");
                }
            }
        }

        let action = match event.to_action(
            &self.settings.contract,
            &self.settings.oracle,
            &self.settings.permission,
        ) {
            Ok(a) => a,
            Err(e) => {
                warn!(tx_hash = %event.tx_hash, error = %e, "Could not build action");
                metrics::record_skip(DIRECTION, "invalid_event");
                return Ok(LogOutcome::Done);
            }
        };

        if self.settings.dry_run {
            info!(
                event = label,
                tx_hash = %event.tx_hash,
                block = event.block_number,
                "Dry run, not submitting"
            );
            metrics::record_vote(DIRECTION, "dry_run");
            return Ok(LogOutcome::Done);
        }

        match submit_action(&mut self.antelope, &action, DIRECTION).await? {
            Submission::Submitted(tx_id) => {
                info!(event = label, tx_hash = %event.tx_hash, tx_id = %tx_id, "Reported log");
                Ok(LogOutcome::Done)
            }
            Submission::AlreadyHandled => Ok(LogOutcome::Done),
            Submission::Rejected(reason) => {
                error!(event = label, tx_hash = %event.tx_hash, reason = %reason, "Report rejected by contract");
                Ok(LogOutcome::Done)
            }
            Submission::GaveUp(e) => {
                warn!(event = label, tx_hash = %event.tx_hash, error = %e, "Giving up on log for this cycle");
                Ok(LogOutcome::Deferred)
            }
        }
    }

    fn save_checkpoint(&mut self, last_done: u64) -> Result<()> {
        self.checkpoint.save(last_done)?;
        metrics::set_checkpoint(DIRECTION, last_done);
        Ok(())
    }
}

#[async_trait]
impl<A, E> Relay for ReceiptRelay<A, E>
where
    A: AccountChainApi + 'static,
    E: EvmApi + 'static,
{
    fn name(&self) -> &'static str {
        DIRECTION
    }

    async fn run_once(&mut self) -> Result<CycleOutcome> {
        let (latest, horizon) = self.finality.refresh(&mut self.evm).await?;
        let from = match self.next_block {
            Some(b) => b,
            None => {
                let b = self.initial_block(latest)?;
                self.next_block = Some(b);
                b
            }
        };

        if from > latest {
            debug!(from, latest, "Up to date");
            return Ok(CycleOutcome::after(self.settings.idle_poll));
        }
        let to = from
            .saturating_add(self.settings.max_block_range)
            .min(latest);

        info!(from, to, latest, "Getting events");
        let (events, held) = match self.fetch_events(from, to).await {
            Ok(fetched) => fetched,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                // Range read failed; rotate so the next attempt uses another node
                self.evm.advance().await?;
                return Err(e);
            }
        };

        let mut earliest_deferred = held;
        for event in &events {
            if self.handle(event, horizon).await? == LogOutcome::Deferred {
                earliest_deferred = Some(
                    earliest_deferred.map_or(event.block_number, |b| b.min(event.block_number)),
                );
            }
        }

        let next = match earliest_deferred {
            Some(block) => {
                info!(block, "Holding checkpoint at deferred log");
                block
            }
            None => to + 1,
        };
        if next > from {
            self.save_checkpoint(next - 1)?;
        }
        self.next_block = Some(next);

        let behind = latest.saturating_sub(to);
        let next_poll = if earliest_deferred.is_none() && behind > self.settings.catch_up_threshold {
            debug!(behind, "Catching up, not waiting");
            Duration::ZERO
        } else {
            self.settings.idle_poll
        };
        Ok(CycleOutcome::after(next_poll))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::temp_path;
    use crate::error::OracleError;
    use crate::evm::events::tests::{claimed_log, teleport_log, token};
    use crate::evm::ReceiptStatus;
    use crate::testing::{MockAccountChain, MockAccountClient, MockEvm, MockEvmClient, MOCK_EVM_CONTRACT};
    use alloy::primitives::{address, B256};

    fn settings() -> ReceiptSettings {
        ReceiptSettings {
            contract: "teleporteos".to_string(),
            oracle: "oracle1".to_string(),
            permission: "active".to_string(),
            evm_contract: MOCK_EVM_CONTRACT,
            token: token(),
            max_block_range: 100,
            genesis_block: 0,
            rewind_margin: 50,
            initial_lookback: 100,
            catch_up_threshold: 1000,
            idle_poll: Duration::from_secs(30),
            dry_run: false,
        }
    }

    fn relay(
        chain: &MockAccountChain,
        evm: &MockEvm,
        s: ReceiptSettings,
        start_block: Option<u64>,
    ) -> ReceiptRelay<MockAccountClient, MockEvmClient> {
        ReceiptRelay::new(
            chain.pool(),
            evm.pool(),
            EvmFinality::new(5, 1),
            CheckpointFile::new(temp_path("receipt")),
            s,
            start_block,
        )
    }

    #[tokio::test]
    async fn test_reports_claimed_before_teleport() {
        let chain = MockAccountChain::new(&["http://a"]);
        let evm = MockEvm::new(&["http://e1"]);
        evm.set_block_number(200);
        evm.add_log(teleport_log("alice", 18_700_000, 2, 110, 0x01));
        evm.add_log(claimed_log(7, address!("1111111111111111111111111111111111111111"), 10_000, 120, 0x02));
        evm.confirm_all_logs();
        let mut relay = relay(&chain, &evm, settings(), Some(100));

        let outcome = relay.run_once().await.unwrap();
        let names: Vec<String> = chain.pushed().iter().map(|p| p.action.name.clone()).collect();
        assert_eq!(names, vec!["claimed", "received"]);
        assert_eq!(relay.next_block(), Some(201));
        assert_eq!(outcome.next_poll, Duration::from_secs(30));
        assert_eq!(relay.checkpoint.load().unwrap(), Some(200));
    }

    #[tokio::test]
    async fn test_range_is_bounded() {
        let chain = MockAccountChain::new(&["http://a"]);
        let evm = MockEvm::new(&["http://e1"]);
        evm.set_block_number(5_000);
        let mut relay = relay(&chain, &evm, settings(), Some(1_000));

        let outcome = relay.run_once().await.unwrap();
        let queries = evm.log_queries();
        assert_eq!(queries[0].2, 1_000);
        assert_eq!(queries[0].3, 1_100);
        assert_eq!(relay.next_block(), Some(1_101));
        // far behind head
        assert_eq!(outcome.next_poll, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_pending_log_holds_checkpoint() {
        let chain = MockAccountChain::new(&["http://a"]);
        let evm = MockEvm::new(&["http://e1"]);
        evm.set_block_number(200);
        evm.add_log(teleport_log("alice", 10_000, 2, 150, 0x01));
        evm.add_log(teleport_log("bob", 10_000, 2, 198, 0x02));
        evm.confirm_all_logs();
        let mut relay = relay(&chain, &evm, settings(), Some(100));

        relay.run_once().await.unwrap();
        // the log at 150 is independent of the pending one at 198
        assert_eq!(chain.pushed().len(), 1);
        assert_eq!(relay.next_block(), Some(198));
        assert_eq!(relay.checkpoint.load().unwrap(), Some(197));

        evm.set_block_number(210);
        relay.run_once().await.unwrap();
        assert_eq!(chain.pushed().len(), 2);
        assert_eq!(relay.next_block(), Some(211));
    }

    #[tokio::test]
    async fn test_zero_amount_never_submitted() {
        let chain = MockAccountChain::new(&["http://a"]);
        let evm = MockEvm::new(&["http://e1"]);
        evm.set_block_number(200);
        evm.add_log(teleport_log("alice", 0, 2, 110, 0x01));
        evm.add_log(teleport_log("bob", 10_000, 2, 111, 0x02));
        evm.confirm_all_logs();
        let mut relay = relay(&chain, &evm, settings(), Some(100));

        relay.run_once().await.unwrap();
        assert_eq!(chain.pushed().len(), 1);
        assert_eq!(relay.next_block(), Some(201));
    }

    #[tokio::test]
    async fn test_removed_log_holds_until_gone_from_rescan() {
        let chain = MockAccountChain::new(&["http://a"]);
        let evm = MockEvm::new(&["http://e1"]);
        evm.set_block_number(200);
        evm.add_log(teleport_log("alice", 10_000, 2, 110, 0x01));
        evm.set_receipt(B256::repeat_byte(0x01), ReceiptStatus { block_number: 111, success: true });
        let mut relay = relay(&chain, &evm, settings(), Some(100));

        relay.run_once().await.unwrap();
        assert!(chain.pushed().is_empty());
        assert_eq!(relay.next_block(), Some(110));
        assert_eq!(relay.checkpoint.load().unwrap(), Some(109));

        // reorged away for good: the rescan no longer sees it
        evm.drop_tx(B256::repeat_byte(0x01));
        relay.run_once().await.unwrap();
        assert!(chain.pushed().is_empty());
        assert_eq!(relay.next_block(), Some(201));
        assert_eq!(relay.checkpoint.load().unwrap(), Some(200));
    }

    #[tokio::test]
    async fn test_single_endpoint_cannot_censor_log() {
        let chain = MockAccountChain::new(&["http://a"]);
        let evm = MockEvm::new(&["http://e1", "http://e2"]);
        evm.set_block_number(200);
        evm.add_log(teleport_log("alice", 10_000, 2, 110, 0x01));
        evm.confirm_all_logs();
        evm.mark_removed("http://e2", B256::repeat_byte(0x01));
        let mut relay = ReceiptRelay::new(
            chain.pool(),
            evm.pool(),
            EvmFinality::new(5, 2),
            CheckpointFile::new(temp_path("receipt-censor")),
            settings(),
            Some(100),
        );

        relay.run_once().await.unwrap();
        assert!(chain.pushed().is_empty());
        assert_eq!(relay.next_block(), Some(110));
        assert_eq!(relay.checkpoint.load().unwrap(), Some(109));

        // the dissenting endpoint now serves the range scan as well
        relay.run_once().await.unwrap();
        assert!(chain.pushed().is_empty());
        assert_eq!(relay.next_block(), Some(110));

        evm.unmark_removed("http://e2", B256::repeat_byte(0x01));
        relay.run_once().await.unwrap();
        assert_eq!(chain.pushed().len(), 1);
        assert_eq!(chain.pushed()[0].action.name, "received");
        assert_eq!(relay.next_block(), Some(201));
    }

    #[tokio::test]
    async fn test_idempotent_rejection_advances() {
        let chain = MockAccountChain::new(&["http://a"]);
        chain.queue_push_error(OracleError::Rejected(
            "assertion failure with message: This teleport has already completed".into(),
        ));
        let evm = MockEvm::new(&["http://e1"]);
        evm.set_block_number(200);
        evm.add_log(teleport_log("alice", 10_000, 2, 110, 0x01));
        evm.confirm_all_logs();
        let mut relay = relay(&chain, &evm, settings(), Some(100));

        relay.run_once().await.unwrap();
        assert!(chain.pushed().is_empty());
        assert_eq!(relay.next_block(), Some(201));
    }

    #[tokio::test]
    async fn test_failed_submission_does_not_block_others() {
        let chain = MockAccountChain::new(&["http://a"]);
        chain.queue_push_error(OracleError::Transport("timeout".into()));
        let evm = MockEvm::new(&["http://e1"]);
        evm.set_block_number(200);
        evm.add_log(teleport_log("alice", 10_000, 2, 110, 0x01));
        evm.add_log(teleport_log("bob", 10_000, 2, 120, 0x02));
        evm.confirm_all_logs();
        let mut relay = relay(&chain, &evm, settings(), Some(100));

        relay.run_once().await.unwrap();
        let pushed = chain.pushed();
        assert_eq!(pushed.len(), 1);
        assert_eq!(relay.next_block(), Some(110));
    }

    #[tokio::test]
    async fn test_existing_approval_skips_submission() {
        let chain = MockAccountChain::new(&["http://a"]);
        chain.add_receipt(ReceiptEvent {
            id: 0,
            date: String::new(),
            source_ref: Checksum256([0x01; 32]),
            to: "alice".to_string(),
            chain_id: 2,
            confirmations: 1,
            quantity: "1.0000 TLM".parse().unwrap(),
            approvers: vec!["oracle1".to_string()],
            completed: false,
        });
        let evm = MockEvm::new(&["http://e1"]);
        evm.set_block_number(200);
        evm.add_log(teleport_log("alice", 10_000, 2, 110, 0x01));
        evm.confirm_all_logs();
        let mut relay = relay(&chain, &evm, settings(), Some(100));

        relay.run_once().await.unwrap();
        assert!(chain.pushed().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run() {
        let chain = MockAccountChain::new(&["http://a"]);
        let evm = MockEvm::new(&["http://e1"]);
        evm.set_block_number(200);
        evm.add_log(teleport_log("alice", 10_000, 2, 110, 0x01));
        evm.confirm_all_logs();
        let mut s = settings();
        s.dry_run = true;
        let mut relay = relay(&chain, &evm, s, Some(100));

        relay.run_once().await.unwrap();
        assert!(chain.pushed().is_empty());
        assert_eq!(relay.next_block(), Some(201));
    }

    #[tokio::test]
    async fn test_initial_block_without_checkpoint() {
        let chain = MockAccountChain::new(&["http://a"]);
        let evm = MockEvm::new(&["http://e1"]);
        evm.set_block_number(1_000);
        let mut relay = relay(&chain, &evm, settings(), None);

        relay.run_once().await.unwrap();
        assert_eq!(evm.log_queries()[0].2, 900);
    }

    #[tokio::test]
    async fn test_resume_rewinds_saved_block() {
        let chain = MockAccountChain::new(&["http://a"]);
        let evm = MockEvm::new(&["http://e1"]);
        evm.set_block_number(1_000);
        let path = temp_path("receipt-resume");
        CheckpointFile::new(&path).save(800).unwrap();
        let mut relay = ReceiptRelay::new(
            chain.pool(),
            evm.pool(),
            EvmFinality::new(5, 1),
            CheckpointFile::new(&path),
            settings(),
            None,
        );

        relay.run_once().await.unwrap();
        assert_eq!(evm.log_queries()[0].2, 750);
        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn test_up_to_date_waits() {
        let chain = MockAccountChain::new(&["http://a"]);
        let evm = MockEvm::new(&["http://e1"]);
        evm.set_block_number(100);
        let mut relay = relay(&chain, &evm, settings(), Some(101));

        let outcome = relay.run_once().await.unwrap();
        assert_eq!(outcome.next_poll, Duration::from_secs(30));
        assert!(evm.log_queries().is_empty());
    }
}
