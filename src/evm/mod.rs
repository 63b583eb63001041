//! EVM chain access

pub mod client;
pub mod events;

use alloy::primitives::{Address, B256};
use async_trait::async_trait;

use crate::endpoints::NetworkProbe;
use crate::error::Result;

pub use client::EvmClient;

/// A contract log as seen by one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmLog {
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
    /// Set by the node when the log was dropped by a reorg
    pub removed: bool,
}

/// Receipt fields needed to judge inclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptStatus {
    pub block_number: u64,
    pub success: bool,
}

#[async_trait]
pub trait EvmApi: NetworkProbe {
    fn endpoint(&self) -> &str;

    async fn block_number(&self) -> Result<u64>;

    /// Logs emitted by `contract` with first topic `topic` in
    /// `[from_block, to_block]`.
    async fn get_logs(
        &self,
        contract: Address,
        topic: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EvmLog>>;

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<ReceiptStatus>>;
}
