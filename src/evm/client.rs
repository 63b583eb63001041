use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::Filter;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use super::{EvmApi, EvmLog, ReceiptStatus};
use crate::endpoints::{Connector, NetworkProbe};
use crate::error::{OracleError, Result};

/// alloy HTTP provider bound to one EVM endpoint.
pub struct EvmClient {
    url: String,
    provider: RootProvider<Http<Client>>,
    timeout: Duration,
}

impl EvmClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let parsed = url
            .parse()
            .map_err(|e| OracleError::InvalidConfig(format!("Invalid RPC URL {}: {}", url, e)))?;
        Ok(Self {
            url: url.to_string(),
            provider: ProviderBuilder::new().on_http(parsed),
            timeout,
        })
    }

    /// Connector for an `EndpointPool` of EVM endpoints.
    pub fn connector(timeout: Duration) -> Connector<EvmClient> {
        Arc::new(move |url: &str| EvmClient::new(url, timeout))
    }

    /// Runs an RPC call under the client timeout; timeouts and transport
    /// errors both map to `EndpointUnavailable`.
    async fn call<T, E, F>(&self, what: &str, fut: F) -> Result<T>
    where
        E: std::fmt::Display,
        F: IntoFuture<Output = std::result::Result<T, E>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(OracleError::EndpointUnavailable {
                endpoint: self.url.clone(),
                reason: format!("{} failed: {}", what, e),
            }),
            Err(_) => Err(OracleError::EndpointUnavailable {
                endpoint: self.url.clone(),
                reason: format!("{} timed out after {:?}", what, self.timeout),
            }),
        }
    }
}

#[async_trait]
impl NetworkProbe for EvmClient {
    async fn network_id(&self) -> Result<String> {
        let chain_id = self
            .call("eth_chainId", self.provider.get_chain_id())
            .await?;
        Ok(chain_id.to_string())
    }
}

#[async_trait]
impl EvmApi for EvmClient {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn block_number(&self) -> Result<u64> {
        self.call("eth_blockNumber", self.provider.get_block_number())
            .await
    }

    async fn get_logs(
        &self,
        contract: Address,
        topic: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EvmLog>> {
        let filter = Filter::new()
            .address(contract)
            .event_signature(topic)
            .from_block(from_block)
            .to_block(to_block);

        let logs = self
            .call("eth_getLogs", self.provider.get_logs(&filter))
            .await?;

        logs.into_iter()
            .map(|log| {
                let missing = |field: &str| OracleError::EndpointUnavailable {
                    endpoint: self.url.clone(),
                    reason: format!("Log without {}", field),
                };
                Ok(EvmLog {
                    tx_hash: log.transaction_hash.ok_or_else(|| missing("transaction hash"))?,
                    log_index: log.log_index.ok_or_else(|| missing("log index"))?,
                    block_number: log.block_number.ok_or_else(|| missing("block number"))?,
                    topics: log.topics().to_vec(),
                    data: log.data().data.to_vec(),
                    removed: log.removed,
                })
            })
            .collect()
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<ReceiptStatus>> {
        let receipt = self
            .call(
                "eth_getTransactionReceipt",
                self.provider.get_transaction_receipt(tx_hash),
            )
            .await?;

        Ok(receipt.and_then(|r| {
            r.block_number.map(|block_number| ReceiptStatus {
                block_number,
                success: r.status(),
            })
        }))
    }
}
