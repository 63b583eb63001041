//! Account chain (Antelope) access
//!
//! `AccountChainApi` is the seam between the relays and the chain: the HTTP
//! client implements it against nodeos, tests implement it in memory.

pub mod client;
pub mod keys;
pub mod serializer;
pub mod transaction;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::endpoints::NetworkProbe;
use crate::error::{OracleError, Result};
use transaction::Action;

pub use client::AntelopeClient;
pub use keys::AntelopeKey;

/// Subset of `/v1/chain/get_info` used by the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChainInfo {
    pub chain_id: String,
    pub head_block_num: u32,
    pub head_block_time: String,
    pub last_irreversible_block_num: u32,
    #[serde(default)]
    pub last_irreversible_block_id: String,
    /// Only reported by newer nodeos versions
    #[serde(default)]
    pub last_irreversible_block_time: Option<String>,
}

/// Arguments of `/v1/chain/get_table_rows`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableQuery {
    pub json: bool,
    pub code: String,
    pub scope: String,
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lower_bound: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upper_bound: Option<String>,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_position: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_type: Option<String>,
}

impl TableQuery {
    /// Primary-key scan of `table` in the contract's own scope.
    pub fn primary(contract: &str, table: &str, lower_bound: u64, limit: u32, json: bool) -> Self {
        Self {
            json,
            code: contract.to_string(),
            scope: contract.to_string(),
            table: table.to_string(),
            lower_bound: Some(lower_bound.to_string()),
            upper_bound: None,
            limit,
            index_position: None,
            key_type: None,
        }
    }
}

/// Result of a table scan. Rows are JSON objects when `json` was requested
/// and hex strings of the raw row bytes otherwise.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TableRows {
    pub rows: Vec<serde_json::Value>,
    #[serde(default)]
    pub more: bool,
    #[serde(default)]
    pub next_key: Option<String>,
}

#[async_trait]
pub trait AccountChainApi: NetworkProbe {
    /// URL of the endpoint this client is bound to.
    fn endpoint(&self) -> &str;

    async fn get_info(&self) -> Result<ChainInfo>;

    /// Timestamp of a block, as reported by `get_block`.
    async fn get_block_timestamp(&self, block_num: u32) -> Result<String>;

    async fn get_table_rows(&self, query: &TableQuery) -> Result<TableRows>;

    /// Sign and push a transaction carrying a single action; returns the
    /// transaction id.
    async fn push_action(&self, action: Action) -> Result<String>;
}

/// Parse a block time as reported by nodeos (`2021-09-01T12:00:00.500`,
/// implicitly UTC, optionally with a trailing `Z`).
pub fn parse_block_time(s: &str) -> Result<DateTime<Utc>> {
    let trimmed = s.trim().trim_end_matches('Z');
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|t| t.and_utc())
        .map_err(|e| OracleError::Serialization(format!("Invalid block time '{}': {}", s, e)))
}
