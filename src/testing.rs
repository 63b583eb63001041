//! In-memory chain doubles for unit tests
//!
//! Each double keeps one shared state behind a mutex and hands out clients
//! bound to individual endpoint URLs through a `Connector`, so endpoint
//! rotation, per-endpoint faults and lagging nodes can be simulated.

use alloy::primitives::{address, Address, B256};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use crate::antelope::serializer::serialize_transfer;
use crate::antelope::transaction::Action;
use crate::antelope::{AccountChainApi, ChainInfo, TableQuery, TableRows};
use crate::endpoints::{Connector, EndpointPool, NetworkProbe};
use crate::error::{OracleError, Result};
use crate::evm::{EvmApi, EvmLog, ReceiptStatus};
use crate::types::{Checksum256, ReceiptEvent, TransferEvent};

/// Render a bool field as `0`/`1` the way nodeos does in JSON table rows.
fn nodeos_row(mut row: serde_json::Value, flag: &str) -> serde_json::Value {
    if let Some(value) = row.get_mut(flag) {
        let set = value.as_bool().unwrap_or(false);
        *value = serde_json::Value::from(u8::from(set));
    }
    row
}

pub const MOCK_CHAIN_ID: &str = "cf057bbfb72640471fd910bcb67639c22df9f92470936cddc1ade0e2f2e7dc4f";
pub const MOCK_EVM_CHAIN_ID: &str = "56";
pub const MOCK_EVM_CONTRACT: Address = address!("0789a30aa30d6a7a7536a7ed26956bbdb0fc80bd");

/// Default irreversible time of the mock account chain (2021-09-01T12:00:00).
pub const MOCK_LIB_TIME: u32 = 1_630_497_600;

fn unreachable(url: &str) -> OracleError {
    OracleError::EndpointUnavailable {
        endpoint: url.to_string(),
        reason: "connection refused".to_string(),
    }
}

// --- network probe only -----------------------------------------------------

#[derive(Debug, Clone)]
pub enum ProbeBehavior {
    Network(String),
    Unreachable,
}

pub struct ProbeClient {
    pub url: String,
    behavior: ProbeBehavior,
}

#[async_trait]
impl NetworkProbe for ProbeClient {
    async fn network_id(&self) -> Result<String> {
        match &self.behavior {
            ProbeBehavior::Network(id) => Ok(id.clone()),
            ProbeBehavior::Unreachable => Err(unreachable(&self.url)),
        }
    }
}

/// Connector whose clients report the network configured per URL; unknown
/// URLs are unreachable.
pub fn probe_connector(behaviors: HashMap<String, ProbeBehavior>) -> Connector<ProbeClient> {
    Arc::new(move |url: &str| {
        Ok(ProbeClient {
            url: url.to_string(),
            behavior: behaviors
                .get(url)
                .cloned()
                .unwrap_or(ProbeBehavior::Unreachable),
        })
    })
}

// --- account chain ----------------------------------------------------------

/// A teleport row with test defaults.
pub fn transfer(id: u64, time: u32) -> TransferEvent {
    TransferEvent {
        id,
        time,
        account: "alice".to_string(),
        quantity: "123.0000 TLM".parse().unwrap(),
        chain_id: 2,
        eth_address: Checksum256::from_hex(
            "1111111111111111111111111111111111111111000000000000000000000000",
        )
        .unwrap(),
        oracles: vec![],
        signatures: vec![],
        claimed: false,
    }
}

#[derive(Debug, Clone)]
pub struct PushedAction {
    pub endpoint: String,
    pub action: Action,
}

impl PushedAction {
    /// The `id` field of `sign` and `claimed` payloads (after the oracle name).
    pub fn id(&self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.action.data[8..16]);
        u64::from_le_bytes(bytes)
    }
}

#[derive(Default)]
struct AccountChainState {
    networks: HashMap<String, String>,
    unreachable: HashSet<String>,
    lib_times: HashMap<String, Option<String>>,
    block_times: HashMap<u32, String>,
    failing_info: HashSet<String>,
    teleports: Vec<TransferEvent>,
    receipts: Vec<ReceiptEvent>,
    row_limits: HashMap<String, usize>,
    tampered: HashMap<String, HashSet<u64>>,
    table_failures: HashMap<String, usize>,
    table_reads: HashMap<String, usize>,
    push_errors: VecDeque<OracleError>,
    pushed: Vec<PushedAction>,
}

/// Shared in-memory account chain.
#[derive(Clone)]
pub struct MockAccountChain {
    urls: Vec<String>,
    state: Arc<Mutex<AccountChainState>>,
}

pub struct MockAccountClient {
    url: String,
    state: Arc<Mutex<AccountChainState>>,
}

impl MockAccountChain {
    pub fn new(urls: &[&str]) -> Self {
        Self {
            urls: urls.iter().map(|u| u.to_string()).collect(),
            state: Arc::new(Mutex::new(AccountChainState::default())),
        }
    }

    pub fn connector(&self) -> Connector<MockAccountClient> {
        let state = self.state.clone();
        Arc::new(move |url: &str| {
            Ok(MockAccountClient {
                url: url.to_string(),
                state: state.clone(),
            })
        })
    }

    pub fn pool(&self) -> EndpointPool<MockAccountClient> {
        EndpointPool::new("antelope", MOCK_CHAIN_ID, &self.urls, self.connector()).unwrap()
    }

    pub fn set_network(&self, url: &str, id: &str) {
        let mut s = self.state.lock().unwrap();
        s.networks.insert(url.to_string(), id.to_string());
    }

    pub fn set_unreachable(&self, url: &str, down: bool) {
        let mut s = self.state.lock().unwrap();
        if down {
            s.unreachable.insert(url.to_string());
        } else {
            s.unreachable.remove(url);
        }
    }

    pub fn set_lib_time(&self, url: &str, time: Option<&str>) {
        let mut s = self.state.lock().unwrap();
        s.lib_times
            .insert(url.to_string(), time.map(|t| t.to_string()));
    }

    pub fn set_block_time(&self, block_num: u32, time: &str) {
        let mut s = self.state.lock().unwrap();
        s.block_times.insert(block_num, time.to_string());
    }

    pub fn fail_info(&self, url: &str, fail: bool) {
        let mut s = self.state.lock().unwrap();
        if fail {
            s.failing_info.insert(url.to_string());
        } else {
            s.failing_info.remove(url);
        }
    }

    pub fn add_teleport(&self, event: TransferEvent) {
        let mut s = self.state.lock().unwrap();
        s.teleports.retain(|t| t.id != event.id);
        s.teleports.push(event);
        s.teleports.sort_by_key(|t| t.id);
    }

    pub fn add_receipt(&self, receipt: ReceiptEvent) {
        self.state.lock().unwrap().receipts.push(receipt);
    }

    /// The endpoint only returns the first `n` rows of any scan.
    pub fn limit_rows(&self, url: &str, n: usize) {
        let mut s = self.state.lock().unwrap();
        s.row_limits.insert(url.to_string(), n);
    }

    /// The endpoint serves altered raw bytes for teleport `id`.
    pub fn tamper_raw_row(&self, url: &str, id: u64) {
        let mut s = self.state.lock().unwrap();
        s.tampered.entry(url.to_string()).or_default().insert(id);
    }

    /// The next `n` table reads on the endpoint fail.
    pub fn fail_table_reads(&self, url: &str, n: usize) {
        let mut s = self.state.lock().unwrap();
        s.table_failures.insert(url.to_string(), n);
    }

    pub fn table_reads(&self, url: &str) -> usize {
        let s = self.state.lock().unwrap();
        s.table_reads.get(url).copied().unwrap_or_default()
    }

    /// The next push fails with `error`; queued errors are used in order.
    pub fn queue_push_error(&self, error: OracleError) {
        self.state.lock().unwrap().push_errors.push_back(error);
    }

    pub fn pushed(&self) -> Vec<PushedAction> {
        self.state.lock().unwrap().pushed.clone()
    }
}

impl MockAccountClient {
    fn check_reachable(&self) -> Result<()> {
        if self.state.lock().unwrap().unreachable.contains(&self.url) {
            return Err(unreachable(&self.url));
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkProbe for MockAccountClient {
    async fn network_id(&self) -> Result<String> {
        self.check_reachable()?;
        let s = self.state.lock().unwrap();
        Ok(s.networks
            .get(&self.url)
            .cloned()
            .unwrap_or_else(|| MOCK_CHAIN_ID.to_string()))
    }
}

#[async_trait]
impl AccountChainApi for MockAccountClient {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn get_info(&self) -> Result<ChainInfo> {
        self.check_reachable()?;
        let s = self.state.lock().unwrap();
        if s.failing_info.contains(&self.url) {
            return Err(unreachable(&self.url));
        }
        let lib_time = s
            .lib_times
            .get(&self.url)
            .cloned()
            .unwrap_or_else(|| Some("2021-09-01T12:00:00.000".to_string()));
        Ok(ChainInfo {
            chain_id: MOCK_CHAIN_ID.to_string(),
            head_block_num: 200,
            head_block_time: "2021-09-01T12:01:00.000".to_string(),
            last_irreversible_block_num: 100,
            last_irreversible_block_id: format!("00000064{}", "0".repeat(56)),
            last_irreversible_block_time: lib_time,
        })
    }

    async fn get_block_timestamp(&self, block_num: u32) -> Result<String> {
        self.check_reachable()?;
        let s = self.state.lock().unwrap();
        s.block_times
            .get(&block_num)
            .cloned()
            .ok_or_else(|| OracleError::Rejected(format!("Unknown block {}", block_num)))
    }

    async fn get_table_rows(&self, query: &TableQuery) -> Result<TableRows> {
        self.check_reachable()?;
        let mut s = self.state.lock().unwrap();
        *s.table_reads.entry(self.url.clone()).or_default() += 1;
        if let Some(remaining) = s.table_failures.get_mut(&self.url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(unreachable(&self.url));
            }
        }

        let lower = query.lower_bound.clone().unwrap_or_default();
        let row_limit = s.row_limits.get(&self.url).copied().unwrap_or(usize::MAX);

        match query.table.as_str() {
            "teleports" => {
                let start: u64 = lower.parse().unwrap_or(0);
                let matching: Vec<&TransferEvent> =
                    s.teleports.iter().filter(|t| t.id >= start).collect();
                let take = (query.limit as usize).min(row_limit).min(matching.len());
                let tampered = s.tampered.get(&self.url);

                let rows = matching[..take]
                    .iter()
                    .map(|t| {
                        if query.json {
                            nodeos_row(serde_json::to_value(t).unwrap(), "claimed")
                        } else {
                            let mut raw = (*t).clone();
                            if tampered.is_some_and(|ids| ids.contains(&t.id)) {
                                raw.account = "mallory".to_string();
                            }
                            let mut hex = hex::encode(serialize_transfer(&raw).unwrap());
                            // oracles and signatures vectors, claimed flag
                            hex.push_str("000000");
                            serde_json::Value::String(hex)
                        }
                    })
                    .collect();
                Ok(TableRows {
                    rows,
                    more: matching.len() > take,
                    next_key: None,
                })
            }
            "receipts" => {
                let rows = s
                    .receipts
                    .iter()
                    .filter(|r| r.source_ref.to_hex() == lower.to_lowercase())
                    .take(query.limit as usize)
                    .map(|r| nodeos_row(serde_json::to_value(r).unwrap(), "completed"))
                    .collect();
                Ok(TableRows {
                    rows,
                    more: false,
                    next_key: None,
                })
            }
            other => Err(OracleError::Rejected(format!("Unknown table {}", other))),
        }
    }

    async fn push_action(&self, action: Action) -> Result<String> {
        self.check_reachable()?;
        let mut s = self.state.lock().unwrap();
        if let Some(err) = s.push_errors.pop_front() {
            return Err(err);
        }
        s.pushed.push(PushedAction {
            endpoint: self.url.clone(),
            action,
        });
        Ok(format!("{:064x}", s.pushed.len()))
    }
}

// --- EVM --------------------------------------------------------------------

#[derive(Default)]
struct EvmState {
    networks: HashMap<String, String>,
    failing: HashSet<String>,
    block_number: u64,
    logs: Vec<EvmLog>,
    receipts: HashMap<B256, ReceiptStatus>,
    removed: HashMap<String, HashSet<B256>>,
    log_queries: Vec<(String, B256, u64, u64)>,
}

/// Shared in-memory EVM chain.
#[derive(Clone)]
pub struct MockEvm {
    urls: Vec<String>,
    state: Arc<Mutex<EvmState>>,
}

pub struct MockEvmClient {
    url: String,
    state: Arc<Mutex<EvmState>>,
}

impl MockEvm {
    pub fn new(urls: &[&str]) -> Self {
        Self {
            urls: urls.iter().map(|u| u.to_string()).collect(),
            state: Arc::new(Mutex::new(EvmState::default())),
        }
    }

    pub fn connector(&self) -> Connector<MockEvmClient> {
        let state = self.state.clone();
        Arc::new(move |url: &str| {
            Ok(MockEvmClient {
                url: url.to_string(),
                state: state.clone(),
            })
        })
    }

    pub fn pool(&self) -> EndpointPool<MockEvmClient> {
        EndpointPool::new("evm", MOCK_EVM_CHAIN_ID, &self.urls, self.connector()).unwrap()
    }

    pub fn set_network(&self, url: &str, id: &str) {
        let mut s = self.state.lock().unwrap();
        s.networks.insert(url.to_string(), id.to_string());
    }

    pub fn set_block_number(&self, n: u64) {
        self.state.lock().unwrap().block_number = n;
    }

    pub fn add_log(&self, log: EvmLog) {
        self.state.lock().unwrap().logs.push(log);
    }

    pub fn set_receipt(&self, tx_hash: B256, status: ReceiptStatus) {
        self.state.lock().unwrap().receipts.insert(tx_hash, status);
    }

    /// Adds a successful receipt for every log added so far.
    pub fn confirm_all_logs(&self) {
        let mut s = self.state.lock().unwrap();
        let receipts: Vec<(B256, ReceiptStatus)> = s
            .logs
            .iter()
            .map(|l| {
                (
                    l.tx_hash,
                    ReceiptStatus {
                        block_number: l.block_number,
                        success: true,
                    },
                )
            })
            .collect();
        s.receipts.extend(receipts);
    }

    /// The endpoint reports the logs of `tx_hash` as removed.
    pub fn mark_removed(&self, url: &str, tx_hash: B256) {
        let mut s = self.state.lock().unwrap();
        s.removed.entry(url.to_string()).or_default().insert(tx_hash);
    }

    /// The endpoint stops reporting the logs of `tx_hash` as removed.
    pub fn unmark_removed(&self, url: &str, tx_hash: B256) {
        let mut s = self.state.lock().unwrap();
        if let Some(removed) = s.removed.get_mut(url) {
            removed.remove(&tx_hash);
        }
    }

    /// Drop the logs and receipt of `tx_hash` everywhere, as after a reorg.
    pub fn drop_tx(&self, tx_hash: B256) {
        let mut s = self.state.lock().unwrap();
        s.logs.retain(|l| l.tx_hash != tx_hash);
        s.receipts.remove(&tx_hash);
    }

    /// Every RPC call except the network probe fails on the endpoint.
    pub fn fail_calls(&self, url: &str, fail: bool) {
        let mut s = self.state.lock().unwrap();
        if fail {
            s.failing.insert(url.to_string());
        } else {
            s.failing.remove(url);
        }
    }

    /// `(endpoint, topic, from, to)` of every `get_logs` call.
    pub fn log_queries(&self) -> Vec<(String, B256, u64, u64)> {
        self.state.lock().unwrap().log_queries.clone()
    }
}

impl MockEvmClient {
    fn check(&self) -> Result<()> {
        if self.state.lock().unwrap().failing.contains(&self.url) {
            return Err(unreachable(&self.url));
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkProbe for MockEvmClient {
    async fn network_id(&self) -> Result<String> {
        let s = self.state.lock().unwrap();
        Ok(s.networks
            .get(&self.url)
            .cloned()
            .unwrap_or_else(|| MOCK_EVM_CHAIN_ID.to_string()))
    }
}

#[async_trait]
impl EvmApi for MockEvmClient {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn block_number(&self) -> Result<u64> {
        self.check()?;
        Ok(self.state.lock().unwrap().block_number)
    }

    async fn get_logs(
        &self,
        _contract: Address,
        topic: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<EvmLog>> {
        self.check()?;
        let mut s = self.state.lock().unwrap();
        s.log_queries
            .push((self.url.clone(), topic, from_block, to_block));
        let removed = s.removed.get(&self.url);
        Ok(s.logs
            .iter()
            .filter(|l| l.topics.first() == Some(&topic))
            .filter(|l| l.block_number >= from_block && l.block_number <= to_block)
            .map(|l| {
                let mut log = l.clone();
                log.removed = removed.is_some_and(|r| r.contains(&l.tx_hash));
                log
            })
            .collect())
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> Result<Option<ReceiptStatus>> {
        self.check()?;
        Ok(self.state.lock().unwrap().receipts.get(&tx_hash).copied())
    }
}
