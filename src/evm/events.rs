//! Decoding of the EVM teleport contract's `Teleport` and `Claimed` logs

use alloy::primitives::{b256, Address, B256, U256};
use alloy::sol_types::SolValue;

use super::EvmLog;
use crate::antelope::serializer::{encode_claimed_action, encode_name, encode_received_action};
use crate::antelope::transaction::Action;
use crate::config::TokenConfig;
use crate::error::{OracleError, Result};
use crate::types::{Asset, Checksum256};

/// `Teleport(address indexed from, string to, uint256 tokens, uint256 chainId)`
pub const TELEPORT_TOPIC: B256 =
    b256!("622824274e0937ee319b036740cd0887131781bc2032b47eac3e88a1be17f5d5");

/// `Claimed(uint64 id, address to, uint256 tokens)`
pub const CLAIMED_TOPIC: B256 =
    b256!("f20fc6923b8057dd0c3b606483fcaa038229bb36ebc35a0040e3eaa39cf97b17");

/// Tokens moved to the account chain, relayed with a `received` action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeleportLog {
    pub source_ref: Checksum256,
    pub to: String,
    pub quantity: Asset,
    pub chain_id: u8,
}

/// A claim of an account chain teleport, relayed with a `claimed` action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedLog {
    pub id: u64,
    pub to_eth: Checksum256,
    pub quantity: Asset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundKind {
    Teleport(TeleportLog),
    Claimed(ClaimedLog),
}

/// A decoded inbound event with the position of its log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
    pub kind: InboundKind,
}

impl InboundEvent {
    pub fn label(&self) -> &'static str {
        match self.kind {
            InboundKind::Teleport(_) => "received",
            InboundKind::Claimed(_) => "claimed",
        }
    }

    /// Build the account chain action reporting this event.
    pub fn to_action(&self, contract: &str, oracle: &str, permission: &str) -> Result<Action> {
        let data = match &self.kind {
            InboundKind::Teleport(t) => {
                encode_received_action(oracle, &t.to, &t.source_ref, &t.quantity, t.chain_id, true)?
            }
            InboundKind::Claimed(c) => encode_claimed_action(oracle, c.id, &c.to_eth, &c.quantity)?,
        };
        Ok(Action::new(contract, self.label(), oracle, permission, data))
    }
}

fn tokens_to_asset(tokens: U256, token: &TokenConfig) -> Result<Asset> {
    if tokens.is_zero() {
        return Err(OracleError::DataIntegrity(
            "Tokens are less than or equal to 0".into(),
        ));
    }
    let amount = i64::try_from(tokens).map_err(|_| {
        OracleError::DataIntegrity(format!("Token amount {} does not fit an asset", tokens))
    })?;
    Asset::new(amount, token.precision, &token.symbol)
        .map_err(|e| OracleError::DataIntegrity(e.to_string()))
}

/// Decode a `Teleport` log. Rejects non-positive amounts.
pub fn decode_teleport(log: &EvmLog, token: &TokenConfig) -> Result<InboundEvent> {
    let (to, tokens, chain_id) = <(String, U256, U256)>::abi_decode_params(&log.data, true)
        .map_err(|e| OracleError::DataIntegrity(format!("Undecodable Teleport log: {}", e)))?;

    let quantity = tokens_to_asset(tokens, token)?;
    encode_name(&to).map_err(|_| {
        OracleError::DataIntegrity(format!("Teleport recipient '{}' is not a valid account", to))
    })?;
    let chain_id = u8::try_from(chain_id)
        .map_err(|_| OracleError::DataIntegrity(format!("Chain id {} out of range", chain_id)))?;

    Ok(InboundEvent {
        tx_hash: log.tx_hash,
        log_index: log.log_index,
        block_number: log.block_number,
        kind: InboundKind::Teleport(TeleportLog {
            source_ref: Checksum256(log.tx_hash.0),
            to,
            quantity,
            chain_id,
        }),
    })
}

/// Decode a `Claimed` log.
pub fn decode_claimed(log: &EvmLog, token: &TokenConfig) -> Result<InboundEvent> {
    let (id, to, tokens) = <(u64, Address, U256)>::abi_decode_params(&log.data, true)
        .map_err(|e| OracleError::DataIntegrity(format!("Undecodable Claimed log: {}", e)))?;

    Ok(InboundEvent {
        tx_hash: log.tx_hash,
        log_index: log.log_index,
        block_number: log.block_number,
        kind: InboundKind::Claimed(ClaimedLog {
            id,
            to_eth: Checksum256::from_evm_address(&to.0 .0),
            quantity: tokens_to_asset(tokens, token)?,
        }),
    })
}

/// Decode a log by its first topic.
pub fn decode_log(log: &EvmLog, token: &TokenConfig) -> Result<InboundEvent> {
    match log.topics.first() {
        Some(t) if *t == TELEPORT_TOPIC => decode_teleport(log, token),
        Some(t) if *t == CLAIMED_TOPIC => decode_claimed(log, token),
        _ => Err(OracleError::DataIntegrity("Unknown log topic".into())),
    }
}
