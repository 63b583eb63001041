//! Common types for teleport records on both chains
//!
//! `TransferEvent` mirrors a row of the account chain `teleports` table and
//! `ReceiptEvent` a row of the `receipts` table.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{OracleError, Result};

/// Maximum amount representable by an account chain asset (2^62 - 1).
pub const MAX_ASSET_AMOUNT: i64 = (1 << 62) - 1;

/// Fixed point token quantity with an explicit symbol, e.g. `123.0000 TLM`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Asset {
    /// Amount in the smallest unit (value * 10^precision)
    pub amount: i64,
    pub precision: u8,
    pub symbol: String,
}

impl Asset {
    pub fn new(amount: i64, precision: u8, symbol: &str) -> Result<Self> {
        validate_symbol(symbol)?;
        if precision > 18 {
            return Err(OracleError::Serialization(format!(
                "Asset precision {} exceeds 18",
                precision
            )));
        }
        if amount.unsigned_abs() > MAX_ASSET_AMOUNT as u64 {
            return Err(OracleError::Serialization(format!(
                "Asset amount {} out of range",
                amount
            )));
        }
        Ok(Self {
            amount,
            precision,
            symbol: symbol.to_string(),
        })
    }
}

fn validate_symbol(symbol: &str) -> Result<()> {
    if symbol.is_empty() || symbol.len() > 7 || !symbol.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(OracleError::Serialization(format!(
            "Invalid asset symbol '{}'",
            symbol
        )));
    }
    Ok(())
}

impl FromStr for Asset {
    type Err = OracleError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (number, symbol) = s
            .split_once(' ')
            .ok_or_else(|| OracleError::Serialization(format!("Asset '{}' has no symbol", s)))?;
        let symbol = symbol.trim();

        let (negative, digits) = match number.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, number),
        };
        let (whole, fraction) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(OracleError::Serialization(format!(
                "Invalid asset amount '{}'",
                number
            )));
        }
        if !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return Err(OracleError::Serialization(format!(
                "Invalid asset amount '{}'",
                number
            )));
        }

        let precision = u8::try_from(fraction.len())
            .map_err(|_| OracleError::Serialization(format!("Asset precision too large in '{}'", s)))?;
        let combined = format!("{}{}", whole, fraction);
        let magnitude: i64 = combined
            .parse()
            .map_err(|_| OracleError::Serialization(format!("Asset amount overflow in '{}'", s)))?;
        let amount = if negative { -magnitude } else { magnitude };

        Asset::new(amount, precision, symbol)
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.amount < 0 { "-" } else { "" };
        let magnitude = self.amount.unsigned_abs();
        if self.precision == 0 {
            return write!(f, "{}{} {}", sign, magnitude, self.symbol);
        }
        let scale = 10u64.pow(self.precision as u32);
        write!(
            f,
            "{}{}.{:0width$} {}",
            sign,
            magnitude / scale,
            magnitude % scale,
            self.symbol,
            width = self.precision as usize
        )
    }
}

impl<'de> Deserialize<'de> for Asset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Serialize for Asset {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// 32-byte value stored as `checksum256` on the account chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Checksum256(pub [u8; 32]);

impl Checksum256 {
    pub fn from_hex(hex: &str) -> Result<Self> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let bytes =
            hex::decode(hex).map_err(|e| OracleError::Serialization(format!("Invalid hex: {}", e)))?;
        if bytes.len() != 32 {
            return Err(OracleError::Serialization(format!(
                "checksum256 must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut result = [0u8; 32];
        result.copy_from_slice(&bytes);
        Ok(Checksum256(result))
    }

    /// Left-aligns a 20-byte EVM address followed by 12 zero bytes.
    pub fn from_evm_address(address: &[u8; 20]) -> Self {
        let mut result = [0u8; 32];
        result[..20].copy_from_slice(address);
        Checksum256(result)
    }

    /// Lowercase hex without prefix, the form the account chain uses in JSON.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Checksum256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Checksum256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Checksum256::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Checksum256 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Accepts a u64 encoded either as a JSON number or a decimal string.
///
/// nodeos renders 64-bit integers as strings once they exceed 2^32 on some
/// API versions.
pub fn deserialize_u64_from_any<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrString {
        Num(u64),
        Str(String),
    }

    match NumOrString::deserialize(deserializer)? {
        NumOrString::Num(n) => Ok(n),
        NumOrString::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Accepts a bool encoded as a JSON bool, `0`/`1`, or one of those as a
/// string. nodeos renders `bool` table fields as `0`/`1`.
pub fn deserialize_bool_from_any<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolLike {
        Bool(bool),
        Num(u64),
        Str(String),
    }

    match BoolLike::deserialize(deserializer)? {
        BoolLike::Bool(b) => Ok(b),
        BoolLike::Num(0) => Ok(false),
        BoolLike::Num(1) => Ok(true),
        BoolLike::Num(n) => Err(serde::de::Error::custom(format!(
            "invalid boolean value {}",
            n
        ))),
        BoolLike::Str(s) => match s.as_str() {
            "0" | "false" => Ok(false),
            "1" | "true" => Ok(true),
            other => Err(serde::de::Error::custom(format!(
                "invalid boolean value '{}'",
                other
            ))),
        },
    }
}

/// Outbound transfer recorded in the source contract's `teleports` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransferEvent {
    #[serde(deserialize_with = "deserialize_u64_from_any")]
    pub id: u64,
    /// Creation time in seconds since epoch
    pub time: u32,
    /// Source account name
    pub account: String,
    pub quantity: Asset,
    pub chain_id: u8,
    /// Destination address, 20-byte EVM address left aligned in 32 bytes
    pub eth_address: Checksum256,
    /// Oracles that have already voted
    #[serde(default)]
    pub oracles: Vec<String>,
    #[serde(default)]
    pub signatures: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_bool_from_any")]
    pub claimed: bool,
}

impl TransferEvent {
    pub fn has_vote_from(&self, oracle: &str) -> bool {
        self.oracles.iter().any(|o| o == oracle)
    }
}

/// Inbound receipt recorded in the destination contract's `receipts` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReceiptEvent {
    #[serde(deserialize_with = "deserialize_u64_from_any")]
    pub id: u64,
    #[serde(default)]
    pub date: String,
    #[serde(rename = "ref")]
    pub source_ref: Checksum256,
    pub to: String,
    pub chain_id: u8,
    pub confirmations: u8,
    pub quantity: Asset,
    #[serde(default)]
    pub approvers: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_bool_from_any")]
    pub completed: bool,
}

impl ReceiptEvent {
    pub fn approved_by(&self, oracle: &str) -> bool {
        self.approvers.iter().any(|a| a == oracle)
    }
}
