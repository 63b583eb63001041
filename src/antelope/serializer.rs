//! Antelope binary encoding
//!
//! Implements the subset of the chain's native serialization needed to encode
//! teleport records (for signing and cross validation) and the oracle's
//! action payloads.

use crate::error::{OracleError, Result};
use crate::types::{Asset, Checksum256, TransferEvent};

/// Size of a serialized teleport record as signed by oracles.
pub const TRANSFER_LOG_SIZE: usize = 69;

fn char_to_symbol(c: u8) -> Option<u64> {
    match c {
        b'a'..=b'z' => Some((c - b'a') as u64 + 6),
        b'1'..=b'5' => Some((c - b'1') as u64 + 1),
        b'.' => Some(0),
        _ => None,
    }
}

/// Encode an account name into its 64-bit representation.
pub fn encode_name(name: &str) -> Result<u64> {
    let bytes = name.as_bytes();
    if bytes.len() > 13 {
        return Err(OracleError::Serialization(format!(
            "Name '{}' is longer than 13 characters",
            name
        )));
    }

    let mut value: u64 = 0;
    for (i, &c) in bytes.iter().enumerate() {
        let symbol = char_to_symbol(c).ok_or_else(|| {
            OracleError::Serialization(format!("Invalid character in name '{}'", name))
        })?;
        if i < 12 {
            value |= (symbol & 0x1f) << (64 - 5 * (i + 1));
        } else {
            if symbol > 0x0f {
                return Err(OracleError::Serialization(format!(
                    "Thirteenth character of name '{}' must be in [.1-5a-j]",
                    name
                )));
            }
            value |= symbol;
        }
    }
    Ok(value)
}

/// Decode a 64-bit name back to its string form, trailing dots trimmed.
pub fn decode_name(value: u64) -> String {
    const CHARMAP: &[u8] = b".12345abcdefghijklmnopqrstuvwxyz";
    let mut chars = [b'.'; 13];
    let mut tmp = value;
    for i in 0..13 {
        let (mask, shift) = if i == 0 { (0x0f, 4) } else { (0x1f, 5) };
        chars[12 - i] = CHARMAP[(tmp & mask) as usize];
        tmp >>= shift;
    }
    String::from_utf8_lossy(&chars)
        .trim_end_matches('.')
        .to_string()
}

/// Append-only buffer producing Antelope binary encoding.
#[derive(Debug, Default, Clone)]
pub struct SerialBuffer {
    bytes: Vec<u8>,
}

impl SerialBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    pub fn push_bool(&mut self, v: bool) {
        self.bytes.push(v as u8);
    }

    pub fn push_u16(&mut self, v: u16) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn push_u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn push_u64(&mut self, v: u64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn push_i64(&mut self, v: i64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn push_varuint32(&mut self, mut v: u32) {
        loop {
            if v >> 7 == 0 {
                self.bytes.push(v as u8);
                break;
            }
            self.bytes.push(0x80 | (v & 0x7f) as u8);
            v >>= 7;
        }
    }

    pub fn push_bytes(&mut self, v: &[u8]) {
        self.push_varuint32(v.len() as u32);
        self.bytes.extend_from_slice(v);
    }

    pub fn push_raw(&mut self, v: &[u8]) {
        self.bytes.extend_from_slice(v);
    }

    pub fn push_string(&mut self, v: &str) {
        self.push_bytes(v.as_bytes());
    }

    pub fn push_name(&mut self, v: &str) -> Result<()> {
        self.push_u64(encode_name(v)?);
        Ok(())
    }

    pub fn push_symbol(&mut self, precision: u8, code: &str) -> Result<()> {
        if code.len() > 7 {
            return Err(OracleError::Serialization(format!(
                "Symbol '{}' is longer than 7 characters",
                code
            )));
        }
        let mut raw = [0u8; 8];
        raw[0] = precision;
        raw[1..=code.len()].copy_from_slice(code.as_bytes());
        self.push_raw(&raw);
        Ok(())
    }

    pub fn push_asset(&mut self, asset: &Asset) -> Result<()> {
        self.push_i64(asset.amount);
        self.push_symbol(asset.precision, &asset.symbol)
    }

    pub fn push_checksum256(&mut self, v: &Checksum256) {
        self.push_raw(&v.0);
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Serialize the signed prefix of a teleport record:
/// `id | time | account | quantity | chain_id | eth_address`.
///
/// The result is what oracles sign and what the EVM contract reconstructs
/// when a user claims.
pub fn serialize_transfer(event: &TransferEvent) -> Result<Vec<u8>> {
    let mut buf = SerialBuffer::new();
    buf.push_u64(event.id);
    buf.push_u32(event.time);
    buf.push_name(&event.account)?;
    buf.push_asset(&event.quantity)?;
    buf.push_u8(event.chain_id);
    buf.push_checksum256(&event.eth_address);

    let mut bytes = buf.into_bytes();
    bytes.truncate(TRANSFER_LOG_SIZE);
    Ok(bytes)
}

/// True if `raw_hex` (a raw table row as returned with `json=false`) starts
/// with the hex encoding of `serialized`.
pub fn raw_row_matches(serialized: &[u8], raw_hex: &str) -> bool {
    let expected = hex::encode(serialized);
    raw_hex
        .as_bytes()
        .get(..expected.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(expected.as_bytes()))
}

/// Payload of the `sign` action.
pub fn encode_sign_action(oracle: &str, id: u64, signature: &str) -> Result<Vec<u8>> {
    let mut buf = SerialBuffer::new();
    buf.push_name(oracle)?;
    buf.push_u64(id);
    buf.push_string(signature);
    Ok(buf.into_bytes())
}

/// Payload of the `received` action.
pub fn encode_received_action(
    oracle: &str,
    to: &str,
    source_ref: &Checksum256,
    quantity: &Asset,
    chain_id: u8,
    confirmed: bool,
) -> Result<Vec<u8>> {
    let mut buf = SerialBuffer::new();
    buf.push_name(oracle)?;
    buf.push_name(to)?;
    buf.push_checksum256(source_ref);
    buf.push_asset(quantity)?;
    buf.push_u8(chain_id);
    buf.push_bool(confirmed);
    Ok(buf.into_bytes())
}

/// Payload of the `claimed` action.
pub fn encode_claimed_action(
    oracle: &str,
    id: u64,
    to_eth: &Checksum256,
    quantity: &Asset,
) -> Result<Vec<u8>> {
    let mut buf = SerialBuffer::new();
    buf.push_name(oracle)?;
    buf.push_u64(id);
    buf.push_checksum256(to_eth);
    buf.push_asset(quantity)?;
    Ok(buf.into_bytes())
}
