//! Transaction packing and signing digest

use sha2::{Digest, Sha256};

use super::serializer::SerialBuffer;
use crate::error::{OracleError, Result};

/// Seconds a pushed transaction stays valid after the reference head time.
pub const EXPIRE_SECONDS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionLevel {
    pub actor: String,
    pub permission: String,
}

/// A contract action with its payload already serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub account: String,
    pub name: String,
    pub authorization: Vec<PermissionLevel>,
    pub data: Vec<u8>,
}

impl Action {
    /// Action authorized by a single actor/permission pair.
    pub fn new(account: &str, name: &str, actor: &str, permission: &str, data: Vec<u8>) -> Self {
        Self {
            account: account.to_string(),
            name: name.to_string(),
            authorization: vec![PermissionLevel {
                actor: actor.to_string(),
                permission: permission.to_string(),
            }],
            data,
        }
    }

    fn pack_into(&self, buf: &mut SerialBuffer) -> Result<()> {
        buf.push_name(&self.account)?;
        buf.push_name(&self.name)?;
        buf.push_varuint32(self.authorization.len() as u32);
        for auth in &self.authorization {
            buf.push_name(&auth.actor)?;
            buf.push_name(&auth.permission)?;
        }
        buf.push_bytes(&self.data);
        Ok(())
    }
}

/// Reference block and expiration that bind a transaction to one fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaposHeader {
    pub expiration: u32,
    pub ref_block_num: u16,
    pub ref_block_prefix: u32,
}

impl TaposHeader {
    /// Derives TaPoS fields from a block number and its 32-byte id.
    pub fn from_block(block_num: u32, block_id_hex: &str, expiration: u32) -> Result<Self> {
        let id = hex::decode(block_id_hex)
            .map_err(|e| OracleError::Serialization(format!("Invalid block id: {}", e)))?;
        if id.len() != 32 {
            return Err(OracleError::Serialization(format!(
                "Block id must be 32 bytes, got {}",
                id.len()
            )));
        }
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&id[8..12]);
        Ok(Self {
            expiration,
            ref_block_num: (block_num & 0xffff) as u16,
            ref_block_prefix: u32::from_le_bytes(prefix),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub header: TaposHeader,
    pub actions: Vec<Action>,
}

impl Transaction {
    pub fn new(header: TaposHeader, actions: Vec<Action>) -> Self {
        Self { header, actions }
    }

    /// Native binary form as sent in `packed_trx`.
    pub fn pack(&self) -> Result<Vec<u8>> {
        let mut buf = SerialBuffer::new();
        buf.push_u32(self.header.expiration);
        buf.push_u16(self.header.ref_block_num);
        buf.push_u32(self.header.ref_block_prefix);
        buf.push_varuint32(0); // max_net_usage_words
        buf.push_u8(0); // max_cpu_usage_ms
        buf.push_varuint32(0); // delay_sec
        buf.push_varuint32(0); // context_free_actions
        buf.push_varuint32(self.actions.len() as u32);
        for action in &self.actions {
            action.pack_into(&mut buf)?;
        }
        buf.push_varuint32(0); // transaction_extensions
        Ok(buf.into_bytes())
    }

    /// Digest signed by the authorizing keys:
    /// `sha256(chain_id | packed_trx | 32 zero bytes)`.
    pub fn signing_digest(chain_id: &[u8; 32], packed: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(chain_id);
        hasher.update(packed);
        hasher.update([0u8; 32]);
        hasher.finalize().into()
    }

    /// Transaction id, the sha256 of the packed transaction.
    pub fn id(packed: &[u8]) -> String {
        hex::encode(Sha256::digest(packed))
    }
}

/// Parse a chain id given as 64 hex characters.
pub fn parse_chain_id(chain_id: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(chain_id)
        .map_err(|e| OracleError::InvalidConfig(format!("Invalid chain id: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| OracleError::InvalidConfig("Chain id must be 32 bytes".into()))
}
