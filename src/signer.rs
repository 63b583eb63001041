//! Attestation signer for the EVM teleport contract
//!
//! The EVM contract recovers the oracle address from a signature over
//! `keccak256(serialized teleport)`, so votes are signed with the oracle's
//! EVM key even though they are submitted on the account chain.

use alloy::primitives::{keccak256, Address, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use std::fmt;

use crate::error::{OracleError, Result};

pub struct AttestationSigner {
    signer: PrivateKeySigner,
}

/// Custom Debug that only shows the signer address.
impl fmt::Debug for AttestationSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttestationSigner")
            .field("address", &self.signer.address())
            .finish()
    }
}

impl AttestationSigner {
    pub fn from_hex(private_key: &str) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| OracleError::Key(format!("Invalid EVM private key: {}", e)))?;
        Ok(Self { signer })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Digest checked by the EVM contract.
    pub fn digest(serialized: &[u8]) -> B256 {
        keccak256(serialized)
    }

    /// Sign a serialized teleport, returning `0x` + r || s || v with v in
    /// {27, 28}.
    pub fn sign(&self, serialized: &[u8]) -> Result<String> {
        let digest = Self::digest(serialized);
        let signature = self
            .signer
            .sign_hash_sync(&digest)
            .map_err(|e| OracleError::Key(format!("Signing failed: {}", e)))?;
        Ok(format!("0x{}", hex::encode(signature.as_bytes())))
    }
}
