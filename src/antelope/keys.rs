//! Antelope K1 keys and signatures
//!
//! Private keys are accepted in legacy WIF form (`5K...`) or `PVT_K1_` form.
//! Signatures are produced in the canonical `SIG_K1_` form nodeos accepts.

use k256::ecdsa::signature::hazmat::RandomizedPrehashSigner;
use k256::ecdsa::{RecoveryId, Signature, SigningKey};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{OracleError, Result};

const MAX_SIGN_ATTEMPTS: usize = 64;

fn ripemd160_checksum(data: &[u8], suffix: &[u8]) -> [u8; 4] {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.update(suffix);
    let digest = hasher.finalize();
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest[..4]);
    out
}

fn double_sha256_checksum(data: &[u8]) -> [u8; 4] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 4];
    out.copy_from_slice(&second[..4]);
    out
}

/// Encode bytes with a K1 ripemd160 checksum in base58, as used by the
/// `PUB_K1_`, `PVT_K1_` and `SIG_K1_` formats.
fn encode_k1(prefix: &str, data: &[u8]) -> String {
    let mut payload = data.to_vec();
    payload.extend_from_slice(&ripemd160_checksum(data, b"K1"));
    format!("{}{}", prefix, bs58::encode(payload).into_string())
}

/// Oracle signing key on the account chain.
#[derive(Clone)]
pub struct AntelopeKey {
    signing_key: SigningKey,
}

impl fmt::Debug for AntelopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AntelopeKey")
            .field("public_key", &self.public_key())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl AntelopeKey {
    /// Parse a private key in WIF or `PVT_K1_` form.
    pub fn parse(key: &str) -> Result<Self> {
        let key = key.trim();
        let secret = if let Some(body) = key.strip_prefix("PVT_K1_") {
            let raw = bs58::decode(body)
                .into_vec()
                .map_err(|e| OracleError::Key(format!("Invalid base58 in private key: {}", e)))?;
            if raw.len() != 36 {
                return Err(OracleError::Key(format!(
                    "PVT_K1 key must decode to 36 bytes, got {}",
                    raw.len()
                )));
            }
            let (secret, checksum) = raw.split_at(32);
            if ripemd160_checksum(secret, b"K1") != checksum {
                return Err(OracleError::Key("PVT_K1 key checksum mismatch".into()));
            }
            secret.to_vec()
        } else {
            let raw = bs58::decode(key)
                .into_vec()
                .map_err(|e| OracleError::Key(format!("Invalid base58 in private key: {}", e)))?;
            if raw.len() != 37 || raw[0] != 0x80 {
                return Err(OracleError::Key("Unrecognized private key format".into()));
            }
            let (versioned, checksum) = raw.split_at(33);
            if double_sha256_checksum(versioned) != checksum {
                return Err(OracleError::Key("WIF key checksum mismatch".into()));
            }
            versioned[1..].to_vec()
        };

        let signing_key = SigningKey::from_slice(&secret)
            .map_err(|e| OracleError::Key(format!("Invalid secp256k1 key: {}", e)))?;
        Ok(Self { signing_key })
    }

    fn compressed_public_key(&self) -> Vec<u8> {
        self.signing_key
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec()
    }

    /// Public key in `PUB_K1_` form.
    pub fn public_key(&self) -> String {
        encode_k1("PUB_K1_", &self.compressed_public_key())
    }

    /// Public key in the legacy `EOS` form.
    pub fn legacy_public_key(&self) -> String {
        let compressed = self.compressed_public_key();
        let mut payload = compressed.clone();
        payload.extend_from_slice(&ripemd160_checksum(&compressed, b""));
        format!("EOS{}", bs58::encode(payload).into_string())
    }

    /// Sign a 32-byte digest and return the compact 65-byte form
    /// `[27 + 4 + recid, r, s]`, canonical as nodeos requires.
    pub fn sign_digest_compact(&self, digest: &[u8; 32]) -> Result<[u8; 65]> {
        let (sig, recid) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| OracleError::Key(format!("Signing failed: {}", e)))?;
        let compact = compact_signature(&sig, recid);
        if is_canonical(&compact) {
            return Ok(compact);
        }

        let mut rng = rand::thread_rng();
        for _ in 0..MAX_SIGN_ATTEMPTS {
            let sig: Signature = self
                .signing_key
                .sign_prehash_with_rng(&mut rng, digest)
                .map_err(|e| OracleError::Key(format!("Signing failed: {}", e)))?;
            let sig = sig.normalize_s().unwrap_or(sig);
            let recid = RecoveryId::trial_recovery_from_prehash(
                self.signing_key.verifying_key(),
                digest,
                &sig,
            )
            .map_err(|e| OracleError::Key(format!("Recovery id not found: {}", e)))?;
            let compact = compact_signature(&sig, recid);
            if is_canonical(&compact) {
                return Ok(compact);
            }
        }
        Err(OracleError::Key(
            "Could not produce a canonical signature".into(),
        ))
    }

    /// Sign a 32-byte digest and return a `SIG_K1_` string.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<String> {
        let compact = self.sign_digest_compact(digest)?;
        Ok(encode_k1("SIG_K1_", &compact))
    }
}

fn compact_signature(sig: &Signature, recid: RecoveryId) -> [u8; 65] {
    let mut out = [0u8; 65];
    out[0] = recid.to_byte() + 27 + 4;
    out[1..].copy_from_slice(&sig.to_bytes());
    out
}

/// Canonical signatures have r and s that do not need a sign byte in DER.
pub fn is_canonical(c: &[u8; 65]) -> bool {
    (c[1] & 0x80) == 0
        && !(c[1] == 0 && (c[2] & 0x80) == 0)
        && (c[33] & 0x80) == 0
        && !(c[33] == 0 && (c[34] & 0x80) == 0)
}
