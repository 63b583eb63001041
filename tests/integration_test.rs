//! Integration tests for the oracle's public API
//!
//! Run with: cargo test --test integration_test -- --nocapture
//!
//! The `#[ignore]` tests need live nodes:
//! - ANTELOPE_RPC_URL pointing at an Antelope chain API
//! - EVM_RPC_URL pointing at an EVM JSON-RPC endpoint

use alloy::primitives::{address, PrimitiveSignature, B256, U256};
use alloy::sol_types::SolValue;

use teleport_oracle::antelope::serializer::{
    encode_name, raw_row_matches, serialize_transfer, TRANSFER_LOG_SIZE,
};
use teleport_oracle::checkpoint::{resume_block, CheckpointFile};
use teleport_oracle::config::TokenConfig;
use teleport_oracle::evm::events::{decode_log, InboundKind, CLAIMED_TOPIC, TELEPORT_TOPIC};
use teleport_oracle::evm::EvmLog;
use teleport_oracle::rejection::{classify_rejection, classify_submission_error, RejectionKind};
use teleport_oracle::signer::AttestationSigner;
use teleport_oracle::types::{Asset, Checksum256, TransferEvent};
use teleport_oracle::OracleError;

mod helpers {
    use std::time::Duration;

    /// Check Antelope chain API connectivity
    pub async fn check_antelope_connectivity(url: &str) -> bool {
        match reqwest::Client::new()
            .post(format!("{}/v1/chain/get_info", url.trim_end_matches('/')))
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Check EVM RPC connectivity
    pub async fn check_evm_connectivity(url: &str) -> bool {
        match reqwest::Client::new()
            .post(url)
            .header("content-type", "application/json")
            .body(r#"{"jsonrpc":"2.0","method":"eth_blockNumber","params":[],"id":1}"#)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

fn token() -> TokenConfig {
    TokenConfig {
        precision: 4,
        symbol: "TLM".to_string(),
    }
}

fn transfer(id: u64) -> TransferEvent {
    TransferEvent {
        id,
        time: 1_630_000_000,
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

fn temp_file(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "teleport-oracle-it-{}-{}",
        std::process::id(),
        name
    ))
}

// ============================================================================
// Sign direction: serialize, sign, recover
// ============================================================================

#[test]
fn test_transfer_signature_recovers_oracle_address() {
    let signer = AttestationSigner::from_hex(DEV_KEY).unwrap();
    let serialized = serialize_transfer(&transfer(7)).unwrap();
    assert_eq!(serialized.len(), TRANSFER_LOG_SIZE);

    let sig_hex = signer.sign(&serialized).unwrap();
    let bytes = hex::decode(sig_hex.trim_start_matches("0x")).unwrap();
    let signature = PrimitiveSignature::try_from(bytes.as_slice()).unwrap();
    let recovered = signature
        .recover_address_from_prehash(&AttestationSigner::digest(&serialized))
        .unwrap();

    assert_eq!(recovered, signer.address());
}

#[test]
fn test_transfer_serialization_known_vector() {
    let serialized = serialize_transfer(&transfer(0)).unwrap();
    let expected = format!(
        "{}{}{}{}{}{}{}",
        "0000000000000000",
        "80d32761",
        hex::encode(encode_name("alice").unwrap().to_le_bytes()),
        "b0c412000000000004544c4d00000000",
        "02",
        "1111111111111111111111111111111111111111",
        "000000000000000000000000",
    );
    assert_eq!(hex::encode(&serialized), expected);
}

#[test]
fn test_raw_row_detects_tampered_account() {
    let honest = serialize_transfer(&transfer(3)).unwrap();
    let raw = format!("{}0000", hex::encode(&honest));
    assert!(raw_row_matches(&honest, &raw));

    let mut forged = transfer(3);
    forged.account = "mallory".to_string();
    let forged = serialize_transfer(&forged).unwrap();
    assert!(!raw_row_matches(&forged, &raw));
}

#[test]
fn test_signature_differs_per_teleport() {
    let signer = AttestationSigner::from_hex(DEV_KEY).unwrap();
    let a = signer.sign(&serialize_transfer(&transfer(1)).unwrap()).unwrap();
    let b = signer.sign(&serialize_transfer(&transfer(2)).unwrap()).unwrap();
    assert_ne!(a, b);
}

// ============================================================================
// Assets
// ============================================================================

#[test]
fn test_asset_formatting() {
    let asset = Asset::new(1_870_000, 4, "TLM").unwrap();
    assert_eq!(asset.to_string(), "187.0000 TLM");

    let parsed: Asset = "0.0001 TLM".parse().unwrap();
    assert_eq!(parsed.amount, 1);
    assert_eq!(parsed.precision, 4);

    let whole: Asset = "5 WAX".parse().unwrap();
    assert_eq!(whole.to_string(), "5 WAX");

    assert!("1.0 tlm".parse::<Asset>().is_err());
    assert!("abc TLM".parse::<Asset>().is_err());
}

// ============================================================================
// Receipt direction: decode logs into actions
// ============================================================================

#[test]
fn test_teleport_log_becomes_received_action() {
    let log = EvmLog {
        tx_hash: B256::repeat_byte(0x42),
        log_index: 3,
        block_number: 1_000,
        topics: vec![TELEPORT_TOPIC, B256::ZERO],
        data: ("bob".to_string(), U256::from(250_000u64), U256::from(2u64)).abi_encode_params(),
        removed: false,
    };

    let event = decode_log(&log, &token()).unwrap();
    match &event.kind {
        InboundKind::Teleport(t) => {
            assert_eq!(t.to, "bob");
            assert_eq!(t.quantity.to_string(), "25.0000 TLM");
            assert_eq!(t.source_ref.0, [0x42; 32]);
        }
        other => panic!("unexpected {:?}", other),
    }

    let action = event.to_action("teleporteos", "oracle1", "active").unwrap();
    assert_eq!(action.account, "teleporteos");
    assert_eq!(action.name, "received");
    assert_eq!(&action.data[0..8], &encode_name("oracle1").unwrap().to_le_bytes());
    assert_eq!(&action.data[8..16], &encode_name("bob").unwrap().to_le_bytes());
    assert_eq!(&action.data[16..48], &[0x42; 32]);
}

#[test]
fn test_claimed_log_becomes_claimed_action() {
    let to = address!("2222222222222222222222222222222222222222");
    let log = EvmLog {
        tx_hash: B256::repeat_byte(0x07),
        log_index: 0,
        block_number: 2_000,
        topics: vec![CLAIMED_TOPIC],
        data: (11u64, to, U256::from(10_000u64)).abi_encode_params(),
        removed: false,
    };

    let event = decode_log(&log, &token()).unwrap();
    let action = event.to_action("teleporteos", "oracle1", "active").unwrap();
    assert_eq!(action.name, "claimed");
    assert_eq!(&action.data[8..16], &11u64.to_le_bytes());
    assert_eq!(&action.data[16..36], &[0x22; 20]);
    assert_eq!(&action.data[36..48], &[0u8; 12]);
}

#[test]
fn test_zero_amount_log_is_invalid() {
    let log = EvmLog {
        tx_hash: B256::repeat_byte(0x01),
        log_index: 0,
        block_number: 1,
        topics: vec![TELEPORT_TOPIC],
        data: ("bob".to_string(), U256::ZERO, U256::from(2u64)).abi_encode_params(),
        removed: false,
    };
    assert!(matches!(
        decode_log(&log, &token()),
        Err(OracleError::DataIntegrity(_))
    ));
}

// ============================================================================
// Contract rejections
// ============================================================================

#[test]
fn test_rejection_messages() {
    let cases = [
        ("assertion failure with message: Oracle has already signed", RejectionKind::AlreadyHandled),
        ("assertion failure with message: Teleport is already claimed", RejectionKind::AlreadyHandled),
        ("assertion failure with message: Account is not an oracle", RejectionKind::Unauthorized),
        ("assertion failure with message: Quantity mismatch", RejectionKind::Permanent),
        (
            "assertion failure with message: Another oracle has already registered teleport",
            RejectionKind::Permanent,
        ),
        ("deadline exceeded", RejectionKind::Retryable),
    ];
    for (message, expected) in cases {
        assert_eq!(classify_rejection(message), expected, "{}", message);
    }
}

#[test]
fn test_submission_error_classification() {
    assert_eq!(
        classify_submission_error(&OracleError::Unauthorized("missing_auth_exception".into())),
        RejectionKind::Unauthorized
    );
    assert_eq!(
        classify_submission_error(&OracleError::Transport("connection reset".into())),
        RejectionKind::Retryable
    );
}

// ============================================================================
// Checkpoints
// ============================================================================

#[test]
fn test_checkpoint_survives_reopen() {
    let path = temp_file("reopen");
    let _ = std::fs::remove_file(&path);

    let first = CheckpointFile::new(&path);
    assert_eq!(first.load().unwrap(), None);
    first.save(1_234).unwrap();

    let reopened = CheckpointFile::new(&path);
    assert_eq!(reopened.load().unwrap(), Some(1_234));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_resume_block_rewinds_within_genesis() {
    assert_eq!(resume_block(1_000, 50, 0), 950);
    assert_eq!(resume_block(120, 50, 100), 100);
}

// ============================================================================
// Live nodes
// ============================================================================

#[tokio::test]
#[ignore = "Requires a live Antelope node"]
async fn test_antelope_node_reachable() {
    let Ok(url) = std::env::var("ANTELOPE_RPC_URL") else {
        println!("ANTELOPE_RPC_URL not set, skipping");
        return;
    };
    assert!(
        helpers::check_antelope_connectivity(&url).await,
        "Antelope node at {} is not reachable",
        url
    );
}

#[tokio::test]
#[ignore = "Requires a live EVM node"]
async fn test_evm_node_reachable() {
    let Ok(url) = std::env::var("EVM_RPC_URL") else {
        println!("EVM_RPC_URL not set, skipping");
        return;
    };
    assert!(
        helpers::check_evm_connectivity(&url).await,
        "EVM node at {} is not reachable",
        url
    );
}
