use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::antelope::keys::AntelopeKey;
use crate::antelope::serializer::encode_name;
use crate::antelope::transaction::parse_chain_id;
use crate::endpoints::parse_rpc_urls;

/// Smallest block depth accepted as EVM finality without an explicit opt-in.
pub const MIN_SAFE_DEPTH: u64 = 5;

/// Main configuration for the oracle
#[derive(Debug, Clone)]
pub struct Config {
    pub token: TokenConfig,
    pub antelope: AccountChainConfig,
    pub evm: EvmChainConfig,
    pub relay: RelayConfig,
}

/// Token bridged between the chains
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenConfig {
    pub precision: u8,
    pub symbol: String,
}

/// Account chain (Antelope) configuration
#[derive(Clone)]
pub struct AccountChainConfig {
    /// Chain id reported by get_info, 64 hex characters
    pub network_id: String,
    pub endpoints: Vec<String>,
    /// Teleport contract account
    pub contract: String,
    pub oracle_account: String,
    pub permission: String,
    pub private_key: String,
    /// Independent endpoints that must agree on table data and finality
    pub verifications: usize,
    pub wait_cycle_secs: u64,
    pub batch_size: u32,
    pub max_finality_wait_secs: u64,
    /// Teleport id to start signing from; overrides the checkpoint file
    pub start_id: Option<u64>,
    pub checkpoint_path: PathBuf,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for AccountChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountChainConfig")
            .field("network_id", &self.network_id)
            .field("endpoints", &self.endpoints)
            .field("contract", &self.contract)
            .field("oracle_account", &self.oracle_account)
            .field("permission", &self.permission)
            .field("private_key", &"<redacted>")
            .field("verifications", &self.verifications)
            .field("wait_cycle_secs", &self.wait_cycle_secs)
            .field("batch_size", &self.batch_size)
            .field("max_finality_wait_secs", &self.max_finality_wait_secs)
            .field("start_id", &self.start_id)
            .field("checkpoint_path", &self.checkpoint_path)
            .finish()
    }
}

/// EVM chain configuration
#[derive(Clone)]
pub struct EvmChainConfig {
    /// Human readable network name, used in the checkpoint file name
    pub network: String,
    pub chain_id: u64,
    pub endpoints: Vec<String>,
    pub contract: Address,
    /// Key used to sign teleports for the EVM contract
    pub private_key: Option<String>,
    pub verifications: usize,
    pub blocks_to_wait: u64,
    pub genesis_block: u64,
    pub max_block_range: u64,
    pub rewind_margin: u64,
    /// Blocks behind head to start from when no checkpoint exists
    pub initial_lookback: u64,
    pub start_block: Option<u64>,
    pub checkpoint_path: PathBuf,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for EvmChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmChainConfig")
            .field("network", &self.network)
            .field("chain_id", &self.chain_id)
            .field("endpoints", &self.endpoints)
            .field("contract", &self.contract)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("verifications", &self.verifications)
            .field("blocks_to_wait", &self.blocks_to_wait)
            .field("genesis_block", &self.genesis_block)
            .field("max_block_range", &self.max_block_range)
            .field("rewind_margin", &self.rewind_margin)
            .field("initial_lookback", &self.initial_lookback)
            .field("start_block", &self.start_block)
            .field("checkpoint_path", &self.checkpoint_path)
            .finish()
    }
}

/// Relay directions a process can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Account chain teleports signed for the EVM contract
    Sign,
    /// EVM teleports and claims reported to the account chain
    Receipt,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Sign => "sign",
            Direction::Receipt => "receipt",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Direction {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sign" => Ok(Direction::Sign),
            "receipt" | "received" => Ok(Direction::Receipt),
            other => Err(eyre!("Unknown relay direction '{}'", other)),
        }
    }
}

/// Process-wide relay behaviour
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Votes after which a teleport no longer needs this oracle's signature
    pub confirmations: usize,
    pub directions: Vec<Direction>,
    /// Build and log actions without pushing them
    pub dry_run: bool,
    pub request_timeout: Duration,
    pub idle_poll_secs: u64,
    /// Block lag above which the receipt relay skips its idle wait
    pub catch_up_threshold: u64,
    pub api_bind_address: String,
    pub api_port: u16,
}

/// Default functions
fn default_precision() -> u8 {
    4
}

fn default_confirmations() -> usize {
    3
}

fn default_verifications() -> usize {
    2
}

fn default_permission() -> String {
    "active".to_string()
}

fn default_wait_cycle() -> u64 {
    180
}

fn default_batch_size() -> u32 {
    100
}

fn default_max_finality_wait() -> u64 {
    180
}

fn default_blocks_to_wait() -> u64 {
    MIN_SAFE_DEPTH
}

fn default_max_block_range() -> u64 {
    100
}

fn default_rewind_margin() -> u64 {
    50
}

fn default_initial_lookback() -> u64 {
    100
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_idle_poll() -> u64 {
    30
}

fn default_catch_up_threshold() -> u64 {
    1000
}

fn default_api_port() -> u16 {
    9090
}

fn required(name: &str) -> Result<String> {
    let value = env::var(name).map_err(|_| eyre!("{} environment variable is required", name))?;
    if value.trim().is_empty() {
        return Err(eyre!("{} cannot be empty", name));
    }
    Ok(value.trim().to_string())
}

fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .map_err(|e| eyre!("{} is invalid: {}", name, e)),
        _ => Ok(default),
    }
}

fn parse_optional<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| eyre!("{} is invalid: {}", name, e)),
        _ => Ok(None),
    }
}

fn parse_bool(name: &str) -> Result<bool> {
    match env::var(name) {
        Ok(v) => match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" | "" => Ok(false),
            other => Err(eyre!("{} must be a boolean, got '{}'", name, other)),
        },
        Err(_) => Ok(false),
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// `ORACLE_CONFIG` names an env file to load first; otherwise `.env` is
    /// loaded if present.
    pub fn load() -> Result<Self> {
        match env::var("ORACLE_CONFIG") {
            Ok(path) if !path.trim().is_empty() => {
                if !Path::new(&path).exists() {
                    return Err(eyre!("Config file {} does not exist", path));
                }
                Self::load_from_file(&path)
            }
            _ => Self::load_from_file(".env"),
        }
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Self> {
        let token = TokenConfig {
            precision: parse_or("TOKEN_PRECISION", default_precision())?,
            symbol: required("TOKEN_SYMBOL")?,
        };

        let antelope_endpoints = parse_rpc_urls(&required("ANTELOPE_RPC_URLS")?);
        let oracle_account = required("ANTELOPE_ORACLE_ACCOUNT")?;
        let antelope = AccountChainConfig {
            network_id: required("ANTELOPE_CHAIN_ID")?.to_lowercase(),
            endpoints: antelope_endpoints,
            contract: required("ANTELOPE_CONTRACT")?,
            oracle_account: oracle_account.clone(),
            permission: env::var("ANTELOPE_ORACLE_PERMISSION")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(default_permission),
            private_key: required("ANTELOPE_PRIVATE_KEY")?,
            verifications: parse_or("ANTELOPE_VERIFICATIONS", default_verifications())?,
            wait_cycle_secs: parse_or("ANTELOPE_WAIT_CYCLE_SECS", default_wait_cycle())?,
            batch_size: parse_or("ANTELOPE_BATCH_SIZE", default_batch_size())?,
            max_finality_wait_secs: parse_or(
                "ANTELOPE_MAX_FINALITY_WAIT_SECS",
                default_max_finality_wait(),
            )?,
            start_id: parse_optional("ANTELOPE_START_ID")?,
            checkpoint_path: parse_or(
                "ANTELOPE_CHECKPOINT_FILE",
                PathBuf::from(format!(".oracle_antelope_id-{}", oracle_account)),
            )?,
        };

        let network = parse_or("EVM_NETWORK", "evm".to_string())?;
        let evm = EvmChainConfig {
            chain_id: required("EVM_CHAIN_ID")?
                .parse()
                .wrap_err("EVM_CHAIN_ID must be a valid u64")?,
            endpoints: parse_rpc_urls(&required("EVM_RPC_URLS")?),
            contract: Address::from_str(&required("EVM_CONTRACT_ADDRESS")?)
                .wrap_err("Invalid EVM_CONTRACT_ADDRESS")?,
            private_key: env::var("EVM_PRIVATE_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            verifications: parse_or("EVM_VERIFICATIONS", 1)?,
            blocks_to_wait: parse_or("EVM_BLOCKS_TO_WAIT", default_blocks_to_wait())?,
            genesis_block: parse_or("EVM_GENESIS_BLOCK", 0)?,
            max_block_range: parse_or("EVM_MAX_BLOCK_RANGE", default_max_block_range())?,
            rewind_margin: parse_or("EVM_REWIND_MARGIN", default_rewind_margin())?,
            initial_lookback: parse_or("EVM_INITIAL_LOOKBACK", default_initial_lookback())?,
            start_block: parse_optional("EVM_START_BLOCK")?,
            checkpoint_path: parse_or(
                "EVM_CHECKPOINT_FILE",
                PathBuf::from(format!(".oracle_{}_block-{}", network, oracle_account)),
            )?,
            network,
        };

        let directions = match env::var("ORACLE_DIRECTIONS") {
            Ok(raw) if !raw.trim().is_empty() => raw
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(Direction::from_str)
                .collect::<Result<Vec<_>>>()?,
            _ => vec![Direction::Sign, Direction::Receipt],
        };

        let relay = RelayConfig {
            confirmations: parse_or("ORACLE_CONFIRMATIONS", default_confirmations())?,
            directions,
            dry_run: parse_bool("ORACLE_DRY_RUN")?,
            request_timeout: Duration::from_millis(parse_or(
                "RPC_TIMEOUT_MS",
                default_timeout_ms(),
            )?),
            idle_poll_secs: parse_or("ORACLE_IDLE_POLL_SECS", default_idle_poll())?,
            catch_up_threshold: parse_or(
                "ORACLE_CATCH_UP_THRESHOLD",
                default_catch_up_threshold(),
            )?,
            api_bind_address: parse_or("API_BIND_ADDRESS", "0.0.0.0".to_string())?,
            api_port: parse_or("API_PORT", default_api_port())?,
        };

        let allow_shallow = parse_bool("EVM_ALLOW_SHALLOW_FINALITY")?;

        let config = Config {
            token,
            antelope,
            evm,
            relay,
        };
        config.validate(allow_shallow)?;
        Ok(config)
    }

    /// Validate configuration once at startup.
    pub fn validate(&self, allow_shallow_finality: bool) -> Result<()> {
        if self.token.precision > 18 {
            return Err(eyre!("TOKEN_PRECISION cannot exceed 18"));
        }
        if self.token.symbol.len() > 7
            || !self.token.symbol.bytes().all(|b| b.is_ascii_uppercase())
        {
            return Err(eyre!(
                "TOKEN_SYMBOL must be 1-7 uppercase letters, got '{}'",
                self.token.symbol
            ));
        }
        if self.relay.confirmations == 0 {
            return Err(eyre!("ORACLE_CONFIRMATIONS must be at least 1"));
        }
        if self.relay.directions.is_empty() {
            return Err(eyre!("ORACLE_DIRECTIONS must name at least one direction"));
        }

        let a = &self.antelope;
        parse_chain_id(&a.network_id).map_err(|e| eyre!("ANTELOPE_CHAIN_ID: {}", e))?;
        if a.endpoints.is_empty() {
            return Err(eyre!("ANTELOPE_RPC_URLS cannot be empty"));
        }
        if a.verifications == 0 || a.verifications > a.endpoints.len() {
            return Err(eyre!(
                "ANTELOPE_VERIFICATIONS must be between 1 and the number of endpoints ({})",
                a.endpoints.len()
            ));
        }
        for (name, value) in [
            ("ANTELOPE_CONTRACT", &a.contract),
            ("ANTELOPE_ORACLE_ACCOUNT", &a.oracle_account),
            ("ANTELOPE_ORACLE_PERMISSION", &a.permission),
        ] {
            encode_name(value).map_err(|e| eyre!("{}: {}", name, e))?;
        }
        AntelopeKey::parse(&a.private_key).map_err(|e| eyre!("ANTELOPE_PRIVATE_KEY: {}", e))?;
        if a.batch_size == 0 {
            return Err(eyre!("ANTELOPE_BATCH_SIZE must be at least 1"));
        }

        let e = &self.evm;
        if e.endpoints.is_empty() {
            return Err(eyre!("EVM_RPC_URLS cannot be empty"));
        }
        if e.verifications == 0 || e.verifications > e.endpoints.len() {
            return Err(eyre!(
                "EVM_VERIFICATIONS must be between 1 and the number of endpoints ({})",
                e.endpoints.len()
            ));
        }
        if e.blocks_to_wait < MIN_SAFE_DEPTH && !allow_shallow_finality {
            return Err(eyre!(
                "EVM_BLOCKS_TO_WAIT must be at least {} (set EVM_ALLOW_SHALLOW_FINALITY to override)",
                MIN_SAFE_DEPTH
            ));
        }
        if e.max_block_range == 0 {
            return Err(eyre!("EVM_MAX_BLOCK_RANGE must be at least 1"));
        }
        if self.relay.directions.contains(&Direction::Sign) {
            let key = e
                .private_key
                .as_ref()
                .ok_or_else(|| eyre!("EVM_PRIVATE_KEY is required for the sign direction"))?;
            key.trim_start_matches("0x")
                .parse::<PrivateKeySigner>()
                .wrap_err("Invalid EVM_PRIVATE_KEY")?;
        }
        Ok(())
    }

    pub fn runs(&self, direction: Direction) -> bool {
        self.relay.directions.contains(&direction)
    }
}
