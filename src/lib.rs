//! Teleport oracle
//!
//! Watches a teleport contract on an Antelope account chain and its
//! counterpart on an EVM chain, and relays attestations between them:
//!
//! - teleports out of the account chain are signed for the EVM contract and
//!   the signatures are submitted to the account chain as votes
//! - `Teleport` and `Claimed` logs on the EVM chain are reported to the
//!   account chain contract
//!
//! Every read that feeds a signature is cross-checked against several
//! independent endpoints, and only irreversible data is relayed.

pub mod antelope;
pub mod api;
pub mod checkpoint;
pub mod config;
pub mod driver;
pub mod endpoints;
pub mod error;
pub mod evm;
pub mod finality;
pub mod metrics;
pub mod rejection;
pub mod relay;
pub mod retry;
pub mod signer;
pub mod types;
pub mod verification;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{OracleError, Result};
