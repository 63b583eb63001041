//! Error taxonomy for the oracle core
//!
//! Transient endpoint failures are recovered by rotating endpoints; quorum,
//! authorization and configuration failures stop the affected relay.

use thiserror::Error;

/// Errors produced by the oracle library.
#[derive(Debug, Error)]
pub enum OracleError {
    /// Every endpoint in the pool failed validation within one rotation.
    #[error("No usable endpoints for {chain}")]
    NoUsableEndpoints { chain: String },

    /// An endpoint could not be reached or returned a malformed response.
    #[error("Endpoint {endpoint} unavailable: {reason}")]
    EndpointUnavailable { endpoint: String, reason: String },

    /// An endpoint serves a different network than configured.
    #[error("Endpoint {endpoint} serves network {actual}, expected {expected}")]
    NetworkMismatch {
        endpoint: String,
        expected: String,
        actual: String,
    },

    /// Cross validation wrapped around to the endpoint it started from.
    #[error("Not enough independent endpoints for verification ({required} required)")]
    NotEnoughEndpoints { required: usize },

    /// No quorum of endpoints produced an irreversibility horizon.
    #[error("Could not get last irreversible block time from any endpoint")]
    NoQuorumForFinality,

    /// An endpoint reported an irreversible horizon older than one already seen.
    #[error("Irreversible time {reported} is lower than known horizon {known} ({endpoint})")]
    TimeRegression {
        endpoint: String,
        known: u64,
        reported: u64,
    },

    /// The destination chain rejected the oracle credential.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The destination contract rejected an action for a non-idempotent reason.
    #[error("Rejected by contract: {0}")]
    Rejected(String),

    /// Transport level failure (timeout, connection refused, HTTP error).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Encoding or decoding failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A record failed a sanity or integrity check.
    #[error("{0}")]
    DataIntegrity(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Key error: {0}")]
    Key(String),
}

impl OracleError {
    /// Returns true when retrying cannot help and the relay must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OracleError::NoUsableEndpoints { .. }
                | OracleError::NotEnoughEndpoints { .. }
                | OracleError::NoQuorumForFinality
                | OracleError::Unauthorized(_)
                | OracleError::InvalidConfig(_)
                | OracleError::Key(_)
        )
    }

    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            OracleError::NoUsableEndpoints { .. } => "no_usable_endpoints",
            OracleError::EndpointUnavailable { .. } => "endpoint_unavailable",
            OracleError::NetworkMismatch { .. } => "network_mismatch",
            OracleError::NotEnoughEndpoints { .. } => "not_enough_endpoints",
            OracleError::NoQuorumForFinality => "no_quorum_for_finality",
            OracleError::TimeRegression { .. } => "time_regression",
            OracleError::Unauthorized(_) => "unauthorized",
            OracleError::Rejected(_) => "rejected",
            OracleError::Transport(_) => "transport",
            OracleError::Serialization(_) => "serialization",
            OracleError::DataIntegrity(_) => "data_integrity",
            OracleError::InvalidConfig(_) => "invalid_config",
            OracleError::Checkpoint(_) => "checkpoint",
            OracleError::Key(_) => "key",
        }
    }
}

impl From<reqwest::Error> for OracleError {
    fn from(e: reqwest::Error) -> Self {
        OracleError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for OracleError {
    fn from(e: serde_json::Error) -> Self {
        OracleError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OracleError>;
